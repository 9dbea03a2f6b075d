use anyhow::{Context, Result};
use tracing::warn;

use crate::db::ClientStore;
use crate::models::Settings;

pub const KWH_PRICE_KEY: &str = "kwh_price";
pub const BALANCE_DEBOUNCE_KEY: &str = "balance_debounce_ms";

/// Reads settings from the store, falling back to defaults for anything
/// missing or unreadable.
pub fn load_settings(store: &dyn ClientStore) -> Settings {
    let defaults = Settings::default();
    let kwh_price = read_setting(store, KWH_PRICE_KEY)
        .and_then(|raw| raw.trim().replace(',', ".").parse::<f64>().ok())
        .filter(|price| price.is_finite() && *price > 0.0)
        .unwrap_or(defaults.kwh_price);
    let balance_debounce_ms = read_setting(store, BALANCE_DEBOUNCE_KEY)
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .unwrap_or(defaults.balance_debounce_ms);

    Settings {
        kwh_price,
        balance_debounce_ms,
    }
}

fn read_setting(store: &dyn ClientStore, key: &str) -> Option<String> {
    match store.get_setting(key) {
        Ok(value) => value,
        Err(err) => {
            warn!(key, error = %err, "Failed to read setting, using default");
            None
        }
    }
}

pub fn store_settings(store: &dyn ClientStore, settings: &Settings) -> Result<()> {
    if !settings.kwh_price.is_finite() || settings.kwh_price <= 0.0 {
        anyhow::bail!("kWh price must be a positive number");
    }
    store
        .set_setting(KWH_PRICE_KEY, &settings.kwh_price.to_string())
        .context("Saving kWh price")?;
    store
        .set_setting(BALANCE_DEBOUNCE_KEY, &settings.balance_debounce_ms.to_string())
        .context("Saving balance delay")?;
    Ok(())
}
