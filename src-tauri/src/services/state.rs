use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::db::ClientStore;
use crate::models::{ClientDetail, InvoiceRecord, Settings};
use crate::services::client_filter::missing_fields;
use crate::services::debounce::Debouncer;
use crate::services::history_parser::{format_history_text, parse_history_checked};
use crate::services::report::can_generate_report;
use crate::services::settings::store_settings;

/// (client id, unit id)
pub type UnitKey = (String, String);

pub struct AppState {
    store: Arc<Mutex<dyn ClientStore>>,
    settings: Arc<Mutex<Settings>>,
    balance_writer: Debouncer<UnitKey, f64>,
}

impl AppState {
    pub fn new(store: Arc<Mutex<dyn ClientStore>>, settings: Settings) -> Self {
        let delay = Duration::from_millis(settings.balance_debounce_ms);
        let sink_store = store.clone();
        let balance_writer = Debouncer::new(delay, move |(client_id, unit_id): &UnitKey, balance: f64| {
            let store = match sink_store.lock() {
                Ok(store) => store,
                Err(_) => {
                    warn!(%unit_id, "Store lock poisoned, dropping balance write");
                    return;
                }
            };
            match store.update_unit_balance(client_id, unit_id, balance) {
                Ok(()) => debug!(%client_id, %unit_id, balance, "Balance saved"),
                Err(err) => warn!(%client_id, %unit_id, error = %err, "Balance write failed"),
            }
        });

        AppState {
            store,
            settings: Arc::new(Mutex::new(settings)),
            balance_writer,
        }
    }

    pub fn store(&self) -> Result<MutexGuard<'_, dyn ClientStore + 'static>> {
        self.store.lock().map_err(|_| anyhow!("Store lock"))
    }

    pub fn settings(&self) -> Result<Settings> {
        Ok(self.settings.lock().map_err(|_| anyhow!("Settings lock"))?.clone())
    }

    pub fn update_settings(&self, settings: Settings) -> Result<()> {
        store_settings(&*self.store()?, &settings)?;
        self.balance_writer
            .set_delay(Duration::from_millis(settings.balance_debounce_ms));
        let mut locked = self.settings.lock().map_err(|_| anyhow!("Settings lock"))?;
        *locked = settings;
        Ok(())
    }

    pub fn client_detail(&self, client_id: &str) -> Result<ClientDetail> {
        let store = self.store()?;
        let client = store
            .get_client(client_id)?
            .ok_or_else(|| anyhow!("Client {} not found", client_id))?;
        let consumer_units = store.list_consumer_units(client_id)?;
        let events = store.list_events(client_id)?;
        let missing = missing_fields(&client)
            .into_iter()
            .map(|field| field.label().to_string())
            .collect();
        let ready = can_generate_report(&consumer_units);

        Ok(ClientDetail {
            client,
            consumer_units,
            events,
            missing_fields: missing,
            can_generate_report: ready,
        })
    }

    /// Parses pasted billing text and replaces the unit's history with it.
    /// Text without a single readable row is rejected and the stored history
    /// is left untouched.
    pub fn save_unit_history(&self, client_id: &str, unit_id: &str, raw_text: &str) -> Result<Vec<InvoiceRecord>> {
        let records = parse_history_checked(raw_text)?;
        self.store()?.replace_unit_history(client_id, unit_id, &records)?;
        info!("saved {} invoice records for unit {}", records.len(), unit_id);
        Ok(records)
    }

    /// The unit's stored history rendered back as billing table rows.
    pub fn unit_history_text(&self, client_id: &str, unit_id: &str) -> Result<String> {
        let unit = self
            .store()?
            .list_consumer_units(client_id)?
            .into_iter()
            .find(|unit| unit.id == unit_id)
            .ok_or_else(|| anyhow!("Consumer unit {} not found", unit_id))?;
        Ok(format_history_text(&unit.history))
    }

    /// Queues a balance write. Repeated edits of the same unit within the
    /// delay only persist the last value.
    pub fn schedule_balance(&self, client_id: &str, unit_id: &str, balance_kwh: f64) {
        self.balance_writer
            .schedule((client_id.to_string(), unit_id.to_string()), balance_kwh);
    }

    pub fn discard_balance(&self, client_id: &str, unit_id: &str) -> bool {
        self.balance_writer
            .cancel(&(client_id.to_string(), unit_id.to_string()))
    }

    pub fn flush_pending_writes(&self) -> usize {
        let written = self.balance_writer.flush();
        if written > 0 {
            debug!(written, "Flushed pending balance writes");
        }
        written
    }

    pub fn pending_writes(&self) -> usize {
        self.balance_writer.pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{Client, ClientStatus};
    use crate::services::history_parser::HistoryError;

    fn state_with_unit() -> (AppState, String) {
        let db = Database::open_in_memory().unwrap();
        db.upsert_client(&Client {
            id: "c1".to_string(),
            client_number: Some("7".to_string()),
            name: Some("Bruno Lima".to_string()),
            status: ClientStatus::Active,
            ..Client::default()
        })
        .unwrap();
        let unit = db.add_consumer_unit("c1", "Casa").unwrap();
        let store: Arc<Mutex<dyn ClientStore>> = Arc::new(Mutex::new(db));
        (AppState::new(store, Settings::default()), unit.id)
    }

    fn stored_balance(state: &AppState, unit_id: &str) -> f64 {
        state
            .store()
            .unwrap()
            .list_consumer_units("c1")
            .unwrap()
            .into_iter()
            .find(|unit| unit.id == unit_id)
            .map(|unit| unit.balance_kwh)
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn balance_edits_are_coalesced() {
        let (state, unit_id) = state_with_unit();
        state.schedule_balance("c1", &unit_id, 10.0);
        state.schedule_balance("c1", &unit_id, 125.5);
        assert_eq!(state.pending_writes(), 1);
        assert_eq!(stored_balance(&state, &unit_id), 0.0);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(state.pending_writes(), 0);
        assert_eq!(stored_balance(&state, &unit_id), 125.5);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_persists_before_the_delay() {
        let (state, unit_id) = state_with_unit();
        state.schedule_balance("c1", &unit_id, 42.0);
        assert_eq!(state.flush_pending_writes(), 1);
        assert_eq!(stored_balance(&state, &unit_id), 42.0);
    }

    #[tokio::test(start_paused = true)]
    async fn discarded_writes_are_not_persisted() {
        let (state, unit_id) = state_with_unit();
        state.schedule_balance("c1", &unit_id, 42.0);
        assert!(state.discard_balance("c1", &unit_id));
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(stored_balance(&state, &unit_id), 0.0);
    }

    #[test]
    fn detail_lists_missing_fields_and_readiness() {
        let (state, _) = state_with_unit();
        let detail = state.client_detail("c1").unwrap();
        assert_eq!(detail.consumer_units.len(), 1);
        assert_eq!(
            detail.missing_fields,
            vec!["Address", "Install date", "Panel count", "Power (kWp)"]
        );
        assert!(!detail.can_generate_report);
        assert!(state.client_detail("missing").is_err());
    }

    const TWO_ROWS: &str = "1 05/02/2024 11800 01/2024 320,125 15/02/2024 FATURA 210,45 14/02/2024
2 05/03/2024 12120 02/2024 1.250,5 15/03/2024 FATURA 1.045,30 EM ABERTO";

    fn stored_history_len(state: &AppState, unit_id: &str) -> usize {
        state
            .store()
            .unwrap()
            .list_consumer_units("c1")
            .unwrap()
            .into_iter()
            .find(|unit| unit.id == unit_id)
            .map(|unit| unit.history.len())
            .unwrap()
    }

    #[test]
    fn unreadable_history_is_rejected_and_keeps_saved_rows() {
        let (state, unit_id) = state_with_unit();
        assert_eq!(state.save_unit_history("c1", &unit_id, TWO_ROWS).unwrap().len(), 2);

        let err = state
            .save_unit_history("c1", &unit_id, "Copiei errado, sem tabela")
            .unwrap_err();
        assert_eq!(err.to_string(), HistoryError::NoRecords.to_string());
        assert_eq!(stored_history_len(&state, &unit_id), 2);
    }

    #[test]
    fn saved_history_copies_out_as_readable_text() {
        let (state, unit_id) = state_with_unit();
        let saved = state.save_unit_history("c1", &unit_id, TWO_ROWS).unwrap();
        let text = state.unit_history_text("c1", &unit_id).unwrap();
        assert!(text.contains("320,125"));
        assert_eq!(crate::services::history_parser::parse_history(&text), saved);
        assert!(state.unit_history_text("c1", "missing").is_err());
    }

    #[test]
    fn updated_settings_are_persisted() {
        let (state, _) = state_with_unit();
        state
            .update_settings(Settings {
                kwh_price: 1.2,
                balance_debounce_ms: 300,
            })
            .unwrap();
        assert_eq!(state.settings().unwrap().kwh_price, 1.2);
        let reloaded = crate::services::settings::load_settings(&*state.store().unwrap());
        assert_eq!(reloaded.balance_debounce_ms, 300);
    }
}
