use crate::models::Settings;
use crate::services::state::AppState;
use serde::Deserialize;
use tauri::State;

#[derive(Deserialize)]
pub struct SettingsPayload {
    pub kwh_price: Option<f64>,
    pub balance_debounce_ms: Option<u64>,
}

#[tauri::command]
pub async fn get_settings(state: State<'_, AppState>) -> Result<Settings, String> {
    state.settings().map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn save_settings(payload: SettingsPayload, state: State<'_, AppState>) -> Result<Settings, String> {
    let mut settings = state.settings().map_err(|e| e.to_string())?;
    if let Some(price) = payload.kwh_price {
        settings.kwh_price = price;
    }
    if let Some(delay) = payload.balance_debounce_ms {
        settings.balance_debounce_ms = delay;
    }

    state.update_settings(settings.clone()).map_err(|e| e.to_string())?;
    Ok(settings)
}
