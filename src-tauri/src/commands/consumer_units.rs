use crate::models::{ConsumerUnit, InvoiceRecord};
use crate::services::history_parser::parse_history_checked;
use crate::services::state::AppState;
use serde::{Deserialize, Serialize};
use tauri::{AppHandle, Emitter, State};

#[derive(Deserialize)]
pub struct UnitBalancePayload {
    pub client_id: String,
    pub unit_id: String,
    pub balance_kwh: f64,
}

#[derive(Deserialize)]
pub struct UnitHistoryPayload {
    pub client_id: String,
    pub unit_id: String,
    pub raw_text: String,
}

#[derive(Serialize)]
pub struct HistoryPreview {
    pub records: Vec<InvoiceRecord>,
    pub warning: Option<String>,
}

#[derive(Clone, Serialize)]
struct UnitsChanged {
    client_id: String,
    unit_id: String,
}

fn units_changed(app: &AppHandle, client_id: &str, unit_id: &str) {
    let _ = app.emit(
        "units-changed",
        UnitsChanged {
            client_id: client_id.to_string(),
            unit_id: unit_id.to_string(),
        },
    );
}

#[tauri::command]
pub async fn add_consumer_unit(
    client_id: String,
    name: String,
    state: State<'_, AppState>,
    app: AppHandle,
) -> Result<ConsumerUnit, String> {
    if name.trim().is_empty() {
        return Err("Unit name is required".to_string());
    }
    let unit = {
        let store = state.store().map_err(|e| e.to_string())?;
        let unit = store
            .add_consumer_unit(&client_id, &name)
            .map_err(|e| e.to_string())?;
        store
            .log_event(&client_id, &format!("Consumer unit {} added", unit.name))
            .map_err(|e| e.to_string())?;
        unit
    };

    units_changed(&app, &client_id, &unit.id);
    Ok(unit)
}

#[tauri::command]
pub async fn delete_consumer_unit(
    client_id: String,
    unit_id: String,
    state: State<'_, AppState>,
    app: AppHandle,
) -> Result<(), String> {
    state.discard_balance(&client_id, &unit_id);
    {
        let store = state.store().map_err(|e| e.to_string())?;
        store
            .delete_consumer_unit(&client_id, &unit_id)
            .map_err(|e| e.to_string())?;
        store
            .log_event(&client_id, "Consumer unit removed")
            .map_err(|e| e.to_string())?;
    }

    units_changed(&app, &client_id, &unit_id);
    Ok(())
}

/// The write lands after the configured delay; the view keeps the typed
/// value in the meantime.
#[tauri::command]
pub async fn update_unit_balance(payload: UnitBalancePayload, state: State<'_, AppState>) -> Result<(), String> {
    if !payload.balance_kwh.is_finite() {
        return Err("Balance must be a number".to_string());
    }
    state.schedule_balance(&payload.client_id, &payload.unit_id, payload.balance_kwh);
    Ok(())
}

#[tauri::command]
pub async fn flush_pending_writes(state: State<'_, AppState>) -> Result<usize, String> {
    Ok(state.flush_pending_writes())
}

#[tauri::command]
pub async fn parse_unit_history(raw_text: String) -> Result<HistoryPreview, String> {
    match parse_history_checked(&raw_text) {
        Ok(records) => Ok(HistoryPreview { records, warning: None }),
        Err(err) => Ok(HistoryPreview {
            records: Vec::new(),
            warning: Some(err.to_string()),
        }),
    }
}

#[tauri::command]
pub async fn save_unit_history(
    payload: UnitHistoryPayload,
    state: State<'_, AppState>,
    app: AppHandle,
) -> Result<Vec<InvoiceRecord>, String> {
    let records = state
        .save_unit_history(&payload.client_id, &payload.unit_id, &payload.raw_text)
        .map_err(|e| e.to_string())?;

    units_changed(&app, &payload.client_id, &payload.unit_id);
    Ok(records)
}

#[tauri::command]
pub async fn copy_unit_history(
    client_id: String,
    unit_id: String,
    state: State<'_, AppState>,
) -> Result<String, String> {
    state
        .unit_history_text(&client_id, &unit_id)
        .map_err(|e| e.to_string())
}
