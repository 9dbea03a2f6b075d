use crate::models::{DashboardStats, SavingsReport};
use crate::services::report::{build_report, can_generate_report, dashboard_stats};
use crate::services::state::AppState;
use tauri::State;

#[tauri::command]
pub async fn get_report(client_id: String, state: State<'_, AppState>) -> Result<SavingsReport, String> {
    let kwh_price = state.settings().map_err(|e| e.to_string())?.kwh_price;
    // Balances may still be waiting in the debouncer.
    state.flush_pending_writes();

    let store = state.store().map_err(|e| e.to_string())?;
    let client = store
        .get_client(&client_id)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "Client not found".to_string())?;
    let units = store.list_consumer_units(&client_id).map_err(|e| e.to_string())?;
    if !can_generate_report(&units) {
        return Err("Every consumer unit needs a balance and invoice history".to_string());
    }

    Ok(build_report(&client, &units, kwh_price))
}

#[tauri::command]
pub async fn get_dashboard_stats(state: State<'_, AppState>) -> Result<DashboardStats, String> {
    let store = state.store().map_err(|e| e.to_string())?;
    let clients = store.list_clients().map_err(|e| e.to_string())?;
    Ok(dashboard_stats(&clients))
}
