use crate::models::{ClientDetail, ClientListing, ClientStatus, FilterCriteria};
use crate::services::client_filter::{apply_filters, distinct_cities};
use crate::services::state::AppState;
use serde::Deserialize;
use tauri::{AppHandle, Emitter, State};
use tracing::info;

#[derive(Deserialize)]
pub struct UpdateStatusPayload {
    pub client_id: String,
    pub status: ClientStatus,
    pub report_sent: bool,
}

#[tauri::command]
pub async fn list_clients(
    criteria: Option<FilterCriteria>,
    state: State<'_, AppState>,
) -> Result<ClientListing, String> {
    let criteria = criteria.unwrap_or_default();
    let clients = {
        let store = state.store().map_err(|e| e.to_string())?;
        store.list_clients().map_err(|e| e.to_string())?
    };

    let outcome = apply_filters(&clients, &criteria);
    Ok(ClientListing {
        clients: outcome.clients,
        stats: outcome.stats,
        cities: distinct_cities(&clients),
        has_active_filters: criteria.has_active_filters(),
    })
}

#[tauri::command]
pub async fn get_client_detail(client_id: String, state: State<'_, AppState>) -> Result<ClientDetail, String> {
    state.client_detail(&client_id).map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn update_client_status(
    payload: UpdateStatusPayload,
    state: State<'_, AppState>,
    app: AppHandle,
) -> Result<(), String> {
    {
        let store = state.store().map_err(|e| e.to_string())?;
        store
            .update_client_status(&payload.client_id, payload.status, payload.report_sent)
            .map_err(|e| e.to_string())?;
        let event = if payload.report_sent {
            format!("Status changed to {} (report sent)", payload.status)
        } else {
            format!("Status changed to {}", payload.status)
        };
        store
            .log_event(&payload.client_id, &event)
            .map_err(|e| e.to_string())?;
    }

    let _ = app.emit("clients-changed", payload.client_id);
    Ok(())
}

#[tauri::command]
pub async fn delete_client(client_id: String, state: State<'_, AppState>, app: AppHandle) -> Result<(), String> {
    let units = {
        let store = state.store().map_err(|e| e.to_string())?;
        let units = store.list_consumer_units(&client_id).map_err(|e| e.to_string())?;
        store.delete_client(&client_id).map_err(|e| e.to_string())?;
        units
    };
    for unit in &units {
        state.discard_balance(&client_id, &unit.id);
    }

    info!("deleted client {} with {} consumer units", client_id, units.len());
    let _ = app.emit("clients-changed", client_id);
    Ok(())
}
