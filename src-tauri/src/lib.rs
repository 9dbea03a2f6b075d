pub mod db;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(feature = "desktop")]
pub mod commands;

#[cfg(feature = "desktop")]
pub fn run() {
    use anyhow::anyhow;
    use std::sync::{Arc, Mutex};
    use tauri::{Manager, WindowEvent};
    use tracing::info;
    use tracing_subscriber::EnvFilter;

    use crate::db::{ClientStore, Database};
    use crate::services::settings::load_settings;
    use crate::services::state::AppState;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tauri::Builder::default()
        .setup(|app| {
            let app_data_dir = app
                .path()
                .app_data_dir()
                .map_err(|e| anyhow!("App data dir: {}", e))?;
            std::fs::create_dir_all(&app_data_dir)?;

            let db_path = app_data_dir.join("solar-clients.sqlite");
            info!("opening database at {}", db_path.display());
            let db = Database::new(db_path)?;
            let settings = load_settings(&db);

            let store: Arc<Mutex<dyn ClientStore>> = Arc::new(Mutex::new(db));
            app.manage(AppState::new(store, settings));
            Ok(())
        })
        .on_window_event(|window, event| {
            if let WindowEvent::CloseRequested { .. } = event {
                let state = window.state::<AppState>();
                state.flush_pending_writes();
            }
        })
        .invoke_handler(tauri::generate_handler![
            commands::clients::list_clients,
            commands::clients::get_client_detail,
            commands::clients::update_client_status,
            commands::clients::delete_client,
            commands::consumer_units::add_consumer_unit,
            commands::consumer_units::delete_consumer_unit,
            commands::consumer_units::update_unit_balance,
            commands::consumer_units::flush_pending_writes,
            commands::consumer_units::parse_unit_history,
            commands::consumer_units::save_unit_history,
            commands::consumer_units::copy_unit_history,
            commands::import::import_spreadsheet,
            commands::import::pick_spreadsheet,
            commands::reports::get_report,
            commands::reports::get_dashboard_stats,
            commands::settings::get_settings,
            commands::settings::save_settings,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
