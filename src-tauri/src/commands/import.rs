use std::path::PathBuf;

use crate::models::ImportSummary;
use crate::services::import::import_file;
use crate::services::state::AppState;
use tauri::{AppHandle, Emitter, State};

#[tauri::command]
pub async fn import_spreadsheet(path: String, state: State<'_, AppState>, app: AppHandle) -> Result<ImportSummary, String> {
    let summary = {
        let store = state.store().map_err(|e| e.to_string())?;
        import_file(&*store, &PathBuf::from(&path)).map_err(|e| e.to_string())?
    };

    if summary.imported + summary.updated > 0 {
        let _ = app.emit("clients-changed", path);
    }
    Ok(summary)
}

#[tauri::command]
pub async fn pick_spreadsheet() -> Result<Option<String>, String> {
    let selection = rfd::FileDialog::new()
        .add_filter("Planilha CSV", &["csv"])
        .pick_file()
        .map(|path| path.to_string_lossy().to_string());
    Ok(selection)
}
