use crate::config::AppConfig;
use crate::db::Database;
use crate::llm::{available_models, ModelInfo};
use crate::orchestrator::Orchestrator;
use tauri::State;

#[tauri::command]
pub fn get_settings(orchestrator: State<'_, Orchestrator>) -> AppConfig {
    orchestrator.config().masked()
}

#[tauri::command]
pub fn save_settings(
    db: State<'_, Database>,
    orchestrator: State<'_, Orchestrator>,
    settings: AppConfig,
) -> Result<(), String> {
    let settings = settings.unmask_from(&orchestrator.config());
    settings.save(&db).map_err(|e| e.to_string())?;
    tracing::info!(provider = %settings.selected_provider, "settings saved");
    orchestrator.replace_config(settings);
    Ok(())
}

#[tauri::command]
pub fn get_available_models() -> Vec<ModelInfo> {
    available_models()
}
