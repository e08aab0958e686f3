pub mod config;
pub mod db;
pub mod debug_log;
pub mod image;
pub mod llm;
pub mod orchestrator;
pub mod repair;
pub mod research;
pub mod wine;

#[cfg(feature = "desktop")]
mod commands;

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use config::AppConfig;
    use db::Database;
    use debug_log::DebugLog;
    use llm::{ProviderAdapter, ProviderRegistry};
    use orchestrator::Orchestrator;
    use std::sync::Arc;
    use tauri::Manager;

    config::init_tracing();
    tracing::info!(version = config::APP_VERSION, "{} starting", config::APP_NAME);

    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .plugin(tauri_plugin_dialog::init())
        .setup(|app| {
            let app_dir = app.path().app_data_dir()?;
            let database = Database::new(&app_dir)?;
            let settings = AppConfig::load(&database)?;
            let debug = Arc::new(DebugLog::new(settings.debug_enabled));
            let adapter = ProviderAdapter::new(ProviderRegistry::standard(), debug);
            app.manage(Orchestrator::new(adapter, settings));
            app.manage(database);
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::chat::send_image,
            commands::chat::send_message,
            commands::chat::get_session,
            commands::settings::get_settings,
            commands::settings::save_settings,
            commands::settings::get_available_models,
            commands::debug::get_debug_log,
            commands::debug::clear_debug_log,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
