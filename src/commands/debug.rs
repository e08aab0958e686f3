use crate::debug_log::render;
use crate::orchestrator::Orchestrator;
use tauri::State;

/// Entries newest first, rendered in the configured display mode.
#[tauri::command]
pub fn get_debug_log(orchestrator: State<'_, Orchestrator>) -> Vec<String> {
    let pretty = orchestrator.config().debug_pretty_mode;
    orchestrator
        .debug_log()
        .entries()
        .iter()
        .map(|entry| render(entry, pretty))
        .collect()
}

#[tauri::command]
pub fn clear_debug_log(orchestrator: State<'_, Orchestrator>) {
    orchestrator.debug_log().clear();
}
