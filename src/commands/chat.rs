use crate::image::read_image_file;
use crate::orchestrator::{Orchestrator, SendOutcome, SessionSnapshot};
use tauri::{AppHandle, Emitter, State};

const SESSION_EVENT: &str = "session-updated";

fn emit_session(app: &AppHandle, orchestrator: &Orchestrator) {
    if let Err(e) = app.emit(SESSION_EVENT, orchestrator.snapshot()) {
        tracing::warn!(error = %e, "failed to emit session update");
    }
}

#[tauri::command]
pub async fn send_image(
    app: AppHandle,
    orchestrator: State<'_, Orchestrator>,
    path: String,
) -> Result<SendOutcome, String> {
    let image = read_image_file(&path).await.map_err(|e| e.to_string())?;
    let outcome = orchestrator.send_image(image).await;
    emit_session(&app, &orchestrator);
    Ok(outcome)
}

#[tauri::command]
pub async fn send_message(
    app: AppHandle,
    orchestrator: State<'_, Orchestrator>,
    content: String,
) -> Result<SendOutcome, String> {
    let outcome = orchestrator.send_text(&content).await;
    emit_session(&app, &orchestrator);
    Ok(outcome)
}

#[tauri::command]
pub fn get_session(orchestrator: State<'_, Orchestrator>) -> SessionSnapshot {
    orchestrator.snapshot()
}
