//! `/api/files/*`: create, save and build named sources for the pty
//! endpoint. Every outcome is a 200 with a `status` field.

use axum::Json;
use axum::extract::State;
use livecc_core::BuildReport;
use livecc_core::LiveccErr;
use livecc_core::SaveOutcome;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;
use tracing::info;
use tracing::warn;

use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SaveRequest {
    file_name: Option<String>,
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CompileRequest {
    file_name: Option<String>,
}

pub(crate) async fn create(State(state): State<AppState>) -> Json<Value> {
    match state.service.store().create().await {
        Ok(file_name) => Json(json!({ "fileName": file_name })),
        Err(err) => Json(failure(&err)),
    }
}

pub(crate) async fn save(
    State(state): State<AppState>,
    Json(request): Json<SaveRequest>,
) -> Json<Value> {
    let (Some(file_name), Some(code)) = (request.file_name, request.code) else {
        return Json(error_body("Missing fileName or code"));
    };
    let body = match state.service.store().save(&file_name, &code).await {
        Ok(SaveOutcome::Saved) => json!({ "status": "ok" }),
        Ok(SaveOutcome::NotFound) => error_body("File not found"),
        Err(err) => failure(&err),
    };
    Json(body)
}

pub(crate) async fn compile(
    State(state): State<AppState>,
    Json(request): Json<CompileRequest>,
) -> Json<Value> {
    let Some(file_name) = request.file_name else {
        return Json(error_body("Missing fileName"));
    };
    let body = match state.service.store().build(&file_name).await {
        Ok(BuildReport::Built { exe, output }) => {
            info!(%file_name, %exe, "build succeeded");
            json!({ "status": "ok", "exe": exe, "output": output })
        }
        Ok(BuildReport::CompileError { output }) => {
            info!(%file_name, "build failed");
            json!({ "status": "compile_error", "output": output })
        }
        Ok(BuildReport::TimedOut) => error_body("Compilation timed out."),
        Ok(BuildReport::NotFound) => error_body("Source not found"),
        Err(err) => failure(&err),
    };
    Json(body)
}

fn error_body(msg: &str) -> Value {
    json!({ "status": "error", "msg": msg })
}

fn failure(err: &LiveccErr) -> Value {
    match err {
        LiveccErr::InvalidFileName => error_body(&err.to_string()),
        other => {
            warn!(error = %other, "file request failed");
            error_body(&format!("An internal server error occurred: {other}"))
        }
    }
}
