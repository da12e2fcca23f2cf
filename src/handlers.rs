use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::sse::{Event, KeepAlive};
use axum::response::{IntoResponse, Sse};
use axum::Json;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::*;
use crate::events::RelayFrame;
use crate::generator::GenerationRequest;
use crate::models::*;
use crate::relay::spawn_relay;
use crate::storage::{AppState, TempFileStore};
use crate::validate::{resolve_files, validate_params};

pub async fn health_check() -> Json<HealthStatus> {
    Json(HealthStatus::healthy())
}

// ============================================================================
// SSE GENERATION HANDLER
// ============================================================================

/// Handler for question generation
///
/// GET /api/generate?questionHeader=..&questionDescription=..&apiKey=..&modelName=..&uploadedFiles=a.pdf,b.txt
///
/// Returns: Server-Sent Events stream of `{"type","content","isMarkdown"?}`
/// messages ending with `event: complete`.
pub async fn generate_questions_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<GenerateParams>,
) -> Result<impl IntoResponse> {
    let params = validate_params(params, &state.default_model)?;
    let files = resolve_files(&state.store, &params.declared_files).await?;
    let staged: Vec<String> = files.iter().map(|f| f.filename.clone()).collect();

    let request = GenerationRequest::from_params(params, files);
    log::info!(
        "🧠 Generating \"{}\" with {} ({} files)",
        request.header,
        request.model_name,
        staged.len()
    );

    let result = state.generator.generate(request).await;
    cleanup(&state.store, &staged).await;

    let output = result.map_err(|e| AppError::upstream(e.to_string()))?;
    let stream = output.stream.ok_or_else(AppError::no_stream)?;

    Ok(sse_response(spawn_relay(stream)))
}

async fn cleanup(store: &TempFileStore, filenames: &[String]) {
    for filename in filenames {
        store.remove(filename).await;
    }
}

fn sse_response(rx: mpsc::Receiver<RelayFrame>) -> impl IntoResponse {
    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Sse::new(frame_stream(rx)).keep_alive(
            KeepAlive::new()
                .interval(std::time::Duration::from_secs(15))
                .text("keep-alive"),
        ),
    )
}

fn frame_stream(
    rx: mpsc::Receiver<RelayFrame>,
) -> impl Stream<Item = std::result::Result<Event, Infallible>> {
    ReceiverStream::new(rx).map(|frame| Ok(to_sse_event(frame)))
}

fn to_sse_event(frame: RelayFrame) -> Event {
    match frame {
        RelayFrame::Message(message) => match serde_json::to_string(&message) {
            Ok(json_data) => Event::default().data(json_data),
            Err(e) => Event::default().data(
                serde_json::json!({
                    "type": "error",
                    "content": format!("Serialization error: {}", e),
                })
                .to_string(),
            ),
        },
        RelayFrame::Complete => Event::default().event("complete").data("done"),
    }
}
