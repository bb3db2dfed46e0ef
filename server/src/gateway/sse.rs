//! C9 (HTTP surface): `POST /api/gpt`, the SSE equivalent of the agent
//! WebSocket. A missing or empty `session_id` is rejected with `400`; given
//! one, falls back to an ephemeral, unregistered session if no active audio
//! session exists for it — the one stateless exception to the registry.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::stream::Stream;
use shared_protocol::{AnswerMode, GptRequest, SseChunk};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt as _;

use crate::agent::answer_agent::AnswerAgent;
use crate::agent::interfaces::CandidateContext;
use crate::asr::session::History;
use crate::metrics::CounterExt;
use crate::state::AppState;

const STREAM_QUEUE_CAPACITY: usize = 50;

pub async fn gpt_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GptRequest>,
) -> axum::response::Response {
    let Some(sid) = request.session_id.as_deref().filter(|s| !s.trim().is_empty()) else {
        return (StatusCode::BAD_REQUEST, "session_id is required").into_response();
    };

    let mode = if request.brief { AnswerMode::Brief } else { AnswerMode::Full };
    let (history, context) = resolve_session(&state, sid).await;

    state.metrics.llm_requests.inc();
    let agent = AnswerAgent::new(state.llm.clone());
    let (tx, rx) = mpsc::channel::<SseChunk>(STREAM_QUEUE_CAPACITY);

    tokio::spawn(async move {
        agent
            .answer(&request.text, mode, &context, &history, |delta| {
                let _ = tx.try_send(SseChunk { content: delta.to_string(), done: false, error: false });
            })
            .await;
        let _ = tx.send(SseChunk { content: String::new(), done: true, error: false }).await;
    });

    let stream = ReceiverStream::new(rx).map(|chunk| {
        let data = serde_json::to_string(&chunk).unwrap_or_default();
        Ok::<Event, Infallible>(Event::default().data(data))
    });

    let headers = [
        (header::CACHE_CONTROL, "no-cache"),
        (header::CONNECTION, "keep-alive"),
        (header::HeaderName::from_static("x-accel-buffering"), "no"),
    ];
    (headers, sse_response(stream)).into_response()
}

/// Looks up the registered session for `sid`; falls back to an ephemeral,
/// unregistered one (empty history, default context) if none is active —
/// the one stateless exception to the session registry (§4.6).
async fn resolve_session(state: &Arc<AppState>, sid: &str) -> (Arc<History>, Arc<CandidateContext>) {
    if let Some(handle) = state.sessions.get_any_source(sid).await {
        return (handle.history.clone(), handle.context.clone());
    }
    let context = CandidateContext::with_cv_jd(state.cv_jd_accessor.as_ref(), None, sid).await;
    (History::new(state.history_cap()), Arc::new(context))
}

fn sse_response(stream: impl Stream<Item = Result<Event, Infallible>> + Send + 'static) -> impl IntoResponse {
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keep-alive"),
    )
}
