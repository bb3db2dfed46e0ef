//! C9 (WebSocket surface): `/ws/agent/{sid}`. Requires an already-active
//! audio session for `sid`; unlike the SSE surface, no ephemeral session is
//! created here.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use shared_protocol::{AgentClientMessage, AgentServerMessage, Speaker};
use tokio::sync::mpsc;

use crate::agent::answer_agent::AnswerAgent;
use crate::metrics::CounterExt;
use crate::state::AppState;

const STREAM_QUEUE_CAPACITY: usize = 50;

pub async fn agent_ws_handler(ws: WebSocketUpgrade, Path(sid): Path<String>, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, sid))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, sid: String) {
    let (mut sender, mut receiver) = socket.split();

    let Some(handle) = state.sessions.get_any_source(&sid).await else {
        let msg = AgentServerMessage::Error { text: format!("no active session for {sid}") };
        let _ = sender.send(Message::Text(serde_json::to_string(&msg).unwrap_or_default())).await;
        let _ = sender.send(Message::Close(None)).await;
        return;
    };

    let agent = AnswerAgent::new(state.llm.clone());

    while let Some(Ok(Message::Text(text))) = receiver.next().await {
        let request: AgentClientMessage = match serde_json::from_str(&text) {
            Ok(r) => r,
            Err(err) => {
                tracing::debug!(error = %err, "unrecognized agent client message");
                continue;
            }
        };
        let AgentClientMessage::Answer { mode, text: question } = request;

        state.metrics.llm_requests.inc();
        let (tx, mut rx) = mpsc::channel::<AgentServerMessage>(STREAM_QUEUE_CAPACITY);
        let context = handle.context.clone();
        let history = handle.history.clone();

        let forward = async {
            while let Some(msg) = rx.recv().await {
                if sender.send(Message::Text(serde_json::to_string(&msg).unwrap_or_default())).await.is_err() {
                    break;
                }
            }
        };

        let produce = async {
            agent
                .answer(&question, mode, &context, &history, |delta| {
                    let _ = tx.try_send(AgentServerMessage::Stream { role: Speaker::Assistant, delta: delta.to_string() });
                })
                .await;
            let _ = tx.send(AgentServerMessage::Final { role: Speaker::Assistant, done: true }).await;
        };

        tokio::join!(forward, produce);
    }
}
