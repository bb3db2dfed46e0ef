//! Process-wide shared state, threaded through axum's `State<T>` extractor.
//! Built once at startup in `main` and cloned (cheaply, behind `Arc`) into
//! every handler and task.

use std::collections::HashMap;
use std::sync::Arc;

use shared_llm::LlmClient;
use shared_postprocess::PostProcessor;
use shared_protocol::Source;
use tokio::sync::Mutex;

use crate::agent::interfaces::{CandidateContext, CvJdAccessor};
use crate::asr::engine::AsrEngine;
use crate::asr::pipeline::Pipeline;
use crate::asr::session::{History, Session};
use crate::config::Args;
use crate::metrics::Metrics;

pub type SessionKey = (String, Source);

/// One entry per active audio session, shared between the gateway's
/// receiver/consumer tasks and (read-only) the agent WebSocket/SSE routes
/// when they need to locate an existing session's history or context.
pub struct SessionHandle {
    pub session: Mutex<Session>,
    pub history: Arc<History>,
    pub context: Arc<CandidateContext>,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionKey, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub async fn insert(&self, key: SessionKey, handle: Arc<SessionHandle>) {
        self.sessions.lock().await.insert(key, handle);
    }

    pub async fn remove(&self, key: &SessionKey) {
        self.sessions.lock().await.remove(key);
    }

    pub async fn get(&self, key: &SessionKey) -> Option<Arc<SessionHandle>> {
        self.sessions.lock().await.get(key).cloned()
    }

    /// Finds any active source (mic or sys) registered for a bare session id,
    /// used by the agent surfaces which address a session without a source.
    pub async fn get_any_source(&self, sid: &str) -> Option<Arc<SessionHandle>> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(&(sid.to_string(), Source::Mic))
            .or_else(|| sessions.get(&(sid.to_string(), Source::Sys)))
            .cloned()
    }
}

pub struct AppState {
    pub config: Args,
    pub asr_engine: Arc<AsrEngine>,
    pub pipeline: Arc<Pipeline>,
    pub postprocessor: Arc<PostProcessor>,
    pub llm: Arc<LlmClient>,
    pub metrics: Arc<Metrics>,
    pub sessions: Arc<SessionRegistry>,
    pub cv_jd_accessor: Arc<dyn CvJdAccessor>,
}

impl AppState {
    pub fn history_cap(&self) -> usize {
        self.config.history_max
    }
}
