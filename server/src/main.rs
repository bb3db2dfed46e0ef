use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use interview_server::agent::interfaces::NoopCvJdAccessor;
use interview_server::asr::engine::AsrEngine;
use interview_server::asr::pipeline::Pipeline;
use interview_server::config::Args;
use interview_server::gateway;
use interview_server::metrics::Metrics;
use interview_server::state::{AppState, SessionRegistry};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    tracing::info!(model_path = %args.model_path, "loading whisper model");
    let asr_engine = Arc::new(
        AsrEngine::load(&args.model_path, false, args.asr_worker_pool_size)
            .with_context(|| format!("loading whisper model from {}", args.model_path))?,
    );

    let postprocessor = Arc::new(shared_postprocess::PostProcessor::new(args.postprocessor_config()));
    let metrics = Arc::new(Metrics::new());
    let pipeline = Arc::new(Pipeline::new(asr_engine.clone(), postprocessor.clone(), args.pipeline_config(), metrics.clone()));
    let llm = Arc::new(shared_llm::LlmClient::new(args.llm_config()).with_observer(metrics.clone()));
    let sessions = Arc::new(SessionRegistry::default());

    let bind_address = args.address.clone();
    let bind_port = args.port;

    let cv_jd_accessor = Arc::new(NoopCvJdAccessor);
    let state = Arc::new(AppState { config: args, asr_engine, pipeline, postprocessor, llm, metrics, sessions, cv_jd_accessor });

    let app = Router::new()
        .route("/ws/audio/:session_id/:source", get(gateway::audio_ws::audio_ws_handler))
        .route("/ws/agent/:sid", get(gateway::agent_ws::agent_ws_handler))
        .route("/api/gpt", post(gateway::sse::gpt_handler))
        .route("/metrics", get(metrics_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{bind_address}:{bind_port}")
        .parse()
        .with_context(|| format!("invalid bind address {bind_address}:{bind_port}"))?;
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app).await.context("server loop exited")?;

    Ok(())
}

async fn metrics_handler(axum::extract::State(state): axum::extract::State<Arc<AppState>>) -> axum::Json<serde_json::Value> {
    axum::Json(state.metrics.snapshot())
}

fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if args.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
