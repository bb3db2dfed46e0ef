//! C6: the audio WebSocket gateway, `/ws/audio/{session_id}/{source}`.
//! A Receiver task (this handler's own task) reads frames off the socket and
//! feeds a drop-oldest queue; a spawned Consumer task drains that queue,
//! drives the pipeline, and writes events back out.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use shared_protocol::{AudioFrameHeader, ClientControl, DialogueEntry, ServerEvent, Source, AUDIO_HEADER_LEN};
use tokio::sync::{mpsc, Mutex, Notify};

use crate::asr::pipeline::PipelineEvent;
use crate::asr::session::Session;
use crate::metrics::CounterExt;
use crate::state::{AppState, SessionHandle};

const POLL_TIMEOUT: Duration = Duration::from_millis(150);
const HIGH_WATERMARK_RATIO: f64 = 0.8;
const LOW_WATERMARK_RATIO: f64 = 0.5;
/// Consecutive watermark-triggered drops after which the consumer backs off.
const DROP_BACKOFF_THRESHOLD: u32 = 3;
const DROP_BACKOFF_SLEEP: Duration = Duration::from_millis(50);

pub async fn audio_ws_handler(
    ws: WebSocketUpgrade,
    Path((session_id, source)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let source = match Source::parse(&source) {
        Some(s) => s,
        None => return ws.on_upgrade(move |socket| reject(socket, "unknown source")),
    };
    if session_id.trim().is_empty() {
        return ws.on_upgrade(move |socket| reject(socket, "empty session id"));
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id, source))
}

async fn reject(mut socket: WebSocket, reason: &str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame { code: 1008, reason: reason.to_string().into() })))
        .await;
}

/// A simple bounded queue with drop-oldest semantics and a short-poll
/// consumer side, standing in for the receiver/consumer hand-off described
/// for the audio gateway. Public so the backpressure invariant in SPEC_FULL.md
/// §8 can be property-tested independently of a live socket.
pub struct AudioQueue {
    inner: Mutex<VecDeque<Vec<i16>>>,
    capacity: usize,
    notify: Notify,
}

impl AudioQueue {
    pub fn new(capacity: usize) -> Self {
        Self { inner: Mutex::new(VecDeque::with_capacity(capacity)), capacity: capacity.max(1), notify: Notify::new() }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pushes a frame, dropping the oldest queued frame if full. The
    /// consumer, not the producer, is responsible for watermark draining
    /// (SPEC_FULL.md §4.2) — see `try_pop` below.
    pub async fn push(&self, frame: Vec<i16>) -> bool {
        let mut q = self.inner.lock().await;
        let mut dropped = false;
        if q.len() >= self.capacity {
            q.pop_front();
            dropped = true;
        }
        q.push_back(frame);
        self.notify.notify_one();
        dropped
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Non-blocking pop, used by the consumer to thin the queue toward the
    /// low watermark without waiting on new frames.
    pub async fn try_pop(&self) -> Option<Vec<i16>> {
        self.inner.lock().await.pop_front()
    }

    pub async fn pop_wait(&self, timeout: Duration) -> Option<Vec<i16>> {
        loop {
            {
                let mut q = self.inner.lock().await;
                if let Some(frame) = q.pop_front() {
                    return Some(frame);
                }
            }
            tokio::select! {
                _ = self.notify.notified() => continue,
                _ = tokio::time::sleep(timeout) => return None,
            }
        }
    }
}

fn decode_pcm_frame(bytes: &[u8]) -> (Option<AudioFrameHeader>, &[u8]) {
    if bytes.len() >= AUDIO_HEADER_LEN {
        if let Some(header) = AudioFrameHeader::parse(bytes) {
            return (Some(header), &bytes[AUDIO_HEADER_LEN..]);
        }
    }
    (None, bytes)
}

fn bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    let usable = bytes.len() - (bytes.len() % 2);
    bytes[..usable].chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])).collect()
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, sid: String, source: Source) {
    state.metrics.ws_connections.inc();
    let (mut sender, mut receiver) = socket.split();

    let info = ServerEvent::Info { seq: 0, text: "connected".to_string() };
    if sender.send(Message::Text(serde_json::to_string(&info).unwrap_or_default())).await.is_err() {
        state.metrics.ws_disconnections.inc();
        return;
    }

    let asr_cache = match state.asr_engine.new_cache() {
        Ok(c) => c,
        Err(err) => {
            tracing::warn!(error = %err, "failed to allocate decoder state");
            let _ = sender
                .send(Message::Text(
                    serde_json::to_string(&ServerEvent::Error { seq: 0, text: "asr unavailable".into() }).unwrap_or_default(),
                ))
                .await;
            state.metrics.ws_disconnections.inc();
            return;
        }
    };

    let session = Session::new(
        sid.clone(),
        source,
        shared_protocol::SAMPLE_RATE,
        asr_cache,
        shared_vad::Vad::new(state.config.vad_config()),
        state.config.enable_denoise,
    );
    let history = crate::asr::session::History::new(state.history_cap());
    let context = crate::agent::interfaces::CandidateContext::with_cv_jd(state.cv_jd_accessor.as_ref(), None, &sid).await;
    let handle = Arc::new(SessionHandle { session: Mutex::new(session), history, context: Arc::new(context) });
    let key = (sid.clone(), source);
    state.sessions.insert(key.clone(), handle.clone()).await;

    let queue = Arc::new(AudioQueue::new(state.config.audio_queue_capacity));
    let stop = Arc::new(AtomicBool::new(false));
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(64);

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let consumer_task = {
        let state = state.clone();
        let handle = handle.clone();
        let queue = queue.clone();
        let stop = stop.clone();
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            let mut consecutive_drops: u32 = 0;
            loop {
                let frame = queue.pop_wait(POLL_TIMEOUT).await;
                match frame {
                    Some(pcm) => {
                        let mut drained = 0u32;
                        if queue.len().await as f64 >= queue.capacity() as f64 * HIGH_WATERMARK_RATIO {
                            let target = (queue.capacity() as f64 * LOW_WATERMARK_RATIO) as usize;
                            while queue.len().await > target {
                                if queue.try_pop().await.is_none() {
                                    break;
                                }
                                drained += 1;
                            }
                        }
                        if drained > 0 {
                            for _ in 0..drained {
                                state.metrics.backpressure_drops.inc();
                            }
                            consecutive_drops += drained;
                        } else {
                            consecutive_drops = 0;
                        }
                        if consecutive_drops >= DROP_BACKOFF_THRESHOLD {
                            tokio::time::sleep(DROP_BACKOFF_SLEEP).await;
                        }

                        let mut session = handle.session.lock().await;
                        state.metrics.audio_chunks_processed.inc();
                        match state.pipeline.process_frame(&mut session, &pcm).await {
                            Ok(events) => {
                                for event in events {
                                    emit_event(&out_tx, &mut session, &handle, &state, event).await;
                                }
                            }
                            Err(err) => tracing::warn!(error = %err, "pipeline frame processing failed"),
                        }
                    }
                    None => {
                        if stop.load(Ordering::Relaxed) {
                            break;
                        }
                    }
                }
            }

            let mut session = handle.session.lock().await;
            if let Ok(Some(event)) = state.pipeline.flush(&mut session).await {
                emit_event(&out_tx, &mut session, &handle, &state, event).await;
            }
        })
    };

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Binary(bytes) => {
                let (_, pcm_bytes) = decode_pcm_frame(&bytes);
                let samples = bytes_to_i16(pcm_bytes);
                if !samples.is_empty() && queue.push(samples).await {
                    state.metrics.backpressure_drops.inc();
                }
            }
            Message::Text(text) => match serde_json::from_str::<ClientControl>(&text) {
                Ok(ClientControl::Stop) => break,
                Ok(ClientControl::StartSystemAudio) => {
                    handle.session.lock().await.system_audio_active = true;
                }
                Ok(ClientControl::StopSystemAudio) => {
                    handle.session.lock().await.system_audio_active = false;
                }
                Err(err) => tracing::debug!(error = %err, "unrecognized control message"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    stop.store(true, Ordering::Relaxed);
    let _ = consumer_task.await;
    drop(out_tx);
    let _ = writer_task.await;

    state.sessions.remove(&key).await;
    state.metrics.ws_disconnections.inc();
}

async fn emit_event(
    out_tx: &mpsc::Sender<Message>,
    session: &mut Session,
    handle: &SessionHandle,
    state: &AppState,
    event: PipelineEvent,
) {
    let seq = session.next_seq();
    let json = match event {
        PipelineEvent::Partial { text } => {
            serde_json::to_string(&ServerEvent::Partial { seq, text, timestamp: Utc::now() })
        }
        PipelineEvent::Final { text, start_time, end_time } => {
            state.metrics.transcripts_emitted.inc();
            handle
                .history
                .push(DialogueEntry {
                    content: text.clone(),
                    speaker: session.source.speaker(),
                    timestamp: Utc::now(),
                    metadata: None,
                })
                .await;
            serde_json::to_string(&ServerEvent::Final {
                seq,
                text,
                speaker: session.source.speaker(),
                start_time,
                end_time,
                timestamp: Utc::now(),
            })
        }
    };
    if let Ok(json) = json {
        let _ = out_tx.send(Message::Text(json)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_pcm_frame_strips_header_when_present() {
        let mut bytes = vec![0u8; AUDIO_HEADER_LEN + 4];
        bytes[12..16].copy_from_slice(&shared_protocol::SAMPLE_RATE.to_le_bytes());
        bytes[AUDIO_HEADER_LEN..].copy_from_slice(&1000i16.to_le_bytes());
        bytes[AUDIO_HEADER_LEN + 2..].copy_from_slice(&(-1000i16).to_le_bytes());
        let (header, pcm_bytes) = decode_pcm_frame(&bytes);
        assert!(header.is_some());
        let samples = bytes_to_i16(pcm_bytes);
        assert_eq!(samples, vec![1000, -1000]);
    }

    #[test]
    fn decode_pcm_frame_treats_short_payload_as_raw_pcm() {
        let bytes = 500i16.to_le_bytes().to_vec();
        let (header, pcm_bytes) = decode_pcm_frame(&bytes);
        assert!(header.is_none());
        assert_eq!(bytes_to_i16(pcm_bytes), vec![500]);
    }

    #[test]
    fn bytes_to_i16_trims_odd_trailing_byte() {
        let mut bytes = 42i16.to_le_bytes().to_vec();
        bytes.push(0xFF);
        assert_eq!(bytes_to_i16(&bytes), vec![42]);
    }

    #[tokio::test]
    async fn audio_queue_drops_oldest_when_full() {
        let queue = AudioQueue::new(2);
        assert!(!queue.push(vec![1]).await);
        assert!(!queue.push(vec![2]).await);
        assert!(queue.push(vec![3]).await);
        assert_eq!(queue.pop_wait(Duration::from_millis(10)).await, Some(vec![2]));
        assert_eq!(queue.pop_wait(Duration::from_millis(10)).await, Some(vec![3]));
    }

    #[tokio::test]
    async fn audio_queue_pop_wait_times_out_when_empty() {
        let queue = AudioQueue::new(4);
        assert_eq!(queue.pop_wait(Duration::from_millis(10)).await, None);
    }

    #[tokio::test]
    async fn audio_queue_try_pop_drains_without_waiting() {
        let queue = AudioQueue::new(4);
        queue.push(vec![1]).await;
        queue.push(vec![2]).await;
        assert_eq!(queue.try_pop().await, Some(vec![1]));
        assert_eq!(queue.try_pop().await, Some(vec![2]));
        assert_eq!(queue.try_pop().await, None);
    }
}
