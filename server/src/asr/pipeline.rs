//! C4: the VAD segmenter and ASR pipeline. Converts a stream of raw PCM
//! frames into partial/final recognition events, one frame at a time.
//! Everything here runs on the session's consumer task; `Session` fields are
//! mutated nowhere else.

use std::time::{Duration, Instant};

use shared_audio::{rms_energy_i16, to_f32, to_i16};
use shared_postprocess::{is_similar, PostProcessor};

use crate::asr::engine::AsrEngine;
use crate::asr::session::Session;
use crate::error::CoreResult;
use crate::metrics::{CounterExt, Metrics};

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub pre_speech_padding: Duration,
    pub end_silence: Duration,
    pub max_segment: Duration,
    pub partial_interval: Duration,
    pub duplicate_window: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pre_speech_padding: Duration::from_millis(150),
            end_silence: Duration::from_millis(1200),
            max_segment: Duration::from_secs(10),
            partial_interval: Duration::from_millis(400),
            duplicate_window: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Partial { text: String },
    Final { text: String, start_time: f64, end_time: f64 },
}

pub struct Pipeline {
    engine: std::sync::Arc<AsrEngine>,
    postprocessor: std::sync::Arc<PostProcessor>,
    config: PipelineConfig,
    metrics: std::sync::Arc<Metrics>,
}

impl Pipeline {
    pub fn new(
        engine: std::sync::Arc<AsrEngine>,
        postprocessor: std::sync::Arc<PostProcessor>,
        config: PipelineConfig,
        metrics: std::sync::Arc<Metrics>,
    ) -> Self {
        Self { engine, postprocessor, config, metrics }
    }

    /// Feeds one raw PCM frame into the session's state machine. May return
    /// zero, one, or (in the force-close + pre-roll-carry case) still just
    /// one event; at most one final is ever produced per call.
    pub async fn process_frame(&self, session: &mut Session, frame: &[i16]) -> CoreResult<Vec<PipelineEvent>> {
        let mut events = Vec::new();
        let now = Instant::now();

        let processed_frame: Vec<i16> = if let Some(denoise) = &mut session.denoise {
            let mut floats = to_f32(frame);
            denoise.process(&mut floats);
            to_i16(&floats)
        } else {
            frame.to_vec()
        };

        let rms = rms_energy_i16(&processed_frame);
        let voiced = session.vad.process_frame(rms);

        if !session.in_speech {
            if voiced {
                session.in_speech = true;
                session.speech_start = Some(now.checked_sub(self.config.pre_speech_padding).unwrap_or(now));
                session.speech_buffer.clear();
                session.speech_buffer.extend(session.pre_roll.iter().copied());
                session.speech_buffer.extend_from_slice(&processed_frame);
                session.segment.clear();
                session.segment.samples.extend_from_slice(&processed_frame);
                session.segment.started_at = Some(now);
                session.last_active = now;
            } else {
                session.pre_roll.extend(processed_frame.iter().copied());
                let max_pre_roll_samples =
                    (self.config.pre_speech_padding.as_secs_f64() * session.sample_rate as f64) as usize;
                while session.pre_roll.len() > max_pre_roll_samples {
                    session.pre_roll.pop_front();
                }
            }
            return Ok(events);
        }

        // ACTIVE
        session.speech_buffer.extend_from_slice(&processed_frame);
        session.segment.samples.extend_from_slice(&processed_frame);
        if voiced {
            session.last_active = now;
        }

        let speech_start = session.speech_start.unwrap_or(now);
        let force_close = now.saturating_duration_since(speech_start) >= self.config.max_segment;
        let silence_close = !voiced && now.saturating_duration_since(session.last_active) >= self.config.end_silence;

        if force_close || silence_close {
            if let Some(event) = self.close_segment(session, now, true).await? {
                events.push(event);
            }
            return Ok(events);
        }

        if let Some(event) = self.maybe_emit_partial(session, now).await {
            events.push(event);
        }

        Ok(events)
    }

    /// Runs one final pass over whatever is buffered, if the session is mid
    /// utterance. Used both by the force/silence-close path and by the
    /// gateway on socket shutdown.
    pub async fn flush(&self, session: &mut Session) -> CoreResult<Option<PipelineEvent>> {
        if !session.in_speech || session.speech_buffer.is_empty() {
            return Ok(None);
        }
        self.close_segment(session, Instant::now(), true).await
    }

    async fn close_segment(
        &self,
        session: &mut Session,
        now: Instant,
        has_trailing_silence: bool,
    ) -> CoreResult<Option<PipelineEvent>> {
        let speech_start = session.speech_start.take().unwrap_or(now);
        let buffer = std::mem::take(&mut session.speech_buffer);
        session.segment.clear();
        session.pre_roll.clear();
        session.in_speech = false;
        session.vad.reset();
        session.partial_text.clear();

        if buffer.is_empty() {
            return Ok(None);
        }

        let duration = Duration::from_secs_f64(buffer.len() as f64 / session.sample_rate.max(1) as f64);
        let timeout = duration.mul_f64(2.0) + Duration::from_secs(1);
        let timeout = timeout.clamp(Duration::from_secs(2), Duration::from_secs(6));

        self.metrics.asr_requests.inc();
        let recognized = match tokio::time::timeout(timeout, self.engine.recognize(&buffer, &mut session.asr_cache, true)).await {
            Ok(Ok(text)) => text,
            Ok(Err(err)) => {
                tracing::debug!(error = %err, "final recognition failed");
                return Ok(None);
            }
            Err(_) => {
                self.metrics.asr_timeouts.inc();
                tracing::debug!("final recognition timed out");
                return Ok(None);
            }
        };

        let text = self.postprocessor.process(&recognized, has_trailing_silence, false);
        if text.is_empty() {
            return Ok(None);
        }

        if self.is_duplicate(session, &text, now) {
            return Ok(None);
        }

        session.last_final_text = text.clone();
        session.last_final_emit = Some(now);

        let start_time = session.elapsed_secs(speech_start);
        let end_time = session.elapsed_secs(now);
        Ok(Some(PipelineEvent::Final { text, start_time, end_time }))
    }

    fn is_duplicate(&self, session: &Session, candidate: &str, now: Instant) -> bool {
        let Some(last_emit) = session.last_final_emit else { return false };
        if now.saturating_duration_since(last_emit) > self.config.duplicate_window {
            return false;
        }
        is_similar(candidate, &session.last_final_text)
    }

    async fn maybe_emit_partial(&self, session: &mut Session, now: Instant) -> Option<PipelineEvent> {
        if let Some(last) = session.last_partial_emit {
            if now.saturating_duration_since(last) < self.config.partial_interval {
                return None;
            }
        }

        let duration_secs = session.segment.samples.len() as f64 / session.sample_rate.max(1) as f64;
        let timeout = Duration::from_secs_f64((1.5 * duration_secs).max(0.5)).min(Duration::from_millis(1500));

        self.metrics.asr_requests.inc();
        let recognized =
            match tokio::time::timeout(timeout, self.engine.recognize(&session.segment.samples, &mut session.asr_cache, false)).await {
                Ok(Ok(text)) => text,
                Ok(Err(err)) => {
                    tracing::debug!(error = %err, "partial recognition failed");
                    return None;
                }
                Err(_) => {
                    self.metrics.asr_timeouts.inc();
                    tracing::debug!("partial recognition timed out");
                    return None;
                }
            };

        let text = self.postprocessor.clean_oral_speech(&recognized);
        if text.is_empty() || text == session.partial_text {
            return None;
        }

        session.partial_text = text.clone();
        session.last_partial_emit = Some(now);
        Some(PipelineEvent::Partial { text })
    }
}
