//! C2: a thin interface over the streaming acoustic model. One model
//! instance (`AsrEngine`) is shared across sessions; each session owns its
//! own `AsrCache` and never shares it with another worker invocation.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, WhisperState};

use crate::error::{CoreError, CoreResult};

/// Per-session decoder state. Touched only by that session's consumer task;
/// `recognize` resets it when `reset_cache` is set, matching a fresh-utterance
/// boundary.
pub struct AsrCache {
    state: WhisperState,
}

pub struct AsrEngine {
    ctx: Arc<WhisperContext>,
    sampling_strategy: SamplingStrategy,
    worker_permits: Arc<Semaphore>,
}

impl AsrEngine {
    pub fn load(model_path: &str, use_gpu: bool, worker_pool_size: usize) -> Result<Self> {
        let mut params = WhisperContextParameters::default();
        params.flash_attn(true);
        if use_gpu {
            params.use_gpu(true);
        }
        let ctx = WhisperContext::new_with_params(model_path, params)
            .with_context(|| format!("loading whisper model from {model_path}"))?;
        Ok(Self {
            ctx: Arc::new(ctx),
            sampling_strategy: SamplingStrategy::Greedy { best_of: 1 },
            worker_permits: Arc::new(Semaphore::new(worker_pool_size.max(1))),
        })
    }

    pub fn new_cache(&self) -> CoreResult<AsrCache> {
        let state = self
            .ctx
            .create_state()
            .map_err(|e| CoreError::Asr(format!("creating decoder state: {e}")))?;
        Ok(AsrCache { state })
    }

    /// Bounds how many sessions decode at once via `worker_permits`; the
    /// decode itself still runs on the calling task, the same tradeoff the
    /// underlying model binding forces on any caller (no async inference API
    /// exists to hand off to).
    pub async fn recognize(&self, pcm: &[i16], cache: &mut AsrCache, reset_cache: bool) -> CoreResult<String> {
        let _permit = self
            .worker_permits
            .acquire()
            .await
            .map_err(|_| CoreError::FatalSession("asr worker pool closed".into()))?;

        if reset_cache {
            cache.state = self
                .ctx
                .create_state()
                .map_err(|e| CoreError::Asr(format!("resetting decoder state: {e}")))?;
        }

        let audio_f32 = shared_audio::to_f32(pcm);
        self.recognize_blocking(&audio_f32, cache)
    }

    fn recognize_blocking(&self, audio_f32: &[f32], cache: &mut AsrCache) -> CoreResult<String> {
        let mut params = FullParams::new(self.sampling_strategy.clone());
        params.set_language(None);
        params.set_suppress_nst(true);
        params.set_print_progress(false);
        params.set_print_special(false);
        params.set_print_realtime(false);
        params.set_token_timestamps(false);
        params.set_no_context(true);

        cache
            .state
            .full(params, audio_f32)
            .map_err(|e| CoreError::Asr(format!("running inference: {e}")))?;

        let n_segments = cache.state.full_n_segments();
        let mut text = String::new();
        for i in 0..n_segments {
            if let Some(segment) = cache.state.get_segment(i) {
                if let Ok(segment_text) = segment.to_str() {
                    text.push_str(segment_text);
                }
            }
        }
        Ok(text.trim().to_string())
    }
}
