//! Per-connection state (§3 Data Model). One `Session` exists per
//! `(session_id, source)` pair; it is owned exclusively by that pair's
//! consumer task, except for `history` which the answer agent also appends
//! to and is therefore behind its own mutex.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use shared_audio::DenoiseChain;
use shared_protocol::{DialogueEntry, Source};
use shared_vad::Vad;
use tokio::sync::Mutex;

use crate::asr::engine::AsrCache;

pub struct SessionStats {
    pub frames_received: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub finals_emitted: AtomicU64,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            finals_emitted: AtomicU64::new(0),
        }
    }
}

/// Speech/silence accumulation buffer for one in-progress utterance.
pub struct SegmentBuffer {
    pub samples: Vec<i16>,
    pub started_at: Option<Instant>,
}

impl SegmentBuffer {
    pub fn new() -> Self {
        Self { samples: Vec::new(), started_at: None }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.started_at = None;
    }

    pub fn duration_ms(&self, sample_rate: u32) -> u64 {
        (self.samples.len() as u64 * 1000) / sample_rate.max(1) as u64
    }
}

pub struct Session {
    pub sid: String,
    pub source: Source,
    pub sample_rate: u32,
    pub session_start: Instant,

    pub vad: Vad,
    pub asr_cache: AsrCache,
    pub denoise: Option<DenoiseChain>,

    /// Accumulated samples for the in-progress utterance, pre-roll included.
    /// Finals recognize over this buffer.
    pub speech_buffer: Vec<i16>,
    /// Active-only mirror of `speech_buffer` (no pre-roll splice). Partials
    /// recognize over this one, matching the original pipeline's split
    /// between `_process_segment`'s `speech_buffer + segment_buffer` and
    /// `_emit_partial`'s `segment_buffer`-only recognition.
    pub segment: SegmentBuffer,
    /// Ring of recent raw frames kept so the segmenter can splice in
    /// `PRE_SPEECH_PADDING` worth of audio once speech is confirmed.
    pub pre_roll: VecDeque<i16>,

    pub in_speech: bool,
    pub speech_start: Option<Instant>,
    pub last_active: Instant,
    pub noise_level: f32,

    /// Toggled by the `start_system_audio`/`stop_system_audio` control
    /// messages; otherwise opaque to the gateway (SPEC_FULL.md §9).
    pub system_audio_active: bool,

    pub partial_text: String,
    pub last_partial_emit: Option<Instant>,
    pub last_final_text: String,
    pub last_final_emit: Option<Instant>,

    pub stats: SessionStats,
    pub stop: AtomicBool,
    pub seq: AtomicU64,
}

impl Session {
    pub fn new(
        sid: String,
        source: Source,
        sample_rate: u32,
        asr_cache: AsrCache,
        vad: Vad,
        enable_denoise: bool,
    ) -> Self {
        let now = Instant::now();
        Self {
            sid,
            source,
            sample_rate,
            session_start: now,
            vad,
            asr_cache,
            denoise: if enable_denoise { Some(DenoiseChain::new(sample_rate, true, true)) } else { None },
            speech_buffer: Vec::new(),
            segment: SegmentBuffer::new(),
            pre_roll: VecDeque::new(),
            in_speech: false,
            speech_start: None,
            last_active: now,
            noise_level: 0.0,
            system_audio_active: false,
            partial_text: String::new(),
            last_partial_emit: None,
            last_final_text: String::new(),
            last_final_emit: None,
            stats: SessionStats::default(),
            stop: AtomicBool::new(false),
            seq: AtomicU64::new(0),
        }
    }

    pub fn elapsed_secs(&self, at: Instant) -> f64 {
        at.saturating_duration_since(self.session_start).as_secs_f64()
    }

    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Shared dialogue log for a single interview, appended to by the ASR
/// pipeline (candidate/interviewer turns) and the answer agent (assistant
/// turns). Bounded to `history_max` entries, oldest dropped first.
pub struct History {
    entries: Mutex<VecDeque<DialogueEntry>>,
    max_len: usize,
}

impl History {
    pub fn new(max_len: usize) -> Arc<Self> {
        Arc::new(Self { entries: Mutex::new(VecDeque::new()), max_len })
    }

    pub async fn push(&self, entry: DialogueEntry) {
        let mut entries = self.entries.lock().await;
        entries.push_back(entry);
        while entries.len() > self.max_len {
            entries.pop_front();
        }
    }

    pub async fn snapshot(&self) -> Vec<DialogueEntry> {
        self.entries.lock().await.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shared_protocol::Speaker;

    fn entry(content: &str) -> DialogueEntry {
        DialogueEntry { content: content.to_string(), speaker: Speaker::Candidate, timestamp: Utc::now(), metadata: None }
    }

    #[tokio::test]
    async fn history_evicts_oldest_past_cap() {
        let history = History::new(2);
        history.push(entry("one")).await;
        history.push(entry("two")).await;
        history.push(entry("three")).await;
        let snapshot = history.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].content, "two");
        assert_eq!(snapshot[1].content, "three");
    }

    #[test]
    fn segment_buffer_duration_matches_sample_rate() {
        let mut buf = SegmentBuffer::new();
        buf.samples = vec![0i16; 16_000];
        assert_eq!(buf.duration_ms(16_000), 1000);
    }
}
