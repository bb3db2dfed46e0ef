//! Wire types shared between the audio gateway, the streaming response
//! adapter, and the session/dialogue memory. Every client/server message is
//! an exhaustive tagged enum rather than a loosely-typed JSON object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SAMPLE_RATE: u32 = 16_000;

/// Which of the two fixed audio channels a session carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Mic,
    Sys,
}

impl Source {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mic" => Some(Self::Mic),
            "sys" => Some(Self::Sys),
            _ => None,
        }
    }

    /// The speaker label every final transcript from this source carries.
    pub fn speaker(self) -> Speaker {
        match self {
            Source::Mic => Speaker::Candidate,
            Source::Sys => Speaker::Interviewer,
        }
    }
}

/// Text control messages a client may send on the audio WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientControl {
    StartSystemAudio,
    StopSystemAudio,
    Stop,
}

/// JSON events the audio gateway emits back to the browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Info {
        seq: u64,
        text: String,
    },
    Partial {
        seq: u64,
        text: String,
        timestamp: DateTime<Utc>,
    },
    Final {
        seq: u64,
        text: String,
        speaker: Speaker,
        start_time: f64,
        end_time: f64,
        timestamp: DateTime<Utc>,
    },
    Error {
        seq: u64,
        text: String,
    },
}

/// Little-endian binary header optionally prefixing a binary audio frame.
/// `seq: u32, t0: f64, sr: u32, channels: u8, frame_count: u32, rms: f32`
/// packed into the first 25 of 32 physical bytes; samples always start at
/// byte offset 32 when the header is present.
pub const AUDIO_HEADER_LEN: usize = 32;
pub const AUDIO_HEADER_LOGICAL_LEN: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFrameHeader {
    pub seq: u32,
    pub t0: f64,
    pub sr: u32,
    pub channels: u8,
    pub frame_count: u32,
    pub rms: f32,
}

impl AudioFrameHeader {
    /// Parses the header from the front of `bytes`, if `bytes` is at least
    /// one full physical header (32 bytes) long. Never fails softly further
    /// than that: a short payload is simply not a header.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < AUDIO_HEADER_LEN {
            return None;
        }
        let seq = u32::from_le_bytes(bytes[0..4].try_into().ok()?);
        let t0 = f64::from_le_bytes(bytes[4..12].try_into().ok()?);
        let sr = u32::from_le_bytes(bytes[12..16].try_into().ok()?);
        let channels = bytes[16];
        let frame_count = u32::from_le_bytes(bytes[17..21].try_into().ok()?);
        let rms = f32::from_le_bytes(bytes[21..25].try_into().ok()?);
        Some(Self {
            seq,
            t0,
            sr,
            channels,
            frame_count,
            rms,
        })
    }
}

/// Speaker tag on a dialogue entry. Fixed, closed set — no diarization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Candidate,
    Interviewer,
    Assistant,
}

impl Speaker {
    pub fn as_str(self) -> &'static str {
        match self {
            Speaker::Candidate => "candidate",
            Speaker::Interviewer => "interviewer",
            Speaker::Assistant => "assistant",
        }
    }
}

/// One immutable entry in a session's bounded dialogue log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueEntry {
    pub content: String,
    pub speaker: Speaker,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Inbound message on the second agent WebSocket, `/ws/agent/{sid}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentClientMessage {
    Answer {
        #[serde(default)]
        mode: AnswerMode,
        text: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnswerMode {
    Brief,
    #[default]
    Full,
}

/// Outbound frames on `/ws/agent/{sid}` and the body of each SSE event on
/// `POST /api/gpt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentServerMessage {
    Stream { role: Speaker, delta: String },
    Final { role: Speaker, done: bool },
    Error { text: String },
}

/// Body of `POST /api/gpt`.
#[derive(Debug, Clone, Deserialize)]
pub struct GptRequest {
    pub text: String,
    pub session_id: Option<String>,
    #[serde(default)]
    pub brief: bool,
}

/// One SSE data payload for `/api/gpt`.
#[derive(Debug, Clone, Serialize)]
pub struct SseChunk {
    pub content: String,
    pub done: bool,
    #[serde(skip_serializing_if = "is_false", default)]
    pub error: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_maps_to_fixed_speaker() {
        assert_eq!(Source::Mic.speaker(), Speaker::Candidate);
        assert_eq!(Source::Sys.speaker(), Speaker::Interviewer);
    }

    #[test]
    fn source_parse_rejects_unknown() {
        assert_eq!(Source::parse("mic"), Some(Source::Mic));
        assert_eq!(Source::parse("sys"), Some(Source::Sys));
        assert_eq!(Source::parse("other"), None);
    }

    #[test]
    fn control_message_round_trips() {
        let msg = ClientControl::Stop;
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"stop"}"#);
    }

    #[test]
    fn audio_header_parses_little_endian_fields() {
        let mut bytes = vec![0u8; AUDIO_HEADER_LEN];
        bytes[0..4].copy_from_slice(&7u32.to_le_bytes());
        bytes[4..12].copy_from_slice(&1.5f64.to_le_bytes());
        bytes[12..16].copy_from_slice(&SAMPLE_RATE.to_le_bytes());
        bytes[16] = 1;
        bytes[17..21].copy_from_slice(&320u32.to_le_bytes());
        bytes[21..25].copy_from_slice(&0.02f32.to_le_bytes());
        let header = AudioFrameHeader::parse(&bytes).unwrap();
        assert_eq!(header.seq, 7);
        assert_eq!(header.t0, 1.5);
        assert_eq!(header.sr, SAMPLE_RATE);
        assert_eq!(header.channels, 1);
        assert_eq!(header.frame_count, 320);
    }

    #[test]
    fn audio_header_absent_when_payload_short() {
        let bytes = vec![0u8; AUDIO_HEADER_LEN - 1];
        assert!(AudioFrameHeader::parse(&bytes).is_none());
    }
}
