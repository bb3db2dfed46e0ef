//! The library-boundary error enum (§7). Component functions return
//! `Result<T, CoreError>`; `anyhow` stays in `main.rs` and the integration
//! tests, matching the teacher's own split.

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("transient external error: {0}")]
    TransientExternal(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("recognition timed out after {0:?}")]
    RecognitionTimeout(std::time::Duration),

    #[error("fatal session error: {0}")]
    FatalSession(String),

    #[error("asr engine error: {0}")]
    Asr(String),
}

impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        CoreError::Asr(err.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
