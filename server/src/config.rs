//! Process-wide configuration, read once at startup. Every flag has an
//! environment-variable fallback (`clap`'s `env` feature), generalizing the
//! teacher's own `Args` struct to the larger knob set this server needs.

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "interview-server")]
pub struct Args {
    #[arg(long, env = "BIND_ADDRESS", default_value = "[::]")]
    pub address: String,

    #[arg(long, env = "BIND_PORT", default_value_t = 8001)]
    pub port: u16,

    #[arg(long, env = "WHISPER_MODEL_PATH")]
    pub model_path: String,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// `pretty` or `json`.
    #[arg(long, env = "LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    #[arg(long, env = "AUDIO_QUEUE_CAPACITY", default_value_t = 16)]
    pub audio_queue_capacity: usize,

    #[arg(long, env = "ASR_WORKER_POOL_SIZE", default_value_t = 8)]
    pub asr_worker_pool_size: usize,

    #[arg(long, env = "MIN_SENTENCE_LEN", default_value_t = 6)]
    pub min_sentence_len: usize,

    #[arg(long, env = "ENABLE_ORAL_CLEANING", default_value_t = true)]
    pub enable_oral_cleaning: bool,

    #[arg(long, env = "ENABLE_NUMBER_NORMALIZATION", default_value_t = true)]
    pub enable_number_normalization: bool,

    #[arg(long, env = "ENABLE_PUNCTUATION_CORRECTION", default_value_t = true)]
    pub enable_punctuation_correction: bool,

    #[arg(long, env = "ENABLE_DENOISE", default_value_t = false)]
    pub enable_denoise: bool,

    #[arg(long, env = "HISTORY_MAX", default_value_t = 50)]
    pub history_max: usize,

    #[arg(long, env = "PRE_SPEECH_PADDING_MS", default_value_t = 150)]
    pub pre_speech_padding_ms: u64,

    #[arg(long, env = "END_SILENCE_MS", default_value_t = 1200)]
    pub end_silence_ms: u64,

    #[arg(long, env = "MAX_SEGMENT_SECS", default_value_t = 10)]
    pub max_segment_secs: u64,

    #[arg(long, env = "PARTIAL_INTERVAL_MS", default_value_t = 400)]
    pub partial_interval_ms: u64,

    #[arg(long, env = "DUPLICATE_WINDOW_SECS", default_value_t = 2)]
    pub duplicate_window_secs: u64,

    #[arg(long, env = "NOISE_DECAY", default_value_t = shared_vad::DEFAULT_NOISE_DECAY)]
    pub noise_decay: f32,

    #[arg(long, env = "ENERGY_THRESHOLD_MULTIPLIER", default_value_t = shared_vad::DEFAULT_ENERGY_THRESHOLD_MULTIPLIER)]
    pub energy_threshold_multiplier: f32,

    #[arg(long, env = "MIN_ENERGY_THRESHOLD", default_value_t = shared_vad::DEFAULT_MIN_ENERGY_THRESHOLD)]
    pub min_energy_threshold: f32,

    #[arg(long, env = "LLM_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub llm_base_url: String,

    #[arg(long, env = "LLM_API_KEY", default_value = "")]
    pub llm_api_key: String,

    #[arg(long, env = "LLM_MODEL_BRIEF", default_value = "gpt-4o-mini")]
    pub llm_model_brief: String,

    #[arg(long, env = "LLM_MODEL_FULL", default_value = "gpt-4o")]
    pub llm_model_full: String,

    #[arg(long, env = "LLM_TEMPERATURE", default_value_t = 0.7)]
    pub llm_temperature: f32,

    #[arg(long, env = "LLM_MAX_TOKENS", default_value_t = 2000)]
    pub llm_max_tokens: u32,

    #[arg(long, env = "LLM_MAX_RETRIES", default_value_t = 3)]
    pub llm_max_retries: u32,

    #[arg(long, env = "LLM_MAX_CONCURRENT", default_value_t = 10)]
    pub llm_max_concurrent: usize,

    #[arg(long, env = "AGENT_TIMEOUT_SECS", default_value_t = 30)]
    pub agent_timeout_secs: u64,
}

impl Args {
    pub fn postprocessor_config(&self) -> shared_postprocess::PostProcessorConfig {
        shared_postprocess::PostProcessorConfig {
            enable_oral_cleaning: self.enable_oral_cleaning,
            enable_number_normalization: self.enable_number_normalization,
            enable_repeat_removal: self.enable_oral_cleaning,
            enable_punctuation_correction: self.enable_punctuation_correction,
            min_sentence_len: self.min_sentence_len,
        }
    }

    pub fn llm_config(&self) -> shared_llm::LlmConfig {
        shared_llm::LlmConfig {
            api_key: self.llm_api_key.clone(),
            base_url: self.llm_base_url.clone(),
            model_brief: self.llm_model_brief.clone(),
            model_full: self.llm_model_full.clone(),
            temperature: self.llm_temperature,
            max_tokens: self.llm_max_tokens,
            max_retries: self.llm_max_retries,
            max_concurrent: self.llm_max_concurrent,
        }
    }

    pub fn pipeline_config(&self) -> crate::asr::pipeline::PipelineConfig {
        crate::asr::pipeline::PipelineConfig {
            pre_speech_padding: std::time::Duration::from_millis(self.pre_speech_padding_ms),
            end_silence: std::time::Duration::from_millis(self.end_silence_ms),
            max_segment: std::time::Duration::from_secs(self.max_segment_secs),
            partial_interval: std::time::Duration::from_millis(self.partial_interval_ms),
            duplicate_window: std::time::Duration::from_secs(self.duplicate_window_secs),
        }
    }

    pub fn vad_config(&self) -> shared_vad::VadConfig {
        shared_vad::VadConfig {
            noise_decay: self.noise_decay,
            energy_threshold_multiplier: self.energy_threshold_multiplier,
            min_energy_threshold: self.min_energy_threshold,
        }
    }
}
