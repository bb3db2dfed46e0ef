//! Voice-activity detection: a dynamic-threshold, hysteresis-gated decision
//! over per-frame RMS energy. This crate owns only the voicing decision and
//! the noise-floor estimate; segment buffering, pre-roll, and the
//! partial/final state machine live in the server's pipeline, which drives
//! this primitive frame by frame.

pub const DEFAULT_NOISE_DECAY: f32 = 0.997;
pub const DEFAULT_ENERGY_THRESHOLD_MULTIPLIER: f32 = 2.5;
pub const DEFAULT_MIN_ENERGY_THRESHOLD: f32 = 0.008;
pub const INITIAL_NOISE_LEVEL: f32 = 0.0006;

#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    pub noise_decay: f32,
    pub energy_threshold_multiplier: f32,
    pub min_energy_threshold: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            noise_decay: DEFAULT_NOISE_DECAY,
            energy_threshold_multiplier: DEFAULT_ENERGY_THRESHOLD_MULTIPLIER,
            min_energy_threshold: DEFAULT_MIN_ENERGY_THRESHOLD,
        }
    }
}

/// Tracks the noise floor and applies the hysteresis voicing rule described
/// in the pipeline: base threshold `max(min_energy_threshold, noise *
/// multiplier)`, with a 0.7x discount while already in speech so a brief dip
/// mid-word doesn't truncate the segment.
pub struct Vad {
    config: VadConfig,
    noise_level: f32,
    in_speech: bool,
}

impl Default for Vad {
    fn default() -> Self {
        Self::new(VadConfig::default())
    }
}

impl Vad {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            noise_level: INITIAL_NOISE_LEVEL,
            in_speech: false,
        }
    }

    pub fn reset(&mut self) {
        self.noise_level = INITIAL_NOISE_LEVEL;
        self.in_speech = false;
    }

    pub fn threshold(&self) -> f32 {
        self.noise_level * self.config.energy_threshold_multiplier
    }

    fn base_threshold(&self) -> f32 {
        self.threshold().max(self.config.min_energy_threshold)
    }

    /// Feeds one frame's RMS energy, updates the noise floor (only while not
    /// already decided voiced — matching the pipeline's "update first, then
    /// decide" ordering applies to every frame regardless), and returns
    /// whether the frame is voiced under the current hysteresis state.
    pub fn process_frame(&mut self, rms: f32) -> bool {
        self.noise_level =
            self.config.noise_decay * self.noise_level + (1.0 - self.config.noise_decay) * rms;

        let base = self.base_threshold();
        let voiced = if self.in_speech {
            rms > 0.7 * base
        } else {
            rms > base
        };
        self.in_speech = voiced;
        voiced
    }

    pub fn in_speech(&self) -> bool {
        self.in_speech
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_stays_unvoiced() {
        let mut vad = Vad::default();
        for _ in 0..20 {
            assert!(!vad.process_frame(0.0005));
        }
    }

    #[test]
    fn loud_frame_triggers_voiced() {
        let mut vad = Vad::default();
        for _ in 0..10 {
            vad.process_frame(0.0005);
        }
        assert!(vad.process_frame(0.05));
    }

    #[test]
    fn hysteresis_keeps_active_state_through_a_dip() {
        let mut vad = Vad::default();
        for _ in 0..10 {
            vad.process_frame(0.0005);
        }
        assert!(vad.process_frame(0.05));
        let threshold = vad.threshold().max(DEFAULT_MIN_ENERGY_THRESHOLD);
        let dip = threshold * 0.8;
        assert!(vad.process_frame(dip));
    }

    #[test]
    fn reset_restores_initial_noise_floor() {
        let mut vad = Vad::default();
        for _ in 0..50 {
            vad.process_frame(0.2);
        }
        assert!(vad.noise_level > INITIAL_NOISE_LEVEL);
        vad.reset();
        assert_eq!(vad.noise_level, INITIAL_NOISE_LEVEL);
        assert!(!vad.in_speech());
    }
}
