//! PCM format conversion, RMS energy estimation, a small denoise chain
//! (high-pass + noise gate), and linear resampling. No FFT-based
//! spectral-subtraction denoiser is implemented here: none of the example
//! repositories this crate is grounded on pull in an FFT/DSP crate, so the
//! denoise chain stays in the time domain (see DESIGN.md).

/// Converts little-endian int16 PCM into normalized `f32` samples in
/// `[-1.0, 1.0]`, the format the ASR engine and RMS estimator both expect.
pub fn to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Converts normalized `f32` samples back to int16 PCM, clamping out-of-range
/// values rather than wrapping.
pub fn to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
        .collect()
}

/// Root-mean-square energy of normalized float samples. Returns 0.0 for an
/// empty slice rather than NaN.
pub fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    ((sum_sq / samples.len() as f64).sqrt()) as f32
}

/// RMS energy computed directly over int16 PCM, normalizing as it goes.
pub fn rms_energy_i16(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let n = s as f64 / 32768.0;
            n * n
        })
        .sum();
    ((sum_sq / samples.len() as f64).sqrt()) as f32
}

/// A single-pole high-pass filter, used to remove rumble below the cutoff
/// (default 80 Hz) before RMS estimation and ASR. Stateful across frames so
/// it can run on a stream of short buffers without audible discontinuities.
#[derive(Debug, Clone)]
pub struct HighPassFilter {
    alpha: f32,
    prev_in: f32,
    prev_out: f32,
}

impl HighPassFilter {
    pub fn new(cutoff_hz: f32, sample_rate: u32) -> Self {
        let dt = 1.0 / sample_rate as f32;
        let rc = 1.0 / (2.0 * std::f32::consts::PI * cutoff_hz);
        let alpha = rc / (rc + dt);
        Self {
            alpha,
            prev_in: 0.0,
            prev_out: 0.0,
        }
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            let out = self.alpha * (self.prev_out + *s - self.prev_in);
            self.prev_in = *s;
            self.prev_out = out;
            *s = out;
        }
    }
}

/// A frame-RMS noise gate with attack/release smoothing of the gain, so
/// speech onsets aren't chopped and the gate doesn't pump audibly.
#[derive(Debug, Clone)]
pub struct NoiseGate {
    threshold_linear: f32,
    attack: f32,
    release: f32,
    gain: f32,
}

impl NoiseGate {
    pub fn new(threshold_db: f32, attack: f32, release: f32) -> Self {
        Self {
            threshold_linear: 10f32.powf(threshold_db / 20.0),
            attack,
            release,
            gain: 1.0,
        }
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            let target = if s.abs() > self.threshold_linear {
                1.0
            } else {
                0.0
            };
            let rate = if target > self.gain {
                self.attack
            } else {
                self.release
            };
            self.gain += (target - self.gain) * rate;
            *s *= self.gain;
        }
    }
}

/// Default cutoff for [`HighPassFilter`], matching the original denoiser.
pub const DEFAULT_HIGHPASS_CUTOFF_HZ: f32 = 80.0;
/// Default gate threshold for [`NoiseGate`].
pub const DEFAULT_GATE_THRESHOLD_DB: f32 = -40.0;

/// Bundles the high-pass filter and noise gate into the optional denoise
/// step the pipeline runs before VAD/recognition. Stateful per session so
/// filtering stays continuous across frame boundaries.
pub struct DenoiseChain {
    highpass: HighPassFilter,
    gate: NoiseGate,
    enable_highpass: bool,
    enable_gate: bool,
}

impl DenoiseChain {
    pub fn new(sample_rate: u32, enable_highpass: bool, enable_gate: bool) -> Self {
        Self {
            highpass: HighPassFilter::new(DEFAULT_HIGHPASS_CUTOFF_HZ, sample_rate),
            gate: NoiseGate::new(DEFAULT_GATE_THRESHOLD_DB, 0.5, 0.05),
            enable_highpass,
            enable_gate,
        }
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        if self.enable_highpass {
            self.highpass.process(samples);
        }
        if self.enable_gate {
            self.gate.process(samples);
        }
    }
}

/// Linear-interpolation resample. Adequate for the narrow use this crate has
/// (matching a client's reported sample rate to the fixed 16 kHz the ASR
/// engine requires); not a replacement for a windowed-sinc resampler.
pub fn resample_linear(samples: &[f32], from_sr: u32, to_sr: u32) -> Vec<f32> {
    if from_sr == to_sr || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = to_sr as f64 / from_sr as f64;
    let out_len = ((samples.len() as f64) * ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_pos = i as f64 / ratio;
        let lo = src_pos.floor() as usize;
        let frac = (src_pos - lo as f64) as f32;
        let lo_val = samples.get(lo).copied().unwrap_or(0.0);
        let hi_val = samples.get(lo + 1).copied().unwrap_or(lo_val);
        out.push(lo_val + (hi_val - lo_val) * frac);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms_energy(&[0.0; 100]), 0.0);
    }

    #[test]
    fn rms_of_constant_amplitude_matches_amplitude() {
        let samples = vec![0.5f32; 1000];
        assert!((rms_energy(&samples) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn i16_f32_round_trip_is_close() {
        let original: Vec<i16> = vec![0, 1000, -1000, 32767, -32768];
        let floats = to_f32(&original);
        let back = to_i16(&floats);
        for (a, b) in original.iter().zip(back.iter()) {
            assert!((*a as i32 - *b as i32).abs() <= 1);
        }
    }

    #[test]
    fn resample_identity_when_rates_match() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_linear(&samples, 16000, 16000), samples);
    }

    #[test]
    fn resample_upsamples_to_expected_length() {
        let samples = vec![0.0; 1600];
        let resampled = resample_linear(&samples, 8000, 16000);
        assert_eq!(resampled.len(), 3200);
    }

    #[test]
    fn noise_gate_attenuates_quiet_signal() {
        let mut gate = NoiseGate::new(-20.0, 0.9, 0.9);
        let mut samples = vec![0.001f32; 50];
        gate.process(&mut samples);
        assert!(samples.iter().all(|s| s.abs() < 0.001));
    }
}
