//! Resonant low-pass filter used by synth voices
//!
//! A biquad lowpass (Audio EQ Cookbook coefficients) with two guards that
//! matter for pattern-driven sweeps: the cutoff chases its target through a
//! one-pole smoother to avoid zipper noise, and the output is soft-clipped so
//! self-oscillation at high resonance stays contained.

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};

/// Smoothing coefficient for per-sample cutoff changes.
const CUTOFF_SMOOTH: f32 = 0.99;

pub struct LowPassFilter {
    sample_rate: f32,
    filter: DirectForm2Transposed<f32>,
    cutoff: f32,
    target_cutoff: f32,
    q: f32,
    /// Values the current coefficients were computed from.
    applied_cutoff: f32,
    applied_q: f32,
}

impl LowPassFilter {
    pub fn new(cutoff: f32, q: f32, sample_rate: f32) -> Self {
        let cutoff = Self::clamp_cutoff(cutoff, sample_rate);
        let q = Self::clamp_q(q);
        let coeffs = Self::coefficients(cutoff, q, sample_rate);
        Self {
            sample_rate,
            filter: DirectForm2Transposed::<f32>::new(coeffs),
            cutoff,
            target_cutoff: cutoff,
            q,
            applied_cutoff: cutoff,
            applied_q: q,
        }
    }

    fn clamp_cutoff(cutoff: f32, sample_rate: f32) -> f32 {
        cutoff.clamp(20.0, sample_rate * 0.45)
    }

    fn clamp_q(q: f32) -> f32 {
        q.clamp(0.5, 50.0)
    }

    fn coefficients(cutoff: f32, q: f32, sample_rate: f32) -> Coefficients<f32> {
        // Parameters are pre-clamped well inside the valid range.
        Coefficients::<f32>::from_params(Type::LowPass, sample_rate.hz(), cutoff.hz(), q)
            .unwrap_or_else(|_| {
                Coefficients::<f32>::from_params(Type::LowPass, sample_rate.hz(), 1000.0.hz(), 0.707)
                    .unwrap()
            })
    }

    /// Set the cutoff target; the actual cutoff glides there per sample.
    pub fn set_cutoff(&mut self, cutoff: f32) {
        self.target_cutoff = Self::clamp_cutoff(cutoff, self.sample_rate);
    }

    pub fn set_q(&mut self, q: f32) {
        self.q = Self::clamp_q(q);
    }

    pub fn cutoff(&self) -> f32 {
        self.cutoff
    }

    /// Filter one sample.
    pub fn run(&mut self, input: f32) -> f32 {
        // Glide toward the target unless it is close enough to snap.
        if (self.target_cutoff - self.cutoff).abs() <= 1.0 {
            self.cutoff = self.target_cutoff;
        } else {
            self.cutoff = self.cutoff * CUTOFF_SMOOTH + self.target_cutoff * (1.0 - CUTOFF_SMOOTH);
        }

        if self.cutoff != self.applied_cutoff || self.q != self.applied_q {
            self.filter
                .update_coefficients(Self::coefficients(self.cutoff, self.q, self.sample_rate));
            self.applied_cutoff = self.cutoff;
            self.applied_q = self.q;
        }

        let y = self.filter.run(input);
        // Contain resonance blowup within [-2, 2].
        2.0 * (y / 2.0).tanh()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 44100.0;

    fn tone(freq: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (std::f32::consts::TAU * freq * i as f32 / SR).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().skip(200).map(|x| x * x).sum::<f32>() / (samples.len() - 200) as f32).sqrt()
    }

    #[test]
    fn test_lowpass_attenuates_highs() {
        let mut filter = LowPassFilter::new(500.0, 0.707, SR);
        let input = tone(8000.0, 4410);
        let output: Vec<f32> = input.iter().map(|&x| filter.run(x)).collect();
        assert!(
            rms(&output) < rms(&input) * 0.2,
            "8 kHz tone through a 500 Hz lowpass should be attenuated"
        );
    }

    #[test]
    fn test_lowpass_passes_lows() {
        let mut filter = LowPassFilter::new(2000.0, 0.707, SR);
        let input = tone(100.0, 4410);
        let output: Vec<f32> = input.iter().map(|&x| filter.run(x)).collect();
        assert!(
            rms(&output) > rms(&input) * 0.8,
            "100 Hz tone through a 2 kHz lowpass should pass"
        );
    }

    #[test]
    fn test_cutoff_glides_toward_target() {
        let mut filter = LowPassFilter::new(200.0, 0.707, SR);
        filter.set_cutoff(5000.0);
        filter.run(0.0);
        let after_one = filter.cutoff();
        assert!(
            after_one > 200.0 && after_one < 400.0,
            "one smoothing step moves ~1% of the gap, got {}",
            after_one
        );
        for _ in 0..20_000 {
            filter.run(0.0);
        }
        assert!(
            (filter.cutoff() - 5000.0).abs() <= 1.0,
            "cutoff should converge to the target, got {}",
            filter.cutoff()
        );
    }

    #[test]
    fn test_small_steps_snap() {
        let mut filter = LowPassFilter::new(1000.0, 0.707, SR);
        filter.set_cutoff(1000.5);
        filter.run(0.0);
        assert_eq!(filter.cutoff(), 1000.5, "gaps of 1 Hz or less snap directly");
    }

    #[test]
    fn test_output_bounded_at_high_resonance() {
        let mut filter = LowPassFilter::new(1000.0, 50.0, SR);
        for i in 0..44100 {
            let x = if i == 0 { 1.0 } else { 0.0 };
            let y = filter.run(x);
            assert!(y.is_finite());
            assert!(y.abs() <= 2.0, "soft clip keeps output within [-2, 2], got {}", y);
        }
    }

    #[test]
    fn test_parameter_clamps() {
        let filter = LowPassFilter::new(1.0, 0.01, SR);
        assert_eq!(filter.cutoff(), 20.0);
        let filter = LowPassFilter::new(100_000.0, 1000.0, SR);
        assert_eq!(filter.cutoff(), SR * 0.45);
    }
}
