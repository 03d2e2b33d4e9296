//! Oscillators for synth voices
//!
//! Phase-accumulator oscillators with polyBLEP antialiasing on the sawtooth.
//! The supersaw layers detuned saw voices with independently randomised
//! phases. Frequency is supplied per sample through [`Oscillator::step`], so
//! FM works by feeding a modulated frequency in.

use rand::Rng;

/// Waveform selection for synth voices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Sawtooth,
    Square,
    Triangle,
    Supersaw,
    White,
}

impl Waveform {
    /// Recognised synth names, including the short aliases.
    pub fn from_name(name: &str) -> Option<Waveform> {
        match name {
            "sine" | "sin" => Some(Waveform::Sine),
            "sawtooth" | "saw" => Some(Waveform::Sawtooth),
            "square" | "sqr" => Some(Waveform::Square),
            "triangle" | "tri" => Some(Waveform::Triangle),
            "supersaw" => Some(Waveform::Supersaw),
            "white" => Some(Waveform::White),
            _ => None,
        }
    }
}

/// PolyBLEP correction applied around the sawtooth's wrap discontinuity.
fn poly_blep(phase: f32, dt: f32) -> f32 {
    if phase < dt {
        let t = phase / dt;
        2.0 * t - t * t - 1.0
    } else if phase > 1.0 - dt {
        let t = (phase - 1.0) / dt;
        t * t + 2.0 * t + 1.0
    } else {
        0.0
    }
}

/// Default number of layered voices in a supersaw.
pub const SUPERSAW_VOICES: usize = 5;

/// Default supersaw detune spread in semitones.
pub const SUPERSAW_SPREAD: f32 = 0.5;

pub struct Oscillator {
    wave: Waveform,
    sample_rate: f32,
    phase: f32,
    /// Per-voice phases and semitone offsets for the supersaw layers.
    layer_phases: Vec<f32>,
    layer_offsets: Vec<f32>,
}

impl Oscillator {
    pub fn new(wave: Waveform, sample_rate: f32) -> Self {
        let mut osc = Self {
            wave,
            sample_rate,
            phase: 0.0,
            layer_phases: Vec::new(),
            layer_offsets: Vec::new(),
        };
        if wave == Waveform::Supersaw {
            osc.configure_supersaw(SUPERSAW_VOICES, SUPERSAW_SPREAD);
        }
        osc
    }

    /// Set the supersaw layer count and detune spread (semitones, spread
    /// evenly over `[-d/2, +d/2]`).
    pub fn configure_supersaw(&mut self, voices: usize, spread: f32) {
        let voices = voices.max(1);
        let mut rng = rand::thread_rng();
        self.layer_phases = (0..voices).map(|_| rng.gen::<f32>()).collect();
        self.layer_offsets = (0..voices)
            .map(|i| {
                if voices == 1 {
                    0.0
                } else {
                    -spread / 2.0 + spread * i as f32 / (voices - 1) as f32
                }
            })
            .collect();
    }

    /// Reset to the start of the waveform; supersaw layers re-randomise.
    pub fn reset(&mut self) {
        self.phase = 0.0;
        if self.wave == Waveform::Supersaw {
            let mut rng = rand::thread_rng();
            for p in &mut self.layer_phases {
                *p = rng.gen::<f32>();
            }
        }
    }

    pub fn wave(&self) -> Waveform {
        self.wave
    }

    /// Produce one sample at the given frequency and advance the phase.
    pub fn step(&mut self, freq: f32) -> f32 {
        let dt = (freq / self.sample_rate).max(0.0);
        let value = match self.wave {
            Waveform::Sine => (self.phase * std::f32::consts::TAU).sin(),
            Waveform::Sawtooth => {
                let mut v = 2.0 * self.phase - 1.0;
                v -= poly_blep(self.phase, dt);
                v
            }
            Waveform::Square => {
                if self.phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Triangle => {
                // Piecewise linear, peaking at 0.25 and 0.75.
                let p = self.phase;
                if p < 0.25 {
                    4.0 * p
                } else if p < 0.75 {
                    2.0 - 4.0 * p
                } else {
                    4.0 * p - 4.0
                }
            }
            Waveform::Supersaw => {
                let mut sum = 0.0;
                for i in 0..self.layer_phases.len() {
                    let layer_freq = freq * 2f32.powf(self.layer_offsets[i] / 12.0);
                    let layer_dt = (layer_freq / self.sample_rate).max(0.0);
                    let phase = self.layer_phases[i];
                    let mut v = 2.0 * phase - 1.0;
                    v -= poly_blep(phase, layer_dt);
                    sum += v;
                    let mut next = phase + layer_dt;
                    while next >= 1.0 {
                        next -= 1.0;
                    }
                    self.layer_phases[i] = next;
                }
                sum / (self.layer_phases.len() as f32).sqrt()
            }
            Waveform::White => rand::thread_rng().gen::<f32>() * 2.0 - 1.0,
        };

        self.phase += dt;
        while self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 44100.0;

    fn run(osc: &mut Oscillator, freq: f32, n: usize) -> Vec<f32> {
        (0..n).map(|_| osc.step(freq)).collect()
    }

    #[test]
    fn test_sine_starts_at_zero_and_oscillates() {
        let mut osc = Oscillator::new(Waveform::Sine, SR);
        let out = run(&mut osc, 441.0, 200);
        assert!(out[0].abs() < 1e-6);
        let max = out.iter().cloned().fold(f32::MIN, f32::max);
        assert!(max > 0.9, "sine should approach +1, got {}", max);
    }

    #[test]
    fn test_saw_in_range_with_polyblep() {
        let mut osc = Oscillator::new(Waveform::Sawtooth, SR);
        for v in run(&mut osc, 2000.0, 4410) {
            assert!(v.abs() <= 1.5, "saw sample out of range: {}", v);
        }
    }

    #[test]
    fn test_saw_dc_offset_near_zero() {
        let mut osc = Oscillator::new(Waveform::Sawtooth, SR);
        let out = run(&mut osc, 441.0, 44100);
        let avg: f32 = out.iter().sum::<f32>() / out.len() as f32;
        assert!(avg.abs() < 0.05, "saw DC offset too high: {}", avg);
    }

    #[test]
    fn test_square_duty_cycle() {
        let mut osc = Oscillator::new(Waveform::Square, SR);
        let out = run(&mut osc, 441.0, 44100);
        let high = out.iter().filter(|&&v| v > 0.0).count();
        let ratio = high as f32 / out.len() as f32;
        assert!((ratio - 0.5).abs() < 0.02, "duty cycle {} should be ~0.5", ratio);
    }

    #[test]
    fn test_triangle_peaks() {
        let mut osc = Oscillator::new(Waveform::Triangle, SR);
        // 441 Hz at 44100 Hz -> 100 samples per period; peaks at 25 and 75.
        let out = run(&mut osc, 441.0, 100);
        assert!((out[25] - 1.0).abs() < 0.1, "peak near phase 0.25, got {}", out[25]);
        assert!((out[75] + 1.0).abs() < 0.1, "trough near phase 0.75, got {}", out[75]);
    }

    #[test]
    fn test_supersaw_scaled_by_voice_count() {
        let mut osc = Oscillator::new(Waveform::Supersaw, SR);
        let out = run(&mut osc, 110.0, 44100);
        let peak = out.iter().map(|v| v.abs()).fold(0.0f32, f32::max);
        assert!(peak > 0.3, "supersaw should produce signal, peak {}", peak);
        assert!(peak <= 5.0f32.sqrt() + 0.5, "peak {} beyond 1/sqrt(V) scaling", peak);
    }

    #[test]
    fn test_white_noise_bounds() {
        let mut osc = Oscillator::new(Waveform::White, SR);
        for v in run(&mut osc, 0.0, 10_000) {
            assert!((-1.0..1.0).contains(&v), "noise sample out of range: {}", v);
        }
    }

    #[test]
    fn test_waveform_aliases() {
        assert_eq!(Waveform::from_name("saw"), Some(Waveform::Sawtooth));
        assert_eq!(Waveform::from_name("sqr"), Some(Waveform::Square));
        assert_eq!(Waveform::from_name("tri"), Some(Waveform::Triangle));
        assert_eq!(Waveform::from_name("sin"), Some(Waveform::Sine));
        assert_eq!(Waveform::from_name("kick909"), None);
    }
}
