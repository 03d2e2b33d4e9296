//! Voices: stateful sound generators spawned per pattern event
//!
//! A synth voice runs an oscillator through an optional resonant low-pass
//! (with its own envelope) under an amplitude ADSR; a sample voice plays
//! decoded audio with linear interpolation at a precomputed rate. Both
//! produce stereo frames; synth output is mono up-mixed, stereo samples use
//! their own two channels.

use crate::envelope::{AdsrParams, AmpEnvelope, FilterEnvelope};
use crate::filter::LowPassFilter;
use crate::oscillator::{Oscillator, Waveform, SUPERSAW_SPREAD, SUPERSAW_VOICES};
use crate::sample_bank::DecodedSample;
use std::sync::Arc;

/// Fixed headroom factor applied to every synth voice.
const SYNTH_LEVEL: f32 = 0.3;

/// FM settings captured at trigger time.
#[derive(Debug, Clone, Copy)]
pub struct FmParams {
    /// Modulation index (`fmi`); zero disables FM.
    pub index: f32,
    /// Modulator ratio relative to the carrier (`fmh`).
    pub ratio: f32,
    pub wave: Waveform,
}

/// Low-pass settings captured at trigger time.
#[derive(Debug, Clone, Copy)]
pub struct LpfParams {
    pub cutoff: f64,
    pub q: f64,
    /// Envelope depth in octaves (`lpenv`); zero disables the sweep.
    pub env: f64,
    pub anchor: f64,
    pub attack: Option<f64>,
    pub decay: Option<f64>,
    pub sustain: Option<f64>,
    pub release: Option<f64>,
}

/// Everything a synth voice needs, resolved from the event payload.
#[derive(Debug, Clone)]
pub struct SynthParams {
    pub wave: Waveform,
    pub freq: f32,
    pub gain: f32,
    /// Hold time in seconds; release starts when it elapses.
    pub duration: Option<f64>,
    pub adsr: AdsrParams,
    pub fm: Option<FmParams>,
    pub lpf: Option<LpfParams>,
    pub unison: usize,
    pub spread: f32,
}

impl SynthParams {
    pub fn new(wave: Waveform, freq: f32) -> Self {
        Self {
            wave,
            freq,
            gain: 1.0,
            duration: None,
            adsr: AdsrParams::default_synth(),
            fm: None,
            lpf: None,
            unison: SUPERSAW_VOICES,
            spread: SUPERSAW_SPREAD,
        }
    }
}

pub struct SynthVoice {
    osc: Oscillator,
    modulator: Option<(Oscillator, FmParams)>,
    amp_env: AmpEnvelope,
    filter: Option<(LowPassFilter, FilterEnvelope)>,
    freq: f32,
    gain: f32,
    hold_samples: Option<u64>,
    elapsed: u64,
    /// Without a hold duration the amplitude is a plain exponential decay.
    decay_per_sample: f64,
    decay_level: f64,
    released: bool,
}

impl SynthVoice {
    pub fn trigger(params: SynthParams, sample_rate: f32) -> Self {
        let mut osc = Oscillator::new(params.wave, sample_rate);
        if params.wave == Waveform::Supersaw {
            osc.configure_supersaw(params.unison, params.spread);
        }
        osc.reset();

        let modulator = params.fm.filter(|fm| fm.index != 0.0).map(|fm| {
            let mut m = Oscillator::new(fm.wave, sample_rate);
            m.reset();
            (m, fm)
        });

        let mut amp_env = AmpEnvelope::new(params.adsr, sample_rate as f64);
        amp_env.trigger();

        let filter = params.lpf.map(|lpf| {
            let mut env = FilterEnvelope::new(
                lpf.cutoff,
                lpf.env,
                lpf.anchor,
                lpf.attack,
                lpf.decay,
                lpf.sustain,
                lpf.release,
                sample_rate as f64,
            );
            env.trigger();
            (
                LowPassFilter::new(lpf.cutoff as f32, lpf.q as f32, sample_rate),
                env,
            )
        });

        let tau = params.adsr.decay.max(1e-3);
        Self {
            osc,
            modulator,
            amp_env,
            filter,
            freq: params.freq,
            gain: params.gain,
            hold_samples: params
                .duration
                .map(|d| (d * sample_rate as f64).round().max(1.0) as u64),
            elapsed: 0,
            decay_per_sample: (-1.0 / (tau * sample_rate as f64)).exp(),
            decay_level: 1.0,
            released: false,
        }
    }

    /// One stereo frame, identical on both channels.
    pub fn process(&mut self) -> (f32, f32) {
        if !self.playing() {
            return (0.0, 0.0);
        }

        let amp = match self.hold_samples {
            Some(hold) => {
                if !self.released && self.elapsed >= hold {
                    self.amp_env.release();
                    if let Some((_, env)) = &mut self.filter {
                        env.release();
                    }
                    self.released = true;
                }
                self.amp_env.process()
            }
            None => {
                self.decay_level *= self.decay_per_sample;
                self.decay_level
            }
        };
        self.elapsed += 1;

        let carrier_freq = match &mut self.modulator {
            Some((osc, fm)) => {
                let modulation = osc.step(self.freq * fm.ratio);
                (self.freq + modulation * self.freq * fm.ratio * fm.index).max(0.0)
            }
            None => self.freq,
        };

        let raw = self.osc.step(carrier_freq);
        let shaped = match &mut self.filter {
            Some((filter, env)) => {
                filter.set_cutoff(env.process() as f32);
                filter.run(raw)
            }
            None => raw,
        };

        let out = shaped * amp as f32 * self.gain * SYNTH_LEVEL;
        (out, out)
    }

    pub fn playing(&self) -> bool {
        match self.hold_samples {
            Some(_) => !self.amp_env.is_finished(),
            None => self.decay_level > 1e-4,
        }
    }
}

pub struct SampleVoice {
    sample: Arc<DecodedSample>,
    position: f64,
    /// Source frames consumed per output sample.
    rate: f64,
    amp_env: AmpEnvelope,
    gain: f32,
    hold_samples: Option<u64>,
    elapsed: u64,
    released: bool,
}

impl SampleVoice {
    pub fn trigger(
        sample: Arc<DecodedSample>,
        rate: f64,
        gain: f32,
        duration: Option<f64>,
        adsr: AdsrParams,
        sample_rate: f32,
    ) -> Self {
        let mut amp_env = AmpEnvelope::new(adsr, sample_rate as f64);
        amp_env.trigger();
        Self {
            sample,
            position: 0.0,
            rate,
            amp_env,
            gain,
            hold_samples: duration.map(|d| (d * sample_rate as f64).round().max(1.0) as u64),
            elapsed: 0,
            released: false,
        }
    }

    fn read_channel(&self, channel: usize) -> f32 {
        let data = match self.sample.channels.get(channel) {
            Some(d) => d,
            None => return 0.0,
        };
        let idx = self.position as usize;
        if idx >= data.len() {
            return 0.0;
        }
        let frac = (self.position - idx as f64) as f32;
        let a = data[idx];
        let b = data.get(idx + 1).copied().unwrap_or(0.0);
        a * (1.0 - frac) + b * frac
    }

    pub fn process(&mut self) -> (f32, f32) {
        if !self.playing() {
            return (0.0, 0.0);
        }

        if let Some(hold) = self.hold_samples {
            if !self.released && self.elapsed >= hold {
                self.amp_env.release();
                self.released = true;
            }
        }
        let amp = self.amp_env.process() as f32;
        self.elapsed += 1;

        let left = self.read_channel(0);
        // Mono sources play on both channels.
        let right = if self.sample.channels.len() > 1 {
            self.read_channel(1)
        } else {
            left
        };
        self.position += self.rate;

        (left * amp * self.gain, right * amp * self.gain)
    }

    pub fn playing(&self) -> bool {
        (self.position as usize) < self.sample.frames() && !self.amp_env.is_finished()
    }
}

/// A live voice owned by the scheduler.
pub enum Voice {
    Synth(SynthVoice),
    Sample(SampleVoice),
}

impl Voice {
    pub fn process(&mut self) -> (f32, f32) {
        match self {
            Voice::Synth(v) => v.process(),
            Voice::Sample(v) => v.process(),
        }
    }

    pub fn playing(&self) -> bool {
        match self {
            Voice::Synth(v) => v.playing(),
            Voice::Sample(v) => v.playing(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 44100.0;

    #[test]
    fn test_synth_voice_produces_audio_then_ends() {
        let mut params = SynthParams::new(Waveform::Sine, 440.0);
        params.duration = Some(0.05);
        let mut voice = SynthVoice::trigger(params, SR);

        let mut peak = 0.0f32;
        for _ in 0..2205 {
            let (l, r) = voice.process();
            assert_eq!(l, r, "synth output is mono up-mixed");
            peak = peak.max(l.abs());
        }
        assert!(peak > 0.01, "voice should produce audio, peak {}", peak);

        for _ in 0..44100 {
            voice.process();
        }
        assert!(!voice.playing(), "voice ends after hold plus release");
    }

    #[test]
    fn test_synth_voice_gain_scales_output() {
        let run = |gain: f32| {
            let mut params = SynthParams::new(Waveform::Sine, 440.0);
            params.duration = Some(0.1);
            params.gain = gain;
            let mut voice = SynthVoice::trigger(params, SR);
            let mut peak = 0.0f32;
            for _ in 0..2205 {
                peak = peak.max(voice.process().0.abs());
            }
            peak
        };
        let loud = run(1.0);
        let quiet = run(0.25);
        assert!(
            (loud / quiet - 4.0).abs() < 0.2,
            "gain should scale linearly: {} vs {}",
            loud,
            quiet
        );
    }

    #[test]
    fn test_fm_changes_spectrum() {
        let run = |fm: Option<FmParams>| {
            let mut params = SynthParams::new(Waveform::Sine, 220.0);
            params.duration = Some(0.1);
            params.fm = fm;
            let mut voice = SynthVoice::trigger(params, SR);
            (0..4410).map(|_| voice.process().0).collect::<Vec<f32>>()
        };
        let plain = run(None);
        let modulated = run(Some(FmParams {
            index: 5.0,
            ratio: 2.0,
            wave: Waveform::Sine,
        }));
        let diff: f32 = plain
            .iter()
            .zip(&modulated)
            .map(|(a, b)| (a - b).abs())
            .sum();
        assert!(diff > 1.0, "FM should audibly alter the waveform");
    }

    #[test]
    fn test_sample_voice_interpolates_and_finishes() {
        let sample = Arc::new(DecodedSample {
            channels: vec![vec![0.0, 1.0, 0.0, -1.0]],
            sample_rate: 44100,
        });
        let mut voice = SampleVoice::trigger(
            sample,
            0.5,
            1.0,
            None,
            AdsrParams::new(0.0, 10.0, 1.0, 0.01),
            SR,
        );
        let mut frames = Vec::new();
        while voice.playing() {
            frames.push(voice.process());
            assert!(frames.len() < 100, "half-rate playback of 4 frames must finish");
        }
        assert_eq!(frames.len(), 8, "4 source frames at rate 0.5 yield 8 output frames");
        // Mono source duplicated to both channels.
        assert_eq!(frames[3].0, frames[3].1);
    }

    #[test]
    fn test_sample_voice_stereo_channels_differ() {
        let sample = Arc::new(DecodedSample {
            channels: vec![vec![1.0, 1.0, 1.0], vec![-1.0, -1.0, -1.0]],
            sample_rate: 44100,
        });
        let mut voice = SampleVoice::trigger(
            sample,
            1.0,
            1.0,
            None,
            AdsrParams::new(0.0, 10.0, 1.0, 0.01),
            SR,
        );
        voice.process();
        let (l, r) = voice.process();
        assert!(l > 0.0 && r < 0.0, "stereo sources keep both channels");
    }

    #[test]
    fn test_empty_sample_never_plays() {
        let voice = SampleVoice::trigger(
            Arc::new(DecodedSample::default()),
            1.0,
            1.0,
            None,
            AdsrParams::default_sample(),
            SR,
        );
        assert!(!voice.playing(), "an empty descriptor produces no sound");
    }
}
