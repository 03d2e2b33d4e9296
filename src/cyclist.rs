//! The cyclist: real-time scheduler and mixer
//!
//! Each audio block advances a rational cycle cursor, queries the active
//! pattern for events whose onset falls in the block, spawns voices, and
//! mixes them through per-orbit delay and ducking into a soft-limited stereo
//! output. The audio thread never raises: a failing pattern query is logged
//! and that block simply spawns no new voices.

use crate::control::ControlMap;
use crate::envelope::AdsrParams;
use crate::orbit::Orbit;
use crate::oscillator::{Waveform, SUPERSAW_SPREAD, SUPERSAW_VOICES};
use crate::pattern::{Fraction, Pattern, State, TimeSpan};
use crate::pattern_tonal::midi_to_freq;
use crate::sample_bank::SampleBank;
use crate::voice::{FmParams, LpfParams, SampleVoice, SynthParams, SynthVoice, Voice};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{error, warn};

/// Above this magnitude the output runs through tanh.
const SOFT_LIMIT_THRESHOLD: f32 = 0.8;

/// Per-sample smoothing for the master normalisation gain.
const GAIN_SMOOTH: f32 = 0.999;

struct ActiveVoice {
    voice: Voice,
    orbit: usize,
    pan: f32,
}

/// Shared handle for installing a new pattern from the control thread.
pub type PatternSlot = Arc<Mutex<Option<Pattern<ControlMap>>>>;

pub struct Cyclist {
    sample_rate: f32,
    cps: f64,
    cursor: Fraction,
    voices: Vec<ActiveVoice>,
    orbits: HashMap<usize, Orbit>,
    pattern: PatternSlot,
    bank: SampleBank,
    smoothed_gain: f32,
}

impl Cyclist {
    pub fn new(sample_rate: f32, cps: f64, samples_path: Option<PathBuf>) -> Self {
        Self {
            sample_rate,
            cps,
            cursor: Fraction::from_int(0),
            voices: Vec::new(),
            orbits: HashMap::new(),
            pattern: Arc::new(Mutex::new(None)),
            bank: SampleBank::new(samples_path),
            smoothed_gain: 1.0,
        }
    }

    /// Atomically install a new active pattern; it takes effect at the next
    /// block boundary.
    pub fn set_pattern(&self, pattern: Option<Pattern<ControlMap>>) {
        *self.pattern.lock().unwrap() = pattern;
    }

    /// Handle for control threads to swap patterns without holding `&self`.
    pub fn pattern_slot(&self) -> PatternSlot {
        self.pattern.clone()
    }

    /// Zero the cursor and drop all live voices.
    pub fn reset(&mut self) {
        self.cursor = Fraction::from_int(0);
        self.voices.clear();
    }

    /// Stop all sound but keep the transport running.
    pub fn hush(&mut self) {
        self.set_pattern(None);
        self.voices.clear();
    }

    pub fn cps(&self) -> f64 {
        self.cps
    }

    pub fn set_cps(&mut self, cps: f64) {
        if cps > 0.0 && cps.is_finite() {
            self.cps = cps;
        }
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Produce one block of `frames` stereo samples.
    pub fn generate(&mut self, frames: usize) -> (Vec<f32>, Vec<f32>) {
        let delta = Fraction::new(frames as i64, self.sample_rate.round() as i64)
            * Fraction::from_float(self.cps);
        let end = self.cursor + delta;
        let span = TimeSpan::new(self.cursor, end);

        let pattern = self.pattern.lock().unwrap().clone();
        if let Some(pattern) = pattern {
            let state = State::new(span);
            let result = catch_unwind(AssertUnwindSafe(|| {
                let mut haps = pattern.query(&state);
                haps.sort_by(|a, b| a.part.begin.cmp(&b.part.begin));
                haps
            }));
            match result {
                Ok(haps) => {
                    for hap in haps.iter().filter(|h| h.has_onset()) {
                        let duration_secs = hap.duration().to_float() / self.cps;
                        self.handle_event(&hap.value, duration_secs);
                    }
                }
                Err(_) => {
                    error!("pattern query panicked; no voices spawned this block");
                }
            }
        }

        let voice_count = self.voices.len();

        // Per-orbit buses.
        for orbit in self.orbits.values_mut() {
            orbit.begin_block(frames);
        }
        let sample_rate = self.sample_rate;
        for av in &mut self.voices {
            let orbit = self
                .orbits
                .entry(av.orbit)
                .or_insert_with(|| Orbit::new(sample_rate));
            if orbit.bus_l.len() != frames {
                orbit.begin_block(frames);
            }
            // Equal-power pan; centre (0.5) is a no-op.
            let (pan_l, pan_r) = if av.pan == 0.5 {
                (1.0, 1.0)
            } else {
                let theta = av.pan.clamp(0.0, 1.0) * std::f32::consts::FRAC_PI_2;
                (theta.cos(), theta.sin())
            };
            for i in 0..frames {
                let (l, r) = av.voice.process();
                orbit.bus_l[i] += l * pan_l;
                orbit.bus_r[i] += r * pan_r;
            }
        }

        // Delay and duck per orbit, then sum into the master.
        let mut master_l = vec![0.0f32; frames];
        let mut master_r = vec![0.0f32; frames];
        for orbit in self.orbits.values_mut() {
            if orbit.bus_l.len() != frames {
                orbit.begin_block(frames);
            }
            for i in 0..frames {
                let (dl, dr) = orbit.delay.process(orbit.bus_l[i], orbit.bus_r[i]);
                let duck = orbit.duck.process();
                master_l[i] += dl * duck;
                master_r[i] += dr * duck;
            }
        }

        // Smoothed 1/sqrt(N) gain against stacking, then the soft limiter.
        let target_gain = if voice_count > 1 {
            1.0 / (voice_count as f32).sqrt()
        } else {
            1.0
        };
        for i in 0..frames {
            self.smoothed_gain =
                self.smoothed_gain * GAIN_SMOOTH + target_gain * (1.0 - GAIN_SMOOTH);
            master_l[i] = soft_limit(master_l[i] * self.smoothed_gain);
            master_r[i] = soft_limit(master_r[i] * self.smoothed_gain);
        }

        self.voices.retain(|av| av.voice.playing());
        self.cursor = end;
        (master_l, master_r)
    }

    /// Resolve one onset event: duck triggers, delay configuration and voice
    /// spawning, all driven by the control map.
    fn handle_event(&mut self, value: &ControlMap, duration_secs: f64) {
        self.apply_duck(value);
        self.apply_delay_config(value);

        let sound = match value.str("s").or_else(|| value.str("sound")) {
            Some(s) => s.to_string(),
            None => return,
        };

        let gain = value
            .num("gain")
            .or_else(|| value.num("velocity").map(|v| v / 127.0))
            .unwrap_or(1.0) as f32;
        let orbit = value.num("orbit").map(|o| o.floor() as usize).unwrap_or(1);
        let pan = value.num("pan").unwrap_or(0.5) as f32;

        let adsr_controls = (
            value.num("attack"),
            value.num("decay"),
            value.num("sustain"),
            value.num("release"),
        );

        let voice = if let Some(wave) = Waveform::from_name(&sound) {
            let note = value
                .num("note")
                .or_else(|| value.num("n"))
                .unwrap_or(60.0);
            let mut params = SynthParams::new(wave, midi_to_freq(note) as f32);
            params.gain = gain;
            params.duration = Some(duration_secs);
            params.adsr = AdsrParams::from_controls(
                adsr_controls.0,
                adsr_controls.1,
                adsr_controls.2,
                adsr_controls.3,
                AdsrParams::default_synth(),
            );
            params.unison = value
                .num("unison")
                .map(|u| u.floor().max(1.0) as usize)
                .unwrap_or(SUPERSAW_VOICES);
            params.spread = value
                .num("spread")
                .or_else(|| value.num("detune"))
                .unwrap_or(SUPERSAW_SPREAD as f64) as f32;
            if let Some(index) = value.num("fmi").filter(|i| *i != 0.0) {
                let wave = value
                    .str("fmwave")
                    .and_then(Waveform::from_name)
                    .unwrap_or(Waveform::Sine);
                params.fm = Some(FmParams {
                    index: index as f32,
                    ratio: value.num("fmh").unwrap_or(1.0) as f32,
                    wave,
                });
            }
            if let Some(cutoff) = value.num("lpf") {
                params.lpf = Some(LpfParams {
                    cutoff,
                    q: value.num("lpq").unwrap_or(1.0),
                    env: value.num("lpenv").unwrap_or(0.0),
                    anchor: 0.0,
                    attack: value.num("lpa"),
                    decay: value.num("lpd"),
                    sustain: value.num("lps"),
                    release: value.num("lpr"),
                });
            }
            Voice::Synth(SynthVoice::trigger(params, self.sample_rate))
        } else {
            let n = value.num("n").map(|n| n.floor().max(0.0) as usize).unwrap_or(0);
            let sample = self.bank.get(&sound, n);
            if sample.is_empty() {
                return;
            }
            let speed = value.num("speed").unwrap_or(1.0);
            if speed == 0.0 {
                return;
            }
            // In cycle-sync mode speed counts cycles, so the whole sample
            // covers 1/speed cycles of wall time.
            let rate = if value.str("unit") == Some("c") {
                sample.frames() as f64 * speed.abs() * self.cps / self.sample_rate as f64
            } else {
                sample.sample_rate as f64 / self.sample_rate as f64 * speed.abs()
            };
            let adsr = AdsrParams::from_controls(
                adsr_controls.0,
                adsr_controls.1,
                adsr_controls.2,
                adsr_controls.3,
                AdsrParams::default_sample(),
            );
            Voice::Sample(SampleVoice::trigger(
                sample,
                rate,
                gain,
                Some(duration_secs),
                adsr,
                self.sample_rate,
            ))
        };

        self.voices.push(ActiveVoice { voice, orbit, pan });
    }

    /// `duckorbit` may be an integer, a float (floored) or a colon-delimited
    /// list; the duck envelope fires on every orbit named.
    fn apply_duck(&mut self, value: &ControlMap) {
        let targets: Vec<usize> = match value.get("duckorbit") {
            Some(v) => match v.as_num() {
                Some(n) => vec![n.floor().max(0.0) as usize],
                None => match v.as_str() {
                    Some(s) => s
                        .split(':')
                        .filter_map(|part| {
                            let part = part.trim();
                            match part.parse::<f64>() {
                                Ok(n) => Some(n.floor().max(0.0) as usize),
                                Err(_) => {
                                    warn!("ignoring duck orbit {:?}", part);
                                    None
                                }
                            }
                        })
                        .collect(),
                    None => vec![],
                },
            },
            None => return,
        };
        if targets.is_empty() {
            return;
        }

        let depth = value.num("duckdepth").unwrap_or(0.8) as f32;
        let onset = value.num("duckonset").unwrap_or(0.01) as f32;
        let attack = value.num("duckattack").unwrap_or(0.2) as f32;
        let sample_rate = self.sample_rate;
        for target in targets {
            let orbit = self
                .orbits
                .entry(target)
                .or_insert_with(|| Orbit::new(sample_rate));
            orbit.duck.trigger(depth, onset, attack);
        }
    }

    fn apply_delay_config(&mut self, value: &ControlMap) {
        let wet = value.num("delay");
        let time = value.num_alias(&["delaytime", "delayt", "dt"]);
        let feedback = value.num_alias(&["delayfeedback", "delayfb", "dfb"]);
        let sync = value.num("delaysync");
        if wet.is_none() && time.is_none() && feedback.is_none() && sync.is_none() {
            return;
        }

        let orbit_id = value.num("orbit").map(|o| o.floor() as usize).unwrap_or(1);
        let sample_rate = self.sample_rate;
        let orbit = self
            .orbits
            .entry(orbit_id)
            .or_insert_with(|| Orbit::new(sample_rate));
        if let Some(wet) = wet {
            orbit.delay.set_wet(wet as f32);
        }
        if let Some(sync) = sync {
            // delaysync counts cycles.
            orbit.delay.set_time((sync / self.cps) as f32);
        } else if let Some(time) = time {
            orbit.delay.set_time(time as f32);
        }
        if let Some(feedback) = feedback {
            orbit.delay.set_feedback(feedback as f32);
        }
    }
}

fn soft_limit(x: f32) -> f32 {
    if x.abs() > SOFT_LIMIT_THRESHOLD {
        x.tanh()
    } else {
        x
    }
}
