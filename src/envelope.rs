//! Envelope generators for voices
//!
//! The amplitude envelope runs linear segments over sample counts; on
//! note-off the release proceeds from whatever level it is currently at. The
//! filter envelope sweeps the cutoff over a range measured in octaves around
//! the base cutoff, interpolating in log-frequency space.

/// Floor for supplied attack/decay/sustain times, in seconds.
pub const ENV_MIN: f64 = 0.001;

/// Floor for a supplied release time, in seconds.
pub const RELEASE_MIN: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
    Finished,
}

/// Resolved ADSR parameters in seconds.
#[derive(Debug, Clone, Copy)]
pub struct AdsrParams {
    pub attack: f64,
    pub decay: f64,
    pub sustain: f64,
    pub release: f64,
}

impl AdsrParams {
    pub fn new(attack: f64, decay: f64, sustain: f64, release: f64) -> Self {
        Self {
            attack,
            decay,
            sustain: sustain.clamp(0.0, 1.0),
            release,
        }
    }

    /// Resolve event controls into parameters. With no field set the default
    /// applies unchanged; once any field is set, supplied values are floored
    /// at [`ENV_MIN`] ([`RELEASE_MIN`] for release) and the sustain default
    /// depends on whether a decay was given.
    pub fn from_controls(
        attack: Option<f64>,
        decay: Option<f64>,
        sustain: Option<f64>,
        release: Option<f64>,
        default: AdsrParams,
    ) -> Self {
        if attack.is_none() && decay.is_none() && sustain.is_none() && release.is_none() {
            return default;
        }
        let sustain_default = if decay.is_some() { 0.0 } else { 1.0 };
        AdsrParams::new(
            attack.unwrap_or(ENV_MIN).max(ENV_MIN),
            decay.unwrap_or(ENV_MIN).max(ENV_MIN),
            sustain.unwrap_or(sustain_default),
            release.unwrap_or(RELEASE_MIN).max(RELEASE_MIN),
        )
    }

    pub fn default_synth() -> Self {
        AdsrParams::new(0.001, 0.05, 0.6, 0.01)
    }

    pub fn default_sample() -> Self {
        AdsrParams::new(0.001, 0.05, 0.6, 0.01)
    }
}

/// Amplitude envelope: linear attack/decay/release segments counted in
/// samples, sustain held until release.
#[derive(Debug, Clone)]
pub struct AmpEnvelope {
    params: AdsrParams,
    sample_rate: f64,
    stage: Stage,
    samples_in_stage: u64,
    level: f64,
    release_from: f64,
}

impl AmpEnvelope {
    pub fn new(params: AdsrParams, sample_rate: f64) -> Self {
        Self {
            params,
            sample_rate,
            stage: Stage::Idle,
            samples_in_stage: 0,
            level: 0.0,
            release_from: 0.0,
        }
    }

    pub fn trigger(&mut self) {
        self.stage = Stage::Attack;
        self.samples_in_stage = 0;
        self.level = 0.0;
    }

    /// Note-off: start the release from the current level.
    pub fn release(&mut self) {
        if matches!(self.stage, Stage::Attack | Stage::Decay | Stage::Sustain) {
            self.release_from = self.level;
            self.stage = Stage::Release;
            self.samples_in_stage = 0;
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.stage, Stage::Idle | Stage::Finished)
    }

    fn stage_samples(&self, seconds: f64) -> u64 {
        (seconds * self.sample_rate).ceil().max(1.0) as u64
    }

    /// Advance one sample and return the envelope level in `[0, 1]`.
    pub fn process(&mut self) -> f64 {
        match self.stage {
            Stage::Idle | Stage::Finished => {
                self.level = 0.0;
            }
            Stage::Attack => {
                let total = self.stage_samples(self.params.attack);
                self.samples_in_stage += 1;
                if self.samples_in_stage >= total {
                    self.level = 1.0;
                    self.stage = Stage::Decay;
                    self.samples_in_stage = 0;
                } else {
                    self.level = self.samples_in_stage as f64 / total as f64;
                }
            }
            Stage::Decay => {
                let total = self.stage_samples(self.params.decay);
                self.samples_in_stage += 1;
                if self.samples_in_stage >= total {
                    self.level = self.params.sustain;
                    self.stage = Stage::Sustain;
                    self.samples_in_stage = 0;
                } else {
                    let t = self.samples_in_stage as f64 / total as f64;
                    self.level = 1.0 + (self.params.sustain - 1.0) * t;
                }
            }
            Stage::Sustain => {
                self.level = self.params.sustain;
            }
            Stage::Release => {
                let total = self.stage_samples(self.params.release);
                self.samples_in_stage += 1;
                if self.samples_in_stage >= total {
                    self.level = 0.0;
                    self.stage = Stage::Finished;
                } else {
                    let t = self.samples_in_stage as f64 / total as f64;
                    self.level = self.release_from * (1.0 - t);
                }
            }
        }
        self.level
    }
}

/// Filter envelope: sweeps the cutoff between `2^(-offset)·base` and
/// `2^(envAbs-offset)·base` where `offset = envAbs · anchor`. A negative
/// depth swaps the sweep direction. Output cutoff is clamped to 20 kHz.
#[derive(Debug, Clone)]
pub struct FilterEnvelope {
    sample_rate: f64,
    attack: f64,
    decay: f64,
    sustain: f64,
    release: f64,
    min_cutoff: f64,
    max_cutoff: f64,
    sustain_cutoff: f64,
    stage: Stage,
    samples_in_stage: u64,
    current: f64,
    release_from: f64,
    /// Zero depth disables the sweep entirely.
    active: bool,
}

impl FilterEnvelope {
    pub const DEFAULT_ATTACK: f64 = 0.005;
    pub const DEFAULT_DECAY: f64 = 0.14;
    pub const DEFAULT_SUSTAIN: f64 = 0.0;
    pub const DEFAULT_RELEASE: f64 = 0.1;

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        base_cutoff: f64,
        env_octaves: f64,
        anchor: f64,
        attack: Option<f64>,
        decay: Option<f64>,
        sustain: Option<f64>,
        release: Option<f64>,
        sample_rate: f64,
    ) -> Self {
        let env_abs = env_octaves.abs();
        let offset = env_abs * anchor;
        let mut min = 2f64.powf(-offset) * base_cutoff;
        let mut max = 2f64.powf(env_abs - offset) * base_cutoff;
        if env_octaves < 0.0 {
            std::mem::swap(&mut min, &mut max);
        }
        let sustain_level = sustain.unwrap_or(Self::DEFAULT_SUSTAIN).clamp(0.0, 1.0);
        Self {
            sample_rate,
            attack: attack.unwrap_or(Self::DEFAULT_ATTACK).max(ENV_MIN),
            decay: decay.unwrap_or(Self::DEFAULT_DECAY).max(ENV_MIN),
            sustain: sustain_level,
            release: release.unwrap_or(Self::DEFAULT_RELEASE).max(ENV_MIN),
            min_cutoff: min,
            max_cutoff: max,
            sustain_cutoff: min + sustain_level * (max - min),
            stage: Stage::Idle,
            samples_in_stage: 0,
            current: min,
            release_from: min,
            active: env_octaves != 0.0,
        }
    }

    pub fn trigger(&mut self) {
        self.stage = Stage::Attack;
        self.samples_in_stage = 0;
        self.current = self.min_cutoff;
    }

    pub fn release(&mut self) {
        if matches!(self.stage, Stage::Attack | Stage::Decay | Stage::Sustain) {
            self.release_from = self.current;
            self.stage = Stage::Release;
            self.samples_in_stage = 0;
        }
    }

    fn stage_samples(&self, seconds: f64) -> u64 {
        (seconds * self.sample_rate).ceil().max(1.0) as u64
    }

    /// Exponential (log-frequency) interpolation between two cutoffs.
    fn sweep(from: f64, to: f64, t: f64) -> f64 {
        let from = from.max(1e-3);
        let to = to.max(1e-3);
        from * (to / from).powf(t)
    }

    /// Advance one sample and return the current cutoff in Hz.
    pub fn process(&mut self) -> f64 {
        if !self.active {
            return self.min_cutoff.clamp(0.0, 20_000.0);
        }
        match self.stage {
            Stage::Idle | Stage::Finished => {
                self.current = self.min_cutoff;
            }
            Stage::Attack => {
                let total = self.stage_samples(self.attack);
                self.samples_in_stage += 1;
                let t = self.samples_in_stage as f64 / total as f64;
                self.current = Self::sweep(self.min_cutoff, self.max_cutoff, t.min(1.0));
                if self.samples_in_stage >= total {
                    self.stage = Stage::Decay;
                    self.samples_in_stage = 0;
                }
            }
            Stage::Decay => {
                let total = self.stage_samples(self.decay);
                self.samples_in_stage += 1;
                let t = self.samples_in_stage as f64 / total as f64;
                self.current = Self::sweep(self.max_cutoff, self.sustain_cutoff, t.min(1.0));
                if self.samples_in_stage >= total {
                    self.stage = Stage::Sustain;
                    self.samples_in_stage = 0;
                }
            }
            Stage::Sustain => {
                self.current = self.sustain_cutoff;
            }
            Stage::Release => {
                let total = self.stage_samples(self.release);
                self.samples_in_stage += 1;
                let t = self.samples_in_stage as f64 / total as f64;
                self.current = Self::sweep(self.release_from, self.min_cutoff, t.min(1.0));
                if self.samples_in_stage >= total {
                    self.stage = Stage::Finished;
                }
            }
        }
        self.current.clamp(0.0, 20_000.0)
    }
}
