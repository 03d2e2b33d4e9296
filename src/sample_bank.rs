//! Sample loading and caching
//!
//! Samples live in directories named after the sound, one WAV per file:
//! `<samples>/<name>/<n>.wav`. Lookup also accepts any set of WAV files in
//! the directory, sorted by filename and indexed modulo the count, which is
//! how dirt-samples style banks are laid out. Decoded audio is cached for
//! the engine lifetime, keyed `"name:n"`.

use hound::SampleFormat;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Decoded audio at its native sample rate, at most two channels.
#[derive(Debug, Clone, Default)]
pub struct DecodedSample {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl DecodedSample {
    /// Frames per channel.
    pub fn frames(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }
}

pub struct SampleBank {
    samples: HashMap<String, Arc<DecodedSample>>,
    sample_dirs: Vec<PathBuf>,
    /// Keys already reported missing, so each failure logs once.
    missing: HashSet<String>,
    empty: Arc<DecodedSample>,
}

impl SampleBank {
    /// Build the search path: an explicit directory first, then the usual
    /// fallback locations.
    pub fn new(samples_path: Option<PathBuf>) -> Self {
        let mut sample_dirs = Vec::new();
        if let Some(path) = samples_path {
            sample_dirs.push(path);
        }
        let local = PathBuf::from("samples");
        if local.exists() {
            sample_dirs.push(local);
        }
        if let Some(home) = dirs::home_dir() {
            for candidate in [
                home.join("ostinato").join("samples"),
                home.join("dirt-samples"),
            ] {
                if candidate.exists() {
                    sample_dirs.push(candidate);
                }
            }
        }
        Self {
            samples: HashMap::new(),
            sample_dirs,
            missing: HashSet::new(),
            empty: Arc::new(DecodedSample::default()),
        }
    }

    /// Look up sound `name` number `n`. Returns an empty descriptor when the
    /// sample cannot be found or decoded, logging once per key.
    pub fn get(&mut self, name: &str, n: usize) -> Arc<DecodedSample> {
        let key = format!("{}:{}", name, n);
        if let Some(sample) = self.samples.get(&key) {
            return sample.clone();
        }
        if self.missing.contains(&key) {
            return self.empty.clone();
        }

        match self.find_file(name, n) {
            Some(path) => match decode_wav(&path) {
                Ok(sample) => {
                    debug!(
                        "loaded {} ({} frames @ {} Hz) from {}",
                        key,
                        sample.frames(),
                        sample.sample_rate,
                        path.display()
                    );
                    let sample = Arc::new(sample);
                    self.samples.insert(key, sample.clone());
                    sample
                }
                Err(e) => {
                    warn!("failed to decode {}: {}", path.display(), e);
                    self.missing.insert(key);
                    self.empty.clone()
                }
            },
            None => {
                warn!("sample not found: {}", key);
                self.missing.insert(key);
                self.empty.clone()
            }
        }
    }

    fn find_file(&self, name: &str, n: usize) -> Option<PathBuf> {
        for root in &self.sample_dirs {
            let dir = root.join(name);
            if !dir.is_dir() {
                continue;
            }
            // Exact `<n>.wav` wins; otherwise index the sorted listing.
            let exact = dir.join(format!("{}.wav", n));
            if exact.is_file() {
                return Some(exact);
            }
            let mut wavs: Vec<PathBuf> = std::fs::read_dir(&dir)
                .ok()?
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| {
                    path.extension()
                        .and_then(|e| e.to_str())
                        .map(|e| e.eq_ignore_ascii_case("wav"))
                        .unwrap_or(false)
                })
                .collect();
            if wavs.is_empty() {
                continue;
            }
            wavs.sort();
            return Some(wavs[n % wavs.len()].clone());
        }
        None
    }
}

/// Decode a WAV file to floats in `[-1, 1]`, keeping at most two channels.
fn decode_wav(path: &Path) -> Result<DecodedSample, Box<dyn std::error::Error>> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<_, _>>()?
        }
    };

    let src_channels = spec.channels.max(1) as usize;
    let keep = src_channels.min(2);
    let frames = interleaved.len() / src_channels;
    let mut channels = vec![Vec::with_capacity(frames); keep];
    for frame in interleaved.chunks_exact(src_channels) {
        for (ch, out) in channels.iter_mut().enumerate() {
            out.push(frame[ch]);
        }
    }

    Ok(DecodedSample {
        channels,
        sample_rate: spec.sample_rate,
    })
}
