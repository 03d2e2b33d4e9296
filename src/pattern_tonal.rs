//! Tonal operations: scales, degree-to-semitone mapping and transposition

use crate::control::ControlMap;
use crate::pattern::Pattern;
use lazy_static::lazy_static;
use std::collections::HashMap;
use tracing::warn;

lazy_static! {
    static ref SCALES: HashMap<&'static str, Vec<i32>> = {
        let mut m = HashMap::new();
        m.insert("major", vec![0, 2, 4, 5, 7, 9, 11]);
        m.insert("minor", vec![0, 2, 3, 5, 7, 8, 10]);
        m.insert("dorian", vec![0, 2, 3, 5, 7, 9, 10]);
        m.insert("phrygian", vec![0, 1, 3, 5, 7, 8, 10]);
        m.insert("lydian", vec![0, 2, 4, 6, 7, 9, 11]);
        m.insert("mixolydian", vec![0, 2, 4, 5, 7, 9, 10]);
        m.insert("locrian", vec![0, 1, 3, 5, 6, 8, 10]);
        m.insert("chromatic", (0..12).collect());
        m.insert("pentatonic", vec![0, 2, 4, 7, 9]);
        m.insert("minor_pentatonic", vec![0, 3, 5, 7, 10]);
        m.insert("blues", vec![0, 3, 5, 6, 7, 10]);
        m.insert("wholetone", vec![0, 2, 4, 6, 8, 10]);
        m
    };
}

/// Map a scale degree to a semitone offset from the root. Degrees beyond the
/// mode length wrap into the next octave; negative degrees mirror.
pub fn degree_to_semitone(degree: i32, mode: &[i32]) -> i32 {
    if mode.is_empty() {
        return 0;
    }
    if degree < 0 {
        return -degree_to_semitone(-degree, mode);
    }
    let len = mode.len() as i32;
    let octave = degree / len;
    octave * 12 + mode[(degree % len) as usize]
}

/// A parsed `"root:mode"` scale specification.
#[derive(Debug, Clone)]
pub struct Scale {
    /// MIDI note of degree 0.
    pub base: i32,
    pub mode: Vec<i32>,
}

impl Scale {
    /// Parse `"c:major"`, `"f#2:minor"`, etc. Root letters are
    /// case-insensitive, `#`/`s` sharpen, `b`/`f` after the letter flatten.
    /// A bare letter sits in the octave of middle C.
    pub fn parse(spec: &str) -> Option<Scale> {
        let (root, mode_name) = spec.split_once(':')?;
        let mode = SCALES.get(mode_name.trim().to_lowercase().as_str())?.clone();

        let root = root.trim().to_lowercase();
        let mut chars = root.chars();
        let letter = chars.next()?;
        let mut pitch_class: i32 = match letter {
            'c' => 0,
            'd' => 2,
            'e' => 4,
            'f' => 5,
            'g' => 7,
            'a' => 9,
            'b' => 11,
            _ => return None,
        };

        let rest: String = chars.collect();
        let mut rest = rest.as_str();
        if let Some(stripped) = rest.strip_prefix(['#', 's']) {
            pitch_class += 1;
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix(['b', 'f']) {
            pitch_class -= 1;
            rest = stripped;
        }

        let octave: i32 = if rest.is_empty() {
            4
        } else {
            rest.parse().ok()?
        };

        Some(Scale {
            base: (octave + 1) * 12 + pitch_class,
            mode,
        })
    }

    pub fn note(&self, degree: i32) -> i32 {
        self.base + degree_to_semitone(degree, &self.mode)
    }
}

impl Pattern<ControlMap> {
    /// Interpret each event's `n` value as a scale degree and replace it with
    /// an absolute `note`. Events without `n` and unknown scale names pass
    /// through untouched.
    pub fn scale(self, spec: &str) -> Self {
        let scale = match Scale::parse(spec) {
            Some(s) => s,
            None => {
                warn!("unknown scale {:?}, leaving degrees unchanged", spec);
                return self;
            }
        };
        self.with_value(move |map| {
            let degree = match map.num("n") {
                Some(d) => d.round() as i32,
                None => return map.clone(),
            };
            let mut map = map.clone();
            map.remove("n");
            map.insert("note", scale.note(degree) as f64);
            map
        })
    }

    /// Transpose by a semitone pattern. Events without a `note` key pass
    /// through untouched.
    pub fn trans(self, semis: impl Into<Pattern<f64>>) -> Self {
        self.inner_join(semis.into(), |map, semi| {
            let mut map = map.clone();
            if let Some(note) = map.num("note") {
                map.insert("note", note + semi);
            }
            map
        })
    }
}

/// MIDI note number to frequency in Hz (A4 = 440).
pub fn midi_to_freq(note: f64) -> f64 {
    440.0 * 2f64.powf((note - 69.0) / 12.0)
}
