//! Pattern operators: inner-join arithmetic, control application, Euclidean
//! rhythms and the control-pattern builder surface
//!
//! The combining operators here all use an *inner* join: the left pattern
//! drives structure (onsets), the right pattern supplies values, and partial
//! events at cycle boundaries survive through part intersection.

use crate::control::{ControlMap, ControlValue};
use crate::mini_notation::{parse_mini_notation, PatternValue};
use crate::pattern::{Fraction, Hap, Pattern, State, TimeSpan};
use tracing::warn;

impl<T: Clone + Send + Sync + 'static> Pattern<T> {
    /// Inner join: for each left hap, query the right pattern over the left
    /// hap's whole (or part), and combine values wherever the parts overlap.
    pub fn inner_join<U, R>(
        self,
        right: Pattern<U>,
        f: impl Fn(&T, &U) -> R + Send + Sync + 'static,
    ) -> Pattern<R>
    where
        U: Clone + Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
    {
        Pattern::new(move |state| {
            let mut haps = Vec::new();
            for left in self.query(state) {
                let span = left.whole.unwrap_or(left.part);
                let right_state = State {
                    span,
                    controls: state.controls.clone(),
                };
                for r in right.query(&right_state) {
                    if let Some(part) = left.part.intersection(&r.part) {
                        let whole = match (left.whole, r.whole) {
                            (Some(a), Some(b)) => a.intersection(&b),
                            _ => None,
                        };
                        let mut hap = Hap::new(whole, part, f(&left.value, &r.value));
                        hap.context = left.context.clone();
                        haps.push(hap);
                    }
                }
            }
            haps
        })
    }
}

impl Pattern<f64> {
    pub fn add(self, other: impl Into<Pattern<f64>>) -> Self {
        self.inner_join(other.into(), |a, b| a + b)
    }

    pub fn sub(self, other: impl Into<Pattern<f64>>) -> Self {
        self.inner_join(other.into(), |a, b| a - b)
    }

    pub fn mul(self, other: impl Into<Pattern<f64>>) -> Self {
        self.inner_join(other.into(), |a, b| a * b)
    }

    pub fn div(self, other: impl Into<Pattern<f64>>) -> Self {
        self.inner_join(other.into(), |a, b| a / b)
    }

    pub fn pow(self, other: impl Into<Pattern<f64>>) -> Self {
        self.inner_join(other.into(), |a, b| a.powf(*b))
    }
}

impl From<f64> for Pattern<f64> {
    fn from(v: f64) -> Self {
        Pattern::pure(v)
    }
}

// ============= Euclidean rhythms =============

/// Bjorklund's algorithm: distribute `pulses` onsets across `steps` slots as
/// evenly as possible. Builds one-element groups and repeatedly folds the
/// trailing remainder groups onto the leading groups.
pub fn bjorklund(pulses: usize, steps: usize) -> Vec<bool> {
    if steps == 0 || pulses == 0 {
        return vec![false; steps];
    }
    if pulses >= steps {
        return vec![true; steps];
    }

    let mut groups: Vec<Vec<bool>> = vec![vec![true]; pulses];
    let mut remainder: Vec<Vec<bool>> = vec![vec![false]; steps - pulses];

    while remainder.len() > 1 {
        let n = groups.len().min(remainder.len());
        let mut folded = Vec::with_capacity(n);
        for i in 0..n {
            let mut g = groups[i].clone();
            g.extend_from_slice(&remainder[i]);
            folded.push(g);
        }
        if groups.len() > n {
            remainder = groups.split_off(n);
        } else {
            remainder = remainder.split_off(n);
        }
        groups = folded;
    }

    groups
        .into_iter()
        .chain(remainder)
        .flatten()
        .collect()
}

impl Pattern<bool> {
    /// Euclidean rhythm: `pulses` unit-value haps per cycle at positions
    /// `k/steps`, each `1/steps` long, rotated left by `rotation`.
    pub fn euclid(pulses: usize, steps: usize, rotation: i32) -> Self {
        if pulses == 0 || steps == 0 {
            return Pattern::silence();
        }

        let mut slots = bjorklund(pulses, steps);
        let rot = (rotation.rem_euclid(steps as i32)) as usize;
        slots.rotate_left(rot);

        let steps_f = Fraction::from_int(steps as i64);
        Pattern::new(move |state| {
            let mut haps = Vec::new();
            for sub in state.span.cycles() {
                let base = sub.begin.sam();
                for (i, &on) in slots.iter().enumerate() {
                    if !on {
                        continue;
                    }
                    let whole = TimeSpan::new(
                        base + Fraction::from_int(i as i64) / steps_f,
                        base + Fraction::from_int(i as i64 + 1) / steps_f,
                    );
                    if let Some(part) = whole.intersection(&sub) {
                        haps.push(Hap::new(Some(whole), part, true));
                    }
                }
            }
            haps
        })
    }
}

// ============= Control application =============

/// Generates one chainable setter per control name; each one merges
/// `{key: value}` into the event payload through the inner join.
macro_rules! control_setters {
    ($($name:ident => $key:literal),* $(,)?) => {
        $(
            pub fn $name(self, value: impl ControlSource) -> Self {
                self.set_controls(value.control_pattern($key))
            }
        )*
    };
}

impl Pattern<ControlMap> {
    /// Merge control maps from the right pattern into left-hap values using
    /// an inner join. Right-hand keys overwrite.
    pub fn set_controls(self, right: Pattern<ControlMap>) -> Self {
        self.inner_join(right, |l, r| {
            let mut merged = l.clone();
            for (k, v) in r.iter() {
                merged.insert(k, v.clone());
            }
            merged
        })
    }

    /// Set a single control from a value pattern.
    pub fn set_control(self, key: &str, values: Pattern<ControlValue>) -> Self {
        let key = key.to_string();
        self.inner_join(values, move |l, r| {
            let mut map = l.clone();
            map.insert(&key, r.clone());
            map
        })
    }

    /// Map the sample onto one event duration: sets `unit = "c"` and
    /// `speed = 1/duration` so `speed * duration == 1` for every hap.
    pub fn fit(self) -> Self {
        Pattern::new(move |state| {
            self.query(state)
                .into_iter()
                .map(|hap| {
                    let duration = hap.duration().to_float();
                    let mut hap = hap;
                    hap.value.insert("unit", "c");
                    if duration > 0.0 {
                        hap.value.insert("speed", 1.0 / duration);
                    }
                    hap
                })
                .collect()
        })
    }

    control_setters! {
        s => "s",
        sound => "sound",
        n => "n",
        note => "note",
        gain => "gain",
        velocity => "velocity",
        pan => "pan",
        speed => "speed",
        detune => "detune",
        unison => "unison",
        spread => "spread",
        orbit => "orbit",
        attack => "attack",
        decay => "decay",
        sustain => "sustain",
        release => "release",
        lpf => "lpf",
        lpq => "lpq",
        lpenv => "lpenv",
        lpa => "lpa",
        lpd => "lpd",
        lps => "lps",
        lpr => "lpr",
        hpf => "hpf",
        fmi => "fmi",
        fmh => "fmh",
        fmwave => "fmwave",
        delay => "delay",
        delaytime => "delaytime",
        delayfeedback => "delayfeedback",
        delaysync => "delaysync",
        delayspeed => "delayspeed",
        duck => "duckorbit",
        duckorbit => "duckorbit",
        duckdepth => "duckdepth",
        duckonset => "duckonset",
        duckattack => "duckattack"
    }
}

/// Anything that can serve as the right-hand side of a control setter:
/// plain numbers, mini-notation strings, or value patterns.
pub trait ControlSource {
    fn control_pattern(self, key: &str) -> Pattern<ControlMap>;
}

impl ControlSource for f64 {
    fn control_pattern(self, key: &str) -> Pattern<ControlMap> {
        Pattern::pure(ControlMap::single(key, self))
    }
}

impl ControlSource for i64 {
    fn control_pattern(self, key: &str) -> Pattern<ControlMap> {
        Pattern::pure(ControlMap::single(key, self as f64))
    }
}

impl ControlSource for &str {
    fn control_pattern(self, key: &str) -> Pattern<ControlMap> {
        lift(key, self)
    }
}

impl ControlSource for Pattern<f64> {
    fn control_pattern(self, key: &str) -> Pattern<ControlMap> {
        let key = key.to_string();
        self.with_value(move |v| ControlMap::single(&key, *v))
    }
}

impl ControlSource for Pattern<ControlValue> {
    fn control_pattern(self, key: &str) -> Pattern<ControlMap> {
        let key = key.to_string();
        self.with_value(move |v| ControlMap::single(&key, v.clone()))
    }
}

/// Parse a mini-notation string and lift each value into a control map under
/// `key`. `name:n` atoms already carry `{s, n}` and are merged as-is when the
/// key is a sound key. Parse failures are logged and yield silence; use
/// [`parse_mini_notation`] directly to surface the error.
pub fn lift(key: &str, input: &str) -> Pattern<ControlMap> {
    let parsed = match parse_mini_notation(input) {
        Ok(p) => p,
        Err(e) => {
            warn!("mini-notation error in control {:?}: {}", key, e);
            return Pattern::silence();
        }
    };
    let sound_key = key == "s" || key == "sound";
    let key = key.to_string();
    parsed.with_value(move |v| match v {
        PatternValue::Num(x) => ControlMap::single(&key, *x),
        PatternValue::Str(s) => ControlMap::single(&key, s.as_str()),
        PatternValue::Ctrl(map) => {
            if sound_key {
                map.clone()
            } else {
                // A name:n atom in a non-sound position keeps its number.
                ControlMap::single(&key, map.num("n").unwrap_or(0.0))
            }
        }
    })
}

/// Parse mini-notation as a playable sound pattern, surfacing parse errors
/// to the caller. This is what hosts use at evaluation time, where a bad
/// script should be reported rather than silently muted.
pub fn parse_sound_pattern(
    input: &str,
) -> Result<Pattern<ControlMap>, crate::mini_notation::ParseError> {
    let parsed = parse_mini_notation(input)?;
    Ok(parsed.with_value(|v| match v {
        PatternValue::Str(name) => ControlMap::single("s", name.as_str()),
        PatternValue::Num(x) => ControlMap::single("n", *x),
        PatternValue::Ctrl(map) => map.clone(),
    }))
}

/// Entry point: `s("bd hh sd hh")` — a sound pattern.
pub fn s(input: &str) -> Pattern<ControlMap> {
    lift("s", input)
}

/// Entry point: `sound(...)`, alias of [`s`].
pub fn sound(input: &str) -> Pattern<ControlMap> {
    lift("s", input)
}

/// Entry point: `n("0 2 4")` — a numeric degree/index pattern.
pub fn n(input: &str) -> Pattern<ControlMap> {
    lift("n", input)
}

/// Entry point: `note("60 64 67")` — a MIDI note pattern.
pub fn note(input: &str) -> Pattern<ControlMap> {
    lift("note", input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::State;

    #[test]
    fn test_inner_join_add() {
        // pure(3) + fastcat(1, 2) keeps the left structure but splits on the
        // right pattern's value boundaries.
        let p = Pattern::pure(3.0).add(Pattern::fastcat(vec![
            Pattern::pure(1.0),
            Pattern::pure(2.0),
        ]));
        let haps = p.query_cycle(0);
        assert_eq!(haps.len(), 2);
        assert_eq!(haps[0].value, 4.0);
        assert_eq!(haps[1].value, 5.0);
    }

    #[test]
    fn test_scalar_rhs_lifted() {
        let p = Pattern::pure(1.0).add(10.0);
        assert_eq!(p.query_cycle(0)[0].value, 11.0);
    }

    #[test]
    fn test_bjorklund_tresillo() {
        let slots = bjorklund(3, 8);
        assert_eq!(
            slots,
            vec![true, false, false, true, false, false, true, false]
        );
    }

    #[test]
    fn test_bjorklund_cinquillo() {
        let slots = bjorklund(5, 8);
        assert_eq!(
            slots,
            vec![true, false, true, true, false, true, true, false]
        );
    }

    #[test]
    fn test_euclid_onset_count() {
        for steps in 1..=16usize {
            for pulses in 1..=steps {
                let p = Pattern::<bool>::euclid(pulses, steps, 0);
                let onsets = p.query_cycle(0).len();
                assert_eq!(
                    onsets, pulses,
                    "euclid({},{}) should have {} onsets",
                    pulses, steps, pulses
                );
            }
        }
    }

    #[test]
    fn test_euclid_rotation() {
        let p = Pattern::<bool>::euclid(3, 8, 3);
        let haps = p.query_cycle(0);
        // Rotating x..x..x. left by 3 starts the pattern on the second pulse.
        assert_eq!(haps[0].whole.unwrap().begin, Fraction::new(0, 1));
    }

    #[test]
    fn test_fit_speed_times_duration_is_one() {
        let p = s("bd sn hh cp").fit();
        for hap in p.query_cycle(0) {
            let speed = hap.value.num("speed").unwrap();
            assert_eq!(hap.value.str("unit"), Some("c"));
            let d = hap.duration().to_float();
            assert!((speed * d - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_chained_setters_split_and_merge() {
        let p = s("bd").gain(0.5).pan("0.25 0.75");
        let haps = p.query_cycle(0);
        assert_eq!(haps.len(), 2, "pan pattern splits the event");
        assert_eq!(haps[0].value.str("s"), Some("bd"));
        assert_eq!(haps[0].value.num("gain"), Some(0.5));
        assert_eq!(haps[0].value.num("pan"), Some(0.25));
        assert_eq!(haps[1].value.num("pan"), Some(0.75));
    }

    #[test]
    fn test_set_control_adds_key_from_value_pattern() {
        let p = s("bd").set_control("gain", Pattern::pure(ControlValue::Num(0.5)));
        let haps = p.query_cycle(0);
        assert_eq!(haps.len(), 1);
        assert_eq!(haps[0].value.str("s"), Some("bd"), "existing keys survive");
        assert_eq!(haps[0].value.num("gain"), Some(0.5));

        // The value pattern drives splitting exactly like any inner join,
        // and an existing key is overwritten in place.
        let p = s("bd").gain(1.0).set_control(
            "gain",
            Pattern::fastcat(vec![
                Pattern::pure(ControlValue::Num(0.25)),
                Pattern::pure(ControlValue::Str("0.75".to_string())),
            ]),
        );
        let haps = p.query_cycle(0);
        assert_eq!(haps.len(), 2);
        assert_eq!(haps[0].value.num("gain"), Some(0.25));
        assert_eq!(haps[1].value.num("gain"), Some(0.75), "string values parse as numbers");
        let keys: Vec<&str> = haps[0].value.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["s", "gain"], "overwrite keeps the key's position");
    }

    #[test]
    fn test_sound_atom_with_index() {
        let p = s("bd:3");
        let haps = p.query_cycle(0);
        assert_eq!(haps[0].value.str("s"), Some("bd"));
        assert_eq!(haps[0].value.num("n"), Some(3.0));
    }

    #[test]
    fn test_join_preserves_partials_at_boundaries() {
        // A two-cycle-long event joined with a per-cycle value still yields
        // its tail fragment, with the whole narrowed to the overlap.
        let left = Pattern::pure(1.0).slow(Fraction::new(2, 1));
        let p = left.add(1.0);
        let state = State::new(TimeSpan::new(Fraction::new(1, 1), Fraction::new(2, 1)));
        let haps = p.query(&state);
        assert_eq!(haps.len(), 1);
        assert_eq!(haps[0].value, 2.0);
        assert_eq!(
            haps[0].part,
            TimeSpan::new(Fraction::new(1, 1), Fraction::new(2, 1))
        );
    }
}
