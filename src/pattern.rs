//! Core pattern system: rational time, spans, haps and the `Pattern` type
//!
//! A pattern is a pure function from a time span to a list of events ("haps").
//! Nothing is computed until a query runs, so combinators compose cheaply and
//! the same pattern can be queried over any span, any number of times.
//!
//! All time arithmetic is done on exact rationals. Converting to floats only
//! happens at the audio edge (sample indices, frequencies), which keeps event
//! boundaries exact across arbitrarily many cycles.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Exact rational number, used for all musical time values (in cycles).
///
/// Always kept reduced with a positive denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fraction {
    pub numerator: i64,
    pub denominator: i64,
}

impl Fraction {
    pub fn new(n: i64, d: i64) -> Self {
        debug_assert!(d != 0, "fraction with zero denominator");
        let g = gcd(n.abs(), d.abs()).max(1);
        Self {
            numerator: n / g * d.signum(),
            denominator: d.abs() / g,
        }
    }

    pub fn from_int(n: i64) -> Self {
        Self {
            numerator: n,
            denominator: 1,
        }
    }

    /// Approximate a float as a rational. Only used when lowering surface
    /// numbers (e.g. `0.25` in mini-notation); internal time stays exact.
    pub fn from_float(f: f64) -> Self {
        let denominator = 1_000_000i64;
        let numerator = (f * denominator as f64).round() as i64;
        Self::new(numerator, denominator)
    }

    pub fn to_float(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    /// Largest integer not greater than this fraction.
    pub fn floor(&self) -> i64 {
        self.numerator.div_euclid(self.denominator)
    }

    /// Smallest integer not less than this fraction.
    pub fn ceil(&self) -> i64 {
        -((-self.numerator).div_euclid(self.denominator))
    }

    /// Start of the cycle this time value falls in.
    pub fn sam(&self) -> Fraction {
        Fraction::from_int(self.floor())
    }

    /// Start of the next cycle.
    pub fn next_sam(&self) -> Fraction {
        Fraction::from_int(self.floor() + 1)
    }

    /// Position within the current cycle, in `[0, 1)`.
    pub fn cycle_pos(&self) -> Fraction {
        *self - self.sam()
    }

    pub fn min(self, other: Self) -> Self {
        if self <= other {
            self
        } else {
            other
        }
    }

    pub fn max(self, other: Self) -> Self {
        if self >= other {
            self
        } else {
            other
        }
    }

    pub fn is_zero(&self) -> bool {
        self.numerator == 0
    }

    pub fn recip(&self) -> Self {
        Fraction::new(self.denominator, self.numerator)
    }
}

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

impl std::ops::Add for Fraction {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Fraction::new(
            self.numerator * other.denominator + other.numerator * self.denominator,
            self.denominator * other.denominator,
        )
    }
}

impl std::ops::Sub for Fraction {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Fraction::new(
            self.numerator * other.denominator - other.numerator * self.denominator,
            self.denominator * other.denominator,
        )
    }
}

impl std::ops::Mul for Fraction {
    type Output = Self;

    fn mul(self, other: Self) -> Self {
        Fraction::new(
            self.numerator * other.numerator,
            self.denominator * other.denominator,
        )
    }
}

impl std::ops::Div for Fraction {
    type Output = Self;

    fn div(self, other: Self) -> Self {
        Fraction::new(
            self.numerator * other.denominator,
            self.denominator * other.numerator,
        )
    }
}

impl std::ops::Neg for Fraction {
    type Output = Self;

    fn neg(self) -> Self {
        Fraction {
            numerator: -self.numerator,
            denominator: self.denominator,
        }
    }
}

impl PartialOrd for Fraction {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fraction {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let lhs = self.numerator as i128 * other.denominator as i128;
        let rhs = other.numerator as i128 * self.denominator as i128;
        lhs.cmp(&rhs)
    }
}

impl std::fmt::Display for Fraction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.denominator == 1 {
            write!(f, "{}", self.numerator)
        } else {
            write!(f, "{}/{}", self.numerator, self.denominator)
        }
    }
}

/// Half-open time interval `[begin, end)` over cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSpan {
    pub begin: Fraction,
    pub end: Fraction,
}

impl TimeSpan {
    pub fn new(begin: Fraction, end: Fraction) -> Self {
        Self { begin, end }
    }

    pub fn duration(&self) -> Fraction {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    /// Split the span at every integer cycle boundary. The returned subspans
    /// are non-empty and their union equals the original span.
    pub fn cycles(&self) -> Vec<TimeSpan> {
        let mut spans = Vec::new();
        if self.is_empty() {
            return spans;
        }
        let mut b = self.begin;
        while b < self.end {
            let e = b.next_sam().min(self.end);
            spans.push(TimeSpan::new(b, e));
            b = e;
        }
        spans
    }

    /// Overlap with another span, or `None` when they only touch or miss.
    pub fn intersection(&self, other: &TimeSpan) -> Option<TimeSpan> {
        let b = self.begin.max(other.begin);
        let e = self.end.min(other.end);
        if b < e {
            Some(TimeSpan::new(b, e))
        } else {
            None
        }
    }

    /// Apply a time transformation to both endpoints.
    pub fn map_time(&self, f: impl Fn(Fraction) -> Fraction) -> TimeSpan {
        TimeSpan::new(f(self.begin), f(self.end))
    }
}

/// Hap (short for "happening"): an event with a value.
///
/// `part` is the portion visible in the current query; `whole`, when present,
/// is the full logical extent the event belongs to.
#[derive(Debug, Clone)]
pub struct Hap<T> {
    pub whole: Option<TimeSpan>,
    pub part: TimeSpan,
    pub value: T,
    pub context: HashMap<String, String>,
}

impl<T: Clone> Hap<T> {
    pub fn new(whole: Option<TimeSpan>, part: TimeSpan, value: T) -> Self {
        Self {
            whole,
            part,
            value,
            context: HashMap::new(),
        }
    }

    /// True when the part begins exactly at the whole's begin, i.e. the
    /// event's onset is inside the query window.
    pub fn has_onset(&self) -> bool {
        match self.whole {
            Some(w) => w.begin == self.part.begin,
            None => false,
        }
    }

    /// Event length in cycles (whole if present, else part).
    pub fn duration(&self) -> Fraction {
        self.whole.unwrap_or(self.part).duration()
    }

    pub fn with_value<U>(&self, f: impl FnOnce(&T) -> U) -> Hap<U> {
        Hap {
            whole: self.whole,
            part: self.part,
            value: f(&self.value),
            context: self.context.clone(),
        }
    }

    /// Apply a time transformation to both part and whole.
    pub fn map_time(mut self, f: impl Fn(Fraction) -> Fraction) -> Self {
        self.part = self.part.map_time(&f);
        self.whole = self.whole.map(|w| w.map_time(&f));
        self
    }
}

/// State for a pattern query: the span to sample plus named controls.
#[derive(Debug, Clone)]
pub struct State {
    pub span: TimeSpan,
    pub controls: HashMap<String, f64>,
}

impl State {
    pub fn new(span: TimeSpan) -> Self {
        Self {
            span,
            controls: HashMap::new(),
        }
    }

    /// Query state for one whole cycle `[n, n+1)`.
    pub fn cycle(n: i64) -> Self {
        Self::new(TimeSpan::new(
            Fraction::from_int(n),
            Fraction::from_int(n + 1),
        ))
    }

    fn with_span(&self, span: TimeSpan) -> Self {
        Self {
            span,
            controls: self.controls.clone(),
        }
    }
}

/// Core pattern type: a lazy, queryable function of time.
pub struct Pattern<T: Clone + Send + Sync> {
    query: Arc<dyn Fn(&State) -> Vec<Hap<T>> + Send + Sync>,
}

impl<T: Clone + Send + Sync> Clone for Pattern<T> {
    fn clone(&self) -> Self {
        Self {
            query: self.query.clone(),
        }
    }
}

impl<T: Clone + Send + Sync> Debug for Pattern<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pattern").field("query", &"<closure>").finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Pattern<T> {
    pub fn new(query: impl Fn(&State) -> Vec<Hap<T>> + Send + Sync + 'static) -> Self {
        Self {
            query: Arc::new(query),
        }
    }

    /// Query the pattern for events in a time span.
    pub fn query(&self, state: &State) -> Vec<Hap<T>> {
        (self.query)(state)
    }

    /// Query one whole cycle, sorted by part begin.
    pub fn query_cycle(&self, n: i64) -> Vec<Hap<T>> {
        let mut haps = self.query(&State::cycle(n));
        haps.sort_by(|a, b| a.part.begin.cmp(&b.part.begin));
        haps
    }

    /// A single value repeating once per cycle, `whole = [n, n+1)`.
    pub fn pure(value: T) -> Self {
        Self::new(move |state| {
            let mut haps = Vec::new();
            for cycle in state.span.begin.floor()..state.span.end.ceil() {
                let whole = TimeSpan::new(
                    Fraction::from_int(cycle),
                    Fraction::from_int(cycle + 1),
                );
                if let Some(part) = whole.intersection(&state.span) {
                    haps.push(Hap::new(Some(whole), part, value.clone()));
                }
            }
            haps
        })
    }

    /// The empty pattern.
    pub fn silence() -> Self {
        Self::new(|_| vec![])
    }

    /// Play all patterns simultaneously.
    pub fn stack(patterns: Vec<Pattern<T>>) -> Pattern<T> {
        Pattern::new(move |state| patterns.iter().flat_map(|p| p.query(state)).collect())
    }

    /// One pattern per cycle, round-robin by cycle index.
    pub fn slowcat(patterns: Vec<Pattern<T>>) -> Pattern<T> {
        if patterns.is_empty() {
            return Pattern::silence();
        }
        let len = patterns.len() as i64;
        Pattern::new(move |state| {
            let mut haps = Vec::new();
            for sub in state.span.cycles() {
                // The cycle index must come from the subspan, not the outer
                // query, so fast/slow compose correctly.
                let cycle = sub.begin.floor();
                let idx = cycle.rem_euclid(len) as usize;
                haps.extend(patterns[idx].query(&state.with_span(sub)));
            }
            haps
        })
    }

    /// All patterns squeezed into a single cycle.
    pub fn fastcat(patterns: Vec<Pattern<T>>) -> Pattern<T> {
        let len = patterns.len() as i64;
        if len == 0 {
            return Pattern::silence();
        }
        Pattern::slowcat(patterns).fast(Fraction::from_int(len))
    }

    /// Weighted concatenation: each pattern fills a window of the cycle
    /// proportional to its weight, keeping the outer cycle index for its
    /// own query.
    pub fn timecat(pairs: Vec<(Fraction, Pattern<T>)>) -> Pattern<T> {
        let total: Fraction = pairs
            .iter()
            .fold(Fraction::from_int(0), |acc, (w, _)| acc + *w);
        if pairs.is_empty() || total.is_zero() {
            return Pattern::silence();
        }
        let mut windows = Vec::with_capacity(pairs.len());
        let mut cum = Fraction::from_int(0);
        for (w, p) in pairs {
            let begin = cum / total;
            cum = cum + w;
            let end = cum / total;
            windows.push((begin, end, p));
        }
        Pattern::new(move |state| {
            let mut haps = Vec::new();
            for sub in state.span.cycles() {
                let base = sub.begin.sam();
                for (wb, we, pat) in &windows {
                    let window = TimeSpan::new(base + *wb, base + *we);
                    let overlap = match window.intersection(&sub) {
                        Some(o) => o,
                        None => continue,
                    };
                    let width = *we - *wb;
                    // Map window time onto the pattern's own cycle and back.
                    let to_inner = |t: Fraction| base + (t - base - *wb) / width;
                    let to_outer = |t: Fraction| base + *wb + (t - base) * width;
                    let inner_span = overlap.map_time(to_inner);
                    for hap in pat.query(&state.with_span(inner_span)) {
                        haps.push(hap.map_time(to_outer));
                    }
                }
            }
            haps
        })
    }

    /// Speed up by a rational factor: query scaled time, rescale results.
    pub fn fast(self, factor: Fraction) -> Self {
        if factor.numerator <= 0 {
            return Pattern::silence();
        }
        Pattern::new(move |state| {
            let inner = state.with_span(state.span.map_time(|t| t * factor));
            self.query(&inner)
                .into_iter()
                .map(|hap| hap.map_time(|t| t / factor))
                .collect()
        })
    }

    /// Slow down by a rational factor.
    pub fn slow(self, factor: Fraction) -> Self {
        if factor.numerator <= 0 {
            return Pattern::silence();
        }
        self.fast(factor.recip())
    }

    /// Map a function over every hap's value.
    pub fn with_value<U: Clone + Send + Sync + 'static>(
        self,
        f: impl Fn(&T) -> U + Send + Sync + 'static,
    ) -> Pattern<U> {
        Pattern::new(move |state| {
            self.query(state)
                .into_iter()
                .map(|hap| hap.with_value(|v| f(v)))
                .collect()
        })
    }

    /// Keep only haps matching a predicate.
    pub fn filter_haps(self, pred: impl Fn(&Hap<T>) -> bool + Send + Sync + 'static) -> Self {
        Pattern::new(move |state| {
            self.query(state).into_iter().filter(|h| pred(h)).collect()
        })
    }

    /// Keep only haps whose onset falls inside the query.
    pub fn onsets_only(self) -> Self {
        self.filter_haps(|h| h.has_onset())
    }

    /// Apply `f` on cycles where `cycle mod n == n - 1`, leave the others.
    pub fn every(self, n: i64, f: impl Fn(Pattern<T>) -> Pattern<T> + Send + Sync + 'static) -> Self {
        if n <= 0 {
            return self;
        }
        let transformed = f(self.clone());
        Pattern::new(move |state| {
            let mut haps = Vec::new();
            for sub in state.span.cycles() {
                let cycle = sub.begin.floor();
                let pat = if cycle.rem_euclid(n) == n - 1 {
                    &transformed
                } else {
                    &self
                };
                haps.extend(pat.query(&state.with_span(sub)));
            }
            haps
        })
    }

    /// Reflect each hap within its own cycle; results sorted by part begin.
    pub fn rev(self) -> Self {
        Pattern::new(move |state| {
            let mut haps = Vec::new();
            for sub in state.span.cycles() {
                let sam = sub.begin.sam();
                let next = sub.begin.next_sam();
                let reflect = move |t: Fraction| sam + next - t;
                // Reflecting swaps the endpoints as well as negating them.
                let mirrored = TimeSpan::new(reflect(sub.end), reflect(sub.begin));
                for hap in self.query(&state.with_span(mirrored)) {
                    let part = TimeSpan::new(reflect(hap.part.end), reflect(hap.part.begin));
                    let whole = hap
                        .whole
                        .map(|w| TimeSpan::new(reflect(w.end), reflect(w.begin)));
                    haps.push(Hap {
                        whole,
                        part,
                        value: hap.value,
                        context: hap.context,
                    });
                }
            }
            haps.sort_by(|a, b| a.part.begin.cmp(&b.part.begin));
            haps
        })
    }

    /// Randomly drop haps with the given probability, deterministic per
    /// event position so repeated queries agree.
    pub fn degrade_by(self, prob: f64) -> Self {
        Pattern::new(move |state| {
            self.query(state)
                .into_iter()
                .filter(|hap| event_roll(hap) >= prob)
                .collect()
        })
    }

    /// The complement of [`degrade_by`](Pattern::degrade_by): keep exactly
    /// the haps that `degrade_by(prob)` would drop.
    pub fn undegrade_by(self, prob: f64) -> Self {
        Pattern::new(move |state| {
            self.query(state)
                .into_iter()
                .filter(|hap| event_roll(hap) < prob)
                .collect()
        })
    }

    /// Apply `f` to a randomly selected share of events (probability `prob`)
    /// and leave the rest untouched. Selection uses the same deterministic
    /// per-event roll as `degrade_by`, so the two subsets partition the
    /// pattern exactly.
    pub fn sometimes_by(
        self,
        prob: f64,
        f: impl Fn(Pattern<T>) -> Pattern<T> + Send + Sync + 'static,
    ) -> Self {
        let untouched = self.clone().degrade_by(prob);
        let transformed = f(self.undegrade_by(prob));
        Pattern::stack(vec![untouched, transformed])
    }
}

/// Deterministic roll in `[0, 1)` for an event, keyed by the position of its
/// whole so every query of the same event agrees.
fn event_roll<T: Clone>(hap: &Hap<T>) -> f64 {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    let at = hap.whole.unwrap_or(hap.part).begin;
    let seed = (at.numerator as u64).wrapping_mul(0x9e3779b97f4a7c15)
        ^ (at.denominator as u64).wrapping_mul(0x85ebca6b0b7e3a85);
    let mut rng = StdRng::seed_from_u64(seed);
    rng.gen::<f64>()
}
