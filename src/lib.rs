//! # Ostinato — live coding music engine
//!
//! Ostinato interprets short pattern expressions, in the tradition of Tidal
//! Cycles and Strudel, as lazy queryable functions of time, resolves them
//! into discrete musical events and renders audio through synthesizer voices
//! and sample playback in real time.
//!
//! ## Layers
//!
//! - [`pattern`] — exact rational time, spans, haps and the core combinators
//!   (`pure`, `slowcat`, `stack`, `fast`, `every`, `rev`, ...)
//! - [`pattern_ops`] — inner-join arithmetic, control application, Euclidean
//!   rhythms and the chainable control surface (`s`, `n`, `gain`, `lpf`, ...)
//! - [`pattern_tonal`] — scales and transposition
//! - [`mini_notation`] — the `"bd [hh hh] sd"` DSL compiled into patterns
//! - [`voice`], [`oscillator`], [`envelope`], [`filter`] — synth and sample
//!   voices with ADSR amplitude and filter envelopes
//! - [`cyclist`] — the real-time scheduler/mixer with per-orbit delay and
//!   sidechain ducking
//! - [`audio`], [`live`] — cpal output and file-watch hot reload
//!
//! ## Quick start
//!
//! ```no_run
//! use ostinato::pattern_ops::n;
//! use ostinato::cyclist::Cyclist;
//!
//! let mut cyclist = Cyclist::new(44100.0, 0.5, None);
//! cyclist.set_pattern(Some(
//!     n("0 2 4 7").scale("c:major").s("supersaw").lpf(1200.0).gain(0.8),
//! ));
//! // The audio callback pulls stereo blocks:
//! let (left, right) = cyclist.generate(512);
//! assert_eq!(left.len(), 512);
//! assert_eq!(right.len(), 512);
//! ```
//!
//! Patterns are immutable once constructed; a control thread installs new
//! ones through [`cyclist::Cyclist::set_pattern`] and the swap takes effect
//! at the next block boundary.

pub mod audio;
pub mod control;
pub mod cyclist;
pub mod envelope;
pub mod filter;
pub mod live;
pub mod mini_notation;
pub mod orbit;
pub mod oscillator;
pub mod pattern;
pub mod pattern_ops;
pub mod pattern_tonal;
pub mod sample_bank;
pub mod tempo;
pub mod voice;

pub use control::{ControlMap, ControlValue};
pub use cyclist::Cyclist;
pub use mini_notation::{parse_mini_notation, ParseError, PatternValue};
pub use pattern::{Fraction, Hap, Pattern, State, TimeSpan};
pub use pattern_ops::{n, note, parse_sound_pattern, s, sound};
