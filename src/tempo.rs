//! Process-wide tempo
//!
//! One global `cps` (cycles per second) value, defaulting to 0.5. Schedulers
//! capture it at construction and may refresh between blocks; mutations here
//! never reach a running block mid-flight.

use std::sync::atomic::{AtomicU64, Ordering};

// f64 bits of 0.5, the startup tempo.
static CPS_BITS: AtomicU64 = AtomicU64::new(0x3FE0_0000_0000_0000);

/// Current cycles per second.
pub fn cps() -> f64 {
    f64::from_bits(CPS_BITS.load(Ordering::Relaxed))
}

pub fn set_cps(cps: f64) {
    if cps > 0.0 && cps.is_finite() {
        CPS_BITS.store(cps.to_bits(), Ordering::Relaxed);
    }
}

/// Cycles per minute.
pub fn cpm() -> f64 {
    cps() * 60.0
}

pub fn set_cpm(cpm: f64) {
    set_cps(cpm / 60.0);
}

/// Beats per minute at the given beats-per-cycle.
pub fn bpm(beats_per_cycle: f64) -> f64 {
    cps() * 60.0 * beats_per_cycle
}

/// Set the tempo from a BPM value; four beats per cycle is the common case.
pub fn set_bpm(bpm: f64, beats_per_cycle: f64) {
    if beats_per_cycle > 0.0 {
        set_cps(bpm / (60.0 * beats_per_cycle));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tempo_helpers_round_trip() {
        set_cps(0.5);
        assert_eq!(cps(), 0.5);
        assert_eq!(cpm(), 30.0);
        assert_eq!(bpm(4.0), 120.0);

        set_bpm(140.0, 4.0);
        assert!((cps() - 140.0 / 240.0).abs() < 1e-12);

        set_cpm(60.0);
        assert_eq!(cps(), 1.0);

        // Invalid values are ignored.
        set_cps(0.0);
        assert_eq!(cps(), 1.0);
        set_cps(0.5);
    }
}
