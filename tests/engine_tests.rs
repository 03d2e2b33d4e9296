//! Scheduler and mixer behavior through the public engine surface.

use ostinato::cyclist::Cyclist;
use ostinato::pattern::Pattern;
use ostinato::pattern_ops::{n, s};
use ostinato::ControlMap;

fn mean_abs(samples: &[f32]) -> f32 {
    samples.iter().map(|x| x.abs()).sum::<f32>() / samples.len() as f32
}

#[test]
fn pan_quarter_left_matches_equal_power_curve() {
    // cps=1, sr=1000: a 200-frame block covers the first fifth of the cycle.
    let mut cyclist = Cyclist::new(1000.0, 1.0, None);
    cyclist.set_pattern(Some(n("0*4").scale("c:major").s("sine").pan(0.25)));
    let (l, r) = cyclist.generate(200);
    assert!(mean_abs(&l) > 0.0, "block must contain audio");
    let ratio = mean_abs(&l) / mean_abs(&r);
    let theta = 0.25f32 * std::f32::consts::FRAC_PI_2;
    let expected = theta.cos() / theta.sin();
    assert!(
        (ratio - expected).abs() < 0.1,
        "mean|L|/mean|R| should be about {}, got {}",
        expected,
        ratio
    );
}

#[test]
fn centre_pan_keeps_channels_identical() {
    let mut cyclist = Cyclist::new(1000.0, 1.0, None);
    cyclist.set_pattern(Some(s("sine")));
    let (l, r) = cyclist.generate(300);
    for (a, b) in l.iter().zip(r.iter()) {
        assert_eq!(a, b, "pan 0.5 is a no-op");
    }
}

#[test]
fn voices_are_pruned_after_they_finish() {
    let mut cyclist = Cyclist::new(1000.0, 2.0, None);
    // Short percussive events: hold is an eighth of a cycle (62 ms at 2 cps).
    cyclist.set_pattern(Some(s("sine*8").release(0.01)));
    cyclist.generate(500); // one cycle
    // After a long silent stretch with a fresh empty pattern, everything
    // should have decayed and been pruned.
    cyclist.set_pattern(None);
    cyclist.generate(2000);
    assert_eq!(cyclist.active_voices(), 0);
}

#[test]
fn pattern_swap_takes_effect_next_block() {
    let mut cyclist = Cyclist::new(1000.0, 1.0, None);
    let (l, _) = cyclist.generate(100);
    assert!(l.iter().all(|&x| x == 0.0));

    cyclist.set_pattern(Some(s("sine").gain(0.9)));
    // The new pattern only matters from this block on; cursor is at 0.1 of
    // the cycle, so the onset at the next cycle start still fires.
    let mut heard = false;
    for _ in 0..12 {
        let (l, _) = cyclist.generate(100);
        if mean_abs(&l) > 0.0 {
            heard = true;
        }
    }
    assert!(heard, "the swapped-in pattern must start playing");
}

#[test]
fn hush_silences_immediately() {
    let mut cyclist = Cyclist::new(1000.0, 1.0, None);
    cyclist.set_pattern(Some(s("sine")));
    cyclist.generate(100);
    assert!(cyclist.active_voices() > 0);
    cyclist.hush();
    let (l, _) = cyclist.generate(100);
    assert_eq!(cyclist.active_voices(), 0);
    assert!(l.iter().all(|&x| x == 0.0));
}

#[test]
fn reset_restarts_the_cycle() {
    let mut cyclist = Cyclist::new(1000.0, 1.0, None);
    cyclist.set_pattern(Some(s("sine ~ ~ ~")));
    let (first, _) = cyclist.generate(250);
    cyclist.generate(750);
    cyclist.reset();
    let (again, _) = cyclist.generate(250);
    assert!(mean_abs(&first) > 0.0);
    assert!(
        mean_abs(&again) > 0.0,
        "after reset the cycle-start onset fires again"
    );
}

#[test]
fn stack_order_is_deterministic() {
    let mut a = Cyclist::new(1000.0, 1.0, None);
    let mut b = Cyclist::new(1000.0, 1.0, None);
    let pattern = || {
        Pattern::stack(vec![
            n("0").scale("c:major").s("sine").gain(0.4),
            n("4").scale("c:major").s("tri").gain(0.4),
        ])
    };
    a.set_pattern(Some(pattern()));
    b.set_pattern(Some(pattern()));
    let (la, _) = a.generate(400);
    let (lb, _) = b.generate(400);
    for (x, y) in la.iter().zip(lb.iter()) {
        assert_eq!(x, y, "equal patterns produce identical blocks");
    }
}

#[test]
fn sample_bank_feeds_the_engine() {
    // Build a tiny sample bank on disk: a constant-ish click.
    let dir = std::env::temp_dir().join("ostinato_engine_bank");
    let kick = dir.join("clicktest");
    std::fs::create_dir_all(&kick).unwrap();
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 1000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(kick.join("0.wav"), spec).unwrap();
    for _ in 0..100 {
        writer.write_sample(i16::MAX / 2).unwrap();
    }
    writer.finalize().unwrap();

    let mut cyclist = Cyclist::new(1000.0, 1.0, Some(dir.clone()));
    cyclist.set_pattern(Some(s("clicktest")));
    let (l, _) = cyclist.generate(120);
    assert!(
        mean_abs(&l[2..90]) > 0.05,
        "the decoded sample should be audible"
    );

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn unknown_control_keys_are_ignored_but_preserved() {
    let pattern = s("sine").lift_extra();
    let haps = pattern.query_cycle(0);
    assert_eq!(haps[0].value.num("wobble"), Some(42.0));

    // The scheduler plays the event regardless of the unknown key.
    let mut cyclist = Cyclist::new(1000.0, 1.0, None);
    cyclist.set_pattern(Some(s("sine").lift_extra()));
    let (l, _) = cyclist.generate(200);
    assert!(mean_abs(&l) > 0.0);
}

trait LiftExtra {
    fn lift_extra(self) -> Pattern<ControlMap>;
}

impl LiftExtra for Pattern<ControlMap> {
    fn lift_extra(self) -> Pattern<ControlMap> {
        self.with_value(|map| {
            let mut map = map.clone();
            map.insert("wobble", 42.0);
            map
        })
    }
}
