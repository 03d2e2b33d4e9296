//! Quantified invariants of the pattern algebra, checked across a grid of
//! query spans and cycle counts.

use ostinato::pattern::{Fraction, Pattern, State, TimeSpan};
use ostinato::pattern_ops::s;

fn f(n: i64, d: i64) -> Fraction {
    Fraction::new(n, d)
}

fn span(b: Fraction, e: Fraction) -> State {
    State::new(TimeSpan::new(b, e))
}

/// Every returned hap satisfies `part ⊆ query span` and `part ⊆ whole`.
fn check_containment<T: Clone + Send + Sync + 'static>(pattern: &Pattern<T>) {
    let spans = [
        (f(0, 1), f(1, 1)),
        (f(1, 3), f(5, 3)),
        (f(-2, 1), f(1, 2)),
        (f(7, 4), f(13, 4)),
        (f(100, 1), f(401, 4)),
    ];
    for (b, e) in spans {
        for hap in pattern.query(&span(b, e)) {
            assert!(
                hap.part.begin >= b && hap.part.end <= e,
                "part must lie within the query span"
            );
            assert!(!hap.part.is_empty(), "parts are non-empty");
            if let Some(w) = hap.whole {
                assert!(
                    w.begin <= hap.part.begin && hap.part.end <= w.end,
                    "part must lie within its whole"
                );
            }
        }
    }
}

#[test]
fn containment_holds_for_combinators() {
    check_containment(&Pattern::pure("x"));
    check_containment(&Pattern::pure(1.0).fast(f(3, 1)));
    check_containment(&Pattern::pure(1.0).slow(f(5, 2)));
    check_containment(&Pattern::fastcat(vec![
        Pattern::pure(1),
        Pattern::silence(),
        Pattern::pure(2),
    ]));
    check_containment(&Pattern::slowcat(vec![Pattern::pure("a"), Pattern::pure("b")]).rev());
    check_containment(&Pattern::<bool>::euclid(5, 13, 2));
    check_containment(&s("bd [hh hh] sd").gain("0.5 1"));
}

#[test]
fn pure_yields_one_hap_per_integer_cycle() {
    let p = Pattern::pure(7);
    for (b, e, expected) in [
        (f(0, 1), f(1, 1), 1usize),
        (f(0, 1), f(4, 1), 4),
        (f(1, 2), f(5, 2), 3),
        (f(-3, 2), f(0, 1), 2),
    ] {
        let haps = p.query(&span(b, e));
        assert_eq!(haps.len(), expected, "span [{}, {})", b, e);
        for hap in &haps {
            let w = hap.whole.unwrap();
            assert_eq!(w.duration(), f(1, 1));
            assert_eq!(w.begin, w.begin.sam(), "wholes sit on integer cycles");
        }
    }
}

#[test]
fn fast_multiplies_haps_per_cycle() {
    let base = Pattern::fastcat(vec![Pattern::pure(1), Pattern::pure(2), Pattern::pure(3)]);
    for k in 1..=5i64 {
        let haps = base.clone().fast(f(k, 1)).query_cycle(0);
        assert_eq!(
            haps.len(),
            (3 * k) as usize,
            "fast({}) on a 3-hap pattern yields {} haps",
            k,
            3 * k
        );
    }
}

#[test]
fn slowcat_on_cycle_n_equals_member_on_that_cycle() {
    let members = vec![
        Pattern::fastcat(vec![Pattern::pure("a1"), Pattern::pure("a2")]),
        Pattern::pure("b"),
        Pattern::<&str>::silence(),
    ];
    let cat = Pattern::slowcat(members.clone());
    for cycle in -3..9i64 {
        let got = cat.query_cycle(cycle);
        let member = &members[cycle.rem_euclid(3) as usize];
        let want = member.query_cycle(cycle);
        assert_eq!(got.len(), want.len(), "cycle {}", cycle);
        for (g, w) in got.iter().zip(want.iter()) {
            assert_eq!(g.part, w.part);
            assert_eq!(g.whole, w.whole);
            assert_eq!(g.value, w.value);
        }
    }
}

#[test]
fn rev_is_an_involution() {
    let patterns = vec![
        Pattern::fastcat(vec![Pattern::pure(1), Pattern::pure(2), Pattern::pure(3)]),
        Pattern::fastcat(vec![Pattern::pure(1), Pattern::silence(), Pattern::pure(2)]),
        Pattern::pure(9).fast(f(4, 1)),
    ];
    for p in patterns {
        for cycle in 0..4 {
            let original = p.clone().query_cycle(cycle);
            let twice = p.clone().rev().rev().query_cycle(cycle);
            assert_eq!(original.len(), twice.len());
            for (a, b) in original.iter().zip(twice.iter()) {
                assert_eq!(a.part, b.part);
                assert_eq!(a.whole, b.whole);
                assert_eq!(a.value, b.value);
            }
        }
    }
}

#[test]
fn stack_output_is_order_independent_multiset() {
    let a = Pattern::fastcat(vec![Pattern::pure(1), Pattern::pure(2)]);
    let b = Pattern::pure(3).fast(f(3, 1));
    let ab = Pattern::stack(vec![a.clone(), b.clone()]).query_cycle(0);
    let ba = Pattern::stack(vec![b, a]).query_cycle(0);
    assert_eq!(ab.len(), ba.len());

    let mut key_ab: Vec<(Fraction, i32)> = ab.iter().map(|h| (h.part.begin, h.value)).collect();
    let mut key_ba: Vec<(Fraction, i32)> = ba.iter().map(|h| (h.part.begin, h.value)).collect();
    key_ab.sort();
    key_ba.sort();
    assert_eq!(key_ab, key_ba);
}

#[test]
fn stack_is_associative() {
    let parts = [
        Pattern::pure(1),
        Pattern::pure(2).fast(f(2, 1)),
        Pattern::pure(3).fast(f(3, 1)),
    ];
    let left = Pattern::stack(vec![
        Pattern::stack(vec![parts[0].clone(), parts[1].clone()]),
        parts[2].clone(),
    ]);
    let right = Pattern::stack(vec![
        parts[0].clone(),
        Pattern::stack(vec![parts[1].clone(), parts[2].clone()]),
    ]);
    let mut l: Vec<(Fraction, i32)> = left.query_cycle(0).iter().map(|h| (h.part.begin, h.value)).collect();
    let mut r: Vec<(Fraction, i32)> = right.query_cycle(0).iter().map(|h| (h.part.begin, h.value)).collect();
    l.sort();
    r.sort();
    assert_eq!(l, r);
}

#[test]
fn euclid_positions_are_step_aligned() {
    for (pulses, steps) in [(3usize, 8usize), (5, 8), (7, 16), (2, 5), (4, 4)] {
        let haps = Pattern::<bool>::euclid(pulses, steps, 0).query_cycle(0);
        assert_eq!(haps.len(), pulses);
        for hap in &haps {
            let w = hap.whole.unwrap();
            assert_eq!(w.duration(), f(1, steps as i64));
            let pos = w.begin * f(steps as i64, 1);
            assert_eq!(pos, pos.sam(), "onset {} must sit on a step boundary", w.begin);
        }
    }
}

#[test]
fn euclid_spacing_is_as_even_as_possible() {
    // Gaps between consecutive onsets of euclid(k, n) differ by at most one
    // step.
    for (pulses, steps) in [(3usize, 8usize), (5, 8), (5, 12), (7, 16)] {
        let haps = Pattern::<bool>::euclid(pulses, steps, 0).query_cycle(0);
        let positions: Vec<i64> = haps
            .iter()
            .map(|h| (h.whole.unwrap().begin * f(steps as i64, 1)).floor())
            .collect();
        let mut gaps = Vec::new();
        for i in 0..positions.len() {
            let next = positions[(i + 1) % positions.len()] + if i + 1 == positions.len() { steps as i64 } else { 0 };
            gaps.push(next - positions[i]);
        }
        let min = gaps.iter().min().unwrap();
        let max = gaps.iter().max().unwrap();
        assert!(
            max - min <= 1,
            "euclid({},{}) gaps {:?} should differ by at most one",
            pulses,
            steps,
            gaps
        );
    }
}

#[test]
fn every_leaves_other_cycles_untouched() {
    let base = Pattern::fastcat(vec![Pattern::pure("a"), Pattern::pure("b")]);
    let p = base.clone().every(4, |p| p.rev());
    for cycle in 0..8 {
        let got: Vec<String> = p.query_cycle(cycle).iter().map(|h| h.value.to_string()).collect();
        let want: Vec<String> = if cycle % 4 == 3 {
            base.clone().rev().query_cycle(cycle)
        } else {
            base.query_cycle(cycle)
        }
        .iter()
        .map(|h| h.value.to_string())
        .collect();
        assert_eq!(got, want, "cycle {}", cycle);
    }
}

#[test]
fn degrade_by_extremes() {
    let p = Pattern::pure(1).fast(f(8, 1));
    assert_eq!(p.clone().degrade_by(0.0).query_cycle(0).len(), 8);
    assert_eq!(p.degrade_by(1.0).query_cycle(0).len(), 0);
}
