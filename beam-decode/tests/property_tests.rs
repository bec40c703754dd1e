//! Property-based tests for beam bookkeeping and batch compaction.

mod common;

use beam_decode::hypothesis::trim_at;
use beam_decode::{ActiveInstanceTracker, Beam};
use common::SPECIALS;
use ndarray::Array2;
use proptest::prelude::*;

// ── Strategies ──────────────────────────────────────────────────────────────

/// `(beam_size, vocab_size, steps, pool)` where the pool holds enough
/// log-probabilities for every step.
fn arb_search() -> impl Strategy<Value = (usize, usize, usize, Vec<f32>)> {
    (1usize..=4, 0usize..=4, 1usize..=5).prop_flat_map(|(k, extra, steps)| {
        let v = (k + extra).max(4);
        (
            Just(k),
            Just(v),
            Just(steps),
            prop::collection::vec(-12.0f32..0.0, k * v * steps),
        )
    })
}

/// `(n_inst, beam_size, survivor flags)`.
fn arb_batch() -> impl Strategy<Value = (usize, usize, Vec<bool>)> {
    (1usize..=6, 1usize..=4).prop_flat_map(|(n, k)| {
        (Just(n), Just(k), prop::collection::vec(any::<bool>(), n))
    })
}

// ── Property tests ───────────────────────────────────────────────────────────

proptest! {
    /// Every step records K tokens and K in-range backpointers, and every
    /// rank walks back to a hypothesis as long as the step count.
    #[test]
    fn advance_keeps_bookkeeping_consistent((k, v, steps, pool) in arb_search()) {
        let mut beam = Beam::new(k, SPECIALS).unwrap();
        for t in 0..steps {
            let chunk = &pool[t * k * v..(t + 1) * k * v];
            let dist = Array2::from_shape_vec((k, v), chunk.to_vec()).unwrap();
            let done = beam.advance(dist.view()).unwrap();

            prop_assert_eq!(beam.tokens().len(), t + 2);
            prop_assert!(beam.tokens()[t + 1].iter().all(|&tok| tok < v));
            prop_assert!(beam.backpointers()[t].iter().all(|&bp| bp < k));
            prop_assert!(beam.scores().windows(2).into_iter().all(|w| w[0] >= w[1]));
            if done {
                prop_assert_eq!(beam.tokens()[t + 1][0], SPECIALS.end);
                break;
            }
        }
        for rank in 0..k {
            prop_assert_eq!(beam.hypothesis(rank).unwrap().len(), beam.steps());
        }
    }

    /// On the first step a width-one beam picks the arg max of row 0, with
    /// ties going to the lowest token id.
    #[test]
    fn first_pick_is_lowest_arg_max(row in prop::collection::vec(-3i32..0, 4..10)) {
        let values: Vec<f32> = row.iter().map(|&x| x as f32).collect();
        let dist = Array2::from_shape_vec((1, values.len()), values.clone()).unwrap();
        let mut beam = Beam::new(1, SPECIALS).unwrap();
        beam.advance(dist.view()).unwrap();

        let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let expected = values.iter().position(|&x| x == max).unwrap();
        prop_assert_eq!(beam.tokens()[1][0], expected);
    }

    /// Row `i * K + j` of a compacted tensor is row `pos * K + j` of the
    /// input, where `pos` is the survivor's old position.
    #[test]
    fn compaction_preserves_blocks((n, k, keep) in arb_batch()) {
        let mut tracker = ActiveInstanceTracker::new(n, k);
        let survivors: Vec<usize> = (0..n).filter(|&i| keep[i]).collect();
        // the search stops before compacting to nothing
        prop_assume!(!survivors.is_empty());
        let rows = Array2::from_shape_fn((n * k, 3), |(r, c)| (r * 3 + c) as u32);

        let plan = tracker.compaction(&survivors).unwrap();
        let out = plan.apply(&rows).unwrap();

        prop_assert_eq!(out.nrows(), survivors.len() * k);
        for (i, &inst) in survivors.iter().enumerate() {
            let pos = tracker.position(inst).unwrap();
            for j in 0..k {
                prop_assert_eq!(out.row(i * k + j), rows.row(pos * k + j));
            }
        }

        tracker.commit(plan);
        prop_assert_eq!(tracker.active(), &survivors[..]);
        for (i, &inst) in survivors.iter().enumerate() {
            prop_assert_eq!(tracker.position(inst), Some(i));
        }
    }

    /// Trimming yields the longest end-free prefix.
    #[test]
    fn trim_stops_at_first_end(tokens in prop::collection::vec(0usize..6, 0..12)) {
        let trimmed = trim_at(tokens.clone(), SPECIALS.end);
        prop_assert!(!trimmed.contains(&SPECIALS.end));
        prop_assert_eq!(&tokens[..trimmed.len()], &trimmed[..]);
        if trimmed.len() < tokens.len() {
            prop_assert_eq!(tokens[trimmed.len()], SPECIALS.end);
        }
    }
}
