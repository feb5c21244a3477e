//! Training schedules: cyclical KL annealing and the sequence-length
//! curriculum.

/// Precompute the per-epoch KL weight.
///
/// The run is divided into `n_cycle` equal cycles; within each cycle the
/// weight ramps linearly from `start` to `end` over the first `ratio`
/// fraction and holds at `end` for the remainder, then restarts at
/// `start` at the next cycle boundary.
pub fn cyclical_annealing(
    start: f64,
    end: f64,
    epochs: usize,
    n_cycle: usize,
    ratio: f64,
) -> Vec<f64> {
    let mut weights = vec![end; epochs];
    let period = epochs as f64 / n_cycle as f64;
    let step = (end - start) / (period * ratio);

    for c in 0..n_cycle {
        let mut v = start;
        let mut i = 0usize;
        while v <= end {
            let idx = (i as f64 + c as f64 * period) as usize;
            if idx >= epochs {
                break;
            }
            weights[idx] = v;
            v += step;
            i += 1;
        }
    }
    weights
}

/// Sequence length for the progressive-training curriculum at a 1-based
/// epoch: linear from `start_len` at epoch 1 to `target_len` at epoch
/// `duration`, clamped there for the rest of the run. Non-decreasing in
/// the epoch.
pub fn progressive_seq_len(
    start_len: usize,
    target_len: usize,
    duration: usize,
    epoch: usize,
) -> usize {
    if target_len <= start_len || duration <= 1 {
        return target_len;
    }
    let frac = ((epoch.saturating_sub(1)) as f64 / (duration - 1) as f64).min(1.0);
    start_len + ((target_len - start_len) as f64 * frac).round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annealing_shape_four_cycles() {
        let w = cyclical_annealing(0.0, 1.0, 100, 4, 0.9);
        assert_eq!(w.len(), 100);

        // Each cycle restarts at the start value.
        for c in 0..4 {
            assert!((w[c * 25] - 0.0).abs() < 1e-12, "cycle {c} start: {}", w[c * 25]);
        }
        // The tail of each cycle holds at the end value.
        assert!((w[24] - 1.0).abs() < 1e-9);
        assert!((w[99] - 1.0).abs() < 1e-9);

        // Weights ramp monotonically within a cycle and stay in range.
        for c in 0..4 {
            for i in c * 25..c * 25 + 24 {
                assert!(w[i] <= w[i + 1] + 1e-12);
            }
        }
        assert!(w.iter().all(|v| (0.0..=1.0 + 1e-9).contains(v)));
    }

    #[test]
    fn annealing_single_cycle_is_one_ramp() {
        let w = cyclical_annealing(0.0, 1.0, 10, 1, 1.0);
        assert!((w[0] - 0.0).abs() < 1e-12);
        for i in 0..9 {
            assert!(w[i] < w[i + 1] + 1e-12);
        }
    }

    #[test]
    fn curriculum_ramps_10_to_50_over_200_epochs() {
        assert_eq!(progressive_seq_len(10, 50, 200, 1), 10);
        assert_eq!(progressive_seq_len(10, 50, 200, 200), 50);
        assert_eq!(progressive_seq_len(10, 50, 200, 500), 50);

        // Non-decreasing throughout.
        let mut prev = 0;
        for epoch in 1..=250 {
            let len = progressive_seq_len(10, 50, 200, epoch);
            assert!(len >= prev);
            assert!((10..=50).contains(&len));
            prev = len;
        }

        // Roughly halfway at the midpoint.
        let mid = progressive_seq_len(10, 50, 200, 100);
        assert!((28..=32).contains(&mid), "{mid}");
    }

    #[test]
    fn degenerate_curriculum_returns_target() {
        assert_eq!(progressive_seq_len(50, 50, 200, 1), 50);
        assert_eq!(progressive_seq_len(10, 50, 1, 1), 50);
    }
}
