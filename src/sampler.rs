use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::error::{Result, TextGenError};

/// Truncated weighted random choice over a probability-like vector.
///
/// 1. Promotes every entry to `f64`; single precision biases long runs.
/// 2. Keeps the `top_n` largest entries and zeroes the rest.
/// 3. Renormalizes the survivors and draws one index.
///
/// Ranking is a stable ascending sort of the indices by value and the last
/// `top_n` positions survive, so among equal values at the cut-off the
/// higher index is kept. `top_n >= probs.len()` keeps everything.
///
/// # Errors
/// `Config` when `top_n` is zero or `probs` is empty. `DegenerateDistribution`
/// when the kept entries sum to zero or contain negative or non-finite values.
pub fn sample<R: Rng>(rng: &mut R, probs: &[f32], top_n: usize) -> Result<usize> {
    let weights = truncate_top_n(probs, top_n)?;

    let dist = WeightedIndex::new(&weights).map_err(|e| {
        TextGenError::DegenerateDistribution(format!(
            "cannot renormalize top {} of {} entries: {}",
            top_n,
            probs.len(),
            e
        ))
    })?;
    Ok(dist.sample(rng))
}

/// The renormalized top-`n` distribution `sample` draws from.
pub fn truncate_top_n(probs: &[f32], top_n: usize) -> Result<Vec<f64>> {
    if top_n == 0 {
        return Err(TextGenError::Config("top_n must be at least 1".into()));
    }
    if probs.is_empty() {
        return Err(TextGenError::Config("cannot sample from an empty distribution".into()));
    }

    let mut weights: Vec<f64> = probs.iter().map(|&p| f64::from(p)).collect();

    // Stable ascending ranking; everything before the last `top_n` is dropped.
    let mut ranking: Vec<usize> = (0..weights.len()).collect();
    ranking.sort_by(|&a, &b| weights[a].total_cmp(&weights[b]));
    let cut = ranking.len().saturating_sub(top_n);
    for &index in &ranking[..cut] {
        weights[index] = 0.0;
    }

    let total: f64 = weights.iter().sum();
    if !total.is_finite() || total <= 0.0 || weights.iter().any(|&w| w < 0.0) {
        return Err(TextGenError::DegenerateDistribution(format!(
            "top {} entries sum to {}",
            top_n, total
        )));
    }
    for w in &mut weights {
        *w /= total;
    }
    Ok(weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn top_one_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(42);
        let probs = [0.05, 0.05, 0.05, 0.05, 0.8];
        for _ in 0..1000 {
            assert_eq!(sample(&mut rng, &probs, 1).unwrap(), 4);
        }
    }

    #[test]
    fn only_top_n_indices_are_drawn() {
        let mut rng = StdRng::seed_from_u64(1);
        let probs = [0.1, 0.3, 0.05, 0.25, 0.3];
        for _ in 0..2000 {
            let index = sample(&mut rng, &probs, 3).unwrap();
            assert!(matches!(index, 1 | 3 | 4));
        }
    }

    #[test]
    fn survivors_are_renormalized() {
        let weights = truncate_top_n(&[0.1, 0.2, 0.3, 0.4], 2).unwrap();
        assert_eq!(weights[0], 0.0);
        assert_eq!(weights[1], 0.0);
        assert!((weights[2] - 3.0 / 7.0).abs() < 1e-6);
        assert!((weights[3] - 4.0 / 7.0).abs() < 1e-6);
    }

    #[test]
    fn ties_at_the_cut_keep_the_higher_index() {
        let weights = truncate_top_n(&[0.25, 0.25, 0.25, 0.25], 2).unwrap();
        assert_eq!(weights, vec![0.0, 0.0, 0.5, 0.5]);
    }

    #[test]
    fn oversized_top_n_keeps_everything() {
        let weights = truncate_top_n(&[1.0, 3.0], 10).unwrap();
        assert_eq!(weights, vec![0.25, 0.75]);
    }

    #[test]
    fn all_zero_survivors_are_degenerate() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            sample(&mut rng, &[0.0, 0.0, 0.0], 2),
            Err(TextGenError::DegenerateDistribution(_))
        ));
    }

    #[test]
    fn zero_top_n_is_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(sample(&mut rng, &[0.5, 0.5], 0), Err(TextGenError::Config(_))));
    }

    #[test]
    fn long_run_frequencies_follow_the_truncated_distribution() {
        let mut rng = StdRng::seed_from_u64(1234);
        let probs = [0.0, 0.6, 0.1, 0.3];
        let mut counts = [0usize; 4];
        let draws = 20_000;
        for _ in 0..draws {
            counts[sample(&mut rng, &probs, 2).unwrap()] += 1;
        }
        assert_eq!(counts[0] + counts[2], 0);
        let share = counts[1] as f64 / draws as f64;
        assert!((share - 2.0 / 3.0).abs() < 0.02, "share {share}");
    }
}
