//! Temperature sampling over masked logits.

use ordered_float::OrderedFloat;
use rand::{
    Rng,
    distributions::{Distribution, WeightedIndex},
};

use super::LogitMask;
use crate::vocabulary::TokenId;

/// Sample a token from already masked `logits`.
///
/// A temperature of zero (or below) picks the highest logit, lowest id on
/// ties. Otherwise the logits are divided by the temperature and passed
/// through a softmax. When no allowed token has a finite logit the draw is
/// uniform over `mask`, and `None` is only returned for an empty mask.
pub fn sample<R: Rng>(
    logits: &[f32],
    mask: &LogitMask,
    temperature: f32,
    rng: &mut R,
) -> Option<TokenId> {
    let finite: Vec<(TokenId, f32)> = mask
        .allowed_ids()
        .iter()
        .filter_map(|&id| logits.get(id as usize).map(|&l| (id, l)))
        .filter(|(_, l)| l.is_finite())
        .collect();

    if finite.is_empty() {
        let allowed = mask.allowed_ids();
        if allowed.is_empty() {
            return None;
        }
        return Some(allowed[rng.gen_range(0..allowed.len())]);
    }

    if temperature <= 0.0 {
        return finite
            .iter()
            .rev()
            .max_by_key(|(_, l)| OrderedFloat(*l))
            .map(|(id, _)| *id);
    }

    let peak = finite
        .iter()
        .map(|(_, l)| OrderedFloat(*l))
        .max()
        .map_or(0.0, |p| p.0);
    let weights: Vec<f64> = finite
        .iter()
        .map(|(_, l)| (((l - peak) / temperature) as f64).exp())
        .collect();

    match WeightedIndex::new(&weights) {
        Ok(dist) => Some(finite[dist.sample(rng)].0),
        Err(_) => Some(finite[rng.gen_range(0..finite.len())].0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn test_greedy_picks_maximum() {
        let mask = LogitMask::new(4, vec![0, 2, 3]);
        let logits = [9.0, 1.0, 5.0, 5.0];
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(sample(&logits, &mask, 0.0, &mut rng), Some(0));

        let mask = LogitMask::new(4, vec![2, 3]);
        assert_eq!(sample(&logits, &mask, 0.0, &mut rng), Some(2));
    }

    /// Sampled tokens always come from the mask.
    #[test]
    fn test_samples_stay_in_mask() {
        let mask = LogitMask::new(8, vec![1, 5, 6]);
        let mut logits = vec![3.0; 8];
        mask.apply_to_logits(&mut logits);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let id = sample(&logits, &mask, 0.7, &mut rng).unwrap();
            assert!(mask.is_allowed(id));
        }
    }

    /// Allowed tokens without finite logits are still drawable.
    #[test]
    fn test_uniform_fallback() {
        let mask = LogitMask::new(3, vec![1, 2]);
        let logits = [0.0, f32::NEG_INFINITY, f32::NEG_INFINITY];
        let mut rng = StdRng::seed_from_u64(3);
        let id = sample(&logits, &mask, 1.0, &mut rng).unwrap();
        assert!(id == 1 || id == 2);
        assert_eq!(
            sample(&logits, &LogitMask::new(3, vec![]), 1.0, &mut rng),
            None
        );
    }

    /// A dominant logit wins almost every draw at low temperature.
    #[test]
    fn test_temperature_sharpens() {
        let mask = LogitMask::allow_all(2);
        let logits = [0.0, 4.0];
        let mut rng = StdRng::seed_from_u64(11);
        let hits = (0..500)
            .filter(|_| sample(&logits, &mask, 0.25, &mut rng) == Some(1))
            .count();
        assert!(hits > 490);
    }
}
