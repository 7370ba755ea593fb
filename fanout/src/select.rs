// Copyright 2026 Fanout contributors

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

/// Pick an index at random, weighting each index by `weights[i]`.
///
/// Weights are idle-connection counts, used as a proxy for spare capacity:
/// a host with more cached connections is proportionally more likely to be
/// chosen. When every weight is zero the choice is uniform. Returns `None`
/// only for an empty slice.
pub fn weighted_index<R>(weights: &[usize], rng: &mut R) -> Option<usize>
where
    R: Rng + ?Sized,
{
    if weights.is_empty() {
        return None;
    }
    match WeightedIndex::new(weights) {
        Ok(dist) => Some(dist.sample(rng)),
        Err(_) => Some(rng.gen_range(0..weights.len())),
    }
}
