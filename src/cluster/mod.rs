use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::{BowErr, BowResult, Desc};

/// Mini-batch k-means (partition-count clustering).
pub mod minibatch;
pub use minibatch::MiniBatchParams;

/// Flat kernel mean shift (bandwidth clustering).
pub mod mean_shift;
pub use mean_shift::MeanShiftParams;

/// A clustering algorithm that turns a pool of descriptors into visual words.
pub trait Clustering {
    /// Fit on the pooled descriptors and return the cluster centers, in word id order.
    fn fit(&self, data: &[Desc]) -> BowResult<Vec<Desc>>;
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "strategy", rename_all = "snake_case")]
/// How the vocabulary is learned.
///
/// With `MiniBatchKMeans` the vocabulary has exactly `k` words. With
/// `MeanShift` the number of words is whatever the bandwidth produces;
/// always read it back from `Vocabulary::len`.
pub enum ClusterStrategy {
    MiniBatchKMeans(MiniBatchParams),
    MeanShift(MeanShiftParams),
}

impl ClusterStrategy {
    /// Fill in an unset k with the `10 * classes` rule of thumb.
    pub fn resolve_k(self, num_classes: usize) -> Self {
        match self {
            ClusterStrategy::MiniBatchKMeans(mut p) => {
                if p.k.is_none() {
                    p.k = Some(10 * num_classes);
                }
                ClusterStrategy::MiniBatchKMeans(p)
            }
            other => other,
        }
    }

    /// Seed the strategy if it is randomized and not seeded yet.
    pub fn with_seed(self, seed: u64) -> Self {
        match self {
            ClusterStrategy::MiniBatchKMeans(mut p) => {
                p.seed.get_or_insert(seed);
                ClusterStrategy::MiniBatchKMeans(p)
            }
            other => other,
        }
    }

    /// Parameter checks that do not need any data.
    pub fn validate(&self) -> BowResult<()> {
        match self {
            ClusterStrategy::MiniBatchKMeans(p) => p.validate(),
            ClusterStrategy::MeanShift(p) => p.validate(),
        }
    }

    /// Requested number of words, if the strategy takes one.
    pub fn requested_k(&self) -> Option<usize> {
        match self {
            ClusterStrategy::MiniBatchKMeans(p) => p.k,
            ClusterStrategy::MeanShift(_) => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClusterStrategy::MiniBatchKMeans(_) => "MiniBatch K-Means",
            ClusterStrategy::MeanShift(_) => "MeanShift",
        }
    }
}

impl Default for ClusterStrategy {
    fn default() -> Self {
        ClusterStrategy::MiniBatchKMeans(MiniBatchParams::default())
    }
}

impl Clustering for ClusterStrategy {
    fn fit(&self, data: &[Desc]) -> BowResult<Vec<Desc>> {
        self.validate()?;
        match self {
            ClusterStrategy::MiniBatchKMeans(p) => p.fit(data),
            ClusterStrategy::MeanShift(p) => p.fit(data),
        }
    }
}

#[inline]
/// Squared Euclidean distance between two descriptors.
pub fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Index of and squared distance to the closest center. Ties go to the lowest index.
pub fn nearest(centers: &[Desc], x: &[f32]) -> (usize, f32) {
    let mut best = (0, f32::INFINITY);
    for (i, c) in centers.iter().enumerate() {
        let d = squared_distance(c, x);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

/// Check a descriptor pool is non-empty and uniformly sized. Returns the dimension.
pub(crate) fn check_pool(data: &[Desc]) -> BowResult<usize> {
    let dim = match data.first() {
        Some(d) => d.len(),
        None => return Err(BowErr::EmptyDescriptorPool),
    };
    if let Some(bad) = data.iter().find(|d| d.len() != dim) {
        return Err(BowErr::DimensionMismatch {
            expected: dim,
            found: bad.len(),
        });
    }
    Ok(dim)
}

/// Number of distinct descriptors, counting stops at `limit`.
pub(crate) fn count_distinct<'a, I>(data: I, limit: usize) -> usize
where
    I: IntoIterator<Item = &'a Desc>,
{
    let mut seen: HashSet<Vec<u32>> = HashSet::new();
    for d in data {
        // +0.0 and -0.0 are the same point
        seen.insert(d.iter().map(|&v| if v == 0. { 0 } else { v.to_bits() }).collect());
        if seen.len() >= limit {
            break;
        }
    }
    seen.len()
}
