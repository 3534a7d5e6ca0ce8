use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::{check_pool, squared_distance, Clustering};
use crate::{BowErr, BowResult, Desc};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
/// Flat kernel mean shift parameters.
///
/// The number of visual words is not an input: it is the number of modes
/// left after merging, which depends on `bandwidth` and the data.
pub struct MeanShiftParams {
    /// Kernel radius. Points within this distance of the current mean are averaged.
    pub bandwidth: f32,
    /// Iteration cap per seed.
    pub max_iter: usize,
    /// Start from the centers of a grid with cell size `bandwidth` instead of
    /// from every descriptor. Much faster on large pools.
    pub bin_seeding: bool,
    /// With `bin_seeding`, only grid cells holding at least this many points become seeds.
    pub min_bin_freq: usize,
}

impl Default for MeanShiftParams {
    fn default() -> Self {
        Self {
            bandwidth: 2.,
            max_iter: 300,
            bin_seeding: false,
            min_bin_freq: 1,
        }
    }
}

impl MeanShiftParams {
    pub fn new(bandwidth: f32) -> Self {
        Self {
            bandwidth,
            ..Default::default()
        }
    }

    pub(crate) fn validate(&self) -> BowResult<()> {
        if !(self.bandwidth.is_finite() && self.bandwidth > 0.) {
            return Err(BowErr::InvalidConfig(format!(
                "bandwidth must be a positive number, got {}",
                self.bandwidth
            )));
        }
        if self.max_iter == 0 {
            return Err(BowErr::InvalidConfig("max_iter must be positive".into()));
        }
        Ok(())
    }

    fn seeds(&self, data: &[Desc]) -> Vec<Desc> {
        if !self.bin_seeding {
            return data.to_vec();
        }
        let mut bins: BTreeMap<Vec<i64>, usize> = BTreeMap::new();
        for d in data {
            let key = d.iter().map(|&v| (v / self.bandwidth).round() as i64).collect();
            *bins.entry(key).or_insert(0) += 1;
        }
        let seeds: Vec<Desc> = bins
            .into_iter()
            .filter(|(_, n)| *n >= self.min_bin_freq)
            .map(|(key, _)| key.iter().map(|&c| c as f32 * self.bandwidth).collect())
            .collect();
        if seeds.is_empty() {
            warn!(
                "No bin holds {} points, seeding from every descriptor instead",
                self.min_bin_freq
            );
            return data.to_vec();
        }
        seeds
    }

    /// Shift `seed` to the mean of its neighborhood until it stops moving.
    /// Returns the mode and the number of points in its final neighborhood,
    /// or `None` if the seed has no neighbors at all.
    fn climb(&self, data: &[Desc], seed: Desc) -> Option<(Desc, usize)> {
        let bw2 = self.bandwidth * self.bandwidth;
        let stop = 1e-3 * self.bandwidth;
        let dim = seed.len();
        let mut mean = seed;
        let mut support = 0;

        for _ in 0..self.max_iter {
            let mut sum = vec![0f64; dim];
            let mut count = 0usize;
            for x in data.iter().filter(|x| squared_distance(x, &mean) <= bw2) {
                count += 1;
                for (s, v) in sum.iter_mut().zip(x) {
                    *s += *v as f64;
                }
            }
            if count == 0 {
                break;
            }
            let next: Desc = sum.iter().map(|s| (s / count as f64) as f32).collect();
            let shift = squared_distance(&next, &mean).sqrt();
            mean = next;
            support = count;
            if shift <= stop {
                break;
            }
        }

        if support == 0 {
            None
        } else {
            Some((mean, support))
        }
    }
}

impl Clustering for MeanShiftParams {
    fn fit(&self, data: &[Desc]) -> BowResult<Vec<Desc>> {
        self.validate()?;
        check_pool(data)?;

        let seeds = self.seeds(data);
        info!(
            "Mean shift: {} descriptors, {} seeds, bandwidth {}",
            data.len(),
            seeds.len(),
            self.bandwidth
        );

        let mut modes: Vec<(Desc, usize)> = seeds
            .into_iter()
            .filter_map(|s| self.climb(data, s))
            .collect();
        if modes.is_empty() {
            return Err(BowErr::NoClusters {
                bandwidth: self.bandwidth,
            });
        }

        // Best supported modes first; stable sort keeps seed order among ties
        modes.sort_by(|a, b| b.1.cmp(&a.1));

        // A mode within one bandwidth of a better supported one is the same cluster
        let bw2 = self.bandwidth * self.bandwidth;
        let mut centers: Vec<Desc> = Vec::new();
        for (m, _) in modes {
            if centers.iter().all(|c| squared_distance(c, &m) > bw2) {
                centers.push(m);
            }
        }
        debug!("Mean shift kept {} modes", centers.len());
        Ok(centers)
    }
}
