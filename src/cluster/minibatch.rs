use rand::{rngs::StdRng, seq::index, Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{check_pool, count_distinct, nearest, squared_distance, Clustering};
use crate::{BowErr, BowResult, Desc};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
/// Mini-batch k-means parameters.
///
/// Centers are updated from small random batches with a per-center learning
/// rate of `1 / count`, so memory stays bounded by `k * dim` plus one batch
/// no matter how large the descriptor pool is.
pub struct MiniBatchParams {
    /// Number of visual words. `None` means `10 * classes`, resolved by the pipeline.
    pub k: Option<usize>,
    /// Samples per batch. Defaults to `ceil(n / 50)`.
    pub batch_size: Option<usize>,
    /// Maximum number of passes over the pool.
    pub max_iter: usize,
    /// Stop when the smoothed batch inertia has not improved for this many batches.
    pub max_no_improvement: usize,
    /// Stop when no center moves further than this (squared distance). 0 disables.
    pub tol: f32,
    /// RNG seed. Unseeded runs are not reproducible.
    pub seed: Option<u64>,
}

impl Default for MiniBatchParams {
    fn default() -> Self {
        Self {
            k: None,
            batch_size: None,
            max_iter: 100,
            max_no_improvement: 10,
            tol: 0.,
            seed: None,
        }
    }
}

impl MiniBatchParams {
    pub fn new(k: usize) -> Self {
        Self {
            k: Some(k),
            ..Default::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub(crate) fn validate(&self) -> BowResult<()> {
        match self.k {
            Some(0) => Err(BowErr::InvalidConfig("k must be positive".into())),
            None => Err(BowErr::InvalidConfig("k was not resolved before clustering".into())),
            Some(_) if self.batch_size == Some(0) => {
                Err(BowErr::InvalidConfig("batch_size must be positive".into()))
            }
            Some(_) if self.max_iter == 0 => Err(BowErr::InvalidConfig("max_iter must be positive".into())),
            Some(_) => Ok(()),
        }
    }

    fn rng(&self) -> Box<dyn RngCore> {
        match self.seed {
            Some(s) => Box::new(StdRng::seed_from_u64(s)),
            None => Box::new(rand::thread_rng()),
        }
    }
}

impl Clustering for MiniBatchParams {
    fn fit(&self, data: &[Desc]) -> BowResult<Vec<Desc>> {
        self.fit_batches(data).map(|(centers, _)| centers)
    }
}

impl MiniBatchParams {
    /// Fit and also return the number of batches processed.
    fn fit_batches(&self, data: &[Desc]) -> BowResult<(Vec<Desc>, usize)> {
        self.validate()?;
        check_pool(data)?;
        let n = data.len();
        let k = self.k.unwrap_or_default();

        let distinct = count_distinct(data, k);
        if distinct < k {
            return Err(BowErr::InsufficientDescriptors {
                requested: k,
                distinct,
            });
        }

        let batch = self
            .batch_size
            .unwrap_or_else(|| (n + 49) / 50)
            .max(1)
            .min(n);
        let mut rng = self.rng();

        // k-means++ on a random subsample, or on everything if the sample is too uniform
        let init_size = (3 * batch).max(3 * k).min(n);
        let sample: Vec<&Desc> = index::sample(&mut rng, n, init_size)
            .into_iter()
            .map(|i| &data[i])
            .collect();
        let mut centers = if count_distinct(sample.iter().copied(), k) >= k {
            kmeans_pp(&sample, k, &mut rng)
        } else {
            kmeans_pp(&data.iter().collect::<Vec<_>>(), k, &mut rng)
        };
        if centers.len() < k {
            return Err(BowErr::InsufficientDescriptors {
                requested: k,
                distinct: centers.len(),
            });
        }

        info!(
            "Mini-batch k-means: {} descriptors, k = {}, batch size {}",
            n, k, batch
        );

        let steps = (self.max_iter * n + batch - 1) / batch;
        let alpha = (2. * batch as f64 / (n as f64 + 1.)).min(1.);
        let mut counts = vec![0usize; k];
        let mut ewa_inertia: Option<f64> = None;
        let mut best_inertia = f64::INFINITY;
        let mut no_improvement = 0;
        let mut batches = 0;

        for step in 0..steps {
            batches = step + 1;
            let old_centers = if self.tol > 0. { Some(centers.clone()) } else { None };
            let mut inertia = 0f64;
            for _ in 0..batch {
                let x = &data[rng.gen_range(0..n)];
                let (c, d) = nearest(&centers, x);
                inertia += d as f64;
                counts[c] += 1;
                let lr = 1. / counts[c] as f32;
                for (cj, xj) in centers[c].iter_mut().zip(x) {
                    *cj += lr * (xj - *cj);
                }
            }
            inertia /= batch as f64;

            if let Some(old) = old_centers {
                let shift = old
                    .iter()
                    .zip(&centers)
                    .map(|(a, b)| squared_distance(a, b))
                    .fold(0f32, f32::max);
                if shift <= self.tol {
                    debug!("Converged on center shift at step {}/{}", step + 1, steps);
                    break;
                }
            }

            let ewa = match ewa_inertia {
                Some(prev) => prev * (1. - alpha) + inertia * alpha,
                None => inertia,
            };
            ewa_inertia = Some(ewa);
            if ewa < best_inertia {
                best_inertia = ewa;
                no_improvement = 0;
            } else {
                no_improvement += 1;
                if no_improvement >= self.max_no_improvement {
                    debug!(
                        "No inertia improvement for {} batches, stopping at step {}/{}",
                        no_improvement,
                        step + 1,
                        steps
                    );
                    break;
                }
            }
        }

        Ok((centers, batches))
    }
}

/// k-means++ seeding: each new center is drawn with probability proportional
/// to its squared distance from the closest center chosen so far.
/// Points already covered (distance 0) are never drawn twice.
fn kmeans_pp<R: Rng + ?Sized>(points: &[&Desc], k: usize, rng: &mut R) -> Vec<Desc> {
    let mut centers: Vec<Desc> = Vec::with_capacity(k);
    if points.is_empty() || k == 0 {
        return centers;
    }
    centers.push(points[rng.gen_range(0..points.len())].clone());
    let mut dist: Vec<f32> = points.iter().map(|p| squared_distance(p, &centers[0])).collect();

    while centers.len() < k {
        let total: f64 = dist.iter().map(|&d| d as f64).sum();
        if total <= 0. {
            break;
        }
        let threshold = rng.gen::<f64>() * total;
        let mut cumsum = 0f64;
        let mut chosen = None;
        for (j, &d) in dist.iter().enumerate() {
            if d <= 0. {
                continue;
            }
            cumsum += d as f64;
            chosen = Some(j);
            if cumsum >= threshold {
                break;
            }
        }
        let j = match chosen {
            Some(j) => j,
            None => break,
        };
        let c = points[j].clone();
        for (dj, p) in dist.iter_mut().zip(points) {
            *dj = dj.min(squared_distance(p, &c));
        }
        centers.push(c);
    }
    centers
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Three tight, well separated blobs in 2D.
    fn blobs(per_blob: usize) -> Vec<Desc> {
        let mut rng = StdRng::seed_from_u64(7);
        let mut data = Vec::new();
        for &(cx, cy) in [(0f32, 0f32), (50., 50.), (-50., 40.)].iter() {
            for _ in 0..per_blob {
                data.push(vec![cx + rng.gen_range(-1.0f32..1.0), cy + rng.gen_range(-1.0f32..1.0)]);
            }
        }
        data
    }

    #[test]
    fn finds_separated_blobs() {
        let data = blobs(200);
        let centers = MiniBatchParams::new(3).with_seed(1).fit(&data).unwrap();
        assert_eq!(centers.len(), 3);
        for &(cx, cy) in [(0f32, 0f32), (50., 50.), (-50., 40.)].iter() {
            let (_, d) = nearest(&centers, &[cx, cy]);
            assert!(d < 4., "no center near ({}, {}): {:?}", cx, cy, centers);
        }
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let data = blobs(100);
        let p = MiniBatchParams::new(5).with_seed(99);
        assert_eq!(p.fit(&data).unwrap(), p.fit(&data).unwrap());
    }

    #[test]
    fn k_equal_to_distinct_points() {
        let data = vec![vec![0., 0.], vec![1., 0.], vec![0., 1.], vec![1., 0.]];
        let mut centers = MiniBatchParams::new(3).with_seed(3).fit(&data).unwrap();
        assert_eq!(centers.len(), 3);
        centers.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(centers, vec![vec![0., 0.], vec![0., 1.], vec![1., 0.]]);
    }

    #[test]
    fn too_few_distinct_points() {
        let data = vec![vec![1., 1.]; 50];
        match MiniBatchParams::new(2).with_seed(0).fit(&data) {
            Err(BowErr::InsufficientDescriptors { requested, distinct }) => {
                assert_eq!((requested, distinct), (2, 1));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rejects_bad_params() {
        let data = blobs(10);
        assert!(matches!(MiniBatchParams::new(0).fit(&data), Err(BowErr::InvalidConfig(_))));
        assert!(matches!(MiniBatchParams::default().fit(&data), Err(BowErr::InvalidConfig(_))));
        assert!(matches!(
            MiniBatchParams::new(2).with_batch_size(0).fit(&data),
            Err(BowErr::InvalidConfig(_))
        ));
        assert!(matches!(MiniBatchParams::new(2).fit(&[]), Err(BowErr::EmptyDescriptorPool)));
    }

    #[test]
    fn center_shift_tolerance_stops_early() {
        let data = blobs(200);
        let patient = MiniBatchParams {
            max_iter: 5,
            max_no_improvement: usize::MAX,
            ..MiniBatchParams::new(3).with_seed(2)
        };
        let (_, all) = patient.fit_batches(&data).unwrap();
        assert_eq!(all, 5 * 50);

        // Any shift is below this tolerance, so the first batch ends the fit
        let loose = MiniBatchParams {
            tol: f32::MAX,
            ..patient.clone()
        };
        let (centers, batches) = loose.fit_batches(&data).unwrap();
        assert_eq!(batches, 1);
        assert_eq!(centers.len(), 3);
    }

    #[test]
    fn kmeans_pp_never_repeats_a_point() {
        let data = vec![vec![0.], vec![0.], vec![5.], vec![9.]];
        let refs: Vec<&Desc> = data.iter().collect();
        let mut rng = StdRng::seed_from_u64(11);
        let mut centers = kmeans_pp(&refs, 3, &mut rng);
        centers.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(centers, vec![vec![0.], vec![5.], vec![9.]]);
    }
}
