use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::*;

/// Provides method(s) for computing the similarity score between bow vectors.
pub trait BoWTrait {
    /// L1 score in [0, 1], 1 for identical histograms (Galvez, Eq 2).
    fn l1(&self, other: &Self) -> f32;
    /// L2 score in [0, 1] between the unit length versions of both vectors.
    fn l2(&self, other: &Self) -> f32;
}

impl BoWTrait for BoW {
    fn l1(&self, other: &Self) -> f32 {
        1. - 0.5
            * (self
                .iter()
                .zip(other)
                .fold(0., |a, (b, c)| a + (b - c).abs()))
    }

    fn l2(&self, other: &Self) -> f32 {
        let na = self.iter().map(|v| v * v).sum::<f32>().sqrt();
        let nb = other.iter().map(|v| v * v).sum::<f32>().sqrt();
        if na == 0. || nb == 0. {
            return 0.;
        }
        let d = self
            .iter()
            .zip(other)
            .map(|(a, b)| (a / na - b / nb).powi(2))
            .sum::<f32>()
            .sqrt();
        1. - 0.5 * d
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// What to do with an image that yielded no descriptors, whose histogram
/// would otherwise be 0 / 0.
pub enum EmptyImagePolicy {
    /// Abort the run with `BowErr::NoFeaturesDetected`.
    Fail,
    /// Drop the image: no row and no label.
    Skip,
    /// Emit an all-zero row and record its index in `FeatureSet::zero_rows`.
    ZeroFill,
}

impl Default for EmptyImagePolicy {
    fn default() -> Self {
        EmptyImagePolicy::Fail
    }
}

/// Descriptors of one image together with its class.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDescriptors {
    pub path: PathBuf,
    pub label: usize,
    pub descriptors: Vec<Desc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// Encoded split: one histogram row per image and a parallel label per row.
/// This is what gets handed to a classifier.
pub struct FeatureSet {
    /// `(images, K)` row-major matrix of histograms.
    pub matrix: Array2<f32>,
    /// Class index of each row.
    pub labels: Vec<usize>,
    /// Source image of each row.
    pub paths: Vec<PathBuf>,
    /// Rows written as all zeros under `EmptyImagePolicy::ZeroFill`.
    pub zero_rows: Vec<usize>,
}

impl FeatureSet {
    /// Encode every image against `voc`. The vocabulary is only read.
    pub fn encode(
        voc: &Vocabulary,
        images: &[ImageDescriptors],
        policy: EmptyImagePolicy,
    ) -> BowResult<Self> {
        let k = voc.len();
        let mut flat: Vec<f32> = Vec::with_capacity(images.len() * k);
        let mut labels = Vec::with_capacity(images.len());
        let mut paths = Vec::with_capacity(images.len());
        let mut zero_rows = Vec::new();

        for img in images {
            match (voc.transform(&img.descriptors)?, policy) {
                (Some(bow), _) => flat.extend(bow),
                (None, EmptyImagePolicy::Fail) => {
                    return Err(BowErr::NoFeaturesDetected(img.path.clone()));
                }
                (None, EmptyImagePolicy::Skip) => {
                    warn!("No features detected in {:?}, skipping image", img.path);
                    continue;
                }
                (None, EmptyImagePolicy::ZeroFill) => {
                    warn!("No features detected in {:?}, writing a zero histogram", img.path);
                    zero_rows.push(labels.len());
                    flat.extend(std::iter::repeat(0.).take(k));
                }
            }
            labels.push(img.label);
            paths.push(img.path.clone());
        }

        let matrix = Array2::from_shape_vec((labels.len(), k), flat)?;
        info!(
            "Encoded {} of {} images into {}-word histograms ({} zero filled)",
            labels.len(),
            images.len(),
            k,
            zero_rows.len()
        );
        Ok(Self {
            matrix,
            labels,
            paths,
            zero_rows,
        })
    }

    /// Number of encoded images.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Histogram length, the vocabulary size K.
    pub fn num_words(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn histogram(&self, row: usize) -> ArrayView1<'_, f32> {
        self.matrix.row(row)
    }

    #[cfg(feature = "bincode")]
    pub fn load<P: AsRef<std::path::Path>>(file: P) -> BowResult<Self> {
        crate::load_bincode(file)
    }

    #[cfg(feature = "bincode")]
    pub fn save<P: AsRef<std::path::Path>>(&self, file: P) -> BowResult<()> {
        crate::save_bincode(self, file)
    }
}
