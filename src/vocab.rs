use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::cluster::{check_pool, nearest, Clustering};
use crate::*;

#[derive(Serialize, Deserialize, PartialEq, Clone)]
/// Visual vocabulary learned from a pool of training descriptors. Can be:
/// 1. Created from descriptors with any clustering strategy.
/// 2. Saved to a file & loaded from a file (requires bincode feature, enabled by default).
/// 3. Used to assign descriptors to their nearest visual word, and to transform
///    a descriptor set into its BoW histogram.
///
/// A vocabulary is never modified after it is created. Train and test
/// encoding borrow the same instance.
pub struct Vocabulary {
    words: Vec<Desc>,
    dim: usize,
    cluster_size: Vec<usize>,
    requested_k: Option<usize>,
}

/// Vocabulary API
impl Vocabulary {
    /// Build a vocabulary by clustering the pooled training descriptors.
    ///
    /// The realized number of words is `len()`. It equals the requested k for
    /// k-means and is data dependent for mean shift.
    pub fn create<C>(features: &[Desc], clustering: &C) -> BowResult<Self>
    where
        C: Clustering + ?Sized,
    {
        let dim = check_pool(features)?;
        let words = clustering.fit(features)?;
        if words.is_empty() {
            return Err(BowErr::EmptyDescriptorPool);
        }

        let mut cluster_size = vec![0; words.len()];
        for f in features {
            cluster_size[nearest(&words, f).0] += 1;
        }

        let voc = Self {
            words,
            dim,
            cluster_size,
            requested_k: None,
        };
        info!("Created vocabulary: {:?}", voc);
        Ok(voc)
    }

    /// Same as `create`, remembering the k that was asked for.
    pub fn create_with_strategy(features: &[Desc], strategy: &ClusterStrategy) -> BowResult<Self> {
        let mut voc = Self::create(features, strategy)?;
        voc.requested_k = strategy.requested_k();
        Ok(voc)
    }

    /// Wrap precomputed centroids.
    pub fn from_words(words: Vec<Desc>) -> BowResult<Self> {
        let dim = check_pool(&words)?;
        Ok(Self {
            cluster_size: vec![0; words.len()],
            words,
            dim,
            requested_k: None,
        })
    }

    /// The assignment model: id of the word closest to `feature` (squared
    /// Euclidean distance, ties to the lowest id).
    pub fn assign(&self, feature: &[f32]) -> usize {
        nearest(&self.words, feature).0
    }

    /// Transform a set of descriptors into its bag of words representation:
    /// word occurrence counts divided by the number of descriptors.
    ///
    /// Returns `None` when `features` is empty, since no distribution exists.
    pub fn transform(&self, features: &[Desc]) -> BowResult<Option<BoW>> {
        if features.is_empty() {
            return Ok(None);
        }
        if self.words.is_empty() {
            return Err(BowErr::EmptyVocabulary);
        }
        let mut bow: BoW = vec![0.; self.words.len()];
        for feature in features {
            if feature.len() != self.dim {
                return Err(BowErr::DimensionMismatch {
                    expected: self.dim,
                    found: feature.len(),
                });
            }
            bow[self.assign(feature)] += 1.;
        }
        let inv_n = 1. / features.len() as f32;
        for w in bow.iter_mut() {
            *w *= inv_n;
        }
        Ok(Some(bow))
    }

    /// Number of visual words (K).
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Descriptor dimensionality the vocabulary was built for.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn words(&self) -> &[Desc] {
        &self.words
    }

    /// Number of training descriptors assigned to each word.
    pub fn cluster_sizes(&self) -> &[usize] {
        &self.cluster_size
    }

    /// Load a vocabulary from a file
    #[cfg(feature = "bincode")]
    pub fn load<P: AsRef<std::path::Path>>(file: P) -> BowResult<Self> {
        let voc: Self = crate::load_bincode(file)?;
        if voc.words.is_empty() {
            return Err(BowErr::EmptyVocabulary);
        }
        let dim = check_pool(&voc.words)?;
        if dim != voc.dim {
            return Err(BowErr::DimensionMismatch {
                expected: voc.dim,
                found: dim,
            });
        }
        Ok(voc)
    }

    /// Save vocabulary to a file
    #[cfg(feature = "bincode")]
    pub fn save<P: AsRef<std::path::Path>>(&self, file: P) -> BowResult<()> {
        crate::save_bincode(self, file)
    }
}

impl fmt::Debug for Vocabulary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sum = self.cluster_size.iter().sum::<usize>();
        let mean = if self.cluster_size.is_empty() {
            0
        } else {
            sum / self.cluster_size.len()
        };
        f.debug_struct("Vocabulary")
            .field("Words", &self.words.len())
            .field("Requested Words", &self.requested_k)
            .field("Descriptor Dim", &self.dim)
            .field("Total Training Features", &sum)
            .field(
                "Min Word Cluster Size",
                &self.cluster_size.iter().min().copied().unwrap_or(0),
            )
            .field(
                "Max Word Cluster Size",
                &self.cluster_size.iter().max().copied().unwrap_or(0),
            )
            .field("Mean Word Cluster Size", &mean)
            .finish()
    }
}
