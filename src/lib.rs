#[cfg(feature = "bincode")]
use std::path::Path;
use std::path::PathBuf;
use thiserror::Error;

/// Local feature extraction: keypoint detection and descriptor computation.
pub mod extract;
pub use extract::{DescriptorExtractor, DetectorParams, ExtractorMethod, Features, Keypoint};

/// Utilities for extracting keypoint descriptors using opencv.
pub mod opencv_utils;

/// Clustering strategies used to learn the visual vocabulary.
pub mod cluster;
pub use cluster::{ClusterStrategy, MeanShiftParams, MiniBatchParams};

/// Implementation of a visual bag-of-words vocabulary,
/// which provides the assignment model used by the encoder.
pub mod vocab;
pub use vocab::Vocabulary;

/// Histogram encoding of per-image descriptor sets.
pub mod bow;
pub use bow::{BoWTrait, EmptyImagePolicy, FeatureSet};

/// Loading labeled image trees from disk.
pub mod dataset;
pub use dataset::{Dataset, LabelEncoder, LabeledImage};

/// Run configuration.
pub mod config;
pub use config::PipelineConfig;

/// Extraction -> vocabulary -> encoding orchestration.
pub mod pipeline;
pub use pipeline::{FittedPipeline, Pipeline, PipelineOutput};

/// Real-valued keypoint descriptor.
///
/// Dimensionality depends on the extractor: 32 for ORB, 128 for gradient
/// histograms and SIFT, 64 for SURF. Every descriptor in a run has the same length.
pub type Desc = Vec<f32>;

/// Bag-of-Words representation of an image or descriptor set.
///
/// Index: word id in the vocabulary.
///
/// Value: fraction of the image's descriptors assigned to that word.
pub type BoW = Vec<f32>;

pub type BowResult<T> = std::result::Result<T, BowErr>;

#[derive(Error, Debug)]
pub enum BowErr {
    #[error("Io Error")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "bincode")]
    #[error("Serialization Error")]
    Bincode(#[from] bincode::Error),
    #[error("Image decode error")]
    Image(#[from] image::ImageError),
    #[error("Config parse error")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Feature matrix shape error")]
    Shape(#[from] ndarray::ShapeError),
    #[cfg(feature = "opencv")]
    #[error("Opencv Error")]
    OpenCvInternal(#[from] opencv::Error),
    #[cfg(feature = "opencv")]
    #[error("Opencv Descriptor decode error")]
    OpenCvDecode,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Extractor {0:?} is unavailable in this build")]
    ExtractorUnavailable(ExtractorMethod),
    #[error("No labeled images in {0}")]
    EmptyDataset(String),
    #[error("Class {0:?} was not seen during training")]
    UnknownLabel(String),
    #[error("No features detected in {0:?}")]
    NoFeaturesDetected(PathBuf),
    #[error("Descriptor pool is empty")]
    EmptyDescriptorPool,
    #[error("Requested {requested} clusters but only {distinct} distinct descriptors are available")]
    InsufficientDescriptors { requested: usize, distinct: usize },
    #[error("No descriptor was within bandwidth {bandwidth} of any seed")]
    NoClusters { bandwidth: f32 },
    #[error("Vocabulary has no words")]
    EmptyVocabulary,
    #[error("Descriptor dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
}

/// Serialize `value` next to `file` and rename it into place, so readers
/// never observe a half-written artifact.
#[cfg(feature = "bincode")]
pub(crate) fn save_bincode<T, P>(value: &T, file: P) -> BowResult<()>
where
    T: serde::Serialize,
    P: AsRef<Path>,
{
    write_atomic(&[(file.as_ref().to_path_buf(), bincode::serialize(value)?)])
}

/// Write every `(path, bytes)` pair to `<path>.partial`, then rename them all
/// into place once every write has succeeded. On failure the staged files
/// are removed. A target that is a directory is rejected before anything is written.
#[cfg(feature = "bincode")]
pub(crate) fn write_atomic(files: &[(PathBuf, Vec<u8>)]) -> BowResult<()> {
    if let Some((file, _)) = files.iter().find(|(file, _)| file.is_dir()) {
        return Err(BowErr::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} is a directory", file.display()),
        )));
    }

    let mut staged: Vec<(PathBuf, &Path)> = Vec::with_capacity(files.len());
    for (file, bytes) in files {
        let tmp = partial_path(file);
        let written = write_synced(&tmp, bytes);
        staged.push((tmp, file.as_path()));
        if let Err(e) = written {
            remove_staged(&staged);
            return Err(e.into());
        }
    }
    for (i, (tmp, file)) in staged.iter().enumerate() {
        if let Err(e) = std::fs::rename(tmp, file) {
            remove_staged(&staged[i..]);
            return Err(e.into());
        }
    }
    Ok(())
}

#[cfg(feature = "bincode")]
fn partial_path(file: &Path) -> PathBuf {
    let mut tmp = file.as_os_str().to_owned();
    tmp.push(".partial");
    PathBuf::from(tmp)
}

#[cfg(feature = "bincode")]
fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut f = std::fs::File::create(path)?;
    std::io::Write::write_all(&mut f, bytes)?;
    f.sync_all()
}

#[cfg(feature = "bincode")]
fn remove_staged(staged: &[(PathBuf, &Path)]) {
    for (tmp, _) in staged {
        let _ = std::fs::remove_file(tmp);
    }
}

#[cfg(feature = "bincode")]
pub(crate) fn load_bincode<T, P>(file: P) -> BowResult<T>
where
    T: serde::de::DeserializeOwned,
    P: AsRef<Path>,
{
    let mut file = std::fs::File::open(file)?;
    let mut buffer: Vec<u8> = Vec::new();
    std::io::Read::read_to_end(&mut file, &mut buffer)?;
    Ok(bincode::deserialize(&buffer)?)
}
