use tracing::{debug, info, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::bow::ImageDescriptors;
use crate::dataset::load_gray;
use crate::*;

/// Extraction, vocabulary learning and encoding of one run.
///
/// The extractor is built once and used for every image of both splits.
pub struct Pipeline {
    extractor: Box<dyn DescriptorExtractor>,
    strategy: ClusterStrategy,
    image_size: (u32, u32),
    policy: EmptyImagePolicy,
}

/// A pipeline whose vocabulary has been learned. It only reads the
/// vocabulary from here on, so any number of splits can be encoded with it.
pub struct FittedPipeline {
    extractor: Box<dyn DescriptorExtractor>,
    vocabulary: Vocabulary,
    labels: LabelEncoder,
    image_size: (u32, u32),
    policy: EmptyImagePolicy,
}

#[derive(Debug, Clone, PartialEq)]
/// Everything a run produces.
pub struct PipelineOutput {
    pub vocabulary: Vocabulary,
    pub labels: LabelEncoder,
    pub train: FeatureSet,
    pub test: FeatureSet,
}

impl Pipeline {
    /// Build the pipeline described by `config`. Fails before reading any
    /// image if the extractor is not available or a parameter is invalid.
    pub fn new(config: &PipelineConfig) -> BowResult<Self> {
        config.validate_params()?;
        let extractor = config.extractor.build(&config.detector)?;
        Ok(Self::with_extractor(
            extractor,
            config.clustering.clone().with_seed(config.seed),
            config.image_size(),
            config.empty_image_policy,
        ))
    }

    /// Use a custom extractor.
    pub fn with_extractor(
        extractor: Box<dyn DescriptorExtractor>,
        strategy: ClusterStrategy,
        image_size: (u32, u32),
        policy: EmptyImagePolicy,
    ) -> Self {
        Self {
            extractor,
            strategy,
            image_size,
            policy,
        }
    }

    /// Learn the vocabulary from `train` and encode `train` with it.
    pub fn fit(self, train: &Dataset) -> BowResult<(FittedPipeline, FeatureSet)> {
        if train.is_empty() {
            return Err(BowErr::EmptyDataset("the training split".into()));
        }
        let labels = LabelEncoder::fit(train.classes());
        let strategy = self.strategy.resolve_k(labels.len());
        strategy.validate()?;

        info!(
            "Extracting {} descriptors from {} training images ({} classes)",
            self.extractor.method(),
            train.len(),
            labels.len()
        );
        let mut images = extract_dataset(&*self.extractor, self.image_size, train, &labels)?;
        if self.policy == EmptyImagePolicy::Fail {
            if let Some(img) = images.iter().find(|i| i.descriptors.is_empty()) {
                return Err(BowErr::NoFeaturesDetected(img.path.clone()));
            }
        }

        let (pool, counts) = pool_descriptors(&mut images);
        info!(
            "Clustering {} descriptors with {} (requested words: {:?})",
            pool.len(),
            strategy.name(),
            strategy.requested_k()
        );
        let vocabulary = Vocabulary::create_with_strategy(&pool, &strategy)?;
        unpool_descriptors(&mut images, pool, counts);

        let fitted = FittedPipeline {
            extractor: self.extractor,
            vocabulary,
            labels,
            image_size: self.image_size,
            policy: self.policy,
        };
        let features = FeatureSet::encode(&fitted.vocabulary, &images, fitted.policy)?;
        Ok((fitted, features))
    }

    /// Fit on `train`, then encode `test` with the same vocabulary.
    pub fn run(self, train: &Dataset, test: &Dataset) -> BowResult<PipelineOutput> {
        if test.is_empty() {
            return Err(BowErr::EmptyDataset("the test split".into()));
        }
        // Test classes unknown to the training split fail before any image is read
        let labels = LabelEncoder::fit(train.classes());
        for class in test.classes() {
            labels.encode(&class)?;
        }
        let (fitted, train) = self.fit(train)?;
        let test = fitted.encode(test)?;
        info!(
            "Pipeline done: {} words, {} train rows, {} test rows",
            fitted.vocabulary.len(),
            train.len(),
            test.len()
        );
        Ok(PipelineOutput {
            vocabulary: fitted.vocabulary,
            labels: fitted.labels,
            train,
            test,
        })
    }
}

impl FittedPipeline {
    /// Encode a split. Every class in it must have been seen during training.
    pub fn encode(&self, dataset: &Dataset) -> BowResult<FeatureSet> {
        if dataset.is_empty() {
            return Err(BowErr::EmptyDataset("the split to encode".into()));
        }
        info!("Encoding {} images", dataset.len());
        let images = extract_dataset(&*self.extractor, self.image_size, dataset, &self.labels)?;
        FeatureSet::encode(&self.vocabulary, &images, self.policy)
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn labels(&self) -> &LabelEncoder {
        &self.labels
    }

    pub fn extractor_method(&self) -> ExtractorMethod {
        self.extractor.method()
    }
}

impl PipelineOutput {
    /// Write `vocabulary.voc`, `train.features`, `test.features` and
    /// `labels.yaml` into `dir`, creating it if needed.
    #[cfg(feature = "bincode")]
    pub fn save<P: AsRef<std::path::Path>>(&self, dir: P) -> BowResult<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        // All four files are replaced together or not at all
        crate::write_atomic(&[
            (dir.join("vocabulary.voc"), bincode::serialize(&self.vocabulary)?),
            (dir.join("train.features"), bincode::serialize(&self.train)?),
            (dir.join("test.features"), bincode::serialize(&self.test)?),
            (dir.join("labels.yaml"), serde_yaml::to_string(&self.labels)?.into_bytes()),
        ])?;
        info!("Saved vocabulary and features to {:?}", dir);
        Ok(())
    }
}

/// Describe every image of `dataset`, in dataset order.
///
/// Images that cannot be decoded are skipped with a warning; IO errors abort.
/// Images without keypoints are kept with no descriptors; the encoder applies
/// the policy.
fn extract_dataset(
    extractor: &dyn DescriptorExtractor,
    size: (u32, u32),
    dataset: &Dataset,
    labels: &LabelEncoder,
) -> BowResult<Vec<ImageDescriptors>> {
    // Unknown classes fail before any image is read
    for class in dataset.classes() {
        labels.encode(&class)?;
    }
    let expected = extractor.descriptor_len();

    let describe = |img: &LabeledImage| -> BowResult<Option<ImageDescriptors>> {
        let gray = match load_gray(&img.path, size) {
            Ok(gray) => gray,
            Err(BowErr::Image(image::ImageError::IoError(e))) => return Err(BowErr::Io(e)),
            Err(BowErr::Image(e)) => {
                warn!("Skipping unreadable image {:?}: {}", img.path, e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let features = extractor.extract(&gray)?;
        if let Some(bad) = features.descriptors.iter().find(|d| d.len() != expected) {
            return Err(BowErr::DimensionMismatch {
                expected,
                found: bad.len(),
            });
        }
        debug!("{:?}: {} descriptors", img.path, features.len());
        Ok(Some(ImageDescriptors {
            path: img.path.clone(),
            label: labels.encode(&img.class)?,
            descriptors: features.descriptors,
        }))
    };

    #[cfg(feature = "parallel")]
    let described: Vec<_> = dataset.images().par_iter().map(describe).collect();
    #[cfg(not(feature = "parallel"))]
    let described: Vec<_> = dataset.images().iter().map(describe).collect();

    let images = described
        .into_iter()
        .filter_map(Result::transpose)
        .collect::<BowResult<Vec<_>>>()?;
    info!(
        "Extracted {} descriptors from {} images",
        images.iter().map(|i| i.descriptors.len()).sum::<usize>(),
        images.len()
    );
    Ok(images)
}

/// Move every image's descriptors into one pool. Returns the pool and the
/// per-image counts needed to give them back.
fn pool_descriptors(images: &mut [ImageDescriptors]) -> (Vec<Desc>, Vec<usize>) {
    let counts = images.iter().map(|i| i.descriptors.len()).collect();
    let pool = images
        .iter_mut()
        .flat_map(|i| i.descriptors.drain(..))
        .collect();
    (pool, counts)
}

fn unpool_descriptors(images: &mut [ImageDescriptors], mut pool: Vec<Desc>, counts: Vec<usize>) {
    for (img, n) in images.iter_mut().zip(counts).rev() {
        img.descriptors = pool.split_off(pool.len() - n);
    }
}
