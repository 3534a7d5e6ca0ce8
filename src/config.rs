use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::*;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
/// Everything a run needs, usually read from a YAML file:
///
/// ```yaml
/// data_dir: data/animals
/// train_ratio: 0.6
/// extractor: orb
/// clustering:
///   strategy: mini_batch_k_means
/// image_size: [200, 200]
/// empty_image_policy: skip
/// seed: 7
/// output_dir: out
/// ```
pub struct PipelineConfig {
    /// Class-per-directory tree to split into train and test.
    pub data_dir: Option<PathBuf>,
    /// Fraction of each class used for training when splitting `data_dir`.
    pub train_ratio: f64,
    /// Pre-split trees, used when `data_dir` is not set.
    pub train_dir: Option<PathBuf>,
    pub test_dir: Option<PathBuf>,
    pub extractor: ExtractorMethod,
    pub detector: DetectorParams,
    pub clustering: ClusterStrategy,
    /// Every image is resized to this (width, height) before extraction.
    pub image_size: [u32; 2],
    pub empty_image_policy: EmptyImagePolicy,
    /// Seeds the split and any unseeded clustering strategy.
    pub seed: u64,
    /// Where `run-pipeline` writes the vocabulary and feature sets.
    pub output_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            train_ratio: 0.6,
            train_dir: None,
            test_dir: None,
            extractor: ExtractorMethod::Orb,
            detector: DetectorParams::default(),
            clustering: ClusterStrategy::default(),
            image_size: [200, 200],
            empty_image_policy: EmptyImagePolicy::default(),
            seed: 0,
            output_dir: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml(yaml: &str) -> BowResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> BowResult<Self> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    /// Reject configurations that cannot run, before touching any image.
    pub fn validate(&self) -> BowResult<()> {
        self.validate_params()?;
        match (&self.data_dir, &self.train_dir, &self.test_dir) {
            (Some(_), None, None) => {
                if !(self.train_ratio > 0. && self.train_ratio < 1.) {
                    return Err(BowErr::InvalidConfig(format!(
                        "train_ratio must be in (0, 1), got {}",
                        self.train_ratio
                    )));
                }
                Ok(())
            }
            (None, Some(_), Some(_)) => Ok(()),
            _ => Err(BowErr::InvalidConfig(
                "set either data_dir, or both train_dir and test_dir".into(),
            )),
        }
    }

    /// Checks on everything except the data source.
    pub fn validate_params(&self) -> BowResult<()> {
        if self.image_size.iter().any(|&s| s == 0) {
            return Err(BowErr::InvalidConfig(format!(
                "image_size must be positive, got {:?}",
                self.image_size
            )));
        }
        if self.detector.max_features == 0 {
            return Err(BowErr::InvalidConfig("max_features must be positive".into()));
        }
        // An unset k is filled in from the class count later; any placeholder checks the rest
        self.clustering.clone().resolve_k(1).validate()
    }

    pub fn image_size(&self) -> (u32, u32) {
        (self.image_size[0], self.image_size[1])
    }

    /// Load the train and test datasets this configuration points at.
    pub fn load_datasets(&self) -> BowResult<(Dataset, Dataset)> {
        self.validate()?;
        match (&self.data_dir, &self.train_dir, &self.test_dir) {
            (Some(data), _, _) => Dataset::from_dir(data)?.split(self.train_ratio, self.seed),
            (None, Some(train), Some(test)) => Ok((Dataset::from_dir(train)?, Dataset::from_dir(test)?)),
            _ => Err(BowErr::InvalidConfig("no data source configured".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let yaml = "
data_dir: data/animals
train_ratio: 0.7
extractor: hog
detector:
  fast_threshold: 30
clustering:
  strategy: mini_batch_k_means
  k: 40
  seed: 3
image_size: [128, 96]
empty_image_policy: zero_fill
seed: 11
";
        let c = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(c.data_dir, Some(PathBuf::from("data/animals")));
        assert_eq!(c.train_ratio, 0.7);
        assert_eq!(c.extractor, ExtractorMethod::Hog);
        assert_eq!(c.detector.fast_threshold, 30);
        assert_eq!(c.detector.max_features, 500);
        assert_eq!(c.clustering.requested_k(), Some(40));
        assert_eq!(c.image_size(), (128, 96));
        assert_eq!(c.empty_image_policy, EmptyImagePolicy::ZeroFill);
        assert_eq!(c.seed, 11);
    }

    #[test]
    fn defaults_follow_the_reference_setup() {
        let c = PipelineConfig::from_yaml("train_dir: tr\ntest_dir: te\n").unwrap();
        assert_eq!(c.image_size(), (200, 200));
        assert_eq!(c.extractor, ExtractorMethod::Orb);
        assert_eq!(c.clustering.requested_k(), None);
        assert_eq!(c.empty_image_policy, EmptyImagePolicy::Fail);
    }

    #[test]
    fn rejects_invalid_configs() {
        let bad = [
            "data_dir: d\nimage_size: [0, 10]\n",
            "data_dir: d\ntrain_ratio: 1.0\n",
            "data_dir: d\nclustering:\n  strategy: mini_batch_k_means\n  k: 0\n",
            "data_dir: d\nclustering:\n  strategy: mean_shift\n  bandwidth: -2\n",
            "train_dir: only_train\n",
            "data_dir: d\ntrain_dir: t\ntest_dir: u\n",
        ];
        for yaml in bad.iter() {
            assert!(
                matches!(PipelineConfig::from_yaml(yaml), Err(BowErr::InvalidConfig(_))),
                "accepted {:?}",
                yaml
            );
        }
    }

    #[test]
    fn unknown_extractor_is_a_parse_error() {
        assert!(matches!(
            PipelineConfig::from_yaml("data_dir: d\nextractor: freak\n"),
            Err(BowErr::Yaml(_))
        ));
    }
}
