use image::{imageops::FilterType, GrayImage, ImageFormat};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::{BowErr, BowResult};

#[derive(Debug, Clone, PartialEq, Eq)]
/// An image file and the class it belongs to. Pixels are only read when
/// the image is about to be described.
pub struct LabeledImage {
    pub path: PathBuf,
    pub class: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
/// A labeled image collection, ordered by class name then file name.
pub struct Dataset {
    images: Vec<LabeledImage>,
}

impl Dataset {
    /// Read a tree with one subdirectory per class, each holding image files.
    /// Files whose extension is not a known image format are ignored.
    pub fn from_dir<P: AsRef<Path>>(root: P) -> BowResult<Self> {
        let root = root.as_ref();
        let mut images = Vec::new();
        for class_dir in sorted_entries(root)? {
            if !class_dir.is_dir() {
                continue;
            }
            let class = match class_dir.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            let before = images.len();
            for path in sorted_entries(&class_dir)? {
                if path.is_file() && ImageFormat::from_path(&path).is_ok() {
                    images.push(LabeledImage {
                        path,
                        class: class.clone(),
                    });
                }
            }
            debug!("Class {:?}: {} images", class, images.len() - before);
        }
        if images.is_empty() {
            return Err(BowErr::EmptyDataset(root.display().to_string()));
        }
        info!("Found {} images under {:?}", images.len(), root);
        Ok(Self { images })
    }

    pub fn from_images(images: Vec<LabeledImage>) -> Self {
        Self { images }
    }

    pub fn images(&self) -> &[LabeledImage] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Distinct class names, sorted.
    pub fn classes(&self) -> Vec<String> {
        self.images
            .iter()
            .map(|i| i.class.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Split every class into train and test parts. Each class is shuffled
    /// with a seeded RNG, the first `floor(n * (1 - train_ratio))` images go
    /// to test and the rest to train. Nothing is copied on disk.
    pub fn split(&self, train_ratio: f64, seed: u64) -> BowResult<(Dataset, Dataset)> {
        if !(train_ratio > 0. && train_ratio <= 1.) {
            return Err(BowErr::InvalidConfig(format!(
                "train_ratio must be in (0, 1], got {}",
                train_ratio
            )));
        }
        let mut by_class: BTreeMap<&str, Vec<&LabeledImage>> = BTreeMap::new();
        for img in &self.images {
            by_class.entry(img.class.as_str()).or_default().push(img);
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let (mut train, mut test) = (Vec::new(), Vec::new());
        for (class, mut imgs) in by_class {
            imgs.shuffle(&mut rng);
            let n_test = (imgs.len() as f64 * (1. - train_ratio)) as usize;
            info!(
                "Class {:?}: {} images, {} train, {} test",
                class,
                imgs.len(),
                imgs.len() - n_test,
                n_test
            );
            test.extend(imgs[..n_test].iter().map(|&i| i.clone()));
            train.extend(imgs[n_test..].iter().map(|&i| i.clone()));
        }
        Ok((Dataset::from_images(train), Dataset::from_images(test)))
    }
}

fn sorted_entries(dir: &Path) -> BowResult<Vec<PathBuf>> {
    let mut entries = dir
        .read_dir()?
        .map(|e| e.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort();
    Ok(entries)
}

/// Read an image, convert it to grayscale and resize it to exactly `size` (width, height).
pub fn load_gray<P: AsRef<Path>>(path: P, size: (u32, u32)) -> BowResult<GrayImage> {
    let gray = image::open(path)?.to_luma8();
    Ok(normalize(&gray, size))
}

/// Resize to the run's fixed dimensions. Aspect ratio is not preserved.
pub fn normalize(gray: &GrayImage, (w, h): (u32, u32)) -> GrayImage {
    if gray.dimensions() == (w, h) {
        return gray.clone();
    }
    image::imageops::resize(gray, w, h, FilterType::Triangle)
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
/// Maps class names to integer labels: the index of the name in sorted order.
///
/// Fitted once on the training classes and reused for the test split, so a
/// given class has the same label in both.
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    pub fn fit<I, S>(classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let classes: BTreeSet<String> = classes.into_iter().map(Into::into).collect();
        Self {
            classes: classes.into_iter().collect(),
        }
    }

    pub fn encode(&self, class: &str) -> BowResult<usize> {
        self.classes
            .binary_search_by(|c| c.as_str().cmp(class))
            .map_err(|_| BowErr::UnknownLabel(class.to_string()))
    }

    pub fn decode(&self, label: usize) -> Option<&str> {
        self.classes.get(label).map(String::as_str)
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use std::fs;

    fn write_tree(root: &Path, classes: &[(&str, usize)]) {
        for &(class, n) in classes {
            let dir = root.join(class);
            fs::create_dir_all(&dir).unwrap();
            for i in 0..n {
                GrayImage::from_pixel(10, 10, Luma([i as u8]))
                    .save(dir.join(format!("img_{:02}.png", i)))
                    .unwrap();
            }
            fs::write(dir.join("notes.txt"), "not an image").unwrap();
        }
    }

    #[test]
    fn loads_class_tree_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path(), &[("Orangutan", 2), ("Chimpanzee", 3)]);
        fs::write(dir.path().join("README"), "stray file").unwrap();

        let ds = Dataset::from_dir(dir.path()).unwrap();
        assert_eq!(ds.len(), 5);
        assert_eq!(ds.classes(), vec!["Chimpanzee", "Orangutan"]);
        assert_eq!(ds.images()[0].class, "Chimpanzee");
        assert!(ds.images()[0].path.ends_with("Chimpanzee/img_00.png"));
        assert_eq!(ds.images()[4].class, "Orangutan");
    }

    #[test]
    fn empty_tree_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("Amur Leopard")).unwrap();
        assert!(matches!(Dataset::from_dir(dir.path()), Err(BowErr::EmptyDataset(_))));
    }

    #[test]
    fn split_follows_ratio_per_class() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path(), &[("a", 10), ("b", 5)]);
        let ds = Dataset::from_dir(dir.path()).unwrap();

        let (train, test) = ds.split(0.6, 1).unwrap();
        assert_eq!(train.len() + test.len(), 15);
        let count = |d: &Dataset, c: &str| d.images().iter().filter(|i| i.class == c).count();
        assert_eq!((count(&train, "a"), count(&test, "a")), (6, 4));
        assert_eq!((count(&train, "b"), count(&test, "b")), (3, 2));
        for img in test.images() {
            assert!(!train.images().contains(img));
        }

        assert_eq!(ds.split(0.6, 1).unwrap(), (train, test));
        assert!(matches!(ds.split(0., 1), Err(BowErr::InvalidConfig(_))));
        assert!(matches!(ds.split(1.5, 1), Err(BowErr::InvalidConfig(_))));
    }

    #[test]
    fn load_gray_resizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rgb.png");
        image::RgbImage::from_pixel(40, 30, image::Rgb([255, 0, 0])).save(&path).unwrap();
        let gray = load_gray(&path, (20, 25)).unwrap();
        assert_eq!(gray.dimensions(), (20, 25));
    }

    #[test]
    fn undecodable_file_is_an_image_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        fs::write(&path, b"definitely not a png").unwrap();
        assert!(matches!(load_gray(&path, (8, 8)), Err(BowErr::Image(_))));
    }

    #[test]
    fn labels_follow_sorted_class_names() {
        let enc = LabelEncoder::fit(vec!["Orangutan", "Amur Leopard", "Chimpanzee", "Orangutan"]);
        assert_eq!(enc.len(), 3);
        assert_eq!(enc.encode("Amur Leopard").unwrap(), 0);
        assert_eq!(enc.encode("Chimpanzee").unwrap(), 1);
        assert_eq!(enc.encode("Orangutan").unwrap(), 2);
        assert_eq!(enc.decode(1), Some("Chimpanzee"));
        assert!(matches!(enc.encode("Tiger"), Err(BowErr::UnknownLabel(c)) if c == "Tiger"));
    }
}
