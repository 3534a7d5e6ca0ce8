use image::GrayImage;
use imageproc::corners::{corners_fast9, Corner};
use imageproc::suppress::local_maxima;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{BowErr, BowResult, Desc};

/// Oriented BRIEF descriptors on FAST corners.
pub mod orb;
pub use orb::OrbExtractor;

/// Gradient orientation histograms on FAST corners.
pub mod hog;
pub use hog::HogExtractor;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
/// Keypoint descriptor family. Chosen once per run; train and test
/// images always go through the same extractor.
pub enum ExtractorMethod {
    /// OpenCV SIFT (requires the `opencv` feature).
    Sift,
    /// FAST + steered BRIEF, 32 byte descriptors exposed as 32 reals.
    Orb,
    /// OpenCV SURF (requires the `nonfree` feature and a non-free OpenCV build).
    Surf,
    /// FAST + 4x4x8 gradient orientation histogram, 128 reals.
    Hog,
}

impl ExtractorMethod {
    /// Length of every descriptor produced by this method.
    pub fn descriptor_len(self) -> usize {
        match self {
            ExtractorMethod::Sift | ExtractorMethod::Hog => 128,
            ExtractorMethod::Orb => orb::ORB_DESC_BYTES,
            ExtractorMethod::Surf => 64,
        }
    }

    /// Resolve the method into an extractor. Fails fast if the backing
    /// implementation was not compiled in.
    pub fn build(self, params: &DetectorParams) -> BowResult<Box<dyn DescriptorExtractor>> {
        match self {
            ExtractorMethod::Orb => Ok(Box::new(OrbExtractor::new(params.clone()))),
            ExtractorMethod::Hog => Ok(Box::new(HogExtractor::new(params.clone()))),
            ExtractorMethod::Sift | ExtractorMethod::Surf => self.build_opencv(),
        }
    }

    #[cfg(feature = "opencv")]
    fn build_opencv(self) -> BowResult<Box<dyn DescriptorExtractor>> {
        Ok(Box::new(crate::opencv_utils::OpenCvExtractor::new(self)?))
    }

    #[cfg(not(feature = "opencv"))]
    fn build_opencv(self) -> BowResult<Box<dyn DescriptorExtractor>> {
        Err(BowErr::ExtractorUnavailable(self))
    }
}

impl fmt::Display for ExtractorMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExtractorMethod::Sift => "SIFT",
            ExtractorMethod::Orb => "ORB",
            ExtractorMethod::Surf => "SURF",
            ExtractorMethod::Hog => "HOG",
        };
        f.write_str(name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
/// Parameters shared by the FAST based extractors.
pub struct DetectorParams {
    /// Intensity threshold for the FAST-9 segment test.
    pub fast_threshold: u8,
    /// Keep at most this many corners, strongest first.
    pub max_features: usize,
    /// Non-maximum suppression radius in pixels. 0 disables suppression.
    pub nms_radius: u32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            fast_threshold: 20,
            max_features: 500,
            nms_radius: 3,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
/// A detected keypoint in image coordinates.
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Orientation in radians. 0 for upright descriptors.
    pub angle: f32,
    /// Detector response (FAST score).
    pub response: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
/// Keypoints of one image with their descriptors. `descriptors[i]` describes `keypoints[i]`.
pub struct Features {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Desc>,
}

impl Features {
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Turns a normalized grayscale image into local descriptors.
pub trait DescriptorExtractor: Send + Sync {
    fn method(&self) -> ExtractorMethod;

    /// Extract keypoints and descriptors. An image without keypoints yields
    /// empty `Features`, not an error.
    fn extract(&self, image: &GrayImage) -> BowResult<Features>;

    fn descriptor_len(&self) -> usize {
        self.method().descriptor_len()
    }
}

/// FAST-9 corners at least `border` pixels away from the image edge,
/// strongest first, capped at `params.max_features`.
pub(crate) fn detect_fast(image: &GrayImage, params: &DetectorParams, border: u32) -> Vec<Corner> {
    let (w, h) = image.dimensions();
    let inside: Vec<Corner> = corners_fast9(image, params.fast_threshold)
        .into_iter()
        .filter(|c| c.x >= border && c.y >= border && c.x + border < w && c.y + border < h)
        .collect();

    let mut corners = if params.nms_radius > 0 {
        local_maxima(&inside, params.nms_radius)
    } else {
        inside
    };

    // Ties broken by position so the order does not depend on the suppression pass
    corners.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then((a.y, a.x).cmp(&(b.y, b.x)))
    });
    corners.truncate(params.max_features);
    corners
}
