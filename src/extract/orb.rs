use bitvec::prelude::*;
use image::GrayImage;
use imageproc::filter::gaussian_blur_f32;
use rand::{rngs::StdRng, Rng, SeedableRng};

use super::{detect_fast, DescriptorExtractor, DetectorParams, ExtractorMethod, Features, Keypoint};
use crate::BowResult;

/// Binary ORB descriptor length in bytes.
pub const ORB_DESC_BYTES: usize = 32;

const HALF_PATCH: i32 = 15;
/// Rotated sample points stay within HALF_PATCH * sqrt(2) of the keypoint.
const BORDER: u32 = 22;
const BLUR_SIGMA: f32 = 2.0;
const PATTERN_SEED: u64 = 0x5eed_0b0b;

type BinaryDesc = [u8; ORB_DESC_BYTES];
type TestPair = ((f32, f32), (f32, f32));

/// FAST-9 keypoints, intensity centroid orientation and steered BRIEF.
///
/// The sampling pattern is drawn once from a fixed seed, so two extractors
/// always produce identical descriptors for the same image.
pub struct OrbExtractor {
    params: DetectorParams,
    pattern: Vec<TestPair>,
}

impl OrbExtractor {
    pub fn new(params: DetectorParams) -> Self {
        Self {
            params,
            pattern: brief_pattern(PATTERN_SEED),
        }
    }

    /// Angle of the vector from the keypoint to the patch intensity centroid.
    fn orientation(image: &GrayImage, x: i32, y: i32) -> f32 {
        let (mut m01, mut m10) = (0f32, 0f32);
        for dy in -HALF_PATCH..=HALF_PATCH {
            for dx in -HALF_PATCH..=HALF_PATCH {
                if dx * dx + dy * dy > HALF_PATCH * HALF_PATCH {
                    continue;
                }
                let v = image.get_pixel((x + dx) as u32, (y + dy) as u32)[0] as f32;
                m10 += dx as f32 * v;
                m01 += dy as f32 * v;
            }
        }
        m01.atan2(m10)
    }

    fn describe(&self, smoothed: &GrayImage, x: i32, y: i32, angle: f32) -> BinaryDesc {
        let (sin, cos) = angle.sin_cos();
        let sample = |(px, py): (f32, f32)| {
            let rx = (cos * px - sin * py).round() as i32;
            let ry = (sin * px + cos * py).round() as i32;
            smoothed.get_pixel((x + rx) as u32, (y + ry) as u32)[0]
        };

        let mut desc: BinaryDesc = [0; ORB_DESC_BYTES];
        let bits = desc.view_bits_mut::<Msb0>();
        for (i, &(p, q)) in self.pattern.iter().enumerate() {
            if sample(p) < sample(q) {
                bits.set(i, true);
            }
        }
        desc
    }
}

impl DescriptorExtractor for OrbExtractor {
    fn method(&self) -> ExtractorMethod {
        ExtractorMethod::Orb
    }

    fn extract(&self, image: &GrayImage) -> BowResult<Features> {
        let corners = detect_fast(image, &self.params, BORDER);
        if corners.is_empty() {
            return Ok(Features::default());
        }

        // BRIEF tests compare pixels of a smoothed copy
        let smoothed = gaussian_blur_f32(image, BLUR_SIGMA);

        let mut features = Features {
            keypoints: Vec::with_capacity(corners.len()),
            descriptors: Vec::with_capacity(corners.len()),
        };
        for c in corners {
            let (x, y) = (c.x as i32, c.y as i32);
            let angle = Self::orientation(image, x, y);
            let desc = self.describe(&smoothed, x, y, angle);
            features.keypoints.push(Keypoint {
                x: c.x as f32,
                y: c.y as f32,
                angle,
                response: c.score,
            });
            features
                .descriptors
                .push(desc.iter().map(|&b| b as f32).collect());
        }
        Ok(features)
    }
}

/// 256 point pairs drawn uniformly from the square patch.
fn brief_pattern(seed: u64) -> Vec<TestPair> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut point = || {
        (
            rng.gen_range(-HALF_PATCH..=HALF_PATCH) as f32,
            rng.gen_range(-HALF_PATCH..=HALF_PATCH) as f32,
        )
    };
    (0..ORB_DESC_BYTES * 8)
        .map(|_| (point(), point()))
        .collect()
}
