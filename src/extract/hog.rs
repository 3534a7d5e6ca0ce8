use image::{GrayImage, ImageBuffer, Luma};
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use std::f32::consts::PI;

use super::{detect_fast, DescriptorExtractor, DetectorParams, ExtractorMethod, Features, Keypoint};
use crate::{BowResult, Desc};

const CELLS: usize = 4;
const CELL_SIDE: i32 = 4;
const BINS: usize = 8;
const HALF_PATCH: i32 = CELLS as i32 * CELL_SIDE / 2;
const BORDER: u32 = HALF_PATCH as u32 + 1;
/// Components are clipped to this before renormalizing.
const CLIP: f32 = 0.2;

type Gradient = ImageBuffer<Luma<i16>, Vec<i16>>;

/// Upright 128-dimensional gradient orientation histograms around FAST corners:
/// a 16x16 patch split into 4x4 cells with 8 orientation bins each,
/// Gaussian weighted and normalized the way SIFT normalizes its descriptor.
pub struct HogExtractor {
    params: DetectorParams,
}

impl HogExtractor {
    pub fn new(params: DetectorParams) -> Self {
        Self { params }
    }

    fn describe(gx: &Gradient, gy: &Gradient, x: i32, y: i32) -> Desc {
        let mut hist = vec![0f32; CELLS * CELLS * BINS];
        let sigma2 = 2. * (HALF_PATCH as f32).powi(2);

        for dy in -HALF_PATCH..HALF_PATCH {
            for dx in -HALF_PATCH..HALF_PATCH {
                let (px, py) = ((x + dx) as u32, (y + dy) as u32);
                let gxv = gx.get_pixel(px, py)[0] as f32;
                let gyv = gy.get_pixel(px, py)[0] as f32;
                let mag = gxv.hypot(gyv);
                if mag == 0. {
                    continue;
                }
                let mut theta = gyv.atan2(gxv);
                if theta < 0. {
                    theta += 2. * PI;
                }
                let bin = ((theta / (2. * PI)) * BINS as f32) as usize % BINS;
                let row = ((dy + HALF_PATCH) / CELL_SIDE) as usize;
                let col = ((dx + HALF_PATCH) / CELL_SIDE) as usize;
                let w = (-((dx * dx + dy * dy) as f32) / sigma2).exp();
                hist[(row * CELLS + col) * BINS + bin] += mag * w;
            }
        }

        if normalize(&mut hist) {
            for v in hist.iter_mut() {
                *v = v.min(CLIP);
            }
            normalize(&mut hist);
        }
        hist
    }
}

/// L2 normalize in place. Returns false (and leaves the vector untouched) for a zero vector.
fn normalize(v: &mut [f32]) -> bool {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0. {
        v.iter_mut().for_each(|x| *x /= norm);
        true
    } else {
        false
    }
}

impl DescriptorExtractor for HogExtractor {
    fn method(&self) -> ExtractorMethod {
        ExtractorMethod::Hog
    }

    fn extract(&self, image: &GrayImage) -> BowResult<Features> {
        let corners = detect_fast(image, &self.params, BORDER);
        if corners.is_empty() {
            return Ok(Features::default());
        }
        let gx = horizontal_sobel(image);
        let gy = vertical_sobel(image);

        let (keypoints, descriptors): (Vec<Keypoint>, Vec<Desc>) = corners
            .iter()
            .map(|c| {
                let kp = Keypoint {
                    x: c.x as f32,
                    y: c.y as f32,
                    angle: 0.,
                    response: c.score,
                };
                (kp, Self::describe(&gx, &gy, c.x as i32, c.y as i32))
            })
            .unzip();
        Ok(Features {
            keypoints,
            descriptors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::tests::blob_image;

    #[test]
    fn descriptors_are_unit_length() {
        let img = blob_image(100, 100);
        let f = HogExtractor::new(DetectorParams::default()).extract(&img).unwrap();
        assert!(!f.is_empty());
        for d in &f.descriptors {
            assert_eq!(d.len(), 128);
            assert!(d.iter().all(|&v| v >= 0.));
            let norm = d.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.).abs() < 1e-4, "norm {}", norm);
        }
    }

    #[test]
    fn zero_vector_is_left_alone() {
        let mut v = vec![0f32; 8];
        assert!(!normalize(&mut v));
        assert!(v.iter().all(|&x| x == 0.));
    }
}
