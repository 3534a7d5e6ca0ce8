#![cfg(feature = "opencv")]
use crate::{BowErr, BowResult, Desc, DescriptorExtractor, ExtractorMethod, Features, Keypoint};
use image::GrayImage;
use opencv::{
    self,
    core::{MatTrait, Scalar, CV_8UC1},
    prelude::Feature2DTrait,
};

type CvMat = opencv::core::Mat;

/// SIFT / SURF extraction backed by opencv. A detector is created per call,
/// so the extractor itself holds no opencv state.
pub struct OpenCvExtractor {
    method: ExtractorMethod,
}

impl OpenCvExtractor {
    /// Probe the detector once so an opencv build without the algorithm
    /// fails here, before any image is processed.
    pub fn new(method: ExtractorMethod) -> BowResult<Self> {
        let ex = Self { method };
        let probe = GrayImage::new(8, 8);
        ex.detect_and_compute(&probe)
            .map_err(|_| BowErr::ExtractorUnavailable(method))?;
        Ok(ex)
    }

    fn detect_and_compute(&self, img: &GrayImage) -> BowResult<Features> {
        let mat = gray_to_mat(img)?;
        match self.method {
            ExtractorMethod::Sift => {
                let mut sift = opencv::features2d::SIFT::create(0, 3, 0.04, 10., 1.6)?;
                run_detector(&mut sift, &mat, 128)
            }
            #[cfg(feature = "nonfree")]
            ExtractorMethod::Surf => {
                let mut surf = opencv::xfeatures2d::SURF::create(100., 4, 3, false, false)?;
                run_detector(&mut surf, &mat, 64)
            }
            other => Err(BowErr::ExtractorUnavailable(other)),
        }
    }
}

impl DescriptorExtractor for OpenCvExtractor {
    fn method(&self) -> ExtractorMethod {
        self.method
    }

    fn extract(&self, image: &GrayImage) -> BowResult<Features> {
        self.detect_and_compute(image)
    }
}

/// Copy a grayscale image into an 8-bit single channel opencv matrix.
fn gray_to_mat(img: &GrayImage) -> BowResult<CvMat> {
    let (w, h) = img.dimensions();
    let mut mat = CvMat::new_rows_cols_with_default(h as i32, w as i32, CV_8UC1, Scalar::all(0.))?;
    for (x, y, p) in img.enumerate_pixels() {
        *mat.at_2d_mut::<u8>(y as i32, x as i32)? = p[0];
    }
    Ok(mat)
}

/// Detect keypoints and compute float descriptors with any opencv feature detector.
fn run_detector<D: Feature2DTrait>(detector: &mut D, img: &CvMat, dim: usize) -> BowResult<Features> {
    let mut kps = opencv::types::VectorOfKeyPoint::new();
    let mut desc = CvMat::default()?;
    let mask = CvMat::default()?;
    detector.detect_and_compute(img, &mask, &mut kps, &mut desc, false)?;

    let mut features = Features::default();
    for i in 0..kps.len() {
        let kp = kps.get(i)?;
        let row: Desc = (0..dim)
            .map(|j| desc.at_2d::<f32>(i as i32, j as i32).map(|v| *v))
            .collect::<Result<_, _>>()
            .map_err(|_| BowErr::OpenCvDecode)?;
        features.keypoints.push(Keypoint {
            x: kp.pt.x,
            y: kp.pt.y,
            angle: kp.angle.to_radians(),
            response: kp.response,
        });
        features.descriptors.push(row);
    }
    Ok(features)
}
