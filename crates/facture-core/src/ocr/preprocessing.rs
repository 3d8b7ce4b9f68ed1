//! Image preprocessing for the extraction models.

use image::{DynamicImage, GenericImageView, GrayImage};
use ndarray::{Array3, Array4};
use tracing::debug;

use super::BoundingBox;
use crate::error::ExtractionError;

/// ImageNet channel means used by the detection and structured models.
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations.
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Image preprocessor shared by the per-page extractors.
pub struct ImagePreprocessor {
    rec_target_height: u32,
    rec_max_width: u32,
}

impl ImagePreprocessor {
    /// Create a new preprocessor with default settings.
    pub fn new() -> Self {
        Self {
            rec_target_height: 48,
            rec_max_width: 480,
        }
    }

    /// Set recognition line geometry.
    pub fn with_recognition_size(mut self, height: u32, max_width: u32) -> Self {
        self.rec_target_height = height;
        self.rec_max_width = max_width;
        self
    }

    /// Preprocess a page for the layout detection model.
    ///
    /// Returns the CHW tensor (batch dimension added by the caller) plus the
    /// x/y scale factors from original to model coordinates.
    pub fn preprocess_for_layout(
        &self,
        image: &DynamicImage,
        target_width: u32,
        target_height: u32,
    ) -> Result<(Array3<f32>, f32, f32), ExtractionError> {
        let (orig_w, orig_h) = image.dimensions();
        if orig_w == 0 || orig_h == 0 {
            return Err(ExtractionError::InvalidImage("zero-sized page".to_string()));
        }

        let resized =
            image.resize_exact(target_width, target_height, image::imageops::FilterType::Triangle);

        let scale_x = target_width as f32 / orig_w as f32;
        let scale_y = target_height as f32 / orig_h as f32;
        debug!(
            "Layout input: {}x{}, scales: ({:.3}, {:.3})",
            target_width, target_height, scale_x, scale_y
        );

        let rgb = resized.to_rgb8();
        let mut tensor = Array3::<f32>::zeros((3, target_height as usize, target_width as usize));

        for y in 0..target_height as usize {
            for x in 0..target_width as usize {
                let pixel = rgb.get_pixel(x as u32, y as u32);
                for c in 0..3 {
                    let value = pixel[c] as f32 / 255.0;
                    tensor[[c, y, x]] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
                }
            }
        }

        Ok((tensor, scale_x, scale_y))
    }

    /// Preprocess a cropped text line for the recognition model.
    ///
    /// Resizes to the target height keeping aspect ratio, pads to the fixed
    /// model width, normalizes to [-1, 1].
    pub fn preprocess_for_recognition(
        &self,
        image: &DynamicImage,
    ) -> Result<Array4<f32>, ExtractionError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(ExtractionError::InvalidImage("zero-sized crop".to_string()));
        }

        let aspect_ratio = width as f32 / height as f32;
        let target_width = (self.rec_target_height as f32 * aspect_ratio) as u32;
        let target_width = target_width.clamp(1, self.rec_max_width);

        let resized = image.resize_exact(
            target_width,
            self.rec_target_height,
            image::imageops::FilterType::Lanczos3,
        );

        let rgb = resized.to_rgb8();
        let mut tensor = Array4::<f32>::zeros((
            1,
            3,
            self.rec_target_height as usize,
            self.rec_max_width as usize,
        ));

        for y in 0..self.rec_target_height {
            for x in 0..target_width {
                let pixel = rgb.get_pixel(x, y);
                for c in 0..3 {
                    let value = pixel[c] as f32 / 255.0;
                    tensor[[0, c, y as usize, x as usize]] = (value - 0.5) / 0.5;
                }
            }
        }

        Ok(tensor)
    }

    /// Preprocess a whole page for the structured field extraction model.
    pub fn preprocess_for_structured(
        &self,
        image: &DynamicImage,
        target_width: u32,
        target_height: u32,
    ) -> Result<Array4<f32>, ExtractionError> {
        let (orig_w, orig_h) = image.dimensions();
        if orig_w == 0 || orig_h == 0 {
            return Err(ExtractionError::InvalidImage("zero-sized page".to_string()));
        }

        let resized =
            image.resize_exact(target_width, target_height, image::imageops::FilterType::Triangle);
        let rgb = resized.to_rgb8();

        let mut tensor =
            Array4::<f32>::zeros((1, 3, target_height as usize, target_width as usize));

        for y in 0..target_height as usize {
            for x in 0..target_width as usize {
                let pixel = rgb.get_pixel(x as u32, y as u32);
                for c in 0..3 {
                    let value = pixel[c] as f32 / 255.0;
                    tensor[[0, c, y, x]] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
                }
            }
        }

        Ok(tensor)
    }

    /// Crop a region's bounding box from the page, clamped to the page.
    ///
    /// A degenerate box yields a 1x1 crop rather than an error; the caller
    /// treats the resulting empty recognition as an empty region.
    pub fn crop_region(&self, image: &DynamicImage, bbox: &BoundingBox) -> DynamicImage {
        let clamped = bbox.clamp(image.width(), image.height());

        let min_x = clamped.x1.floor().max(0.0) as u32;
        let min_y = clamped.y1.floor().max(0.0) as u32;
        let max_x = clamped.x2.ceil() as u32;
        let max_y = clamped.y2.ceil() as u32;

        let width = max_x.saturating_sub(min_x).max(1);
        let height = max_y.saturating_sub(min_y).max(1);

        image.crop_imm(min_x, min_y, width, height)
    }

    /// Split a region crop into horizontal text-line bands.
    ///
    /// Uses a row-ink projection profile: rows whose dark-pixel count exceeds
    /// a small fraction of the width are "ink"; consecutive ink rows form a
    /// band. Returns (y_start, y_end) pairs; an all-blank crop returns none.
    pub fn segment_lines(&self, gray: &GrayImage, min_line_height: u32) -> Vec<(u32, u32)> {
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Vec::new();
        }

        let threshold = 160u8;
        let min_ink = (width / 50).max(1);

        let mut bands = Vec::new();
        let mut band_start: Option<u32> = None;

        for y in 0..height {
            let ink = (0..width)
                .filter(|&x| gray.get_pixel(x, y)[0] < threshold)
                .count() as u32;

            if ink >= min_ink {
                if band_start.is_none() {
                    band_start = Some(y);
                }
            } else if let Some(start) = band_start.take() {
                if y - start >= min_line_height {
                    bands.push((start, y));
                }
            }
        }

        if let Some(start) = band_start {
            if height - start >= min_line_height {
                bands.push((start, height));
            }
        }

        bands
    }
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn blank_gray(width: u32, height: u32) -> GrayImage {
        GrayImage::from_pixel(width, height, Luma([255]))
    }

    #[test]
    fn test_segment_lines_blank_crop() {
        let preprocessor = ImagePreprocessor::new();
        let gray = blank_gray(100, 40);
        assert!(preprocessor.segment_lines(&gray, 3).is_empty());
    }

    #[test]
    fn test_segment_lines_two_bands() {
        let preprocessor = ImagePreprocessor::new();
        let mut gray = blank_gray(100, 40);

        for y in 5..12 {
            for x in 10..90 {
                gray.put_pixel(x, y, Luma([0]));
            }
        }
        for y in 25..33 {
            for x in 10..90 {
                gray.put_pixel(x, y, Luma([0]));
            }
        }

        let bands = preprocessor.segment_lines(&gray, 3);
        assert_eq!(bands, vec![(5, 12), (25, 33)]);
    }

    #[test]
    fn test_segment_lines_drops_speckle() {
        let preprocessor = ImagePreprocessor::new();
        let mut gray = blank_gray(100, 40);

        // One-row speckle, below the minimum line height.
        for x in 10..90 {
            gray.put_pixel(x, 20, Luma([0]));
        }

        assert!(preprocessor.segment_lines(&gray, 3).is_empty());
    }

    #[test]
    fn test_crop_region_degenerate_box() {
        let preprocessor = ImagePreprocessor::new();
        let image = DynamicImage::new_rgb8(100, 100);
        let bbox = BoundingBox {
            x1: 50.0,
            y1: 50.0,
            x2: 50.0,
            y2: 50.0,
        };
        let crop = preprocessor.crop_region(&image, &bbox);
        assert_eq!(crop.dimensions(), (1, 1));
    }

    #[test]
    fn test_crop_region_clamps_to_page() {
        let preprocessor = ImagePreprocessor::new();
        let image = DynamicImage::new_rgb8(100, 100);
        let bbox = BoundingBox {
            x1: 80.0,
            y1: 80.0,
            x2: 300.0,
            y2: 300.0,
        };
        let crop = preprocessor.crop_region(&image, &bbox);
        assert_eq!(crop.dimensions(), (20, 20));
    }
}
