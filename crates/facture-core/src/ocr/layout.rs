//! Layout detection: localizes Paragraph and Table regions on a page.

use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use ndarray::Array3;
use tracing::debug;

use super::preprocessing::ImagePreprocessor;
use super::{BoundingBox, Region, RegionKind};
use crate::error::ExtractionError;
use crate::models::config::LayoutConfig;
use facture_inference::{InferenceBackend, InputTensor, OutputTensor};

/// Detection head class indices for the invoice layout model.
fn kind_from_class(class: usize) -> Option<RegionKind> {
    match class {
        0 => Some(RegionKind::Paragraph),
        1 => Some(RegionKind::Table),
        // Other classes (figures, stamps) carry no text evidence.
        _ => None,
    }
}

/// Layout detector over a PicoDet-style detection model.
///
/// The model instance is loaded once at process start and shared across
/// documents; a load failure is process-fatal, not a per-request error.
pub struct LayoutDetector<B: InferenceBackend> {
    backend: B,
    preprocessor: ImagePreprocessor,
    config: LayoutConfig,
}

impl<B: InferenceBackend> LayoutDetector<B> {
    /// Create a new layout detector with default configuration.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            preprocessor: ImagePreprocessor::new(),
            config: LayoutConfig::default(),
        }
    }

    /// Set detection configuration.
    pub fn with_config(mut self, config: LayoutConfig) -> Self {
        self.config = config;
        self
    }

    /// Detect Paragraph and Table regions on one page.
    ///
    /// Local indices are assigned per kind, 1-based, in the detector's
    /// emission order. That order is NOT reading order; consumers wanting
    /// top-to-bottom must re-sort on the bounding boxes.
    pub fn detect(
        &self,
        image: &DynamicImage,
        page_index: u32,
    ) -> Result<Vec<Region>, ExtractionError> {
        let (orig_width, orig_height) = image.dimensions();

        let (tensor, scale_x, scale_y) = self.preprocessor.preprocess_for_layout(
            image,
            self.config.input_width,
            self.config.input_height,
        )?;

        let scale_factor = Array3::from_shape_vec((1, 2, 1), vec![scale_y, scale_x])
            .map_err(|e| ExtractionError::Layout(format!("scale tensor: {}", e)))?;

        let inputs = vec![
            ("image", InputTensor::Float32(tensor.into_dyn())),
            ("scale_factor", InputTensor::Float32(scale_factor.into_dyn())),
        ];

        let outputs = self
            .backend
            .run(&inputs)
            .map_err(|e| ExtractionError::Layout(format!("inference failed: {}", e)))?;

        let regions = self.post_process(
            &outputs,
            page_index,
            scale_x,
            scale_y,
            orig_width,
            orig_height,
        )?;

        debug!(
            "Page {}: detected {} regions ({} paragraphs, {} tables)",
            page_index,
            regions.len(),
            regions
                .iter()
                .filter(|r| r.kind == RegionKind::Paragraph)
                .count(),
            regions.iter().filter(|r| r.kind == RegionKind::Table).count(),
        );

        Ok(regions)
    }

    fn post_process(
        &self,
        outputs: &[(String, OutputTensor)],
        page_index: u32,
        scale_x: f32,
        scale_y: f32,
        orig_width: u32,
        orig_height: u32,
    ) -> Result<Vec<Region>, ExtractionError> {
        // Detection head emits [N, 6] rows of [class_id, score, x1, y1, x2, y2]
        // (or batched [1, N, 6]); coordinates are in model space.
        let output = outputs
            .iter()
            .find(|(name, _)| name.contains("bbox") || name.contains("output"))
            .or_else(|| outputs.first())
            .map(|(_, tensor)| tensor)
            .ok_or_else(|| ExtractionError::Layout("no output tensor".to_string()))?;

        let arr = output
            .as_f32()
            .ok_or_else(|| ExtractionError::Layout("unexpected output tensor type".to_string()))?;

        let shape = arr.shape();
        debug!("Layout output shape: {:?}", shape);

        let rows: Vec<[f32; 6]> = if shape.len() == 2 && shape[1] == 6 {
            (0..shape[0])
                .map(|i| {
                    [
                        arr[[i, 0]],
                        arr[[i, 1]],
                        arr[[i, 2]],
                        arr[[i, 3]],
                        arr[[i, 4]],
                        arr[[i, 5]],
                    ]
                })
                .collect()
        } else if shape.len() == 3 && shape[2] == 6 {
            (0..shape[1])
                .map(|i| {
                    [
                        arr[[0, i, 0]],
                        arr[[0, i, 1]],
                        arr[[0, i, 2]],
                        arr[[0, i, 3]],
                        arr[[0, i, 4]],
                        arr[[0, i, 5]],
                    ]
                })
                .collect()
        } else {
            return Err(ExtractionError::Layout(format!(
                "unexpected output shape: {:?}",
                shape
            )));
        };

        // (emission position, kind, bbox, score)
        let mut detections: Vec<(usize, RegionKind, BoundingBox, f32)> = Vec::new();

        for (pos, row) in rows.iter().enumerate() {
            let score = row[1];
            if score < self.config.confidence_threshold {
                continue;
            }
            let Some(kind) = kind_from_class(row[0] as usize) else {
                continue;
            };

            let bbox = BoundingBox {
                x1: row[2] / scale_x,
                y1: row[3] / scale_y,
                x2: row[4] / scale_x,
                y2: row[5] / scale_y,
            }
            .clamp(orig_width, orig_height);

            detections.push((pos, kind, bbox, score));
        }

        let kept = self.nms(detections);

        // Number survivors per kind in emission order, starting at 1.
        let mut paragraph_count = 0u32;
        let mut table_count = 0u32;
        let regions = kept
            .into_iter()
            .map(|(_, kind, bbox, confidence)| {
                let local_index = match kind {
                    RegionKind::Paragraph => {
                        paragraph_count += 1;
                        paragraph_count
                    }
                    RegionKind::Table => {
                        table_count += 1;
                        table_count
                    }
                };
                Region {
                    page_index,
                    local_index,
                    kind,
                    bbox,
                    confidence,
                }
            })
            .collect();

        Ok(regions)
    }

    /// Non-maximum suppression per kind, preserving emission order among the
    /// survivors so local indices stay stable.
    fn nms(
        &self,
        detections: Vec<(usize, RegionKind, BoundingBox, f32)>,
    ) -> Vec<(usize, RegionKind, BoundingBox, f32)> {
        let mut by_score = detections;
        by_score.sort_by(|a, b| b.3.partial_cmp(&a.3).unwrap_or(std::cmp::Ordering::Equal));

        let mut kept: Vec<(usize, RegionKind, BoundingBox, f32)> = Vec::new();
        for candidate in by_score {
            let dominated = kept.iter().any(|k| {
                k.1 == candidate.1 && candidate.2.iou(&k.2) > self.config.nms_threshold
            });
            if !dominated {
                kept.push(candidate);
            }
        }

        kept.sort_by_key(|k| k.0);
        kept
    }
}

/// Render detected regions onto a copy of the page for human review.
///
/// This is a display artifact only; it never feeds back into extraction.
pub fn draw_regions(image: &DynamicImage, regions: &[Region]) -> RgbImage {
    let mut canvas = image.to_rgb8();
    let (width, height) = canvas.dimensions();

    for region in regions {
        let color = match region.kind {
            RegionKind::Paragraph => Rgb([220u8, 40, 40]),
            RegionKind::Table => Rgb([40u8, 160, 40]),
        };

        let clamped = region.bbox.clamp(width, height);
        let x1 = clamped.x1 as u32;
        let y1 = clamped.y1 as u32;
        let x2 = (clamped.x2 as u32).min(width.saturating_sub(1));
        let y2 = (clamped.y2 as u32).min(height.saturating_sub(1));

        for t in 0..2u32 {
            for x in x1..=x2 {
                if y1 + t < height {
                    canvas.put_pixel(x, y1 + t, color);
                }
                if y2 >= t {
                    canvas.put_pixel(x, y2 - t, color);
                }
            }
            for y in y1..=y2 {
                if x1 + t < width {
                    canvas.put_pixel(x1 + t, y, color);
                }
                if x2 >= t {
                    canvas.put_pixel(x2 - t, y, color);
                }
            }
        }
    }

    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use facture_inference::InferenceError;
    use ndarray::ArrayD;
    use pretty_assertions::assert_eq;

    /// Backend stub returning a fixed detection tensor.
    struct StubDetectionBackend {
        rows: Vec<[f32; 6]>,
        names: Vec<String>,
    }

    impl StubDetectionBackend {
        fn new(rows: Vec<[f32; 6]>) -> Self {
            Self {
                rows,
                names: vec!["image".to_string(), "scale_factor".to_string()],
            }
        }
    }

    impl InferenceBackend for StubDetectionBackend {
        fn run(
            &self,
            _inputs: &[(&str, InputTensor)],
        ) -> Result<Vec<(String, OutputTensor)>, InferenceError> {
            let flat: Vec<f32> = self.rows.iter().flatten().cloned().collect();
            let arr = ArrayD::from_shape_vec(ndarray::IxDyn(&[self.rows.len(), 6]), flat).unwrap();
            Ok(vec![("bbox".to_string(), OutputTensor::Float32(arr))])
        }

        fn input_names(&self) -> &[String] {
            &self.names
        }

        fn output_names(&self) -> &[String] {
            &self.names
        }
    }

    fn test_page() -> DynamicImage {
        // Same size as the model input so scale factors are 1.0.
        DynamicImage::new_rgb8(800, 608)
    }

    #[test]
    fn test_detect_assigns_per_kind_indices_in_emission_order() {
        let backend = StubDetectionBackend::new(vec![
            [0.0, 0.9, 10.0, 10.0, 200.0, 60.0],   // paragraph
            [1.0, 0.8, 10.0, 100.0, 400.0, 300.0], // table
            [0.0, 0.7, 10.0, 320.0, 200.0, 380.0], // paragraph
            [1.0, 0.6, 10.0, 400.0, 400.0, 500.0], // table
        ]);
        let detector = LayoutDetector::new(backend);

        let regions = detector.detect(&test_page(), 1).unwrap();
        assert_eq!(regions.len(), 4);

        let paragraphs: Vec<u32> = regions
            .iter()
            .filter(|r| r.kind == RegionKind::Paragraph)
            .map(|r| r.local_index)
            .collect();
        let tables: Vec<u32> = regions
            .iter()
            .filter(|r| r.kind == RegionKind::Table)
            .map(|r| r.local_index)
            .collect();

        assert_eq!(paragraphs, vec![1, 2]);
        assert_eq!(tables, vec![1, 2]);
        assert!(regions.iter().all(|r| r.page_index == 1));
    }

    #[test]
    fn test_detect_filters_low_confidence_and_unknown_classes() {
        let backend = StubDetectionBackend::new(vec![
            [0.0, 0.9, 10.0, 10.0, 200.0, 60.0],
            [0.0, 0.2, 10.0, 100.0, 200.0, 160.0], // below threshold
            [5.0, 0.9, 10.0, 200.0, 200.0, 260.0], // unknown class
        ]);
        let detector = LayoutDetector::new(backend);

        let regions = detector.detect(&test_page(), 1).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].kind, RegionKind::Paragraph);
    }

    #[test]
    fn test_nms_suppresses_same_kind_overlap_only() {
        let backend = StubDetectionBackend::new(vec![
            [0.0, 0.9, 10.0, 10.0, 200.0, 100.0],
            [0.0, 0.6, 12.0, 12.0, 198.0, 98.0], // near-duplicate paragraph
            [1.0, 0.7, 10.0, 10.0, 200.0, 100.0], // table at same spot survives
        ]);
        let detector = LayoutDetector::new(backend);

        let regions = detector.detect(&test_page(), 1).unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].kind, RegionKind::Paragraph);
        assert_eq!(regions[1].kind, RegionKind::Table);
    }

    #[test]
    fn test_empty_page_yields_no_regions() {
        let backend = StubDetectionBackend::new(Vec::new());
        let detector = LayoutDetector::new(backend);
        let regions = detector.detect(&test_page(), 1).unwrap();
        assert!(regions.is_empty());
    }

    #[test]
    fn test_draw_regions_keeps_dimensions() {
        let image = test_page();
        let regions = vec![Region {
            page_index: 1,
            local_index: 1,
            kind: RegionKind::Table,
            bbox: BoundingBox {
                x1: 10.0,
                y1: 10.0,
                x2: 100.0,
                y2: 100.0,
            },
            confidence: 0.9,
        }];
        let annotated = draw_regions(&image, &regions);
        assert_eq!(annotated.dimensions(), image.dimensions());
        assert_eq!(*annotated.get_pixel(50, 10), Rgb([40u8, 160, 40]));
    }
}
