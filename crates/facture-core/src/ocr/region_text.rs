//! Region text recognition: multilingual OCR inside detected regions.

use std::collections::HashMap;
use std::path::Path;

use image::DynamicImage;
use ndarray::ArrayD;
use tracing::{debug, trace};

use super::preprocessing::ImagePreprocessor;
use super::{Region, RegionKey, RegionText, TextFragment};
use crate::error::ExtractionError;
use crate::models::config::RecognitionConfig;
use facture_inference::{InferenceBackend, InputTensor};

/// Text extractor for detected regions, backed by a CRNN/CTC recognition
/// model with a Latin dictionary covering French, Spanish and English.
///
/// The recognition engine is expensive to initialize; one instance is built
/// at startup and shared across all concurrent document tasks.
pub struct RegionTextExtractor<B: InferenceBackend> {
    backend: B,
    preprocessor: ImagePreprocessor,
    dictionary: Vec<char>,
    min_line_height: u32,
}

impl<B: InferenceBackend> RegionTextExtractor<B> {
    /// Create a new extractor.
    pub fn new(backend: B, dictionary: Vec<char>) -> Self {
        Self {
            backend,
            preprocessor: ImagePreprocessor::new(),
            dictionary,
            min_line_height: 3,
        }
    }

    /// Set recognition configuration.
    pub fn with_config(mut self, config: RecognitionConfig) -> Self {
        self.preprocessor = ImagePreprocessor::new()
            .with_recognition_size(config.target_height, config.max_width);
        self.min_line_height = config.min_line_height;
        self
    }

    /// Load a dictionary file (one character per line; index 0 is the CTC
    /// blank token).
    pub fn load_dictionary(path: &Path) -> Result<Vec<char>, ExtractionError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ExtractionError::Recognition(format!("failed to load dictionary: {}", e)))?;

        let mut chars: Vec<char> = vec![' ']; // Blank token
        for line in content.lines() {
            if let Some(c) = line.chars().next() {
                chars.push(c);
            }
        }

        debug!("Loaded dictionary with {} characters", chars.len());
        Ok(chars)
    }

    /// Built-in Latin dictionary covering French, Spanish and English text.
    pub fn multilingual_dictionary() -> Vec<char> {
        let mut chars = vec![' ']; // Blank token for CTC

        for c in '0'..='9' {
            chars.push(c);
        }
        for c in 'A'..='Z' {
            chars.push(c);
        }
        for c in 'a'..='z' {
            chars.push(c);
        }

        // French
        chars.extend([
            'À', 'à', 'Â', 'â', 'Æ', 'æ', 'Ç', 'ç', 'É', 'é', 'È', 'è', 'Ê', 'ê', 'Ë', 'ë', 'Î',
            'î', 'Ï', 'ï', 'Ô', 'ô', 'Œ', 'œ', 'Ù', 'ù', 'Û', 'û', 'Ü', 'ü', 'Ÿ', 'ÿ',
        ]);

        // Spanish
        chars.extend(['Á', 'á', 'Í', 'í', 'Ó', 'ó', 'Ú', 'ú', 'Ñ', 'ñ', '¿', '¡']);

        // Punctuation and symbols
        chars.extend([
            '.', ',', ';', ':', '!', '?', '-', '_', '/', '\\', '(', ')', '[', ']', '{', '}', '<',
            '>', '@', '#', '$', '%', '^', '&', '*', '+', '=', '|', '~', '`', '\'', '"', ' ',
        ]);

        // Currency and special
        chars.extend(['€', '£', '°', '§', '²', '³', 'ª', 'º', '«', '»']);

        chars
    }

    /// Recognize text inside each detected region of a page.
    ///
    /// An empty crop or zero recognized fragments yields an empty
    /// [`RegionText`] under that region's key, never an error; the key is
    /// always present in the returned mapping.
    pub fn extract(
        &self,
        image: &DynamicImage,
        regions: &[Region],
    ) -> Result<HashMap<RegionKey, RegionText>, ExtractionError> {
        let mut results = HashMap::with_capacity(regions.len());

        for region in regions {
            let crop = self.preprocessor.crop_region(image, &region.bbox);
            let gray = crop.to_luma8();
            let bands = self.preprocessor.segment_lines(&gray, self.min_line_height);

            let mut fragments = Vec::with_capacity(bands.len());
            for (y_start, y_end) in bands {
                let band = crop.crop_imm(0, y_start, crop.width(), y_end - y_start);
                let (text, confidence) = self.recognize_line(&band)?;
                if !text.is_empty() {
                    trace!(
                        "Region {}: '{}' (confidence: {:.3})",
                        region.key(),
                        text,
                        confidence
                    );
                    fragments.push(TextFragment { text, confidence });
                }
            }

            results.insert(region.key(), RegionText { fragments });
        }

        debug!(
            "Recognized text in {} regions ({} non-empty)",
            results.len(),
            results.values().filter(|t| !t.is_empty()).count()
        );

        Ok(results)
    }

    /// Recognize a single text line crop.
    fn recognize_line(&self, image: &DynamicImage) -> Result<(String, f32), ExtractionError> {
        let tensor = self.preprocessor.preprocess_for_recognition(image)?;
        let input = InputTensor::Float32(tensor.into_dyn());

        let outputs = self
            .backend
            .run(&[("x", input)])
            .map_err(|e| ExtractionError::Recognition(e.to_string()))?;

        let output = outputs
            .into_iter()
            .next()
            .ok_or_else(|| ExtractionError::Recognition("no output from model".to_string()))?
            .1;

        let arr = output
            .as_f32()
            .ok_or_else(|| ExtractionError::Recognition("unexpected output type".to_string()))?;

        self.decode_ctc(arr)
    }

    /// CTC greedy decode: argmax per timestep, drop blanks and repeats.
    fn decode_ctc(&self, output: &ArrayD<f32>) -> Result<(String, f32), ExtractionError> {
        let shape = output.shape();
        if shape.len() < 3 {
            return Err(ExtractionError::Recognition(format!(
                "invalid output shape: {:?}",
                shape
            )));
        }

        let seq_len = shape[1];
        let num_classes = shape[2];

        let mut text = String::new();
        let mut char_scores = Vec::new();
        let mut prev_idx = 0usize;

        for t in 0..seq_len {
            let mut max_idx = 0;
            let mut max_val = f32::NEG_INFINITY;

            for c in 0..num_classes {
                let val = output[[0, t, c]];
                if val > max_val {
                    max_val = val;
                    max_idx = c;
                }
            }

            // Softmax probability of the argmax.
            let mut sum_exp = 0.0f32;
            for c in 0..num_classes {
                sum_exp += (output[[0, t, c]] - max_val).exp();
            }
            let confidence = 1.0 / sum_exp;

            if max_idx != 0 && max_idx != prev_idx {
                if let Some(&c) = self.dictionary.get(max_idx) {
                    text.push(c);
                    char_scores.push(confidence);
                }
            }

            prev_idx = max_idx;
        }

        let avg_confidence = if char_scores.is_empty() {
            0.0
        } else {
            char_scores.iter().sum::<f32>() / char_scores.len() as f32
        };

        Ok((text, avg_confidence))
    }
}
