//! Whole-page structured field extraction.
//!
//! A document-understanding model reads the full page and emits a token
//! sequence of `<s_field>value</s_field>` markup, decoded here into a flat
//! field -> value map. The channel is independent of layout detection and
//! often reads printed numerics more reliably than per-region recognition.

use std::collections::BTreeMap;
use std::path::Path;

use image::DynamicImage;
use tracing::{debug, warn};

use super::preprocessing::ImagePreprocessor;
use crate::error::ExtractionError;
use crate::models::config::StructuredConfig;
use facture_inference::{InferenceBackend, InputTensor};

/// Whole-page field extractor.
pub struct StructuredFieldExtractor<B: InferenceBackend> {
    backend: B,
    preprocessor: ImagePreprocessor,
    vocab: Vec<String>,
    config: StructuredConfig,
}

impl<B: InferenceBackend> StructuredFieldExtractor<B> {
    /// Create a new extractor with the given token vocabulary.
    pub fn new(backend: B, vocab: Vec<String>) -> Self {
        Self {
            backend,
            preprocessor: ImagePreprocessor::new(),
            vocab,
            config: StructuredConfig::default(),
        }
    }

    /// Set extraction configuration.
    pub fn with_config(mut self, config: StructuredConfig) -> Self {
        self.config = config;
        self
    }

    /// Load a token vocabulary file (one token per line, line number is the
    /// token id).
    pub fn load_vocab(path: &Path) -> Result<Vec<String>, ExtractionError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ExtractionError::Structured(format!("failed to load vocabulary: {}", e)))?;

        let vocab: Vec<String> = content.lines().map(|l| l.to_string()).collect();
        debug!("Loaded vocabulary with {} tokens", vocab.len());
        Ok(vocab)
    }

    /// Extract structured fields from a whole page.
    ///
    /// A page where the model finds nothing yields an empty map, not an
    /// error.
    pub fn extract(
        &self,
        image: &DynamicImage,
    ) -> Result<BTreeMap<String, String>, ExtractionError> {
        let tensor = self.preprocessor.preprocess_for_structured(
            image,
            self.config.input_width,
            self.config.input_height,
        )?;
        let input = InputTensor::Float32(tensor.into_dyn());

        let outputs = self
            .backend
            .run(&[("pixel_values", input)])
            .map_err(|e| ExtractionError::Structured(e.to_string()))?;

        let output = outputs
            .into_iter()
            .next()
            .ok_or_else(|| ExtractionError::Structured("no output from model".to_string()))?
            .1;

        let ids = output
            .as_i64()
            .ok_or_else(|| ExtractionError::Structured("unexpected output type".to_string()))?;

        let markup = self.decode_tokens(ids.iter().copied());
        let fields = parse_field_markup(&markup);
        debug!("Structured extraction produced {} fields", fields.len());

        Ok(fields)
    }

    /// Decode generated token ids into markup text.
    ///
    /// Sentencepiece word boundaries ('\u{2581}') become spaces; start, end
    /// and padding tokens are dropped; ids outside the vocabulary are
    /// skipped with a warning.
    fn decode_tokens(&self, ids: impl Iterator<Item = i64>) -> String {
        let mut text = String::new();

        for id in ids {
            let Ok(idx) = usize::try_from(id) else {
                warn!("Negative token id {} in model output", id);
                continue;
            };
            let Some(token) = self.vocab.get(idx) else {
                warn!("Token id {} outside vocabulary", id);
                continue;
            };

            match token.as_str() {
                "<s>" | "</s>" | "<pad>" | "<unk>" => {}
                _ => {
                    if let Some(rest) = token.strip_prefix('\u{2581}') {
                        if !text.is_empty() {
                            text.push(' ');
                        }
                        text.push_str(rest);
                    } else {
                        text.push_str(token);
                    }
                }
            }
        }

        text
    }
}

/// Parse `<s_field>value</s_field>` markup into a field -> value map.
///
/// Unterminated tags and empty values are dropped. Later occurrences of a
/// field overwrite earlier ones.
pub fn parse_field_markup(markup: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    let mut rest = markup;

    while let Some(open) = rest.find("<s_") {
        let after_open = &rest[open + 3..];
        let Some(name_end) = after_open.find('>') else {
            break;
        };
        let name = &after_open[..name_end];
        if name.is_empty() || name.contains('<') {
            rest = &after_open[name_end + 1..];
            continue;
        }

        let body = &after_open[name_end + 1..];
        let close_tag = format!("</s_{}>", name);
        let Some(close) = body.find(&close_tag) else {
            rest = body;
            continue;
        };

        let value = body[..close].trim();
        if !value.is_empty() {
            fields.insert(name.to_string(), value.to_string());
        }

        rest = &body[close + close_tag.len()..];
    }

    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use facture_inference::{InferenceError, OutputTensor};
    use ndarray::ArrayD;
    use pretty_assertions::assert_eq;

    struct StubStructuredBackend {
        ids: Vec<i64>,
        names: Vec<String>,
    }

    impl InferenceBackend for StubStructuredBackend {
        fn run(
            &self,
            _inputs: &[(&str, InputTensor)],
        ) -> Result<Vec<(String, OutputTensor)>, InferenceError> {
            let arr = ArrayD::from_shape_vec(ndarray::IxDyn(&[1, self.ids.len()]), self.ids.clone())
                .map_err(|e| InferenceError::InferenceFailed(e.to_string()))?;
            Ok(vec![("sequences".to_string(), OutputTensor::Int64(arr))])
        }

        fn input_names(&self) -> &[String] {
            &self.names
        }

        fn output_names(&self) -> &[String] {
            &self.names
        }
    }

    fn test_vocab() -> Vec<String> {
        vec![
            "<pad>".to_string(),
            "<s>".to_string(),
            "</s>".to_string(),
            "<s_total_amount>".to_string(),
            "</s_total_amount>".to_string(),
            "<s_invoice_number>".to_string(),
            "</s_invoice_number>".to_string(),
            "\u{2581}120".to_string(),
            ",50".to_string(),
            "\u{2581}FAC".to_string(),
            "-2024".to_string(),
        ]
    }

    #[test]
    fn test_extract_decodes_fields() {
        let backend = StubStructuredBackend {
            // <s> <s_total_amount> 120 ,50 </s_total_amount>
            // <s_invoice_number> FAC -2024 </s_invoice_number> </s>
            ids: vec![1, 3, 7, 8, 4, 5, 9, 10, 6, 2],
            names: vec!["pixel_values".to_string()],
        };
        let extractor = StructuredFieldExtractor::new(backend, test_vocab());

        let image = DynamicImage::new_rgb8(960, 1280);
        let fields = extractor.extract(&image).unwrap();

        assert_eq!(fields.len(), 2);
        assert_eq!(fields["total_amount"], "120,50");
        assert_eq!(fields["invoice_number"], "FAC-2024");
    }

    #[test]
    fn test_extract_empty_page_yields_empty_map() {
        let backend = StubStructuredBackend {
            ids: vec![1, 2],
            names: vec!["pixel_values".to_string()],
        };
        let extractor = StructuredFieldExtractor::new(backend, test_vocab());

        let image = DynamicImage::new_rgb8(960, 1280);
        assert!(extractor.extract(&image).unwrap().is_empty());
    }

    #[test]
    fn test_parse_field_markup_basic() {
        let fields =
            parse_field_markup("<s_company_name>Syndic ABC</s_company_name><s_date>2024-01-15</s_date>");
        assert_eq!(fields["company_name"], "Syndic ABC");
        assert_eq!(fields["date"], "2024-01-15");
    }

    #[test]
    fn test_parse_field_markup_drops_unterminated_and_empty() {
        let fields = parse_field_markup("<s_a>1</s_a><s_b>dangling<s_c>  </s_c>");
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["a"], "1");
    }

    #[test]
    fn test_parse_field_markup_last_occurrence_wins() {
        let fields = parse_field_markup("<s_x>first</s_x><s_x>second</s_x>");
        assert_eq!(fields["x"], "second");
    }
}
