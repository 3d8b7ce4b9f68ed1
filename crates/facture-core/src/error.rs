//! Error types for the facture-core library.
//!
//! Failure blast radius is deliberately narrow: extraction errors are local
//! to one page, arbitration errors are local to one document, and only a
//! model that fails to load at startup is fatal for the process.

use thiserror::Error;

/// Main error type for the facture library.
#[derive(Error, Debug)]
pub enum FactureError {
    /// A page image could not be decoded. Fatal for that page only.
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),

    /// A required model failed to load at process start. Fatal for the
    /// process: callers must fail fast instead of serving requests.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// One extractor failed on one page.
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// Arbitration failed for one document.
    #[error("arbitration error: {0}")]
    Arbitration(#[from] ArbitrationError),

    /// Reference registry could not be loaded.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Inference error from the inference layer.
    #[error("inference error: {0}")]
    Inference(#[from] facture_inference::InferenceError),

    /// Image processing error.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors from the per-page extractors (layout, region text, whole-page
/// fields). These degrade to empty results for that page; sibling pages
/// keep processing.
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// Layout detection failed.
    #[error("layout detection failed: {0}")]
    Layout(String),

    /// Region text recognition failed.
    #[error("text recognition failed: {0}")]
    Recognition(String),

    /// Whole-page structured field extraction failed.
    #[error("structured extraction failed: {0}")]
    Structured(String),

    /// Image preprocessing failed.
    #[error("preprocessing failed: {0}")]
    Preprocessing(String),

    /// Invalid image format or dimensions.
    #[error("invalid image: {0}")]
    InvalidImage(String),
}

/// Errors from the arbitration step (the reasoning-service call).
///
/// Transient variants are retried with backoff; a payload that came back
/// but does not conform to the record schema is permanent for that call.
#[derive(Error, Debug)]
pub enum ArbitrationError {
    /// The reasoning-service call exceeded its timeout.
    #[error("arbitration timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// Network-level failure reaching the reasoning service.
    #[error("arbitration API error: {0}")]
    Api(String),

    /// The reasoning service answered with a non-success HTTP status.
    #[error("arbitration request rejected (HTTP {code}): {body}")]
    Status { code: u16, body: String },

    /// The returned payload does not parse into the invoice record schema.
    #[error("schema violation in arbitration response: {0}")]
    SchemaViolation(String),

    /// A required record field came back empty.
    #[error("required field missing or empty: {0}")]
    MissingField(String),
}

impl ArbitrationError {
    /// Whether a retry may succeed. Schema violations and missing required
    /// fields are permanent for the call that produced them.
    pub fn is_transient(&self) -> bool {
        match self {
            ArbitrationError::Timeout { .. } | ArbitrationError::Api(_) => true,
            ArbitrationError::Status { code, .. } => *code == 429 || *code >= 500,
            ArbitrationError::SchemaViolation(_) | ArbitrationError::MissingField(_) => false,
        }
    }
}

/// Errors loading the reference registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Could not read the registry file.
    #[error("failed to read registry: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed CSV input.
    #[error("failed to parse registry: {0}")]
    Csv(#[from] csv::Error),

    /// A required column is absent from the header row.
    #[error("registry is missing column: {0}")]
    MissingColumn(String),
}

/// Result type for the facture library.
pub type Result<T> = std::result::Result<T, FactureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ArbitrationError::Timeout { elapsed_ms: 3000 }.is_transient());
        assert!(ArbitrationError::Api("connection reset".into()).is_transient());
        assert!(
            ArbitrationError::Status {
                code: 429,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            ArbitrationError::Status {
                code: 503,
                body: String::new()
            }
            .is_transient()
        );

        assert!(
            !ArbitrationError::Status {
                code: 401,
                body: String::new()
            }
            .is_transient()
        );
        assert!(!ArbitrationError::SchemaViolation("bad json".into()).is_transient());
        assert!(!ArbitrationError::MissingField("total_amount".into()).is_transient());
    }
}
