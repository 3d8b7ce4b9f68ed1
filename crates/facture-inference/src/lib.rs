//! ONNX inference abstraction for the facture pipeline.
//!
//! The extraction models (layout detection, region text recognition,
//! whole-page field extraction) are loaded once at process start and shared
//! across all concurrent document tasks. The [`InferenceBackend`] trait is the
//! seam that keeps the pipeline code independent of the runtime and lets
//! tests substitute deterministic stubs.

mod backend;
mod error;
mod tensor;

pub use backend::{InferenceBackend, OrtBackend};
pub use error::InferenceError;
pub use tensor::{InputTensor, OutputTensor};

/// Result type for inference operations.
pub type Result<T> = std::result::Result<T, InferenceError>;
