//! Inference backend implementations.

mod ort;

pub use ort::OrtBackend;

use crate::{InputTensor, OutputTensor, Result};

/// Trait for ONNX inference backends.
///
/// Implementations must be shareable across concurrent document tasks:
/// `run` takes `&self`, so a backend that is not internally thread-safe has
/// to serialize access itself (see [`OrtBackend`]).
pub trait InferenceBackend: Send + Sync {
    /// Run inference with the given named input tensors.
    fn run(&self, inputs: &[(&str, InputTensor)]) -> Result<Vec<(String, OutputTensor)>>;

    /// Get the input names expected by the model.
    fn input_names(&self) -> &[String];

    /// Get the output names produced by the model.
    fn output_names(&self) -> &[String];
}
