//! Configuration structures for the extraction pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the facture pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FactureConfig {
    /// Layout detection configuration.
    pub layout: LayoutConfig,

    /// Region text recognition configuration.
    pub recognition: RecognitionConfig,

    /// Whole-page structured extraction configuration.
    pub structured: StructuredConfig,

    /// Arbitration (reasoning service) configuration.
    pub arbiter: ArbiterConfig,

    /// Model file locations.
    pub models: ModelConfig,

    /// Reference registry location.
    pub registry: RegistryConfig,
}

/// Layout detection model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Model input width in pixels.
    pub input_width: u32,

    /// Model input height in pixels.
    pub input_height: u32,

    /// Minimum detection score to keep a region (0.0 - 1.0).
    pub confidence_threshold: f32,

    /// IoU threshold for suppressing overlapping same-kind regions.
    pub nms_threshold: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            input_width: 800,
            input_height: 608,
            confidence_threshold: 0.5,
            nms_threshold: 0.5,
        }
    }
}

/// Region text recognition configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Target line height for the recognition model.
    pub target_height: u32,

    /// Maximum line width fed to the recognition model.
    pub max_width: u32,

    /// Minimum ink rows for a band to count as a text line.
    pub min_line_height: u32,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            target_height: 48,
            max_width: 480,
            min_line_height: 3,
        }
    }
}

/// Whole-page structured extraction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuredConfig {
    /// Model input width in pixels.
    pub input_width: u32,

    /// Model input height in pixels.
    pub input_height: u32,
}

impl Default for StructuredConfig {
    fn default() -> Self {
        Self {
            input_width: 960,
            input_height: 1280,
        }
    }
}

/// Reasoning-service configuration for the arbitration step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// Chat-completions endpoint base URL.
    pub endpoint: String,

    /// Model identifier.
    pub model: String,

    /// Environment variable holding the API key. The key itself is never
    /// written to config files.
    pub api_key_env: String,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,

    /// Number of retries after the first attempt, transient failures only.
    pub max_retries: u32,

    /// Initial backoff in milliseconds, doubled per retry.
    pub backoff_ms: u64,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "FACTURE_API_KEY".to_string(),
            timeout_secs: 30,
            max_retries: 2,
            backoff_ms: 500,
        }
    }
}

/// Model file paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Directory containing model files.
    pub model_dir: PathBuf,

    /// Layout detection model file name.
    pub layout_model: String,

    /// Text recognition model file name.
    pub recognition_model: String,

    /// Recognition character dictionary file name.
    pub dictionary: String,

    /// Whole-page field extraction model file name.
    pub structured_model: String,

    /// Structured extraction token vocabulary file name.
    pub vocabulary: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            layout_model: "layout.onnx".to_string(),
            recognition_model: "latin_rec.onnx".to_string(),
            dictionary: "latin_dict.txt".to_string(),
            structured_model: "fields.onnx".to_string(),
            vocabulary: "fields_vocab.txt".to_string(),
        }
    }
}

/// Reference registry location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// CSV file with known counter-party entities.
    pub path: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/entities.csv"),
        }
    }
}

impl FactureConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)
    }

    /// Get full path to a model file.
    pub fn model_path(&self, model_name: &str) -> PathBuf {
        self.models.model_dir.join(model_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip() {
        let config = FactureConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: FactureConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.arbiter.model, "gpt-4o-mini");
        assert_eq!(parsed.layout.input_width, 800);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: FactureConfig =
            serde_json::from_str(r#"{"arbiter": {"timeout_secs": 5}}"#).unwrap();
        assert_eq!(parsed.arbiter.timeout_secs, 5);
        assert_eq!(parsed.arbiter.max_retries, 2);
        assert_eq!(parsed.recognition.target_height, 48);
    }
}
