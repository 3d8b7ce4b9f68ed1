//! CLI subcommands.

pub mod batch;
pub mod config;
pub mod process;

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use facture_core::models::config::FactureConfig;
use facture_core::ocr::{LayoutDetector, RegionTextExtractor, StructuredFieldExtractor};
use facture_core::pipeline::{Arbiter, DocumentPipeline, OpenAiService, ReferenceRegistry};
use facture_core::{Document, FactureError, OrtBackend, Page};

/// Load configuration from an explicit path, or defaults.
pub fn load_config(config_path: Option<&str>) -> anyhow::Result<FactureConfig> {
    match config_path {
        Some(path) => Ok(FactureConfig::from_file(Path::new(path))?),
        None => Ok(FactureConfig::default()),
    }
}

/// Build the full pipeline from configuration.
///
/// Fails fast when a model file or the API key is unavailable; nothing is
/// processed with a partial pipeline.
pub fn build_pipeline(
    config: &FactureConfig,
    model_dir: Option<&Path>,
) -> anyhow::Result<DocumentPipeline<OrtBackend, OpenAiService>> {
    let model_dir = model_dir.unwrap_or(&config.models.model_dir);

    let layout_path = model_dir.join(&config.models.layout_model);
    let recognition_path = model_dir.join(&config.models.recognition_model);
    let structured_path = model_dir.join(&config.models.structured_model);

    for path in [&layout_path, &recognition_path, &structured_path] {
        if !path.exists() {
            return Err(FactureError::ModelUnavailable(format!(
                "{} (place the ONNX models under {} or pass --model-dir)",
                path.display(),
                model_dir.display()
            ))
            .into());
        }
    }

    let layout = LayoutDetector::new(OrtBackend::from_file(&layout_path)?)
        .with_config(config.layout.clone());

    let dictionary_path = model_dir.join(&config.models.dictionary);
    let dictionary = if dictionary_path.exists() {
        RegionTextExtractor::<OrtBackend>::load_dictionary(&dictionary_path)?
    } else {
        debug!("No dictionary file, using the built-in multilingual dictionary");
        RegionTextExtractor::<OrtBackend>::multilingual_dictionary()
    };
    let recognition = RegionTextExtractor::new(OrtBackend::from_file(&recognition_path)?, dictionary)
        .with_config(config.recognition.clone());

    let vocab_path = model_dir.join(&config.models.vocabulary);
    let vocab = StructuredFieldExtractor::<OrtBackend>::load_vocab(&vocab_path)?;
    let structured = StructuredFieldExtractor::new(OrtBackend::from_file(&structured_path)?, vocab)
        .with_config(config.structured.clone());

    let registry = if config.registry.path.exists() {
        ReferenceRegistry::from_csv_path(&config.registry.path)?
    } else {
        warn!(
            "Reference registry not found at {}, arbitrating without known entities",
            config.registry.path.display()
        );
        ReferenceRegistry::empty()
    };

    let api_key = std::env::var(&config.arbiter.api_key_env).map_err(|_| {
        anyhow::anyhow!(
            "API key not set. Export {} before running.",
            config.arbiter.api_key_env
        )
    })?;
    let service = OpenAiService::new(&config.arbiter, api_key)?;
    let arbiter = Arbiter::new(service).with_config(&config.arbiter);

    Ok(DocumentPipeline::new(
        layout,
        recognition,
        structured,
        registry,
        arbiter,
    ))
}

/// Load one document from ordered page image paths.
pub fn load_document(id: &str, paths: &[PathBuf]) -> anyhow::Result<Document> {
    let mut pages = Vec::with_capacity(paths.len());

    for (position, path) in paths.iter().enumerate() {
        let image = image::open(path).map_err(|e| {
            FactureError::UnsupportedInput(format!("{}: {}", path.display(), e))
        })?;
        pages.push(Page {
            index: position as u32 + 1,
            image,
        });
    }

    Ok(Document {
        id: id.to_string(),
        pages,
    })
}

/// Whether a path looks like a supported page image.
pub fn is_supported_image(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    matches!(ext.as_str(), "png" | "jpg" | "jpeg" | "tiff" | "tif" | "bmp" | "webp")
}
