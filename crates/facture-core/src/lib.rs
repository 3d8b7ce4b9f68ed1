//! Facture: structured data extraction from scanned invoices.
//!
//! A document goes through three per-page extraction channels (layout
//! detection, region text recognition, whole-page field extraction), page
//! results are aggregated under globally unique region keys, and one
//! reasoning-service call arbitrates all evidence into a canonical
//! [`InvoiceRecord`].
//!
//! # Example
//!
//! ```no_run
//! use facture_core::ocr::{LayoutDetector, RegionTextExtractor, StructuredFieldExtractor};
//! use facture_core::pipeline::{Arbiter, Document, DocumentPipeline, OpenAiService, Page, ReferenceRegistry};
//! use facture_core::models::config::FactureConfig;
//! use facture_core::OrtBackend;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FactureConfig::default();
//!
//! let layout = LayoutDetector::new(OrtBackend::from_file("models/layout.onnx")?);
//! let recognition = RegionTextExtractor::new(
//!     OrtBackend::from_file("models/latin_rec.onnx")?,
//!     RegionTextExtractor::<OrtBackend>::multilingual_dictionary(),
//! );
//! let structured = StructuredFieldExtractor::new(
//!     OrtBackend::from_file("models/fields.onnx")?,
//!     StructuredFieldExtractor::<OrtBackend>::load_vocab("models/fields_vocab.txt".as_ref())?,
//! );
//!
//! let service = OpenAiService::new(&config.arbiter, std::env::var("FACTURE_API_KEY")?)?;
//! let pipeline = DocumentPipeline::new(
//!     layout,
//!     recognition,
//!     structured,
//!     ReferenceRegistry::empty(),
//!     Arbiter::new(service),
//! );
//!
//! let image = image::open("facture.png")?;
//! let outcome = pipeline
//!     .process_document(Document {
//!         id: "facture.png".to_string(),
//!         pages: vec![Page { index: 1, image }],
//!     })
//!     .await;
//!
//! if let Some(record) = outcome.record {
//!     println!("{}: {}", record.company_name, record.total_amount);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod models;
pub mod ocr;
pub mod pipeline;

pub use error::{ArbitrationError, ExtractionError, FactureError, RegistryError, Result};
pub use models::config::FactureConfig;
pub use models::record::{InvoiceRecord, LineItem};
pub use pipeline::{Document, DocumentOutcome, DocumentPipeline, DocumentState, Page};

pub use facture_inference::{InferenceBackend, InferenceError, InputTensor, OrtBackend, OutputTensor};
