//! The document pipeline: per-page extraction, aggregation and arbitration.
//!
//! Pages of one document are extracted concurrently; arbitration is one
//! reasoning-service call per document. A failure anywhere is contained to
//! its own scope: a failed extraction channel degrades to empty evidence
//! for that page, a failed arbitration fails that document only, and batch
//! processing always enumerates every document.

mod aggregate;
mod arbiter;
mod registry;

pub use aggregate::{DocumentBundle, PageAggregator};
pub use arbiter::{Arbiter, OpenAiService, ReasoningService};
pub use registry::{ReferenceEntity, ReferenceRegistry};

use std::collections::BTreeMap;
use std::sync::Arc;

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::models::record::InvoiceRecord;
use crate::ocr::{
    LayoutDetector, Region, RegionKind, RegionText, RegionTextExtractor, StructuredFieldExtractor,
};
use facture_inference::InferenceBackend;

/// One page of a scanned document.
pub struct Page {
    /// 1-based position within the document.
    pub index: u32,
    /// Decoded page image.
    pub image: DynamicImage,
}

/// A document: an ordered, non-empty sequence of pages.
pub struct Document {
    /// Caller-supplied identifier, usually the source file name.
    pub id: String,
    pub pages: Vec<Page>,
}

/// Raw extraction output for one page, before aggregation.
#[derive(Debug, Clone, Default)]
pub struct PageExtraction {
    pub page_index: u32,
    /// (local_index, text) per paragraph region.
    pub paragraphs: Vec<(u32, RegionText)>,
    /// (local_index, text) per table region.
    pub tables: Vec<(u32, RegionText)>,
    /// Whole-page structured fields.
    pub fields: BTreeMap<String, String>,
}

/// Lifecycle state of a document in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    /// Pages are still being extracted.
    Pending,
    /// All page evidence merged into a bundle, arbitration not yet run.
    Aggregated,
    /// Arbitration produced a validated record.
    ArbitratedSuccess,
    /// Arbitration failed; the evidence bundle is retained for inspection.
    ArbitratedFailed,
}

/// Final outcome for one document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentOutcome {
    pub document_id: String,
    pub state: DocumentState,

    /// Merged extraction evidence. Present whenever aggregation ran, on
    /// success and on arbitration failure alike.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle: Option<DocumentBundle>,

    /// The canonical record, on success only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<InvoiceRecord>,

    /// Failure description, on failure only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl DocumentOutcome {
    pub fn is_success(&self) -> bool {
        self.state == DocumentState::ArbitratedSuccess
    }
}

/// The full extraction pipeline for scanned invoice documents.
pub struct DocumentPipeline<B, S>
where
    B: InferenceBackend + 'static,
    S: ReasoningService,
{
    layout: Arc<LayoutDetector<B>>,
    region_text: Arc<RegionTextExtractor<B>>,
    structured: Arc<StructuredFieldExtractor<B>>,
    registry: Arc<ReferenceRegistry>,
    arbiter: Arbiter<S>,
}

impl<B, S> DocumentPipeline<B, S>
where
    B: InferenceBackend + 'static,
    S: ReasoningService,
{
    pub fn new(
        layout: LayoutDetector<B>,
        region_text: RegionTextExtractor<B>,
        structured: StructuredFieldExtractor<B>,
        registry: ReferenceRegistry,
        arbiter: Arbiter<S>,
    ) -> Self {
        Self {
            layout: Arc::new(layout),
            region_text: Arc::new(region_text),
            structured: Arc::new(structured),
            registry: Arc::new(registry),
            arbiter,
        }
    }

    /// Detect layout regions on one page, for annotation output.
    pub fn page_regions(&self, page: &Page) -> crate::error::Result<Vec<Region>> {
        Ok(self.layout.detect(&page.image, page.index)?)
    }

    /// Process one document end to end.
    ///
    /// Never returns an error: every failure mode is folded into the
    /// returned outcome so batch callers keep going.
    pub async fn process_document(&self, document: Document) -> DocumentOutcome {
        let document_id = document.id;

        if document.pages.is_empty() {
            warn!("Document {} has no pages", document_id);
            return DocumentOutcome {
                document_id,
                state: DocumentState::ArbitratedFailed,
                bundle: None,
                record: None,
                failure: Some("document has no pages".to_string()),
            };
        }

        debug!(
            "Document {} ({} pages): {:?}",
            document_id,
            document.pages.len(),
            DocumentState::Pending
        );

        let mut tasks = JoinSet::new();
        for page in document.pages {
            let layout = Arc::clone(&self.layout);
            let region_text = Arc::clone(&self.region_text);
            let structured = Arc::clone(&self.structured);
            tasks.spawn_blocking(move || {
                extract_page(&layout, &region_text, &structured, &page)
            });
        }

        let mut extractions = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(extraction) => extractions.push(extraction),
                Err(e) => warn!("Page task failed for document {}: {}", document_id, e),
            }
        }

        let bundle = PageAggregator::aggregate(extractions);
        debug!("Document {}: {:?}", document_id, DocumentState::Aggregated);

        match self.arbiter.resolve(&bundle, &self.registry).await {
            Ok(record) => {
                info!(
                    "Document {} arbitrated: {} / {}",
                    document_id, record.company_name, record.invoice_number
                );
                DocumentOutcome {
                    document_id,
                    state: DocumentState::ArbitratedSuccess,
                    bundle: Some(bundle),
                    record: Some(record),
                    failure: None,
                }
            }
            Err(e) => {
                let evidence_len =
                    bundle.flatten_ocr_text().len() + bundle.flatten_fields().len();
                warn!(
                    "Arbitration failed for document {} ({} evidence chars from {} regions): {}",
                    document_id,
                    evidence_len,
                    bundle.region_count(),
                    e
                );
                DocumentOutcome {
                    document_id,
                    state: DocumentState::ArbitratedFailed,
                    bundle: Some(bundle),
                    record: None,
                    failure: Some(e.to_string()),
                }
            }
        }
    }

    /// Process a batch of documents sequentially.
    ///
    /// One outcome per input document, in input order; a failed document
    /// never stops its siblings.
    pub async fn process_batch(&self, documents: Vec<Document>) -> Vec<DocumentOutcome> {
        let total = documents.len();
        let mut outcomes = Vec::with_capacity(total);

        for document in documents {
            let outcome = self.process_document(document).await;
            outcomes.push(outcome);
        }

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        info!("Batch complete: {}/{} documents succeeded", succeeded, total);

        outcomes
    }
}

/// Run all three extraction channels on one page.
///
/// Each channel degrades to empty evidence on failure so one broken channel
/// (or one broken page) never loses the others' work.
fn extract_page<B: InferenceBackend>(
    layout: &LayoutDetector<B>,
    region_text: &RegionTextExtractor<B>,
    structured: &StructuredFieldExtractor<B>,
    page: &Page,
) -> PageExtraction {
    let mut extraction = PageExtraction {
        page_index: page.index,
        ..PageExtraction::default()
    };

    let regions = match layout.detect(&page.image, page.index) {
        Ok(regions) => regions,
        Err(e) => {
            warn!("Layout detection failed on page {}: {}", page.index, e);
            Vec::new()
        }
    };

    match region_text.extract(&page.image, &regions) {
        Ok(texts) => {
            for region in &regions {
                let Some(text) = texts.get(&region.key()) else {
                    continue;
                };
                match region.kind {
                    RegionKind::Paragraph => {
                        extraction.paragraphs.push((region.local_index, text.clone()))
                    }
                    RegionKind::Table => {
                        extraction.tables.push((region.local_index, text.clone()))
                    }
                }
            }
        }
        Err(e) => warn!("Text recognition failed on page {}: {}", page.index, e),
    }

    match structured.extract(&page.image) {
        Ok(fields) => extraction.fields = fields,
        Err(e) => warn!("Structured extraction failed on page {}: {}", page.index, e),
    }

    extraction
}
