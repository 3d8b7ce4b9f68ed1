//! Document-level aggregation of per-page extraction results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::PageExtraction;
use crate::ocr::{RegionKey, RegionKind, RegionText};

/// All extraction evidence for one document, merged across pages.
///
/// Region text is keyed by the globally unique [`RegionKey`]; structured
/// fields are merged across pages with the first non-empty value winning in
/// page order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentBundle {
    /// Recognized paragraph text per region.
    pub paragraphs: BTreeMap<RegionKey, RegionText>,

    /// Recognized table text per region.
    pub tables: BTreeMap<RegionKey, RegionText>,

    /// Structured fields merged across pages.
    pub structured_fields: BTreeMap<String, String>,
}

impl DocumentBundle {
    /// Total number of regions across both kinds.
    pub fn region_count(&self) -> usize {
        self.paragraphs.len() + self.tables.len()
    }

    /// Whether no evidence was extracted at all.
    pub fn is_empty(&self) -> bool {
        self.paragraphs.is_empty() && self.tables.is_empty() && self.structured_fields.is_empty()
    }

    /// Flatten all recognized region text into one string, paragraphs first
    /// then tables, each kind in key order (page, then local index).
    pub fn flatten_ocr_text(&self) -> String {
        self.paragraphs
            .values()
            .chain(self.tables.values())
            .filter(|t| !t.is_empty())
            .map(|t| t.joined())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Flatten structured fields into "field: value" pairs, space-joined.
    pub fn flatten_fields(&self) -> String {
        self.structured_fields
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Merges per-page extraction results into one [`DocumentBundle`].
pub struct PageAggregator;

impl PageAggregator {
    /// Aggregate page results, in ascending page order regardless of the
    /// order pages finished in.
    ///
    /// Every region key from every page survives into the bundle; the
    /// composite key makes a collision impossible, so a duplicate insert
    /// indicates a bug upstream and is logged.
    pub fn aggregate(mut pages: Vec<PageExtraction>) -> DocumentBundle {
        pages.sort_by_key(|p| p.page_index);

        let mut bundle = DocumentBundle::default();

        for page in pages {
            for (local_index, text) in page.paragraphs {
                let key = RegionKey::new(page.page_index, RegionKind::Paragraph, local_index);
                if bundle.paragraphs.insert(key, text).is_some() {
                    warn!("Duplicate paragraph key {} during aggregation", key);
                }
            }

            for (local_index, text) in page.tables {
                let key = RegionKey::new(page.page_index, RegionKind::Table, local_index);
                if bundle.tables.insert(key, text).is_some() {
                    warn!("Duplicate table key {} during aggregation", key);
                }
            }

            // First non-empty value wins in page order.
            for (field, value) in page.fields {
                if value.trim().is_empty() {
                    continue;
                }
                bundle.structured_fields.entry(field).or_insert(value);
            }
        }

        debug!(
            "Aggregated {} paragraphs, {} tables, {} structured fields",
            bundle.paragraphs.len(),
            bundle.tables.len(),
            bundle.structured_fields.len()
        );

        bundle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::TextFragment;
    use pretty_assertions::assert_eq;

    fn text(s: &str) -> RegionText {
        RegionText {
            fragments: vec![TextFragment {
                text: s.to_string(),
                confidence: 0.9,
            }],
        }
    }

    fn page(index: u32) -> PageExtraction {
        PageExtraction {
            page_index: index,
            paragraphs: Vec::new(),
            tables: Vec::new(),
            fields: BTreeMap::new(),
        }
    }

    #[test]
    fn test_same_local_index_on_two_pages_keeps_both() {
        let mut p1 = page(1);
        p1.tables.push((1, text("Lignes page 1")));
        let mut p2 = page(2);
        p2.tables.push((1, text("Lignes page 2")));

        let bundle = PageAggregator::aggregate(vec![p1, p2]);

        assert_eq!(bundle.tables.len(), 2);
        let k1 = RegionKey::new(1, RegionKind::Table, 1);
        let k2 = RegionKey::new(2, RegionKind::Table, 1);
        assert_eq!(bundle.tables[&k1].joined(), "Lignes page 1");
        assert_eq!(bundle.tables[&k2].joined(), "Lignes page 2");
    }

    #[test]
    fn test_region_count_is_sum_over_pages() {
        let mut p1 = page(1);
        p1.paragraphs.push((1, text("a")));
        p1.paragraphs.push((2, text("b")));
        p1.tables.push((1, text("t")));
        let mut p2 = page(2);
        p2.paragraphs.push((1, text("c")));

        let bundle = PageAggregator::aggregate(vec![p1, p2]);
        assert_eq!(bundle.region_count(), 4);
    }

    #[test]
    fn test_first_non_empty_field_wins_in_page_order() {
        let mut p1 = page(1);
        p1.fields.insert("total_amount".to_string(), String::new());
        p1.fields.insert("company_name".to_string(), "EDF".to_string());
        let mut p2 = page(2);
        p2.fields
            .insert("total_amount".to_string(), "120,50".to_string());
        p2.fields
            .insert("company_name".to_string(), "Engie".to_string());

        // Pages delivered out of order; aggregation must sort first.
        let bundle = PageAggregator::aggregate(vec![p2, p1]);

        assert_eq!(bundle.structured_fields["total_amount"], "120,50");
        assert_eq!(bundle.structured_fields["company_name"], "EDF");
    }

    #[test]
    fn test_aggregation_is_deterministic() {
        let make = || {
            let mut p1 = page(1);
            p1.paragraphs.push((1, text("x")));
            p1.fields.insert("date".to_string(), "2024-01-15".to_string());
            let mut p2 = page(2);
            p2.tables.push((1, text("y")));
            (p1, p2)
        };

        let (a1, a2) = make();
        let (b1, b2) = make();
        let forward = PageAggregator::aggregate(vec![a1, a2]);
        let reversed = PageAggregator::aggregate(vec![b2, b1]);
        assert_eq!(forward, reversed);
    }

    #[test]
    fn test_flatten_ocr_text_orders_paragraphs_before_tables() {
        let mut p1 = page(1);
        p1.paragraphs.push((1, text("Facture EDF")));
        p1.tables.push((1, text("Total 120,50")));
        p1.paragraphs.push((2, RegionText::default()));

        let bundle = PageAggregator::aggregate(vec![p1]);
        assert_eq!(bundle.flatten_ocr_text(), "Facture EDF Total 120,50");
    }

    #[test]
    fn test_flatten_fields_renders_pairs() {
        let mut p1 = page(1);
        p1.fields
            .insert("invoice_number".to_string(), "F-42".to_string());
        p1.fields
            .insert("total_amount".to_string(), "99,00".to_string());

        let bundle = PageAggregator::aggregate(vec![p1]);
        assert_eq!(
            bundle.flatten_fields(),
            "invoice_number: F-42 total_amount: 99,00"
        );
    }

    #[test]
    fn test_empty_document_yields_empty_bundle() {
        let bundle = PageAggregator::aggregate(Vec::new());
        assert!(bundle.is_empty());
        assert_eq!(bundle.region_count(), 0);
    }
}
