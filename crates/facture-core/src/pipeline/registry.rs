//! Reference registry of known counter-party entities.
//!
//! A CSV of condominium associations (name, address, postal code, city) is
//! rendered into the arbitration prompt so the reasoning service can resolve
//! noisy OCR against known entities.

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::RegistryError;

/// One known counter-party entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceEntity {
    pub name: String,
    pub address: String,
    pub postal_code: String,
    pub city: String,
}

/// Registry of known entities, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct ReferenceRegistry {
    entities: Vec<ReferenceEntity>,
}

/// Accepted header spellings per column: the French production export and
/// the plain English form.
const NAME_COLUMNS: [&str; 3] = ["libellecopro", "display_name", "name"];
const ADDRESS_COLUMNS: [&str; 2] = ["adresse", "address"];
const POSTAL_COLUMNS: [&str; 2] = ["codepostal", "postal_code"];
const CITY_COLUMNS: [&str; 2] = ["ville", "city"];

impl ReferenceRegistry {
    /// An empty registry, used when no CSV is configured.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load the registry from a CSV file.
    pub fn from_csv_path(path: &Path) -> Result<Self, RegistryError> {
        let file = std::fs::File::open(path)?;
        let registry = Self::from_reader(file)?;
        debug!(
            "Loaded reference registry from {} ({} entities)",
            path.display(),
            registry.len()
        );
        Ok(registry)
    }

    /// Load the registry from any CSV reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, RegistryError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();

        let name_col = find_column(&headers, &NAME_COLUMNS)
            .ok_or_else(|| RegistryError::MissingColumn("libelleCopro".to_string()))?;
        let address_col = find_column(&headers, &ADDRESS_COLUMNS)
            .ok_or_else(|| RegistryError::MissingColumn("adresse".to_string()))?;
        let postal_col = find_column(&headers, &POSTAL_COLUMNS)
            .ok_or_else(|| RegistryError::MissingColumn("codePostal".to_string()))?;
        let city_col = find_column(&headers, &CITY_COLUMNS)
            .ok_or_else(|| RegistryError::MissingColumn("ville".to_string()))?;

        let mut entities = Vec::new();
        for result in csv_reader.records() {
            let record = result?;
            let field = |i: usize| record.get(i).unwrap_or("").trim().to_string();

            let name = field(name_col);
            if name.is_empty() {
                warn!("Skipping registry row with empty name");
                continue;
            }

            entities.push(ReferenceEntity {
                name,
                address: field(address_col),
                postal_code: field(postal_col),
                city: field(city_col),
            });
        }

        Ok(Self { entities })
    }

    /// Render the registry as one line per entity, the format embedded into
    /// the arbitration prompt.
    pub fn render_block(&self) -> String {
        self.entities
            .iter()
            .map(|e| format!("{} - {} - {} - {}", e.name, e.address, e.postal_code, e.city))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn entities(&self) -> &[ReferenceEntity] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

fn find_column(headers: &[String], aliases: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| aliases.iter().any(|a| h == a))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_load_french_headers() {
        let csv = "libelleCopro,adresse,codePostal,ville\n\
                   Syndic ABC,12 Rue X,75010,Paris\n\
                   SDC Les Lilas,3 Avenue Y,69003,Lyon\n";

        let registry = ReferenceRegistry::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.entities()[0].name, "Syndic ABC");
        assert_eq!(registry.entities()[1].postal_code, "69003");
    }

    #[test]
    fn test_load_english_headers() {
        let csv = "name,address,postal_code,city\nSyndic ABC,12 Rue X,75010,Paris\n";
        let registry = ReferenceRegistry::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_missing_column_is_an_error() {
        let csv = "libelleCopro,adresse,ville\nSyndic ABC,12 Rue X,Paris\n";
        match ReferenceRegistry::from_reader(csv.as_bytes()) {
            Err(RegistryError::MissingColumn(col)) => assert_eq!(col, "codePostal"),
            other => panic!("expected MissingColumn, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_name_rows_skipped() {
        let csv = "libelleCopro,adresse,codePostal,ville\n\
                   ,12 Rue X,75010,Paris\n\
                   Syndic ABC,12 Rue X,75010,Paris\n";
        let registry = ReferenceRegistry::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_render_block_format() {
        let csv = "libelleCopro,adresse,codePostal,ville\nSyndic ABC,12 Rue X,75010,Paris\n";
        let registry = ReferenceRegistry::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(registry.render_block(), "Syndic ABC - 12 Rue X - 75010 - Paris");
    }

    #[test]
    fn test_empty_registry_renders_empty_block() {
        let registry = ReferenceRegistry::empty();
        assert!(registry.is_empty());
        assert_eq!(registry.render_block(), "");
    }
}
