//! The canonical invoice record produced by arbitration.
//!
//! Four fields are required: company name, invoice number, issue date and
//! total amount. Every other field is omitted when absent or implausible;
//! a guessed or garbled value must never survive into the record. Optional
//! numeric fields therefore deserialize leniently (a malformed value becomes
//! `None`), while the required total is strict.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ArbitrationError;

/// Canonical structured invoice data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    /// Name of the company issuing the invoice.
    pub company_name: String,

    /// Invoice identifier (French invoices: "N° facture"; may contain letters).
    pub invoice_number: String,

    /// Issue date as printed, ISO 8601 preferred.
    pub date: String,

    /// Total amount due.
    pub total_amount: Decimal,

    /// Payment due date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,

    /// Net amount (before tax).
    #[serde(
        default,
        deserialize_with = "lenient_decimal",
        skip_serializing_if = "Option::is_none"
    )]
    pub net_amount: Option<Decimal>,

    /// Tax amount.
    #[serde(
        default,
        deserialize_with = "lenient_decimal",
        skip_serializing_if = "Option::is_none"
    )]
    pub tax_amount: Option<Decimal>,

    /// Currency code (e.g. EUR).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,

    /// Billing address as printed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_address: Option<String>,

    /// Condominium association ("syndicat de copropriété", SDC; often after
    /// the word REF). Resolved against the reference registry when possible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condominium_association: Option<String>,

    /// Contract number ("N° contrat"). The service sometimes returns this as
    /// a bare number, so accept either.
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub contract_number: Option<String>,

    /// French business establishment identifier (14 digits, printed with
    /// spaces, e.g. "123 456 789 00012").
    #[serde(
        rename = "SIRET_number",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub siret_number: Option<String>,

    /// Items listed on the invoice.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub line_items: Vec<LineItem>,
}

/// A single invoice line item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// Item description.
    #[serde(default)]
    pub description: String,

    /// Quantity.
    #[serde(
        default,
        deserialize_with = "lenient_decimal",
        skip_serializing_if = "Option::is_none"
    )]
    pub quantity: Option<Decimal>,

    /// Unit price.
    #[serde(
        default,
        deserialize_with = "lenient_decimal",
        skip_serializing_if = "Option::is_none"
    )]
    pub unit_price: Option<Decimal>,

    /// Line total.
    #[serde(
        default,
        deserialize_with = "lenient_decimal",
        skip_serializing_if = "Option::is_none"
    )]
    pub total: Option<Decimal>,
}

impl InvoiceRecord {
    /// Validate required fields and drop implausible optional values.
    ///
    /// Returns an error (record rejected, document fails arbitration) when a
    /// required field is empty or the total is not a positive amount. All
    /// other implausible values are silently omitted.
    pub fn sanitize(&mut self) -> Result<(), ArbitrationError> {
        for (name, value) in [
            ("company_name", &self.company_name),
            ("invoice_number", &self.invoice_number),
            ("date", &self.date),
        ] {
            if value.trim().is_empty() {
                return Err(ArbitrationError::MissingField(name.to_string()));
            }
        }

        if self.total_amount <= Decimal::ZERO {
            return Err(ArbitrationError::SchemaViolation(format!(
                "total_amount must be positive, got {}",
                self.total_amount
            )));
        }

        self.due_date = self
            .due_date
            .take()
            .filter(|d| parse_date(d).is_some());

        self.net_amount = self.net_amount.take().filter(|a| *a >= Decimal::ZERO);
        self.tax_amount = self.tax_amount.take().filter(|a| *a >= Decimal::ZERO);

        self.currency = self
            .currency
            .take()
            .map(|c| c.trim().to_uppercase())
            .filter(|c| c.len() == 3 && c.chars().all(|ch| ch.is_ascii_alphabetic()));

        self.billing_address = self
            .billing_address
            .take()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());

        self.condominium_association = self
            .condominium_association
            .take()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());

        self.contract_number = self
            .contract_number
            .take()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        self.siret_number = self.siret_number.take().and_then(|s| normalize_siret(&s));

        self.line_items.retain(|item| !item.description.trim().is_empty());
        for item in &mut self.line_items {
            item.quantity = item.quantity.take().filter(|q| *q > Decimal::ZERO);
            item.unit_price = item.unit_price.take().filter(|p| *p >= Decimal::ZERO);
            item.total = item.total.take().filter(|t| *t >= Decimal::ZERO);
        }

        Ok(())
    }
}

/// Parse a date string in the formats seen on French invoices.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    for format in ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return Some(date);
        }
    }
    None
}

/// Parse an amount string, tolerating currency symbols, thin spaces and the
/// French comma decimal separator.
pub fn parse_amount(s: &str) -> Option<Decimal> {
    let cleaned: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '€' && *c != '$' && *c != '£')
        .collect();

    // "1.234,56" and "1234,56" use the comma as decimal separator;
    // "1,234.56" uses it for thousands.
    let normalized = if cleaned.contains(',') && !cleaned.contains('.') {
        cleaned.replace(',', ".")
    } else if cleaned.contains(',') && cleaned.contains('.') {
        if cleaned.rfind(',') > cleaned.rfind('.') {
            cleaned.replace('.', "").replace(',', ".")
        } else {
            cleaned.replace(',', "")
        }
    } else {
        cleaned
    };

    normalized.parse::<Decimal>().ok()
}

fn normalize_siret(s: &str) -> Option<String> {
    let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
    let non_separator = s
        .chars()
        .any(|c| !c.is_ascii_digit() && !c.is_whitespace() && c != '.' && c != '-');
    if digits.len() == 14 && !non_separator {
        Some(digits)
    } else {
        None
    }
}

fn lenient_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::Number(n) => parse_amount(&n.to_string()),
        serde_json::Value::String(s) => parse_amount(&s),
        _ => None,
    }))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::String(s) => {
            let trimmed = s.trim().to_string();
            (!trimmed.is_empty()).then_some(trimmed)
        }
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn minimal_json() -> serde_json::Value {
        serde_json::json!({
            "company_name": "EDF",
            "invoice_number": "F-2024-0042",
            "date": "2024-03-01",
            "total_amount": 120.50
        })
    }

    #[test]
    fn test_required_fields_parse() {
        let record: InvoiceRecord = serde_json::from_value(minimal_json()).unwrap();
        assert_eq!(record.company_name, "EDF");
        assert_eq!(record.total_amount, Decimal::new(12050, 2));
        assert!(record.net_amount.is_none());
        assert!(record.line_items.is_empty());
    }

    #[test]
    fn test_missing_required_field_is_schema_violation() {
        let mut json = minimal_json();
        json.as_object_mut().unwrap().remove("total_amount");
        assert!(serde_json::from_value::<InvoiceRecord>(json).is_err());
    }

    #[test]
    fn test_empty_required_field_rejected_by_sanitize() {
        let mut json = minimal_json();
        json["invoice_number"] = serde_json::json!("  ");
        let mut record: InvoiceRecord = serde_json::from_value(json).unwrap();
        match record.sanitize() {
            Err(ArbitrationError::MissingField(field)) => assert_eq!(field, "invoice_number"),
            other => panic!("expected MissingField, got {:?}", other),
        }
    }

    #[test]
    fn test_implausible_optional_values_omitted() {
        let mut json = minimal_json();
        json["net_amount"] = serde_json::json!("not-a-number");
        json["tax_amount"] = serde_json::json!(-3.5);
        json["currency"] = serde_json::json!("euros");
        json["due_date"] = serde_json::json!("sometime soon");
        json["SIRET_number"] = serde_json::json!("12345");

        let mut record: InvoiceRecord = serde_json::from_value(json).unwrap();
        record.sanitize().unwrap();

        assert_eq!(record.net_amount, None);
        assert_eq!(record.tax_amount, None);
        assert_eq!(record.currency, None);
        assert_eq!(record.due_date, None);
        assert_eq!(record.siret_number, None);
    }

    #[test]
    fn test_plausible_optional_values_kept() {
        let mut json = minimal_json();
        json["net_amount"] = serde_json::json!(100.42);
        json["tax_amount"] = serde_json::json!("20,08");
        json["currency"] = serde_json::json!("eur");
        json["due_date"] = serde_json::json!("15/04/2024");
        json["SIRET_number"] = serde_json::json!("123 456 789 00012");
        json["contract_number"] = serde_json::json!(778899);

        let mut record: InvoiceRecord = serde_json::from_value(json).unwrap();
        record.sanitize().unwrap();

        assert_eq!(record.net_amount, Some(Decimal::new(10042, 2)));
        assert_eq!(record.tax_amount, Some(Decimal::new(2008, 2)));
        assert_eq!(record.currency, Some("EUR".to_string()));
        assert_eq!(record.due_date, Some("15/04/2024".to_string()));
        assert_eq!(record.siret_number, Some("12345678900012".to_string()));
        assert_eq!(record.contract_number, Some("778899".to_string()));
    }

    #[test]
    fn test_non_positive_total_rejected() {
        let mut json = minimal_json();
        json["total_amount"] = serde_json::json!(0);
        let mut record: InvoiceRecord = serde_json::from_value(json).unwrap();
        assert!(matches!(
            record.sanitize(),
            Err(ArbitrationError::SchemaViolation(_))
        ));
    }

    #[test]
    fn test_line_items_sanitized() {
        let mut json = minimal_json();
        json["line_items"] = serde_json::json!([
            { "description": "Entretien chaudière", "quantity": 1, "unit_price": 95.0, "total": 95.0 },
            { "description": "", "quantity": 2 },
            { "description": "Déplacement", "quantity": -1, "total": "25,50" }
        ]);

        let mut record: InvoiceRecord = serde_json::from_value(json).unwrap();
        record.sanitize().unwrap();

        assert_eq!(record.line_items.len(), 2);
        assert_eq!(record.line_items[0].total, Some(Decimal::new(9500, 2)));
        assert_eq!(record.line_items[1].quantity, None);
        assert_eq!(record.line_items[1].total, Some(Decimal::new(2550, 2)));
    }

    #[test]
    fn test_parse_amount_formats() {
        assert_eq!(parse_amount("120.50"), Some(Decimal::new(12050, 2)));
        assert_eq!(parse_amount("120,50"), Some(Decimal::new(12050, 2)));
        assert_eq!(parse_amount("1 234,56 €"), Some(Decimal::new(123456, 2)));
        assert_eq!(parse_amount("1,234.56"), Some(Decimal::new(123456, 2)));
        assert_eq!(parse_amount("1.234,56"), Some(Decimal::new(123456, 2)));
        assert_eq!(parse_amount("12O,5O"), None);
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(parse_date("2024-03-01"), Some(expected));
        assert_eq!(parse_date("01/03/2024"), Some(expected));
        assert_eq!(parse_date("01.03.2024"), Some(expected));
        assert_eq!(parse_date("March next year"), None);
    }

    #[test]
    fn test_serialized_field_names() {
        let mut record: InvoiceRecord =
            serde_json::from_value(minimal_json()).unwrap();
        record.siret_number = Some("12345678900012".to_string());

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("SIRET_number").is_some());
        assert!(json.get("net_amount").is_none());
    }
}
