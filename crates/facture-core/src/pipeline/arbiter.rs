//! Arbitration: one reasoning-service call that reconciles all extraction
//! evidence into the canonical invoice record.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::aggregate::DocumentBundle;
use super::registry::ReferenceRegistry;
use crate::error::ArbitrationError;
use crate::models::config::ArbiterConfig;
use crate::models::record::InvoiceRecord;

/// A chat-completions style reasoning service.
///
/// Abstracted behind a trait so arbitration logic (prompt assembly, retry
/// policy, record validation) is testable without the network.
pub trait ReasoningService: Send + Sync {
    /// Send one prompt and return the structured-output arguments payload,
    /// a JSON object string conforming to the invoice record schema.
    fn complete(
        &self,
        prompt: &str,
    ) -> impl Future<Output = Result<String, ArbitrationError>> + Send;
}

/// Reasoning service backed by an OpenAI-compatible chat-completions API.
pub struct OpenAiService {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl OpenAiService {
    /// Create a service from arbitration configuration and an API key.
    pub fn new(config: &ArbiterConfig, api_key: String) -> Result<Self, ArbitrationError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ArbitrationError::Api(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            timeout,
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Deserialize)]
struct FunctionCall {
    arguments: String,
}

impl ReasoningService for OpenAiService {
    async fn complete(&self, prompt: &str) -> Result<String, ArbitrationError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You extract structured invoice data from OCR evidence. \
                                Use only values supported by the evidence; omit fields \
                                you cannot support."
                },
                { "role": "user", "content": prompt }
            ],
            "tools": [{
                "type": "function",
                "function": {
                    "name": "structure_invoice",
                    "description": "Record the structured fields of one invoice",
                    "parameters": invoice_schema()
                }
            }],
            "tool_choice": {
                "type": "function",
                "function": { "name": "structure_invoice" }
            }
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ArbitrationError::Timeout {
                        elapsed_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    ArbitrationError::Api(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ArbitrationError::Status {
                code: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ArbitrationError::SchemaViolation(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.tool_calls.into_iter().next())
            .map(|t| t.function.arguments)
            .ok_or_else(|| {
                ArbitrationError::SchemaViolation("response contains no function call".to_string())
            })
    }
}

/// JSON schema for the forced `structure_invoice` function.
fn invoice_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "company_name": {
                "type": "string",
                "description": "Name of the company issuing the invoice"
            },
            "invoice_number": {
                "type": "string",
                "description": "Invoice identifier, labelled 'N° facture' on French invoices"
            },
            "date": {
                "type": "string",
                "description": "Issue date as printed"
            },
            "total_amount": {
                "type": "number",
                "description": "Total amount due"
            },
            "due_date": { "type": "string" },
            "net_amount": { "type": "number" },
            "tax_amount": { "type": "number" },
            "currency": { "type": "string" },
            "billing_address": { "type": "string" },
            "condominium_association": {
                "type": "string",
                "description": "Condominium association (SDC), often after the word REF; \
                                resolve against the known entities list when possible"
            },
            "contract_number": { "type": "string" },
            "SIRET_number": {
                "type": "string",
                "description": "14-digit French business establishment identifier"
            },
            "line_items": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "description": { "type": "string" },
                        "quantity": { "type": "number" },
                        "unit_price": { "type": "number" },
                        "total": { "type": "number" }
                    }
                }
            }
        },
        "required": ["company_name", "invoice_number", "date", "total_amount"]
    })
}

/// Assembles the arbitration prompt and drives the reasoning service with
/// transient-only retries.
pub struct Arbiter<S: ReasoningService> {
    service: S,
    max_retries: u32,
    backoff: Duration,
}

impl<S: ReasoningService> Arbiter<S> {
    pub fn new(service: S) -> Self {
        Self {
            service,
            max_retries: 2,
            backoff: Duration::from_millis(500),
        }
    }

    /// Set retry policy from arbitration configuration.
    pub fn with_config(mut self, config: &ArbiterConfig) -> Self {
        self.max_retries = config.max_retries;
        self.backoff = Duration::from_millis(config.backoff_ms);
        self
    }

    #[cfg(test)]
    pub(crate) fn service_ref(&self) -> &S {
        &self.service
    }

    /// Resolve a document bundle into a validated invoice record.
    ///
    /// Transient failures are retried with doubling backoff up to the
    /// configured count; a schema violation or missing required field is
    /// never retried, since the same payload would come back again.
    pub async fn resolve(
        &self,
        bundle: &DocumentBundle,
        registry: &ReferenceRegistry,
    ) -> Result<InvoiceRecord, ArbitrationError> {
        let prompt = build_prompt(bundle, registry);
        debug!("Arbitration prompt: {} chars", prompt.len());

        let mut backoff = self.backoff;
        let mut attempt = 0u32;

        loop {
            match self.call_once(&prompt).await {
                Ok(record) => return Ok(record),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        "Arbitration attempt {} failed ({}), retrying in {:?}",
                        attempt, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call_once(&self, prompt: &str) -> Result<InvoiceRecord, ArbitrationError> {
        let arguments = self.service.complete(prompt).await?;

        let mut record: InvoiceRecord = serde_json::from_str(&arguments)
            .map_err(|e| ArbitrationError::SchemaViolation(e.to_string()))?;
        record.sanitize()?;

        Ok(record)
    }
}

/// Build the arbitration prompt from the document evidence and the known
/// entities block.
fn build_prompt(bundle: &DocumentBundle, registry: &ReferenceRegistry) -> String {
    let mut prompt = String::new();

    prompt.push_str(
        "Extract the structured invoice fields from the evidence below.\n\
         The OCR text comes from scanned regions and may contain character \
         errors; the page-level fields come from a document model that reads \
         printed numerics more reliably. When the two disagree on a numeric \
         value, prefer the page-level field. Omit any field whose value is \
         not plausibly supported by the evidence.\n",
    );

    if !registry.is_empty() {
        prompt.push_str(
            "\nKnown condominium associations (name - address - postal code - city):\n",
        );
        prompt.push_str(&registry.render_block());
        prompt.push('\n');
    }

    prompt.push_str("\nOCR text:\n");
    prompt.push_str(&bundle.flatten_ocr_text());

    prompt.push_str("\n\nPage-level fields:\n");
    prompt.push_str(&bundle.flatten_fields());

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{RegionKey, RegionKind, RegionText, TextFragment};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Service stub returning a scripted sequence of responses.
    struct ScriptedService {
        responses: Mutex<Vec<Result<String, ArbitrationError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedService {
        fn new(responses: Vec<Result<String, ArbitrationError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(0),
            }
        }

        fn call_count(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    impl ReasoningService for ScriptedService {
        async fn complete(&self, _prompt: &str) -> Result<String, ArbitrationError> {
            *self.calls.lock().unwrap() += 1;
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                panic!("unexpected extra call to reasoning service");
            }
            responses.remove(0)
        }
    }

    fn valid_arguments() -> String {
        r#"{
            "company_name": "EDF",
            "invoice_number": "F-2024-0042",
            "date": "2024-03-01",
            "total_amount": 120.50
        }"#
        .to_string()
    }

    fn bundle_with_evidence() -> DocumentBundle {
        let mut bundle = DocumentBundle::default();
        bundle.paragraphs.insert(
            RegionKey::new(1, RegionKind::Paragraph, 1),
            RegionText {
                fragments: vec![TextFragment {
                    text: "Facture EDF N° F-2024-0042".to_string(),
                    confidence: 0.92,
                }],
            },
        );
        bundle
            .structured_fields
            .insert("total_amount".to_string(), "120,50".to_string());
        bundle
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_parses_and_sanitizes() {
        let service = ScriptedService::new(vec![Ok(valid_arguments())]);
        let arbiter = Arbiter::new(service);

        let record = arbiter
            .resolve(&bundle_with_evidence(), &ReferenceRegistry::empty())
            .await
            .unwrap();

        assert_eq!(record.company_name, "EDF");
        assert_eq!(record.invoice_number, "F-2024-0042");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried_then_succeeds() {
        let service = ScriptedService::new(vec![
            Err(ArbitrationError::Timeout { elapsed_ms: 30000 }),
            Err(ArbitrationError::Status {
                code: 503,
                body: String::new(),
            }),
            Ok(valid_arguments()),
        ]);
        let arbiter = Arbiter::new(service);

        let record = arbiter
            .resolve(&bundle_with_evidence(), &ReferenceRegistry::empty())
            .await
            .unwrap();

        assert_eq!(record.company_name, "EDF");
        assert_eq!(arbiter.service.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_returns_last_error() {
        let service = ScriptedService::new(vec![
            Err(ArbitrationError::Timeout { elapsed_ms: 30000 }),
            Err(ArbitrationError::Timeout { elapsed_ms: 30000 }),
            Err(ArbitrationError::Timeout { elapsed_ms: 30000 }),
        ]);
        let arbiter = Arbiter::new(service);

        let result = arbiter
            .resolve(&bundle_with_evidence(), &ReferenceRegistry::empty())
            .await;

        assert!(matches!(result, Err(ArbitrationError::Timeout { .. })));
        assert_eq!(arbiter.service.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schema_violation_never_retried() {
        let service = ScriptedService::new(vec![Ok("not json at all".to_string())]);
        let arbiter = Arbiter::new(service);

        let result = arbiter
            .resolve(&bundle_with_evidence(), &ReferenceRegistry::empty())
            .await;

        assert!(matches!(result, Err(ArbitrationError::SchemaViolation(_))));
        assert_eq!(arbiter.service.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_required_field_not_retried() {
        let service = ScriptedService::new(vec![Ok(r#"{
            "company_name": " ",
            "invoice_number": "F-1",
            "date": "2024-03-01",
            "total_amount": 10.0
        }"#
        .to_string())]);
        let arbiter = Arbiter::new(service);

        let result = arbiter
            .resolve(&bundle_with_evidence(), &ReferenceRegistry::empty())
            .await;

        assert!(matches!(result, Err(ArbitrationError::MissingField(_))));
        assert_eq!(arbiter.service.call_count(), 1);
    }

    #[test]
    fn test_prompt_embeds_registry_and_evidence() {
        let csv = "libelleCopro,adresse,codePostal,ville\nSyndic ABC,12 Rue X,75010,Paris\n";
        let registry = ReferenceRegistry::from_reader(csv.as_bytes()).unwrap();

        let prompt = build_prompt(&bundle_with_evidence(), &registry);

        assert!(prompt.contains("Syndic ABC - 12 Rue X - 75010 - Paris"));
        assert!(prompt.contains("Facture EDF N° F-2024-0042"));
        assert!(prompt.contains("total_amount: 120,50"));
        assert!(prompt.contains("prefer the page-level field"));
    }

    #[test]
    fn test_prompt_omits_registry_section_when_empty() {
        let prompt = build_prompt(&bundle_with_evidence(), &ReferenceRegistry::empty());
        assert!(!prompt.contains("Known condominium associations"));
    }

    #[test]
    fn test_schema_requires_core_fields() {
        let schema = invoice_schema();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(
            required,
            vec!["company_name", "invoice_number", "date", "total_amount"]
        );
        assert!(schema["properties"]["SIRET_number"].is_object());
    }
}
