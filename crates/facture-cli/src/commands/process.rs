//! Process command - extract data from one document.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use clap::Args;
use console::style;
use tracing::{debug, info};

use facture_core::ocr::draw_regions;
use facture_core::pipeline::DocumentOutcome;
use facture_core::InvoiceRecord;

use super::{build_pipeline, is_supported_image, load_config, load_document};

/// Arguments for the process command.
#[derive(Args)]
pub struct ProcessArgs {
    /// Page images of one document, in page order
    #[arg(required = true)]
    input: Vec<PathBuf>,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Model directory
    #[arg(short, long)]
    model_dir: Option<PathBuf>,

    /// Write annotated page images with detected regions to this directory
    #[arg(long)]
    annotate: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Plain text summary
    Text,
}

pub async fn run(args: ProcessArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();
    let config = load_config(config_path)?;

    for path in &args.input {
        if !path.exists() {
            anyhow::bail!("Input file not found: {}", path.display());
        }
        if !is_supported_image(path) {
            anyhow::bail!("Unsupported file format: {}", path.display());
        }
    }

    let id = args.input[0]
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("document")
        .to_string();

    info!("Processing document {} ({} pages)", id, args.input.len());

    let pipeline = build_pipeline(&config, args.model_dir.as_deref())?;
    let document = load_document(&id, &args.input)?;

    if let Some(annotate_dir) = &args.annotate {
        fs::create_dir_all(annotate_dir)?;
        for page in &document.pages {
            let regions = pipeline.page_regions(page)?;
            let annotated = draw_regions(&page.image, &regions);
            let path = annotate_dir.join(format!("page-{}.png", page.index));
            annotated.save(&path)?;
            debug!(
                "Annotated page {} ({} regions) -> {}",
                page.index,
                regions.len(),
                path.display()
            );
        }
    }

    let outcome = pipeline.process_document(document).await;

    let output = format_outcome(&outcome, args.format)?;
    if let Some(output_path) = &args.output {
        fs::write(output_path, &output)?;
        println!(
            "{} Output written to {}",
            style("✓").green(),
            output_path.display()
        );
    } else {
        println!("{}", output);
    }

    debug!("Total processing time: {:?}", start.elapsed());

    if !outcome.is_success() {
        anyhow::bail!(
            "Document failed arbitration: {}",
            outcome.failure.as_deref().unwrap_or("unknown error")
        );
    }

    Ok(())
}

pub fn format_outcome(outcome: &DocumentOutcome, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(outcome)?),
        OutputFormat::Text => Ok(match &outcome.record {
            Some(record) => format_record_text(record),
            None => format!(
                "Document: {}\nState: failed\nReason: {}\n",
                outcome.document_id,
                outcome.failure.as_deref().unwrap_or("unknown error")
            ),
        }),
    }
}

fn format_record_text(record: &InvoiceRecord) -> String {
    let mut output = String::new();

    output.push_str(&format!("Company: {}\n", record.company_name));
    output.push_str(&format!("Invoice: {}\n", record.invoice_number));
    output.push_str(&format!("Date:    {}\n", record.date));
    output.push_str(&format!(
        "Total:   {} {}\n",
        record.total_amount,
        record.currency.as_deref().unwrap_or("")
    ));

    if let Some(net) = &record.net_amount {
        output.push_str(&format!("Net:     {}\n", net));
    }
    if let Some(tax) = &record.tax_amount {
        output.push_str(&format!("Tax:     {}\n", tax));
    }
    if let Some(due) = &record.due_date {
        output.push_str(&format!("Due:     {}\n", due));
    }
    if let Some(sdc) = &record.condominium_association {
        output.push_str(&format!("SDC:     {}\n", sdc));
    }
    if let Some(siret) = &record.siret_number {
        output.push_str(&format!("SIRET:   {}\n", siret));
    }

    if !record.line_items.is_empty() {
        output.push_str("\nItems:\n");
        for item in &record.line_items {
            output.push_str(&format!(
                "  - {} ({})\n",
                item.description,
                item.total
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "-".to_string())
            ));
        }
    }

    output
}
