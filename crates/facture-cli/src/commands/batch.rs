//! Batch processing command: each matched file is one single-page document.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use clap::Args;
use console::style;
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use facture_core::pipeline::DocumentOutcome;

use super::{build_pipeline, is_supported_image, load_config, load_document};

/// Arguments for the batch command.
#[derive(Args)]
pub struct BatchArgs {
    /// Input files or glob pattern
    #[arg(required = true)]
    input: String,

    /// Output directory for per-document results
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Output format for each document
    #[arg(short, long, value_enum, default_value = "json")]
    format: super::process::OutputFormat,

    /// Also generate a summary CSV
    #[arg(long)]
    summary: bool,

    /// Model directory
    #[arg(short, long)]
    model_dir: Option<PathBuf>,
}

pub async fn run(args: BatchArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();
    let config = load_config(config_path)?;

    let files: Vec<PathBuf> = glob(&args.input)?
        .filter_map(|r| r.ok())
        .filter(|p| is_supported_image(p))
        .collect();

    if files.is_empty() {
        anyhow::bail!("No matching files found for pattern: {}", args.input);
    }

    println!(
        "{} Found {} files to process",
        style("ℹ").blue(),
        files.len()
    );

    if let Some(ref output_dir) = args.output_dir {
        fs::create_dir_all(output_dir)?;
    }

    let pipeline = build_pipeline(&config, args.model_dir.as_deref())?;

    let progress = ProgressBar::new(files.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files")
            .unwrap()
            .progress_chars("=>-"),
    );

    // Every file gets an outcome; a failed document never stops the batch.
    let mut outcomes = Vec::with_capacity(files.len());
    for path in &files {
        let id = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("document")
            .to_string();

        // An undecodable input is a failed document, not a dead batch.
        let outcome = match load_document(&id, std::slice::from_ref(path)) {
            Ok(document) => pipeline.process_document(document).await,
            Err(e) => DocumentOutcome {
                document_id: id,
                state: facture_core::DocumentState::ArbitratedFailed,
                bundle: None,
                record: None,
                failure: Some(e.to_string()),
            },
        };

        outcomes.push(outcome);
        progress.inc(1);
    }

    progress.finish_with_message("Complete");

    if let Some(output_dir) = &args.output_dir {
        for outcome in &outcomes {
            let stem = PathBuf::from(&outcome.document_id)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("document")
                .to_string();
            let extension = match args.format {
                super::process::OutputFormat::Json => "json",
                super::process::OutputFormat::Text => "txt",
            };
            let output_path = output_dir.join(format!("{}.{}", stem, extension));
            let content = super::process::format_outcome(outcome, args.format)?;
            fs::write(&output_path, content)?;
            debug!("Wrote output to {}", output_path.display());
        }
    }

    if args.summary {
        let summary_path = args
            .output_dir
            .as_ref()
            .map(|d| d.join("summary.csv"))
            .unwrap_or_else(|| PathBuf::from("summary.csv"));
        write_summary(&summary_path, &outcomes)?;
        println!(
            "{} Summary written to {}",
            style("✓").green(),
            summary_path.display()
        );
    }

    let succeeded: Vec<_> = outcomes.iter().filter(|o| o.is_success()).collect();
    let failed: Vec<_> = outcomes.iter().filter(|o| !o.is_success()).collect();

    println!();
    println!(
        "{} Processed {} documents in {:?}",
        style("✓").green(),
        outcomes.len(),
        start.elapsed()
    );
    println!(
        "   {} successful, {} failed",
        style(succeeded.len()).green(),
        style(failed.len()).red()
    );

    if !failed.is_empty() {
        println!();
        println!("{}", style("Failed documents:").red());
        for outcome in &failed {
            println!(
                "  - {}: {}",
                outcome.document_id,
                outcome.failure.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(())
}

fn write_summary(path: &PathBuf, outcomes: &[DocumentOutcome]) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    wtr.write_record([
        "document",
        "status",
        "company_name",
        "invoice_number",
        "date",
        "total_amount",
        "currency",
        "error",
    ])?;

    for outcome in outcomes {
        if let Some(record) = &outcome.record {
            let total = record.total_amount.to_string();
            wtr.write_record([
                outcome.document_id.as_str(),
                "success",
                record.company_name.as_str(),
                record.invoice_number.as_str(),
                record.date.as_str(),
                total.as_str(),
                record.currency.as_deref().unwrap_or(""),
                "",
            ])?;
        } else {
            wtr.write_record([
                outcome.document_id.as_str(),
                "failed",
                "",
                "",
                "",
                "",
                "",
                outcome.failure.as_deref().unwrap_or(""),
            ])?;
        }
    }

    wtr.flush()?;
    Ok(())
}
