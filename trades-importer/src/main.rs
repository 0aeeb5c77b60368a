use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::warn;

use trades_core::{common::cancel::CancelFlag, FailureReason, ImportSummary};
use trades_importer::app::import_use_case::{ImportUseCase, RunOptions};
use trades_importer::app::ports::{HoldingsPort, TransactionsPort};
use trades_importer::config::{ImporterConfig, DEFAULT_ENCODING};
use trades_importer::infra::notion::NotionClient;
use trades_importer::observability::logging::init_logging;
use trades_importer::pipeline::dedup::{DedupFilter, DedupOutcome};
use trades_importer::pipeline::normalize::{CsvNormalizer, InputFormat};

#[derive(Parser)]
#[command(name = "trades-importer")]
#[command(about = "Imports brokerage trade exports into Notion databases")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a trade export and import new rows into the destination
    Import {
        /// Path to the CSV or TXT export
        #[arg(long)]
        file: PathBuf,
        /// File encoding (defaults to CSV_ENCODING, then gbk)
        #[arg(long)]
        encoding: Option<String>,
        /// Import at most this many rows
        #[arg(long)]
        limit: Option<usize>,
        /// Rows per batch
        #[arg(long)]
        batch_size: Option<usize>,
        /// Delay between create calls, in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,
    },
    /// Parse a trade export and report what would be imported, without
    /// touching the destination
    Inspect {
        /// Path to the CSV or TXT export
        #[arg(long)]
        file: PathBuf,
        /// File encoding (defaults to CSV_ENCODING, then gbk)
        #[arg(long)]
        encoding: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    match cli.command {
        Commands::Import {
            file,
            encoding,
            limit,
            batch_size,
            delay_ms,
        } => {
            let mut config = ImporterConfig::from_env()?;
            if let Some(encoding) = encoding {
                config.encoding = encoding;
            }
            if let Some(limit) = limit {
                config.row_limit = Some(limit).filter(|l| *l > 0);
            }
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size.max(1);
            }
            if let Some(delay_ms) = delay_ms {
                config.request_delay = Duration::from_millis(delay_ms);
            }

            let bytes = std::fs::read(&file)?;
            let format = InputFormat::from_path(&file);

            let client = Arc::new(NotionClient::new(&config));
            let use_case = ImportUseCase::new(
                client.clone() as Arc<dyn HoldingsPort>,
                client as Arc<dyn TransactionsPort>,
                RunOptions::from(&config),
            );

            let cancel = CancelFlag::new();
            let cancel_on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, finishing current row and stopping");
                    cancel_on_signal.cancel();
                }
            });

            let summary = use_case.run(&bytes, format, &cancel).await?;
            print_summary(&summary);
        }
        Commands::Inspect { file, encoding } => {
            let encoding = encoding
                .or_else(|| std::env::var("CSV_ENCODING").ok())
                .unwrap_or_else(|| DEFAULT_ENCODING.to_string());

            let bytes = std::fs::read(&file)?;
            let format = InputFormat::from_path(&file);
            let parsed = CsvNormalizer::new(&encoding)?.normalize(&bytes, format)?;
            let total = parsed.total();
            let malformed = parsed.malformed;
            let DedupOutcome { to_import, skipped } =
                DedupFilter::new(HashSet::new()).partition(parsed.rows);

            println!("{}: {} rows", file.display(), total);
            println!("  ready to import: {}", to_import.len());
            println!("  duplicate order numbers in file: {}", skipped.len());
            println!("  malformed: {}", malformed.len());
            for row in &malformed {
                println!("    line {}: {}", row.line, reason_text(&row.reason));
            }
        }
    }

    Ok(())
}

fn print_summary(summary: &ImportSummary) {
    println!("Import run {}", summary.run_id);
    println!("  total rows: {}", summary.total_rows);
    println!("  imported:   {}", summary.imported);
    println!(
        "  skipped:    {} (duplicate order numbers)",
        summary.skipped_count()
    );
    println!("  failed:     {}", summary.failed_count());
    for row in &summary.failed {
        let order_no = row.order_no.as_deref().unwrap_or("-");
        println!(
            "    line {} [{}]: {}",
            row.line,
            order_no,
            reason_text(&row.reason)
        );
    }
    if summary.cancelled {
        println!("  run was cancelled; remaining rows were not attempted");
    }
}

fn reason_text(reason: &FailureReason) -> String {
    match reason {
        FailureReason::MalformedRow(detail) => format!("malformed row: {detail}"),
        FailureReason::HoldingCreationFailed(detail) => {
            format!("holding creation failed: {detail}")
        }
        FailureReason::RateLimitExceeded => "rate limit retries exhausted".to_string(),
        FailureReason::Remote(detail) => format!("remote error: {detail}"),
    }
}
