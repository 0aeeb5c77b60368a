use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use trades_core::{
    common::cancel::CancelFlag, FailedRow, FailureReason, ImportError, ImportSummary, Result,
};

use crate::app::ports::{HoldingsPort, TransactionsPort};
use crate::config::ImporterConfig;
use crate::pipeline::dedup::{DedupFilter, DedupOutcome};
use crate::pipeline::dispatch::{BatchDispatcher, DispatchOutcome, RetryPolicy};
use crate::pipeline::link::RelationLinker;
use crate::pipeline::normalize::{CsvNormalizer, InputFormat};
use crate::pipeline::resolve::HoldingResolver;

/// Per-run tunables, fixed before the run starts.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub encoding: String,
    pub batch_size: usize,
    pub request_delay: Duration,
    pub row_limit: Option<usize>,
    pub retry: RetryPolicy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            encoding: crate::config::DEFAULT_ENCODING.to_string(),
            batch_size: crate::config::DEFAULT_BATCH_SIZE,
            request_delay: Duration::ZERO,
            row_limit: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&ImporterConfig> for RunOptions {
    fn from(config: &ImporterConfig) -> Self {
        Self {
            encoding: config.encoding.clone(),
            batch_size: config.batch_size,
            request_delay: config.request_delay,
            row_limit: config.row_limit,
            retry: RetryPolicy::default(),
        }
    }
}

/// Wires the pipeline stages into one run:
/// parse -> dedup -> resolve + link -> dispatch -> summarize.
///
/// Row-local failures are collected, never propagated; the run only aborts
/// on file-level failures (undecodable input, unreadable destination
/// snapshot). Summarizing always happens, partial failures included.
pub struct ImportUseCase {
    holdings: Arc<dyn HoldingsPort>,
    transactions: Arc<dyn TransactionsPort>,
    options: RunOptions,
}

impl ImportUseCase {
    pub fn new(
        holdings: Arc<dyn HoldingsPort>,
        transactions: Arc<dyn TransactionsPort>,
        options: RunOptions,
    ) -> Self {
        Self {
            holdings,
            transactions,
            options,
        }
    }

    pub async fn run(
        &self,
        bytes: &[u8],
        format: InputFormat,
        cancel: &CancelFlag,
    ) -> Result<ImportSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, "starting import run");

        // Parsing
        let normalizer = CsvNormalizer::new(&self.options.encoding)?;
        let mut parsed = normalizer.normalize(bytes, format)?;
        info!(
            rows = parsed.rows.len(),
            malformed = parsed.malformed.len(),
            "parsed input file"
        );
        if let Some(limit) = self.options.row_limit {
            if parsed.rows.len() > limit {
                info!(limit, dropped = parsed.rows.len() - limit, "applying row limit");
                parsed.rows.truncate(limit);
            }
        }
        let total_rows = parsed.total();
        let mut failed = parsed.malformed;

        // Deduplicating
        let known = self.transactions.existing_order_numbers().await?;
        debug!(known = known.len(), "loaded destination order numbers");
        let DedupOutcome { to_import, skipped } = DedupFilter::new(known).partition(parsed.rows);
        info!(
            to_import = to_import.len(),
            skipped = skipped.len(),
            "deduplicated rows"
        );

        // Resolving + linking
        let resolver = HoldingResolver::new(self.holdings.as_ref());
        let linker = RelationLinker::new(started_at);
        let mut payloads = Vec::with_capacity(to_import.len());
        let mut cancelled = false;
        for row in &to_import {
            if cancel.is_cancelled() {
                warn!("cancellation requested, stopping before dispatch");
                cancelled = true;
                break;
            }
            match resolver.resolve(row).await {
                Ok(holding) => payloads.push(linker.link(row, &holding)),
                Err(e) => {
                    let message = match e {
                        ImportError::HoldingCreation { message, .. } => message,
                        other => other.to_string(),
                    };
                    warn!(line = row.line, code = %row.security_code, %message, "holding resolution failed");
                    failed.push(FailedRow {
                        line: row.line,
                        order_no: Some(row.order_no.clone()),
                        reason: FailureReason::HoldingCreationFailed(message),
                    });
                }
            }
        }

        // Dispatching
        let outcome = if cancelled {
            DispatchOutcome {
                cancelled: true,
                ..Default::default()
            }
        } else {
            BatchDispatcher::new(
                self.transactions.as_ref(),
                self.options.batch_size,
                self.options.request_delay,
            )
            .with_retry_policy(self.options.retry.clone())
            .dispatch(&payloads, cancel)
            .await
        };
        failed.extend(outcome.failed);
        failed.sort_by_key(|row| row.line);

        // Summarizing
        let summary = ImportSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            total_rows,
            imported: outcome.imported,
            skipped,
            failed,
            cancelled: cancelled || outcome.cancelled,
        };
        info!(
            total = summary.total_rows,
            imported = summary.imported,
            skipped = summary.skipped_count(),
            failed = summary.failed_count(),
            cancelled = summary.cancelled,
            "import run finished"
        );
        Ok(summary)
    }
}
