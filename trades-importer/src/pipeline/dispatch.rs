use std::time::Duration;

use tracing::{debug, warn};
use trades_core::{common::cancel::CancelFlag, FailedRow, FailureReason, ImportError};

use crate::app::ports::TransactionsPort;
use crate::pipeline::link::TransactionPayload;

/// Exponential backoff for throttled create-calls. Kept as an explicit
/// policy object so the schedule is testable apart from the dispatcher.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per row, the first call included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.mul_f64(self.multiplier.powi(attempt as i32))
    }
}

#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub imported: usize,
    pub failed: Vec<FailedRow>,
    pub cancelled: bool,
}

/// Delivers linked payloads to the transactions database in consecutive
/// batches. The remote API has no bulk create, so rows go out one at a
/// time with a pacing delay between calls; a throttled row retries with
/// backoff, and one bad row never takes its batch down.
pub struct BatchDispatcher<'a> {
    transactions: &'a dyn TransactionsPort,
    batch_size: usize,
    request_delay: Duration,
    retry: RetryPolicy,
}

impl<'a> BatchDispatcher<'a> {
    pub fn new(
        transactions: &'a dyn TransactionsPort,
        batch_size: usize,
        request_delay: Duration,
    ) -> Self {
        Self {
            transactions,
            batch_size: batch_size.max(1),
            request_delay,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn dispatch(
        &self,
        payloads: &[TransactionPayload],
        cancel: &CancelFlag,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let mut first_call = true;

        for (batch_index, batch) in payloads.chunks(self.batch_size).enumerate() {
            debug!(batch = batch_index + 1, rows = batch.len(), "dispatching batch");
            for payload in batch {
                if cancel.is_cancelled() {
                    warn!(
                        delivered = outcome.imported,
                        "cancellation requested, stopping dispatch"
                    );
                    outcome.cancelled = true;
                    return outcome;
                }
                if !first_call {
                    tokio::time::sleep(self.request_delay).await;
                }
                first_call = false;

                match self.submit_with_retry(payload).await {
                    Ok(()) => outcome.imported += 1,
                    Err(failed) => outcome.failed.push(failed),
                }
            }
        }

        outcome
    }

    async fn submit_with_retry(
        &self,
        payload: &TransactionPayload,
    ) -> std::result::Result<(), FailedRow> {
        let mut attempt: u32 = 0;
        loop {
            match self.transactions.create_transaction(payload).await {
                Ok(()) => {
                    debug!(line = payload.line, order_no = %payload.order_no, "transaction created");
                    return Ok(());
                }
                Err(ImportError::Throttled { retry_after }) => {
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        warn!(
                            line = payload.line,
                            order_no = %payload.order_no,
                            attempts = attempt,
                            "retry budget exhausted"
                        );
                        return Err(FailedRow {
                            line: payload.line,
                            order_no: Some(payload.order_no.clone()),
                            reason: FailureReason::RateLimitExceeded,
                        });
                    }
                    let mut delay = self.retry.delay_for(attempt - 1);
                    // Honour the server's hint when it asks for more.
                    if let Some(hint) = retry_after {
                        delay = delay.max(hint);
                    }
                    debug!(
                        line = payload.line,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "throttled, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(other) => {
                    warn!(line = payload.line, order_no = %payload.order_no, error = %other, "create failed");
                    return Err(FailedRow {
                        line: payload.line,
                        order_no: Some(payload.order_no.clone()),
                        reason: FailureReason::Remote(other.to_string()),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::memory::InMemoryWorkspace;
    use serde_json::json;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            multiplier: 2.0,
        }
    }

    fn payloads(order_numbers: &[&str]) -> Vec<TransactionPayload> {
        order_numbers
            .iter()
            .enumerate()
            .map(|(i, order_no)| TransactionPayload {
                line: i + 2,
                order_no: order_no.to_string(),
                properties: json!({}),
            })
            .collect()
    }

    #[test]
    fn test_backoff_schedule_is_exponential() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_all_rows_delivered_in_batches() {
        let workspace = InMemoryWorkspace::new();
        let dispatcher = BatchDispatcher::new(&workspace, 2, Duration::ZERO);

        let outcome = dispatcher
            .dispatch(&payloads(&["A1", "A2", "A3", "A4", "A5"]), &CancelFlag::new())
            .await;

        assert_eq!(outcome.imported, 5);
        assert!(outcome.failed.is_empty());
        assert_eq!(workspace.transaction_count(), 5);
    }

    #[tokio::test]
    async fn test_throttled_row_recovers_within_budget() {
        let workspace = InMemoryWorkspace::new();
        workspace.throttle_order_no("A2", 2);
        let dispatcher =
            BatchDispatcher::new(&workspace, 10, Duration::ZERO).with_retry_policy(fast_retry());

        let outcome = dispatcher
            .dispatch(&payloads(&["A1", "A2", "A3"]), &CancelFlag::new())
            .await;

        assert_eq!(outcome.imported, 3);
        assert!(outcome.failed.is_empty());
    }

    #[tokio::test]
    async fn test_throttle_past_cap_fails_row_and_batch_continues() {
        let workspace = InMemoryWorkspace::new();
        workspace.throttle_order_no("A2", u32::MAX);
        let dispatcher =
            BatchDispatcher::new(&workspace, 2, Duration::ZERO).with_retry_policy(fast_retry());

        let outcome = dispatcher
            .dispatch(&payloads(&["A1", "A2", "A3", "A4", "A5"]), &CancelFlag::new())
            .await;

        assert_eq!(outcome.imported, 4);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].order_no.as_deref(), Some("A2"));
        assert_eq!(outcome.failed[0].reason, FailureReason::RateLimitExceeded);
        // Later batches were not affected by the failed row.
        assert!(workspace.stored_order_numbers().contains(&"A5".to_string()));
    }

    #[tokio::test]
    async fn test_remote_error_marks_row_failed() {
        let workspace = InMemoryWorkspace::new();
        workspace.fail_transaction("A1");
        let dispatcher = BatchDispatcher::new(&workspace, 2, Duration::ZERO);

        let outcome = dispatcher
            .dispatch(&payloads(&["A1", "A2"]), &CancelFlag::new())
            .await;

        assert_eq!(outcome.imported, 1);
        assert_eq!(outcome.failed.len(), 1);
        assert!(matches!(
            outcome.failed[0].reason,
            FailureReason::Remote(_)
        ));
    }

    #[tokio::test]
    async fn test_cancellation_stops_between_rows() {
        let workspace = InMemoryWorkspace::new();
        let dispatcher = BatchDispatcher::new(&workspace, 2, Duration::ZERO);
        let cancel = CancelFlag::new();
        cancel.cancel();

        let outcome = dispatcher.dispatch(&payloads(&["A1", "A2"]), &cancel).await;

        assert!(outcome.cancelled);
        assert_eq!(outcome.imported, 0);
        assert_eq!(workspace.transaction_count(), 0);
    }
}
