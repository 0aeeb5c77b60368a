use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use trades_core::{HoldingDraft, HoldingId, ImportError, Result};

use crate::app::ports::{HoldingsPort, TransactionsPort};
use crate::pipeline::link::TransactionPayload;

/// In-memory stand-in for both remote databases, so the pipeline is
/// testable without network access. Failure and throttling hooks inject
/// the remote behaviors the dispatcher and resolver must survive.
#[derive(Default)]
pub struct InMemoryWorkspace {
    holdings: Mutex<HashMap<String, HoldingId>>,
    transactions: Mutex<Vec<TransactionPayload>>,
    order_numbers: Mutex<HashSet<String>>,
    lookup_calls: AtomicUsize,
    create_calls: AtomicUsize,
    next_id: AtomicUsize,
    lookup_delay: Mutex<Option<Duration>>,
    // remaining failures/throttles per key; u32::MAX means always
    failing_holdings: Mutex<HashMap<String, u32>>,
    failing_transactions: Mutex<HashSet<String>>,
    throttles: Mutex<HashMap<String, u32>>,
}

impl InMemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend the holding for `code` already exists in the destination.
    pub fn seed_holding(&self, code: &str) -> HoldingId {
        let id = self.next_holding_id();
        self.holdings
            .lock()
            .unwrap()
            .insert(code.to_string(), id.clone());
        id
    }

    /// Pretend these order numbers were imported by an earlier run.
    pub fn seed_order_numbers<I: IntoIterator<Item = S>, S: Into<String>>(&self, numbers: I) {
        let mut known = self.order_numbers.lock().unwrap();
        known.extend(numbers.into_iter().map(Into::into));
    }

    /// Fail the next `times` holding creates for `code` (`u32::MAX` for
    /// every attempt).
    pub fn fail_holding_creation(&self, code: &str, times: u32) {
        self.failing_holdings
            .lock()
            .unwrap()
            .insert(code.to_string(), times);
    }

    /// Reject every transaction create for `order_no` with a remote error.
    pub fn fail_transaction(&self, order_no: &str) {
        self.failing_transactions
            .lock()
            .unwrap()
            .insert(order_no.to_string());
    }

    /// Throttle the next `times` transaction creates for `order_no`
    /// (`u32::MAX` for every attempt).
    pub fn throttle_order_no(&self, order_no: &str, times: u32) {
        self.throttles
            .lock()
            .unwrap()
            .insert(order_no.to_string(), times);
    }

    /// Make holding lookups slow, to widen the single-flight race window.
    pub fn set_lookup_delay(&self, delay: Duration) {
        *self.lookup_delay.lock().unwrap() = Some(delay);
    }

    pub fn holding_lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    pub fn holding_create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn created_holding_codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.holdings.lock().unwrap().keys().cloned().collect();
        codes.sort();
        codes
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.lock().unwrap().len()
    }

    pub fn stored_order_numbers(&self) -> Vec<String> {
        self.transactions
            .lock()
            .unwrap()
            .iter()
            .map(|payload| payload.order_no.clone())
            .collect()
    }

    fn next_holding_id(&self) -> HoldingId {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        HoldingId(format!("holding-{n}"))
    }

    /// Consumes one pending failure/throttle charge; `u32::MAX` never
    /// drains.
    fn consume(entry: &mut HashMap<String, u32>, key: &str) -> bool {
        match entry.get_mut(key) {
            None | Some(0) => false,
            Some(remaining) => {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                true
            }
        }
    }
}

#[async_trait]
impl HoldingsPort for InMemoryWorkspace {
    async fn find_by_code(&self, code: &str) -> Result<Option<HoldingId>> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.lookup_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.holdings.lock().unwrap().get(code).cloned())
    }

    async fn create_holding(&self, draft: &HoldingDraft) -> Result<HoldingId> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if Self::consume(
            &mut self.failing_holdings.lock().unwrap(),
            &draft.security_code,
        ) {
            return Err(ImportError::Remote {
                message: format!("injected holding failure for {}", draft.security_code),
            });
        }
        let id = self.next_holding_id();
        self.holdings
            .lock()
            .unwrap()
            .insert(draft.security_code.clone(), id.clone());
        Ok(id)
    }
}

#[async_trait]
impl TransactionsPort for InMemoryWorkspace {
    async fn existing_order_numbers(&self) -> Result<HashSet<String>> {
        Ok(self.order_numbers.lock().unwrap().clone())
    }

    async fn create_transaction(&self, payload: &TransactionPayload) -> Result<()> {
        if Self::consume(&mut self.throttles.lock().unwrap(), &payload.order_no) {
            return Err(ImportError::Throttled { retry_after: None });
        }
        if self
            .failing_transactions
            .lock()
            .unwrap()
            .contains(&payload.order_no)
        {
            return Err(ImportError::Remote {
                message: format!("injected transaction failure for {}", payload.order_no),
            });
        }
        self.order_numbers
            .lock()
            .unwrap()
            .insert(payload.order_no.clone());
        self.transactions.lock().unwrap().push(payload.clone());
        Ok(())
    }
}
