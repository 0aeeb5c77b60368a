use std::collections::HashSet;

use async_trait::async_trait;
use trades_core::{HoldingDraft, HoldingId, Result};

use crate::pipeline::link::TransactionPayload;

/// Capability over the remote holdings database. The pipeline only ever
/// looks a security up by code or creates it; holdings are never updated
/// or deleted here.
#[async_trait]
pub trait HoldingsPort: Send + Sync {
    async fn find_by_code(&self, code: &str) -> Result<Option<HoldingId>>;
    async fn create_holding(&self, draft: &HoldingDraft) -> Result<HoldingId>;
}

/// Capability over the remote transactions database.
#[async_trait]
pub trait TransactionsPort: Send + Sync {
    /// Full snapshot of order numbers already present in the destination.
    /// Read once per run, before dedup.
    async fn existing_order_numbers(&self) -> Result<HashSet<String>>;

    async fn create_transaction(&self, payload: &TransactionPayload) -> Result<()>;
}
