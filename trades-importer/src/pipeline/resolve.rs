use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};
use trades_core::{HoldingDraft, HoldingId, ImportError, Result, TransactionRow};

use crate::app::ports::HoldingsPort;

type Slot = Arc<tokio::sync::Mutex<Option<HoldingId>>>;

/// Memoizing lookup-or-create resolver for holding pages, scoped to one
/// import run.
///
/// Each security code owns a slot: a locked-but-empty slot is a resolution
/// in flight, a filled slot is resolved. Holding the slot's async mutex
/// across the remote lookup/create is what makes resolution single-flight
/// per code — a second row for the same code queues on the slot instead of
/// issuing its own create. A failed create leaves the slot empty, so a
/// later row for the same code retries instead of inheriting the failure.
pub struct HoldingResolver<'a> {
    holdings: &'a dyn HoldingsPort,
    slots: Mutex<HashMap<String, Slot>>,
}

impl<'a> HoldingResolver<'a> {
    pub fn new(holdings: &'a dyn HoldingsPort) -> Self {
        Self {
            holdings,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub async fn resolve(&self, row: &TransactionRow) -> Result<HoldingId> {
        let slot = {
            let mut slots = self.slots.lock().expect("resolver cache poisoned");
            slots
                .entry(row.security_code.clone())
                .or_default()
                .clone()
        };

        let mut resolved = slot.lock().await;
        if let Some(id) = resolved.as_ref() {
            debug!(code = %row.security_code, "holding already resolved this run");
            return Ok(id.clone());
        }

        let id = self.lookup_or_create(row).await.map_err(|e| {
            ImportError::HoldingCreation {
                code: row.security_code.clone(),
                message: match e {
                    ImportError::HoldingCreation { message, .. } => message,
                    other => other.to_string(),
                },
            }
        })?;
        *resolved = Some(id.clone());
        Ok(id)
    }

    async fn lookup_or_create(&self, row: &TransactionRow) -> Result<HoldingId> {
        if let Some(id) = self.holdings.find_by_code(&row.security_code).await? {
            debug!(code = %row.security_code, holding = %id.as_str(), "found existing holding");
            return Ok(id);
        }

        let draft = HoldingDraft::from_row(row);
        info!(code = %draft.security_code, title = %draft.title(), "creating holding");
        self.holdings.create_holding(&draft).await
    }
}
