use std::env;
use std::time::Duration;

use trades_core::{ImportError, Result};

pub const DEFAULT_ENCODING: &str = "gbk";
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_DELAY_MS: u64 = 1000;

/// Immutable configuration for an import run, read from the environment
/// once at startup. CLI flags may override the tunables afterwards.
#[derive(Debug, Clone)]
pub struct ImporterConfig {
    pub notion_token: String,
    pub transactions_db_id: String,
    pub holdings_db_id: String,
    pub encoding: String,
    pub batch_size: usize,
    pub request_delay: Duration,
    /// `None` means import every row; `IMPORT_ROW_LIMIT=0` also means
    /// unlimited, matching the upload form's convention.
    pub row_limit: Option<usize>,
}

impl ImporterConfig {
    pub fn from_env() -> Result<Self> {
        let notion_token = required_var("NOTION_TOKEN")?;
        let transactions_db_id = required_var("NOTION_TRANSACTIONS_DB_ID")?;
        let holdings_db_id = required_var("NOTION_HOLDINGS_DB_ID")?;

        let encoding =
            env::var("CSV_ENCODING").unwrap_or_else(|_| DEFAULT_ENCODING.to_string());
        let batch_size = parsed_var("IMPORT_BATCH_SIZE")?.unwrap_or(DEFAULT_BATCH_SIZE);
        let delay_ms: u64 = parsed_var("IMPORT_DELAY_MS")?.unwrap_or(DEFAULT_DELAY_MS);
        let row_limit = parsed_var::<usize>("IMPORT_ROW_LIMIT")?.filter(|limit| *limit > 0);

        Ok(Self {
            notion_token,
            transactions_db_id,
            holdings_db_id,
            encoding,
            batch_size: batch_size.max(1),
            request_delay: Duration::from_millis(delay_ms),
            row_limit,
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ImportError::Config(format!(
            "environment variable {name} is not set"
        ))),
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Err(_) => Ok(None),
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            ImportError::Config(format!("environment variable {name} has invalid value {raw:?}"))
        }),
    }
}
