//! Import pipeline for brokerage trade exports: normalize the CSV, drop
//! already-imported rows, resolve each security to its holding page, link
//! the relation, and dispatch batched creates to the Notion API.

pub mod app;
pub mod config;
pub mod infra;
pub mod observability;
pub mod pipeline;
pub mod schema;

pub use trades_core::{ImportError, ImportSummary, Result};
