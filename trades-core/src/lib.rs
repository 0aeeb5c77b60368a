pub mod common;
pub mod domain;

pub use common::error::{ImportError, Result};
pub use domain::*;
