//! Olist Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities for the Olist data tooling.
//!
//! - **Error Handling**: [`OlistError`] and the [`Result`] alias
//! - **Logging**: `tracing` subscriber set-up driven by [`logging::LogConfig`]
//! - **Environment**: tolerant parsing of boolean and numeric environment flags
//!
//! # Example
//!
//! ```no_run
//! use olist_common::env::env_bool;
//! use olist_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     let dry_run = env_bool("ETL_DRY_RUN", false);
//!     tracing::info!(dry_run, "starting");
//!     Ok(())
//! }
//! ```

pub mod env;
pub mod error;
pub mod logging;

pub use error::{OlistError, Result};
