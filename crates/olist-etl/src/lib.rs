//! Olist ETL Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Batch loader for the Olist e-commerce CSV dataset.
//!
//! A run reads one CSV file, coerces each record against a static table
//! descriptor, optionally resolves a surrogate key from a lookup table, and
//! writes bounded batches with insert-or-skip semantics, committing each
//! batch on its own. Dry runs print a preview instead of writing.
//!
//! # Example
//!
//! ```no_run
//! use olist_etl::config::DatabaseSettings;
//! use olist_etl::{db, tables, LoadOptions, LoadPipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = DatabaseSettings::load(None)?;
//!     let mut db = db::connect(&settings).await?;
//!
//!     let options = LoadOptions::new("data/olist_customers_dataset.csv");
//!     let result = LoadPipeline::new(&tables::CUSTOMERS, options)
//!         .run(db.as_mut())
//!         .await?;
//!     println!("{}", result);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod pipeline;
pub mod resolve;
pub mod source;
pub mod tables;
pub mod transform;
pub mod value;
pub mod writer;

pub use error::{EtlError, EtlResult};
pub use pipeline::{LoadOptions, LoadPipeline, LoadResult, LoadState};
pub use tables::TableSpec;
