//! Batch writer
//!
//! Rows are accumulated into bounded batches. In live mode each batch is
//! written as one or more insert-or-skip statements and committed on its own,
//! so earlier batches stay durable when a later one fails. In dry-run mode
//! batches are printed instead and the database is never touched.

use std::io::Write;
use tracing::{error, info, warn};

use crate::db::dialect::UpsertSkip;
use crate::db::Database;
use crate::error::{EtlError, EtlResult};
use crate::value::TypedRow;

/// Sample rows printed per dry-run batch.
pub const PREVIEW_SAMPLE_ROWS: usize = 3;

/// Accumulates rows until a batch is full.
#[derive(Debug)]
pub struct Batcher {
    size: usize,
    rows: Vec<TypedRow>,
}

impl Batcher {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            rows: Vec::with_capacity(size),
        }
    }

    /// Add a row, handing back the batch once it reaches the configured size.
    pub fn push(&mut self, row: TypedRow) -> Option<Vec<TypedRow>> {
        self.rows.push(row);
        if self.rows.len() >= self.size {
            Some(std::mem::replace(&mut self.rows, Vec::with_capacity(self.size)))
        } else {
            None
        }
    }

    /// The final partial batch, if any rows are left.
    pub fn finish(self) -> Option<Vec<TypedRow>> {
        (!self.rows.is_empty()).then_some(self.rows)
    }
}

/// Writes and commits batches against one table.
pub struct BatchWriter<'a> {
    db: &'a mut dyn Database,
    statement: UpsertSkip,
    batches_committed: usize,
    committed_rows: u64,
    inserted: u64,
}

impl<'a> BatchWriter<'a> {
    pub fn new(db: &'a mut dyn Database, statement: UpsertSkip) -> Self {
        Self {
            db,
            statement,
            batches_committed: 0,
            committed_rows: 0,
            inserted: 0,
        }
    }

    /// Write one batch and commit it.
    ///
    /// On failure the open transaction is rolled back and the error carries
    /// the counts committed so far. Nothing is retried.
    pub async fn write(&mut self, batch: &[TypedRow]) -> EtlResult<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let number = self.batches_committed + 1;
        match self.write_batch(batch).await {
            Ok(inserted) => {
                self.batches_committed = number;
                self.committed_rows += batch.len() as u64;
                self.inserted += inserted;
                info!(
                    table = self.statement.table,
                    batch = number,
                    rows = batch.len(),
                    inserted,
                    "Committed batch"
                );
                Ok(inserted)
            },
            Err(source) => {
                if let Err(e) = self.db.rollback().await {
                    warn!(table = self.statement.table, error = %e, "Rollback failed");
                }
                error!(
                    table = self.statement.table,
                    batch = number,
                    committed_batches = self.batches_committed,
                    committed_rows = self.committed_rows,
                    error = %source,
                    "Batch write failed"
                );
                Err(EtlError::WriteFailure {
                    table: self.statement.table.to_string(),
                    batch: number,
                    committed_batches: self.batches_committed,
                    committed_rows: self.committed_rows,
                    source: Box::new(source),
                })
            },
        }
    }

    async fn write_batch(&mut self, batch: &[TypedRow]) -> EtlResult<u64> {
        let mut inserted = 0;
        for chunk in batch.chunks(self.statement.rows_per_statement()) {
            inserted += self.db.execute_many(&self.statement, chunk).await?;
        }
        self.db.commit().await?;
        Ok(inserted)
    }

    /// Turn a fatal error raised mid-run into one that carries the counts
    /// committed so far, rolling back whatever is still open.
    ///
    /// Errors that already carry counts are returned unchanged.
    pub async fn abort(&mut self, error: EtlError) -> EtlError {
        if error.committed().is_some() {
            return error;
        }

        if let Err(e) = self.db.rollback().await {
            warn!(table = self.statement.table, error = %e, "Rollback failed");
        }
        error!(
            table = self.statement.table,
            committed_batches = self.batches_committed,
            committed_rows = self.committed_rows,
            error = %error,
            "Load aborted"
        );
        EtlError::Aborted {
            table: self.statement.table.to_string(),
            committed_batches: self.batches_committed,
            committed_rows: self.committed_rows,
            source: Box::new(error),
        }
    }

    /// Run a statement that is not part of a batch and commit it.
    pub async fn execute_and_commit(&mut self, sql: &str) -> EtlResult<u64> {
        let affected = self.db.execute(sql).await?;
        self.db.commit().await?;
        Ok(affected)
    }

    pub fn database(&mut self) -> &mut dyn Database {
        &mut *self.db
    }

    pub fn batches_committed(&self) -> usize {
        self.batches_committed
    }

    pub fn committed_rows(&self) -> u64 {
        self.committed_rows
    }

    pub fn inserted(&self) -> u64 {
        self.inserted
    }
}

/// Prints what a live run would write.
pub struct DryRunPreview<'w> {
    out: &'w mut (dyn Write + Send),
    table: &'static str,
    batches: usize,
    total: u64,
}

impl<'w> DryRunPreview<'w> {
    pub fn new(out: &'w mut (dyn Write + Send), table: &'static str) -> EtlResult<Self> {
        writeln!(out, "[DRY_RUN] Table: {}", table)?;
        Ok(Self {
            out,
            table,
            batches: 0,
            total: 0,
        })
    }

    pub fn write(&mut self, batch: &[TypedRow]) -> EtlResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        self.batches += 1;
        self.total += batch.len() as u64;

        writeln!(self.out, "[DRY_RUN] Batch {}: {} rows", self.batches, batch.len())?;
        for (i, row) in batch.iter().take(PREVIEW_SAMPLE_ROWS).enumerate() {
            writeln!(self.out, "  {}. {}", i + 1, row)?;
        }
        Ok(())
    }

    /// Print the total and return it.
    pub fn finish(self) -> EtlResult<u64> {
        writeln!(self.out, "[DRY_RUN] Total rows to insert: {}", self.total)?;
        self.out.flush()?;
        info!(table = self.table, rows = self.total, "Dry run complete");
        Ok(self.total)
    }

    pub fn batches(&self) -> usize {
        self.batches
    }
}
