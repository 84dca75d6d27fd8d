//! Load pipeline
//!
//! One run moves one CSV file into one table:
//! `Idle -> Reading -> (Resolving) -> Writing -> Done`, with `Failed` as the
//! terminal state for any fatal error. Per-record problems never end a run;
//! they are counted in [`LoadResult`].

use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{LoadSettings, DEFAULT_BATCH_SIZE};
use crate::db::Database;
use crate::error::{EtlError, EtlResult};
use crate::resolve::{LookupTable, ReferenceResolver};
use crate::source::{CsvSource, RecordStream, TextEncoding};
use crate::tables::TableSpec;
use crate::transform::{RejectReason, Rejected, Transformer};
use crate::value::Value;
use crate::writer::{BatchWriter, Batcher, DryRunPreview};

/// Options for a single run.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub source_path: PathBuf,
    pub batch_size: usize,
    pub dry_run: bool,
    pub encoding: TextEncoding,
    pub delimiter: u8,
}

impl LoadOptions {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            dry_run: false,
            encoding: TextEncoding::default(),
            delimiter: b',',
        }
    }

    pub fn with_settings(mut self, settings: LoadSettings) -> Self {
        self.batch_size = settings.batch_size;
        self.dry_run = settings.dry_run;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn validate(&self) -> EtlResult<()> {
        if self.batch_size == 0 {
            return Err(EtlError::config("batch size must be greater than 0"));
        }
        Ok(())
    }

    fn source(&self) -> CsvSource {
        CsvSource::new(&self.source_path)
            .with_encoding(self.encoding)
            .with_delimiter(self.delimiter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Reading,
    Resolving,
    Writing,
    Done,
    Failed,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadState::Idle => "idle",
            LoadState::Reading => "reading",
            LoadState::Resolving => "resolving",
            LoadState::Writing => "writing",
            LoadState::Done => "done",
            LoadState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct LoadResult {
    pub table: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    /// Records read from the source
    pub read: u64,
    /// Records that passed validation
    pub accepted: u64,
    pub rejected_missing_key: u64,
    pub rejected_invalid_type: u64,
    /// Accepted rows written with a NULL surrogate key
    pub orphans: u64,
    /// Rows the database reported as newly inserted
    pub inserted: u64,
    /// Accepted rows skipped on key collision
    pub duplicates: u64,
    pub batches_committed: usize,
    pub committed_rows: u64,
    /// Rows still NULL after the post-load backfill, when the table has one
    pub backfill_unresolved: Option<u64>,
    pub elapsed: Duration,
}

impl LoadResult {
    fn new(table: &str, dry_run: bool) -> Self {
        Self {
            table: table.to_string(),
            dry_run,
            started_at: Utc::now(),
            read: 0,
            accepted: 0,
            rejected_missing_key: 0,
            rejected_invalid_type: 0,
            orphans: 0,
            inserted: 0,
            duplicates: 0,
            batches_committed: 0,
            committed_rows: 0,
            backfill_unresolved: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn rejected(&self) -> u64 {
        self.rejected_missing_key + self.rejected_invalid_type
    }

    /// Records that did not become new rows: rejected or duplicate.
    pub fn skipped(&self) -> u64 {
        self.rejected() + self.duplicates
    }

    /// Rows a live run would submit. Equal to `accepted` in both modes.
    pub fn total_would_load(&self) -> u64 {
        self.accepted
    }

    fn count_rejection(&mut self, rejected: &Rejected) {
        match rejected.reason {
            RejectReason::MissingKey => self.rejected_missing_key += 1,
            RejectReason::InvalidType => self.rejected_invalid_type += 1,
        }
    }
}

impl fmt::Display for LoadResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: read {}, accepted {}, rejected {} (missing key {}, invalid type {}), orphans {}",
            self.table,
            self.read,
            self.accepted,
            self.rejected(),
            self.rejected_missing_key,
            self.rejected_invalid_type,
            self.orphans
        )?;
        if self.dry_run {
            write!(f, ", would load {}", self.total_would_load())?;
        } else {
            write!(
                f,
                ", inserted {}, duplicates {}, {} batches committed",
                self.inserted, self.duplicates, self.batches_committed
            )?;
        }
        if let Some(unresolved) = self.backfill_unresolved {
            write!(f, ", backfill unresolved {}", unresolved)?;
        }
        Ok(())
    }
}

pub struct LoadPipeline<'a> {
    table: &'a TableSpec,
    options: LoadOptions,
    state: LoadState,
    progress: ProgressBar,
}

impl<'a> LoadPipeline<'a> {
    pub fn new(table: &'a TableSpec, options: LoadOptions) -> Self {
        Self {
            table,
            options,
            state: LoadState::Idle,
            progress: ProgressBar::hidden(),
        }
    }

    /// Report each record read on `progress`.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// Run in the mode the options select.
    ///
    /// A dry run writes its preview to `out` and never touches `db`; a live
    /// run requires a database.
    pub async fn execute(
        &mut self,
        db: Option<&mut dyn Database>,
        out: &mut (dyn Write + Send),
    ) -> EtlResult<LoadResult> {
        if self.options.dry_run {
            return self.preview(out);
        }
        match db {
            Some(db) => self.run(db).await,
            None => Err(EtlError::config("a live load requires a database connection")),
        }
    }

    /// Load the source into the table, committing per batch.
    pub async fn run(&mut self, db: &mut dyn Database) -> EtlResult<LoadResult> {
        let outcome = self.run_live(db).await;
        self.settle(outcome)
    }

    /// Read and transform the source, printing what would be written.
    pub fn preview(&mut self, out: &mut (dyn Write + Send)) -> EtlResult<LoadResult> {
        let outcome = self.run_preview(out);
        self.settle(outcome)
    }

    async fn run_live(&mut self, db: &mut dyn Database) -> EtlResult<LoadResult> {
        let started = Instant::now();
        let mut result = LoadResult::new(self.table.name, false);

        let records = self.open()?;
        let transformer = Transformer::new(self.table);
        self.check_header(&transformer, &records);

        let mut resolver = match self.table.lookup {
            Some(lookup) => {
                self.transition(LoadState::Resolving);
                let index = self.table.field_index(lookup.source_column).ok_or_else(|| {
                    EtlError::config(format!(
                        "{}: lookup source column {} is not a field",
                        self.table.name, lookup.source_column
                    ))
                })?;
                let table = LookupTable::load(&mut *db, &lookup).await?;
                Some(ReferenceResolver::new(table, index))
            },
            None => None,
        };

        self.transition(LoadState::Writing);
        let mut writer = BatchWriter::new(&mut *db, self.table.upsert_statement());

        let mut loaded = self
            .write_records(records, &transformer, resolver.as_mut(), &mut writer, &mut result)
            .await;
        if loaded.is_ok() {
            loaded = self.backfill(&mut writer, &mut result).await;
        }
        if let Err(e) = loaded {
            return Err(writer.abort(e).await);
        }

        if let Some(resolver) = &resolver {
            result.orphans = resolver.orphans();
            if result.orphans > 0 {
                warn!(
                    table = self.table.name,
                    orphans = result.orphans,
                    samples = ?resolver.orphan_samples(),
                    "Rows loaded with an unresolved reference"
                );
            }
        }
        result.inserted = writer.inserted();
        result.duplicates = result.accepted.saturating_sub(result.inserted);
        result.batches_committed = writer.batches_committed();
        result.committed_rows = writer.committed_rows();
        result.elapsed = started.elapsed();

        Ok(result)
    }

    async fn write_records(
        &mut self,
        records: RecordStream,
        transformer: &Transformer<'_>,
        mut resolver: Option<&mut ReferenceResolver>,
        writer: &mut BatchWriter<'_>,
        result: &mut LoadResult,
    ) -> EtlResult<()> {
        let mut batcher = Batcher::new(self.options.batch_size);

        for record in records {
            let record = record?;
            result.read += 1;
            self.progress.inc(1);

            let row = match transformer.transform(&record) {
                Ok(row) => row,
                Err(rejected) => {
                    debug!(
                        line = record.line(),
                        column = rejected.column,
                        reason = %rejected.reason,
                        "Rejected record"
                    );
                    result.count_rejection(&rejected);
                    continue;
                },
            };
            let row = match resolver.as_deref_mut() {
                Some(resolver) => resolver.resolve(row),
                None => row,
            };
            result.accepted += 1;

            if let Some(batch) = batcher.push(row) {
                writer.write(&batch).await?;
            }
        }

        if let Some(batch) = batcher.finish() {
            writer.write(&batch).await?;
        }
        Ok(())
    }

    /// Fill the table's backfill column from its parent once every batch is in.
    async fn backfill(
        &self,
        writer: &mut BatchWriter<'_>,
        result: &mut LoadResult,
    ) -> EtlResult<()> {
        let Some(backfill) = self.table.backfill else {
            return Ok(());
        };

        let sql = writer.database().dialect().backfill(self.table.name, &backfill);
        let updated = writer.execute_and_commit(&sql).await?;

        let rows = writer
            .database()
            .query(&backfill.count_unresolved_sql(self.table.name), &[])
            .await?;
        let unresolved = rows
            .first()
            .and_then(|row| row.first())
            .and_then(Value::as_i64)
            .unwrap_or_default()
            .max(0) as u64;

        info!(
            table = self.table.name,
            column = backfill.column,
            updated,
            unresolved,
            "Backfilled from {}",
            backfill.parent_table
        );
        result.backfill_unresolved = Some(unresolved);
        Ok(())
    }

    fn run_preview(&mut self, out: &mut (dyn Write + Send)) -> EtlResult<LoadResult> {
        let started = Instant::now();
        let mut result = LoadResult::new(self.table.name, true);

        let records = self.open()?;
        let transformer = Transformer::new(self.table);
        self.check_header(&transformer, &records);

        // no lookup query in a dry run; a lookup column previews as NULL
        let with_lookup = self.table.lookup.is_some();

        self.transition(LoadState::Writing);
        let mut preview = DryRunPreview::new(out, self.table.name)?;
        let mut batcher = Batcher::new(self.options.batch_size);

        for record in records {
            let record = record?;
            result.read += 1;
            self.progress.inc(1);

            let row = match transformer.transform(&record) {
                Ok(row) if with_lookup => row.with_appended(Value::Null),
                Ok(row) => row,
                Err(rejected) => {
                    result.count_rejection(&rejected);
                    continue;
                },
            };
            result.accepted += 1;

            if let Some(batch) = batcher.push(row) {
                preview.write(&batch)?;
            }
        }

        if let Some(batch) = batcher.finish() {
            preview.write(&batch)?;
        }
        preview.finish()?;

        result.elapsed = started.elapsed();
        Ok(result)
    }

    fn open(&mut self) -> EtlResult<RecordStream> {
        self.options.validate()?;
        info!(
            table = self.table.name,
            source = %self.options.source_path.display(),
            batch_size = self.options.batch_size,
            dry_run = self.options.dry_run,
            "Starting load"
        );
        self.transition(LoadState::Reading);
        self.options.source().open()
    }

    fn check_header(&self, transformer: &Transformer<'_>, records: &RecordStream) {
        let missing = transformer.missing_columns(records.header());
        if !missing.is_empty() {
            warn!(
                table = self.table.name,
                columns = ?missing,
                "Source is missing mapped columns"
            );
        }
    }

    fn settle(&mut self, outcome: EtlResult<LoadResult>) -> EtlResult<LoadResult> {
        match &outcome {
            Ok(result) => {
                self.transition(LoadState::Done);
                info!(
                    table = self.table.name,
                    elapsed_ms = result.elapsed.as_millis() as u64,
                    "{}",
                    result
                );
            },
            Err(e) => {
                self.transition(LoadState::Failed);
                warn!(table = self.table.name, error = %e, "Load failed");
            },
        }
        outcome
    }

    fn transition(&mut self, next: LoadState) {
        debug!(table = self.table.name, from = %self.state, to = %next, "Load state");
        self.state = next;
    }
}
