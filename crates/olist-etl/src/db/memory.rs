//! In-memory backend
//!
//! Mimics the transactional behaviour the pipeline relies on: inserts are
//! staged until commit, key collisions are skipped, and a rollback discards
//! staged rows. Call counters and failure injection make it usable as a spy
//! in tests; read queries are answered from stubs registered up front.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

use super::dialect::{Dialect, UpsertSkip};
use super::Database;
use crate::error::{EtlError, EtlResult};
use crate::value::{TypedRow, Value};

#[derive(Debug, Default)]
struct StoredTable {
    keys: HashSet<Vec<String>>,
    rows: Vec<TypedRow>,
}

#[derive(Debug, Default)]
pub struct MemoryDatabase {
    dialect: Dialect,
    tables: HashMap<String, StoredTable>,
    staged: Vec<(String, Vec<String>, TypedRow)>,
    stubs: HashMap<String, Vec<Vec<Value>>>,
    statements: Vec<String>,
    fail_on_call: Option<usize>,
    execute_many_calls: usize,
    largest_insert: usize,
    queries: usize,
    commits: usize,
    rollbacks: usize,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Answer `sql` with `rows` whenever it is queried.
    pub fn stub_query(mut self, sql: impl Into<String>, rows: Vec<Vec<Value>>) -> Self {
        self.stubs.insert(sql.into(), rows);
        self
    }

    /// Fail the `n`-th call (1-based) to `execute_many`.
    pub fn fail_on_execute_many(mut self, n: usize) -> Self {
        self.fail_on_call = Some(n);
        self
    }

    /// Committed rows of `table`, in insertion order.
    pub fn rows(&self, table: &str) -> &[TypedRow] {
        self.tables
            .get(table)
            .map(|t| t.rows.as_slice())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.rows(table).len()
    }

    pub fn execute_many_calls(&self) -> usize {
        self.execute_many_calls
    }

    /// Most rows passed to a single `execute_many` call.
    pub fn largest_insert(&self) -> usize {
        self.largest_insert
    }

    pub fn queries(&self) -> usize {
        self.queries
    }

    pub fn commits(&self) -> usize {
        self.commits
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks
    }

    /// Statements passed to `execute`, in order.
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    fn is_known(&self, table: &str, key: &[String]) -> bool {
        let committed = self
            .tables
            .get(table)
            .is_some_and(|t| t.keys.contains(key));
        committed || self.staged.iter().any(|(t, k, _)| t == table && k == key)
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn query(&mut self, sql: &str, _params: &[Value]) -> EtlResult<Vec<Vec<Value>>> {
        self.queries += 1;
        self.stubs
            .get(sql)
            .cloned()
            .ok_or_else(|| EtlError::Database(sqlx::Error::Protocol(format!("no stub for: {}", sql))))
    }

    async fn execute(&mut self, sql: &str) -> EtlResult<u64> {
        self.statements.push(sql.to_string());
        Ok(0)
    }

    async fn execute_many(&mut self, statement: &UpsertSkip, rows: &[TypedRow]) -> EtlResult<u64> {
        self.execute_many_calls += 1;
        self.largest_insert = self.largest_insert.max(rows.len());

        if self.fail_on_call == Some(self.execute_many_calls) {
            return Err(EtlError::Database(sqlx::Error::Protocol(
                "injected write failure".to_string(),
            )));
        }

        let positions = statement.key_positions();
        let mut inserted = 0;
        for row in rows {
            // without a declared key every column takes part in uniqueness
            let key: Vec<String> = if positions.is_empty() {
                row.values().iter().map(|v| v.to_string()).collect()
            } else {
                positions
                    .iter()
                    .map(|&i| row.get(i).map(|v| v.to_string()).unwrap_or_default())
                    .collect()
            };

            if !self.is_known(statement.table, &key) {
                self.staged
                    .push((statement.table.to_string(), key, row.clone()));
                inserted += 1;
            }
        }

        Ok(inserted)
    }

    async fn commit(&mut self) -> EtlResult<()> {
        self.commits += 1;
        for (table, key, row) in self.staged.drain(..) {
            let stored = self.tables.entry(table).or_default();
            stored.keys.insert(key);
            stored.rows.push(row);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> EtlResult<()> {
        self.rollbacks += 1;
        self.staged.clear();
        Ok(())
    }
}
