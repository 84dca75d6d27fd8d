//! SQL dialects
//!
//! The only vendor-specific SQL the loader issues is the insert-or-skip
//! statement and the post-load backfill. Both are rendered here; callers
//! hold a [`Dialect`] and never branch on the vendor themselves.

use crate::tables::Backfill;
use crate::value::FieldKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bind parameter limit shared by the PostgreSQL and MySQL wire protocols.
pub const MAX_BIND_PARAMS: usize = 65_535;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    #[serde(alias = "postgresql", alias = "pg")]
    Postgres,
    #[serde(alias = "mariadb")]
    Mysql,
}

impl Dialect {
    pub fn default_port(self) -> u16 {
        match self {
            Dialect::Postgres => 5432,
            Dialect::Mysql => 3306,
        }
    }

    pub fn default_user(self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Mysql => "root",
        }
    }

    fn placeholder(self, position: usize, kind: FieldKind) -> String {
        match (self, kind) {
            // text parameters are not implicitly cast to timestamp columns
            (Dialect::Postgres, FieldKind::Timestamp) => format!("CAST(${} AS TIMESTAMP)", position),
            (Dialect::Postgres, _) => format!("${}", position),
            (Dialect::Mysql, _) => "?".to_string(),
        }
    }

    /// Render a multi-row insert that silently skips rows colliding with an
    /// existing key. Never updates existing rows.
    pub fn upsert_skip(self, statement: &UpsertSkip, rows: usize) -> String {
        let names: Vec<&str> = statement.columns.iter().map(|c| c.name).collect();
        let width = statement.columns.len();

        let tuples: Vec<String> = (0..rows)
            .map(|row| {
                let cells: Vec<String> = statement
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(i, c)| self.placeholder(row * width + i + 1, c.kind))
                    .collect();
                format!("({})", cells.join(", "))
            })
            .collect();

        match self {
            Dialect::Postgres => {
                let target = if statement.conflict_key.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", statement.conflict_key.join(", "))
                };
                format!(
                    "INSERT INTO {} ({}) VALUES {} ON CONFLICT{} DO NOTHING",
                    statement.table,
                    names.join(", "),
                    tuples.join(", "),
                    target
                )
            },
            Dialect::Mysql => format!(
                "INSERT IGNORE INTO {} ({}) VALUES {}",
                statement.table,
                names.join(", "),
                tuples.join(", ")
            ),
        }
    }

    /// Copy `backfill.parent_column` into rows of `table` where the target
    /// column is still NULL.
    pub fn backfill(self, table: &str, backfill: &Backfill) -> String {
        match self {
            Dialect::Postgres => format!(
                "UPDATE {t} AS r SET {c} = p.{pc} FROM {p} AS p \
                 WHERE r.{j} = p.{j} AND r.{c} IS NULL",
                t = table,
                c = backfill.column,
                p = backfill.parent_table,
                pc = backfill.parent_column,
                j = backfill.join_column,
            ),
            Dialect::Mysql => format!(
                "UPDATE {t} r JOIN {p} p ON r.{j} = p.{j} \
                 SET r.{c} = p.{pc} WHERE r.{c} IS NULL",
                t = table,
                c = backfill.column,
                p = backfill.parent_table,
                pc = backfill.parent_column,
                j = backfill.join_column,
            ),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Postgres => write!(f, "postgres"),
            Dialect::Mysql => write!(f, "mysql"),
        }
    }
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::Mysql),
            other => Err(format!(
                "unsupported database vendor '{}', expected 'postgres' or 'mysql'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl Column {
    pub fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

/// Insert-or-skip-on-conflict against one table.
#[derive(Debug, Clone)]
pub struct UpsertSkip {
    pub table: &'static str,
    pub columns: Vec<Column>,
    pub conflict_key: &'static [&'static str],
}

impl UpsertSkip {
    pub fn new(
        table: &'static str,
        columns: Vec<Column>,
        conflict_key: &'static [&'static str],
    ) -> Self {
        Self {
            table,
            columns,
            conflict_key,
        }
    }

    /// Positions of the conflict key within the column list.
    pub fn key_positions(&self) -> Vec<usize> {
        self.conflict_key
            .iter()
            .filter_map(|k| self.columns.iter().position(|c| c.name == *k))
            .collect()
    }

    /// Largest number of rows one statement can carry.
    pub fn rows_per_statement(&self) -> usize {
        (MAX_BIND_PARAMS / self.columns.len().max(1)).max(1)
    }
}
