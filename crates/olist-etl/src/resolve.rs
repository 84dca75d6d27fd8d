//! Reference resolver
//!
//! Loads a lookup table once per run and appends the surrogate id for each
//! row's natural key. A miss is recorded as NULL and counted as an orphan;
//! it is never an error.

use std::collections::HashMap;
use tracing::{debug, info};

use crate::db::Database;
use crate::error::{EtlError, EtlResult};
use crate::tables::LookupSpec;
use crate::value::{TypedRow, Value};

/// Distinct orphan keys kept for the run summary.
const ORPHAN_SAMPLE_LIMIT: usize = 5;

/// Immutable natural-key to surrogate-id mapping.
#[derive(Debug, Clone, Default)]
pub struct LookupTable {
    entries: HashMap<String, i64>,
}

impl LookupTable {
    /// Case-folded, whitespace-trimmed form used for both sides of a lookup.
    pub fn normalize(key: &str) -> String {
        key.trim().to_lowercase()
    }

    /// Build from `(natural key, id)` pairs. Later pairs win on collision.
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, i64)>,
        K: AsRef<str>,
    {
        let entries = pairs
            .into_iter()
            .map(|(k, id)| (Self::normalize(k.as_ref()), id))
            .filter(|(k, _)| !k.is_empty())
            .collect();
        Self { entries }
    }

    /// Run the lookup query and build the table.
    pub async fn load(db: &mut dyn Database, spec: &LookupSpec) -> EtlResult<Self> {
        let wrap = |source: EtlError| EtlError::Lookup {
            table: spec.lookup_table.to_string(),
            source: Box::new(source),
        };

        let rows = db.query(&spec.select_sql(), &[]).await.map_err(wrap)?;

        let mut pairs = Vec::with_capacity(rows.len());
        for row in &rows {
            let key = match row.first() {
                Some(Value::Text(k)) => k.clone(),
                Some(Value::Integer(k)) => k.to_string(),
                _ => continue,
            };
            let id = row.get(1).and_then(Value::as_i64).ok_or_else(|| {
                wrap(EtlError::Decode {
                    column: 1,
                    message: format!("{} for '{}' is not an integer", spec.value_column, key),
                })
            })?;
            pairs.push((key, id));
        }

        let table = Self::from_pairs(pairs);
        info!(
            lookup = spec.lookup_table,
            entries = table.len(),
            "Loaded lookup table"
        );
        Ok(table)
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        self.entries.get(&Self::normalize(key)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct ReferenceResolver {
    lookup: LookupTable,
    source_index: usize,
    orphans: u64,
    orphan_samples: Vec<String>,
}

impl ReferenceResolver {
    /// `source_index` is the position of the natural key within each row.
    pub fn new(lookup: LookupTable, source_index: usize) -> Self {
        Self {
            lookup,
            source_index,
            orphans: 0,
            orphan_samples: Vec::new(),
        }
    }

    /// Append the resolved id (or NULL) to `row`.
    ///
    /// A NULL natural key has nothing to resolve and is not an orphan.
    pub fn resolve(&mut self, row: TypedRow) -> TypedRow {
        let key = match row.get(self.source_index).and_then(Value::as_str) {
            Some(key) => key.to_string(),
            None => return row.with_appended(Value::Null),
        };

        match self.lookup.get(&key) {
            Some(id) => row.with_appended(Value::Integer(id)),
            None => {
                self.orphans += 1;
                if self.orphan_samples.len() < ORPHAN_SAMPLE_LIMIT
                    && !self.orphan_samples.contains(&key)
                {
                    debug!(key = %key, "Unresolved reference");
                    self.orphan_samples.push(key);
                }
                row.with_appended(Value::Null)
            },
        }
    }

    pub fn orphans(&self) -> u64 {
        self.orphans
    }

    pub fn orphan_samples(&self) -> &[String] {
        &self.orphan_samples
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryDatabase;
    use crate::tables::PRODUCTS;

    fn row(category: Option<&str>) -> TypedRow {
        TypedRow::new(vec![
            Value::Text("p".into()),
            category.map_or(Value::Null, |c| Value::Text(c.into())),
        ])
    }

    #[test]
    fn test_normalized_lookup() {
        let table = LookupTable::from_pairs([("Toys", 7), ("  beleza_saude ", 3)]);
        assert_eq!(table.get("toys"), Some(7));
        assert_eq!(table.get(" TOYS "), Some(7));
        assert_eq!(table.get("beleza_saude"), Some(3));
        assert_eq!(table.get("games"), None);
    }

    #[test]
    fn test_last_seen_wins() {
        let table = LookupTable::from_pairs([("toys", 1), ("TOYS", 2)]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("toys"), Some(2));
    }

    #[test]
    fn test_resolve_hits_and_orphans() {
        let mut resolver = ReferenceResolver::new(LookupTable::from_pairs([("toys", 7)]), 1);

        let hit = resolver.resolve(row(Some("Toys")));
        assert_eq!(hit.get(2), Some(&Value::Integer(7)));

        let miss = resolver.resolve(row(Some("unknown_cat")));
        assert_eq!(miss.get(2), Some(&Value::Null));
        resolver.resolve(row(Some("unknown_cat")));

        let null = resolver.resolve(row(None));
        assert_eq!(null.len(), 3);

        assert_eq!(resolver.orphans(), 2);
        assert_eq!(resolver.orphan_samples(), &["unknown_cat".to_string()]);
    }

    #[tokio::test]
    async fn test_load_runs_one_query() {
        let spec = PRODUCTS.lookup.unwrap();
        let mut db = MemoryDatabase::new().stub_query(
            spec.select_sql(),
            vec![
                vec![Value::Text("toys".into()), Value::Integer(7)],
                vec![Value::Null, Value::Integer(8)],
                vec![Value::Text("Games".into()), Value::Integer(9)],
            ],
        );

        let table = LookupTable::load(&mut db, &spec).await.unwrap();
        assert_eq!(db.queries(), 1);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("games"), Some(9));
    }

    #[tokio::test]
    async fn test_load_failure_is_lookup_error() {
        let spec = PRODUCTS.lookup.unwrap();
        let mut db = MemoryDatabase::new();
        let err = LookupTable::load(&mut db, &spec).await.unwrap_err();
        assert!(matches!(err, EtlError::Lookup { .. }));
    }
}
