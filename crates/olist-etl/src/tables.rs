//! Per-table load descriptors
//!
//! Each Olist table is described once, statically: which CSV column feeds
//! which destination column, how it is coerced, which fields form the
//! natural key, and whether a surrogate key has to be looked up or a column
//! back-filled after loading. The pipeline itself is table-agnostic.

use crate::db::dialect::{Column, UpsertSkip};
use crate::value::{FieldKind, Value};
use serde::Serialize;

/// How a field participates in row validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRole {
    /// Part of the natural/primary key. Must be present and well-typed.
    Key,
    /// Required reference to a parent table. Must be present.
    ForeignKey,
    /// Optional payload. Empty or malformed input becomes NULL.
    Value,
}

impl FieldRole {
    pub fn is_required(self) -> bool {
        matches!(self, FieldRole::Key | FieldRole::ForeignKey)
    }
}

/// Constant substituted for a NULL payload value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    Text(&'static str),
}

impl Literal {
    pub fn to_value(self) -> Value {
        match self {
            Literal::Integer(v) => Value::Integer(v),
            Literal::Float(v) => Value::Float(v),
            Literal::Text(s) => Value::Text(s.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Destination column
    pub column: &'static str,
    /// CSV header name (matched case-sensitively)
    pub source: &'static str,
    pub kind: FieldKind,
    pub role: FieldRole,
    pub default: Option<Literal>,
}

impl FieldSpec {
    pub const fn key(name: &'static str, kind: FieldKind) -> Self {
        Self::mapped(name, name, kind, FieldRole::Key)
    }

    pub const fn reference(name: &'static str) -> Self {
        Self::mapped(name, name, FieldKind::Text, FieldRole::ForeignKey)
    }

    pub const fn value(name: &'static str, kind: FieldKind) -> Self {
        Self::mapped(name, name, kind, FieldRole::Value)
    }

    pub const fn mapped(
        column: &'static str,
        source: &'static str,
        kind: FieldKind,
        role: FieldRole,
    ) -> Self {
        Self {
            column,
            source,
            kind,
            role,
            default: None,
        }
    }

    pub const fn or_default(mut self, default: Literal) -> Self {
        self.default = Some(default);
        self
    }
}

/// Surrogate key resolution against a lookup table.
#[derive(Debug, Clone, Copy)]
pub struct LookupSpec {
    pub lookup_table: &'static str,
    /// Natural key column in the lookup table
    pub key_column: &'static str,
    /// Surrogate id column in the lookup table
    pub value_column: &'static str,
    /// Destination column holding the natural key in the loaded row
    pub source_column: &'static str,
    /// Destination column receiving the resolved id, appended after the fields
    pub target_column: &'static str,
}

impl LookupSpec {
    pub fn select_sql(&self) -> String {
        format!(
            "SELECT {}, {} FROM {}",
            self.key_column, self.value_column, self.lookup_table
        )
    }
}

/// Fill a NULL column from a parent table once all batches are committed.
#[derive(Debug, Clone, Copy)]
pub struct Backfill {
    pub column: &'static str,
    pub parent_table: &'static str,
    pub parent_column: &'static str,
    /// Column present in both tables
    pub join_column: &'static str,
}

impl Backfill {
    pub fn count_unresolved_sql(&self, table: &str) -> String {
        format!("SELECT COUNT(*) FROM {} WHERE {} IS NULL", table, self.column)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub name: &'static str,
    /// Conventional file name in the Olist dataset
    pub file_name: &'static str,
    pub fields: &'static [FieldSpec],
    /// Columns the insert-or-skip is keyed on. Empty means any unique constraint.
    pub conflict_key: &'static [&'static str],
    pub lookup: Option<LookupSpec>,
    pub backfill: Option<Backfill>,
}

impl TableSpec {
    /// Destination columns in row order, including a resolved lookup column.
    pub fn columns(&self) -> Vec<Column> {
        let mut columns: Vec<Column> = self
            .fields
            .iter()
            .map(|f| Column::new(f.column, f.kind))
            .collect();
        if let Some(lookup) = &self.lookup {
            columns.push(Column::new(lookup.target_column, FieldKind::Integer));
        }
        columns
    }

    pub fn field_index(&self, column: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.column == column)
    }

    pub fn upsert_statement(&self) -> UpsertSkip {
        UpsertSkip::new(self.name, self.columns(), self.conflict_key)
    }
}

use FieldKind::{Float, Integer, Text, Timestamp};

pub static CATEGORIES: TableSpec = TableSpec {
    name: "categories",
    file_name: "product_category_name_translation.csv",
    fields: &[
        FieldSpec::mapped("category_name", "product_category_name", Text, FieldRole::Key),
        FieldSpec::mapped(
            "category_name_english",
            "product_category_name_english",
            Text,
            FieldRole::Value,
        ),
    ],
    conflict_key: &["category_name"],
    lookup: None,
    backfill: None,
};

pub static GEO_ZIP: TableSpec = TableSpec {
    name: "geo_zip",
    file_name: "olist_geolocation_dataset.csv",
    fields: &[
        FieldSpec::key("geolocation_zip_code_prefix", Integer),
        FieldSpec::value("geolocation_lat", Float),
        FieldSpec::value("geolocation_lng", Float),
        FieldSpec::value("geolocation_city", Text),
        FieldSpec::value("geolocation_state", Text),
    ],
    conflict_key: &["geolocation_zip_code_prefix"],
    lookup: None,
    backfill: None,
};

pub static CUSTOMERS: TableSpec = TableSpec {
    name: "customers",
    file_name: "olist_customers_dataset.csv",
    fields: &[
        FieldSpec::key("customer_id", Text),
        FieldSpec::value("customer_unique_id", Text),
        FieldSpec::value("customer_zip_code_prefix", Integer),
        FieldSpec::value("customer_city", Text),
        FieldSpec::value("customer_state", Text),
    ],
    conflict_key: &["customer_id"],
    lookup: None,
    backfill: None,
};

pub static SELLERS: TableSpec = TableSpec {
    name: "sellers",
    file_name: "olist_sellers_dataset.csv",
    fields: &[
        FieldSpec::key("seller_id", Text),
        FieldSpec::value("seller_zip_code_prefix", Integer),
        FieldSpec::value("seller_city", Text),
        FieldSpec::value("seller_state", Text),
    ],
    conflict_key: &["seller_id"],
    lookup: None,
    backfill: None,
};

pub static PRODUCTS: TableSpec = TableSpec {
    name: "products",
    file_name: "olist_products_dataset.csv",
    fields: &[
        FieldSpec::key("product_id", Text),
        FieldSpec::value("product_weight_g", Integer),
        FieldSpec::value("product_length_cm", Integer),
        FieldSpec::value("product_height_cm", Integer),
        FieldSpec::value("product_width_cm", Integer),
        FieldSpec::value("product_photos_qty", Integer),
        FieldSpec::value("product_category_name", Text),
    ],
    conflict_key: &["product_id"],
    lookup: Some(LookupSpec {
        lookup_table: "categories",
        key_column: "category_name",
        value_column: "category_id",
        source_column: "product_category_name",
        target_column: "category_id",
    }),
    backfill: None,
};

pub static ORDERS: TableSpec = TableSpec {
    name: "orders",
    file_name: "olist_orders_dataset.csv",
    fields: &[
        FieldSpec::key("order_id", Text),
        FieldSpec::value("customer_id", Text),
        FieldSpec::value("order_status", Text),
        FieldSpec::value("order_purchase_timestamp", Timestamp),
        FieldSpec::value("order_estimated_delivery_date", Timestamp),
    ],
    conflict_key: &["order_id"],
    lookup: None,
    backfill: None,
};

pub static ORDER_ITEMS: TableSpec = TableSpec {
    name: "order_items",
    file_name: "olist_order_items_dataset.csv",
    fields: &[
        FieldSpec::key("order_id", Text),
        FieldSpec::key("order_item_id", Integer),
        FieldSpec::value("product_id", Text),
        FieldSpec::value("seller_id", Text),
        FieldSpec::value("shipping_limit_date", Timestamp),
        FieldSpec::value("price", Float),
        FieldSpec::value("freight_value", Float),
    ],
    conflict_key: &["order_id", "order_item_id"],
    lookup: None,
    backfill: None,
};

pub static ORDER_PAYMENTS: TableSpec = TableSpec {
    name: "order_payments",
    file_name: "olist_order_payments_dataset.csv",
    fields: &[
        FieldSpec::key("order_id", Text),
        FieldSpec::key("payment_sequential", Integer),
        FieldSpec::value("payment_type", Text),
        FieldSpec::value("payment_installments", Integer),
        FieldSpec::value("payment_value", Float),
    ],
    conflict_key: &["order_id", "payment_sequential"],
    lookup: None,
    backfill: None,
};

pub static ORDER_REVIEWS: TableSpec = TableSpec {
    name: "order_reviews",
    file_name: "olist_order_reviews_dataset.csv",
    fields: &[
        FieldSpec::key("review_id", Text),
        FieldSpec::reference("order_id"),
        FieldSpec::value("review_score", Integer),
        FieldSpec::value("review_comment_message", Text),
        FieldSpec::value("review_creation_date", Timestamp),
    ],
    conflict_key: &["review_id"],
    lookup: None,
    backfill: Some(Backfill {
        column: "customer_id",
        parent_table: "orders",
        parent_column: "customer_id",
        join_column: "order_id",
    }),
};

/// All tables in an order that satisfies their references.
pub static CATALOGUE: &[&TableSpec] = &[
    &CATEGORIES,
    &GEO_ZIP,
    &CUSTOMERS,
    &SELLERS,
    &PRODUCTS,
    &ORDERS,
    &ORDER_ITEMS,
    &ORDER_PAYMENTS,
    &ORDER_REVIEWS,
];

pub fn find(name: &str) -> Option<&'static TableSpec> {
    CATALOGUE.iter().copied().find(|t| t.name == name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_keys_are_required_fields() {
        for table in CATALOGUE {
            assert!(!table.conflict_key.is_empty(), "{}", table.name);
            for key in table.conflict_key {
                let field = table
                    .fields
                    .iter()
                    .find(|f| f.column == *key)
                    .unwrap_or_else(|| panic!("{}.{} is not a field", table.name, key));
                assert_eq!(field.role, FieldRole::Key, "{}.{}", table.name, key);
            }
        }
    }

    #[test]
    fn test_lookup_source_is_a_field() {
        let lookup = PRODUCTS.lookup.unwrap();
        assert_eq!(PRODUCTS.field_index(lookup.source_column), Some(6));
        let columns = PRODUCTS.columns();
        assert_eq!(columns.len(), PRODUCTS.fields.len() + 1);
        assert_eq!(columns.last().unwrap().name, "category_id");
        assert_eq!(
            lookup.select_sql(),
            "SELECT category_name, category_id FROM categories"
        );
    }

    #[test]
    fn test_find() {
        assert_eq!(find("order_items").unwrap().conflict_key.len(), 2);
        assert!(find("order_item").is_none());
    }

    #[test]
    fn test_lookup_tables_load_first() {
        let position = |name: &str| CATALOGUE.iter().position(|t| t.name == name).unwrap();
        for table in CATALOGUE {
            if let Some(lookup) = table.lookup {
                assert!(position(lookup.lookup_table) < position(table.name));
            }
            if let Some(backfill) = table.backfill {
                assert!(position(backfill.parent_table) < position(table.name));
            }
        }
    }

    #[test]
    fn test_backfill_count_sql() {
        let backfill = ORDER_REVIEWS.backfill.unwrap();
        assert_eq!(
            backfill.count_unresolved_sql("order_reviews"),
            "SELECT COUNT(*) FROM order_reviews WHERE customer_id IS NULL"
        );
    }
}
