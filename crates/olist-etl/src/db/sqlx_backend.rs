//! Shared sqlx backend
//!
//! PostgreSQL and MySQL differ only in driver types, the dialect used to
//! render inserts and one integer width tried while decoding. Everything else
//! (pooling, the lazily begun transaction, binds, decoding) is generated
//! here once per driver.

macro_rules! sqlx_backend {
    (
        $(#[$meta:meta])*
        $name:ident {
            driver: $driver:ty,
            arguments: $arguments:ty,
            row: $row:ty,
            connect_options: $connect_options:ty,
            pool_options: $pool_options:ty,
            dialect: $dialect:expr,
            narrow_int: $narrow:ty $(,)?
        }
    ) => {
        $(#[$meta])*
        pub struct $name {
            pool: sqlx::Pool<$driver>,
            tx: Option<sqlx::Transaction<'static, $driver>>,
        }

        impl $name {
            pub async fn connect(
                settings: &$crate::config::DatabaseSettings,
            ) -> $crate::error::EtlResult<Self> {
                use std::str::FromStr;

                let options = match settings.url.as_deref() {
                    Some(url) => <$connect_options>::from_str(url)?,
                    None => <$connect_options>::new()
                        .host(&settings.host)
                        .port(settings.port())
                        .username(settings.user())
                        .password(&settings.pass)
                        .database(&settings.name),
                };

                let pool = <$pool_options>::new()
                    .max_connections(1)
                    .acquire_timeout(std::time::Duration::from_secs(settings.connect_timeout))
                    .connect_with(options)
                    .await?;

                Ok(Self::from_pool(pool))
            }

            pub fn from_pool(pool: sqlx::Pool<$driver>) -> Self {
                Self { pool, tx: None }
            }

            async fn transaction(
                &mut self,
            ) -> $crate::error::EtlResult<&mut sqlx::Transaction<'static, $driver>> {
                let tx = match self.tx.take() {
                    Some(tx) => tx,
                    None => self.pool.begin().await?,
                };
                Ok(self.tx.insert(tx))
            }
        }

        fn bind<'q>(
            query: sqlx::query::Query<'q, $driver, $arguments>,
            value: &'q $crate::value::Value,
            kind: $crate::value::FieldKind,
        ) -> sqlx::query::Query<'q, $driver, $arguments> {
            use $crate::value::{FieldKind, Value};

            match value {
                Value::Integer(v) => query.bind(*v),
                Value::Float(v) => query.bind(*v),
                Value::Text(s) | Value::Timestamp(s) => query.bind(s.as_str()),
                Value::Null => match kind {
                    FieldKind::Integer => query.bind(None::<i64>),
                    FieldKind::Float => query.bind(None::<f64>),
                    FieldKind::Text | FieldKind::Timestamp => query.bind(None::<&str>),
                },
            }
        }

        fn decode(row: &$row) -> $crate::error::EtlResult<Vec<$crate::value::Value>> {
            use sqlx::Row;
            use $crate::value::Value;

            (0..row.len())
                .map(|i| {
                    if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
                        return Ok(v.map_or(Value::Null, Value::Integer));
                    }
                    if let Ok(v) = row.try_get::<Option<i32>, _>(i) {
                        return Ok(v.map_or(Value::Null, |v| Value::Integer(v.into())));
                    }
                    if let Ok(v) = row.try_get::<Option<$narrow>, _>(i) {
                        return Ok(v.map_or(Value::Null, |v| Value::Integer(v.into())));
                    }
                    if let Ok(v) = row.try_get::<Option<f64>, _>(i) {
                        return Ok(v.map_or(Value::Null, Value::Float));
                    }
                    row.try_get::<Option<String>, _>(i)
                        .map(|v| v.map_or(Value::Null, Value::Text))
                        .map_err(|e| $crate::error::EtlError::Decode {
                            column: i,
                            message: e.to_string(),
                        })
                })
                .collect()
        }

        #[async_trait::async_trait]
        impl $crate::db::Database for $name {
            fn dialect(&self) -> $crate::db::dialect::Dialect {
                $dialect
            }

            async fn query(
                &mut self,
                sql: &str,
                params: &[$crate::value::Value],
            ) -> $crate::error::EtlResult<Vec<Vec<$crate::value::Value>>> {
                let mut query = sqlx::query(sql);
                for value in params {
                    query = bind(query, value, $crate::value::FieldKind::Text);
                }

                let rows = match self.tx.as_mut() {
                    Some(tx) => query.fetch_all(&mut **tx).await?,
                    None => query.fetch_all(&self.pool).await?,
                };

                rows.iter().map(decode).collect()
            }

            async fn execute(&mut self, sql: &str) -> $crate::error::EtlResult<u64> {
                let tx = self.transaction().await?;
                let result = sqlx::query(sql).execute(&mut **tx).await?;
                Ok(result.rows_affected())
            }

            async fn execute_many(
                &mut self,
                statement: &$crate::db::dialect::UpsertSkip,
                rows: &[$crate::value::TypedRow],
            ) -> $crate::error::EtlResult<u64> {
                if rows.is_empty() {
                    return Ok(0);
                }

                let sql = $dialect.upsert_skip(statement, rows.len());
                let mut query = sqlx::query(&sql);
                for row in rows {
                    for (value, column) in row.values().iter().zip(&statement.columns) {
                        query = bind(query, value, column.kind);
                    }
                }

                let tx = self.transaction().await?;
                let result = query.execute(&mut **tx).await?;
                Ok(result.rows_affected())
            }

            async fn commit(&mut self) -> $crate::error::EtlResult<()> {
                if let Some(tx) = self.tx.take() {
                    tx.commit().await?;
                }
                Ok(())
            }

            async fn rollback(&mut self) -> $crate::error::EtlResult<()> {
                if let Some(tx) = self.tx.take() {
                    tx.rollback().await?;
                }
                Ok(())
            }
        }
    };
}
