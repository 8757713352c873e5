//! [`SpatialStore`] over a PostgreSQL/PostGIS connection pool.

use async_trait::async_trait;
use log::debug;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Row};

use super::SpatialStore;
use crate::ddl::SchemaPlan;
use crate::error::{StoreError, StoreResult};
use crate::ident::quote_ident;
use crate::lookup::{CodeQuery, OverlapFeature, OverlapRequest};
use crate::post_process::ProjectionPlan;
use crate::repair::{RepairCounts, RepairPlan, validity_sql};
use crate::type_mapping::SqlValue;
use crate::types::{LoadRow, TableRef, TargetTable, ValidityStats, WriteMode};

/// PostgreSQL accepts at most this many bind parameters per statement.
const BIND_LIMIT: usize = 65_535;

/// Largest batch that fits the bind limit for `columns` attribute columns
/// plus the geometry.
#[must_use]
pub fn clamp_batch_size(batch_size: usize, columns: usize) -> usize {
    let per_row = columns + 1;
    batch_size.clamp(1, (BIND_LIMIT / per_row).max(1))
}

/// PostGIS-backed store. The pool holds a single connection and every
/// operation runs in its own transaction.
#[derive(Debug, Clone)]
pub struct PostgisStore {
    pool: PgPool,
}

impl PostgisStore {
    /// Opens a one-connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connect`] when the database is unreachable.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .map_err(StoreError::Connect)?;
        Ok(Self { pool })
    }

    async fn begin(&self, operation: &str) -> StoreResult<sqlx::Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| StoreError::query(operation, e))
    }
}

#[async_trait]
impl SpatialStore for PostgisStore {
    async fn ensure_postgis(&self) -> StoreResult<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS postgis")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::query("create extension postgis", e))?;
        Ok(())
    }

    async fn table_exists(&self, table: &TableRef) -> StoreResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT to_regclass($1) IS NOT NULL")
            .bind(table.quoted())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::query(format!("look up {table}"), e))
    }

    async fn create_table(&self, plan: &SchemaPlan, mode: WriteMode) -> StoreResult<()> {
        let operation = format!("create table {}", plan.target.table);
        let mut tx = self.begin(&operation).await?;

        if mode == WriteMode::Replace {
            debug!("Dropping {} before recreating it", plan.target.table);
            sqlx::query(&plan.drop_statement())
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::query(&operation, e))?;
        }
        for statement in &plan.statements {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::query(&operation, e))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::query(&operation, e))
    }

    async fn insert_rows(
        &self,
        target: &TargetTable,
        rows: &[LoadRow],
        batch_size: usize,
    ) -> StoreResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let operation = format!("insert into {}", target.table);
        let batch_size = clamp_batch_size(batch_size, target.columns.len());
        let columns = target
            .columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .chain(std::iter::once(quote_ident(&target.geometry_column)))
            .collect::<Vec<_>>()
            .join(", ");
        let srid = target.srid;

        let mut tx = self.begin(&operation).await?;
        let mut inserted = 0;
        for (n, batch) in rows.chunks(batch_size).enumerate() {
            let mut builder: QueryBuilder<'_, Postgres> =
                QueryBuilder::new(format!("INSERT INTO {} ({columns}) ", target.table.quoted()));
            builder.push_values(batch, |mut row_builder, row| {
                for value in &row.values {
                    match value {
                        SqlValue::Bool(v) => row_builder.push_bind(*v),
                        SqlValue::BigInt(v) => row_builder.push_bind(*v),
                        SqlValue::Double(v) => row_builder.push_bind(*v),
                        SqlValue::Timestamp(v) => row_builder.push_bind(*v),
                        SqlValue::Text(v) => row_builder.push_bind(v.clone()),
                    };
                }
                row_builder
                    .push("ST_SetSRID(ST_GeomFromWKB(")
                    .push_bind_unseparated(row.wkb.clone())
                    .push_unseparated(format!("), {srid})"));
            });

            let result = builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::query(&operation, e))?;
            inserted += result.rows_affected();
            debug!("Batch {} into {}: {} rows", n + 1, target.table, batch.len());
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::query(&operation, e))?;
        Ok(inserted)
    }

    async fn validity_stats(&self, table: &TableRef, column: &str) -> StoreResult<ValidityStats> {
        let operation = format!("validity check of {table}");
        let row = sqlx::query(&validity_sql(table, column))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::query(&operation, e))?;

        let count = |name: &str| -> StoreResult<u64> {
            let value: i64 = row
                .try_get(name)
                .map_err(|e| StoreError::query(&operation, e))?;
            Ok(u64::try_from(value).unwrap_or_default())
        };
        Ok(ValidityStats {
            total: count("total")?,
            null: count("null_count")?,
            valid: count("valid")?,
            invalid: count("invalid")?,
        })
    }

    async fn repair_geometries(&self, plan: &RepairPlan) -> StoreResult<RepairCounts> {
        let operation = format!("repair of {}.{}", plan.table, plan.column);
        let mut tx = self.begin(&operation).await?;

        let made_valid = sqlx::query(&plan.make_valid)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::query(&operation, e))?
            .rows_affected();
        let extracted = match &plan.extract {
            Some(sql) => sqlx::query(sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::query(&operation, e))?
                .rows_affected(),
            None => 0,
        };

        tx.commit()
            .await
            .map_err(|e| StoreError::query(&operation, e))?;
        Ok(RepairCounts {
            made_valid,
            extracted,
        })
    }

    async fn derive_projected_column(&self, plan: &ProjectionPlan) -> StoreResult<u64> {
        let operation = format!("post-process of {}", plan.table);
        let mut tx = self.begin(&operation).await?;

        let mut filled = 0;
        for statement in plan.statements() {
            let result = sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::query(&operation, e))?;
            if statement == plan.backfill {
                filled = result.rows_affected();
            }
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::query(&operation, e))?;
        Ok(filled)
    }

    async fn distinct_codes(&self, query: &CodeQuery) -> StoreResult<Vec<String>> {
        let mut scalar = sqlx::query_scalar::<_, String>(&query.sql);
        if let Some(parent) = &query.parent {
            scalar = scalar.bind(parent.clone());
        }
        scalar
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::query("code lookup", e))
    }

    async fn overlapping_features(&self, request: &OverlapRequest) -> StoreResult<Vec<OverlapFeature>> {
        let operation = format!("overlap lookup for hexagon {}", request.hex_gid);
        let rows = sqlx::query(&request.sql)
            .bind(request.hex_gid)
            .bind(request.limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::query(&operation, e))?;

        rows.iter()
            .map(|row| -> StoreResult<OverlapFeature> {
                let properties: String = row
                    .try_get("properties")
                    .map_err(|e| StoreError::query(&operation, e))?;
                Ok(OverlapFeature {
                    gid: row
                        .try_get("gid")
                        .map_err(|e| StoreError::query(&operation, e))?,
                    area: row
                        .try_get("area")
                        .map_err(|e| StoreError::query(&operation, e))?,
                    properties: serde_json::from_str(&properties).map_err(|e| {
                        StoreError::Backend {
                            operation: operation.clone(),
                            message: e.to_string(),
                        }
                    })?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_size_clamped_to_bind_limit() {
        assert_eq!(clamp_batch_size(5000, 3), 5000);
        assert_eq!(clamp_batch_size(50_000, 3), 16_383);
        assert_eq!(clamp_batch_size(0, 3), 1);
        assert_eq!(clamp_batch_size(10, 100_000), 1);
    }
}
