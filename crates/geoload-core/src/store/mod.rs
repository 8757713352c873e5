//! The spatial store port.
//!
//! Every stage talks to the database through [`SpatialStore`]. The PostGIS
//! adapter runs each call in its own transaction; tests substitute an
//! in-memory implementation.

use async_trait::async_trait;

use crate::ddl::SchemaPlan;
use crate::error::StoreResult;
use crate::lookup::{CodeQuery, OverlapFeature, OverlapRequest};
use crate::post_process::ProjectionPlan;
use crate::repair::{RepairCounts, RepairPlan};
use crate::types::{LoadRow, TableRef, TargetTable, ValidityStats, WriteMode};

pub mod postgis;

pub use postgis::PostgisStore;

/// Operations the ingestion pipeline and lookups need from a spatial database.
#[async_trait]
pub trait SpatialStore: Send + Sync {
    /// Installs the PostGIS extension if it is missing.
    async fn ensure_postgis(&self) -> StoreResult<()>;

    async fn table_exists(&self, table: &TableRef) -> StoreResult<bool>;

    /// Creates the target table, dropping it first (with dependents) under
    /// [`WriteMode::Replace`].
    async fn create_table(&self, plan: &SchemaPlan, mode: WriteMode) -> StoreResult<()>;

    /// Inserts `rows` in batches of at most `batch_size` inside one
    /// transaction. Returns the number of rows inserted.
    async fn insert_rows(
        &self,
        target: &TargetTable,
        rows: &[LoadRow],
        batch_size: usize,
    ) -> StoreResult<u64>;

    async fn validity_stats(&self, table: &TableRef, column: &str) -> StoreResult<ValidityStats>;

    /// Runs both repair phases in one transaction.
    async fn repair_geometries(&self, plan: &RepairPlan) -> StoreResult<RepairCounts>;

    /// Adds and back-fills a reprojected geometry column. Returns the number
    /// of rows back-filled.
    async fn derive_projected_column(&self, plan: &ProjectionPlan) -> StoreResult<u64>;

    async fn distinct_codes(&self, query: &CodeQuery) -> StoreResult<Vec<String>>;

    async fn overlapping_features(&self, request: &OverlapRequest) -> StoreResult<Vec<OverlapFeature>>;
}
