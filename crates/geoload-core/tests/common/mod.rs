//! In-memory `SpatialStore` used by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use geoload_core::ddl::SchemaPlan;
use geoload_core::error::{StoreError, StoreResult};
use geoload_core::lookup::{CodeQuery, OverlapFeature, OverlapRequest};
use geoload_core::post_process::ProjectionPlan;
use geoload_core::repair::{RepairCounts, RepairPlan};
use geoload_core::store::SpatialStore;
use geoload_core::types::{LoadRow, TableRef, TargetTable, ValidityStats, WriteMode};

#[derive(Debug, Clone)]
pub struct MemoryTable {
    pub target: TargetTable,
    pub rows: Vec<LoadRow>,
    pub derived_columns: BTreeSet<String>,
    /// Rows whose derived column has been filled.
    pub derived_rows: usize,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<TableRef, MemoryTable>,
    failing_inserts: HashSet<String>,
    postgis_checks: usize,
    repairs: Vec<RepairPlan>,
    projections: Vec<ProjectionPlan>,
    codes: Vec<String>,
}

/// Tables live in a map; each call is atomic, like a committed transaction.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts into `table` fail and leave no rows behind.
    pub fn failing_inserts(self, table: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_inserts
            .insert(table.to_string());
        self
    }

    pub fn with_codes(self, codes: &[&str]) -> Self {
        self.state.lock().unwrap().codes = codes.iter().map(|c| (*c).to_string()).collect();
        self
    }

    pub fn table(&self, table: &TableRef) -> Option<MemoryTable> {
        self.state.lock().unwrap().tables.get(table).cloned()
    }

    pub fn row_count(&self, table: &TableRef) -> usize {
        self.table(table).map_or(0, |t| t.rows.len())
    }

    pub fn postgis_checks(&self) -> usize {
        self.state.lock().unwrap().postgis_checks
    }

    pub fn repairs(&self) -> Vec<RepairPlan> {
        self.state.lock().unwrap().repairs.clone()
    }

    pub fn projections(&self) -> Vec<ProjectionPlan> {
        self.state.lock().unwrap().projections.clone()
    }
}

#[async_trait]
impl SpatialStore for MemoryStore {
    async fn ensure_postgis(&self) -> StoreResult<()> {
        self.state.lock().unwrap().postgis_checks += 1;
        Ok(())
    }

    async fn table_exists(&self, table: &TableRef) -> StoreResult<bool> {
        Ok(self.state.lock().unwrap().tables.contains_key(table))
    }

    async fn create_table(&self, plan: &SchemaPlan, mode: WriteMode) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        let key = plan.target.table.clone();
        if mode == WriteMode::Replace {
            state.tables.remove(&key);
        }
        state.tables.entry(key).or_insert_with(|| MemoryTable {
            target: plan.target.clone(),
            rows: Vec::new(),
            derived_columns: BTreeSet::new(),
            derived_rows: 0,
        });
        Ok(())
    }

    async fn insert_rows(
        &self,
        target: &TargetTable,
        rows: &[LoadRow],
        _batch_size: usize,
    ) -> StoreResult<u64> {
        let mut state = self.state.lock().unwrap();
        if state.failing_inserts.contains(&target.table.table) {
            return Err(StoreError::Backend {
                operation: format!("insert into {}", target.table),
                message: "simulated failure".to_string(),
            });
        }
        let table = state
            .tables
            .get_mut(&target.table)
            .ok_or_else(|| StoreError::Backend {
                operation: format!("insert into {}", target.table),
                message: "relation does not exist".to_string(),
            })?;
        table.rows.extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn validity_stats(&self, table: &TableRef, _column: &str) -> StoreResult<ValidityStats> {
        let state = self.state.lock().unwrap();
        let rows = state.tables.get(table).map_or(&[][..], |t| &t.rows[..]);
        let null = rows.iter().filter(|r| r.wkb.is_none()).count() as u64;
        let total = rows.len() as u64;
        Ok(ValidityStats {
            total,
            null,
            valid: total - null,
            invalid: 0,
        })
    }

    async fn repair_geometries(&self, plan: &RepairPlan) -> StoreResult<RepairCounts> {
        self.state.lock().unwrap().repairs.push(plan.clone());
        Ok(RepairCounts::default())
    }

    async fn derive_projected_column(&self, plan: &ProjectionPlan) -> StoreResult<u64> {
        let mut state = self.state.lock().unwrap();
        state.projections.push(plan.clone());
        let table = state
            .tables
            .get_mut(&plan.table)
            .ok_or_else(|| StoreError::Backend {
                operation: format!("post-process of {}", plan.table),
                message: "relation does not exist".to_string(),
            })?;
        table.derived_columns.insert(plan.rule.column.clone());
        let filled = table.rows.len() - table.derived_rows;
        table.derived_rows = table.rows.len();
        Ok(filled as u64)
    }

    async fn distinct_codes(&self, _query: &CodeQuery) -> StoreResult<Vec<String>> {
        Ok(self.state.lock().unwrap().codes.clone())
    }

    async fn overlapping_features(
        &self,
        _request: &OverlapRequest,
    ) -> StoreResult<Vec<OverlapFeature>> {
        Ok(Vec::new())
    }
}

pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

/// A FeatureCollection of unit squares, one per property object.
pub fn polygons_geojson(properties: &[&str]) -> String {
    let features: Vec<String> = properties
        .iter()
        .enumerate()
        .map(|(i, props)| {
            let x = i as f64;
            format!(
                r#"{{"type":"Feature","properties":{props},"geometry":{{"type":"Polygon","coordinates":[[[{x},0],[{x1},0],[{x1},1],[{x},1],[{x},0]]]}}}}"#,
                x1 = x + 1.0
            )
        })
        .collect();
    format!(
        r#"{{"type":"FeatureCollection","features":[{}]}}"#,
        features.join(",")
    )
}
