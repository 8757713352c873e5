//! `geoload-core` turns vector datasets into PostGIS tables.
//!
//! This crate includes:
//! - **Identifiers and types**: sanitizing of table and column names, and the
//!   mapping from attribute values to PostgreSQL column types.
//! - **Geometry normalization**: SRID resolution, reprojection and the
//!   declared geometry type of a layer.
//! - **Schema synthesis and loading**: DDL generation and batched inserts
//!   through the [`store::SpatialStore`] port.
//! - **Repair and post-processing**: in-database geometry repair and derived
//!   projected columns.
//! - **Lookups**: boundary code and overlap queries, plus the map style
//!   document.
//!
//! The [`pipeline`] module ties the stages together for one or many files.

pub mod config;
pub mod ddl;
pub mod error;
pub mod geometry;
pub mod ident;
pub mod loader;
pub mod lookup;
pub mod pipeline;
pub mod post_process;
pub mod repair;
pub mod store;
pub mod style;
pub mod type_mapping;
pub mod types;

pub use config::IngestOptions;
pub use error::{GeoLoadError, Result};
pub use pipeline::{ingest_all, ingest_file};
pub use store::{PostgisStore, SpatialStore};
pub use types::{IngestOutcome, IngestStatus, IngestSummary, TableRef, WriteMode};
