//! Display utilities for formatting CLI output.
//!
//! This module provides table row structures for presenting ingestion
//! outcomes and the driver registry in a human-readable format.

use tabled::{Table, Tabled};

use geoload_core::IngestSummary;
use geoload_formats::Driver;

/// Table row representation for one ingested file.
#[derive(Tabled)]
pub struct OutcomeRow {
    /// `OK`, `SKIP` or `ERROR`.
    #[tabled(rename = "Status")]
    pub status: String,
    /// The input file.
    #[tabled(rename = "Source")]
    pub source: String,
    /// Destination table, empty when it was never derived.
    #[tabled(rename = "Table")]
    pub table: String,
    /// Rows inserted.
    #[tabled(rename = "Rows")]
    pub rows: u64,
}

/// Table row representation for displaying driver information.
#[derive(Tabled)]
pub struct DriverRow {
    /// Short identifier for the driver (e.g., `GeoJSON`, `KMZ`).
    #[tabled(rename = "Short Name")]
    pub short_name: String,
    /// Full descriptive name of the driver format.
    #[tabled(rename = "Long Name")]
    pub long_name: String,
    /// File extensions, comma separated.
    #[tabled(rename = "Extensions")]
    pub extensions: String,
    /// `Vector` or `Archive`.
    #[tabled(rename = "Kind")]
    pub kind: String,
}

impl From<&Driver> for DriverRow {
    fn from(driver: &Driver) -> Self {
        Self {
            short_name: driver.short_name.to_string(),
            long_name: driver.long_name.to_string(),
            extensions: driver
                .extensions
                .iter()
                .map(|ext| format!(".{ext}"))
                .collect::<Vec<_>>()
                .join(", "),
            kind: driver.kind.as_str().to_string(),
        }
    }
}

/// Renders one row per outcome.
#[must_use]
pub fn outcome_table(summary: &IngestSummary) -> String {
    let rows: Vec<OutcomeRow> = summary
        .outcomes
        .iter()
        .map(|o| OutcomeRow {
            status: o.status.to_string(),
            source: o.source.clone(),
            table: o.table.as_ref().map(ToString::to_string).unwrap_or_default(),
            rows: o.rows,
        })
        .collect();
    Table::new(rows).to_string()
}

/// Renders the driver registry.
#[must_use]
pub fn driver_table(drivers: &[Driver]) -> String {
    Table::new(drivers.iter().map(DriverRow::from)).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoload_core::{IngestOutcome, IngestStatus, TableRef};
    use geoload_formats::drivers::get_drivers;

    #[test]
    fn test_driver_row_from_driver() {
        let drivers = get_drivers();
        let kmz = drivers.iter().find(|d| d.short_name == "KMZ").unwrap();
        let row = DriverRow::from(kmz);
        assert_eq!(row.extensions, ".kmz");
        assert_eq!(row.kind, "Archive");
    }

    #[test]
    fn test_driver_table_lists_all() {
        let table = driver_table(&get_drivers());
        assert!(table.contains("Short Name"));
        assert!(table.contains("ESRI Shapefile"));
        assert!(table.contains(".geojson, .json"));
    }

    #[test]
    fn test_outcome_table() {
        let mut summary = IngestSummary::default();
        let mut ok = IngestOutcome::new("hex5km.zip", IngestStatus::Ok, "loaded");
        ok.table = Some(TableRef::new("public", "hex5km"));
        ok.rows = 120;
        summary.push(ok);
        summary.push(IngestOutcome::new("vacio.kmz", IngestStatus::Skip, "empty"));

        let table = outcome_table(&summary);
        assert!(table.contains("public.hex5km"));
        assert!(table.contains("120"));
        assert!(table.contains("SKIP"));
    }
}
