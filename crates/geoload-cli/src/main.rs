//! Command-line interface for `geoload`, a vector geospatial to PostGIS loader.
//!
//! This binary provides a thin CLI over the [`geoload_core`] library: it parses
//! arguments, loads `.env`, configures logging, and delegates to command
//! handlers.
//!
//! # Architecture
//!
//! The CLI is built using [`clap`] for argument parsing and [`tracing`] for
//! structured logging. Library crates log through the `log` facade, bridged
//! into `tracing` at start-up. Every command runs on a single-threaded Tokio
//! runtime against one database connection.
//!
//! # Available Commands
//!
//! - `ingest` - Load vector files, archives or directories into PostGIS
//! - `codes` - List administrative boundary codes
//! - `overlaps` - Features overlapping one hexagon, largest first
//! - `style` - Print the map style document
//! - `drivers` - List the supported input formats

mod display;

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Args, Parser, Subcommand};
use tracing::{Level, debug, info};
use tracing_log::LogTracer;
use tracing_subscriber::FmtSubscriber;

use geoload_core::config::{DEFAULT_BATCH_SIZE, DEFAULT_DATABASE_ALIAS, database_url};
use geoload_core::lookup::{AdminLevel, CodeLookup, DEFAULT_OVERLAP_LIMIT, OverlapQuery};
use geoload_core::post_process::PostProcessRules;
use geoload_core::style::{DEFAULT_LAYER_NAME, DEFAULT_MAP_NAME, DEFAULT_PUBLIC_URL, StyleConfig};
use geoload_core::{
    GeoLoadError, IngestOptions, IngestStatus, PostgisStore, SpatialStore, TableRef, WriteMode,
    ingest_all,
};
use geoload_formats::drivers::get_drivers;

use crate::display::{driver_table, outcome_table};

#[derive(Parser)]
#[command(
    name = "geoload",
    version,
    about = "Load vector geospatial files into PostGIS",
    long_about = "geoload reads Shapefile, GeoJSON, GeoPackage, KML, GML, KMZ and ZIP inputs,\n\
                  synthesizes a typed table, bulk-loads it, and repairs invalid geometries."
)]
/// Command-line arguments and options for the `geoload` CLI.
struct Cli {
    /// Enable verbose (INFO level) logging output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug (DEBUG level) logging output with detailed diagnostics.
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands for the `geoload` CLI.
#[derive(Subcommand)]
enum Commands {
    /// Ingests vector files into PostGIS tables.
    ///
    /// Each file gets one line with its status (OK, SKIP or ERROR). The exit
    /// code is non-zero when any file failed.
    Ingest(IngestArgs),

    /// Lists administrative boundary codes as a JSON array.
    Codes {
        /// Level to list: region, province or commune.
        #[arg(long)]
        level: AdminLevel,

        /// Code of the parent level to filter by.
        #[arg(long, value_name = "CODE")]
        parent: Option<String>,

        /// Boundary table as `schema.table`.
        #[arg(long, default_value = "public.admin_boundaries")]
        boundaries: String,

        /// Database alias.
        #[arg(long, default_value = DEFAULT_DATABASE_ALIAS)]
        database: String,
    },

    /// Lists features overlapping a hexagon as a JSON array.
    Overlaps {
        /// `gid` of the hexagon.
        #[arg(long)]
        hex_gid: i64,

        /// Maximum number of features.
        #[arg(long, default_value_t = DEFAULT_OVERLAP_LIMIT)]
        limit: i64,

        /// Feature table as `schema.table`.
        #[arg(long, default_value = "public.formaciones")]
        features: String,

        /// Hexagon table as `schema.table`.
        #[arg(long, default_value = "public.hex5km")]
        hexagons: String,

        /// Database alias.
        #[arg(long, default_value = DEFAULT_DATABASE_ALIAS)]
        database: String,
    },

    /// Prints the map style document for the vector tile server.
    Style {
        /// Public URL of the tile server.
        #[arg(long, env = "TEGOLA_PUBLIC_URL", default_value = DEFAULT_PUBLIC_URL)]
        public_url: String,

        /// Map name on the tile server.
        #[arg(long, env = "TEGOLA_MAP_NAME", default_value = DEFAULT_MAP_NAME)]
        map_name: String,

        /// Layer drawn as outlines.
        #[arg(long, env = "TEGOLA_LAYER_NAME", default_value = DEFAULT_LAYER_NAME)]
        layer_name: String,
    },

    /// Lists the supported input formats.
    Drivers,
}

/// Arguments of the `ingest` subcommand.
#[derive(Args)]
struct IngestArgs {
    /// Files, archives or directories to load.
    #[arg(long, value_name = "PATH", num_args = 1.., required = true)]
    source: Vec<PathBuf>,

    /// Destination schema, created if missing.
    #[arg(long, default_value = "public")]
    schema: String,

    /// Prefix for table names derived from file names.
    #[arg(long, default_value = "")]
    table_prefix: String,

    /// Table name for every file instead of the file name.
    #[arg(long)]
    table: Option<String>,

    /// What to do with an existing table: append or replace.
    #[arg(long, default_value = "append")]
    if_exists: WriteMode,

    /// Reproject geometries to this EPSG code.
    #[arg(long)]
    target_srid: Option<i32>,

    /// Directory for `<schema>.<table>.sql` DDL files.
    #[arg(long, value_name = "DIR")]
    out_sql: Option<PathBuf>,

    /// Database alias (`default` reads `DATABASE_URL`).
    #[arg(long, default_value = DEFAULT_DATABASE_ALIAS)]
    database: String,

    /// Do not run `CREATE EXTENSION IF NOT EXISTS postgis`.
    #[arg(long)]
    no_postgis_extension: bool,

    /// Rows per insert statement.
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Promote single-part geometries to multi-part.
    #[arg(long)]
    promote_multi: bool,

    /// Snap-to-grid tolerance for repaired geometries.
    #[arg(long, default_value_t = geoload_core::config::DEFAULT_REPAIR_TOLERANCE)]
    repair_tolerance: f64,

    /// Tables that get a `geom_3857` column (default: hex5km).
    #[arg(long, value_name = "TABLE")]
    post_process_table: Vec<String>,
}

impl IngestArgs {
    fn options(&self) -> IngestOptions {
        let post_process = if self.post_process_table.is_empty() {
            PostProcessRules::default()
        } else {
            PostProcessRules::web_mercator(&self.post_process_table)
        };
        IngestOptions::new()
            .with_schema(self.schema.clone())
            .with_table_prefix(self.table_prefix.clone())
            .with_table_name(self.table.clone())
            .with_mode(self.if_exists)
            .with_target_srid(self.target_srid)
            .with_ddl_dir(self.out_sql.clone())
            .with_batch_size(self.batch_size)
            .with_promote_to_multi(self.promote_multi)
            .with_repair_tolerance(self.repair_tolerance)
            .with_post_process(post_process)
            .with_ensure_postgis(!self.no_postgis_extension)
    }
}

/// Entry point for the `geoload` command-line interface.
///
/// # Errors
///
/// Returns an error if configuration is missing, the database is unreachable,
/// or any ingested file ended in ERROR.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging based on verbosity flags
    let log_level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    };

    // Bridge logs from the `log` crate to the `tracing` ecosystem.
    LogTracer::init()?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Ingest(args) => handle_ingest(&args).await?,
        Commands::Codes {
            level,
            parent,
            boundaries,
            database,
        } => {
            let store = connect(&database).await?;
            let lookup = CodeLookup::default().with_table(TableRef::parse(&boundaries));
            let codes = store
                .distinct_codes(&lookup.query(level, parent.as_deref()))
                .await
                .map_err(|e| report(e.into()))?;
            println!("{}", serde_json::to_string_pretty(&codes)?);
        },
        Commands::Overlaps {
            hex_gid,
            limit,
            features,
            hexagons,
            database,
        } => {
            let store = connect(&database).await?;
            let query = OverlapQuery::new(TableRef::parse(&features), TableRef::parse(&hexagons));
            let rows = store
                .overlapping_features(&query.request(hex_gid, limit))
                .await
                .map_err(|e| report(e.into()))?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        },
        Commands::Style {
            public_url,
            map_name,
            layer_name,
        } => {
            let style = StyleConfig::new(&public_url, &map_name, &layer_name);
            println!("{}", serde_json::to_string_pretty(&style.to_json())?);
        },
        Commands::Drivers => handle_drivers(),
    }

    Ok(())
}

/// Turns a library error into a message with its recovery hint.
fn report(err: GeoLoadError) -> anyhow::Error {
    match err.recovery_suggestion() {
        Some(hint) => anyhow!("{}\nHint: {hint}", err.user_message()),
        None => anyhow!(err.user_message()),
    }
}

async fn connect(alias: &str) -> Result<PostgisStore> {
    let url = database_url(alias).map_err(|e| report(e.into()))?;
    debug!("Connecting to database alias '{alias}'");
    PostgisStore::connect(&url)
        .await
        .map_err(|e| report(e.into()))
}

async fn handle_ingest(args: &IngestArgs) -> Result<()> {
    let options = args.options();
    options.validate().map_err(|e| report(e.into()))?;
    let store = connect(&args.database).await?;

    info!("Ingesting {} source(s) into schema {}", args.source.len(), options.schema);
    let summary = ingest_all(&store, &args.source, &options)
        .await
        .map_err(report)?;

    for outcome in &summary.outcomes {
        println!("[{}] {}", outcome.status, outcome.message);
    }
    println!("\n{}", outcome_table(&summary));
    println!("{summary}");

    let failed = summary.count(IngestStatus::Error);
    if failed > 0 {
        return Err(anyhow!("{failed} file(s) failed to load"));
    }
    Ok(())
}

/// Handles the `drivers` subcommand by displaying a formatted table of the
/// registered input formats.
fn handle_drivers() {
    let drivers = get_drivers();
    println!("\nAvailable Drivers ({} total):\n", drivers.len());
    println!("{}", driver_table(&drivers));
}
