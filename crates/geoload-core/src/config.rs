//! Database aliases and ingestion options.

use std::path::PathBuf;

use url::Url;

use crate::error::ConfigError;
use crate::post_process::PostProcessRules;
use crate::types::WriteMode;

/// Alias resolved through `DATABASE_URL`.
pub const DEFAULT_DATABASE_ALIAS: &str = "default";

/// Rows per insert batch unless overridden.
pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// Snap-to-grid tolerance used after `ST_MakeValid`.
pub const DEFAULT_REPAIR_TOLERANCE: f64 = 1e-9;

/// Environment variable holding the connection string for `alias`.
///
/// `default` maps to `DATABASE_URL`; any other alias to
/// `DATABASE_URL_<ALIAS>` upper-cased with `-` replaced by `_`.
#[must_use]
pub fn database_env_var(alias: &str) -> String {
    if alias.is_empty() || alias.eq_ignore_ascii_case(DEFAULT_DATABASE_ALIAS) {
        "DATABASE_URL".to_string()
    } else {
        format!("DATABASE_URL_{}", alias.to_ascii_uppercase().replace('-', "_"))
    }
}

/// Resolves and validates the connection string for `alias` from the
/// process environment.
///
/// # Errors
///
/// Returns a [`ConfigError`] when the variable is unset, empty, not a URL or
/// not a PostgreSQL URL.
pub fn database_url(alias: &str) -> Result<String, ConfigError> {
    database_url_from(alias, |name| std::env::var(name).ok())
}

/// Same as [`database_url`] with an explicit variable lookup.
///
/// # Errors
///
/// See [`database_url`].
pub fn database_url_from<F>(alias: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let variable = database_env_var(alias);
    let raw = lookup(&variable)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ConfigError::MissingDatabaseUrl {
            alias: alias.to_string(),
            variable: variable.clone(),
        })?;

    let url = Url::parse(&raw).map_err(|e| ConfigError::InvalidDatabaseUrl {
        variable: variable.clone(),
        message: e.to_string(),
    })?;
    match url.scheme() {
        "postgres" | "postgresql" => Ok(raw),
        other => Err(ConfigError::UnsupportedScheme {
            variable,
            scheme: other.to_string(),
        }),
    }
}

/// Options for ingesting one or more files.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Destination schema, created if missing.
    pub schema: String,
    /// Prefix prepended to the file stem when deriving table names.
    pub table_prefix: String,
    /// Explicit table name for every file.
    pub table_name: Option<String>,
    pub mode: WriteMode,
    /// Reproject (or label) geometries to this SRID.
    pub target_srid: Option<i32>,
    /// Directory for `<schema>.<table>.sql` DDL artifacts.
    pub ddl_dir: Option<PathBuf>,
    pub batch_size: usize,
    /// Promote single-part geometries to multi-part before type detection.
    pub promote_to_multi: bool,
    pub repair_tolerance: f64,
    pub post_process: PostProcessRules,
    /// Run `CREATE EXTENSION IF NOT EXISTS postgis` before loading.
    pub ensure_postgis: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            table_prefix: String::new(),
            table_name: None,
            mode: WriteMode::Append,
            target_srid: None,
            ddl_dir: None,
            batch_size: DEFAULT_BATCH_SIZE,
            promote_to_multi: false,
            repair_tolerance: DEFAULT_REPAIR_TOLERANCE,
            post_process: PostProcessRules::default(),
            ensure_postgis: true,
        }
    }
}

impl IngestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    #[must_use]
    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_table_name(mut self, table: Option<String>) -> Self {
        self.table_name = table.filter(|t| !t.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_target_srid(mut self, srid: Option<i32>) -> Self {
        self.target_srid = srid;
        self
    }

    #[must_use]
    pub fn with_ddl_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.ddl_dir = dir;
        self
    }

    /// Set the insert batch size. Zero is treated as one.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn with_promote_to_multi(mut self, promote: bool) -> Self {
        self.promote_to_multi = promote;
        self
    }

    #[must_use]
    pub fn with_repair_tolerance(mut self, tolerance: f64) -> Self {
        self.repair_tolerance = tolerance;
        self
    }

    #[must_use]
    pub fn with_post_process(mut self, rules: PostProcessRules) -> Self {
        self.post_process = rules;
        self
    }

    #[must_use]
    pub fn with_ensure_postgis(mut self, ensure: bool) -> Self {
        self.ensure_postgis = ensure;
        self
    }

    /// Checks option values that cannot be expressed in the types.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] for a negative or non-finite
    /// tolerance or a non-positive target SRID.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.repair_tolerance.is_finite() || self.repair_tolerance < 0.0 {
            return Err(ConfigError::InvalidOption {
                option: "repair-tolerance".to_string(),
                message: format!("{} is not a non-negative number", self.repair_tolerance),
            });
        }
        if let Some(srid) = self.target_srid
            && srid <= 0
        {
            return Err(ConfigError::InvalidOption {
                option: "target-srid".to_string(),
                message: format!("{srid} is not a valid SRID"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| {
            pairs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        }
    }

    #[test]
    fn test_env_var_names() {
        assert_eq!(database_env_var("default"), "DATABASE_URL");
        assert_eq!(database_env_var("analytics"), "DATABASE_URL_ANALYTICS");
        assert_eq!(database_env_var("geo-staging"), "DATABASE_URL_GEO_STAGING");
    }

    #[test]
    fn test_default_alias_resolves() {
        let url = database_url_from(
            "default",
            env(&[("DATABASE_URL", "postgres://u:p@localhost:5432/geo")]),
        )
        .unwrap();
        assert_eq!(url, "postgres://u:p@localhost:5432/geo");
    }

    #[test]
    fn test_missing_alias() {
        let err = database_url_from("reportes", env(&[])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingDatabaseUrl { ref variable, .. } if variable == "DATABASE_URL_REPORTES"
        ));
    }

    #[test]
    fn test_non_postgres_url_rejected() {
        let err = database_url_from(
            "default",
            env(&[("DATABASE_URL", "mysql://localhost/geo")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedScheme { ref scheme, .. } if scheme == "mysql"));

        let err = database_url_from("default", env(&[("DATABASE_URL", "not a url")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDatabaseUrl { .. }));
    }

    #[test]
    fn test_options_builder() {
        let options = IngestOptions::new()
            .with_schema("staging")
            .with_mode(WriteMode::Replace)
            .with_batch_size(0)
            .with_table_name(Some("  ".to_string()));

        assert_eq!(options.schema, "staging");
        assert_eq!(options.mode, WriteMode::Replace);
        assert_eq!(options.batch_size, 1);
        assert!(options.table_name.is_none());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_options_validation() {
        assert!(IngestOptions::new().with_target_srid(Some(0)).validate().is_err());
        assert!(IngestOptions::new().with_repair_tolerance(-1.0).validate().is_err());
    }
}
