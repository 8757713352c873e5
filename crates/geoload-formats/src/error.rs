use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

/// A position within a source file, such as a GeoJSON sequence line or a
/// shapefile record.
///
/// All indices are 1-based where possible to align with human expectations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcePosition {
    /// Line number in the source (1-based)
    pub line: Option<u64>,
    /// Logical record (feature) number reported by the parser
    pub record: Option<u64>,
}

impl SourcePosition {
    /// Position pointing at a 1-based line.
    #[must_use]
    pub fn line(line: u64) -> Self {
        Self {
            line: Some(line),
            ..Self::default()
        }
    }

    /// Position pointing at a 1-based record.
    #[must_use]
    pub fn record(record: u64) -> Self {
        Self {
            record: Some(record),
            ..Self::default()
        }
    }

    /// Returns true when the position does not contain any location metadata.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.line.is_none() && self.record.is_none()
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();

        if let Some(line) = self.line {
            parts.push(format!("line {line}"));
        }
        if let Some(record) = self.record {
            parts.push(format!("record {record}"));
        }

        if parts.is_empty() {
            write!(f, "unknown position")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// Errors that can occur when opening or parsing a vector source.
#[derive(Debug)]
pub enum FormatReadError {
    /// An underlying I/O failure occurred.
    Io {
        /// The originating error.
        source: std::io::Error,
        /// Optional context describing what was being read.
        context: Option<String>,
    },
    /// Parsing failed for the input source.
    Parse {
        /// Human readable description of the failure.
        message: String,
        /// Optional position describing where the failure occurred.
        position: Option<SourcePosition>,
        /// Optional context describing what was being read.
        context: Option<String>,
    },
    /// No driver handles the file extension.
    UnsupportedFormat {
        /// The rejected path.
        path: PathBuf,
    },
    /// An archive was opened but holds nothing we can read.
    NoPayload {
        /// The archive path.
        archive: PathBuf,
        /// What we were looking for (e.g. ".kml").
        expected: String,
    },
}

impl FormatReadError {
    fn fmt_context(context: Option<&str>) -> String {
        context
            .map(|c| format!(" while reading {c}"))
            .unwrap_or_default()
    }

    fn fmt_position(position: Option<&SourcePosition>) -> String {
        position
            .filter(|pos| !pos.is_empty())
            .map(|pos| format!(" at {pos}"))
            .unwrap_or_default()
    }

    /// Shorthand for a [`FormatReadError::Parse`] without position.
    pub fn parse(message: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            position: None,
            context: Some(context.into()),
        }
    }

    /// Wraps an I/O error with a description of what was being read.
    pub fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        Self::Io {
            source,
            context: Some(context.into()),
        }
    }

    /// Attach additional context to the error, returning the updated error.
    #[must_use]
    pub fn with_additional_context(mut self, context: impl Into<String>) -> Self {
        let context = context.into();
        match &mut self {
            FormatReadError::Io {
                context: existing, ..
            }
            | FormatReadError::Parse {
                context: existing, ..
            } => match existing {
                Some(existing) if !existing.is_empty() => {
                    existing.push_str("; ");
                    existing.push_str(&context);
                },
                _ => *existing = Some(context),
            },
            FormatReadError::UnsupportedFormat { .. } | FormatReadError::NoPayload { .. } => {},
        }
        self
    }
}

impl fmt::Display for FormatReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatReadError::Io { source, context } => {
                write!(
                    f,
                    "I/O error{}: {source}",
                    Self::fmt_context(context.as_deref())
                )
            },
            FormatReadError::Parse {
                message,
                position,
                context,
            } => write!(
                f,
                "Parse error{}{}: {message}",
                Self::fmt_context(context.as_deref()),
                Self::fmt_position(position.as_ref())
            ),
            FormatReadError::UnsupportedFormat { path } => {
                write!(f, "Unsupported vector format: {}", path.display())
            },
            FormatReadError::NoPayload { archive, expected } => write!(
                f,
                "Archive {} does not contain a readable {expected} file",
                archive.display()
            ),
        }
    }
}

impl StdError for FormatReadError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            FormatReadError::Io { source, .. } => Some(source),
            FormatReadError::Parse { .. }
            | FormatReadError::UnsupportedFormat { .. }
            | FormatReadError::NoPayload { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for FormatReadError {
    fn from(err: rusqlite::Error) -> Self {
        FormatReadError::Parse {
            message: err.to_string(),
            position: None,
            context: Some("GeoPackage".to_string()),
        }
    }
}

impl From<zip::result::ZipError> for FormatReadError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(source) => FormatReadError::Io {
                source,
                context: Some("zip archive".to_string()),
            },
            other => FormatReadError::Parse {
                message: other.to_string(),
                position: None,
                context: Some("zip archive".to_string()),
            },
        }
    }
}

/// Result type alias that uses [`FormatReadError`].
pub type FormatResult<T> = Result<T, FormatReadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_source_position() {
        let pos = SourcePosition {
            line: Some(10),
            record: Some(3),
        };

        assert_eq!(pos.to_string(), "line 10, record 3");
    }

    #[test]
    fn display_parse_error_with_context() {
        let error = FormatReadError::Parse {
            message: "unexpected token".to_string(),
            position: Some(SourcePosition::line(5)),
            context: Some("roads.geojson".to_string()),
        };

        assert_eq!(
            error.to_string(),
            "Parse error while reading roads.geojson at line 5: unexpected token"
        );
    }

    #[test]
    fn display_no_payload() {
        let error = FormatReadError::NoPayload {
            archive: PathBuf::from("bundle.kmz"),
            expected: ".kml".to_string(),
        };

        assert_eq!(
            error.to_string(),
            "Archive bundle.kmz does not contain a readable .kml file"
        );
    }

    #[test]
    fn additional_context_is_appended() {
        let error = FormatReadError::parse("bad ring", "parcels.gml")
            .with_additional_context("feature 4");

        assert!(error.to_string().contains("parcels.gml; feature 4"));
    }
}
