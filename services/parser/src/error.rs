//! Error types for report parsing.

use thiserror::Error;

/// Result type for parsing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while turning report bytes into canonical records.
#[derive(Debug, Error)]
pub enum Error {
    /// A row failed mandatory-field parsing. Fatal for the whole file.
    #[error("malformed row at line {line}: {reason}")]
    MalformedRow {
        line: usize,
        reason: String,
        raw: Vec<String>,
    },

    /// A raw interconnector label has no entry in the static table.
    #[error("no interconnector mapping for label {0:?}")]
    MissingInterconnectorMapping(String),

    /// Sub-interval readings cannot be grouped into the expected blocks.
    #[error("upstream data integrity: {0}")]
    UpstreamDataIntegrity(String),

    /// No row contains the layout's header token.
    #[error("header row containing {0:?} not found")]
    HeaderNotFound(String),

    /// A configured column label is missing from the header row.
    #[error("column for {field} not found, expected one of {labels:?}")]
    MissingColumn {
        field: &'static str,
        labels: &'static [&'static str],
    },

    /// A static layout violates its own invariants.
    #[error("invalid layout: {0}")]
    InvalidLayout(String),

    /// Operator id not recognised.
    #[error("unknown operator {0:?}")]
    UnknownOperator(String),

    /// ZIP archive does not hold exactly one CSV.
    #[error("archive holds {0} csv entries, expected exactly one")]
    ArchiveContents(usize),

    /// A stored kWh decimal could not be read back as a number.
    #[error("field {field} holds non-numeric value {value:?}")]
    InvalidDecimal { field: &'static str, value: String },

    /// Emission-factor or fuel-mix tables are unusable.
    #[error("invalid carbon tables: {0}")]
    InvalidCarbonTables(String),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a [`Error::MalformedRow`] from a grid row.
    pub fn malformed(line: usize, reason: impl Into<String>, raw: &[String]) -> Self {
        Error::MalformedRow {
            line,
            reason: reason.into(),
            raw: raw.to_vec(),
        }
    }
}
