use std::fmt;

use crate::model::TableKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (bad bound, empty keyword list, etc.).
    ConfigValidation(String),
    /// A column a pass depends on is absent from an input table.
    MissingColumn { table: TableKind, column: String },
    /// Date parse error on a single row.
    DateParse { table: TableKind, row: String, value: String },
    /// Amount parse error on a single row.
    AmountParse { table: TableKind, row: String, value: String },
    /// IO error (file read, malformed CSV, etc.).
    Io(String),
}

impl fmt::Display for ReconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::MissingColumn { table, column } => {
                write!(f, "table '{table}': missing column '{column}'")
            }
            Self::DateParse { table, row, value } => {
                write!(f, "table '{table}', row '{row}': cannot parse date '{value}'")
            }
            Self::AmountParse { table, row, value } => {
                write!(f, "table '{table}', row '{row}': cannot parse amount '{value}'")
            }
            Self::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for ReconError {}
