//! Failure taxonomy for a cast run.

use crate::json::DuplicateField;
use crate::source::SourceError;
use thiserror::Error;

/// Why a cast run stopped. Any of these aborts the in-progress root scan;
/// documents stored before the failure are kept.
#[derive(Debug, Error)]
pub enum CastError {
    #[error("column `{column}` has unsupported declared type `{declared}`")]
    UnsupportedColumnType { column: String, declared: String },

    #[error("column `{column}`: {detail}")]
    BadColumnValue { column: String, detail: String },

    #[error("root key column `{0}` is missing or null in a result row")]
    RootKeyMissing(String),

    #[error("key column `{column}` value `{value}` is not an integer key")]
    BadParentKey { column: String, value: String },

    #[error("selector `{label}` is single-valued but its query returned {rows} rows")]
    SingleWithManyRows { label: String, rows: usize },

    #[error("invalid cast plan: {0}")]
    InvalidPlan(String),

    #[error(transparent)]
    Duplicate(#[from] DuplicateField),

    #[error(transparent)]
    Source(#[from] SourceError),
}
