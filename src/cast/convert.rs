//! Scalar conversion: one column value to one document token.
//!
//! The mapping is total over the supported type classes and fatal outside
//! them. The class check runs before the NULL check, so even a NULL in a
//! column of unsupported declared type stops the run.

use crate::cast::error::CastError;
use crate::json::ScalarToken;
use crate::source::{ColumnMeta, ColumnType, SqlValue};
use once_cell::sync::Lazy;
use regex::Regex;

static DECIMAL_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?\d+(\.\d+)?([eE][+-]?\d+)?$").unwrap());

static TIMESTAMP_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4}-\d{2}-\d{2})[ T](\d{2}:\d{2}:\d{2}(?:\.\d+)?)Z?$").unwrap());

static DATE_TEXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

/// Convert one column value. `Ok(None)` means the value was NULL and the
/// field must be omitted; it must never surface as a JSON `null`.
pub fn convert(meta: &ColumnMeta, value: Option<&SqlValue>) -> Result<Option<ScalarToken>, CastError> {
    if let ColumnType::Other(declared) = &meta.ty {
        return Err(CastError::UnsupportedColumnType {
            column: meta.name.clone(),
            declared: declared.clone(),
        });
    }
    let Some(value) = value else {
        return Ok(None);
    };

    let token = match &meta.ty {
        ColumnType::Integer => match value {
            SqlValue::Integer(v) => ScalarToken::Int(*v),
            other => return Err(bad(meta, format!("expected integer storage, found {}", other.kind()))),
        },
        ColumnType::Decimal => match value {
            SqlValue::Integer(v) => ScalarToken::Decimal(v.to_string()),
            SqlValue::Real(v) => {
                if !v.is_finite() {
                    return Err(bad(meta, format!("non-finite numeric value {}", v)));
                }
                ScalarToken::Decimal(v.to_string())
            }
            // SQLite keeps text that would not convert losslessly; pass it
            // through unchanged rather than rounding it through a float.
            SqlValue::Text(v) if DECIMAL_TEXT.is_match(v) => ScalarToken::Decimal(v.clone()),
            SqlValue::Text(v) => {
                return Err(bad(meta, format!("`{}` is not a numeric literal", v)))
            }
            SqlValue::Blob(_) => return Err(bad(meta, "binary value in numeric column".into())),
        },
        ColumnType::Text => match value {
            SqlValue::Text(v) => ScalarToken::Text(v.clone()),
            SqlValue::Integer(v) => ScalarToken::Text(v.to_string()),
            SqlValue::Real(v) => ScalarToken::Text(v.to_string()),
            SqlValue::Blob(_) => return Err(bad(meta, "binary value in text column".into())),
        },
        ColumnType::Timestamp => match value {
            SqlValue::Text(v) => match TIMESTAMP_TEXT.captures(v) {
                Some(parts) => ScalarToken::Date(format!("{}T{}Z", &parts[1], &parts[2])),
                None => {
                    return Err(bad(meta, format!("`{}` is not a local date-time", v)))
                }
            },
            other => {
                return Err(bad(meta, format!("expected date-time text, found {}", other.kind())))
            }
        },
        ColumnType::Date => match value {
            SqlValue::Text(v) if DATE_TEXT.is_match(v) => {
                ScalarToken::Date(format!("{}T00:00:00Z", v))
            }
            SqlValue::Text(v) => return Err(bad(meta, format!("`{}` is not a date", v))),
            other => {
                return Err(bad(meta, format!("expected date text, found {}", other.kind())))
            }
        },
        // Handled above
        ColumnType::Other(_) => unreachable!(),
    };
    Ok(Some(token))
}

fn bad(meta: &ColumnMeta, detail: String) -> CastError {
    CastError::BadColumnValue {
        column: meta.name.clone(),
        detail,
    }
}
