//! Materialized result sets: column metadata plus nullable values.

/// Declared type class of a result column, derived from the column's type
/// declaration. `Other` carries the raw declaration for anything outside the
/// supported set; the converter turns it into a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Decimal,
    Text,
    Timestamp,
    Date,
    Other(String),
}

impl ColumnType {
    /// Classify a declaration string as reported by the driver. `None` means
    /// the column has no declaration (a computed expression) and stays
    /// unsupported.
    pub fn from_decl(decl: Option<&str>) -> Self {
        let Some(decl) = decl else {
            return ColumnType::Other(String::from("undeclared"));
        };
        let base = decl.split('(').next().unwrap_or(decl).trim().to_ascii_uppercase();
        match base.as_str() {
            "BOOLEAN" | "BOOL" | "BIT" | "TINYINT" | "INT" | "INTEGER" => ColumnType::Integer,
            "DECIMAL" | "NUMERIC" | "REAL" | "FLOAT" | "DOUBLE" | "DOUBLE PRECISION" => {
                ColumnType::Decimal
            }
            "CHAR" | "VARCHAR" | "NCHAR" | "NVARCHAR" | "TEXT" | "CLOB" => ColumnType::Text,
            "DATETIME" | "TIMESTAMP" => ColumnType::Timestamp,
            "DATE" => ColumnType::Date,
            _ => ColumnType::Other(decl.to_string()),
        }
    }
}

/// Name and declared type of one result column.
#[derive(Debug, Clone)]
pub struct ColumnMeta {
    pub name: String,
    pub ty: ColumnType,
}

/// One non-NULL stored value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Storage class name, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            SqlValue::Integer(_) => "integer",
            SqlValue::Real(_) => "real",
            SqlValue::Text(_) => "text",
            SqlValue::Blob(_) => "blob",
        }
    }
}

/// One result row; `None` marks a NULL.
#[derive(Debug, Clone)]
pub struct Row {
    pub values: Vec<Option<SqlValue>>,
}

impl Row {
    /// Value at `index`, with NULL and out-of-range both reading as absent.
    pub fn value(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index).and_then(Option::as_ref)
    }
}

/// A fully materialized query result.
#[derive(Debug, Clone)]
pub struct RowSet {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Row>,
}
