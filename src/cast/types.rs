use crate::cast::error::CastError;
use crate::cast::store::DocumentStore;

/// Configuration for a cast run.
#[derive(Debug, Clone)]
pub struct CastConfig {
    /// Field carrying the composed document identity.
    pub id_field: String,

    /// Field carrying the document-type label.
    pub type_field: String,

    /// Field carrying the tenant name.
    pub tenant_field: String,

    /// Pretty-print documents with tab indentation instead of rendering
    /// each document on a single line.
    pub pretty: bool,
}

impl Default for CastConfig {
    fn default() -> Self {
        CastConfig {
            id_field: String::from("_id"),
            type_field: String::from("document_type"),
            tenant_field: String::from("shop_name"),
            pretty: false,
        }
    }
}

/// What a cast run produced.
///
/// `error` is `None` for a complete run. On failure the store still holds
/// every document finished before the abort, and `processed` counts those
/// documents, not the rows the root query returned.
#[derive(Debug)]
pub struct CastOutcome {
    pub store: DocumentStore,
    pub processed: usize,
    pub error: Option<CastError>,
}

impl CastOutcome {
    /// True if the scan ran to completion.
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}
