//! # Foundry - Relational to Document Casting
//!
//! A library for casting relational rows into nested JSON documents, one
//! document per root entity, in the layout document stores expect for bulk
//! import (including `ISODate("...")` constructors for temporal columns).
//!
//! ## Modules
//!
//! - **cast**: Plans, the recursive projector, and the document store
//! - **json**: Ordered document assembly and rendering
//! - **source**: Pooled statement execution against the relational source
//!
//! ## Quick Start
//!
//! ```rust
//! use foundry::{cast_documents, CastPlan, SqliteExecutor};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut exec = SqliteExecutor::open_memory()?;
//! exec.connection().execute_batch(
//!     "CREATE TABLE customer (id_customer INTEGER, firstname VARCHAR(32));
//!      INSERT INTO customer VALUES (1, 'Alice');",
//! )?;
//!
//! let plan = CastPlan::from_json(
//!     r#"{
//!         "doc_type": "customers",
//!         "key_column": "id_customer",
//!         "query": "SELECT * FROM customer"
//!     }"#,
//! )?;
//!
//! let outcome = cast_documents(&mut exec, &plan, "Prestashop");
//! assert_eq!(outcome.processed, 1);
//! # Ok(())
//! # }
//! ```

pub mod cast;
pub mod json;
pub mod source;

// Re-export commonly used types for convenience
pub use cast::{
    Cardinality, CastConfig, CastError, CastOutcome, CastPlan, Caster, DocumentStore, Selector,
    SelectorChain, SelectorForest,
};
pub use json::{JsonBuilder, ScalarToken};
pub use source::{QueryExecutor, SqliteExecutor};

/// Main entry point: run one plan with default field names and single-line
/// output.
pub fn cast_documents<E: QueryExecutor>(
    exec: &mut E,
    plan: &CastPlan,
    tenant: &str,
) -> CastOutcome {
    Caster::new(CastConfig::default()).run(exec, plan, tenant, None)
}
