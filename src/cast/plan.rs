//! Cast plans: declarative selector trees describing one document type.
//!
//! A plan is data, not behavior. It names the root query and its key
//! column, and carries a forest of descendant chains. Each chain level says
//! which query to run for a parent row, what label to attach the results
//! under, whether they form an array or a single nested object, and which
//! parent-row column carries the key fed into its query.
//!
//! Plans are typically loaded from JSON files:
//!
//! ```json
//! {
//!     "doc_type": "customers",
//!     "key_column": "id_customer",
//!     "query": "SELECT * FROM customer",
//!     "chains": [
//!         [
//!             {
//!                 "key_column": "id_customer",
//!                 "label": "addresses",
//!                 "query": "SELECT * FROM address WHERE id_customer = ?",
//!                 "cardinality": "many"
//!             }
//!         ]
//!     ]
//! }
//! ```

use crate::cast::error::CastError;
use serde::{Deserialize, Serialize};

/// Whether a chain level yields zero-to-many rows (an array) or at most one
/// (a nested object).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    Single,
    Many,
}

/// One level of one descendant chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selector {
    /// Join column carrying this level's key. The caster scans the rows one
    /// level up for a column of this name and feeds its value to `query`;
    /// the first level of a chain receives the root natural key directly.
    pub key_column: String,

    /// Field name the results attach under.
    pub label: String,

    /// Query with exactly one `?` placeholder for the parent key.
    pub query: String,

    pub cardinality: Cardinality,
}

/// An ordered line of descent, outermost level first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectorChain(pub Vec<Selector>);

/// Sibling chains attached to the root, processed in declaration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectorForest(pub Vec<SelectorChain>);

/// Everything needed to cast one document type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastPlan {
    /// Document-type label stamped into every produced document.
    pub doc_type: String,

    /// Root result column holding the natural key.
    pub key_column: String,

    /// Root query; takes no parameter.
    pub query: String,

    #[serde(default)]
    pub chains: SelectorForest,
}

impl CastPlan {
    /// Parse a plan from JSON text and validate its structure.
    pub fn from_json(text: &str) -> Result<Self, CastError> {
        let plan: CastPlan =
            serde_json::from_str(text).map_err(|err| CastError::InvalidPlan(err.to_string()))?;
        plan.validate()?;
        Ok(plan)
    }

    /// Check structural invariants: non-empty names and queries, no
    /// placeholder in the root query, exactly one per descendant query.
    pub fn validate(&self) -> Result<(), CastError> {
        if self.doc_type.is_empty() {
            return Err(CastError::InvalidPlan("doc_type is empty".into()));
        }
        if self.key_column.is_empty() {
            return Err(CastError::InvalidPlan("key_column is empty".into()));
        }
        if self.query.is_empty() {
            return Err(CastError::InvalidPlan("root query is empty".into()));
        }
        if placeholder_count(&self.query) != 0 {
            return Err(CastError::InvalidPlan(
                "root query must not take a parameter".into(),
            ));
        }
        for (chain_index, chain) in self.chains.0.iter().enumerate() {
            if chain.0.is_empty() {
                return Err(CastError::InvalidPlan(format!(
                    "chain {} is empty",
                    chain_index
                )));
            }
            for selector in &chain.0 {
                if selector.key_column.is_empty() || selector.label.is_empty() {
                    return Err(CastError::InvalidPlan(format!(
                        "chain {} has a selector with an empty key_column or label",
                        chain_index
                    )));
                }
                if placeholder_count(&selector.query) != 1 {
                    return Err(CastError::InvalidPlan(format!(
                        "selector `{}` needs exactly one `?` placeholder",
                        selector.label
                    )));
                }
            }
        }
        Ok(())
    }
}

fn placeholder_count(query: &str) -> usize {
    query.matches('?').count()
}
