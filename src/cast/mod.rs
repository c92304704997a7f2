//! The casting pipeline: plans describing what to project, the conversion
//! of relational values into document scalars, the recursive projector, and
//! the store the finished documents land in.

pub mod caster;
pub mod convert;
pub mod error;
pub mod plan;
pub mod store;
pub mod types;

pub use caster::Caster;
pub use convert::convert;
pub use error::CastError;
pub use plan::{Cardinality, CastPlan, Selector, SelectorChain, SelectorForest};
pub use store::DocumentStore;
pub use types::{CastConfig, CastOutcome};
