pub mod error;
pub mod field;
pub mod field_value;
pub mod ids;
pub mod plan;
pub mod records;
pub mod selection;

pub use error::CoreError;
pub use field::{AuthorField, FieldKey};
pub use field_value::FieldValue;
pub use ids::*;
pub use plan::{FieldWrite, MergePlan, Reassignment};
pub use records::{CandidateRecord, DependentRecord, DuplicateGroup, SurvivorPolicy};
pub use selection::FieldSelection;

#[doc(hidden)]
pub use serde as __serde;
