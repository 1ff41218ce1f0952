use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::field::FieldKey;
use crate::field_value::FieldValue;
use crate::ids::{DependentId, PlanDigest, RecordId};

/// One value to write onto the survivor, with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct FieldWrite<F: FieldKey> {
    pub field: F,
    pub value: FieldValue,
    pub source: RecordId,
}

/// A dependent row to repoint from a duplicate to the survivor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reassignment {
    pub dependent_id: DependentId,
    pub label: String,
    pub table: String,
    pub from: RecordId,
}

/// The compiled, reviewable description of a merge. Immutable once built;
/// a retry re-executes the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct MergePlan<F: FieldKey> {
    survivor_id: RecordId,
    expected_version: u64,
    field_writes: Vec<FieldWrite<F>>,
    dependent_reassignments: Vec<Reassignment>,
    tombstone_ids: Vec<RecordId>,
}

impl<F: FieldKey> MergePlan<F> {
    pub fn new(
        survivor_id: RecordId,
        expected_version: u64,
        field_writes: Vec<FieldWrite<F>>,
        dependent_reassignments: Vec<Reassignment>,
        tombstone_ids: Vec<RecordId>,
    ) -> Self {
        Self {
            survivor_id,
            expected_version,
            field_writes,
            dependent_reassignments,
            tombstone_ids,
        }
    }

    pub fn survivor_id(&self) -> RecordId {
        self.survivor_id
    }

    /// Survivor row version observed when the group was loaded.
    pub fn expected_version(&self) -> u64 {
        self.expected_version
    }

    pub fn field_writes(&self) -> &[FieldWrite<F>] {
        &self.field_writes
    }

    pub fn dependent_reassignments(&self) -> &[Reassignment] {
        &self.dependent_reassignments
    }

    pub fn tombstone_ids(&self) -> &[RecordId] {
        &self.tombstone_ids
    }

    /// BLAKE3 over the MessagePack encoding of the whole plan.
    pub fn digest(&self) -> Result<PlanDigest, CoreError> {
        let bytes = rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))?;
        Ok(PlanDigest::from_bytes(*blake3::hash(&bytes).as_bytes()))
    }
}

impl<F: FieldKey> fmt::Display for MergePlan<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "merge into {} {} (version {})",
            F::ENTITY,
            self.survivor_id,
            self.expected_version
        )?;

        if self.field_writes.is_empty() {
            writeln!(f, "  no field changes")?;
        } else {
            writeln!(f, "  write {} field(s):", self.field_writes.len())?;
            for write in &self.field_writes {
                writeln!(f, "    {} = {}  (from {})", write.field, write.value, write.source)?;
            }
        }

        writeln!(
            f,
            "  reassign {} dependent(s):",
            self.dependent_reassignments.len()
        )?;
        for r in &self.dependent_reassignments {
            writeln!(f, "    {}.{} {:?}  (from {})", r.table, r.dependent_id, r.label, r.from)?;
        }

        write!(f, "  delete {} record(s):", self.tombstone_ids.len())?;
        for id in &self.tombstone_ids {
            write!(f, "\n    {id}")?;
        }
        Ok(())
    }
}
