use curator_core::{
    field_value::FieldValue,
    ids::{DependentId, PlanDigest, RecordId},
    records::DependentRecord,
};

use crate::error::StorageError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRow {
    pub record_id: RecordId,
    pub kind: String,
    pub created_at: i64,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Completed,
    Failed,
}

impl MergeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StorageError> {
        match s {
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(StorageError::Serialization(format!("unknown merge outcome: {s}"))),
        }
    }
}

/// One execution attempt of a merge plan, as kept by the audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeLogEntry {
    pub plan_digest: PlanDigest,
    pub kind: String,
    pub survivor_id: RecordId,
    pub tombstones: Vec<RecordId>,
    pub reassigned: Vec<DependentId>,
    pub fields: Vec<String>,
    pub outcome: MergeOutcome,
    pub failed_phase: Option<String>,
}

/// The backing store the merge reads from and writes to.
pub trait Storage {
    fn insert_record(
        &mut self,
        kind: &str,
        record_id: RecordId,
        created_at: i64,
        fields: &[(String, FieldValue)],
    ) -> Result<(), StorageError>;

    fn insert_dependent(
        &mut self,
        dependent: &DependentRecord,
        ref_id: RecordId,
    ) -> Result<(), StorageError>;

    fn add_duplicate_candidate(
        &mut self,
        group_key: &str,
        record_id: RecordId,
    ) -> Result<(), StorageError>;

    fn get_record(&self, record_id: RecordId) -> Result<Option<RecordRow>, StorageError>;

    fn get_fields(&self, record_id: RecordId) -> Result<Vec<(String, FieldValue)>, StorageError>;

    fn get_field(
        &self,
        record_id: RecordId,
        field_key: &str,
    ) -> Result<Option<FieldValue>, StorageError>;

    fn get_dependents(&self, record_id: RecordId) -> Result<Vec<DependentRecord>, StorageError>;

    /// The record a dependent currently points at, or `None` if the
    /// dependent does not exist.
    fn get_dependent_ref(&self, dependent_id: DependentId)
    -> Result<Option<RecordId>, StorageError>;

    /// Group keys with at least one live member of `kind`.
    fn duplicate_group_keys(&self, kind: &str) -> Result<Vec<String>, StorageError>;

    fn duplicate_group_members(&self, group_key: &str) -> Result<Vec<RecordId>, StorageError>;

    /// Upsert `writes` in one transaction and bump the row version. With
    /// `expected_version`, fails with `VersionMismatch` instead of writing if
    /// the row moved on. Returns the new version.
    fn update_fields(
        &mut self,
        record_id: RecordId,
        writes: &[(String, FieldValue)],
        expected_version: Option<u64>,
    ) -> Result<u64, StorageError>;

    /// Point a dependent at `to`. Returns `false` if the dependent is gone.
    fn reassign_dependent(
        &mut self,
        dependent_id: DependentId,
        to: RecordId,
    ) -> Result<bool, StorageError>;

    /// Hard delete. Returns `false` if the record was already absent.
    fn delete_record(&mut self, record_id: RecordId) -> Result<bool, StorageError>;
}

/// Receives a record of every merge attempt.
pub trait AuditTrail {
    fn append_merge_log(&mut self, entry: &MergeLogEntry) -> Result<(), StorageError>;

    fn get_merge_log(&self, survivor_id: RecordId) -> Result<Vec<MergeLogEntry>, StorageError>;
}
