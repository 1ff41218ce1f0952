use std::collections::BTreeSet;

use curator_core::{DependentId, DependentRecord, FieldValue, RecordId};
use curator_storage::{
    AuditTrail, MergeLogEntry, RecordRow, SqliteStorage, Storage, StorageError,
};
use rusqlite::ffi;

/// What a real store says when another writer holds the lock past the busy
/// timeout.
fn busy(what: String) -> StorageError {
    StorageError::Sqlite(rusqlite::Error::SqliteFailure(
        ffi::Error::new(ffi::SQLITE_BUSY),
        Some(format!("injected fault: {what}")),
    ))
}

/// Wraps a store and fails chosen mutations. Reads always pass through.
pub struct FaultyStore<S = SqliteStorage> {
    inner: S,
    fail_reassign: BTreeSet<DependentId>,
    fail_delete: BTreeSet<RecordId>,
    fail_update: bool,
    fail_audit: bool,
}

impl<S> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_reassign: BTreeSet::new(),
            fail_delete: BTreeSet::new(),
            fail_update: false,
            fail_audit: false,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn fail_reassignment_of(&mut self, dependent: DependentId) {
        self.fail_reassign.insert(dependent);
    }

    pub fn fail_delete_of(&mut self, record: RecordId) {
        self.fail_delete.insert(record);
    }

    pub fn fail_updates(&mut self, on: bool) {
        self.fail_update = on;
    }

    pub fn fail_audit(&mut self, on: bool) {
        self.fail_audit = on;
    }

    pub fn clear_faults(&mut self) {
        self.fail_reassign.clear();
        self.fail_delete.clear();
        self.fail_update = false;
        self.fail_audit = false;
    }
}

impl<S: Storage> Storage for FaultyStore<S> {
    fn insert_record(
        &mut self,
        kind: &str,
        record_id: RecordId,
        created_at: i64,
        fields: &[(String, FieldValue)],
    ) -> Result<(), StorageError> {
        self.inner.insert_record(kind, record_id, created_at, fields)
    }

    fn insert_dependent(
        &mut self,
        dependent: &DependentRecord,
        ref_id: RecordId,
    ) -> Result<(), StorageError> {
        self.inner.insert_dependent(dependent, ref_id)
    }

    fn add_duplicate_candidate(
        &mut self,
        group_key: &str,
        record_id: RecordId,
    ) -> Result<(), StorageError> {
        self.inner.add_duplicate_candidate(group_key, record_id)
    }

    fn get_record(&self, record_id: RecordId) -> Result<Option<RecordRow>, StorageError> {
        self.inner.get_record(record_id)
    }

    fn get_fields(&self, record_id: RecordId) -> Result<Vec<(String, FieldValue)>, StorageError> {
        self.inner.get_fields(record_id)
    }

    fn get_field(
        &self,
        record_id: RecordId,
        field_key: &str,
    ) -> Result<Option<FieldValue>, StorageError> {
        self.inner.get_field(record_id, field_key)
    }

    fn get_dependents(&self, record_id: RecordId) -> Result<Vec<DependentRecord>, StorageError> {
        self.inner.get_dependents(record_id)
    }

    fn get_dependent_ref(
        &self,
        dependent_id: DependentId,
    ) -> Result<Option<RecordId>, StorageError> {
        self.inner.get_dependent_ref(dependent_id)
    }

    fn duplicate_group_keys(&self, kind: &str) -> Result<Vec<String>, StorageError> {
        self.inner.duplicate_group_keys(kind)
    }

    fn duplicate_group_members(&self, group_key: &str) -> Result<Vec<RecordId>, StorageError> {
        self.inner.duplicate_group_members(group_key)
    }

    fn update_fields(
        &mut self,
        record_id: RecordId,
        writes: &[(String, FieldValue)],
        expected_version: Option<u64>,
    ) -> Result<u64, StorageError> {
        if self.fail_update {
            return Err(busy(format!("update {record_id}")));
        }
        self.inner.update_fields(record_id, writes, expected_version)
    }

    fn reassign_dependent(
        &mut self,
        dependent_id: DependentId,
        to: RecordId,
    ) -> Result<bool, StorageError> {
        if self.fail_reassign.contains(&dependent_id) {
            return Err(busy(format!("reassign {dependent_id}")));
        }
        self.inner.reassign_dependent(dependent_id, to)
    }

    fn delete_record(&mut self, record_id: RecordId) -> Result<bool, StorageError> {
        if self.fail_delete.contains(&record_id) {
            return Err(busy(format!("delete {record_id}")));
        }
        self.inner.delete_record(record_id)
    }
}

impl<S: AuditTrail> AuditTrail for FaultyStore<S> {
    fn append_merge_log(&mut self, entry: &MergeLogEntry) -> Result<(), StorageError> {
        if self.fail_audit {
            return Err(busy(format!("audit {}", entry.plan_digest)));
        }
        self.inner.append_merge_log(entry)
    }

    fn get_merge_log(&self, survivor_id: RecordId) -> Result<Vec<MergeLogEntry>, StorageError> {
        self.inner.get_merge_log(survivor_id)
    }
}
