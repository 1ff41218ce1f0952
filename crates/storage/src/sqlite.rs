use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use curator_core::{
    field_value::FieldValue,
    ids::{DependentId, PlanDigest, RecordId},
    records::DependentRecord,
};

use crate::error::StorageError;
use crate::traits::{AuditTrail, MergeLogEntry, MergeOutcome, RecordRow, Storage};

fn to_msgpack<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    rmp_serde::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn from_msgpack<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    rmp_serde::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        debug!(path, "opened sqlite store");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<(), StorageError> {
        self.conn.busy_timeout(timeout)?;
        Ok(())
    }
}

impl Storage for SqliteStorage {
    fn insert_record(
        &mut self,
        kind: &str,
        record_id: RecordId,
        created_at: i64,
        fields: &[(String, FieldValue)],
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO records (record_id, kind, created_at) VALUES (?1, ?2, ?3)",
            params![record_id.as_bytes().as_slice(), kind, created_at],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                StorageError::ConstraintViolation(format!("record {record_id} already exists"))
            } else {
                StorageError::Sqlite(e)
            }
        })?;
        for (key, value) in fields {
            tx.execute(
                "INSERT INTO fields (record_id, field_key, value) VALUES (?1, ?2, ?3)",
                params![record_id.as_bytes().as_slice(), key, value.to_msgpack()?],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn insert_dependent(
        &mut self,
        dependent: &DependentRecord,
        ref_id: RecordId,
    ) -> Result<(), StorageError> {
        self.conn
            .execute(
                "INSERT INTO dependents (dependent_id, owner_table, label, ref_id) VALUES (?1, ?2, ?3, ?4)",
                params![
                    dependent.id.as_bytes().as_slice(),
                    dependent.table,
                    dependent.label,
                    ref_id.as_bytes().as_slice(),
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StorageError::ConstraintViolation(format!(
                        "dependent {} cannot reference {ref_id}",
                        dependent.id
                    ))
                } else {
                    StorageError::Sqlite(e)
                }
            })?;
        Ok(())
    }

    fn add_duplicate_candidate(
        &mut self,
        group_key: &str,
        record_id: RecordId,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO duplicate_candidates (group_key, record_id) VALUES (?1, ?2)",
            params![group_key, record_id.as_bytes().as_slice()],
        )?;
        Ok(())
    }

    fn get_record(&self, record_id: RecordId) -> Result<Option<RecordRow>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT kind, created_at, version FROM records WHERE record_id = ?1",
                params![record_id.as_bytes().as_slice()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(kind, created_at, version)| RecordRow {
            record_id,
            kind,
            created_at,
            version: version as u64,
        }))
    }

    fn get_fields(&self, record_id: RecordId) -> Result<Vec<(String, FieldValue)>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT field_key, value FROM fields WHERE record_id = ?1 ORDER BY field_key",
        )?;
        let rows = stmt.query_map(params![record_id.as_bytes().as_slice()], |row| {
            let key: String = row.get(0)?;
            let val_bytes: Vec<u8> = row.get(1)?;
            Ok((key, val_bytes))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (key, val_bytes) = row?;
            result.push((key, FieldValue::from_msgpack(&val_bytes)?));
        }
        Ok(result)
    }

    fn get_field(
        &self,
        record_id: RecordId,
        field_key: &str,
    ) -> Result<Option<FieldValue>, StorageError> {
        let bytes: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT value FROM fields WHERE record_id = ?1 AND field_key = ?2",
                params![record_id.as_bytes().as_slice(), field_key],
                |row| row.get(0),
            )
            .optional()?;

        match bytes {
            Some(bytes) => Ok(Some(FieldValue::from_msgpack(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_dependents(&self, record_id: RecordId) -> Result<Vec<DependentRecord>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT dependent_id, owner_table, label FROM dependents WHERE ref_id = ?1 ORDER BY dependent_id",
        )?;
        let rows = stmt.query_map(params![record_id.as_bytes().as_slice()], |row| {
            let id_bytes: Vec<u8> = row.get(0)?;
            let table: String = row.get(1)?;
            let label: String = row.get(2)?;
            Ok((id_bytes, table, label))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (id_bytes, table, label) = row?;
            result.push(DependentRecord {
                id: DependentId::from_slice(&id_bytes)?,
                label,
                table,
            });
        }
        Ok(result)
    }

    fn get_dependent_ref(
        &self,
        dependent_id: DependentId,
    ) -> Result<Option<RecordId>, StorageError> {
        let bytes: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT ref_id FROM dependents WHERE dependent_id = ?1",
                params![dependent_id.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?;

        match bytes {
            Some(bytes) => Ok(Some(RecordId::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn duplicate_group_keys(&self, kind: &str) -> Result<Vec<String>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT d.group_key FROM duplicate_candidates d
             JOIN records r ON r.record_id = d.record_id
             WHERE r.kind = ?1
             ORDER BY d.group_key",
        )?;
        let keys = stmt
            .query_map(params![kind], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn duplicate_group_members(&self, group_key: &str) -> Result<Vec<RecordId>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT d.record_id FROM duplicate_candidates d
             JOIN records r ON r.record_id = d.record_id
             WHERE d.group_key = ?1
             ORDER BY r.created_at, d.record_id",
        )?;
        let rows = stmt.query_map(params![group_key], |row| row.get::<_, Vec<u8>>(0))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(RecordId::from_slice(&row?)?);
        }
        Ok(result)
    }

    fn update_fields(
        &mut self,
        record_id: RecordId,
        writes: &[(String, FieldValue)],
        expected_version: Option<u64>,
    ) -> Result<u64, StorageError> {
        let tx = self.conn.transaction()?;

        let current: Option<i64> = tx
            .query_row(
                "SELECT version FROM records WHERE record_id = ?1",
                params![record_id.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?;
        let current = match current {
            Some(v) => v as u64,
            None => return Err(StorageError::NotFound(format!("record {record_id}"))),
        };
        if let Some(expected) = expected_version
            && expected != current
        {
            return Err(StorageError::VersionMismatch {
                record_id: record_id.to_string(),
                expected,
                actual: current,
            });
        }

        for (key, value) in writes {
            tx.execute(
                "INSERT INTO fields (record_id, field_key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(record_id, field_key) DO UPDATE SET value = excluded.value",
                params![record_id.as_bytes().as_slice(), key, value.to_msgpack()?],
            )?;
        }
        tx.execute(
            "UPDATE records SET version = version + 1 WHERE record_id = ?1",
            params![record_id.as_bytes().as_slice()],
        )?;
        tx.commit()?;
        Ok(current + 1)
    }

    fn reassign_dependent(
        &mut self,
        dependent_id: DependentId,
        to: RecordId,
    ) -> Result<bool, StorageError> {
        let changed = self
            .conn
            .execute(
                "UPDATE dependents SET ref_id = ?1 WHERE dependent_id = ?2",
                params![to.as_bytes().as_slice(), dependent_id.as_bytes().as_slice()],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StorageError::ConstraintViolation(format!(
                        "cannot point {dependent_id} at missing record {to}"
                    ))
                } else {
                    StorageError::Sqlite(e)
                }
            })?;
        Ok(changed > 0)
    }

    fn delete_record(&mut self, record_id: RecordId) -> Result<bool, StorageError> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM records WHERE record_id = ?1",
                params![record_id.as_bytes().as_slice()],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StorageError::ConstraintViolation(format!(
                        "record {record_id} is still referenced by dependents"
                    ))
                } else {
                    StorageError::Sqlite(e)
                }
            })?;
        Ok(deleted > 0)
    }
}

impl AuditTrail for SqliteStorage {
    fn append_merge_log(&mut self, entry: &MergeLogEntry) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO merge_log (plan_digest, kind, survivor_id, tombstones, reassigned, fields, outcome, failed_phase)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.plan_digest.as_bytes().as_slice(),
                entry.kind,
                entry.survivor_id.as_bytes().as_slice(),
                to_msgpack(&entry.tombstones)?,
                to_msgpack(&entry.reassigned)?,
                to_msgpack(&entry.fields)?,
                entry.outcome.as_str(),
                entry.failed_phase.as_deref(),
            ],
        )?;
        Ok(())
    }

    fn get_merge_log(&self, survivor_id: RecordId) -> Result<Vec<MergeLogEntry>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT plan_digest, kind, tombstones, reassigned, fields, outcome, failed_phase
             FROM merge_log WHERE survivor_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![survivor_id.as_bytes().as_slice()], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, Vec<u8>>(3)?,
                row.get::<_, Vec<u8>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (digest, kind, tombstones, reassigned, fields, outcome, failed_phase) = row?;
            let digest: [u8; 32] = digest
                .try_into()
                .map_err(|_| StorageError::Serialization("invalid plan_digest length".into()))?;
            result.push(MergeLogEntry {
                plan_digest: PlanDigest::from_bytes(digest),
                kind,
                survivor_id,
                tombstones: from_msgpack(&tombstones)?,
                reassigned: from_msgpack(&reassigned)?,
                fields: from_msgpack(&fields)?,
                outcome: MergeOutcome::parse(&outcome)?,
                failed_phase,
            });
        }
        Ok(result)
    }
}
