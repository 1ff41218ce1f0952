use std::collections::BTreeMap;

use curator_core::{CandidateRecord, DuplicateGroup, FieldKey, RecordId, SurvivorPolicy};
use curator_storage::Storage;
use tracing::{debug, warn};

use crate::error::EngineError;

/// A duplicate group together with the membership key it was loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedGroup<F: FieldKey> {
    pub key: String,
    pub group: DuplicateGroup<F>,
}

/// Builds duplicate groups from the `duplicate_candidates` membership table.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupLoader {
    policy: SurvivorPolicy,
}

impl GroupLoader {
    pub fn new(policy: SurvivorPolicy) -> Self {
        Self { policy }
    }

    /// Every group of kind `F` with at least two live members, in key order.
    pub fn load_groups<F: FieldKey, S: Storage>(
        &self,
        store: &S,
    ) -> Result<Vec<LoadedGroup<F>>, EngineError> {
        let mut groups = Vec::new();
        for key in store.duplicate_group_keys(F::ENTITY)? {
            if let Some(group) = self.load_group(store, &key)? {
                groups.push(group);
            }
        }
        debug!(kind = F::ENTITY, groups = groups.len(), "loaded duplicate groups");
        Ok(groups)
    }

    /// Reload one group. `None` once fewer than two members of kind `F`
    /// remain, e.g. after the group was merged.
    pub fn load_group<F: FieldKey, S: Storage>(
        &self,
        store: &S,
        key: &str,
    ) -> Result<Option<LoadedGroup<F>>, EngineError> {
        let mut candidates = Vec::new();
        for id in store.duplicate_group_members(key)? {
            if let Some(candidate) = load_candidate(store, id)? {
                candidates.push(candidate);
            }
        }
        if candidates.len() < 2 {
            debug!(key, members = candidates.len(), "nothing left to merge in group");
            return Ok(None);
        }
        let group = DuplicateGroup::from_candidates(candidates, self.policy)?;
        Ok(Some(LoadedGroup {
            key: key.to_string(),
            group,
        }))
    }
}

/// Read one record as a candidate of kind `F`. Records of another kind read
/// as absent. A stored field `F` does not declare is an error.
pub fn load_candidate<F: FieldKey, S: Storage>(
    store: &S,
    id: RecordId,
) -> Result<Option<CandidateRecord<F>>, EngineError> {
    let Some(row) = store.get_record(id)? else {
        return Ok(None);
    };
    if row.kind != F::ENTITY {
        warn!(record = %id, kind = %row.kind, expected = F::ENTITY, "group member has the wrong kind");
        return Ok(None);
    }

    let mut fields = BTreeMap::new();
    for (name, value) in store.get_fields(id)? {
        fields.insert(F::parse(&name)?, value);
    }

    Ok(Some(CandidateRecord {
        id,
        fields,
        created_at: row.created_at,
        version: row.version,
        dependents: store.get_dependents(id)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use curator_core::{AuthorField, CoreError, DependentId, DependentRecord, FieldValue};
    use curator_storage::SqliteStorage;

    fn author(store: &mut SqliteStorage, created_at: i64, name: &str) -> RecordId {
        let id = RecordId::new();
        store
            .insert_record("author", id, created_at, &[("name".into(), FieldValue::from(name))])
            .unwrap();
        id
    }

    #[test]
    fn builds_groups_with_oldest_survivor() {
        let mut store = SqliteStorage::open_in_memory().unwrap();
        let young = author(&mut store, 300, "Jane D.");
        let old = author(&mut store, 100, "Jane Doe");
        let asset = DependentRecord {
            id: DependentId::new(),
            label: "Stone Texture Pack".into(),
            table: "assets".into(),
        };
        store.insert_dependent(&asset, young).unwrap();
        store.add_duplicate_candidate("jane", young).unwrap();
        store.add_duplicate_candidate("jane", old).unwrap();

        let groups = GroupLoader::default()
            .load_groups::<AuthorField, _>(&store)
            .unwrap();
        assert_eq!(groups.len(), 1);
        let group = &groups[0].group;
        assert_eq!(groups[0].key, "jane");
        assert_eq!(group.survivor().id, old);
        assert_eq!(group.duplicates()[0].id, young);
        assert_eq!(group.duplicates()[0].dependents, vec![asset]);
        assert_eq!(
            group.survivor().field(AuthorField::Name),
            &FieldValue::from("Jane Doe")
        );
        assert_eq!(group.survivor().version, 1);
    }

    #[test]
    fn newest_policy_picks_latest() {
        let mut store = SqliteStorage::open_in_memory().unwrap();
        let old = author(&mut store, 100, "a");
        let young = author(&mut store, 300, "b");
        store.add_duplicate_candidate("g", old).unwrap();
        store.add_duplicate_candidate("g", young).unwrap();

        let loaded = GroupLoader::new(SurvivorPolicy::Newest)
            .load_group::<AuthorField, _>(&store, "g")
            .unwrap()
            .unwrap();
        assert_eq!(loaded.group.survivor().id, young);
    }

    #[test]
    fn single_member_group_is_skipped() {
        let mut store = SqliteStorage::open_in_memory().unwrap();
        let a = author(&mut store, 1, "a");
        let b = author(&mut store, 2, "b");
        store.add_duplicate_candidate("g", a).unwrap();
        store.add_duplicate_candidate("g", b).unwrap();
        store.delete_record(b).unwrap();

        assert!(
            GroupLoader::default()
                .load_groups::<AuthorField, _>(&store)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn other_kinds_are_ignored() {
        let mut store = SqliteStorage::open_in_memory().unwrap();
        let a = author(&mut store, 1, "a");
        let publisher = RecordId::new();
        store.insert_record("publisher", publisher, 2, &[]).unwrap();
        store.add_duplicate_candidate("g", a).unwrap();
        store.add_duplicate_candidate("g", publisher).unwrap();

        let loaded = GroupLoader::default()
            .load_group::<AuthorField, _>(&store, "g")
            .unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn unknown_stored_field_is_rejected() {
        let mut store = SqliteStorage::open_in_memory().unwrap();
        let id = RecordId::new();
        store
            .insert_record("author", id, 1, &[("shoe_size".into(), FieldValue::from(44i64))])
            .unwrap();

        match load_candidate::<AuthorField, _>(&store, id) {
            Err(EngineError::Core(CoreError::UnknownField { entity, field })) => {
                assert_eq!(entity, "author");
                assert_eq!(field, "shoe_size");
            }
            other => panic!("expected UnknownField, got {other:?}"),
        }
    }
}
