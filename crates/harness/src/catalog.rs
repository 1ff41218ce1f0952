use curator_core::{
    AuthorField, DependentId, DependentRecord, FieldKey, FieldValue, RecordId,
};
use curator_engine::{Engine, EngineError, LoadedGroup, MergeConfig, MergeSession};
use curator_storage::{AuditTrail, SqliteStorage, Storage};

use crate::faulty::FaultyStore;

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

/// An engine over a throwaway store, with helpers to seed authors, the assets
/// that reference them, and duplicate groups.
pub struct TestCatalog<S = SqliteStorage> {
    pub engine: Engine<S>,
    clock: i64,
}

impl TestCatalog<SqliteStorage> {
    pub fn new() -> TestResult<Self> {
        Self::with_config(MergeConfig::default())
    }

    pub fn with_config(config: MergeConfig) -> TestResult<Self> {
        Ok(Self::from_store(SqliteStorage::open_in_memory()?, config))
    }
}

impl TestCatalog<FaultyStore> {
    /// Catalog whose store can be told to fail specific calls.
    pub fn faulty() -> TestResult<Self> {
        Ok(Self::from_store(
            FaultyStore::new(SqliteStorage::open_in_memory()?),
            MergeConfig::default(),
        ))
    }

    pub fn faults(&mut self) -> &mut FaultyStore {
        self.engine.storage_mut()
    }
}

impl<S: Storage + AuditTrail> TestCatalog<S> {
    pub fn from_store(store: S, config: MergeConfig) -> Self {
        Self {
            engine: Engine::new(store, config),
            clock: 0,
        }
    }

    pub fn store(&self) -> &S {
        self.engine.storage()
    }

    /// Insert an author. Each call is one second younger than the last, so
    /// insertion order is age order.
    pub fn add_author(&mut self, fields: &[(AuthorField, FieldValue)]) -> TestResult<RecordId> {
        self.clock += 1000;
        let id = RecordId::new();
        let fields: Vec<_> = fields
            .iter()
            .map(|(f, v)| (f.as_str().to_string(), v.clone()))
            .collect();
        self.engine
            .storage_mut()
            .insert_record(AuthorField::ENTITY, id, self.clock, &fields)?;
        Ok(id)
    }

    /// Insert an asset owned by `author`.
    pub fn add_asset(&mut self, label: &str, author: RecordId) -> TestResult<DependentId> {
        let asset = DependentRecord {
            id: DependentId::new(),
            label: label.to_string(),
            table: "assets".to_string(),
        };
        self.engine.storage_mut().insert_dependent(&asset, author)?;
        Ok(asset.id)
    }

    pub fn mark_duplicates(&mut self, key: &str, members: &[RecordId]) -> TestResult<()> {
        for id in members {
            self.engine.storage_mut().add_duplicate_candidate(key, *id)?;
        }
        Ok(())
    }

    pub fn load(&self, key: &str) -> TestResult<LoadedGroup<AuthorField>> {
        self.engine
            .load_group::<AuthorField>(key)?
            .ok_or_else(|| format!("group {key} has nothing to merge").into())
    }

    pub fn session(&self, key: &str) -> TestResult<MergeSession<AuthorField>> {
        Ok(MergeSession::new(self.load(key)?.group))
    }

    pub fn field(&self, id: RecordId, field: AuthorField) -> Result<Option<FieldValue>, EngineError> {
        Ok(self.engine.storage().get_field(id, field.as_str())?)
    }

    pub fn owner_of(&self, asset: DependentId) -> Result<Option<RecordId>, EngineError> {
        Ok(self.engine.storage().get_dependent_ref(asset)?)
    }

    pub fn exists(&self, id: RecordId) -> Result<bool, EngineError> {
        Ok(self.engine.storage().get_record(id)?.is_some())
    }
}
