pub mod compiler;
pub mod config;
pub mod error;
pub mod executor;
pub mod loader;
pub mod session;

pub use compiler::compile;
pub use config::{CuratorConfig, MergeConfig, StorageConfig};
pub use error::EngineError;
pub use executor::{
    CompletedStep, ExecutionResult, MergeExecutor, Phase, Step, StepFailure, StepOutcome,
};
pub use loader::{GroupLoader, LoadedGroup, load_candidate};
pub use session::{MergeSession, Stage};

use curator_core::{DuplicateGroup, FieldKey, FieldSelection, MergePlan};
use curator_storage::{AuditTrail, SqliteStorage, Storage};
use tracing::info;

/// Owns the store and the merge settings. Entry point for loading groups,
/// compiling plans and running them.
pub struct Engine<S = SqliteStorage> {
    storage: S,
    config: MergeConfig,
}

impl Engine<SqliteStorage> {
    /// Open the SQLite store named by `config.storage`.
    pub fn open(config: &CuratorConfig) -> Result<Self, EngineError> {
        let storage = if config.storage.is_in_memory() {
            SqliteStorage::open_in_memory()?
        } else {
            SqliteStorage::open(&config.storage.path)?
        };
        storage.set_busy_timeout(config.storage.busy_timeout())?;
        info!(path = %config.storage.path, "curator engine ready");
        Ok(Self::new(storage, config.merge.clone()))
    }
}

impl<S: Storage + AuditTrail> Engine<S> {
    pub fn new(storage: S, config: MergeConfig) -> Self {
        Self { storage, config }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    fn loader(&self) -> GroupLoader {
        GroupLoader::new(self.config.survivor_policy)
    }

    pub fn load_groups<F: FieldKey>(&self) -> Result<Vec<LoadedGroup<F>>, EngineError> {
        self.loader().load_groups(&self.storage)
    }

    pub fn load_group<F: FieldKey>(&self, key: &str) -> Result<Option<LoadedGroup<F>>, EngineError> {
        self.loader().load_group(&self.storage, key)
    }

    pub fn compile<F: FieldKey>(
        &self,
        group: &DuplicateGroup<F>,
        selection: &FieldSelection<F>,
    ) -> Result<MergePlan<F>, EngineError> {
        compile(group, selection)
    }

    pub fn execute<F: FieldKey>(&mut self, plan: &MergePlan<F>) -> Result<ExecutionResult, EngineError> {
        MergeExecutor::new(&self.config).execute(&mut self.storage, plan)
    }
}
