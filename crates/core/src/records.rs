use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::field::FieldKey;
use crate::field_value::FieldValue;
use crate::ids::{DependentId, RecordId};

/// A row in another table holding a foreign key to a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentRecord {
    pub id: DependentId,
    pub label: String,
    pub table: String,
}

/// One duplicate instance, as loaded for a merge session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRecord<F: FieldKey> {
    pub id: RecordId,
    pub fields: BTreeMap<F, FieldValue>,
    /// Milliseconds since Unix epoch.
    pub created_at: i64,
    /// Row version at load time; bumped by the store on every field update.
    pub version: u64,
    pub dependents: Vec<DependentRecord>,
}

impl<F: FieldKey> CandidateRecord<F> {
    pub fn new(id: RecordId, created_at: i64) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
            created_at,
            version: 1,
            dependents: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: F, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field, value.into());
        self
    }

    pub fn with_dependent(mut self, dependent: DependentRecord) -> Self {
        self.dependents.push(dependent);
        self
    }

    /// Absent fields read as `Null`.
    pub fn field(&self, field: F) -> &FieldValue {
        self.fields.get(&field).unwrap_or(&FieldValue::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurvivorPolicy {
    /// Earliest `created_at` survives.
    #[default]
    Oldest,
    Newest,
}

/// A survivor plus the duplicates that will be folded into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup<F: FieldKey> {
    survivor: CandidateRecord<F>,
    duplicates: Vec<CandidateRecord<F>>,
}

impl<F: FieldKey> DuplicateGroup<F> {
    pub fn new(
        survivor: CandidateRecord<F>,
        duplicates: Vec<CandidateRecord<F>>,
    ) -> Result<Self, CoreError> {
        if duplicates.is_empty() {
            return Err(CoreError::InvalidGroup(format!(
                "survivor {} has no duplicates",
                survivor.id
            )));
        }
        let mut seen = BTreeSet::new();
        for dup in &duplicates {
            if dup.id == survivor.id {
                return Err(CoreError::InvalidGroup(format!(
                    "survivor {} listed as its own duplicate",
                    survivor.id
                )));
            }
            if !seen.insert(dup.id) {
                return Err(CoreError::InvalidGroup(format!(
                    "duplicate {} listed twice",
                    dup.id
                )));
            }
        }
        Ok(Self {
            survivor,
            duplicates,
        })
    }

    /// Build a group from unordered candidates, choosing the survivor by
    /// `policy`. Ties on `created_at` go to the smaller id. The remaining
    /// candidates keep their relative order.
    pub fn from_candidates(
        mut candidates: Vec<CandidateRecord<F>>,
        policy: SurvivorPolicy,
    ) -> Result<Self, CoreError> {
        let pick = candidates
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                let by_age = match policy {
                    SurvivorPolicy::Oldest => a.created_at.cmp(&b.created_at),
                    SurvivorPolicy::Newest => b.created_at.cmp(&a.created_at),
                };
                by_age.then(a.id.cmp(&b.id))
            })
            .map(|(i, _)| i)
            .ok_or_else(|| CoreError::InvalidGroup("no candidates".into()))?;
        let survivor = candidates.remove(pick);
        Self::new(survivor, candidates)
    }

    pub fn survivor(&self) -> &CandidateRecord<F> {
        &self.survivor
    }

    pub fn duplicates(&self) -> &[CandidateRecord<F>] {
        &self.duplicates
    }

    /// Survivor or duplicate with this id.
    pub fn member(&self, id: RecordId) -> Option<&CandidateRecord<F>> {
        std::iter::once(&self.survivor)
            .chain(self.duplicates.iter())
            .find(|c| c.id == id)
    }

    pub fn members(&self) -> impl Iterator<Item = &CandidateRecord<F>> {
        std::iter::once(&self.survivor).chain(self.duplicates.iter())
    }
}
