use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::field::FieldKey;
use crate::ids::RecordId;

/// Which candidate supplies which field of the survivor.
///
/// Owned by the merge session and passed by reference into the compiler.
/// [`toggle`](Self::toggle) keeps every field on at most one candidate. A
/// selection rebuilt with [`from_raw`](Self::from_raw) (for instance from a
/// submitted form) is taken as-is and may violate that; the compiler rejects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct FieldSelection<F: FieldKey> {
    by_candidate: BTreeMap<RecordId, BTreeSet<F>>,
}

impl<F: FieldKey> Default for FieldSelection<F> {
    fn default() -> Self {
        Self {
            by_candidate: BTreeMap::new(),
        }
    }
}

impl<F: FieldKey> FieldSelection<F> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_raw(by_candidate: BTreeMap<RecordId, BTreeSet<F>>) -> Self {
        let mut selection = Self { by_candidate };
        selection.by_candidate.retain(|_, fields| !fields.is_empty());
        selection
    }

    /// Flip `field` for `candidate`. Selecting it clears the same field on
    /// every other candidate. Returns whether the field is now selected.
    pub fn toggle(&mut self, candidate: RecordId, field: F) -> bool {
        if self.is_selected(candidate, field) {
            self.deselect(candidate, field);
            false
        } else {
            self.select(candidate, field);
            true
        }
    }

    pub fn select(&mut self, candidate: RecordId, field: F) {
        for (id, fields) in self.by_candidate.iter_mut() {
            if *id != candidate {
                fields.remove(&field);
            }
        }
        self.by_candidate.retain(|_, fields| !fields.is_empty());
        self.by_candidate.entry(candidate).or_default().insert(field);
    }

    pub fn deselect(&mut self, candidate: RecordId, field: F) {
        if let Some(fields) = self.by_candidate.get_mut(&candidate) {
            fields.remove(&field);
            if fields.is_empty() {
                self.by_candidate.remove(&candidate);
            }
        }
    }

    pub fn is_selected(&self, candidate: RecordId, field: F) -> bool {
        self.by_candidate
            .get(&candidate)
            .is_some_and(|fields| fields.contains(&field))
    }

    /// First candidate (by id) that has `field` selected.
    pub fn source_of(&self, field: F) -> Option<RecordId> {
        self.by_candidate
            .iter()
            .find(|(_, fields)| fields.contains(&field))
            .map(|(id, _)| *id)
    }

    pub fn fields_of(&self, candidate: RecordId) -> impl Iterator<Item = F> + '_ {
        self.by_candidate
            .get(&candidate)
            .into_iter()
            .flat_map(|fields| fields.iter().copied())
    }

    pub fn iter(&self) -> impl Iterator<Item = (RecordId, &BTreeSet<F>)> {
        self.by_candidate.iter().map(|(id, fields)| (*id, fields))
    }

    pub fn is_empty(&self) -> bool {
        self.by_candidate.is_empty()
    }
}
