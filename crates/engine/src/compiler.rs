use std::collections::{BTreeMap, BTreeSet};

use curator_core::{
    DuplicateGroup, FieldKey, FieldSelection, FieldWrite, MergePlan, Reassignment, RecordId,
};
use tracing::debug;

use crate::error::EngineError;

/// Compile the merge of `group` under `selection` into a plan.
///
/// Pure and deterministic: the same inputs always give an equal plan, so the
/// plan the operator reviews is the plan that runs. Fails before touching
/// anything if the selection names a candidate outside the group or picks a
/// field from more than one candidate.
pub fn compile<F: FieldKey>(
    group: &DuplicateGroup<F>,
    selection: &FieldSelection<F>,
) -> Result<MergePlan<F>, EngineError> {
    for (candidate, _) in selection.iter() {
        if group.member(candidate).is_none() {
            return Err(EngineError::StaleSelection { candidate });
        }
    }

    let mut sources: BTreeMap<F, Vec<RecordId>> = BTreeMap::new();
    for (candidate, fields) in selection.iter() {
        for field in fields {
            sources.entry(*field).or_default().push(candidate);
        }
    }
    if let Some((field, candidates)) = sources.iter().find(|(_, c)| c.len() > 1) {
        return Err(EngineError::ConflictingFieldSelection {
            field: field.to_string(),
            candidates: candidates.clone(),
        });
    }

    let mut field_writes = Vec::new();
    for (field, candidates) in &sources {
        let source = candidates[0];
        let Some(candidate) = group.member(source) else {
            return Err(EngineError::StaleSelection { candidate: source });
        };
        let value = candidate.field(*field);
        if value.is_empty() {
            debug!(%field, %source, "selected value is empty, skipping");
            continue;
        }
        field_writes.push(FieldWrite {
            field: *field,
            value: value.clone(),
            source,
        });
    }

    let survivor = group.survivor();
    let mut seen: BTreeSet<_> = survivor.dependents.iter().map(|d| d.id).collect();
    let mut reassignments = Vec::new();
    for dup in group.duplicates() {
        for dependent in &dup.dependents {
            if seen.insert(dependent.id) {
                reassignments.push(Reassignment {
                    dependent_id: dependent.id,
                    label: dependent.label.clone(),
                    table: dependent.table.clone(),
                    from: dup.id,
                });
            }
        }
    }

    let tombstone_ids = group.duplicates().iter().map(|d| d.id).collect();

    debug!(
        survivor = %survivor.id,
        writes = field_writes.len(),
        reassignments = reassignments.len(),
        "compiled merge plan"
    );

    Ok(MergePlan::new(
        survivor.id,
        survivor.version,
        field_writes,
        reassignments,
        tombstone_ids,
    ))
}
