use std::fmt;

use curator_core::{DependentId, FieldKey, MergePlan, PlanDigest, RecordId};
use curator_storage::{AuditTrail, MergeLogEntry, MergeOutcome, Storage, StorageError};
use tracing::{debug, error, info, warn};

use crate::config::MergeConfig;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Write,
    Reassignment,
    Tombstone,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Reassignment => "reassignment",
            Self::Tombstone => "tombstone",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single sub-operation of a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    WriteFields {
        survivor: RecordId,
        fields: Vec<&'static str>,
    },
    Reassign {
        dependent: DependentId,
        from: RecordId,
        to: RecordId,
    },
    Tombstone {
        record: RecordId,
    },
}

impl Step {
    pub fn phase(&self) -> Phase {
        match self {
            Self::WriteFields { .. } => Phase::Write,
            Self::Reassign { .. } => Phase::Reassignment,
            Self::Tombstone { .. } => Phase::Tombstone,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WriteFields { survivor, fields } => {
                write!(f, "write [{}] on {survivor}", fields.join(", "))
            }
            Self::Reassign { dependent, from, to } => {
                write!(f, "reassign {dependent} from {from} to {to}")
            }
            Self::Tombstone { record } => write!(f, "delete {record}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Applied,
    /// The store already held the target state (a retry, or a delete of an
    /// absent record).
    AlreadyDone,
    /// Left alone: the dependent is gone or now points outside the group.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedStep {
    pub step: Step,
    pub outcome: StepOutcome,
}

#[derive(Debug)]
pub struct StepFailure {
    pub step: Step,
    pub error: StorageError,
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.error)
    }
}

/// What one run of a plan did. A run is only a success when every
/// sub-operation of every phase completed.
#[derive(Debug)]
pub struct ExecutionResult {
    pub plan_digest: PlanDigest,
    pub completed: Vec<CompletedStep>,
    pub failed_at: Option<Phase>,
    pub failures: Vec<StepFailure>,
    pub audited: bool,
}

impl ExecutionResult {
    fn new(plan_digest: PlanDigest) -> Self {
        Self {
            plan_digest,
            completed: Vec::new(),
            failed_at: None,
            failures: Vec::new(),
            audited: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed_at.is_none()
    }

    pub fn completed_in(&self, phase: Phase) -> impl Iterator<Item = &CompletedStep> {
        self.completed.iter().filter(move |c| c.step.phase() == phase)
    }

    /// Turn a failed run into its phase-scoped error.
    pub fn into_result(self) -> Result<Self, EngineError> {
        match self.failed_at {
            None => Ok(self),
            Some(Phase::Write) => Err(EngineError::WriteFailed {
                failures: self.failures,
            }),
            Some(Phase::Reassignment) => Err(EngineError::ReassignmentFailed {
                failures: self.failures,
            }),
            Some(Phase::Tombstone) => Err(EngineError::TombstoneFailed {
                failures: self.failures,
            }),
        }
    }

    fn complete(&mut self, step: Step, outcome: StepOutcome) {
        debug!(%step, ?outcome, "merge step done");
        self.completed.push(CompletedStep { step, outcome });
    }

    fn fail(&mut self, step: Step, error: StorageError) {
        error!(%step, %error, "merge step failed");
        self.failed_at = Some(step.phase());
        self.failures.push(StepFailure { step, error });
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failed_at {
            None => writeln!(f, "merge {} completed", self.plan_digest)?,
            Some(phase) => writeln!(
                f,
                "merge {} FAILED in {phase} phase; completed work is kept, retry the same plan",
                self.plan_digest
            )?,
        }
        for c in &self.completed {
            let note = match c.outcome {
                StepOutcome::Applied => "",
                StepOutcome::AlreadyDone => " (already done)",
                StepOutcome::Skipped => " (skipped)",
            };
            writeln!(f, "  ok    {}{note}", c.step)?;
        }
        for failure in &self.failures {
            writeln!(f, "  FAIL  {failure}")?;
        }
        Ok(())
    }
}

/// Applies a compiled plan in three strictly ordered phases: write the
/// survivor, repoint dependents, delete the duplicates. A phase only starts
/// once every sub-operation of the previous one is confirmed. Nothing is
/// rolled back; every intermediate state is valid and re-running the same
/// plan is safe.
#[derive(Debug, Clone)]
pub struct MergeExecutor {
    verify_survivor_version: bool,
    record_audit: bool,
}

impl MergeExecutor {
    pub fn new(config: &MergeConfig) -> Self {
        Self {
            verify_survivor_version: config.verify_survivor_version,
            record_audit: config.record_audit,
        }
    }

    pub fn execute<F, S>(
        &self,
        store: &mut S,
        plan: &MergePlan<F>,
    ) -> Result<ExecutionResult, EngineError>
    where
        F: FieldKey,
        S: Storage + AuditTrail,
    {
        let digest = plan.digest()?;
        let mut result = ExecutionResult::new(digest);
        info!(
            plan = %digest,
            survivor = %plan.survivor_id(),
            duplicates = plan.tombstone_ids().len(),
            "executing merge"
        );

        if self.write_phase(store, plan, &mut result)
            && self.reassignment_phase(store, plan, &mut result)
        {
            self.tombstone_phase(store, plan, &mut result);
        }

        match result.failed_at {
            None => info!(plan = %digest, "merge completed"),
            Some(phase) => error!(plan = %digest, %phase, "merge halted"),
        }

        if self.record_audit {
            result.audited = self.audit(store, plan, &result);
        }
        Ok(result)
    }

    fn write_phase<F: FieldKey, S: Storage>(
        &self,
        store: &mut S,
        plan: &MergePlan<F>,
        result: &mut ExecutionResult,
    ) -> bool {
        let survivor = plan.survivor_id();
        let step = Step::WriteFields {
            survivor,
            fields: plan.field_writes().iter().map(|w| w.field.as_str()).collect(),
        };

        match store.get_record(survivor) {
            Ok(Some(row)) if row.kind == F::ENTITY => {}
            Ok(_) => {
                result.fail(
                    step,
                    StorageError::NotFound(format!("{} {survivor}", F::ENTITY)),
                );
                return false;
            }
            Err(e) => {
                result.fail(step, e);
                return false;
            }
        }

        if plan.field_writes().is_empty() {
            result.complete(step, StepOutcome::AlreadyDone);
            return true;
        }

        match already_written(store, plan) {
            Ok(true) => {
                warn!(%survivor, "survivor already holds the planned values, not rewriting");
                result.complete(step, StepOutcome::AlreadyDone);
                return true;
            }
            Ok(false) => {}
            Err(e) => {
                result.fail(step, e);
                return false;
            }
        }

        let writes: Vec<_> = plan
            .field_writes()
            .iter()
            .map(|w| (w.field.as_str().to_string(), w.value.clone()))
            .collect();
        let expected = self
            .verify_survivor_version
            .then_some(plan.expected_version());

        match store.update_fields(survivor, &writes, expected) {
            Ok(version) => {
                debug!(%survivor, version, "survivor updated");
                result.complete(step, StepOutcome::Applied);
                true
            }
            Err(e) => {
                result.fail(step, e);
                false
            }
        }
    }

    fn reassignment_phase<F: FieldKey, S: Storage>(
        &self,
        store: &mut S,
        plan: &MergePlan<F>,
        result: &mut ExecutionResult,
    ) -> bool {
        let survivor = plan.survivor_id();
        // Dependents are independent: try them all, then gate on the lot.
        for r in plan.dependent_reassignments() {
            let step = Step::Reassign {
                dependent: r.dependent_id,
                from: r.from,
                to: survivor,
            };
            let current = match store.get_dependent_ref(r.dependent_id) {
                Ok(current) => current,
                Err(e) => {
                    result.fail(step, e);
                    continue;
                }
            };
            match current {
                Some(to) if to == survivor => result.complete(step, StepOutcome::AlreadyDone),
                // Moved onto another record that is also being deleted: still ours.
                Some(from) if from == r.from || plan.tombstone_ids().contains(&from) => {
                    if from != r.from {
                        debug!(dependent = %r.dependent_id, now_points_at = %from, "dependent moved within the group");
                    }
                    match store.reassign_dependent(r.dependent_id, survivor) {
                        Ok(true) => result.complete(step, StepOutcome::Applied),
                        Ok(false) => {
                            warn!(dependent = %r.dependent_id, "dependent vanished during reassignment");
                            result.complete(step, StepOutcome::Skipped);
                        }
                        Err(e) => result.fail(step, e),
                    }
                }
                Some(other) => {
                    warn!(
                        dependent = %r.dependent_id,
                        now_points_at = %other,
                        "dependent moved out of the group since the plan was compiled, leaving it alone"
                    );
                    result.complete(step, StepOutcome::Skipped);
                }
                None => {
                    warn!(dependent = %r.dependent_id, "dependent no longer exists");
                    result.complete(step, StepOutcome::Skipped);
                }
            }
        }
        result.failed_at.is_none()
    }

    fn tombstone_phase<F: FieldKey, S: Storage>(
        &self,
        store: &mut S,
        plan: &MergePlan<F>,
        result: &mut ExecutionResult,
    ) -> bool {
        for &record in plan.tombstone_ids() {
            let step = Step::Tombstone { record };
            match store.delete_record(record) {
                Ok(true) => result.complete(step, StepOutcome::Applied),
                Ok(false) => result.complete(step, StepOutcome::AlreadyDone),
                Err(e) => result.fail(step, e),
            }
        }
        result.failed_at.is_none()
    }

    fn audit<F: FieldKey, S: AuditTrail>(
        &self,
        store: &mut S,
        plan: &MergePlan<F>,
        result: &ExecutionResult,
    ) -> bool {
        let entry = MergeLogEntry {
            plan_digest: result.plan_digest,
            kind: F::ENTITY.to_string(),
            survivor_id: plan.survivor_id(),
            tombstones: plan.tombstone_ids().to_vec(),
            reassigned: plan
                .dependent_reassignments()
                .iter()
                .map(|r| r.dependent_id)
                .collect(),
            fields: plan
                .field_writes()
                .iter()
                .map(|w| w.field.as_str().to_string())
                .collect(),
            outcome: if result.is_success() {
                MergeOutcome::Completed
            } else {
                MergeOutcome::Failed
            },
            failed_phase: result.failed_at.map(|p| p.as_str().to_string()),
        };
        match store.append_merge_log(&entry) {
            Ok(()) => true,
            Err(e) => {
                error!(plan = %result.plan_digest, error = %e, "failed to record merge in audit trail");
                false
            }
        }
    }
}

/// True when the survivor already carries every planned value.
fn already_written<F: FieldKey, S: Storage>(
    store: &S,
    plan: &MergePlan<F>,
) -> Result<bool, StorageError> {
    for write in plan.field_writes() {
        let current = store.get_field(plan.survivor_id(), write.field.as_str())?;
        if current.as_ref() != Some(&write.value) {
            return Ok(false);
        }
    }
    Ok(true)
}
