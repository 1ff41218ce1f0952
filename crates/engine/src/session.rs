use std::fmt;

use curator_core::{DuplicateGroup, FieldKey, FieldSelection, MergePlan, RecordId};
use curator_storage::{AuditTrail, Storage};
use tracing::{info, warn};

use crate::Engine;
use crate::compiler::compile;
use crate::error::EngineError;
use crate::executor::{ExecutionResult, Phase, StepOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Selecting,
    Reviewing,
    /// An apply ran and did not finish. Only a retry is allowed, unless
    /// nothing was written yet.
    Failed,
    Completed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Selecting => "selecting",
            Self::Reviewing => "reviewing",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One operator's merge of one duplicate group: pick fields, review the plan,
/// apply it. Once the plan has changed the store the selection is frozen and a
/// failed merge can only be retried with the same plan. A run that failed in
/// the write phase without applying anything can still be cancelled or
/// refreshed.
#[derive(Debug)]
pub struct MergeSession<F: FieldKey> {
    group: DuplicateGroup<F>,
    selection: FieldSelection<F>,
    stage: Stage,
    plan: Option<MergePlan<F>>,
    last_result: Option<ExecutionResult>,
    /// Some run has changed the store.
    wrote: bool,
}

impl<F: FieldKey> MergeSession<F> {
    pub fn new(group: DuplicateGroup<F>) -> Self {
        Self {
            group,
            selection: FieldSelection::new(),
            stage: Stage::Selecting,
            plan: None,
            last_result: None,
            wrote: false,
        }
    }

    pub fn group(&self) -> &DuplicateGroup<F> {
        &self.group
    }

    pub fn selection(&self) -> &FieldSelection<F> {
        &self.selection
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The plan under review or being applied.
    pub fn reviewed_plan(&self) -> Option<&MergePlan<F>> {
        self.plan.as_ref()
    }

    pub fn last_result(&self) -> Option<&ExecutionResult> {
        self.last_result.as_ref()
    }

    fn require(&self, action: &'static str, allowed: &[Stage]) -> Result<(), EngineError> {
        if allowed.contains(&self.stage) {
            Ok(())
        } else {
            Err(EngineError::InvalidStage {
                action,
                stage: self.stage.as_str(),
            })
        }
    }

    /// Every run so far failed in the write phase before changing anything.
    fn nothing_applied(&self) -> bool {
        self.stage == Stage::Failed
            && !self.wrote
            && self
                .last_result
                .as_ref()
                .is_some_and(|r| r.failed_at == Some(Phase::Write))
    }

    fn reopen(&mut self) {
        if self.stage != Stage::Selecting {
            info!(stage = %self.stage, "back to selecting");
        }
        self.plan = None;
        self.stage = Stage::Selecting;
    }

    /// Flip `field` on `candidate`. Returns whether it is now selected.
    pub fn toggle(&mut self, candidate: RecordId, field: F) -> Result<bool, EngineError> {
        self.require("toggle", &[Stage::Selecting])?;
        if self.group.member(candidate).is_none() {
            return Err(EngineError::StaleSelection { candidate });
        }
        Ok(self.selection.toggle(candidate, field))
    }

    /// Swap in a freshly loaded copy of the group. Selections on candidates
    /// that are no longer members are dropped.
    pub fn refresh(&mut self, group: DuplicateGroup<F>) -> Result<(), EngineError> {
        if !self.nothing_applied() {
            self.require("refresh", &[Stage::Selecting])?;
        }
        self.reopen();
        let gone: Vec<(RecordId, Vec<F>)> = self
            .selection
            .iter()
            .filter(|(id, _)| group.member(*id).is_none())
            .map(|(id, fields)| (id, fields.iter().copied().collect()))
            .collect();
        for (id, fields) in gone {
            warn!(candidate = %id, "candidate left the group, dropping its selections");
            for field in fields {
                self.selection.deselect(id, field);
            }
        }
        self.group = group;
        Ok(())
    }

    /// Compile the current selection and enter review.
    pub fn plan(&mut self) -> Result<&MergePlan<F>, EngineError> {
        self.require("plan", &[Stage::Selecting, Stage::Reviewing])?;
        if self.stage == Stage::Selecting {
            self.plan = Some(compile(&self.group, &self.selection)?);
            self.stage = Stage::Reviewing;
        }
        self.plan.as_ref().ok_or(EngineError::InvalidStage {
            action: "plan",
            stage: self.stage.as_str(),
        })
    }

    /// Leave review, or a run that wrote nothing, and go back to selecting.
    /// A no-op while selecting.
    pub fn cancel(&mut self) -> Result<(), EngineError> {
        if !self.nothing_applied() {
            self.require("cancel", &[Stage::Selecting, Stage::Reviewing])?;
        }
        self.reopen();
        Ok(())
    }

    /// Execute the reviewed plan, or retry it after a failure. A failed run is
    /// reported through the returned result, not as an error.
    pub fn apply<S: Storage + AuditTrail>(
        &mut self,
        engine: &mut Engine<S>,
    ) -> Result<&ExecutionResult, EngineError> {
        self.require("apply", &[Stage::Reviewing, Stage::Failed])?;
        let Some(plan) = self.plan.as_ref() else {
            return Err(EngineError::InvalidStage {
                action: "apply",
                stage: self.stage.as_str(),
            });
        };
        if self.stage == Stage::Failed {
            info!(plan = %plan.digest()?, "retrying merge");
        }

        let result = engine.execute(plan)?;
        self.wrote |= result.failed_at != Some(Phase::Write)
            || result.completed.iter().any(|c| c.outcome == StepOutcome::Applied);
        self.stage = if result.is_success() {
            Stage::Completed
        } else {
            Stage::Failed
        };
        Ok(self.last_result.insert(result))
    }
}
