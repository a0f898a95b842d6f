//! A single schedule (subtask) of a policy.

use serde_json::{Map, Value};

use crate::options::{OptionSet, OptionSetBuilder, OptionsPatch, SubTaskKind};
use crate::pattern::{Pattern, PatternCompiler, PatternSpec};
use crate::wire::{SubTask, SubTaskEnvelope};
use crate::{PendingOp, PolicyError, PolicyType, ScheduleSelector, SubTaskId};

/// One recurring job definition: a pattern plus type-specific options.
///
/// The `options` tree as received from the authority is kept whole; the
/// typed [`OptionSet`] is a decoded view of one branch of it. Edits write
/// back into that branch so sibling branches (`commonOpts`, `dataOpt`, ...)
/// survive a push untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    id: Option<SubTaskId>,
    name: String,
    kind: SubTaskKind,
    pattern: Option<Pattern>,
    options: Option<OptionSet>,
    option_tree: Value,
    pending_op: PendingOp,
    sub_task_extra: Map<String, Value>,
    extra: Map<String, Value>,
}

/// Map a builder failure on a new schedule to [`PolicyError::InvalidSchedule`].
fn invalid_schedule(e: PolicyError) -> PolicyError {
    match e {
        PolicyError::Validation(msg) => PolicyError::InvalidSchedule(msg),
        other => other,
    }
}

impl Schedule {
    /// A new schedule, not yet known to the authority.
    ///
    /// The pattern spec gets a daily frequency if it names none; options
    /// start from the policy type's defaults.
    pub fn propose(
        name: impl Into<String>,
        pattern: PatternSpec,
        options: &OptionsPatch,
        policy_type: PolicyType,
        compiler: &dyn PatternCompiler,
        builder: &OptionSetBuilder,
    ) -> Result<Self, PolicyError> {
        let template = builder.template(policy_type)?;
        let pattern = compiler.compile(None, &pattern.with_default_frequency(), None)?;
        let options = builder
            .build(policy_type, None, options)
            .map_err(invalid_schedule)?;
        let option_tree = builder.envelope(policy_type, &options)?;

        Ok(Self {
            id: None,
            name: name.into(),
            kind: template.sub_task,
            pattern: Some(pattern),
            options: Some(options),
            option_tree,
            pending_op: PendingOp::Create,
            sub_task_extra: Map::new(),
            extra: Map::new(),
        })
    }

    /// Decode a subtask fetched from the authority.
    pub(crate) fn from_wire(
        envelope: SubTaskEnvelope,
        policy_type: PolicyType,
        builder: &OptionSetBuilder,
    ) -> Result<Self, PolicyError> {
        let SubTaskEnvelope {
            sub_task_operation,
            sub_task,
            options: option_tree,
            pattern,
            extra,
        } = envelope;

        let options = if builder.supports(policy_type) {
            builder.extract(policy_type, &option_tree).map_err(|e| {
                PolicyError::RemoteUnavailable(format!(
                    "schedule '{}' has unreadable options: {}",
                    sub_task.sub_task_name, e
                ))
            })?
        } else {
            None
        };

        Ok(Self {
            id: sub_task.sub_task_id,
            name: sub_task.sub_task_name,
            kind: SubTaskKind::new(sub_task.sub_task_type, sub_task.operation_type),
            pattern,
            options,
            option_tree,
            pending_op: sub_task_operation,
            sub_task_extra: sub_task.extra,
            extra,
        })
    }

    pub(crate) fn to_wire(&self) -> SubTaskEnvelope {
        SubTaskEnvelope {
            sub_task_operation: self.pending_op,
            sub_task: SubTask {
                sub_task_id: self.id,
                sub_task_name: self.name.clone(),
                sub_task_type: self.kind.sub_task_type,
                operation_type: self.kind.operation_type,
                extra: self.sub_task_extra.clone(),
            },
            options: self.option_tree.clone(),
            pattern: self.pattern.clone(),
            extra: self.extra.clone(),
        }
    }

    pub fn id(&self) -> Option<SubTaskId> {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SubTaskKind {
        self.kind
    }

    pub fn pattern(&self) -> Option<&Pattern> {
        self.pattern.as_ref()
    }

    /// Typed options, when the policy type has a registered builder.
    pub fn options(&self) -> Option<&OptionSet> {
        self.options.as_ref()
    }

    /// The complete `options` tree as it goes on the wire.
    pub fn option_tree(&self) -> &Value {
        &self.option_tree
    }

    pub fn pending_op(&self) -> PendingOp {
        self.pending_op
    }

    pub(crate) fn set_pending_op(&mut self, op: PendingOp) {
        self.pending_op = op;
    }

    /// The pattern a partial edit starts from.
    ///
    /// Automatic schedules keep their pattern under
    /// `commonOpts.automaticSchedulePattern`, which then replaces the subtask
    /// pattern. Job-level data options under `backupOpts.dataOpt` travel
    /// with the pattern and are merged in so they survive the edit.
    fn pattern_base(&self) -> Pattern {
        let mut base = self.pattern.clone().unwrap_or_default();

        if let Some(Value::Object(auto)) = self
            .option_tree
            .pointer("/commonOpts/automaticSchedulePattern")
        {
            base = Pattern::new(auto.clone());
        }
        if let Some(Value::Object(data_opt)) = self.option_tree.pointer("/backupOpts/dataOpt") {
            base.overlay(data_opt);
        }
        base
    }

    /// Replace the pattern, compiling `patch` over the current one.
    ///
    /// On error the schedule is left unchanged.
    pub fn with_pattern(
        &mut self,
        patch: &PatternSpec,
        compiler: &dyn PatternCompiler,
    ) -> Result<(), PolicyError> {
        let base = self.pattern_base();
        let compiled = compiler.compile(Some(&base), patch, self.id)?;
        self.pattern = Some(compiled);
        Ok(())
    }

    /// Apply an options patch over the current options.
    ///
    /// A schedule whose fetched tree has no options for `policy_type` is
    /// refused rather than rebuilt from defaults. On error the schedule is
    /// left unchanged.
    pub fn with_options(
        &mut self,
        patch: &OptionsPatch,
        policy_type: PolicyType,
        builder: &OptionSetBuilder,
    ) -> Result<(), PolicyError> {
        if self.options.is_none() && builder.supports(policy_type) {
            return Err(PolicyError::InvalidSchedule(format!(
                "schedule '{}' has no {} options to update",
                self.name, policy_type
            )));
        }
        let options = builder.build(policy_type, self.options.as_ref(), patch)?;
        let mut tree = self.option_tree.clone();
        builder.embed(policy_type, &mut tree, &options)?;

        self.options = Some(options);
        self.option_tree = tree;
        Ok(())
    }

    /// Flag the schedule for removal on the next push.
    pub fn mark_for_deletion(&mut self) {
        self.pending_op = PendingOp::Delete;
    }

    fn matches(&self, selector: &ScheduleSelector) -> bool {
        match (&selector.id, &selector.name) {
            (Some(id), None) => self.id == Some(*id),
            (None, Some(name)) => self.name == *name,
            _ => false,
        }
    }

    /// Index of the first schedule matching `selector`.
    pub fn position(schedules: &[Schedule], selector: &ScheduleSelector) -> Result<usize, PolicyError> {
        selector.validate()?;
        schedules
            .iter()
            .position(|s| s.matches(selector))
            .ok_or_else(|| PolicyError::ScheduleNotFound(selector.to_string()))
    }

    /// The first schedule matching `selector`.
    pub fn find_by_id_or_name<'a>(
        schedules: &'a [Schedule],
        selector: &ScheduleSelector,
    ) -> Result<&'a Schedule, PolicyError> {
        Self::position(schedules, selector).map(|i| &schedules[i])
    }
}
