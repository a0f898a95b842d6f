//! The schedule policy aggregate.
//!
//! A [`SchedulePolicy`] is a working copy of state owned by the remote
//! authority. Every mutator builds a draft of the whole aggregate, pushes
//! it, and on success replaces the local copy with a fresh fetch. The draft
//! is never applied locally, so a failed push leaves the local copy exactly
//! as it was.

use cadence_transport::Method;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::client::PolicyClient;
use crate::options::OptionsPatch;
use crate::pattern::PatternSpec;
use crate::schedule::Schedule;
use crate::types::FlaggedEntry;
use crate::wire::{AppGroupEnvelope, TASK_OPERATION_MODIFY, TaskInfo, TaskMeta};
use crate::{
    AppGroup, Association, ChangeFlags, OperationCode, PolicyError, PolicyType, ScheduleSelector,
    SubTaskId,
};

/// Everything the authority knows about one policy.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyState {
    id: u64,
    policy_type: PolicyType,
    associations: Vec<Association>,
    app_groups: Vec<AppGroup>,
    schedules: Vec<Schedule>,
    task: TaskMeta,
    app_group_extra: Map<String, Value>,
    extra: Map<String, Value>,
}

impl PolicyState {
    pub(crate) fn from_wire(
        id: u64,
        info: TaskInfo,
        client: &PolicyClient,
    ) -> Result<Self, PolicyError> {
        let TaskInfo {
            task_operation: _,
            associations,
            task,
            app_group,
            sub_tasks,
            extra,
        } = info;

        let policy_type = task.policy_type.ok_or_else(|| {
            PolicyError::RemoteUnavailable(format!("policy {} has no policyType", id))
        })?;

        let schedules = sub_tasks
            .into_iter()
            .map(|sub_task| Schedule::from_wire(sub_task, policy_type, client.builder()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: task.task_id.unwrap_or(id),
            policy_type,
            associations,
            app_groups: app_group.app_groups,
            schedules,
            task,
            app_group_extra: app_group.extra,
            extra,
        })
    }

    /// The modify request for this state. Consumes the state.
    pub(crate) fn into_wire(self) -> TaskInfo {
        let mut task = self.task;
        task.task_id = Some(self.id);
        task.policy_type = Some(self.policy_type);

        TaskInfo {
            task_operation: Some(TASK_OPERATION_MODIFY),
            associations: self.associations,
            task,
            app_group: AppGroupEnvelope {
                app_groups: self.app_groups,
                extra: self.app_group_extra,
            },
            sub_tasks: self.schedules.iter().map(Schedule::to_wire).collect(),
            extra: self.extra,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.task.task_name
    }

    pub fn policy_type(&self) -> PolicyType {
        self.policy_type
    }

    pub fn is_enabled(&self) -> bool {
        !self.task.task_flags.disabled
    }

    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    pub fn app_groups(&self) -> &[AppGroup] {
        &self.app_groups
    }

    pub fn schedules(&self) -> &[Schedule] {
        &self.schedules
    }
}

/// Name and id of one schedule, as listed by [`SchedulePolicy::all_schedules`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSummary {
    pub name: String,
    pub id: Option<SubTaskId>,
}

/// Flag `list` for a push under `op`.
///
/// `Overwrite` is sent as an include of `list` plus a delete of every
/// entry in `current` that `list` no longer names.
fn stamp_changes<T: FlaggedEntry>(current: &[T], list: Vec<T>, op: OperationCode) -> Vec<T> {
    let flags = match op {
        OperationCode::None => None,
        OperationCode::Overwrite | OperationCode::Update => Some(ChangeFlags::include()),
        OperationCode::Delete => Some(ChangeFlags::deleted()),
    };

    let mut stamped: Vec<T> = list
        .into_iter()
        .map(|mut entry| {
            entry.set_flags(flags.clone());
            entry
        })
        .collect();

    if op == OperationCode::Overwrite {
        let dropped: Vec<T> = current
            .iter()
            .filter(|old| !stamped.iter().any(|new| new.same_entry(old)))
            .cloned()
            .map(|mut old| {
                old.set_flags(Some(ChangeFlags::deleted()));
                old
            })
            .collect();
        stamped.extend(dropped);
    }
    stamped
}

/// A schedule policy bound to the authority it lives on.
///
/// Mutators take `&mut self`: one writer per policy object. Wrap the policy
/// in a mutex to share it.
#[derive(Debug)]
pub struct SchedulePolicy {
    client: PolicyClient,
    state: PolicyState,
    /// Set when a push succeeded but the follow-up fetch did not.
    needs_refresh: bool,
}

impl SchedulePolicy {
    /// Fetch the policy with task id `id`.
    #[tracing::instrument(skip(client))]
    pub async fn load(client: PolicyClient, id: u64) -> Result<Self, PolicyError> {
        let info = client.fetch_task(id).await?;
        let state = PolicyState::from_wire(id, info, &client)?;
        Ok(Self {
            client,
            state,
            needs_refresh: false,
        })
    }

    /// Replace the local copy with the authority's current state.
    #[tracing::instrument(skip(self), fields(policy_id = self.state.id))]
    pub async fn refresh(&mut self) -> Result<(), PolicyError> {
        let info = self.client.fetch_task(self.state.id).await?;
        self.state = PolicyState::from_wire(self.state.id, info, &self.client)?;
        self.needs_refresh = false;
        Ok(())
    }

    async fn ensure_fresh(&mut self) -> Result<(), PolicyError> {
        if self.needs_refresh {
            self.refresh().await?;
        }
        Ok(())
    }

    pub fn id(&self) -> u64 {
        self.state.id
    }

    pub fn name(&self) -> &str {
        self.state.name()
    }

    pub fn policy_type(&self) -> PolicyType {
        self.state.policy_type
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    pub fn associations(&self) -> &[Association] {
        &self.state.associations
    }

    pub fn app_groups(&self) -> &[AppGroup] {
        &self.state.app_groups
    }

    pub fn schedules(&self) -> &[Schedule] {
        &self.state.schedules
    }

    /// The local copy as last fetched.
    pub fn snapshot(&self) -> &PolicyState {
        &self.state
    }

    pub fn all_schedules(&self) -> Vec<ScheduleSummary> {
        self.state
            .schedules
            .iter()
            .map(|s| ScheduleSummary {
                name: s.name().to_string(),
                id: s.id(),
            })
            .collect()
    }

    /// Look up one schedule by id or name.
    pub fn schedule(&self, selector: &ScheduleSelector) -> Result<&Schedule, PolicyError> {
        Schedule::find_by_id_or_name(&self.state.schedules, selector)
    }

    /// Push `draft` and reload.
    ///
    /// The draft is consumed by the push whatever its outcome; local state
    /// only ever changes by being replaced with a fresh fetch.
    async fn reconcile(&mut self, draft: PolicyState) -> Result<(), PolicyError> {
        let request = draft.into_wire();
        self.client.push_task(Method::PUT, request).await?;

        self.needs_refresh = true;
        if let Err(e) = self.refresh().await {
            warn!(policy_id = self.state.id, error = %e, "policy pushed but reload failed");
            return Err(e);
        }
        Ok(())
    }

    /// Replace the associations with `list`, applied remotely under `op`.
    #[tracing::instrument(skip(self, list), fields(policy_id = self.state.id, count = list.len()))]
    pub async fn update_associations(
        &mut self,
        list: Vec<Association>,
        op: OperationCode,
    ) -> Result<(), PolicyError> {
        for association in &list {
            association.validate()?;
        }
        self.ensure_fresh().await?;

        let mut draft = self.state.clone();
        draft.associations = stamp_changes(&self.state.associations, list, op);
        self.reconcile(draft).await?;

        info!(policy = %self.name(), ?op, "updated associations");
        Ok(())
    }

    /// Replace the app groups with `list`, applied remotely under `op`.
    #[tracing::instrument(skip(self, list), fields(policy_id = self.state.id, count = list.len()))]
    pub async fn update_app_groups(
        &mut self,
        list: Vec<AppGroup>,
        op: OperationCode,
    ) -> Result<(), PolicyError> {
        for app_group in &list {
            app_group.validate()?;
        }
        self.ensure_fresh().await?;

        let mut draft = self.state.clone();
        draft.app_groups = stamp_changes(&self.state.app_groups, list, op);
        self.reconcile(draft).await?;

        info!(policy = %self.name(), ?op, "updated app groups");
        Ok(())
    }

    /// Add a schedule built from `pattern` and `options` over the type's defaults.
    #[tracing::instrument(skip(self, pattern, options), fields(policy_id = self.state.id))]
    pub async fn add_schedule(
        &mut self,
        name: &str,
        pattern: PatternSpec,
        options: &OptionsPatch,
    ) -> Result<(), PolicyError> {
        let schedule = Schedule::propose(
            name,
            pattern,
            options,
            self.state.policy_type,
            self.client.compiler(),
            self.client.builder(),
        )?;
        self.ensure_fresh().await?;

        let mut draft = self.state.clone();
        draft.schedules.push(schedule);
        self.reconcile(draft).await?;

        info!(policy = %self.name(), schedule = name, "added schedule");
        Ok(())
    }

    /// Edit the pattern and/or options of one schedule.
    #[tracing::instrument(skip(self, selector, pattern, options), fields(policy_id = self.state.id, selector = %selector))]
    pub async fn modify_schedule(
        &mut self,
        selector: &ScheduleSelector,
        pattern: Option<&PatternSpec>,
        options: Option<&OptionsPatch>,
    ) -> Result<(), PolicyError> {
        selector.validate()?;
        self.ensure_fresh().await?;

        let mut draft = self.state.clone();
        let index = Schedule::position(&draft.schedules, selector)?;
        let schedule = &mut draft.schedules[index];
        if let Some(pattern) = pattern {
            schedule.with_pattern(pattern, self.client.compiler())?;
        }
        if let Some(options) = options {
            schedule.with_options(options, draft.policy_type, self.client.builder())?;
        }
        self.reconcile(draft).await?;

        info!(policy = %self.name(), "modified schedule");
        Ok(())
    }

    /// Remove one schedule.
    #[tracing::instrument(skip(self, selector), fields(policy_id = self.state.id, selector = %selector))]
    pub async fn delete_schedule(&mut self, selector: &ScheduleSelector) -> Result<(), PolicyError> {
        selector.validate()?;
        self.ensure_fresh().await?;

        let mut draft = self.state.clone();
        let index = Schedule::position(&draft.schedules, selector)?;
        draft.schedules[index].mark_for_deletion();
        self.reconcile(draft).await?;

        info!(policy = %self.name(), "deleted schedule");
        Ok(())
    }

    pub async fn enable(&mut self) -> Result<(), PolicyError> {
        self.set_enabled(true).await
    }

    pub async fn disable(&mut self) -> Result<(), PolicyError> {
        self.set_enabled(false).await
    }

    #[tracing::instrument(skip(self), fields(policy_id = self.state.id))]
    async fn set_enabled(&mut self, enabled: bool) -> Result<(), PolicyError> {
        self.client.set_enabled(self.state.id, enabled).await?;

        self.needs_refresh = true;
        self.refresh().await?;

        info!(policy = %self.name(), enabled, "toggled policy");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(list: &[AppGroup]) -> Vec<(String, Option<ChangeFlags>)> {
        list.iter()
            .map(|g| (g.app_group_name.clone(), g.flags.clone()))
            .collect()
    }

    #[test]
    fn test_update_flags_every_entry_include() {
        let stamped = stamp_changes(&[], vec![AppGroup::new("Archived Files")], OperationCode::Update);
        assert_eq!(
            names(&stamped),
            vec![("Archived Files".to_string(), Some(ChangeFlags::include()))]
        );
    }

    #[test]
    fn test_delete_flags_every_entry_deleted() {
        let current = vec![AppGroup::new("Protected Files")];
        let stamped = stamp_changes(&current, vec![AppGroup::new("Protected Files")], OperationCode::Delete);
        assert_eq!(
            names(&stamped),
            vec![("Protected Files".to_string(), Some(ChangeFlags::deleted()))]
        );
    }

    #[test]
    fn test_overwrite_deletes_entries_not_in_new_list() {
        let current = vec![AppGroup::new("Protected Files"), AppGroup::new("DB2")];
        let stamped = stamp_changes(
            &current,
            vec![AppGroup::new("protected files"), AppGroup::new("Archived Files")],
            OperationCode::Overwrite,
        );

        assert_eq!(
            names(&stamped),
            vec![
                ("protected files".to_string(), Some(ChangeFlags::include())),
                ("Archived Files".to_string(), Some(ChangeFlags::include())),
                ("DB2".to_string(), Some(ChangeFlags::deleted())),
            ]
        );
    }

    #[test]
    fn test_none_clears_flags() {
        let mut entry = Association::client("fs01");
        entry.flags = Some(ChangeFlags::deleted());
        let stamped = stamp_changes(&[], vec![entry], OperationCode::None);
        assert_eq!(stamped[0].flags, None);
    }
}
