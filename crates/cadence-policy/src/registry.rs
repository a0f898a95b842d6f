//! Name-indexed collection of the schedule policies on an authority.

use std::collections::BTreeMap;
use std::fmt;

use cadence_transport::Method;
use serde::{Deserialize, Deserializer};
use tracing::{info, warn};

use crate::client::PolicyClient;
use crate::options::OptionsPatch;
use crate::pattern::PatternSpec;
use crate::policy::SchedulePolicy;
use crate::schedule::Schedule;
use crate::wire::{AppGroupEnvelope, TaskInfo, TaskMeta};
use crate::{AppGroup, Association, PendingOp, PolicyError, PolicyType};

/// A schedule to create along with a new policy.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NewSchedule {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub pattern: PatternSpec,
    #[serde(default)]
    pub options: OptionsPatch,
}

impl NewSchedule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn pattern(mut self, pattern: PatternSpec) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn options(mut self, options: OptionsPatch) -> Self {
        self.options = options;
        self
    }
}

fn policy_type_name_or_code<'de, D>(deserializer: D) -> Result<PolicyType, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NameOrCode {
        Code(i64),
        Name(String),
    }

    match NameOrCode::deserialize(deserializer)? {
        NameOrCode::Code(code) => PolicyType::try_from(code).map_err(D::Error::custom),
        NameOrCode::Name(name) => name.parse().map_err(D::Error::custom),
    }
}

/// Everything needed to create a policy.
///
/// Also the shape of a policy definition file:
///
/// ```json
/// {
///   "name": "nightly-backup",
///   "policyType": "Data Protection",
///   "associations": [{"clientGroupName": "linux-servers"}],
///   "appGroups": [{"appGroupName": "Protected Files"}],
///   "schedules": [{"name": "daily-inc", "pattern": {"freq_type": "daily"}}]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPolicy {
    pub name: String,
    #[serde(deserialize_with = "policy_type_name_or_code")]
    pub policy_type: PolicyType,
    #[serde(default)]
    pub associations: Vec<Association>,
    #[serde(default)]
    pub app_groups: Vec<AppGroup>,
    #[serde(default)]
    pub schedules: Vec<NewSchedule>,
}

impl NewPolicy {
    pub fn new(name: impl Into<String>, policy_type: PolicyType) -> Self {
        Self {
            name: name.into(),
            policy_type,
            associations: Vec::new(),
            app_groups: Vec::new(),
            schedules: Vec::new(),
        }
    }

    pub fn association(mut self, association: Association) -> Self {
        self.associations.push(association);
        self
    }

    pub fn app_group(mut self, app_group: AppGroup) -> Self {
        self.app_groups.push(app_group);
        self
    }

    pub fn schedule(mut self, schedule: NewSchedule) -> Self {
        self.schedules.push(schedule);
        self
    }
}

/// The schedule policies on one authority, indexed by lowercased name.
#[derive(Debug)]
pub struct SchedulePolicyRegistry {
    client: PolicyClient,
    policies: BTreeMap<String, u64>,
}

impl SchedulePolicyRegistry {
    /// Connect and load the policy index.
    pub async fn new(client: PolicyClient) -> Result<Self, PolicyError> {
        let policies = client.list_policies().await?;
        Ok(Self { client, policies })
    }

    /// Reload the name→id index.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&mut self) -> Result<(), PolicyError> {
        self.policies = self.client.list_policies().await?;
        Ok(())
    }

    /// Policy names (lowercased) and their task ids.
    pub fn all_policies(&self) -> &BTreeMap<String, u64> {
        &self.policies
    }

    pub fn has_policy(&self, name: &str) -> bool {
        self.policies.contains_key(&name.to_lowercase())
    }

    fn id_of(&self, name: &str) -> Result<u64, PolicyError> {
        self.policies
            .get(&name.to_lowercase())
            .copied()
            .ok_or_else(|| PolicyError::PolicyNotFound(name.to_string()))
    }

    /// Load the policy called `name`.
    pub async fn get(&self, name: &str) -> Result<SchedulePolicy, PolicyError> {
        let id = self.id_of(name)?;
        SchedulePolicy::load(self.client.clone(), id).await
    }

    /// Load a policy by task id, without consulting the index.
    ///
    /// Fails with [`PolicyError::PolicyNotFound`] if the policy at `id` is
    /// not called `name`.
    pub async fn get_with_id(&self, name: &str, id: u64) -> Result<SchedulePolicy, PolicyError> {
        let policy = SchedulePolicy::load(self.client.clone(), id).await?;
        if !policy.name().eq_ignore_ascii_case(name) {
            return Err(PolicyError::PolicyNotFound(format!(
                "{} (task {} is '{}')",
                name,
                id,
                policy.name()
            )));
        }
        Ok(policy)
    }

    /// Create a policy and load it back.
    ///
    /// Every schedule is built locally first, so an invalid schedule fails
    /// before anything is sent.
    #[tracing::instrument(skip(self, new), fields(policy = %new.name, policy_type = %new.policy_type))]
    pub async fn add(&mut self, new: NewPolicy) -> Result<SchedulePolicy, PolicyError> {
        if new.name.trim().is_empty() {
            return Err(PolicyError::Validation("policy name must not be empty".into()));
        }
        for association in &new.associations {
            association.validate()?;
        }
        for app_group in &new.app_groups {
            app_group.validate()?;
        }

        let sub_tasks = new
            .schedules
            .iter()
            .map(|s| {
                let mut schedule = Schedule::propose(
                    s.name.clone(),
                    s.pattern.clone(),
                    &s.options,
                    new.policy_type,
                    self.client.compiler(),
                    self.client.builder(),
                )?;
                // Schedules sent with a new policy are created with it.
                schedule.set_pending_op(PendingOp::None);
                Ok(schedule.to_wire())
            })
            .collect::<Result<Vec<_>, PolicyError>>()?;

        let request = TaskInfo {
            task_operation: None,
            associations: new.associations,
            task: TaskMeta::new_policy(&new.name, new.policy_type),
            app_group: AppGroupEnvelope {
                app_groups: new.app_groups,
                extra: Default::default(),
            },
            sub_tasks,
            extra: Default::default(),
        };

        self.client.push_task(Method::POST, request).await?;
        self.refresh().await?;

        let policy = self.get(&new.name).await?;
        info!(id = policy.id(), "created schedule policy");
        Ok(policy)
    }

    /// Delete the policy called `name`.
    ///
    /// Returns `Ok` once the authority accepts the delete. If reloading the
    /// index afterwards fails, the deleted name is still dropped from the
    /// local index and the rest of it is left as it was.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&mut self, name: &str) -> Result<(), PolicyError> {
        let id = self.id_of(name)?;
        self.client.delete_task(id).await?;
        self.policies.remove(&name.to_lowercase());
        info!(id, "deleted schedule policy");

        if let Err(e) = self.refresh().await {
            warn!(id, error = %e, "policy deleted but index reload failed");
        }
        Ok(())
    }
}

impl fmt::Display for SchedulePolicyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:^5}\t{:^20}", "S. No.", "Schedule Policy")?;
        if !self.policies.is_empty() {
            writeln!(f)?;
        }
        for (index, name) in self.policies.keys().enumerate() {
            write!(f, "\n{:^5}\t{}", index + 1, name)?;
        }
        Ok(())
    }
}
