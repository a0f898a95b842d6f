//! Per-policy-type schedule options.
//!
//! Each supported [`PolicyType`] has an [`OptionTemplate`]: its default
//! option values, the sub-task codes new schedules carry, and the path at
//! which the option object sits inside a subtask's `options` tree. The
//! [`OptionSetBuilder`] owns these templates and is the only place that
//! knows about nesting, so supporting a new policy type is one more entry
//! in [`OptionSetBuilder::standard`].

use std::collections::HashMap;
use std::mem;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{PolicyError, PolicyType};

/// Level of a backup job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupLevel {
    #[serde(rename = "Full", alias = "FULL")]
    Full,
    #[serde(rename = "Incremental", alias = "INCREMENTAL")]
    Incremental,
    #[serde(rename = "Differential", alias = "DIFFERENTIAL")]
    Differential,
    #[serde(rename = "Synthetic Full", alias = "SYNTHETIC_FULL", alias = "SYNTHETICFULL")]
    SyntheticFull,
}

/// Options of a data protection (backup) schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupOptions {
    pub backup_level: BackupLevel,
    pub inc_level: i64,
    pub run_incremental_backup: bool,
    /// Fields this crate does not model (e.g. `dataOpt`), kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            backup_level: BackupLevel::Incremental,
            inc_level: 1,
            run_incremental_backup: false,
            extra: Map::new(),
        }
    }
}

/// Media agent reference inside aux copy options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaAgentRef {
    pub media_agent_name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MediaAgentRef {
    /// Let the authority pick any media agent.
    pub const ANY: &'static str = "<ANY MEDIAAGENT>";

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            media_agent_name: name.into(),
            extra: Map::new(),
        }
    }
}

/// Options of an auxiliary copy schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuxCopyOptions {
    pub max_number_of_streams: i64,
    pub use_maximum_streams: bool,
    // The authority's field name is misspelled; it must stay that way on the wire.
    #[serde(
        rename = "useScallableResourceManagement",
        alias = "useScalableResourceManagement"
    )]
    pub use_scalable_resource_management: bool,
    pub total_jobs_to_process: i64,
    pub all_copies: bool,
    pub media_agent: MediaAgentRef,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for AuxCopyOptions {
    fn default() -> Self {
        Self {
            max_number_of_streams: 0,
            use_maximum_streams: true,
            use_scalable_resource_management: true,
            total_jobs_to_process: 1000,
            all_copies: true,
            media_agent: MediaAgentRef::named(MediaAgentRef::ANY),
            extra: Map::new(),
        }
    }
}

/// Type-specific options of one schedule.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionSet {
    Backup(BackupOptions),
    AuxCopy(AuxCopyOptions),
}

impl OptionSet {
    pub fn kind_name(&self) -> &'static str {
        match self {
            OptionSet::Backup(_) => "backup",
            OptionSet::AuxCopy(_) => "aux copy",
        }
    }

    pub fn as_backup(&self) -> Option<&BackupOptions> {
        match self {
            OptionSet::Backup(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_aux_copy(&self) -> Option<&AuxCopyOptions> {
        match self {
            OptionSet::AuxCopy(o) => Some(o),
            _ => None,
        }
    }

    fn same_kind(&self, other: &OptionSet) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }

    /// Flat wire object of this option set.
    pub fn to_map(&self) -> Result<Map<String, Value>, PolicyError> {
        let value = match self {
            OptionSet::Backup(o) => serde_json::to_value(o),
            OptionSet::AuxCopy(o) => serde_json::to_value(o),
        }
        .map_err(|e| PolicyError::Validation(format!("encoding {} options: {}", self.kind_name(), e)))?;

        match value {
            Value::Object(map) => Ok(map),
            other => Err(PolicyError::Validation(format!(
                "{} options encoded to non-object {}",
                self.kind_name(),
                other
            ))),
        }
    }

    /// Decode `map` into an option set of the same kind as `self`.
    fn decode_like(&self, map: Map<String, Value>) -> Result<OptionSet, PolicyError> {
        let value = Value::Object(map);
        let decoded = match self {
            OptionSet::Backup(_) => serde_json::from_value(value).map(OptionSet::Backup),
            OptionSet::AuxCopy(_) => serde_json::from_value(value).map(OptionSet::AuxCopy),
        };
        decoded.map_err(|e| PolicyError::Validation(format!("invalid {} options: {}", self.kind_name(), e)))
    }
}

/// A partial option edit: wire field names mapped to new values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionsPatch(Map<String, Value>);

impl OptionsPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one field, builder style.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn from_value(value: Value) -> Result<Self, PolicyError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            other => Err(PolicyError::Validation(format!(
                "options must be a JSON object, got {}",
                other
            ))),
        }
    }
}

impl From<Map<String, Value>> for OptionsPatch {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Sub-task codes a new schedule of a policy type carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubTaskKind {
    pub sub_task_type: i64,
    pub operation_type: i64,
}

impl SubTaskKind {
    pub const fn new(sub_task_type: i64, operation_type: i64) -> Self {
        Self {
            sub_task_type,
            operation_type,
        }
    }
}

/// Everything the builder knows about one policy type.
#[derive(Debug, Clone)]
pub struct OptionTemplate {
    pub sub_task: SubTaskKind,
    /// Keys leading from a subtask's `options` tree to the option object.
    pub path: &'static [&'static str],
    pub defaults: OptionSet,
}

/// Builds complete option sets from defaults, prior values and patches.
#[derive(Debug, Clone, Default)]
pub struct OptionSetBuilder {
    templates: HashMap<PolicyType, OptionTemplate>,
}

impl OptionSetBuilder {
    /// A builder with no policy types registered.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The policy types the authority's schedule policies support today.
    pub fn standard() -> Self {
        Self::empty()
            .with(
                PolicyType::DataProtection,
                OptionTemplate {
                    sub_task: SubTaskKind::new(2, 2),
                    path: &["backupOpts"],
                    defaults: OptionSet::Backup(BackupOptions::default()),
                },
            )
            .with(
                PolicyType::AuxiliaryCopy,
                OptionTemplate {
                    sub_task: SubTaskKind::new(1, 4003),
                    path: &["backupOpts", "mediaOpt", "auxcopyJobOption"],
                    defaults: OptionSet::AuxCopy(AuxCopyOptions::default()),
                },
            )
    }

    /// Register (or replace) the template of a policy type.
    pub fn with(mut self, policy_type: PolicyType, template: OptionTemplate) -> Self {
        self.templates.insert(policy_type, template);
        self
    }

    pub fn supports(&self, policy_type: PolicyType) -> bool {
        self.templates.contains_key(&policy_type)
    }

    pub fn template(&self, policy_type: PolicyType) -> Result<&OptionTemplate, PolicyError> {
        self.templates
            .get(&policy_type)
            .ok_or(PolicyError::UnsupportedPolicyType(policy_type))
    }

    /// Build a complete option set.
    ///
    /// Without `prior` the patch is laid over the type's defaults; with it,
    /// over `prior`, so fields the patch does not name keep their current
    /// values instead of snapping back to defaults.
    pub fn build(
        &self,
        policy_type: PolicyType,
        prior: Option<&OptionSet>,
        patch: &OptionsPatch,
    ) -> Result<OptionSet, PolicyError> {
        let template = self.template(policy_type)?;

        let base = match prior {
            Some(prior) if !prior.same_kind(&template.defaults) => {
                return Err(PolicyError::OptionSetMismatch {
                    policy_type,
                    expected: template.defaults.kind_name(),
                    found: prior.kind_name(),
                });
            }
            Some(prior) => prior,
            None => &template.defaults,
        };

        let mut fields = base.to_map()?;
        for (key, value) in patch.fields() {
            fields.insert(key.clone(), value.clone());
        }
        template.defaults.decode_like(fields)
    }

    /// The full `options` tree for a fresh subtask holding `set`.
    pub fn envelope(&self, policy_type: PolicyType, set: &OptionSet) -> Result<Value, PolicyError> {
        let mut tree = Value::Object(Map::new());
        self.embed(policy_type, &mut tree, set)?;
        Ok(tree)
    }

    /// Write `set` into an existing `options` tree, leaving sibling branches alone.
    pub fn embed(
        &self,
        policy_type: PolicyType,
        tree: &mut Value,
        set: &OptionSet,
    ) -> Result<(), PolicyError> {
        let template = self.template(policy_type)?;
        if !set.same_kind(&template.defaults) {
            return Err(PolicyError::OptionSetMismatch {
                policy_type,
                expected: template.defaults.kind_name(),
                found: set.kind_name(),
            });
        }

        let Some((leaf, parents)) = template.path.split_last() else {
            return Err(PolicyError::Validation(format!(
                "empty option path for {}",
                policy_type
            )));
        };

        let mut node = tree;
        for key in parents {
            node = object_entry(node, key);
        }
        *object_entry(node, leaf) = Value::Object(set.to_map()?);
        Ok(())
    }

    /// Read the option set out of a subtask's `options` tree.
    ///
    /// Fields the tree omits are filled from the type's defaults. Returns
    /// `None` when the tree has no option object at the template's path.
    pub fn extract(
        &self,
        policy_type: PolicyType,
        tree: &Value,
    ) -> Result<Option<OptionSet>, PolicyError> {
        let template = self.template(policy_type)?;

        let mut node = tree;
        for key in template.path {
            match node.get(*key) {
                Some(next) => node = next,
                None => return Ok(None),
            }
        }

        match node {
            Value::Object(fields) => self
                .build(policy_type, None, &OptionsPatch::from(fields.clone()))
                .map(Some),
            Value::Null => Ok(None),
            other => Err(PolicyError::Validation(format!(
                "{} options must be an object, got {}",
                policy_type, other
            ))),
        }
    }
}

/// The child at `key`, replacing a non-object `node` with an empty object first.
fn object_entry<'a>(node: &'a mut Value, key: &str) -> &'a mut Value {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    &mut node[key]
}
