//! Schedule policy types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::PolicyError;

/// What kind of job a policy schedules.
///
/// Serialized as the authority's numeric `policyType` code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum PolicyType {
    DataProtection,
    AuxiliaryCopy,
    PrimaryStorageReports,
    BackupCopy,
    SrmDataCollection,
    SubclientFilterReport,
    OfflineContentIndexing,
    InstallUpdates,
    NetworkThrottle,
}

impl PolicyType {
    /// Every policy type, in wire-code order.
    pub const ALL: [PolicyType; 9] = [
        PolicyType::DataProtection,
        PolicyType::AuxiliaryCopy,
        PolicyType::PrimaryStorageReports,
        PolicyType::BackupCopy,
        PolicyType::SrmDataCollection,
        PolicyType::SubclientFilterReport,
        PolicyType::OfflineContentIndexing,
        PolicyType::InstallUpdates,
        PolicyType::NetworkThrottle,
    ];

    /// Numeric wire code.
    pub fn code(self) -> i64 {
        match self {
            PolicyType::DataProtection => 0,
            PolicyType::AuxiliaryCopy => 1,
            PolicyType::PrimaryStorageReports => 2,
            PolicyType::BackupCopy => 3,
            PolicyType::SrmDataCollection => 4,
            PolicyType::SubclientFilterReport => 5,
            PolicyType::OfflineContentIndexing => 6,
            PolicyType::InstallUpdates => 7,
            PolicyType::NetworkThrottle => 8,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    /// Name as shown by the authority's console.
    pub fn display_name(self) -> &'static str {
        match self {
            PolicyType::DataProtection => "Data Protection",
            PolicyType::AuxiliaryCopy => "Auxiliary Copy",
            PolicyType::PrimaryStorageReports => "Primary Storage Reports",
            PolicyType::BackupCopy => "Backup Copy",
            PolicyType::SrmDataCollection => "SRM Data Collection",
            PolicyType::SubclientFilterReport => "Subclient Filter for BackupJob Report",
            PolicyType::OfflineContentIndexing => "Offline Content Indexing",
            PolicyType::InstallUpdates => "Install Updates",
            PolicyType::NetworkThrottle => "Network Throttle",
        }
    }
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl TryFrom<i64> for PolicyType {
    type Error = String;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or_else(|| format!("unknown policy type code {}", code))
    }
}

impl From<PolicyType> for i64 {
    fn from(t: PolicyType) -> Self {
        t.code()
    }
}

impl FromStr for PolicyType {
    type Err = PolicyError;

    /// Accepts display names and their kebab/snake/compact spellings, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        fn squash(s: &str) -> String {
            s.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .map(|c| c.to_ascii_lowercase())
                .collect()
        }

        let wanted = squash(s);
        Self::ALL
            .into_iter()
            .find(|t| squash(t.display_name()) == wanted || squash(&format!("{:?}", t)) == wanted)
            .ok_or_else(|| PolicyError::Validation(format!("unknown policy type '{}'", s)))
    }
}

/// How the authority should apply a pushed collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OperationCode {
    /// Push entries without change flags.
    #[default]
    None = 0,
    /// The pushed list becomes the complete set.
    Overwrite = 1,
    /// Merge the pushed entries into the set.
    Update = 2,
    /// Remove exactly the pushed entries.
    Delete = 3,
}

impl OperationCode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl FromStr for OperationCode {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(OperationCode::None),
            "overwrite" => Ok(OperationCode::Overwrite),
            "update" | "add" | "include" => Ok(OperationCode::Update),
            "delete" | "remove" | "deleted" => Ok(OperationCode::Delete),
            _ => Err(PolicyError::Validation(format!(
                "unknown operation '{}', expected overwrite, update or delete",
                s
            ))),
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Per-entry change flags, the textual wire form of an [`OperationCode`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeFlags {
    #[serde(default, skip_serializing_if = "is_false")]
    pub include: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub exclude: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChangeFlags {
    pub fn include() -> Self {
        Self {
            include: true,
            ..Default::default()
        }
    }

    pub fn deleted() -> Self {
        Self {
            deleted: true,
            ..Default::default()
        }
    }
}

/// Lifecycle marker of a schedule since the last reconciliation.
///
/// Serialized as `subTaskOperation`: 1 unchanged, 2 create, 3 delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum PendingOp {
    #[default]
    None,
    Create,
    Delete,
}

impl TryFrom<i64> for PendingOp {
    type Error = String;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(PendingOp::None),
            2 => Ok(PendingOp::Create),
            3 => Ok(PendingOp::Delete),
            other => Err(format!("unknown subTaskOperation {}", other)),
        }
    }
}

impl From<PendingOp> for i64 {
    fn from(op: PendingOp) -> Self {
        match op {
            PendingOp::None => 1,
            PendingOp::Create => 2,
            PendingOp::Delete => 3,
        }
    }
}

/// Server-assigned schedule (subtask) id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubTaskId(pub u64);

impl fmt::Display for SubTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What an association points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AssociationTarget {
    Client(String),
    ClientGroup(String),
}

/// A policy's attachment to a client or client group.
///
/// Entries read back from the authority can carry more identifying fields
/// than a client or group name; those are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Association {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<ChangeFlags>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Association {
    pub fn client(name: impl Into<String>) -> Self {
        Self {
            client_name: Some(name.into()),
            client_group_name: None,
            flags: None,
            extra: Map::new(),
        }
    }

    pub fn client_group(name: impl Into<String>) -> Self {
        Self {
            client_name: None,
            client_group_name: Some(name.into()),
            flags: None,
            extra: Map::new(),
        }
    }

    pub fn target(&self) -> Option<AssociationTarget> {
        match (&self.client_name, &self.client_group_name) {
            (Some(c), None) => Some(AssociationTarget::Client(c.clone())),
            (None, Some(g)) => Some(AssociationTarget::ClientGroup(g.clone())),
            _ => None,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), PolicyError> {
        if self.client_name.is_some() && self.client_group_name.is_some() {
            return Err(PolicyError::Validation(format!(
                "association names both client '{}' and client group '{}'",
                self.client_name.as_deref().unwrap_or_default(),
                self.client_group_name.as_deref().unwrap_or_default()
            )));
        }
        if self.target().is_none() && self.extra.is_empty() {
            return Err(PolicyError::Validation(
                "association names no target".to_string(),
            ));
        }
        Ok(())
    }
}

/// A policy's attachment to an application-type group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppGroup {
    #[serde(default)]
    pub app_group_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<ChangeFlags>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AppGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            app_group_name: name.into(),
            flags: None,
            extra: Map::new(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), PolicyError> {
        if self.app_group_name.trim().is_empty() {
            return Err(PolicyError::Validation(
                "app group name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// An entry of a collection edited through change flags.
pub(crate) trait FlaggedEntry: Clone {
    fn set_flags(&mut self, flags: Option<ChangeFlags>);

    /// Whether both entries refer to the same remote object.
    fn same_entry(&self, other: &Self) -> bool;
}

impl FlaggedEntry for Association {
    fn set_flags(&mut self, flags: Option<ChangeFlags>) {
        self.flags = flags;
    }

    fn same_entry(&self, other: &Self) -> bool {
        match (self.target(), other.target()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.extra == other.extra,
            _ => false,
        }
    }
}

impl FlaggedEntry for AppGroup {
    fn set_flags(&mut self, flags: Option<ChangeFlags>) {
        self.flags = flags;
    }

    fn same_entry(&self, other: &Self) -> bool {
        self.app_group_name.eq_ignore_ascii_case(&other.app_group_name)
    }
}

/// Selects one schedule of a policy by id or by name.
///
/// Exactly one of the two must be set; see [`ScheduleSelector::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleSelector {
    pub id: Option<SubTaskId>,
    pub name: Option<String>,
}

impl ScheduleSelector {
    pub fn by_id(id: SubTaskId) -> Self {
        Self {
            id: Some(id),
            name: None,
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: Some(name.into()),
        }
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        match (&self.id, &self.name) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            _ => Err(PolicyError::AmbiguousSelector),
        }
    }
}

impl fmt::Display for ScheduleSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.id, &self.name) {
            (Some(id), None) => write!(f, "id {}", id),
            (None, Some(name)) => write!(f, "name '{}'", name),
            _ => f.write_str("<ambiguous selector>"),
        }
    }
}
