//! Schedule policy engine for Cadence.
//!
//! A schedule policy is a named bundle of recurring-job schedules attached to
//! many clients, client groups and application groups at once. This crate
//! keeps a local working copy of each policy, lets callers edit it, and
//! pushes every edit to the remote authority as one operation-coded request
//! before reloading the authoritative state.
//!
//! ## Features
//!
//! - **Option builder**: per-policy-type defaults and merge rules, table driven
//! - **Schedules**: pattern and option edits that never reset untouched fields
//! - **Policies**: push-then-refresh mutators with no partial local mutation
//! - **Registry**: create, look up, enumerate and delete policies by name

mod client;
mod error;
pub mod options;
pub mod pattern;
mod policy;
mod registry;
mod schedule;
mod types;
pub mod wire;

pub use client::PolicyClient;
pub use error::{ErrorKind, PolicyError};
pub use options::{
    AuxCopyOptions, BackupLevel, BackupOptions, MediaAgentRef, OptionSet, OptionSetBuilder,
    OptionTemplate, OptionsPatch, SubTaskKind,
};
pub use pattern::{OverlayCompiler, Pattern, PatternCompiler, PatternError, PatternSpec};
pub use policy::{PolicyState, SchedulePolicy, ScheduleSummary};
pub use registry::{NewPolicy, NewSchedule, SchedulePolicyRegistry};
pub use schedule::Schedule;
pub use types::{
    AppGroup, Association, AssociationTarget, ChangeFlags, OperationCode, PendingOp, PolicyType,
    ScheduleSelector, SubTaskId,
};
