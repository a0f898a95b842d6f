//! Wire envelopes of the authority's task API.
//!
//! Field names here are the authority's and must not change. Every struct
//! keeps the fields it does not model in a flattened `extra` map so that a
//! fetched policy can be pushed back without losing server-owned data.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::pattern::Pattern;
use crate::{AppGroup, Association, PendingOp, PolicyError, PolicyType, SubTaskId};

/// `taskType` of a schedule policy.
pub(crate) const TASK_TYPE_SCHEDULE_POLICY: i64 = 4;
/// `initiatedFrom` for requests made through the API.
pub(crate) const INITIATED_FROM_API: i64 = 2;
/// `taskOperation` of a modify push.
pub(crate) const TASK_OPERATION_MODIFY: i64 = 1;
/// `opType` of a task deletion through the qcommand endpoint.
const QCOMMAND_OP_DELETE: i64 = 3;
/// `_type_` of a task entity.
const ENTITY_TYPE_TASK: i64 = 69;

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts ids sent as numbers or numeric strings.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("invalid id {}", n))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("invalid id '{}'", s))),
        Some(other) => Err(D::Error::custom(format!("invalid id {}", other))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfoEnvelope {
    pub task_info: TaskInfo,
}

/// The full aggregate as the authority stores it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_operation: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub associations: Vec<Association>,
    #[serde(default)]
    pub task: TaskMeta,
    #[serde(default, deserialize_with = "null_as_default")]
    pub app_group: AppGroupEnvelope,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sub_tasks: Vec<SubTaskEnvelope>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppGroupEnvelope {
    #[serde(default, deserialize_with = "null_as_default")]
    pub app_groups: Vec<AppGroup>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Policy metadata (`taskInfo.task`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMeta {
    #[serde(
        default,
        deserialize_with = "lenient_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub task_id: Option<u64>,
    #[serde(default)]
    pub task_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_type: Option<PolicyType>,
    #[serde(default)]
    pub task_flags: TaskFlags,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskMeta {
    /// Metadata of a policy about to be created.
    pub fn new_policy(name: &str, policy_type: PolicyType) -> Self {
        let mut extra = Map::new();
        extra.insert("description".into(), Value::String(String::new()));
        extra.insert("initiatedFrom".into(), INITIATED_FROM_API.into());
        extra.insert("securityAssociations".into(), Value::Object(Map::new()));
        extra.insert("taskSecurity".into(), Value::Object(Map::new()));
        extra.insert("alert".into(), serde_json::json!({"alertName": ""}));

        let mut flag_extra = Map::new();
        flag_extra.insert("isEdgeDrive".into(), Value::Bool(false));

        Self {
            task_id: None,
            task_name: name.to_string(),
            task_type: Some(TASK_TYPE_SCHEDULE_POLICY),
            policy_type: Some(policy_type),
            task_flags: TaskFlags {
                disabled: false,
                extra: flag_extra,
            },
            extra,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFlags {
    #[serde(default)]
    pub disabled: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One schedule as carried in `taskInfo.subTasks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTaskEnvelope {
    #[serde(default)]
    pub sub_task_operation: PendingOp,
    pub sub_task: SubTask,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub options: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<Pattern>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_task_id: Option<SubTaskId>,
    #[serde(default)]
    pub sub_task_name: String,
    #[serde(default)]
    pub sub_task_type: i64,
    #[serde(default)]
    pub operation_type: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of the policy list endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TaskList {
    #[serde(deserialize_with = "null_as_default")]
    pub task_detail: Vec<TaskDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TaskDetail {
    pub task: TaskSummary,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TaskSummary {
    pub task_name: String,
    #[serde(default, deserialize_with = "lenient_id")]
    pub task_id: Option<u64>,
}

/// Body of a task deletion request.
pub(crate) fn delete_task_request(task_id: u64) -> Value {
    serde_json::json!({
        "TMMsg_TaskOperationReq": {
            "opType": QCOMMAND_OP_DELETE,
            "taskEntities": [{"_type_": ENTITY_TYPE_TASK, "taskId": task_id}]
        }
    })
}

fn error_code(body: &Value) -> Option<i64> {
    match body.get("errorCode")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn rejected(body: &Value, code: i64) -> PolicyError {
    let message = body
        .get("errorMessage")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    PolicyError::RemoteRejected { code, message }
}

/// Interpret the reply to a create or modify push.
///
/// A body naming a `taskId` is success; otherwise `errorCode` decides.
pub(crate) fn check_task_response(body: Option<&Value>) -> Result<(), PolicyError> {
    let body = body.ok_or_else(|| PolicyError::RemoteUnavailable("empty response".into()))?;

    if body.get("taskId").is_some_and(|id| !id.is_null()) {
        return Ok(());
    }
    match error_code(body) {
        Some(0) => Ok(()),
        Some(code) => Err(rejected(body, code)),
        None => Err(PolicyError::RemoteUnavailable(format!(
            "unexpected response: {}",
            body
        ))),
    }
}

/// Interpret the reply to a delete, enable or disable request.
///
/// A missing `errorCode` is read as success.
pub(crate) fn check_ack(body: Option<&Value>) -> Result<(), PolicyError> {
    let body = body.ok_or_else(|| PolicyError::RemoteUnavailable("empty response".into()))?;

    match error_code(body) {
        None | Some(0) => Ok(()),
        Some(code) => Err(rejected(body, code)),
    }
}
