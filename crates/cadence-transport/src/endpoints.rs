//! REST paths used by the policy engine.

use serde::{Deserialize, Serialize};

/// Relative endpoint paths, joined onto the transport's base URL.
///
/// `policy` may contain a `{id}` placeholder for the policy's task id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    /// Lists every schedule policy.
    pub policies: String,
    /// Fetches one schedule policy by task id.
    pub policy: String,
    /// Creates (POST) or modifies (PUT) a policy task.
    pub task: String,
    /// Enables a task.
    pub enable: String,
    /// Disables a task.
    pub disable: String,
    /// Generic task operation endpoint, used for deletion.
    pub qcommand: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            policies: "SchedulePolicy".to_string(),
            policy: "SchedulePolicy/{id}".to_string(),
            task: "Task".to_string(),
            enable: "Schedules/task/Action/Enable".to_string(),
            disable: "Schedules/task/Action/Disable".to_string(),
            qcommand: "ExecuteQCommand".to_string(),
        }
    }
}

impl Endpoints {
    /// Path for a single policy.
    pub fn policy(&self, id: u64) -> String {
        self.policy.replace("{id}", &id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_path_substitutes_id() {
        let endpoints = Endpoints::default();
        assert_eq!(endpoints.policy(42), "SchedulePolicy/42");
    }

    #[test]
    fn test_partial_override_keeps_defaults() {
        let endpoints: Endpoints =
            serde_json::from_str(r#"{"task": "v2/Task"}"#).unwrap();
        assert_eq!(endpoints.task, "v2/Task");
        assert_eq!(endpoints.policies, "SchedulePolicy");
    }
}
