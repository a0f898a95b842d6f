//! In-memory stand-in for the remote authority.
//!
//! Speaks the same endpoints and envelopes as the real service, applies
//! change flags and subtask operations to its own store, and can be told to
//! reject or drop requests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cadence_policy::{PolicyClient, SchedulePolicyRegistry};
use cadence_transport::{
    Endpoints, Method, RequestBody, Transport, TransportError, TransportResponse,
};
use serde_json::{Value, json};

/// One request as the fake saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub endpoint: String,
    pub body: RequestBody,
}

impl RecordedRequest {
    pub fn json(&self) -> &Value {
        match &self.body {
            RequestBody::Json(v) => v,
            other => panic!("expected JSON body, got {:?}", other),
        }
    }
}

#[derive(Debug, Default)]
struct Store {
    policies: BTreeMap<u64, Value>,
    next_task_id: u64,
    next_sub_task_id: u64,
    requests: Vec<RecordedRequest>,
    reject_next_push: Option<(i64, String)>,
    drop_next_push: bool,
    drop_fetches: usize,
    drop_index_fetches: usize,
    offline: bool,
    strict_deletes: bool,
}

#[derive(Clone, Default)]
pub struct FakeAuthority {
    store: Arc<Mutex<Store>>,
}

fn same_association(a: &Value, b: &Value) -> bool {
    a.get("clientName") == b.get("clientName")
        && a.get("clientGroupName") == b.get("clientGroupName")
}

fn same_app_group(a: &Value, b: &Value) -> bool {
    match (a["appGroupName"].as_str(), b["appGroupName"].as_str()) {
        (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
        _ => false,
    }
}

fn strip_flags(entry: &Value) -> Value {
    let mut entry = entry.clone();
    if let Some(map) = entry.as_object_mut() {
        map.remove("flags");
    }
    entry
}

fn ok(body: Value) -> Result<TransportResponse, TransportError> {
    Ok(TransportResponse::json(200, body))
}

fn rejected(code: i64, message: &str) -> Result<TransportResponse, TransportError> {
    ok(json!({"errorCode": code, "errorMessage": message}))
}

/// Apply flagged entries to `stored`. Returns an error message when a strict
/// delete names an absent entry.
fn apply_flagged(
    stored: &mut Vec<Value>,
    pushed: &[Value],
    same: fn(&Value, &Value) -> bool,
    strict_deletes: bool,
) -> Result<(), String> {
    let mut next = stored.clone();
    for entry in pushed {
        let deleted = entry.pointer("/flags/deleted") == Some(&json!(true));
        let position = next.iter().position(|e| same(e, entry));
        match (deleted, position) {
            (true, Some(i)) => {
                next.remove(i);
            }
            (true, None) if strict_deletes => {
                return Err(format!("entry {} is not associated", strip_flags(entry)));
            }
            (true, None) => {}
            (false, Some(_)) => {}
            (false, None) => next.push(strip_flags(entry)),
        }
    }
    *stored = next;
    Ok(())
}

impl FakeAuthority {
    pub fn new() -> Self {
        let fake = Self::default();
        {
            let mut store = fake.store.lock().unwrap();
            store.next_task_id = 100;
            store.next_sub_task_id = 1000;
        }
        fake
    }

    /// Deleting an entry that is not present is rejected instead of ignored.
    pub fn with_strict_deletes(self) -> Self {
        self.store.lock().unwrap().strict_deletes = true;
        self
    }

    pub fn client(&self) -> PolicyClient {
        PolicyClient::new(Arc::new(self.clone()))
    }

    pub async fn registry(&self) -> SchedulePolicyRegistry {
        SchedulePolicyRegistry::new(self.client()).await.unwrap()
    }

    /// The next create or modify push is answered with this error code.
    pub fn reject_next_push(&self, code: i64, message: &str) {
        self.store.lock().unwrap().reject_next_push = Some((code, message.to_string()));
    }

    /// The next create or modify push fails at the transport level.
    pub fn drop_next_push(&self) {
        self.store.lock().unwrap().drop_next_push = true;
    }

    /// The next `count` policy fetches fail at the transport level.
    pub fn drop_fetches(&self, count: usize) {
        self.store.lock().unwrap().drop_fetches = count;
    }

    /// The next `count` index fetches fail at the transport level.
    pub fn drop_index_fetches(&self, count: usize) {
        self.store.lock().unwrap().drop_index_fetches = count;
    }

    pub fn set_offline(&self, offline: bool) {
        self.store.lock().unwrap().offline = offline;
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.store.lock().unwrap().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.store.lock().unwrap().requests.clear();
    }

    /// The stored `taskInfo` of a policy.
    pub fn stored(&self, id: u64) -> Option<Value> {
        self.store.lock().unwrap().policies.get(&id).cloned()
    }

    /// Insert a policy as if created elsewhere; returns its task id.
    pub fn seed(&self, task_info: Value) -> u64 {
        let mut store = self.store.lock().unwrap();
        store.next_task_id += 1;
        let id = store.next_task_id;
        let mut info = task_info;
        info["task"]["taskId"] = json!(id);
        store.policies.insert(id, info);
        id
    }

    fn handle(
        store: &mut Store,
        method: &Method,
        endpoint: &str,
        body: &RequestBody,
    ) -> Result<TransportResponse, TransportError> {
        let endpoints = Endpoints::default();

        if *method == Method::GET && endpoint == endpoints.policies {
            if store.drop_index_fetches > 0 {
                store.drop_index_fetches -= 1;
                return Err(TransportError::RetriesExhausted {
                    endpoint: endpoint.to_string(),
                    last_error: "connection reset".into(),
                });
            }
            if store.policies.is_empty() {
                return Ok(TransportResponse::from_text(200, String::new()));
            }
            let detail: Vec<Value> = store
                .policies
                .iter()
                .map(|(id, info)| {
                    json!({"task": {"taskId": id, "taskName": info["task"]["taskName"], "policyType": info["task"]["policyType"]}})
                })
                .collect();
            return ok(json!({"taskDetail": detail}));
        }

        if *method == Method::GET {
            if let Some(id) = endpoint
                .strip_prefix("SchedulePolicy/")
                .and_then(|s| s.parse::<u64>().ok())
            {
                if store.drop_fetches > 0 {
                    store.drop_fetches -= 1;
                    return Err(TransportError::RetriesExhausted {
                        endpoint: endpoint.to_string(),
                        last_error: "connection reset".into(),
                    });
                }
                return match store.policies.get(&id) {
                    Some(info) => ok(json!({"taskInfo": info})),
                    None => rejected(2, "Schedule policy not found"),
                };
            }
        }

        if endpoint == endpoints.task && (*method == Method::POST || *method == Method::PUT) {
            if store.drop_next_push {
                store.drop_next_push = false;
                return Err(TransportError::RetriesExhausted {
                    endpoint: endpoint.to_string(),
                    last_error: "connection reset".into(),
                });
            }
            if let Some((code, message)) = store.reject_next_push.take() {
                return rejected(code, &message);
            }
            let RequestBody::Json(body) = body else {
                return Ok(TransportResponse::from_text(400, "expected JSON".into()));
            };
            let info = &body["taskInfo"];
            return if *method == Method::POST {
                Self::create(store, info)
            } else {
                Self::modify(store, info)
            };
        }

        if *method == Method::POST && endpoint == endpoints.qcommand {
            let Some(id) = body_json(body)
                .and_then(|b| b.pointer("/TMMsg_TaskOperationReq/taskEntities/0/taskId"))
                .and_then(Value::as_u64)
            else {
                return rejected(1, "bad request");
            };
            return match store.policies.remove(&id) {
                Some(_) => ok(json!({"errorCode": 0})),
                None => rejected(2, "Task not found"),
            };
        }

        if *method == Method::POST && (endpoint == endpoints.enable || endpoint == endpoints.disable) {
            let RequestBody::Text(text) = body else {
                return rejected(1, "bad request");
            };
            let Some(id) = text
                .strip_prefix("taskId=")
                .and_then(|s| s.parse::<u64>().ok())
            else {
                return rejected(1, "bad request");
            };
            let disabled = endpoint == endpoints.disable;
            return match store.policies.get_mut(&id) {
                Some(info) => {
                    info["task"]["taskFlags"]["disabled"] = json!(disabled);
                    ok(json!({"errorCode": 0}))
                }
                None => rejected(2, "Task not found"),
            };
        }

        Ok(TransportResponse::from_text(404, format!("no route for {} {}", method, endpoint)))
    }

    fn assign_sub_task(store: &mut Store, sub_task: &Value) -> Value {
        store.next_sub_task_id += 1;
        let mut sub_task = sub_task.clone();
        sub_task["subTask"]["subTaskId"] = json!(store.next_sub_task_id);
        sub_task["subTaskOperation"] = json!(1);
        sub_task
    }

    fn create(store: &mut Store, info: &Value) -> Result<TransportResponse, TransportError> {
        let name = info["task"]["taskName"].as_str().unwrap_or_default().to_lowercase();
        let taken = store.policies.values().any(|p| {
            p["task"]["taskName"]
                .as_str()
                .is_some_and(|n| n.to_lowercase() == name)
        });
        if taken {
            return rejected(5, "Schedule policy with the same name already exists");
        }

        store.next_task_id += 1;
        let id = store.next_task_id;

        let mut stored = info.clone();
        stored["task"]["taskId"] = json!(id);
        let associations: Vec<Value> = info["associations"]
            .as_array()
            .map(|a| a.iter().map(strip_flags).collect())
            .unwrap_or_default();
        stored["associations"] = json!(associations);

        let sub_tasks: Vec<Value> = info["subTasks"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .iter()
            .map(|s| Self::assign_sub_task(store, s))
            .collect();
        stored["subTasks"] = json!(sub_tasks);

        store.policies.insert(id, stored);
        ok(json!({"taskId": id}))
    }

    fn modify(store: &mut Store, info: &Value) -> Result<TransportResponse, TransportError> {
        assert_eq!(info["taskOperation"], json!(1), "modify must carry taskOperation 1");

        let Some(id) = info["task"]["taskId"].as_u64() else {
            return rejected(1, "taskId is required");
        };
        let strict = store.strict_deletes;
        let Some(mut stored) = store.policies.get(&id).cloned() else {
            return rejected(2, "Schedule policy not found");
        };

        let mut associations = stored["associations"].as_array().cloned().unwrap_or_default();
        let pushed = info["associations"].as_array().cloned().unwrap_or_default();
        if let Err(message) = apply_flagged(&mut associations, &pushed, same_association, strict) {
            return rejected(7, &message);
        }

        let mut app_groups = stored["appGroup"]["appGroups"].as_array().cloned().unwrap_or_default();
        let pushed = info["appGroup"]["appGroups"].as_array().cloned().unwrap_or_default();
        if let Err(message) = apply_flagged(&mut app_groups, &pushed, same_app_group, strict) {
            return rejected(7, &message);
        }

        let mut sub_tasks = stored["subTasks"].as_array().cloned().unwrap_or_default();
        for pushed in info["subTasks"].as_array().cloned().unwrap_or_default() {
            let existing = sub_tasks
                .iter()
                .position(|s| s["subTask"]["subTaskId"] == pushed["subTask"]["subTaskId"]);
            match (pushed["subTaskOperation"].as_i64(), existing) {
                (Some(2), _) => {
                    let created = Self::assign_sub_task(store, &pushed);
                    sub_tasks.push(created);
                }
                (Some(3), Some(i)) => {
                    sub_tasks.remove(i);
                }
                (Some(3), None) => return rejected(8, "Schedule not found"),
                (_, Some(i)) => sub_tasks[i] = pushed,
                (_, None) => return rejected(8, "Schedule not found"),
            }
        }

        stored["associations"] = json!(associations);
        stored["appGroup"]["appGroups"] = json!(app_groups);
        stored["subTasks"] = json!(sub_tasks);
        store.policies.insert(id, stored);
        ok(json!({"errorCode": 0, "errorMessage": ""}))
    }
}

fn body_json(body: &RequestBody) -> Option<&Value> {
    match body {
        RequestBody::Json(v) => Some(v),
        _ => None,
    }
}

#[async_trait]
impl Transport for FakeAuthority {
    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: RequestBody,
    ) -> Result<TransportResponse, TransportError> {
        let mut store = self.store.lock().unwrap();
        store.requests.push(RecordedRequest {
            method: method.clone(),
            endpoint: endpoint.to_string(),
            body: body.clone(),
        });

        if store.offline {
            return Err(TransportError::RetriesExhausted {
                endpoint: endpoint.to_string(),
                last_error: "connection refused".into(),
            });
        }
        Self::handle(&mut store, &method, endpoint, &body)
    }
}
