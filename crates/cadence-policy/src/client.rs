//! Shared plumbing between the registry and policy objects.

use std::collections::BTreeMap;
use std::sync::Arc;

use cadence_transport::{Endpoints, Method, RequestBody, Transport, TransportResponse};
use tracing::debug;

use crate::PolicyError;
use crate::options::OptionSetBuilder;
use crate::pattern::{OverlayCompiler, PatternCompiler};
use crate::wire::{self, TaskInfo, TaskInfoEnvelope, TaskList};

/// Handle on the remote authority plus the collaborators every policy
/// operation needs. Cheap to clone.
#[derive(Clone)]
pub struct PolicyClient {
    transport: Arc<dyn Transport>,
    compiler: Arc<dyn PatternCompiler>,
    builder: Arc<OptionSetBuilder>,
    endpoints: Arc<Endpoints>,
}

impl PolicyClient {
    /// A client with the standard option table, default endpoints and the
    /// overlay pattern compiler.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            compiler: Arc::new(OverlayCompiler),
            builder: Arc::new(OptionSetBuilder::standard()),
            endpoints: Arc::new(Endpoints::default()),
        }
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn PatternCompiler>) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn with_builder(mut self, builder: OptionSetBuilder) -> Self {
        self.builder = Arc::new(builder);
        self
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = Arc::new(endpoints);
        self
    }

    pub fn compiler(&self) -> &dyn PatternCompiler {
        self.compiler.as_ref()
    }

    pub fn builder(&self) -> &OptionSetBuilder {
        &self.builder
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Send one request; a non-2xx status is [`PolicyError::RemoteUnavailable`].
    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        body: RequestBody,
    ) -> Result<TransportResponse, PolicyError> {
        let response = self.transport.request(method.clone(), endpoint, body).await?;
        if !response.ok {
            return Err(PolicyError::RemoteUnavailable(format!(
                "{} {} returned {}: {}",
                method,
                endpoint,
                response.status,
                response.text.trim()
            )));
        }
        Ok(response)
    }

    /// Fetch the name→id index of every policy. Names are lowercased.
    pub(crate) async fn list_policies(&self) -> Result<BTreeMap<String, u64>, PolicyError> {
        let response = self
            .send(Method::GET, &self.endpoints.policies, RequestBody::Empty)
            .await?;

        let Some(body) = response.non_empty_json() else {
            return Ok(BTreeMap::new());
        };
        let list: TaskList = serde_json::from_value(body.clone()).map_err(|e| {
            PolicyError::RemoteUnavailable(format!("malformed policy list: {}", e))
        })?;

        Ok(list
            .task_detail
            .into_iter()
            .filter_map(|detail| {
                let id = detail.task.task_id?;
                Some((detail.task.task_name.to_lowercase(), id))
            })
            .collect())
    }

    /// Fetch the full aggregate of one policy.
    pub(crate) async fn fetch_task(&self, id: u64) -> Result<TaskInfo, PolicyError> {
        let response = self
            .send(Method::GET, &self.endpoints.policy(id), RequestBody::Empty)
            .await?;

        let body = response
            .json
            .filter(|body| body.get("taskInfo").is_some())
            .ok_or_else(|| {
                PolicyError::RemoteUnavailable(format!("policy {} response has no taskInfo", id))
            })?;

        let envelope: TaskInfoEnvelope = serde_json::from_value(body).map_err(|e| {
            PolicyError::RemoteUnavailable(format!("malformed policy {}: {}", id, e))
        })?;
        Ok(envelope.task_info)
    }

    /// Create (`POST`) or modify (`PUT`) a policy task.
    pub(crate) async fn push_task(&self, method: Method, info: TaskInfo) -> Result<(), PolicyError> {
        let body = serde_json::to_value(TaskInfoEnvelope { task_info: info }).map_err(|e| {
            PolicyError::Validation(format!("policy could not be encoded: {}", e))
        })?;
        debug!(endpoint = %self.endpoints.task, "pushing policy task");

        let response = self
            .send(method, &self.endpoints.task, RequestBody::Json(body))
            .await?;
        wire::check_task_response(response.json.as_ref())
    }

    pub(crate) async fn delete_task(&self, id: u64) -> Result<(), PolicyError> {
        let response = self
            .send(
                Method::POST,
                &self.endpoints.qcommand,
                RequestBody::Json(wire::delete_task_request(id)),
            )
            .await?;
        wire::check_ack(response.json.as_ref())
    }

    pub(crate) async fn set_enabled(&self, id: u64, enabled: bool) -> Result<(), PolicyError> {
        let endpoint = if enabled {
            &self.endpoints.enable
        } else {
            &self.endpoints.disable
        };
        let response = self
            .send(Method::POST, endpoint, RequestBody::Text(format!("taskId={}", id)))
            .await?;
        wire::check_ack(response.json.as_ref())
    }
}

impl std::fmt::Debug for PolicyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyClient")
            .field("builder", &self.builder)
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}
