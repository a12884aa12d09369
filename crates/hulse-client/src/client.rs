//! `HulseClient`: the entry point for submitting tasks and hosting compute.

use std::sync::Arc;
use std::time::Duration;

use hulse_core::{TaskData, TaskRequest, TaskResult};
use tracing::debug;

use crate::consumer;
use crate::error::ClientError;
use crate::producer::{InferenceEngine, ProducerLoop};
use crate::settings::Endpoints;
use crate::transport::{HttpTransport, Transport};

/// Client for the Hulse stream server.
///
/// Holds the API key and the endpoints. Each `query` runs on the caller's
/// task and shares nothing mutable with other queries, so a client can be
/// cloned freely across tasks.
#[derive(Clone)]
pub struct HulseClient {
    transport: Arc<dyn Transport>,
    endpoints: Endpoints,
    credential: Option<String>,
    timeout: Option<Duration>,
}

impl HulseClient {
    /// Create a client using HTTP and the given endpoints.
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            transport: Arc::new(HttpTransport::new()),
            endpoints,
            credential: None,
            timeout: None,
        }
    }

    /// Builder method to set the API key.
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        let credential: String = credential.into();
        self.set_credential(Some(credential.as_str()));
        self
    }

    /// Builder method to swap the transport.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Builder method to bound how long `query` waits for a result.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Replace the API key. Empty or absent input leaves it unchanged.
    pub fn set_credential(&mut self, credential: Option<&str>) {
        match credential {
            Some(key) if !key.is_empty() => self.credential = Some(key.to_string()),
            _ => debug!("Ignoring empty credential"),
        }
    }

    /// Current API key.
    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    /// Endpoints this client talks to.
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Run a task on whichever producer the server matches and return its result.
    ///
    /// `task` must be one of [`hulse_core::SUPPORTED_TASKS`]; that check
    /// happens before any network I/O. `None` lets the server infer the task.
    pub async fn query(
        &self,
        task: Option<&str>,
        model: Option<&str>,
        data: impl Into<TaskData>,
    ) -> Result<TaskResult, ClientError> {
        let data = data.into();
        // Validate the task even when the credential is missing.
        if let Some(task) = task {
            task.parse::<hulse_core::TaskKind>()?;
        }
        let credential = self
            .credential
            .as_deref()
            .ok_or(ClientError::MissingCredential)?;

        let request = TaskRequest::new(task, model, data, credential)?;
        consumer::request_result(
            self.transport.as_ref(),
            &self.endpoints,
            &request,
            self.timeout,
        )
        .await
    }

    /// Build a producer loop serving tasks with `engine` under this client's key.
    pub fn host(&self, engine: Arc<dyn InferenceEngine>) -> Result<ProducerLoop, ClientError> {
        let credential = self
            .credential
            .clone()
            .ok_or(ClientError::MissingCredential)?;

        Ok(ProducerLoop::new(
            self.transport.clone(),
            self.endpoints.clone(),
            credential,
            engine,
        ))
    }
}
