//! Consumer side: submit a task and block until a producer answers.

use std::time::Duration;

use hulse_core::{TaskRequest, TaskResult};
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::frame::FrameReader;
use crate::settings::{Endpoints, NO_CAPACITY_STATUS};
use crate::transport::Transport;

/// Open the consumer channel for `request` and wait for the first result frame.
///
/// With a `deadline`, the whole exchange (connect plus streaming read) is
/// bounded; when it runs out the stream is dropped and
/// [`ClientError::Timeout`] is returned.
pub async fn request_result(
    transport: &dyn Transport,
    endpoints: &Endpoints,
    request: &TaskRequest,
    deadline: Option<Duration>,
) -> Result<TaskResult, ClientError> {
    match deadline {
        Some(limit) => tokio::time::timeout(limit, read_result(transport, endpoints, request))
            .await
            .map_err(|_| {
                warn!(timeout = ?limit, "Query timed out");
                ClientError::Timeout(limit)
            })?,
        None => read_result(transport, endpoints, request).await,
    }
}

async fn read_result(
    transport: &dyn Transport,
    endpoints: &Endpoints,
    request: &TaskRequest,
) -> Result<TaskResult, ClientError> {
    let url = endpoints.consumer_channel(&request.credential);
    let query = query_params(request);

    info!(
        task = request.task.map(|t| t.as_str()).unwrap_or("<inferred>"),
        model = request.model.as_deref().unwrap_or("<default>"),
        "Submitting query"
    );

    let response = transport
        .open_stream(&url, &query, &request.credential)
        .await?;

    if response.status == NO_CAPACITY_STATUS {
        return Err(ClientError::ResourceUnavailable);
    }
    if !response.is_success() {
        return Err(ClientError::Server {
            status: response.status,
        });
    }

    let mut frames = FrameReader::new(response.body);
    while let Some(frame) = frames.next_frame().await? {
        match frame.into_payload() {
            Some(payload) => {
                let result = TaskResult::from_frame(payload);
                info!(
                    qid = %result.correlation_id,
                    lines = frames.lines_read(),
                    "Received query result"
                );
                return Ok(result);
            }
            None => debug!("Skipping empty frame"),
        }
    }

    warn!(lines = frames.lines_read(), "Consumer stream ended without a result");
    Err(ClientError::NoResult)
}

/// Query string for the consumer channel.
///
/// Absent task/model are left out so the server can pick; sequence data is
/// sent as one `data` pair per element.
fn query_params(request: &TaskRequest) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    if let Some(task) = request.task {
        params.push(("task", task.as_str().to_string()));
    }
    for text in request.data.texts() {
        params.push(("data", text.to_string()));
    }
    if let Some(model) = &request.model {
        params.push(("model", model.clone()));
    }
    params
}
