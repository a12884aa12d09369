//! Local HTTP listener that captures the browser login callback.
//!
//! The dashboard redirects the browser to
//! `http://127.0.0.1:4240/?authToken=..&username=..&email=..`. The listener
//! serves that endpoint on a background task, stores the first callback it
//! sees and lets the owner poll for it. Shutdown is cooperative: a
//! cancellation token drives the server's graceful shutdown, and a task that
//! overruns the grace period is aborted.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use hulse_core::LoginCallback;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ClientError;

/// Port the dashboard redirects to.
pub const DEFAULT_CALLBACK_PORT: u16 = 4240;

/// How long `stop` waits for a graceful shutdown before aborting the task.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle of a [`CallbackListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Created, not serving yet.
    Idle,
    /// Serving, nothing captured yet.
    Running,
    /// Serving, callback captured.
    Captured,
    /// Shutdown requested, task not joined yet.
    Cancelled,
    /// Task joined, port released.
    Stopped,
}

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind.
    pub addr: SocketAddr,

    /// Where the browser is sent after a successful callback.
    pub success_url: String,
}

impl ListenerConfig {
    /// Listen on `127.0.0.1:4240`.
    pub fn new(success_url: impl Into<String>) -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_CALLBACK_PORT)),
            success_url: success_url.into(),
        }
    }

    /// Builder method to set the bind address.
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    #[serde(rename = "authToken")]
    auth_token: Option<String>,
    username: Option<String>,
    email: Option<String>,
}

struct CallbackState {
    captured: Arc<OnceLock<LoginCallback>>,
    success_url: String,
}

async fn handle_callback(
    State(state): State<Arc<CallbackState>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let Some(token) = params.auth_token.filter(|t| !t.is_empty()) else {
        warn!("Login callback without authToken");
        return (StatusCode::BAD_REQUEST, "missing authToken").into_response();
    };

    let callback = LoginCallback {
        token,
        username: params.username,
        email: params.email.unwrap_or_default(),
    };
    match state.captured.set(callback) {
        Ok(()) => info!("Login callback captured"),
        Err(_) => debug!("Login callback already captured, keeping the first one"),
    }

    (
        StatusCode::FOUND,
        [(header::LOCATION, state.success_url.clone())],
    )
        .into_response()
}

/// Background HTTP server capturing one login callback.
pub struct CallbackListener {
    config: ListenerConfig,
    captured: Arc<OnceLock<LoginCallback>>,
    state: ListenerState,
    local_addr: Option<SocketAddr>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<io::Result<()>>>,
}

impl CallbackListener {
    /// Create an idle listener.
    pub fn new(config: ListenerConfig) -> Self {
        Self {
            config,
            captured: Arc::new(OnceLock::new()),
            state: ListenerState::Idle,
            local_addr: None,
            shutdown: CancellationToken::new(),
            task: None,
        }
    }

    /// Bind the port and start serving on a background task.
    ///
    /// Fails with [`ClientError::Bind`] if the port is taken and with
    /// [`ClientError::InvalidState`] if this listener was started before.
    pub async fn start(&mut self) -> Result<SocketAddr, ClientError> {
        if self.state != ListenerState::Idle {
            return Err(ClientError::InvalidState("listener can only be started once"));
        }

        let listener = TcpListener::bind(self.config.addr)
            .await
            .map_err(|source| ClientError::Bind {
                addr: self.config.addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let app = Router::new()
            .route("/", get(handle_callback))
            .with_state(Arc::new(CallbackState {
                captured: self.captured.clone(),
                success_url: self.config.success_url.clone(),
            }));

        let shutdown = self.shutdown.clone();
        self.task = Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        }));
        self.local_addr = Some(local_addr);
        self.state = ListenerState::Running;

        info!(addr = %local_addr, "Login callback listener started");
        Ok(local_addr)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ListenerState {
        match self.state {
            ListenerState::Running if self.captured.get().is_some() => ListenerState::Captured,
            state => state,
        }
    }

    /// Bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Non-blocking check for a captured callback.
    ///
    /// Once captured, every call returns the same value.
    pub fn poll(&self) -> Option<LoginCallback> {
        self.captured.get().cloned()
    }

    /// Poll every `interval` until a callback arrives.
    ///
    /// Returns `None` if `deadline` passes first or the server task has
    /// exited.
    pub async fn wait_for_callback(
        &self,
        interval: Duration,
        deadline: Option<Duration>,
    ) -> Option<LoginCallback> {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(interval);

        loop {
            ticker.tick().await;

            if let Some(callback) = self.poll() {
                return Some(callback);
            }
            if self.task.as_ref().map_or(true, JoinHandle::is_finished) {
                warn!("Listener is not running, giving up on callback");
                return self.poll();
            }
            if deadline.is_some_and(|limit| started.elapsed() >= limit) {
                info!("Timed out waiting for login callback");
                return None;
            }
        }
    }

    /// Ask the server to shut down without waiting for it.
    pub fn cancel(&mut self) {
        self.shutdown.cancel();
        if matches!(self.state, ListenerState::Running) {
            self.state = ListenerState::Cancelled;
        }
    }

    /// Shut the server down and wait for its task to exit.
    ///
    /// Calling this on a listener that is already stopped is a no-op.
    pub async fn stop(&mut self) -> Result<(), ClientError> {
        self.cancel();

        let Some(mut task) = self.task.take() else {
            self.state = ListenerState::Stopped;
            return Ok(());
        };

        let joined = match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(grace = ?SHUTDOWN_GRACE, "Listener did not shut down in time, aborting");
                task.abort();
                task.await
            }
        };
        self.state = ListenerState::Stopped;
        info!("Login callback listener stopped");

        match joined {
            Ok(result) => result.map_err(ClientError::Io),
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(ClientError::ThreadControl(e.to_string())),
        }
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
