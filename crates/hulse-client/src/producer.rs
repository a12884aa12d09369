//! Producer side: hold the producer channel open and serve task frames.
//!
//! Each task frame is run on the local [`InferenceEngine`] and its best
//! result posted back to the stream server. A frame that cannot be served is
//! logged and skipped; only the channel itself going away ends the loop.

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hulse_core::{CoreError, QueryId, TaskData, TaskKind};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{ClientError, InferenceError};
use crate::frame::{FrameReader, StreamFrame};
use crate::settings::Endpoints;
use crate::transport::Transport;

/// Local inference capability a host offers.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Run `task` (optionally with a specific `model`) on `data`.
    ///
    /// Engines may return a list of candidates, best first, or a single value.
    async fn infer(
        &self,
        task: TaskKind,
        model: Option<&str>,
        data: &TaskData,
    ) -> Result<Value, InferenceError>;
}

/// Counters for one producer connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    /// Non-empty frames received, undecodable ones included.
    pub frames: u64,
    /// Results accepted by the server.
    pub posted: u64,
    /// Frames dropped without posting.
    pub skipped: u64,
    /// Results the server refused or that failed to send.
    pub failed_posts: u64,
}

#[derive(Default)]
struct Counters {
    frames: AtomicU64,
    posted: AtomicU64,
    skipped: AtomicU64,
    failed_posts: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> HostStats {
        HostStats {
            frames: self.frames.load(Ordering::SeqCst),
            posted: self.posted.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            failed_posts: self.failed_posts.load(Ordering::SeqCst),
        }
    }
}

/// Why a frame was dropped.
#[derive(Debug, Error)]
enum FrameSkip {
    #[error("malformed task frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame has no usable qid")]
    MissingQid,

    #[error(transparent)]
    Unsupported(#[from] CoreError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("engine returned an empty result")]
    EmptyResult,
}

#[derive(Debug, Deserialize)]
struct RawAssignment {
    qid: Value,
    task: String,
    #[serde(default)]
    model: Option<String>,
    data: TaskData,
}

/// A task forwarded to this host.
#[derive(Debug)]
struct Assignment {
    qid: QueryId,
    task: TaskKind,
    model: Option<String>,
    data: TaskData,
}

impl Assignment {
    fn from_frame(frame: Value) -> Result<Self, FrameSkip> {
        let raw: RawAssignment = serde_json::from_value(frame)?;
        let qid = QueryId::from_json(&raw.qid).ok_or(FrameSkip::MissingQid)?;
        Ok(Self {
            qid,
            task: raw.task.parse()?,
            model: raw.model,
            data: raw.data,
        })
    }
}

/// Runs assignments and posts their results. Cheap to clone into tasks.
#[derive(Clone)]
struct Executor {
    transport: Arc<dyn Transport>,
    engine: Arc<dyn InferenceEngine>,
    result_url: Arc<str>,
    credential: Arc<str>,
    counters: Arc<Counters>,
}

impl Executor {
    async fn execute(&self, assignment: Assignment) {
        let qid = assignment.qid.clone();
        debug!(qid = %qid, task = %assignment.task, "Running task");

        let best = match self.infer(assignment).await {
            Ok(best) => best,
            Err(e) => {
                warn!(qid = %qid, error = %e, "Skipping task");
                self.counters.skipped.fetch_add(1, Ordering::SeqCst);
                return;
            }
        };

        let form = [("result", best.to_string()), ("qid", qid.to_string())];
        match self
            .transport
            .post_form(&self.result_url, &form, &self.credential)
            .await
        {
            Ok(status) if (200..300).contains(&status) => {
                info!(qid = %qid, "Result posted");
                self.counters.posted.fetch_add(1, Ordering::SeqCst);
            }
            Ok(status) => {
                warn!(qid = %qid, status = status, "Server rejected result");
                self.counters.failed_posts.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                warn!(qid = %qid, error = %e, "Failed to post result");
                self.counters.failed_posts.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    async fn infer(&self, assignment: Assignment) -> Result<Value, FrameSkip> {
        let output = self
            .engine
            .infer(assignment.task, assignment.model.as_deref(), &assignment.data)
            .await?;
        best_result(output).ok_or(FrameSkip::EmptyResult)
    }
}

/// First candidate of a list, or the value itself.
fn best_result(output: Value) -> Option<Value> {
    match output {
        Value::Array(items) => items.into_iter().next(),
        Value::Null => None,
        other => Some(other),
    }
}

/// Long-lived loop serving the producer channel of one credential.
pub struct ProducerLoop {
    transport: Arc<dyn Transport>,
    endpoints: Endpoints,
    credential: String,
    engine: Arc<dyn InferenceEngine>,
    max_concurrent: usize,
    counters: Arc<Counters>,
}

impl ProducerLoop {
    /// Create a loop that runs one task at a time.
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoints: Endpoints,
        credential: impl Into<String>,
        engine: Arc<dyn InferenceEngine>,
    ) -> Self {
        Self {
            transport,
            endpoints,
            credential: credential.into(),
            engine,
            max_concurrent: 1,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Allow up to `n` tasks to run at once.
    ///
    /// Frames are still dispatched in arrival order, but results may be
    /// posted out of order. Values below 1 are treated as 1.
    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n.max(1);
        self
    }

    /// Counters accumulated across every `run` of this loop.
    pub fn stats(&self) -> HostStats {
        self.counters.snapshot()
    }

    /// Serve the producer channel until it closes.
    ///
    /// Never returns `Ok`: a clean end of stream or a read error yields
    /// [`ClientError::ConnectionClosed`], a refused connection yields
    /// [`ClientError::Server`]. Reconnecting is up to the caller.
    pub async fn run(&self) -> Result<Infallible, ClientError> {
        let url = self.endpoints.producer_channel(&self.credential);
        info!(
            url = %url,
            max_concurrent = self.max_concurrent,
            "Connecting to producer channel"
        );

        let response = self
            .transport
            .open_stream(&url, &[], &self.credential)
            .await?;
        if !response.is_success() {
            return Err(ClientError::Server {
                status: response.status,
            });
        }

        info!("Connected, waiting for tasks");

        let executor = Executor {
            transport: self.transport.clone(),
            engine: self.engine.clone(),
            result_url: self.endpoints.result_url().into(),
            credential: self.credential.as_str().into(),
            counters: self.counters.clone(),
        };
        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let mut in_flight = JoinSet::new();
        let mut frames = FrameReader::new(response.body);

        loop {
            let frame = match frames.next_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!("Producer stream closed by server");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Producer stream error");
                    break;
                }
            };

            if frame == StreamFrame::Malformed {
                warn!(line = frames.lines_read(), "Skipping undecodable frame");
                self.counters.frames.fetch_add(1, Ordering::SeqCst);
                self.counters.skipped.fetch_add(1, Ordering::SeqCst);
                continue;
            }
            let Some(payload) = frame.into_payload() else {
                continue;
            };
            self.counters.frames.fetch_add(1, Ordering::SeqCst);

            let assignment = match Assignment::from_frame(payload) {
                Ok(assignment) => assignment,
                Err(e) => {
                    warn!(error = %e, "Skipping frame");
                    self.counters.skipped.fetch_add(1, Ordering::SeqCst);
                    continue;
                }
            };

            info!(
                qid = %assignment.qid,
                task = %assignment.task,
                model = assignment.model.as_deref().unwrap_or("<default>"),
                "Received task"
            );

            if self.max_concurrent == 1 {
                executor.execute(assignment).await;
                continue;
            }

            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let executor = executor.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                executor.execute(assignment).await;
            });
            while in_flight.try_join_next().is_some() {}
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Task execution panicked");
            }
        }

        let stats = self.stats();
        info!(
            frames = stats.frames,
            posted = stats.posted,
            skipped = stats.skipped,
            failed_posts = stats.failed_posts,
            "Producer loop ended"
        );
        Err(ClientError::ConnectionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use crate::transport::HttpTransport;
    use axum::extract::{Path, State};
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Form, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    /// Classifies everything as POSITIVE, fails on "boom".
    #[derive(Default)]
    struct StubEngine {
        seen: Mutex<Vec<(TaskKind, Option<String>, TaskData)>>,
    }

    #[async_trait]
    impl InferenceEngine for StubEngine {
        async fn infer(
            &self,
            task: TaskKind,
            model: Option<&str>,
            data: &TaskData,
        ) -> Result<Value, InferenceError> {
            self.seen
                .lock()
                .unwrap()
                .push((task, model.map(str::to_owned), data.clone()));
            if data.texts() == vec!["boom"] {
                return Err(InferenceError::Failed("model crashed".into()));
            }
            Ok(json!([
                { "label": "POSITIVE", "score": 0.98 },
                { "label": "NEGATIVE", "score": 0.02 }
            ]))
        }
    }

    fn task_frame(qid: &str, data: &str) -> String {
        format!(r#"data: {{"qid":"{qid}","task":"text-classification","data":"{data}"}}"#)
    }

    fn producer(transport: Arc<ScriptedTransport>, engine: Arc<StubEngine>) -> ProducerLoop {
        ProducerLoop::new(
            transport,
            Endpoints::single("http://stream"),
            "key-1",
            engine,
        )
    }

    #[tokio::test]
    async fn test_posts_best_result() {
        let frame = task_frame("q1", "I love this");
        let transport = Arc::new(ScriptedTransport::new().respond(200, &[frame.as_str()]));
        let engine = Arc::new(StubEngine::default());
        let host = producer(transport.clone(), engine);

        let err = host.run().await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));

        let opened = transport.opened();
        assert_eq!(opened[0].url, "http://stream/producer/key-1/");

        let posted = transport.posted();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].url, "http://stream/result/");
        assert_eq!(posted[0].credential, "key-1");
        let result = posted[0].form.iter().find(|(k, _)| k == "result").unwrap();
        let qid = posted[0].form.iter().find(|(k, _)| k == "qid").unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&result.1).unwrap(),
            json!({ "label": "POSITIVE", "score": 0.98 })
        );
        assert_eq!(qid.1, "q1");
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let good = task_frame("q1", "fine");
        let transport = Arc::new(
            ScriptedTransport::new().respond(200, &[good.as_str(), r#"data: {"qid": "q2", "task""#]),
        );
        let host = producer(transport.clone(), Arc::new(StubEngine::default()));

        host.run().await.unwrap_err();
        assert_eq!(transport.posted().len(), 1);
        assert_eq!(host.stats().skipped, 1);
    }

    #[tokio::test]
    async fn test_loop_survives_bad_frames() {
        let first = task_frame("q1", "fine");
        let third = task_frame("q3", "also fine");
        let transport = Arc::new(ScriptedTransport::new().respond(
            200,
            &[
                first.as_str(),
                "data: {not json",
                r#"data: {"qid":"q2","task":"image-segmentation","data":"x"}"#,
                r#"data: {"qid":"q4","data":"missing task"}"#,
                third.as_str(),
            ],
        ));
        let host = producer(transport.clone(), Arc::new(StubEngine::default()));

        host.run().await.unwrap_err();

        let qids: Vec<String> = transport
            .posted()
            .iter()
            .map(|p| p.form.iter().find(|(k, _)| k == "qid").unwrap().1.clone())
            .collect();
        assert_eq!(qids, vec!["q1", "q3"]);

        let stats = host.stats();
        assert_eq!(stats.frames, 5);
        assert_eq!(stats.posted, 2);
        assert_eq!(stats.skipped, 3);
    }

    #[tokio::test]
    async fn test_inference_failure_skips_post() {
        let first = task_frame("q1", "fine");
        let failing = task_frame("q2", "boom");
        let transport = Arc::new(
            ScriptedTransport::new().respond(200, &[first.as_str(), failing.as_str()]),
        );
        let host = producer(transport.clone(), Arc::new(StubEngine::default()));

        host.run().await.unwrap_err();

        // No stale resend of q1's result under q2.
        let posted = transport.posted();
        assert_eq!(posted.len(), 1);
        assert!(posted[0].form.contains(&("qid".to_string(), "q1".to_string())));
        assert_eq!(host.stats().skipped, 1);
    }

    #[tokio::test]
    async fn test_model_and_batch_reach_engine() {
        let transport = Arc::new(ScriptedTransport::new().respond(
            200,
            &[r#"data: {"qid":7,"task":"text-generation","model":"facebook/opt-125m","data":["a","b"]}"#],
        ));
        let engine = Arc::new(StubEngine::default());
        let host = producer(transport.clone(), engine.clone());

        host.run().await.unwrap_err();

        let seen = engine.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, TaskKind::TextGeneration);
        assert_eq!(seen[0].1.as_deref(), Some("facebook/opt-125m"));
        assert_eq!(seen[0].2, TaskData::Batch(vec!["a".into(), "b".into()]));
        assert!(transport.posted()[0].form.contains(&("qid".to_string(), "7".to_string())));
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let transport = Arc::new(ScriptedTransport::new().respond(401, &[]));
        let host = producer(transport.clone(), Arc::new(StubEngine::default()));

        let err = host.run().await.unwrap_err();
        assert!(matches!(err, ClientError::Server { status: 401 }));
        assert!(transport.posted().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_post_keeps_running() {
        let first = task_frame("q1", "a");
        let second = task_frame("q2", "b");
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond(200, &[first.as_str(), second.as_str()])
                .post_status(500),
        );
        let host = producer(transport.clone(), Arc::new(StubEngine::default()));

        host.run().await.unwrap_err();

        assert_eq!(transport.posted().len(), 2);
        assert_eq!(host.stats().failed_posts, 2);
        assert_eq!(host.stats().posted, 0);
    }

    #[tokio::test]
    async fn test_concurrent_dispatch_drains_before_returning() {
        let frames: Vec<String> = (0..5).map(|i| task_frame(&format!("q{i}"), "x")).collect();
        let lines: Vec<&str> = frames.iter().map(String::as_str).collect();
        let transport = Arc::new(ScriptedTransport::new().respond(200, &lines));
        let host = producer(transport.clone(), Arc::new(StubEngine::default()))
            .with_max_concurrent(3);

        host.run().await.unwrap_err();

        let mut qids: Vec<String> = transport
            .posted()
            .iter()
            .map(|p| p.form.iter().find(|(k, _)| k == "qid").unwrap().1.clone())
            .collect();
        qids.sort();
        assert_eq!(qids, vec!["q0", "q1", "q2", "q3", "q4"]);
    }

    #[derive(Clone, Default)]
    struct ResultSink {
        received: Arc<Mutex<Vec<(Option<String>, HashMap<String, String>)>>>,
    }

    async fn producer_channel(Path(key): Path<String>) -> String {
        format!(
            "heartbeat\ndata: {{\"qid\":\"q-{key}\",\"task\":\"text-classification\",\"data\":\"a & b = c\"}}\n"
        )
    }

    async fn accept_result(
        State(sink): State<ResultSink>,
        headers: HeaderMap,
        Form(form): Form<HashMap<String, String>>,
    ) -> StatusCode {
        let auth = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        sink.received.lock().unwrap().push((auth, form));
        StatusCode::OK
    }

    #[tokio::test]
    async fn test_posts_result_form_over_http() {
        let sink = ResultSink::default();
        let app = Router::new()
            .route("/producer/:key/", get(producer_channel))
            .route("/result/", post(accept_result))
            .with_state(sink.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let engine = Arc::new(StubEngine::default());
        let host = ProducerLoop::new(
            Arc::new(HttpTransport::new()),
            Endpoints::single(&format!("http://{addr}/")),
            "k1",
            engine.clone(),
        );

        let err = host.run().await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));
        assert_eq!(
            engine.seen.lock().unwrap()[0].2,
            TaskData::Text("a & b = c".into())
        );

        let received = sink.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        let (auth, form) = &received[0];
        assert_eq!(auth.as_deref(), Some("Token k1"));
        assert_eq!(form.get("qid").map(String::as_str), Some("q-k1"));
        assert_eq!(
            serde_json::from_str::<Value>(&form["result"]).unwrap(),
            json!({ "label": "POSITIVE", "score": 0.98 })
        );
        assert_eq!(host.stats().posted, 1);
    }

    #[test]
    fn test_best_result() {
        assert_eq!(best_result(json!([1, 2])), Some(json!(1)));
        assert_eq!(best_result(json!({ "a": 1 })), Some(json!({ "a": 1 })));
        assert_eq!(best_result(json!([])), None);
        assert_eq!(best_result(Value::Null), None);
    }
}
