//! Task requests and results.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CoreError, QueryId};

/// Every task kind a producer host knows how to run.
pub const SUPPORTED_TASKS: [TaskKind; 8] = [
    TaskKind::Summarization,
    TaskKind::Translation,
    TaskKind::TextGeneration,
    TaskKind::TextClassification,
    TaskKind::SentimentAnalysis,
    TaskKind::QuestionAnswering,
    TaskKind::Text2TextGeneration,
    TaskKind::ZeroShotClassification,
];

/// Kind of inference task, named the way the inference pipelines name them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    #[serde(rename = "summarization")]
    Summarization,
    #[serde(rename = "translation")]
    Translation,
    #[serde(rename = "text-generation")]
    TextGeneration,
    #[serde(rename = "text-classification")]
    TextClassification,
    #[serde(rename = "sentiment-analysis")]
    SentimentAnalysis,
    #[serde(rename = "question-answering")]
    QuestionAnswering,
    #[serde(rename = "text2text-generation")]
    Text2TextGeneration,
    #[serde(rename = "zero-shot-classification")]
    ZeroShotClassification,
}

impl TaskKind {
    /// Wire name of the task.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summarization => "summarization",
            Self::Translation => "translation",
            Self::TextGeneration => "text-generation",
            Self::TextClassification => "text-classification",
            Self::SentimentAnalysis => "sentiment-analysis",
            Self::QuestionAnswering => "question-answering",
            Self::Text2TextGeneration => "text2text-generation",
            Self::ZeroShotClassification => "zero-shot-classification",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SUPPORTED_TASKS
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CoreError::UnsupportedTask(s.to_string()))
    }
}

/// Input handed to the model: one text or an ordered batch of texts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskData {
    Text(String),
    Batch(Vec<String>),
}

impl TaskData {
    /// All texts in order. A single text yields one element.
    pub fn texts(&self) -> Vec<&str> {
        match self {
            Self::Text(text) => vec![text.as_str()],
            Self::Batch(texts) => texts.iter().map(String::as_str).collect(),
        }
    }
}

impl From<String> for TaskData {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for TaskData {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<Vec<String>> for TaskData {
    fn from(v: Vec<String>) -> Self {
        Self::Batch(v)
    }
}

/// A consumer's request to have a task executed by some producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    /// Requested task kind. `None` lets the server infer it.
    pub task: Option<TaskKind>,

    /// Model identifier, if the consumer wants a specific one.
    pub model: Option<String>,

    /// Input data.
    pub data: TaskData,

    /// API key the request is made with.
    pub credential: String,
}

impl TaskRequest {
    /// Build a request, validating the task name against [`SUPPORTED_TASKS`].
    pub fn new(
        task: Option<&str>,
        model: Option<&str>,
        data: impl Into<TaskData>,
        credential: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let task = task.map(TaskKind::from_str).transpose()?;
        let credential = credential.into();
        if credential.is_empty() {
            return Err(CoreError::InvalidInput("credential is empty".to_string()));
        }

        Ok(Self {
            task,
            model: model.map(str::to_owned),
            data: data.into(),
            credential,
        })
    }
}

/// Result delivered back to a consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Correlation id of the query this result answers.
    pub correlation_id: QueryId,

    /// Task-specific output, e.g. `{"label": "POSITIVE", "score": 0.98}`.
    pub payload: Value,
}

impl TaskResult {
    /// Build a result from a decoded stream frame.
    ///
    /// Frames look like `{"qid": "...", "result": ...}`. Producers post the
    /// result as a form field, so it may arrive JSON-encoded inside a string;
    /// such strings are decoded. A frame without `result` is its own payload.
    pub fn from_frame(frame: Value) -> Self {
        let correlation_id = frame
            .get("qid")
            .and_then(QueryId::from_json)
            .unwrap_or_default();

        let payload = match frame.get("result") {
            Some(Value::String(raw)) => {
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
            }
            Some(result) => result.clone(),
            None => frame,
        };

        Self {
            correlation_id,
            payload,
        }
    }
}
