//! Inference engine backed by an external command.
//!
//! The host does not embed a model runtime. Each task is handed to a
//! configured executable: it gets `--task <name> [--model <id>]` on the
//! command line and `{"task", "model", "data"}` as JSON on stdin, and must
//! print one JSON value (a result or a list of candidates, best first) on
//! stdout.

use std::process::Stdio;

use async_trait::async_trait;
use hulse_client::{InferenceEngine, InferenceError};
use hulse_core::{TaskData, TaskKind};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs each task by spawning `program`.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
}

impl CommandEngine {
    /// Create an engine running `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Add a fixed argument passed before the task arguments.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

#[async_trait]
impl InferenceEngine for CommandEngine {
    async fn infer(
        &self,
        task: TaskKind,
        model: Option<&str>,
        data: &TaskData,
    ) -> Result<Value, InferenceError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg("--task").arg(task.as_str());
        if let Some(model) = model {
            cmd.arg("--model").arg(model);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %self.program, task = %task, "Spawning engine");
        let mut child = cmd.spawn()?;

        if let Some(stderr) = child.stderr.take() {
            let program = self.program.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        warn!(engine = %program, stderr = %line.trim(), "Engine stderr");
                    }
                }
            });
        }

        let input = serde_json::to_vec(&json!({
            "task": task,
            "model": model,
            "data": data,
        }))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&input).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(InferenceError::Failed(format!(
                "{} exited with code {}",
                self.program,
                output.status.code().unwrap_or(-1)
            )));
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> CommandEngine {
        CommandEngine::new("sh")
            .with_arg("-c")
            .with_arg(script)
            .with_arg("engine")
    }

    #[tokio::test]
    async fn test_returns_stdout_json() {
        let engine = shell(r#"cat >/dev/null; echo '[{"label":"POSITIVE","score":0.98}]'"#);

        let value = engine
            .infer(TaskKind::TextClassification, None, &"I love this".into())
            .await
            .unwrap();

        assert_eq!(value, json!([{ "label": "POSITIVE", "score": 0.98 }]));
    }

    #[tokio::test]
    async fn test_receives_request_on_stdin_and_args() {
        // Echo stdin back, and report the arguments in a wrapper object.
        let engine = shell(r#"printf '{"args":"%s","input":%s}' "$*" "$(cat)""#);

        let value = engine
            .infer(TaskKind::Summarization, Some("t5-small"), &"long text".into())
            .await
            .unwrap();

        assert_eq!(value["args"], "--task summarization --model t5-small");
        assert_eq!(
            value["input"],
            json!({ "task": "summarization", "model": "t5-small", "data": "long text" })
        );
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let engine = shell("cat >/dev/null; echo oops >&2; exit 3");

        let err = engine
            .infer(TaskKind::Translation, None, &"hola".into())
            .await
            .unwrap_err();

        assert!(matches!(err, InferenceError::Failed(ref msg) if msg.contains("code 3")));
    }

    #[tokio::test]
    async fn test_invalid_output_is_error() {
        let engine = shell("cat >/dev/null; echo not-json");

        let err = engine
            .infer(TaskKind::Translation, None, &"hola".into())
            .await
            .unwrap_err();

        assert!(matches!(err, InferenceError::Output(_)));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let engine = CommandEngine::new("/nonexistent/hulse-engine");

        let err = engine
            .infer(TaskKind::Translation, None, &"hola".into())
            .await
            .unwrap_err();

        assert!(matches!(err, InferenceError::Spawn(_)));
    }
}
