//! Scripted transport for unit tests.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use reqwest::header::HeaderMap;

use crate::error::ClientError;
use crate::transport::{BodyStream, StreamResponse, Transport};

/// A GET the transport received.
#[derive(Debug, Clone)]
pub(crate) struct OpenedStream {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub credential: String,
}

/// A form POST the transport received.
#[derive(Debug, Clone)]
pub(crate) struct PostedForm {
    pub url: String,
    pub form: Vec<(String, String)>,
    pub credential: String,
}

/// Replays canned streaming responses in order and records every call.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    responses: Mutex<VecDeque<(u16, Option<Vec<String>>)>>,
    post_status: Mutex<Option<u16>>,
    body_read: Arc<AtomicBool>,
    opened: Mutex<Vec<OpenedStream>>,
    posted: Mutex<Vec<PostedForm>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the next `open_stream` call. Lines get `\n` appended.
    pub fn respond(self, status: u16, lines: &[&str]) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back((status, Some(lines.iter().map(|l| format!("{l}\n")).collect())));
        self
    }

    /// Queue a response whose body never yields and never ends.
    pub fn respond_hanging(self, status: u16) -> Self {
        self.responses.lock().unwrap().push_back((status, None));
        self
    }

    /// Status returned by `post_form` (default 200).
    pub fn post_status(self, status: u16) -> Self {
        *self.post_status.lock().unwrap() = Some(status);
        self
    }

    pub fn body_was_read(&self) -> bool {
        self.body_read.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> Vec<OpenedStream> {
        self.opened.lock().unwrap().clone()
    }

    pub fn posted(&self) -> Vec<PostedForm> {
        self.posted.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.opened.lock().unwrap().len() + self.posted.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open_stream(
        &self,
        url: &str,
        query: &[(&str, String)],
        credential: &str,
    ) -> Result<StreamResponse, ClientError> {
        self.opened.lock().unwrap().push(OpenedStream {
            url: url.to_string(),
            query: query
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            credential: credential.to_string(),
        });

        let (status, lines) = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ClientError::Io(io::Error::other("no scripted response")))?;

        let body: BodyStream = match lines {
            Some(lines) => {
                let flag = self.body_read.clone();
                let chunks: Vec<io::Result<Bytes>> =
                    lines.into_iter().map(|l| Ok(Bytes::from(l))).collect();
                Box::pin(stream::iter(chunks).inspect(move |_| flag.store(true, Ordering::SeqCst)))
            }
            None => Box::pin(stream::pending()),
        };

        Ok(StreamResponse {
            status,
            headers: HeaderMap::new(),
            body,
        })
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(&str, String)],
        credential: &str,
    ) -> Result<u16, ClientError> {
        self.posted.lock().unwrap().push(PostedForm {
            url: url.to_string(),
            form: form
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            credential: credential.to_string(),
        });
        Ok(self.post_status.lock().unwrap().unwrap_or(200))
    }
}
