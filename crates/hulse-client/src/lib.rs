//! Client library for the Hulse compute-matching service.
//!
//! A consumer submits a task with [`HulseClient::query`] and blocks on the
//! streamed answer. A producer host runs a [`ProducerLoop`] that receives
//! forwarded tasks, executes them on a local [`InferenceEngine`] and posts
//! the results back. [`CallbackListener`] captures the browser login
//! callback during interactive authentication. [`ApiClient`] covers the
//! plain REST endpoints.
//!
//! # Example
//!
//! ```rust,no_run
//! use hulse_client::{Endpoints, HulseClient};
//!
//! async fn classify() -> Result<(), hulse_client::ClientError> {
//!     let client = HulseClient::new(Endpoints::from_env()).with_credential("my-key");
//!     let result = client
//!         .query(Some("text-classification"), None, "I love this")
//!         .await?;
//!     println!("{}", result.payload);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod client;
pub mod consumer;
pub mod error;
pub mod frame;
pub mod listener;
pub mod producer;
pub mod settings;
pub mod transport;

#[cfg(test)]
mod testing;

pub use api::ApiClient;
pub use client::HulseClient;
pub use error::{ClientError, InferenceError};
pub use frame::{decode_line, FrameReader, StreamFrame};
pub use listener::{CallbackListener, ListenerConfig, ListenerState};
pub use producer::{HostStats, InferenceEngine, ProducerLoop};
pub use settings::Endpoints;
pub use transport::{HttpTransport, StreamResponse, Transport};
