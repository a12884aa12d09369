//! Identity captured from the browser login callback.

use serde::{Deserialize, Serialize};

/// Token and identity fields delivered to the local login callback endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginCallback {
    /// API token issued by the dashboard.
    pub token: String,

    /// Account username, when the dashboard sends one.
    pub username: Option<String>,

    /// Account email.
    pub email: String,
}

impl LoginCallback {
    /// Create a new LoginCallback.
    pub fn new(token: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            username: None,
            email: email.into(),
        }
    }

    /// Builder method to set the username.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}
