//! Cluster resource as returned by the Hulse API.

use serde::{Deserialize, Serialize};

/// A named group of producer hosts owned by an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Server-assigned identifier.
    pub id: i64,

    /// Display name.
    pub name: String,

    /// Free-form description.
    #[serde(default)]
    pub description: String,
}
