//! CLI configuration and persisted credentials.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use hulse_client::Endpoints;
use hulse_core::LoginCallback;
use serde::{Deserialize, Serialize};

/// Account details saved after `login` or `init`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// API key sent as `Authorization: Token <api_key>`.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Account username.
    #[serde(default)]
    pub username: Option<String>,

    /// Account email.
    #[serde(default)]
    pub email: Option<String>,
}

impl Credentials {
    /// Credentials for the account a browser login callback identified.
    pub fn from_login(callback: &LoginCallback) -> Self {
        Self {
            api_key: Some(callback.token.clone()),
            username: callback.username.clone(),
            email: Some(callback.email.clone()),
        }
    }

    /// Load from `path`, returning empty credentials if the file is missing.
    pub fn load(path: &Path) -> io::Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Write to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)
    }

    /// Remove the file at `path`. Missing files are fine.
    pub fn clear(path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Everything the CLI needs, built once in `main`.
pub struct CliConfig {
    /// Credentials file location.
    pub credentials_path: PathBuf,

    /// Server endpoints.
    pub endpoints: Endpoints,
}

impl CliConfig {
    /// Default credentials path and endpoints from the environment.
    pub fn from_env() -> Self {
        Self {
            credentials_path: default_credentials_path(),
            endpoints: Endpoints::from_env(),
        }
    }

    /// Load the saved credentials.
    pub fn credentials(&self) -> io::Result<Credentials> {
        Credentials::load(&self.credentials_path)
    }
}

/// `<config dir>/hulse/config.json`.
pub fn default_credentials_path() -> PathBuf {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join("hulse")
        .join("config.json")
}
