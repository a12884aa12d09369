//! Server endpoints and protocol constants.

use std::env;

/// Default REST API base URL.
pub const DEFAULT_API_URL: &str = "https://hulse-api.herokuapp.com/";

/// Default streaming server base URL.
pub const DEFAULT_STREAM_URL: &str = "https://hulse-stream.herokuapp.com/";

/// Default dashboard URL, used for the browser login.
pub const DEFAULT_APP_URL: &str = "https://dashboard.hulse.app/";

/// Status the stream server answers with when no producer is online.
pub const NO_CAPACITY_STATUS: u16 = 418;

/// Base URLs of the Hulse services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// REST API (clusters, ping).
    pub api_base: String,

    /// Streaming server (consumer/producer channels, results).
    pub stream_base: String,

    /// Web dashboard.
    pub app_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_URL.to_string(),
            stream_base: DEFAULT_STREAM_URL.to_string(),
            app_base: DEFAULT_APP_URL.to_string(),
        }
    }
}

impl Endpoints {
    /// Defaults, overridden by `HULSE_API_URL`, `HULSE_STREAM_URL` and `HULSE_APP_URL`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_base: env::var("HULSE_API_URL").unwrap_or(defaults.api_base),
            stream_base: env::var("HULSE_STREAM_URL").unwrap_or(defaults.stream_base),
            app_base: env::var("HULSE_APP_URL").unwrap_or(defaults.app_base),
        }
    }

    /// Point every service at one base URL (local deployments and tests).
    pub fn single(base: &str) -> Self {
        Self {
            api_base: base.to_string(),
            stream_base: base.to_string(),
            app_base: base.to_string(),
        }
    }

    /// Consumer channel for a credential.
    pub fn consumer_channel(&self, credential: &str) -> String {
        join(&self.stream_base, &format!("consumer/{credential}/"))
    }

    /// Producer channel for a credential.
    pub fn producer_channel(&self, credential: &str) -> String {
        join(&self.stream_base, &format!("producer/{credential}/"))
    }

    /// Endpoint producers post results to.
    pub fn result_url(&self) -> String {
        join(&self.stream_base, "result/")
    }

    /// REST API path.
    pub fn api_url(&self, path: &str) -> String {
        join(&self.api_base, path)
    }

    /// Dashboard path.
    pub fn app_url(&self, path: &str) -> String {
        join(&self.app_base, path)
    }

    /// Browser login page that redirects back to the local callback port.
    pub fn login_url(&self, callback_port: u16) -> String {
        let base = self.app_url("cli-login/");
        let redirect = format!("http://127.0.0.1:{callback_port}/");
        match reqwest::Url::parse_with_params(&base, &[("redirect", redirect.as_str())]) {
            Ok(url) => url.into(),
            Err(_) => format!("{base}?redirect={redirect}"),
        }
    }

    /// Page the browser lands on once the callback has been captured.
    pub fn login_success_url(&self) -> String {
        self.app_url("cli-login/success/")
    }
}

/// Header value for the `Authorization` header.
pub fn auth_header(credential: &str) -> String {
    format!("Token {credential}")
}

fn join(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
