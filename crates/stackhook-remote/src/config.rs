use serde::{Deserialize, Serialize};
use std::time::Duration;

pub(crate) fn default_timeout_secs() -> u64 {
    30
}

/// Explicit client context threaded into every driver.
///
/// Endpoint and credentials travel with the drivers built from it; there is
/// no process-wide client state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientContext {
    pub endpoint: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ClientContext {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            auth_token: None,
            timeout_secs: default_timeout_secs(),
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }

    pub(crate) fn agent(&self) -> ureq::Agent {
        http_agent(self.timeout())
    }
}

/// A new agent that reports HTTP error statuses as responses, so the caller
/// can read the remote error body.
pub(crate) fn http_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(Some(timeout))
        .build()
        .into()
}
