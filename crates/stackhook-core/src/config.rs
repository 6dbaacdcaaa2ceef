use crate::patience::{Patience, DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL_MS};
use crate::CoreError;
use serde::{Deserialize, Serialize};
use stackhook_protocol::ResourceKind;
use stackhook_remote::ClientContext;
use std::path::Path;

pub const ENV_HOSTED_ZONE_ID: &str = "HOSTED_ZONE_ID";
pub const ENV_ENDPOINT: &str = "STACKHOOK_ENDPOINT";
pub const ENV_AUTH_TOKEN: &str = "STACKHOOK_AUTH_TOKEN";
pub const ENV_RESOURCE_TYPE: &str = "STACKHOOK_RESOURCE_TYPE";
pub const ENV_DEFAULT_REGION: &str = "STACKHOOK_DEFAULT_REGION";

/// Region certificates are issued in when the resource does not say; the
/// edge/CDN region only accepts certificates from here.
pub const DEFAULT_CERTIFICATE_REGION: &str = "us-east-1";

fn default_region() -> String {
    DEFAULT_CERTIFICATE_REGION.to_owned()
}

fn default_poll_attempts() -> u32 {
    DEFAULT_POLL_ATTEMPTS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

/// Process-wide handler settings.
///
/// ```toml
/// hosted_zone_id = "Z0123456789"
/// resource_type = "Custom::DnsAlias"
/// default_region = "us-east-1"
/// poll_attempts = 80
/// poll_interval_ms = 10000
///
/// [remote]
/// endpoint = "https://control.internal"
/// auth_token = "..."
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandlerConfig {
    #[serde(default)]
    pub hosted_zone_id: Option<String>,
    /// Route every event to this reconciler regardless of its `ResourceType`.
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default = "default_region")]
    pub default_region: String,
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub remote: Option<ClientContext>,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            hosted_zone_id: None,
            resource_type: None,
            default_region: default_region(),
            poll_attempts: default_poll_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            remote: None,
        }
    }
}

impl HandlerConfig {
    pub fn from_toml(content: &str) -> Result<Self, CoreError> {
        toml::from_str(content).map_err(|e| CoreError::Config(format!("invalid config: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Optional file, then process environment, then validation.
    pub fn load_with_env(path: Option<&Path>) -> Result<Self, CoreError> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overlay environment variables read through `lookup`. Empty values are
    /// ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(zone) = var(ENV_HOSTED_ZONE_ID) {
            self.hosted_zone_id = Some(zone);
        }
        if let Some(kind) = var(ENV_RESOURCE_TYPE) {
            self.resource_type = Some(kind);
        }
        if let Some(region) = var(ENV_DEFAULT_REGION) {
            self.default_region = region;
        }
        if let Some(endpoint) = var(ENV_ENDPOINT) {
            let token = self.remote.take().and_then(|r| r.auth_token);
            let mut context = ClientContext::new(&endpoint);
            context.auth_token = token;
            self.remote = Some(context);
        }
        if let Some(token) = var(ENV_AUTH_TOKEN) {
            if let Some(remote) = self.remote.as_mut() {
                remote.auth_token = Some(token);
            }
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        self.pinned_kind()?;
        if self.default_region.trim().is_empty() {
            return Err(CoreError::Config("default_region must not be empty".to_owned()));
        }
        if let Some(remote) = &self.remote {
            if remote.endpoint.trim().is_empty() {
                return Err(CoreError::Config("remote.endpoint must not be empty".to_owned()));
            }
        }
        Ok(())
    }

    pub fn hosted_zone(&self) -> Option<&str> {
        self.hosted_zone_id
            .as_deref()
            .map(str::trim)
            .filter(|z| !z.is_empty())
    }

    /// The reconciler every event is routed to, when pinned.
    pub fn pinned_kind(&self) -> Result<Option<ResourceKind>, CoreError> {
        match self.resource_type.as_deref() {
            None => Ok(None),
            Some(name) => Ok(Some(name.parse()?)),
        }
    }

    pub fn client_context(&self) -> Result<ClientContext, CoreError> {
        let remote = self.remote.as_ref().ok_or_else(|| {
            CoreError::Config(format!(
                "no remote endpoint configured (set {ENV_ENDPOINT} or [remote].endpoint)"
            ))
        })?;
        Ok(ClientContext {
            auth_token: remote.auth_token.clone(),
            timeout_secs: remote.timeout_secs,
            ..ClientContext::new(&remote.endpoint)
        })
    }

    pub fn patience(&self) -> Patience {
        Patience {
            attempts: self.poll_attempts,
            interval_ms: self.poll_interval_ms,
        }
    }
}
