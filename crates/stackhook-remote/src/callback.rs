use crate::config::{default_timeout_secs, http_agent};
use crate::CallbackError;
use stackhook_protocol::LifecycleResponse;
use std::time::Duration;
use tracing::{debug, warn};

/// Delivers the acknowledgment for a lifecycle request.
///
/// `deliver` is called exactly once per request and is never retried: the
/// response URL is single-use, and a second or out-of-order acknowledgment is
/// worse than none. The orchestrator's own wait timeout is the recovery path.
pub trait CallbackSender: Send + Sync {
    fn deliver(&self, response_url: &str, response: &LifecycleResponse)
        -> Result<(), CallbackError>;
}

/// One-shot HTTPS PUT to the presigned response URL.
///
/// Returns as soon as the response status line and headers are received.
/// The response body is neither awaited nor validated, so returning `Ok`
/// means the receiver accepted the upload, not that the orchestrator has
/// finished processing it. Each delivery uses its own agent.
pub struct HttpCallback {
    timeout: Duration,
}

impl Default for HttpCallback {
    fn default() -> Self {
        Self::new(Duration::from_secs(default_timeout_secs()))
    }
}

impl HttpCallback {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl CallbackSender for HttpCallback {
    fn deliver(
        &self,
        response_url: &str,
        response: &LifecycleResponse,
    ) -> Result<(), CallbackError> {
        let body = response.to_body()?;
        debug!(
            "PUT {} ({} bytes, status {:?})",
            redact_query(response_url),
            body.len(),
            response.status
        );
        // The presigned URL is signed without a content type; sending a real
        // one makes the receiver reject the upload.
        let resp = http_agent(self.timeout)
            .put(response_url)
            .header("content-type", "")
            .header("content-length", &body.len().to_string())
            .send(body.as_slice())
            .map_err(|e| {
                warn!("callback delivery failed: {e}");
                CallbackError::Transport(e.to_string())
            })?;

        let code = resp.status().as_u16();
        if code >= 400 {
            warn!("callback URL answered HTTP {code}");
            return Err(CallbackError::Rejected(code));
        }
        Ok(())
    }
}

/// Strip the signature query from a presigned URL before logging it.
fn redact_query(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}
