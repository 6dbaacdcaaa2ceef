use crate::properties::Properties;
use crate::request::RequestContext;
use crate::ProtocolError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    Success,
    Failed,
}

/// The single acknowledgment sent back for a request.
///
/// Field names and casing are the orchestrator's wire contract:
/// `{Status, Reason, PhysicalResourceId, StackId, RequestId,
/// LogicalResourceId, NoEcho, Data}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleResponse {
    pub status: ResponseStatus,
    pub reason: String,
    pub physical_resource_id: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    pub no_echo: bool,
    pub data: Properties,
}

impl LifecycleResponse {
    pub fn success(context: &RequestContext, physical_resource_id: impl Into<String>) -> Self {
        Self::new(context, ResponseStatus::Success, String::new(), physical_resource_id.into())
    }

    pub fn failed(
        context: &RequestContext,
        physical_resource_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(
            context,
            ResponseStatus::Failed,
            reason.into(),
            physical_resource_id.into(),
        )
    }

    fn new(
        context: &RequestContext,
        status: ResponseStatus,
        reason: String,
        physical_resource_id: String,
    ) -> Self {
        Self {
            status,
            reason,
            physical_resource_id,
            stack_id: context.stack_id.clone(),
            request_id: context.request_id.clone(),
            logical_resource_id: context.logical_resource_id.clone(),
            no_echo: false,
            data: Properties::new(),
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Properties) -> Self {
        self.data = data;
        self
    }

    #[must_use]
    pub fn with_no_echo(mut self, no_echo: bool) -> Self {
        self.no_echo = no_echo;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// Serialize to the exact body delivered to the callback URL.
    pub fn to_body(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }
}
