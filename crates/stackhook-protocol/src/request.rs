use crate::properties::Properties;
use crate::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// The desired-state transition an event asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

impl RequestType {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestType::Create => "Create",
            RequestType::Update => "Update",
            RequestType::Delete => "Delete",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Create" => Ok(RequestType::Create),
            "Update" => Ok(RequestType::Update),
            "Delete" => Ok(RequestType::Delete),
            other => Err(ProtocolError::UnexpectedRequestType(other.to_owned())),
        }
    }
}

/// Which reconciler owns an event, taken from the envelope's `ResourceType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    BucketPurge,
    DnsAlias,
    DnsCertificate,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::BucketPurge,
        ResourceKind::DnsAlias,
        ResourceKind::DnsCertificate,
    ];

    /// The orchestrator-facing type name, e.g. `Custom::DnsAlias`.
    pub fn type_name(self) -> &'static str {
        match self {
            ResourceKind::BucketPurge => "Custom::BucketPurge",
            ResourceKind::DnsAlias => "Custom::DnsAlias",
            ResourceKind::DnsCertificate => "Custom::DnsCertificate",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl FromStr for ResourceKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bare = s.strip_prefix("Custom::").unwrap_or(s);
        match bare {
            "BucketPurge" => Ok(ResourceKind::BucketPurge),
            "DnsAlias" => Ok(ResourceKind::DnsAlias),
            "DnsCertificate" => Ok(ResourceKind::DnsCertificate),
            _ => Err(ProtocolError::UnknownResourceType(s.to_owned())),
        }
    }
}

/// Correlation fields shared by every request, needed to acknowledge it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestContext {
    #[serde(rename = "ResponseURL")]
    pub response_url: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
}

/// The transition-specific part of a request.
///
/// `OldResourceProperties` only exists on `Update`; `PhysicalResourceId` is
/// mandatory on `Update` and optional on `Delete`, where it is the only
/// reliable statement of what concretely exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "RequestType")]
pub enum RequestAction {
    Create {
        #[serde(rename = "ResourceProperties", default)]
        properties: Properties,
    },
    Update {
        #[serde(rename = "ResourceProperties", default)]
        properties: Properties,
        #[serde(rename = "OldResourceProperties")]
        old_properties: Properties,
        #[serde(rename = "PhysicalResourceId")]
        physical_resource_id: String,
    },
    Delete {
        #[serde(rename = "ResourceProperties", default)]
        properties: Properties,
        #[serde(
            rename = "PhysicalResourceId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        physical_resource_id: Option<String>,
    },
}

/// A fully decoded lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleRequest {
    #[serde(flatten)]
    pub context: RequestContext,
    #[serde(flatten)]
    pub action: RequestAction,
}

impl LifecycleRequest {
    pub fn request_type(&self) -> RequestType {
        match self.action {
            RequestAction::Create { .. } => RequestType::Create,
            RequestAction::Update { .. } => RequestType::Update,
            RequestAction::Delete { .. } => RequestType::Delete,
        }
    }

    pub fn properties(&self) -> &Properties {
        match &self.action {
            RequestAction::Create { properties }
            | RequestAction::Update { properties, .. }
            | RequestAction::Delete { properties, .. } => properties,
        }
    }

    pub fn old_properties(&self) -> Option<&Properties> {
        match &self.action {
            RequestAction::Update { old_properties, .. } => Some(old_properties),
            _ => None,
        }
    }

    /// The identity established by an earlier successful Create, if any.
    /// Empty strings are treated as absent.
    pub fn physical_resource_id(&self) -> Option<&str> {
        let id = match &self.action {
            RequestAction::Create { .. } => None,
            RequestAction::Update {
                physical_resource_id,
                ..
            } => Some(physical_resource_id.as_str()),
            RequestAction::Delete {
                physical_resource_id,
                ..
            } => physical_resource_id.as_deref(),
        };
        id.filter(|s| !s.is_empty())
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// An inbound event whose correlation fields have been read but whose
/// transition has not yet been validated.
///
/// Decoding is split in two so that a response can still be addressed when
/// the transition-specific part is malformed or names an unknown type.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub context: RequestContext,
    raw: Value,
}

impl Envelope {
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let raw: Value = serde_json::from_slice(bytes)?;
        let context = RequestContext::deserialize(&raw)
            .map_err(|e| ProtocolError::InvalidEnvelope(e.to_string()))?;
        if context.response_url.is_empty() {
            return Err(ProtocolError::InvalidEnvelope(
                "ResponseURL must not be empty".to_owned(),
            ));
        }
        Ok(Self { context, raw })
    }

    pub fn request_type(&self) -> Result<RequestType, ProtocolError> {
        self.raw
            .get("RequestType")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .parse()
    }

    /// `PhysicalResourceId` as sent, without validating the rest of the event.
    pub fn physical_resource_id(&self) -> Option<&str> {
        self.raw
            .get("PhysicalResourceId")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Strictly decode the event into the variant named by `RequestType`.
    pub fn decode(&self) -> Result<LifecycleRequest, ProtocolError> {
        let request_type = self.request_type()?;
        LifecycleRequest::deserialize(&self.raw).map_err(|e| ProtocolError::InvalidRequest {
            request_type,
            message: e.to_string(),
        })
    }
}
