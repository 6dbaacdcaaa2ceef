use crate::http::JsonTransport;
use crate::{ClientContext, DriverError};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeAction {
    Create,
    Delete,
    Upsert,
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeAction::Create => "CREATE",
            ChangeAction::Delete => "DELETE",
            ChangeAction::Upsert => "UPSERT",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceRecord {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecordSet {
    pub name: String,
    #[serde(rename = "Type")]
    pub record_type: String,
    #[serde(rename = "TTL")]
    pub ttl: u32,
    pub resource_records: Vec<ResourceRecord>,
}

impl RecordSet {
    pub fn new(name: &str, record_type: &str, ttl: u32, value: &str) -> Self {
        Self {
            name: name.to_owned(),
            record_type: record_type.to_owned(),
            ttl,
            resource_records: vec![ResourceRecord {
                value: value.to_owned(),
            }],
        }
    }

    pub fn cname(name: &str, target: &str, ttl: u32) -> Self {
        Self::new(name, "CNAME", ttl, target)
    }

    /// The first value, which is the whole target for alias-style records.
    pub fn target(&self) -> Option<&str> {
        self.resource_records.first().map(|r| r.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Change {
    pub action: ChangeAction,
    pub resource_record_set: RecordSet,
}

/// A set of record mutations applied atomically to one hosted zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChangeBatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub changes: Vec<Change>,
}

impl ChangeBatch {
    pub fn single(action: ChangeAction, record: RecordSet) -> Self {
        Self {
            comment: None,
            changes: vec![Change {
                action,
                resource_record_set: record,
            }],
        }
    }

    pub fn of(action: ChangeAction, records: impl IntoIterator<Item = RecordSet>) -> Self {
        Self {
            comment: None,
            changes: records
                .into_iter()
                .map(|record| Change {
                    action,
                    resource_record_set: record,
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_owned());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeStatus {
    Pending,
    Insync,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChangeInfo {
    pub id: String,
    pub status: ChangeStatus,
}

impl ChangeInfo {
    pub fn is_in_sync(&self) -> bool {
        self.status == ChangeStatus::Insync
    }
}

/// Hosted-zone record API surface.
pub trait DnsDriver: Send + Sync {
    /// Submit a change batch. Fails as a whole if any change in it fails.
    fn change_record_sets(
        &self,
        zone_id: &str,
        batch: &ChangeBatch,
    ) -> Result<ChangeInfo, DriverError>;

    /// Current propagation status of a submitted batch.
    fn get_change(&self, change_id: &str) -> Result<ChangeInfo, DriverError>;
}

/// HTTP DNS driver.
///
/// - `POST /hostedzone/<zone>/rrset` with `{ChangeBatch}`
/// - `GET  /change/<id>`
pub struct HttpDns {
    transport: JsonTransport,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ChangeRequest<'a> {
    change_batch: &'a ChangeBatch,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ChangeResponse {
    change_info: ChangeInfo,
}

impl HttpDns {
    pub fn new(context: ClientContext) -> Self {
        Self {
            transport: JsonTransport::new(context),
        }
    }
}

/// The record API reports deleting an absent record as an
/// `InvalidChangeBatch` whose message says it was not found. Treat that as
/// `NotFound`; this is best-effort classification of the message text.
fn classify_change_error(err: DriverError) -> DriverError {
    match err {
        DriverError::Api {
            ref code,
            ref message,
            ..
        } if code == "InvalidChangeBatch" && message.to_lowercase().contains("not found") => {
            DriverError::NotFound(message.clone())
        }
        other => other,
    }
}

impl DnsDriver for HttpDns {
    fn change_record_sets(
        &self,
        zone_id: &str,
        batch: &ChangeBatch,
    ) -> Result<ChangeInfo, DriverError> {
        let resp: ChangeResponse = self
            .transport
            .post(
                &format!("hostedzone/{zone_id}/rrset"),
                &ChangeRequest {
                    change_batch: batch,
                },
            )
            .map_err(classify_change_error)?;
        Ok(resp.change_info)
    }

    fn get_change(&self, change_id: &str) -> Result<ChangeInfo, DriverError> {
        let id = change_id.trim_start_matches("/change/");
        let resp: ChangeResponse = self.transport.get(&format!("change/{id}"), &[])?;
        Ok(resp.change_info)
    }
}
