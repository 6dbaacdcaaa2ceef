use crate::http::JsonTransport;
use crate::{ClientContext, DriverError};
use serde::{Deserialize, Serialize};

/// Most identifiers one batch-delete call accepts.
pub const MAX_DELETE_BATCH: usize = 1000;

/// Most entries one listing call returns.
pub const MAX_LIST_PAGE: usize = 1000;

/// One object version or delete marker.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectVersion {
    pub key: String,
    pub version_id: String,
}

impl ObjectVersion {
    pub fn new(key: &str, version_id: &str) -> Self {
        Self {
            key: key.to_owned(),
            version_id: version_id.to_owned(),
        }
    }
}

/// Position to resume a version listing from. The default starts at the top.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListCursor {
    pub key_marker: Option<String>,
    pub version_id_marker: Option<String>,
}

impl ListCursor {
    pub fn is_start(&self) -> bool {
        self.key_marker.is_none() && self.version_id_marker.is_none()
    }
}

/// One page of a version listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VersionPage {
    #[serde(default)]
    pub versions: Vec<ObjectVersion>,
    #[serde(default)]
    pub delete_markers: Vec<ObjectVersion>,
    #[serde(default)]
    pub is_truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_key_marker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_version_id_marker: Option<String>,
}

impl VersionPage {
    pub fn len(&self) -> usize {
        self.versions.len() + self.delete_markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Versions and delete markers together, in listing order.
    pub fn identifiers(&self) -> Vec<ObjectVersion> {
        let mut all = Vec::with_capacity(self.len());
        all.extend(self.versions.iter().cloned());
        all.extend(self.delete_markers.iter().cloned());
        all
    }

    pub fn next_cursor(&self) -> ListCursor {
        ListCursor {
            key_marker: self.next_key_marker.clone(),
            version_id_marker: self.next_version_id_marker.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteFailure {
    pub key: String,
    #[serde(default)]
    pub version_id: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Result of a batch delete. Per-item failures do not fail the call itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted: usize,
    pub errors: Vec<DeleteFailure>,
}

impl DeleteOutcome {
    pub fn merge(&mut self, other: DeleteOutcome) {
        self.deleted += other.deleted;
        self.errors.extend(other.errors);
    }
}

/// Object-store versioning API surface.
pub trait ObjectStoreDriver: Send + Sync {
    /// List one page of versions and delete markers after `cursor`.
    fn list_versions(
        &self,
        bucket: &str,
        cursor: &ListCursor,
        max_keys: usize,
    ) -> Result<VersionPage, DriverError>;

    /// Delete at most `MAX_DELETE_BATCH` identifiers in one call.
    fn delete_batch(
        &self,
        bucket: &str,
        objects: &[ObjectVersion],
    ) -> Result<DeleteOutcome, DriverError>;

    /// Delete any number of identifiers, chunked to the per-call limit.
    fn delete_versions(
        &self,
        bucket: &str,
        objects: &[ObjectVersion],
    ) -> Result<DeleteOutcome, DriverError> {
        let mut outcome = DeleteOutcome::default();
        for chunk in objects.chunks(MAX_DELETE_BATCH) {
            outcome.merge(self.delete_batch(bucket, chunk)?);
        }
        Ok(outcome)
    }
}

/// HTTP object-store driver.
///
/// - `GET  /buckets/<bucket>/versions?max-keys&key-marker&version-id-marker`
/// - `POST /buckets/<bucket>/delete` with `{Objects, Quiet}`
pub struct HttpObjectStore {
    transport: JsonTransport,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct DeleteRequest<'a> {
    objects: &'a [ObjectVersion],
    quiet: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DeleteResponse {
    #[serde(default)]
    deleted: Vec<ObjectVersion>,
    #[serde(default)]
    errors: Vec<DeleteFailure>,
}

impl HttpObjectStore {
    pub fn new(context: ClientContext) -> Self {
        Self {
            transport: JsonTransport::new(context),
        }
    }
}

impl ObjectStoreDriver for HttpObjectStore {
    fn list_versions(
        &self,
        bucket: &str,
        cursor: &ListCursor,
        max_keys: usize,
    ) -> Result<VersionPage, DriverError> {
        let max_keys = max_keys.clamp(1, MAX_LIST_PAGE).to_string();
        let mut query = vec![("max-keys", max_keys.as_str())];
        if let Some(ref marker) = cursor.key_marker {
            query.push(("key-marker", marker.as_str()));
        }
        if let Some(ref marker) = cursor.version_id_marker {
            query.push(("version-id-marker", marker.as_str()));
        }
        self.transport
            .get(&format!("buckets/{bucket}/versions"), &query)
    }

    fn delete_batch(
        &self,
        bucket: &str,
        objects: &[ObjectVersion],
    ) -> Result<DeleteOutcome, DriverError> {
        if objects.is_empty() {
            return Ok(DeleteOutcome::default());
        }
        if objects.len() > MAX_DELETE_BATCH {
            return Err(DriverError::Api {
                status: 400,
                code: "MalformedXML".to_owned(),
                message: format!(
                    "batch of {} exceeds the limit of {MAX_DELETE_BATCH}",
                    objects.len()
                ),
            });
        }
        // Quiet mode: the response lists only failures.
        let resp: DeleteResponse = self.transport.post(
            &format!("buckets/{bucket}/delete"),
            &DeleteRequest {
                objects,
                quiet: true,
            },
        )?;
        let deleted = if resp.deleted.is_empty() {
            objects.len() - resp.errors.len().min(objects.len())
        } else {
            resp.deleted.len()
        };
        Ok(DeleteOutcome {
            deleted,
            errors: resp.errors,
        })
    }
}
