use crate::lifecycle::{required, unowned_delete, Reconciled, Reconciler};
use crate::CoreError;
use serde::Deserialize;
use stackhook_protocol::{parse_properties, LifecycleRequest, RequestType, ResourceKind};
use stackhook_remote::objects::{ListCursor, MAX_LIST_PAGE};
use stackhook_remote::{Drivers, ObjectStoreDriver};
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BucketProperties {
    #[serde(default)]
    bucket_name: Option<String>,
}

/// Totals for one purge run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub pages: usize,
    pub deleted: usize,
}

/// Delete every object version and delete marker in `bucket`.
///
/// Pages are listed and deleted one at a time, resuming from the cursor the
/// listing returns. A bucket that does not exist is already empty.
pub fn purge_bucket(
    objects: &dyn ObjectStoreDriver,
    bucket: &str,
) -> Result<PurgeReport, CoreError> {
    let mut report = PurgeReport::default();
    let mut cursor = ListCursor::default();

    loop {
        let page = match objects.list_versions(bucket, &cursor, MAX_LIST_PAGE) {
            Ok(page) => page,
            Err(e) if e.is_not_found() && cursor.is_start() => {
                info!("bucket {bucket} does not exist, nothing to purge");
                return Ok(report);
            }
            Err(e) => return Err(e.into()),
        };
        report.pages += 1;

        if !page.is_empty() {
            let outcome = objects.delete_versions(bucket, &page.identifiers())?;
            if let Some(first) = outcome.errors.first() {
                warn!(
                    "{} of {} deletions failed in {bucket}",
                    outcome.errors.len(),
                    page.len()
                );
                return Err(CoreError::PurgeFailed {
                    bucket: bucket.to_owned(),
                    message: format!(
                        "{} ({}) deleting {} version {}",
                        first.message, first.code, first.key, first.version_id
                    ),
                });
            }
            report.deleted += outcome.deleted;
            debug!("page {}: deleted {} from {bucket}", report.pages, outcome.deleted);
        }

        if !page.is_truncated {
            break;
        }
        let next = page.next_cursor();
        if next.is_start() || next == cursor {
            return Err(CoreError::PurgeFailed {
                bucket: bucket.to_owned(),
                message: "version listing is truncated but its cursor did not advance".to_owned(),
            });
        }
        cursor = next;
    }

    info!("purged {} versions from {bucket} in {} pages", report.deleted, report.pages);
    Ok(report)
}

/// Empties a versioned bucket before the orchestrator deletes it.
///
/// Create and Update only acknowledge; the physical id is the bucket name.
/// Only a Delete carrying that id purges.
pub struct BucketPurge;

impl Reconciler for BucketPurge {
    fn kind(&self) -> ResourceKind {
        ResourceKind::BucketPurge
    }

    fn reconcile(
        &self,
        request: &LifecycleRequest,
        drivers: &Drivers,
    ) -> Result<Reconciled, CoreError> {
        let props: Result<BucketProperties, _> = parse_properties(request.properties());
        let named = props.as_ref().ok().and_then(|p| p.bucket_name.as_deref());
        if let Some(done) = unowned_delete(request, named) {
            info!("bucket {} was never acknowledged, nothing to purge", done.physical_resource_id);
            return Ok(done);
        }

        let props = props?;
        let bucket = required(props.bucket_name.as_deref(), "BucketName")?;

        if request.request_type() == RequestType::Delete {
            purge_bucket(drivers.objects.as_ref(), bucket)?;
        }
        Ok(Reconciled::new(bucket))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackhook_remote::mock::{MockCall, MockCloud, MockOp};
    use std::sync::Arc;

    #[test]
    fn purge_pages_through_cursor() {
        let cloud = MockCloud::new();
        cloud.set_page_size(10);
        cloud.put_versions("logs", "a.txt", 15);
        cloud.put_versions("logs", "b.txt", 7);
        cloud.put_delete_marker("logs", "c.txt", "dm1");

        let report = purge_bucket(&cloud, "logs").unwrap();
        assert_eq!(report, PurgeReport { pages: 3, deleted: 23 });
        assert_eq!(cloud.object_count("logs"), Some(0));

        let cursors: Vec<ListCursor> = cloud
            .calls_of(MockOp::ListVersions)
            .into_iter()
            .filter_map(|c| match c {
                MockCall::ListVersions { cursor, .. } => Some(cursor),
                _ => None,
            })
            .collect();
        assert!(cursors[0].is_start());
        assert_eq!(cursors[1].key_marker.as_deref(), Some("a.txt"));
        assert_eq!(cursors[1].version_id_marker.as_deref(), Some("v00009"));
    }

    #[test]
    fn empty_bucket_lists_once() {
        let cloud = MockCloud::new();
        cloud.add_bucket("empty");
        let report = purge_bucket(&cloud, "empty").unwrap();
        assert_eq!(report, PurgeReport { pages: 1, deleted: 0 });
        assert!(cloud.calls_of(MockOp::DeleteBatch).is_empty());
    }

    #[test]
    fn missing_bucket_is_already_purged() {
        let cloud = MockCloud::new();
        let report = purge_bucket(&cloud, "gone").unwrap();
        assert_eq!(report.deleted, 0);
    }

    #[test]
    fn per_item_errors_fail_the_purge() {
        let cloud = MockCloud::new();
        cloud.put_versions("logs", "locked.txt", 2);
        cloud.protect_key("locked.txt");
        let err = purge_bucket(&cloud, "logs").unwrap_err();
        assert!(matches!(err, CoreError::PurgeFailed { .. }));
        assert!(err.to_string().contains("Access Denied"));
    }

    #[test]
    fn listing_errors_propagate() {
        let cloud = MockCloud::new();
        cloud.put_versions("logs", "a", 1);
        cloud.fail_next(MockOp::ListVersions, "throttled");
        let err = purge_bucket(&cloud, "logs").unwrap_err();
        assert!(err.to_string().contains("throttled"));
    }

    #[test]
    fn create_does_not_touch_the_bucket() {
        let cloud = Arc::new(MockCloud::new());
        cloud.put_versions("site", "index.html", 3);
        let request: LifecycleRequest = serde_json::from_value(serde_json::json!({
            "RequestType": "Create",
            "ResponseURL": "http://cb",
            "StackId": "s",
            "RequestId": "r",
            "LogicalResourceId": "Purge",
            "ResourceProperties": {"BucketName": "site"}
        }))
        .unwrap();
        let done = BucketPurge
            .reconcile(&request, &Drivers::from_mock(&cloud))
            .unwrap();
        assert_eq!(done.physical_resource_id, "site");
        assert!(cloud.calls().is_empty());
        assert_eq!(cloud.object_count("site"), Some(3));
    }

    fn delete(physical_id: &str, properties: serde_json::Value) -> LifecycleRequest {
        crate::lifecycle::testing::request(
            "Delete",
            serde_json::json!({
                "PhysicalResourceId": physical_id,
                "ResourceProperties": properties,
            }),
        )
    }

    #[test]
    fn delete_of_acknowledged_bucket_purges() {
        let cloud = Arc::new(MockCloud::new());
        cloud.put_versions("site", "index.html", 3);
        let request = delete("site", serde_json::json!({"BucketName": "site"}));
        let done = BucketPurge
            .reconcile(&request, &Drivers::from_mock(&cloud))
            .unwrap();
        assert_eq!(done.physical_resource_id, "site");
        assert_eq!(cloud.object_count("site"), Some(0));
    }

    #[test]
    fn delete_under_another_id_leaves_bucket_alone() {
        let cloud = Arc::new(MockCloud::new());
        cloud.put_versions("site", "index.html", 3);
        let request = delete("Resource", serde_json::json!({"BucketName": "site"}));
        let done = BucketPurge
            .reconcile(&request, &Drivers::from_mock(&cloud))
            .unwrap();
        assert_eq!(done.physical_resource_id, "Resource");
        assert!(cloud.calls().is_empty());
        assert_eq!(cloud.object_count("site"), Some(3));
    }

    #[test]
    fn delete_without_bucket_name_is_a_no_op() {
        let cloud = Arc::new(MockCloud::new());
        let request = delete("Resource", serde_json::json!({}));
        let done = BucketPurge
            .reconcile(&request, &Drivers::from_mock(&cloud))
            .unwrap();
        assert_eq!(done.physical_resource_id, "Resource");
        assert!(cloud.calls().is_empty());
    }
}
