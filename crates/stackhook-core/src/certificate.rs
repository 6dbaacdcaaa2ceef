use crate::alias::wait_in_sync;
use crate::config::HandlerConfig;
use crate::lifecycle::{hosted_zone, required, Reconciled, Reconciler};
use crate::patience::Patience;
use crate::CoreError;
use serde::Deserialize;
use stackhook_protocol::{parse_properties, LifecycleRequest, Properties, RequestAction, ResourceKind};
use stackhook_remote::certs::{
    arn_region, is_certificate_arn, CertificateDetail, CertificateRequest, CertificateStatus,
    ValidationRecord,
};
use stackhook_remote::dns::{ChangeAction, ChangeBatch};
use stackhook_remote::{CertificateDriver, Drivers};
use tracing::{debug, info, warn};

/// Output key carrying the issued certificate's ARN.
pub const CERTIFICATE_ARN_OUTPUT: &str = "CertificateArn";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CertificateProperties {
    #[serde(default)]
    domain_name: Option<String>,
    #[serde(default)]
    subject_alternative_names: Vec<String>,
    #[serde(default)]
    region: Option<String>,
}

impl CertificateProperties {
    fn parse(properties: &Properties) -> Result<Self, CoreError> {
        Ok(parse_properties(properties)?)
    }

    fn domain(&self) -> Result<&str, CoreError> {
        required(self.domain_name.as_deref(), "DomainName")
    }

    fn region<'a>(&'a self, default: &'a str) -> &'a str {
        self.region
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(default)
    }
}

fn check_status(detail: &CertificateDetail) -> Result<(), CoreError> {
    if detail.status.is_terminal_failure() {
        return Err(CoreError::CertificateFailed {
            arn: detail.certificate_arn.clone(),
            status: detail.status.to_string(),
        });
    }
    Ok(())
}

/// Issues DNS-validated certificates, publishing the validation records into
/// the configured hosted zone.
///
/// The physical id is the certificate ARN. Delete acts only on ARN-shaped ids,
/// so a resource whose Create never produced a certificate deletes cleanly
/// without remote calls. Validation records stay in the zone after deletion;
/// they are derived from the name and account and shared by every
/// certificate for that name.
pub struct DnsCertificate {
    hosted_zone_id: Option<String>,
    default_region: String,
    patience: Patience,
}

impl DnsCertificate {
    pub fn new(hosted_zone_id: Option<&str>, default_region: &str, patience: Patience) -> Self {
        Self {
            hosted_zone_id: hosted_zone_id.map(str::to_owned),
            default_region: default_region.to_owned(),
            patience,
        }
    }

    pub fn from_config(config: &HandlerConfig) -> Self {
        Self::new(
            config.hosted_zone(),
            &config.default_region,
            config.patience(),
        )
    }

    fn issue(
        &self,
        drivers: &Drivers,
        zone: &str,
        props: &CertificateProperties,
    ) -> Result<Reconciled, CoreError> {
        let domain = props.domain()?;
        let region = props.region(&self.default_region);
        let certs = drivers.certificates.as_ref();

        let request = CertificateRequest::dns_validated(domain, &props.subject_alternative_names);
        let arn = certs.request_certificate(region, &request)?;
        info!("requested certificate {arn} for {domain} in {region}");

        let detail = self
            .patience
            .wait_for(&format!("validation records of {arn}"), || {
                let detail = certs.describe_certificate(region, &arn)?;
                check_status(&detail)?;
                Ok(detail.validation_records_ready().then_some(detail))
            })?;

        let records = detail.validation_records();
        debug!("publishing {} validation records into {zone}", records.len());
        let batch = ChangeBatch::of(
            ChangeAction::Upsert,
            records.iter().map(ValidationRecord::to_record_set),
        )
        .with_comment(&format!("validation for {domain}"));
        let submitted = drivers.dns.change_record_sets(zone, &batch)?;
        wait_in_sync(drivers.dns.as_ref(), &self.patience, &submitted)?;

        self.patience.wait_for(&format!("issuance of {arn}"), || {
            let detail = certs.describe_certificate(region, &arn)?;
            check_status(&detail)?;
            Ok((detail.status == CertificateStatus::Issued).then_some(()))
        })?;
        info!("certificate {arn} issued");

        Ok(Reconciled::new(&arn).with_output(CERTIFICATE_ARN_OUTPUT, &arn))
    }

    /// Remove the certificate an Update replaces.
    fn retire(
        &self,
        certs: &dyn CertificateDriver,
        physical_id: &str,
        old: &CertificateProperties,
    ) -> Result<(), CoreError> {
        if is_certificate_arn(physical_id) {
            return delete_certificate(certs, physical_id);
        }
        let Some(domain) = old.domain_name.as_deref().filter(|d| !d.is_empty()) else {
            debug!("no previous certificate to retire");
            return Ok(());
        };
        let region = old.region(&self.default_region);
        let found = certs.list_certificates(region, domain)?;
        match found.as_slice() {
            [only] => delete_certificate(certs, &only.certificate_arn),
            [] => {
                debug!("no previous certificate for {domain} in {region}");
                Ok(())
            }
            many => {
                warn!(
                    "{} certificates match {domain} in {region}, leaving them in place",
                    many.len()
                );
                Ok(())
            }
        }
    }
}

fn delete_certificate(certs: &dyn CertificateDriver, arn: &str) -> Result<(), CoreError> {
    let Some(region) = arn_region(arn) else {
        return Ok(());
    };
    match certs.delete_certificate(region, arn) {
        Ok(()) => {
            info!("deleted certificate {arn}");
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            info!("certificate {arn} already deleted");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

impl Reconciler for DnsCertificate {
    fn kind(&self) -> ResourceKind {
        ResourceKind::DnsCertificate
    }

    fn reconcile(
        &self,
        request: &LifecycleRequest,
        drivers: &Drivers,
    ) -> Result<Reconciled, CoreError> {
        match &request.action {
            RequestAction::Create { properties } => {
                let zone = hosted_zone(self.hosted_zone_id.as_deref())?;
                let props = CertificateProperties::parse(properties)?;
                self.issue(drivers, zone, &props)
            }
            RequestAction::Update {
                properties,
                old_properties,
                physical_resource_id,
            } => {
                let zone = hosted_zone(self.hosted_zone_id.as_deref())?;
                let props = CertificateProperties::parse(properties)?;
                props.domain()?;
                let old = CertificateProperties::parse(old_properties)?;
                self.retire(drivers.certificates.as_ref(), physical_resource_id, &old)?;
                self.issue(drivers, zone, &props)
            }
            RequestAction::Delete { .. } => {
                let id = request
                    .physical_resource_id()
                    .unwrap_or(&request.context.logical_resource_id);
                if is_certificate_arn(id) {
                    delete_certificate(drivers.certificates.as_ref(), id)?;
                } else {
                    debug!("physical id '{id}' is not a certificate, nothing to delete");
                }
                Ok(Reconciled::new(id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::testing::request;
    use serde_json::json;
    use stackhook_remote::mock::{Issuance, MockCall, MockCloud, MockOp};
    use std::sync::Arc;

    const ZONE: &str = "ZCERT";

    fn setup() -> (Arc<MockCloud>, Drivers, DnsCertificate) {
        let cloud = Arc::new(MockCloud::new());
        cloud.add_zone(ZONE);
        let drivers = Drivers::from_mock(&cloud);
        let handler = DnsCertificate::new(Some(ZONE), "us-east-1", Patience::immediate(6));
        (cloud, drivers, handler)
    }

    #[test]
    fn create_issues_and_publishes_validation() {
        let (cloud, drivers, handler) = setup();
        cloud.set_validation_delay(2);
        let req = request(
            "Create",
            json!({"ResourceProperties": {
                "DomainName": "example.com",
                "SubjectAlternativeNames": ["*.example.com"]
            }}),
        );
        let done = handler.reconcile(&req, &drivers).unwrap();

        assert!(is_certificate_arn(&done.physical_resource_id));
        assert!(done.physical_resource_id.starts_with("arn:aws:acm:us-east-1:"));
        assert_eq!(done.data[CERTIFICATE_ARN_OUTPUT], done.physical_resource_id.as_str());
        let detail = cloud.certificate(&done.physical_resource_id).unwrap();
        assert_eq!(detail.status, CertificateStatus::Issued);

        // Apex and wildcard share a single validation record.
        let batches: Vec<ChangeBatch> = cloud
            .calls_of(MockOp::ChangeRecordSets)
            .into_iter()
            .filter_map(|c| match c {
                MockCall::ChangeRecordSets { batch, .. } => Some(batch),
                _ => None,
            })
            .collect();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].changes.len(), 1);
        assert_eq!(batches[0].changes[0].action, ChangeAction::Upsert);
        assert!(cloud.record(ZONE, "_validate.example.com.", "CNAME").is_some());
    }

    #[test]
    fn region_property_overrides_default() {
        let (_cloud, drivers, handler) = setup();
        let req = request(
            "Create",
            json!({"ResourceProperties": {"DomainName": "eu.example.com", "Region": "eu-west-1"}}),
        );
        let done = handler.reconcile(&req, &drivers).unwrap();
        assert_eq!(arn_region(&done.physical_resource_id), Some("eu-west-1"));
    }

    #[test]
    fn never_issued_times_out() {
        let (cloud, drivers, handler) = setup();
        cloud.set_issuance(Issuance::Never);
        let req = request("Create", json!({"ResourceProperties": {"DomainName": "slow.example.com"}}));
        let err = handler.reconcile(&req, &drivers).unwrap_err();
        assert!(matches!(err, CoreError::Timeout { attempts: 6, .. }));
        assert!(err.to_string().contains("issuance of arn:aws:acm:"));
    }

    #[test]
    fn terminal_status_fails_immediately() {
        let (cloud, drivers, handler) = setup();
        cloud.set_issuance(Issuance::Fail(CertificateStatus::ValidationTimedOut));
        let req = request("Create", json!({"ResourceProperties": {"DomainName": "bad.example.com"}}));
        let err = handler.reconcile(&req, &drivers).unwrap_err();
        assert!(matches!(err, CoreError::CertificateFailed { .. }));
        assert!(err.to_string().contains("VALIDATION_TIMED_OUT"));
    }

    #[test]
    fn delete_with_non_arn_id_makes_no_calls() {
        let (cloud, drivers, handler) = setup();
        let req = request(
            "Delete",
            json!({"PhysicalResourceId": "Resource", "ResourceProperties": {"DomainName": "x.example.com"}}),
        );
        let done = handler.reconcile(&req, &drivers).unwrap();
        assert_eq!(done.physical_resource_id, "Resource");
        assert!(cloud.calls().is_empty());
    }

    #[test]
    fn delete_without_zone_still_works() {
        let cloud = Arc::new(MockCloud::new());
        let arn = cloud.add_certificate("us-west-2", "x.example.com", CertificateStatus::Issued);
        let handler = DnsCertificate::new(None, "us-east-1", Patience::immediate(1));
        let req = request("Delete", json!({"PhysicalResourceId": &arn}));
        handler.reconcile(&req, &Drivers::from_mock(&cloud)).unwrap();

        assert!(cloud.certificate(&arn).is_none());
        assert_eq!(
            cloud.calls(),
            vec![MockCall::DeleteCertificate {
                region: "us-west-2".to_owned(),
                arn: arn.clone()
            }]
        );
    }

    #[test]
    fn delete_of_missing_certificate_succeeds() {
        let (_cloud, drivers, handler) = setup();
        let req = request(
            "Delete",
            json!({"PhysicalResourceId": "arn:aws:acm:us-east-1:123456789012:certificate/gone"}),
        );
        assert!(handler.reconcile(&req, &drivers).is_ok());
    }

    #[test]
    fn update_replaces_certificate_by_arn() {
        let (cloud, drivers, handler) = setup();
        let old = cloud.add_certificate("us-east-1", "old.example.com", CertificateStatus::Issued);
        let req = request(
            "Update",
            json!({
                "PhysicalResourceId": &old,
                "ResourceProperties": {"DomainName": "new.example.com"},
                "OldResourceProperties": {"DomainName": "old.example.com"}
            }),
        );
        let done = handler.reconcile(&req, &drivers).unwrap();
        assert_ne!(done.physical_resource_id, old);
        assert!(cloud.certificate(&old).is_none());
        assert_eq!(cloud.certificate_arns(), vec![done.physical_resource_id.clone()]);

        let first = cloud.calls().into_iter().next().unwrap();
        assert_eq!(first.op(), MockOp::DeleteCertificate);
    }

    #[test]
    fn update_finds_old_certificate_by_domain() {
        let (cloud, drivers, handler) = setup();
        let old = cloud.add_certificate("us-east-1", "old.example.com", CertificateStatus::Issued);
        let req = request(
            "Update",
            json!({
                "PhysicalResourceId": "Resource",
                "ResourceProperties": {"DomainName": "new.example.com"},
                "OldResourceProperties": {"DomainName": "old.example.com"}
            }),
        );
        handler.reconcile(&req, &drivers).unwrap();
        assert!(cloud.certificate(&old).is_none());
    }

    #[test]
    fn update_leaves_ambiguous_matches() {
        let (cloud, drivers, handler) = setup();
        let a = cloud.add_certificate("us-east-1", "old.example.com", CertificateStatus::Issued);
        let b = cloud.add_certificate("us-east-1", "old.example.com", CertificateStatus::Issued);
        let req = request(
            "Update",
            json!({
                "PhysicalResourceId": "Resource",
                "ResourceProperties": {"DomainName": "new.example.com"},
                "OldResourceProperties": {"DomainName": "old.example.com"}
            }),
        );
        handler.reconcile(&req, &drivers).unwrap();
        assert!(cloud.certificate(&a).is_some());
        assert!(cloud.certificate(&b).is_some());
        assert!(cloud.calls_of(MockOp::DeleteCertificate).is_empty());
    }

    #[test]
    fn create_requires_hosted_zone() {
        let cloud = Arc::new(MockCloud::new());
        let handler = DnsCertificate::new(None, "us-east-1", Patience::immediate(1));
        let req = request("Create", json!({"ResourceProperties": {"DomainName": "a.example.com"}}));
        let err = handler.reconcile(&req, &Drivers::from_mock(&cloud)).unwrap_err();
        assert!(matches!(err, CoreError::MissingHostedZone));
        assert!(cloud.calls().is_empty());
    }
}
