use crate::dns::RecordSet;
use crate::http::JsonTransport;
use crate::{ClientContext, DriverError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// TTL used when publishing validation records.
pub const VALIDATION_RECORD_TTL: u32 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CertificateRequest {
    pub domain_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subject_alternative_names: Vec<String>,
    pub validation_method: String,
}

impl CertificateRequest {
    pub fn dns_validated(domain: &str, alternative_names: &[String]) -> Self {
        Self {
            domain_name: domain.to_owned(),
            subject_alternative_names: alternative_names.to_vec(),
            validation_method: "DNS".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificateStatus {
    PendingValidation,
    Issued,
    Inactive,
    Expired,
    ValidationTimedOut,
    Revoked,
    Failed,
}

impl CertificateStatus {
    /// Statuses from which the certificate will never become issued.
    pub fn is_terminal_failure(self) -> bool {
        matches!(
            self,
            CertificateStatus::Inactive
                | CertificateStatus::Expired
                | CertificateStatus::ValidationTimedOut
                | CertificateStatus::Revoked
                | CertificateStatus::Failed
        )
    }
}

impl fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CertificateStatus::PendingValidation => "PENDING_VALIDATION",
            CertificateStatus::Issued => "ISSUED",
            CertificateStatus::Inactive => "INACTIVE",
            CertificateStatus::Expired => "EXPIRED",
            CertificateStatus::ValidationTimedOut => "VALIDATION_TIMED_OUT",
            CertificateStatus::Revoked => "REVOKED",
            CertificateStatus::Failed => "FAILED",
        })
    }
}

/// DNS record the issuer requires to prove ownership of a name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ValidationRecord {
    pub name: String,
    #[serde(rename = "Type")]
    pub record_type: String,
    pub value: String,
}

impl ValidationRecord {
    pub fn to_record_set(&self) -> RecordSet {
        RecordSet::new(
            &self.name,
            &self.record_type,
            VALIDATION_RECORD_TTL,
            &self.value,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DomainValidation {
    pub domain_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_record: Option<ValidationRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CertificateDetail {
    pub certificate_arn: String,
    pub domain_name: String,
    pub status: CertificateStatus,
    #[serde(default)]
    pub subject_alternative_names: Vec<String>,
    #[serde(default)]
    pub domain_validation_options: Vec<DomainValidation>,
}

impl CertificateDetail {
    /// Whether every name awaiting validation has its record published yet.
    pub fn validation_records_ready(&self) -> bool {
        !self.domain_validation_options.is_empty()
            && self
                .domain_validation_options
                .iter()
                .all(|o| o.resource_record.is_some())
    }

    /// Distinct validation records; names under a shared parent reuse one.
    pub fn validation_records(&self) -> Vec<ValidationRecord> {
        let mut records: Vec<ValidationRecord> = Vec::new();
        for record in self
            .domain_validation_options
            .iter()
            .filter_map(|o| o.resource_record.as_ref())
        {
            if !records.contains(record) {
                records.push(record.clone());
            }
        }
        records
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CertificateSummary {
    pub certificate_arn: String,
    pub domain_name: String,
}

/// Whether `value` has the shape of a certificate identifier:
/// `arn:<partition>:acm:<region>:<account>:certificate/<id>`.
pub fn is_certificate_arn(value: &str) -> bool {
    let parts: Vec<&str> = value.splitn(6, ':').collect();
    let [prefix, partition, service, region, account, resource] = parts.as_slice() else {
        return false;
    };
    *prefix == "arn"
        && partition.starts_with("aws")
        && *service == "acm"
        && !region.is_empty()
        && !account.is_empty()
        && resource
            .strip_prefix("certificate/")
            .is_some_and(|id| !id.is_empty())
}

/// Region component of a certificate ARN.
pub fn arn_region(arn: &str) -> Option<&str> {
    if !is_certificate_arn(arn) {
        return None;
    }
    arn.split(':').nth(3)
}

/// Certificate issuer API surface. Every call is scoped to a region.
pub trait CertificateDriver: Send + Sync {
    /// Request a new certificate; returns its ARN.
    fn request_certificate(
        &self,
        region: &str,
        request: &CertificateRequest,
    ) -> Result<String, DriverError>;

    fn describe_certificate(
        &self,
        region: &str,
        arn: &str,
    ) -> Result<CertificateDetail, DriverError>;

    /// Certificates whose primary domain is `domain`.
    fn list_certificates(
        &self,
        region: &str,
        domain: &str,
    ) -> Result<Vec<CertificateSummary>, DriverError>;

    fn delete_certificate(&self, region: &str, arn: &str) -> Result<(), DriverError>;
}

/// HTTP certificate driver.
///
/// - `POST   /acm/<region>/certificates` with `{DomainName, SubjectAlternativeNames, ValidationMethod}`
/// - `GET    /acm/<region>/certificate?arn=`
/// - `GET    /acm/<region>/certificates?domain=`
/// - `DELETE /acm/<region>/certificate?arn=`
pub struct HttpCertificates {
    transport: JsonTransport,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RequestResponse {
    certificate_arn: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeResponse {
    certificate: CertificateDetail,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListResponse {
    #[serde(default)]
    certificate_summary_list: Vec<CertificateSummary>,
}

impl HttpCertificates {
    pub fn new(context: ClientContext) -> Self {
        Self {
            transport: JsonTransport::new(context),
        }
    }
}

impl CertificateDriver for HttpCertificates {
    fn request_certificate(
        &self,
        region: &str,
        request: &CertificateRequest,
    ) -> Result<String, DriverError> {
        let resp: RequestResponse = self
            .transport
            .post(&format!("acm/{region}/certificates"), request)?;
        Ok(resp.certificate_arn)
    }

    fn describe_certificate(
        &self,
        region: &str,
        arn: &str,
    ) -> Result<CertificateDetail, DriverError> {
        let resp: DescribeResponse = self
            .transport
            .get(&format!("acm/{region}/certificate"), &[("arn", arn)])?;
        Ok(resp.certificate)
    }

    fn list_certificates(
        &self,
        region: &str,
        domain: &str,
    ) -> Result<Vec<CertificateSummary>, DriverError> {
        let resp: ListResponse = self
            .transport
            .get(&format!("acm/{region}/certificates"), &[("domain", domain)])?;
        Ok(resp
            .certificate_summary_list
            .into_iter()
            .filter(|c| c.domain_name == domain)
            .collect())
    }

    fn delete_certificate(&self, region: &str, arn: &str) -> Result<(), DriverError> {
        self.transport
            .delete(&format!("acm/{region}/certificate"), &[("arn", arn)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_server::MockServer;

    const ARN: &str = "arn:aws:acm:us-east-1:123456789012:certificate/1f2e3d";

    fn certs(url: &str) -> HttpCertificates {
        HttpCertificates::new(ClientContext::new(url))
    }

    #[test]
    fn arn_shape() {
        assert!(is_certificate_arn(ARN));
        assert!(is_certificate_arn(
            "arn:aws-cn:acm:cn-north-1:123456789012:certificate/abc"
        ));
        assert!(!is_certificate_arn(""));
        assert!(!is_certificate_arn("SiteCertificate"));
        assert!(!is_certificate_arn("arn:aws:s3:::bucket"));
        assert!(!is_certificate_arn("arn:aws:acm:us-east-1:123456789012:certificate/"));
        assert!(!is_certificate_arn("arn:aws:acm::123456789012:certificate/abc"));
        assert_eq!(arn_region(ARN), Some("us-east-1"));
        assert_eq!(arn_region("nope"), None);
    }

    #[test]
    fn validation_records_are_deduplicated() {
        let record = ValidationRecord {
            name: "_x.example.com.".to_owned(),
            record_type: "CNAME".to_owned(),
            value: "_y.acm-validations.aws.".to_owned(),
        };
        let detail = CertificateDetail {
            certificate_arn: ARN.to_owned(),
            domain_name: "example.com".to_owned(),
            status: CertificateStatus::PendingValidation,
            subject_alternative_names: vec!["www.example.com".to_owned()],
            domain_validation_options: vec![
                DomainValidation {
                    domain_name: "example.com".to_owned(),
                    resource_record: Some(record.clone()),
                },
                DomainValidation {
                    domain_name: "*.example.com".to_owned(),
                    resource_record: Some(record.clone()),
                },
            ],
        };
        assert!(detail.validation_records_ready());
        assert_eq!(detail.validation_records(), vec![record]);
    }

    #[test]
    fn records_not_ready_until_every_name_has_one() {
        let detail = CertificateDetail {
            certificate_arn: ARN.to_owned(),
            domain_name: "example.com".to_owned(),
            status: CertificateStatus::PendingValidation,
            subject_alternative_names: Vec::new(),
            domain_validation_options: vec![DomainValidation {
                domain_name: "example.com".to_owned(),
                resource_record: None,
            }],
        };
        assert!(!detail.validation_records_ready());
    }

    #[test]
    fn request_certificate_posts_dns_validation() {
        let server =
            MockServer::start(|_| (200, format!(r#"{{"CertificateArn": "{ARN}"}}"#)));
        let arn = certs(&server.addr)
            .request_certificate(
                "us-east-1",
                &CertificateRequest::dns_validated("example.com", &["www.example.com".to_owned()]),
            )
            .unwrap();
        assert_eq!(arn, ARN);

        let req = &server.captured_requests()[0];
        assert_eq!(req.path, "/acm/us-east-1/certificates");
        let body = req.json();
        assert_eq!(body["DomainName"], "example.com");
        assert_eq!(body["ValidationMethod"], "DNS");
        assert_eq!(body["SubjectAlternativeNames"][0], "www.example.com");
    }

    #[test]
    fn describe_parses_status_and_records() {
        let server = MockServer::start(|_| {
            (
                200,
                format!(
                    r#"{{"Certificate": {{
                        "CertificateArn": "{ARN}",
                        "DomainName": "example.com",
                        "Status": "PENDING_VALIDATION",
                        "DomainValidationOptions": [{{
                            "DomainName": "example.com",
                            "ResourceRecord": {{"Name": "_a.example.com.", "Type": "CNAME", "Value": "_b.acm-validations.aws."}}
                        }}]
                    }}}}"#
                ),
            )
        });
        let detail = certs(&server.addr).describe_certificate("us-east-1", ARN).unwrap();
        assert_eq!(detail.status, CertificateStatus::PendingValidation);
        assert_eq!(detail.validation_records()[0].name, "_a.example.com.");
        let path = &server.captured_requests()[0].path;
        assert!(path.starts_with("/acm/us-east-1/certificate?arn="), "{path}");
    }

    #[test]
    fn list_filters_on_exact_domain() {
        let server = MockServer::start(|_| {
            (
                200,
                format!(
                    r#"{{"CertificateSummaryList": [
                        {{"CertificateArn": "{ARN}", "DomainName": "example.com"}},
                        {{"CertificateArn": "arn:aws:acm:us-east-1:1:certificate/other", "DomainName": "other.example.com"}}
                    ]}}"#
                ),
            )
        });
        let found = certs(&server.addr).list_certificates("us-east-1", "example.com").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].certificate_arn, ARN);
    }

    #[test]
    fn delete_missing_certificate_is_not_found() {
        let server = MockServer::start(|_| {
            (
                400,
                r#"{"Code": "ResourceNotFoundException", "Message": "Could not find certificate"}"#
                    .to_owned(),
            )
        });
        let err = certs(&server.addr).delete_certificate("us-east-1", ARN).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(server.captured_requests()[0].method, "DELETE");
    }

    #[test]
    fn terminal_statuses() {
        assert!(CertificateStatus::Failed.is_terminal_failure());
        assert!(CertificateStatus::ValidationTimedOut.is_terminal_failure());
        assert!(!CertificateStatus::PendingValidation.is_terminal_failure());
        assert!(!CertificateStatus::Issued.is_terminal_failure());
    }
}
