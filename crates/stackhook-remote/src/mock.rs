//! In-memory implementations of every driver, for tests and dry runs.
//!
//! Built only for this crate's tests or with the `mock` feature.
//!
//! `MockCloud` keeps buckets, hosted zones, pending DNS changes and
//! certificates behind one mutex and records every driver call in order, so
//! tests can assert both on final state and on call sequences across drivers.

use crate::certs::{
    CertificateDetail, CertificateDriver, CertificateRequest, CertificateStatus,
    CertificateSummary, DomainValidation, ValidationRecord,
};
use crate::dns::{ChangeAction, ChangeBatch, ChangeInfo, ChangeStatus, DnsDriver, RecordSet};
use crate::objects::{
    DeleteFailure, DeleteOutcome, ListCursor, ObjectStoreDriver, ObjectVersion, VersionPage,
    MAX_DELETE_BATCH, MAX_LIST_PAGE,
};
use crate::{CallbackError, CallbackSender, DriverError};
use stackhook_protocol::LifecycleResponse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

const MOCK_ACCOUNT: &str = "123456789012";

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    ListVersions { bucket: String, cursor: ListCursor },
    DeleteBatch { bucket: String, count: usize },
    ChangeRecordSets { zone_id: String, batch: ChangeBatch },
    GetChange { change_id: String },
    RequestCertificate { region: String, domain: String },
    DescribeCertificate { region: String, arn: String },
    ListCertificates { region: String, domain: String },
    DeleteCertificate { region: String, arn: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    ListVersions,
    DeleteBatch,
    ChangeRecordSets,
    GetChange,
    RequestCertificate,
    DescribeCertificate,
    ListCertificates,
    DeleteCertificate,
}

impl MockCall {
    pub fn op(&self) -> MockOp {
        match self {
            MockCall::ListVersions { .. } => MockOp::ListVersions,
            MockCall::DeleteBatch { .. } => MockOp::DeleteBatch,
            MockCall::ChangeRecordSets { .. } => MockOp::ChangeRecordSets,
            MockCall::GetChange { .. } => MockOp::GetChange,
            MockCall::RequestCertificate { .. } => MockOp::RequestCertificate,
            MockCall::DescribeCertificate { .. } => MockOp::DescribeCertificate,
            MockCall::ListCertificates { .. } => MockOp::ListCertificates,
            MockCall::DeleteCertificate { .. } => MockOp::DeleteCertificate,
        }
    }
}

/// How a requested certificate progresses once its validation records exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Issuance {
    /// Issued on the first describe after this many describes have passed.
    AfterDescribes(usize),
    /// Stays pending validation forever.
    Never,
    /// Moves to the given terminal status.
    Fail(CertificateStatus),
}

struct MockCertificate {
    region: String,
    detail: CertificateDetail,
    records: Vec<(String, ValidationRecord)>,
    describes: usize,
}

struct CloudState {
    buckets: BTreeMap<String, BTreeMap<ObjectVersion, bool>>,
    protected_keys: HashSet<String>,
    zones: HashMap<String, BTreeMap<(String, String), RecordSet>>,
    changes: HashMap<String, usize>,
    certificates: BTreeMap<String, MockCertificate>,
    next_id: usize,
    calls: Vec<MockCall>,
    failures: HashMap<MockOp, String>,
    page_size: usize,
    change_pending_polls: usize,
    validation_delay: usize,
    issuance: Issuance,
}

impl Default for CloudState {
    fn default() -> Self {
        Self {
            buckets: BTreeMap::new(),
            protected_keys: HashSet::new(),
            zones: HashMap::new(),
            changes: HashMap::new(),
            certificates: BTreeMap::new(),
            next_id: 0,
            calls: Vec::new(),
            failures: HashMap::new(),
            page_size: MAX_LIST_PAGE,
            change_pending_polls: 0,
            validation_delay: 0,
            issuance: Issuance::AfterDescribes(0),
        }
    }
}

impl CloudState {
    fn record(&mut self, call: MockCall) -> Result<(), DriverError> {
        let op = call.op();
        self.calls.push(call);
        match self.failures.remove(&op) {
            Some(message) => Err(DriverError::Api {
                status: 500,
                code: "InternalFailure".to_owned(),
                message,
            }),
            None => Ok(()),
        }
    }

    fn next_id(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }

    fn record_published(&self, name: &str, value: &str) -> bool {
        let name = normalize_name(name);
        self.zones.values().any(|zone| {
            zone.values()
                .any(|r| normalize_name(&r.name) == name && r.target() == Some(value))
        })
    }
}

fn normalize_name(name: &str) -> String {
    name.trim_end_matches('.').to_lowercase()
}

fn record_key(record: &RecordSet) -> (String, String) {
    (normalize_name(&record.name), record.record_type.to_uppercase())
}

fn validation_record(name: &str) -> (String, ValidationRecord) {
    let base = name.trim_start_matches("*.");
    let token = base.replace('.', "-");
    (
        name.to_owned(),
        ValidationRecord {
            name: format!("_validate.{base}."),
            record_type: "CNAME".to_owned(),
            value: format!("_{token}.acm-validations.aws."),
        },
    )
}

/// In-memory object store, hosted zones and certificate issuer.
pub struct MockCloud {
    state: Mutex<CloudState>,
}

impl Default for MockCloud {
    fn default() -> Self {
        Self {
            state: Mutex::new(CloudState::default()),
        }
    }
}

impl MockCloud {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, CloudState>, DriverError> {
        self.state
            .lock()
            .map_err(|e| DriverError::Http(format!("mutex poisoned: {e}")))
    }

    fn seed(&self) -> MutexGuard<'_, CloudState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- behaviour knobs ---

    /// Cap every listing page at `size` entries.
    pub fn set_page_size(&self, size: usize) {
        self.seed().page_size = size.max(1);
    }

    /// Report each submitted change as pending for `polls` status checks.
    pub fn set_change_delay(&self, polls: usize) {
        self.seed().change_pending_polls = polls;
    }

    /// Publish validation records only after `describes` describe calls.
    pub fn set_validation_delay(&self, describes: usize) {
        self.seed().validation_delay = describes;
    }

    pub fn set_issuance(&self, issuance: Issuance) {
        self.seed().issuance = issuance;
    }

    /// Fail the next call of `op` with an internal error carrying `message`.
    pub fn fail_next(&self, op: MockOp, message: &str) {
        self.seed().failures.insert(op, message.to_owned());
    }

    /// Make batch deletes report `AccessDenied` for `key`.
    pub fn protect_key(&self, key: &str) {
        self.seed().protected_keys.insert(key.to_owned());
    }

    // --- object store seeding and inspection ---

    pub fn add_bucket(&self, bucket: &str) {
        self.seed().buckets.entry(bucket.to_owned()).or_default();
    }

    /// Add `count` versions of `key` named `v00000`, `v00001`, ...
    pub fn put_versions(&self, bucket: &str, key: &str, count: usize) {
        let mut state = self.seed();
        let objects = state.buckets.entry(bucket.to_owned()).or_default();
        for i in 0..count {
            objects.insert(ObjectVersion::new(key, &format!("v{i:05}")), false);
        }
    }

    pub fn put_delete_marker(&self, bucket: &str, key: &str, version_id: &str) {
        let mut state = self.seed();
        let objects = state.buckets.entry(bucket.to_owned()).or_default();
        objects.insert(ObjectVersion::new(key, version_id), true);
    }

    /// Versions plus delete markers, or `None` if the bucket does not exist.
    pub fn object_count(&self, bucket: &str) -> Option<usize> {
        self.seed().buckets.get(bucket).map(BTreeMap::len)
    }

    // --- DNS seeding and inspection ---

    pub fn add_zone(&self, zone_id: &str) {
        self.seed().zones.entry(zone_id.to_owned()).or_default();
    }

    pub fn put_record(&self, zone_id: &str, record: RecordSet) {
        let mut state = self.seed();
        let zone = state.zones.entry(zone_id.to_owned()).or_default();
        zone.insert(record_key(&record), record);
    }

    pub fn records(&self, zone_id: &str) -> Vec<RecordSet> {
        self.seed()
            .zones
            .get(zone_id)
            .map(|z| z.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn record(&self, zone_id: &str, name: &str, record_type: &str) -> Option<RecordSet> {
        self.seed()
            .zones
            .get(zone_id)?
            .get(&(normalize_name(name), record_type.to_uppercase()))
            .cloned()
    }

    // --- certificate seeding and inspection ---

    /// Seed an existing certificate and return its ARN.
    pub fn add_certificate(&self, region: &str, domain: &str, status: CertificateStatus) -> String {
        let mut state = self.seed();
        let n = state.next_id();
        let arn = format!("arn:aws:acm:{region}:{MOCK_ACCOUNT}:certificate/mock-{n:04}");
        let records = vec![validation_record(domain)];
        let detail = CertificateDetail {
            certificate_arn: arn.clone(),
            domain_name: domain.to_owned(),
            status,
            subject_alternative_names: vec![domain.to_owned()],
            domain_validation_options: records
                .iter()
                .map(|(name, record)| DomainValidation {
                    domain_name: name.clone(),
                    resource_record: Some(record.clone()),
                })
                .collect(),
        };
        state.certificates.insert(
            arn.clone(),
            MockCertificate {
                region: region.to_owned(),
                detail,
                records,
                describes: 0,
            },
        );
        arn
    }

    pub fn certificate(&self, arn: &str) -> Option<CertificateDetail> {
        self.seed().certificates.get(arn).map(|c| c.detail.clone())
    }

    pub fn certificate_arns(&self) -> Vec<String> {
        self.seed().certificates.keys().cloned().collect()
    }

    // --- call log ---

    pub fn calls(&self) -> Vec<MockCall> {
        self.seed().calls.clone()
    }

    pub fn calls_of(&self, op: MockOp) -> Vec<MockCall> {
        self.seed()
            .calls
            .iter()
            .filter(|c| c.op() == op)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.seed().calls.clear();
    }
}

impl ObjectStoreDriver for MockCloud {
    fn list_versions(
        &self,
        bucket: &str,
        cursor: &ListCursor,
        max_keys: usize,
    ) -> Result<VersionPage, DriverError> {
        let mut state = self.state()?;
        state.record(MockCall::ListVersions {
            bucket: bucket.to_owned(),
            cursor: cursor.clone(),
        })?;
        let limit = max_keys.clamp(1, state.page_size);
        let objects = state
            .buckets
            .get(bucket)
            .ok_or_else(|| DriverError::NotFound(format!("NoSuchBucket: {bucket}")))?;

        let after = |v: &ObjectVersion| match (&cursor.key_marker, &cursor.version_id_marker) {
            (None, _) => true,
            (Some(key), None) => v.key.as_str() > key.as_str(),
            (Some(key), Some(version)) => {
                (v.key.as_str(), v.version_id.as_str()) > (key.as_str(), version.as_str())
            }
        };
        let mut remaining = objects.iter().filter(|(v, _)| after(v));
        let mut page = VersionPage::default();
        let mut last = None;
        for (version, is_marker) in remaining.by_ref().take(limit) {
            if *is_marker {
                page.delete_markers.push(version.clone());
            } else {
                page.versions.push(version.clone());
            }
            last = Some(version.clone());
        }
        page.is_truncated = remaining.next().is_some();
        if page.is_truncated {
            if let Some(last) = last {
                page.next_key_marker = Some(last.key);
                page.next_version_id_marker = Some(last.version_id);
            }
        }
        Ok(page)
    }

    fn delete_batch(
        &self,
        bucket: &str,
        objects: &[ObjectVersion],
    ) -> Result<DeleteOutcome, DriverError> {
        let mut state = self.state()?;
        state.record(MockCall::DeleteBatch {
            bucket: bucket.to_owned(),
            count: objects.len(),
        })?;
        if objects.len() > MAX_DELETE_BATCH {
            return Err(DriverError::Api {
                status: 400,
                code: "MalformedXML".to_owned(),
                message: format!("batch of {} exceeds the limit", objects.len()),
            });
        }
        let protected = state.protected_keys.clone();
        let stored = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| DriverError::NotFound(format!("NoSuchBucket: {bucket}")))?;

        let mut outcome = DeleteOutcome::default();
        for object in objects {
            if protected.contains(&object.key) {
                outcome.errors.push(DeleteFailure {
                    key: object.key.clone(),
                    version_id: object.version_id.clone(),
                    code: "AccessDenied".to_owned(),
                    message: "Access Denied".to_owned(),
                });
            } else {
                stored.remove(object);
                outcome.deleted += 1;
            }
        }
        Ok(outcome)
    }
}

impl DnsDriver for MockCloud {
    fn change_record_sets(
        &self,
        zone_id: &str,
        batch: &ChangeBatch,
    ) -> Result<ChangeInfo, DriverError> {
        let mut state = self.state()?;
        state.record(MockCall::ChangeRecordSets {
            zone_id: zone_id.to_owned(),
            batch: batch.clone(),
        })?;
        let zone = state
            .zones
            .get(zone_id)
            .ok_or_else(|| DriverError::Api {
                status: 404,
                code: "NoSuchHostedZone".to_owned(),
                message: format!("No hosted zone found with ID: {zone_id}"),
            })?;

        // Validate and apply against a copy so the batch is all-or-nothing.
        let mut next = zone.clone();
        for change in &batch.changes {
            let record = &change.resource_record_set;
            let key = record_key(record);
            let described = format!("[name='{}', type='{}']", key.0, key.1);
            match change.action {
                ChangeAction::Create => {
                    if next.contains_key(&key) {
                        return Err(DriverError::Api {
                            status: 400,
                            code: "InvalidChangeBatch".to_owned(),
                            message: format!(
                                "Tried to create resource record set {described} but it already exists"
                            ),
                        });
                    }
                    next.insert(key, record.clone());
                }
                ChangeAction::Delete => match next.get(&key) {
                    None => {
                        return Err(DriverError::NotFound(format!(
                            "Tried to delete resource record set {described} but it was not found"
                        )));
                    }
                    Some(existing)
                        if existing.resource_records != record.resource_records
                            || existing.ttl != record.ttl =>
                    {
                        return Err(DriverError::Api {
                            status: 400,
                            code: "InvalidChangeBatch".to_owned(),
                            message: format!(
                                "Tried to delete resource record set {described} but the values provided do not match the current values"
                            ),
                        });
                    }
                    Some(_) => {
                        next.remove(&key);
                    }
                },
                ChangeAction::Upsert => {
                    next.insert(key, record.clone());
                }
            }
        }
        state.zones.insert(zone_id.to_owned(), next);

        let id = format!("/change/C{:04}", state.next_id());
        let pending = state.change_pending_polls;
        state.changes.insert(id.clone(), pending);
        let status = if pending == 0 {
            ChangeStatus::Insync
        } else {
            ChangeStatus::Pending
        };
        Ok(ChangeInfo { id, status })
    }

    fn get_change(&self, change_id: &str) -> Result<ChangeInfo, DriverError> {
        let mut state = self.state()?;
        state.record(MockCall::GetChange {
            change_id: change_id.to_owned(),
        })?;
        let remaining = state
            .changes
            .get_mut(change_id)
            .ok_or_else(|| DriverError::Api {
                status: 404,
                code: "NoSuchChange".to_owned(),
                message: format!("No change found with ID: {change_id}"),
            })?;
        *remaining = remaining.saturating_sub(1);
        let status = if *remaining == 0 {
            ChangeStatus::Insync
        } else {
            ChangeStatus::Pending
        };
        Ok(ChangeInfo {
            id: change_id.to_owned(),
            status,
        })
    }
}

impl CertificateDriver for MockCloud {
    fn request_certificate(
        &self,
        region: &str,
        request: &CertificateRequest,
    ) -> Result<String, DriverError> {
        let mut state = self.state()?;
        state.record(MockCall::RequestCertificate {
            region: region.to_owned(),
            domain: request.domain_name.clone(),
        })?;
        let n = state.next_id();
        let arn = format!("arn:aws:acm:{region}:{MOCK_ACCOUNT}:certificate/mock-{n:04}");

        let mut names = vec![request.domain_name.clone()];
        for name in &request.subject_alternative_names {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        let records: Vec<(String, ValidationRecord)> =
            names.iter().map(|n| validation_record(n)).collect();
        let detail = CertificateDetail {
            certificate_arn: arn.clone(),
            domain_name: request.domain_name.clone(),
            status: CertificateStatus::PendingValidation,
            subject_alternative_names: names.clone(),
            domain_validation_options: names
                .iter()
                .map(|name| DomainValidation {
                    domain_name: name.clone(),
                    resource_record: None,
                })
                .collect(),
        };
        state.certificates.insert(
            arn.clone(),
            MockCertificate {
                region: region.to_owned(),
                detail,
                records,
                describes: 0,
            },
        );
        Ok(arn)
    }

    fn describe_certificate(
        &self,
        region: &str,
        arn: &str,
    ) -> Result<CertificateDetail, DriverError> {
        let mut state = self.state()?;
        state.record(MockCall::DescribeCertificate {
            region: region.to_owned(),
            arn: arn.to_owned(),
        })?;
        let validation_delay = state.validation_delay;
        let issuance = state.issuance;

        let (records, describes) = {
            let cert = state
                .certificates
                .get_mut(arn)
                .filter(|c| c.region == region)
                .ok_or_else(|| {
                    DriverError::NotFound(format!("ResourceNotFoundException: {arn}"))
                })?;
            cert.describes += 1;
            (cert.records.clone(), cert.describes)
        };

        let published = describes > validation_delay;
        let validated = published
            && records
                .iter()
                .all(|(_, r)| state.record_published(&r.name, &r.value));

        let cert = state
            .certificates
            .get_mut(arn)
            .ok_or_else(|| DriverError::NotFound(format!("ResourceNotFoundException: {arn}")))?;
        if published {
            for (option, (_, record)) in cert
                .detail
                .domain_validation_options
                .iter_mut()
                .zip(records.iter())
            {
                option.resource_record = Some(record.clone());
            }
        }
        if validated && cert.detail.status == CertificateStatus::PendingValidation {
            match issuance {
                Issuance::AfterDescribes(n) if describes > n => {
                    cert.detail.status = CertificateStatus::Issued;
                }
                Issuance::Fail(status) => cert.detail.status = status,
                Issuance::AfterDescribes(_) | Issuance::Never => {}
            }
        }
        Ok(cert.detail.clone())
    }

    fn list_certificates(
        &self,
        region: &str,
        domain: &str,
    ) -> Result<Vec<CertificateSummary>, DriverError> {
        let mut state = self.state()?;
        state.record(MockCall::ListCertificates {
            region: region.to_owned(),
            domain: domain.to_owned(),
        })?;
        Ok(state
            .certificates
            .values()
            .filter(|c| c.region == region && c.detail.domain_name == domain)
            .map(|c| CertificateSummary {
                certificate_arn: c.detail.certificate_arn.clone(),
                domain_name: c.detail.domain_name.clone(),
            })
            .collect())
    }

    fn delete_certificate(&self, region: &str, arn: &str) -> Result<(), DriverError> {
        let mut state = self.state()?;
        state.record(MockCall::DeleteCertificate {
            region: region.to_owned(),
            arn: arn.to_owned(),
        })?;
        match state.certificates.get(arn) {
            Some(cert) if cert.region == region => {
                state.certificates.remove(arn);
                Ok(())
            }
            _ => Err(DriverError::NotFound(format!(
                "ResourceNotFoundException: {arn}"
            ))),
        }
    }
}

/// Callback sender that records every delivery attempt.
#[derive(Default)]
pub struct RecordingCallback {
    deliveries: Mutex<Vec<(String, LifecycleResponse)>>,
    failure: Option<String>,
}

impl RecordingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sender whose every delivery attempt fails with a transport error.
    pub fn failing(message: &str) -> Self {
        Self {
            deliveries: Mutex::new(Vec::new()),
            failure: Some(message.to_owned()),
        }
    }

    pub fn deliveries(&self) -> Vec<(String, LifecycleResponse)> {
        self.deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CallbackSender for RecordingCallback {
    fn deliver(
        &self,
        response_url: &str,
        response: &LifecycleResponse,
    ) -> Result<(), CallbackError> {
        self.deliveries
            .lock()
            .map_err(|e| CallbackError::Transport(format!("mutex poisoned: {e}")))?
            .push((response_url.to_owned(), response.clone()));
        match self.failure {
            Some(ref message) => Err(CallbackError::Transport(message.clone())),
            None => Ok(()),
        }
    }
}
