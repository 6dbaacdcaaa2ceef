use crate::CoreError;
use stackhook_protocol::{LifecycleRequest, Properties, RequestType, ResourceKind};
use stackhook_remote::Drivers;

/// What a successful reconciliation establishes.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    /// Stable across updates unless the resource was replaced.
    pub physical_resource_id: String,
    pub data: Properties,
}

impl Reconciled {
    pub fn new(physical_resource_id: &str) -> Self {
        Self {
            physical_resource_id: physical_resource_id.to_owned(),
            data: Properties::new(),
        }
    }

    #[must_use]
    pub fn with_output(mut self, key: &str, value: &str) -> Self {
        self.data.insert(key.to_owned(), value.into());
        self
    }
}

/// One state machine per managed resource type.
///
/// `reconcile` performs every remote side effect for the request and either
/// returns the resulting identity or the error that becomes the `Reason` of
/// a failed acknowledgment. It never delivers the acknowledgment itself.
pub trait Reconciler: Send + Sync {
    fn kind(&self) -> ResourceKind;

    fn reconcile(
        &self,
        request: &LifecycleRequest,
        drivers: &Drivers,
    ) -> Result<Reconciled, CoreError>;
}

/// A non-blank required property value.
pub(crate) fn required<'a>(
    value: Option<&'a str>,
    name: &'static str,
) -> Result<&'a str, CoreError> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(CoreError::MissingProperty(name))
}

/// The configured hosted zone, checked before any remote call.
pub(crate) fn hosted_zone(zone: Option<&str>) -> Result<&str, CoreError> {
    zone.map(str::trim)
        .filter(|z| !z.is_empty())
        .ok_or(CoreError::MissingHostedZone)
}

/// The no-op result for a Delete whose physical id does not name `owned`.
///
/// A Create that failed before establishing anything is acknowledged under a
/// fallback id; the Delete that follows it must leave remote state alone.
pub(crate) fn unowned_delete(
    request: &LifecycleRequest,
    owned: Option<&str>,
) -> Option<Reconciled> {
    if request.request_type() != RequestType::Delete {
        return None;
    }
    let owned = owned.map(str::trim).filter(|s| !s.is_empty());
    match request.physical_resource_id() {
        Some(id) if Some(id) == owned => None,
        id => Some(Reconciled::new(id.unwrap_or(&request.context.logical_resource_id))),
    }
}
