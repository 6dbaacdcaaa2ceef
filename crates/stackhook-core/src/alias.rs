use crate::config::HandlerConfig;
use crate::lifecycle::{hosted_zone, required, unowned_delete, Reconciled, Reconciler};
use crate::patience::Patience;
use crate::CoreError;
use serde::Deserialize;
use stackhook_protocol::properties::u32_from_str_or_number;
use stackhook_protocol::{parse_properties, LifecycleRequest, Properties, RequestAction, ResourceKind};
use stackhook_remote::dns::{ChangeAction, ChangeBatch, ChangeInfo, RecordSet};
use stackhook_remote::{DnsDriver, Drivers};
use tracing::{debug, info};

pub const DEFAULT_ALIAS_TTL: u32 = 300;

fn default_ttl() -> u32 {
    DEFAULT_ALIAS_TTL
}

fn default_record_type() -> String {
    "CNAME".to_owned()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AliasProperties {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default = "default_ttl", deserialize_with = "u32_from_str_or_number")]
    ttl: u32,
    #[serde(default = "default_record_type")]
    record_type: String,
}

impl AliasProperties {
    fn parse(properties: &Properties) -> Result<Self, CoreError> {
        Ok(parse_properties(properties)?)
    }

    fn record(&self) -> Result<RecordSet, CoreError> {
        let source = required(self.source.as_deref(), "Source")?;
        let target = required(self.target.as_deref(), "Target")?;
        Ok(RecordSet::new(source, &self.record_type, self.ttl, target))
    }
}

/// Block until a submitted change batch has propagated.
pub(crate) fn wait_in_sync(
    dns: &dyn DnsDriver,
    patience: &Patience,
    submitted: &ChangeInfo,
) -> Result<(), CoreError> {
    if submitted.is_in_sync() {
        return Ok(());
    }
    patience.wait_for(&format!("DNS change {}", submitted.id), || {
        let current = dns.get_change(&submitted.id)?;
        Ok(current.is_in_sync().then_some(()))
    })
}

fn submit(
    dns: &dyn DnsDriver,
    patience: &Patience,
    zone: &str,
    action: ChangeAction,
    record: RecordSet,
) -> Result<(), CoreError> {
    debug!("{action} {} {} in {zone}", record.record_type, record.name);
    let batch = ChangeBatch::single(action, record);
    let submitted = dns.change_record_sets(zone, &batch)?;
    wait_in_sync(dns, patience, &submitted)
}

/// Keeps one `source -> target` record in the configured hosted zone.
///
/// The physical id is the source name, so it is stable across updates that
/// only move the target. A Delete under any other id touches nothing.
pub struct DnsAlias {
    hosted_zone_id: Option<String>,
    patience: Patience,
}

impl DnsAlias {
    pub fn new(hosted_zone_id: Option<&str>, patience: Patience) -> Self {
        Self {
            hosted_zone_id: hosted_zone_id.map(str::to_owned),
            patience,
        }
    }

    pub fn from_config(config: &HandlerConfig) -> Self {
        Self::new(config.hosted_zone(), config.patience())
    }
}

impl Reconciler for DnsAlias {
    fn kind(&self) -> ResourceKind {
        ResourceKind::DnsAlias
    }

    fn reconcile(
        &self,
        request: &LifecycleRequest,
        drivers: &Drivers,
    ) -> Result<Reconciled, CoreError> {
        let source = AliasProperties::parse(request.properties())
            .ok()
            .and_then(|p| p.source);
        if let Some(done) = unowned_delete(request, source.as_deref()) {
            info!("alias {} was never created, nothing to delete", done.physical_resource_id);
            return Ok(done);
        }

        let zone = hosted_zone(self.hosted_zone_id.as_deref())?;
        let record = AliasProperties::parse(request.properties())?.record()?;
        let dns = drivers.dns.as_ref();

        match &request.action {
            RequestAction::Create { .. } => {
                submit(dns, &self.patience, zone, ChangeAction::Create, record.clone())?;
            }
            RequestAction::Update { old_properties, .. } => {
                let old = AliasProperties::parse(old_properties)?.record()?;
                match submit(dns, &self.patience, zone, ChangeAction::Delete, old) {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {
                        info!("previous alias record already absent, continuing");
                    }
                    Err(e) => return Err(e),
                }
                submit(dns, &self.patience, zone, ChangeAction::Upsert, record.clone())?;
            }
            RequestAction::Delete { .. } => {
                match submit(dns, &self.patience, zone, ChangeAction::Delete, record.clone()) {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {
                        info!("alias record {} already absent", record.name);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(Reconciled::new(&record.name))
    }
}
