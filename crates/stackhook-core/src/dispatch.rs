use crate::alias::DnsAlias;
use crate::bucket::BucketPurge;
use crate::certificate::DnsCertificate;
use crate::config::HandlerConfig;
use crate::lifecycle::{Reconciled, Reconciler};
use crate::CoreError;
use stackhook_protocol::{
    Envelope, LifecycleResponse, ProtocolError, RequestContext, ResourceKind,
};
use stackhook_remote::{
    CallbackSender, DriverFactory, HttpCallback, HttpDriverFactory,
};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Entry point for one inbound lifecycle event.
///
/// Every event whose envelope names a callback URL gets exactly one
/// acknowledgment, whatever happens while reconciling it: decode failures,
/// remote errors and panics all become a `FAILED` response.
pub struct Dispatcher {
    config: HandlerConfig,
    drivers: Arc<dyn DriverFactory>,
    callback: Arc<dyn CallbackSender>,
    reconcilers: Vec<Box<dyn Reconciler>>,
}

impl Dispatcher {
    pub fn new(
        config: HandlerConfig,
        drivers: Arc<dyn DriverFactory>,
        callback: Arc<dyn CallbackSender>,
    ) -> Self {
        let reconcilers: Vec<Box<dyn Reconciler>> = vec![
            Box::new(BucketPurge),
            Box::new(DnsAlias::from_config(&config)),
            Box::new(DnsCertificate::from_config(&config)),
        ];
        Self {
            config,
            drivers,
            callback,
            reconcilers,
        }
    }

    /// HTTP drivers and callback client for the configured remote endpoint.
    pub fn from_config(config: HandlerConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let context = config.client_context()?;
        let callback = HttpCallback::new(context.timeout());
        Ok(Self::new(
            config,
            Arc::new(HttpDriverFactory::new(context)),
            Arc::new(callback),
        ))
    }

    /// Replace the reconciler registered for the same resource kind.
    #[must_use]
    pub fn with_reconciler(mut self, reconciler: Box<dyn Reconciler>) -> Self {
        let kind = reconciler.kind();
        self.reconcilers.retain(|r| r.kind() != kind);
        self.reconcilers.push(reconciler);
        self
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Decode, reconcile and acknowledge one raw event.
    ///
    /// Errors only when nothing could be acknowledged (no readable
    /// `ResponseURL`) or when delivering the acknowledgment failed. The
    /// delivered response is returned on success.
    pub fn handle_event(&self, event: &[u8]) -> Result<LifecycleResponse, CoreError> {
        let envelope = Envelope::parse(event).map_err(|e| {
            error!("cannot acknowledge event: {e}");
            e
        })?;
        let response = self.respond(&envelope);
        let context = &envelope.context;

        info!(
            "request {} for {}: {} -> {:?}",
            context.request_id,
            context.logical_resource_id,
            envelope
                .request_type()
                .map_or_else(|_| "<unknown>".to_owned(), |t| t.to_string()),
            response.status
        );

        if let Err(e) = self.callback.deliver(&context.response_url, &response) {
            error!("request {}: {e}", context.request_id);
            return Err(e.into());
        }
        Ok(response)
    }

    /// The acknowledgment for an envelope, without delivering it.
    pub fn respond(&self, envelope: &Envelope) -> LifecycleResponse {
        let context = &envelope.context;
        let fallback_id = envelope
            .physical_resource_id()
            .unwrap_or(&context.logical_resource_id)
            .to_owned();

        let outcome = catch_unwind(AssertUnwindSafe(|| self.reconcile(envelope)))
            .unwrap_or_else(|panic| Err(CoreError::Panic(panic_message(panic.as_ref()))));

        match outcome {
            Ok(done) => {
                LifecycleResponse::success(context, done.physical_resource_id).with_data(done.data)
            }
            Err(e) => {
                warn!("request {} failed: {e}", context.request_id);
                LifecycleResponse::failed(context, fallback_id, e.to_string())
            }
        }
    }

    fn reconcile(&self, envelope: &Envelope) -> Result<Reconciled, CoreError> {
        let request = envelope.decode()?;
        let kind = self.route(&envelope.context)?;
        let reconciler = self
            .reconcilers
            .iter()
            .find(|r| r.kind() == kind)
            .ok_or_else(|| ProtocolError::UnknownResourceType(kind.to_string()))?;
        let drivers = self.drivers.connect();
        reconciler.reconcile(&request, &drivers)
    }

    /// The pinned kind wins; otherwise the envelope's `ResourceType`.
    fn route(&self, context: &RequestContext) -> Result<ResourceKind, CoreError> {
        if let Some(kind) = self.config.pinned_kind()? {
            return Ok(kind);
        }
        let name = context.resource_type.as_deref().unwrap_or_default();
        Ok(name.parse()?)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}
