//! Service registry and per-verb call routing.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use harfang_frames::metadata;
use parking_lot::RwLock;

use crate::flow::{self, Flow, Publisher, Subscriber, SwitchOnFirst};
use crate::{Payload, Responder, RpcError};

type ServiceMap = HashMap<String, Arc<dyn Responder>>;

/// Routes each incoming call to the handler registered for the service
/// named in the call's metadata.
///
/// The registry is read on every call and written only at registration
/// time, so it sits behind a read/write lock; registering while traffic is
/// flowing is safe, and a call observes either the old or the new handler.
///
/// Failures follow the verb's channel: [`fire_and_forget`] has no result
/// stream and reports lookup failures to its direct caller, every other
/// verb converts them into an error signal on the returned stream. For
/// [`request_channel`] the routing header travels on the *first* payload of
/// the channel rather than out-of-band, so the lookup is interposed with a
/// [`SwitchOnFirst`]; the first payload is replayed to the resolved
/// handler's input stream, its metadata having doubled as the routing key.
///
/// [`fire_and_forget`]: Responder::fire_and_forget
/// [`request_channel`]: Responder::request_channel
pub struct ServiceDispatcher {
    services: Arc<RwLock<ServiceMap>>,
}

impl ServiceDispatcher {
    /// Create a dispatcher with no registered services.
    pub fn new() -> Self {
        ServiceDispatcher {
            services: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register `handler` for `service`, replacing any previous handler
    /// under that name.
    pub fn add_service(&self, service: impl Into<String>, handler: Arc<dyn Responder>) {
        let service = service.into();
        let replaced = self
            .services
            .write()
            .insert(service.clone(), handler)
            .is_some();
        if replaced {
            tracing::warn!(%service, "replacing registered service handler");
        } else {
            tracing::debug!(%service, "registered service");
        }
    }

    /// Remove the handler for `service`. Returns true if one was
    /// registered.
    pub fn remove_service(&self, service: &str) -> bool {
        self.services.write().remove(service).is_some()
    }

    /// Check whether a handler is registered for `service`.
    pub fn has_service(&self, service: &str) -> bool {
        self.services.read().contains_key(service)
    }

    /// The number of registered services.
    pub fn service_count(&self) -> usize {
        self.services.read().len()
    }

    fn route(&self, metadata: Option<&Bytes>) -> Result<Arc<dyn Responder>, RpcError> {
        lookup(&self.services, metadata)
    }
}

impl Default for ServiceDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup(
    services: &RwLock<ServiceMap>,
    metadata: Option<&Bytes>,
) -> Result<Arc<dyn Responder>, RpcError> {
    let meta = metadata.ok_or(RpcError::MissingMetadata)?;
    let service = metadata::service(meta)?;
    let handler = services
        .read()
        .get(service)
        .cloned()
        .ok_or_else(|| RpcError::UnknownService(service.to_string()))?;
    tracing::trace!(service, "routing call");
    Ok(handler)
}

impl Responder for ServiceDispatcher {
    fn fire_and_forget(&self, payload: Payload) -> Result<(), RpcError> {
        let handler = self.route(payload.metadata.as_ref())?;
        handler.fire_and_forget(payload)
    }

    fn request_response(&self, payload: Payload) -> Flow<Payload> {
        match self.route(payload.metadata.as_ref()) {
            Ok(handler) => handler.request_response(payload),
            Err(error) => flow::error(error),
        }
    }

    fn request_stream(&self, payload: Payload) -> Flow<Payload> {
        match self.route(payload.metadata.as_ref()) {
            Ok(handler) => handler.request_stream(payload),
            Err(error) => flow::error(error),
        }
    }

    fn request_channel(&self, payloads: Flow<Payload>) -> Flow<Payload> {
        Arc::new(RoutedChannel {
            source: payloads,
            services: self.services.clone(),
        })
    }
}

/// Deferred channel dispatch: the target service is unknown until the first
/// inbound payload arrives, so subscription interposes a [`SwitchOnFirst`]
/// whose router resolves the handler from that payload's metadata.
struct RoutedChannel {
    source: Flow<Payload>,
    services: Arc<RwLock<ServiceMap>>,
}

impl Publisher<Payload> for RoutedChannel {
    fn subscribe(self: Arc<Self>, subscriber: Arc<dyn Subscriber<Payload>>) {
        let services = self.services.clone();
        let op = SwitchOnFirst::new(subscriber, move |first: Payload, rest| {
            let handler = lookup(&services, first.metadata.as_ref())?;
            Ok(handler.request_channel(rest))
        });
        self.source.clone().subscribe(op);
    }
}
