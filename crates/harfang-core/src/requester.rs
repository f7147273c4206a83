//! Caller-side wrapper that stamps routing metadata onto outgoing calls.

use std::sync::Arc;

use bytes::BytesMut;
use harfang_frames::metadata;

use crate::flow::{self, Flow};
use crate::{Payload, Responder, RpcError};

/// A service-scoped view over a socket.
///
/// Every call made through a `Requester` gets a routing header prepended to
/// its metadata: the requester's service name, the per-call method name, an
/// explicit empty tracing field, and whatever metadata the payload already
/// carried as the application-metadata trailer. The peer's dispatcher reads
/// the same header back out; see
/// [`ServiceDispatcher`](crate::ServiceDispatcher).
pub struct Requester {
    service: String,
    socket: Arc<dyn Responder>,
}

impl Requester {
    pub fn new(service: impl Into<String>, socket: Arc<dyn Responder>) -> Self {
        Requester {
            service: service.into(),
            socket,
        }
    }

    /// The service this requester addresses.
    pub fn service(&self) -> &str {
        &self.service
    }

    fn tag(&self, method: &str, payload: Payload) -> Result<Payload, RpcError> {
        let meta = metadata::encode(
            &self.service,
            method,
            &[],
            payload.metadata.as_deref().unwrap_or(&[]),
        )?;
        Ok(Payload {
            data: payload.data,
            metadata: Some(meta),
        })
    }

    pub fn fire_and_forget(&self, method: &str, payload: Payload) -> Result<(), RpcError> {
        self.socket.fire_and_forget(self.tag(method, payload)?)
    }

    pub fn request_response(&self, method: &str, payload: Payload) -> Flow<Payload> {
        match self.tag(method, payload) {
            Ok(payload) => self.socket.request_response(payload),
            Err(error) => flow::error(error),
        }
    }

    pub fn request_stream(&self, method: &str, payload: Payload) -> Flow<Payload> {
        match self.tag(method, payload) {
            Ok(payload) => self.socket.request_stream(payload),
            Err(error) => flow::error(error),
        }
    }

    /// Open a channel; every outbound payload is tagged so the peer can
    /// route from whichever payload arrives first.
    pub fn request_channel(&self, method: &str, payloads: Flow<Payload>) -> Flow<Payload> {
        // The header prefix is identical for every payload of the channel;
        // encode it once and append each payload's own metadata trailer.
        let prefix = match metadata::encode(&self.service, method, &[], &[]) {
            Ok(prefix) => prefix,
            Err(error) => return flow::error(error.into()),
        };
        let tagged = flow::map(payloads, move |payload: Payload| {
            let app = payload.metadata.as_deref().unwrap_or(&[]);
            let mut meta = BytesMut::with_capacity(prefix.len() + app.len());
            meta.extend_from_slice(&prefix);
            meta.extend_from_slice(app);
            Payload {
                data: payload.data,
                metadata: Some(meta.freeze()),
            }
        });
        self.socket.request_channel(tagged)
    }
}
