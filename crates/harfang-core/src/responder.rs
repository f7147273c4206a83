use crate::flow::Flow;
use crate::{Payload, RpcError};

/// The five interaction verbs of a socket peer.
///
/// Implemented by application handlers registered with a
/// [`ServiceDispatcher`](crate::ServiceDispatcher), by the dispatcher
/// itself, and by the connection-facing sockets a
/// [`Requester`](crate::Requester) wraps. Implementations must be callable
/// re-entrantly; the dispatch layer assumes no shared mutable state between
/// distinct calls.
///
/// Failure routing follows the verb's shape: the two verbs without a result
/// stream report errors through their `Result` return value, the other
/// three always surface failures as an error signal on the returned stream
/// and never fail synchronously.
pub trait Responder: Send + Sync {
    /// One-way call. The only verb whose failures surface directly to the
    /// caller.
    fn fire_and_forget(&self, payload: Payload) -> Result<(), RpcError>;

    /// Request/response call. The returned stream emits at most one payload
    /// before its terminal signal.
    fn request_response(&self, payload: Payload) -> Flow<Payload>;

    /// Request with a multi-payload response stream.
    fn request_stream(&self, payload: Payload) -> Flow<Payload>;

    /// Bidirectional stream. The first inbound payload's metadata carries
    /// the routing header; see
    /// [`ServiceDispatcher`](crate::ServiceDispatcher) for how it is
    /// consumed.
    fn request_channel(&self, payloads: Flow<Payload>) -> Flow<Payload>;

    /// Out-of-band metadata push. Responders that do not support it keep
    /// this default.
    fn metadata_push(&self, payload: Payload) -> Result<(), RpcError> {
        let _ = payload;
        Err(RpcError::Unimplemented("metadata_push"))
    }
}
