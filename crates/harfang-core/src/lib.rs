//! Service dispatch, flow control, and stream routing for harfang RPC.
//!
//! The pieces compose around one vocabulary, the reactive-stream traits in
//! [`flow`]:
//!
//! - [`ServiceDispatcher`] routes the five interaction verbs to handlers
//!   registered by service name, reading the routing header that
//!   `harfang-frames` decodes from call metadata.
//! - [`flow::Relay`] decouples a producer that emits greedily from a
//!   consumer that paces itself, buffering the backlog without giving up
//!   backpressure correctness.
//! - [`flow::SwitchOnFirst`] lets the first element of a stream decide how
//!   the rest is handled; the dispatcher uses it for channel calls, whose
//!   routing header travels on the first payload.
//! - [`Requester`] is the caller-side counterpart, stamping the routing
//!   header onto outgoing calls.
//! - [`flow::into_stream`] bridges any of the above to
//!   `futures_core::Stream` for async consumers.
//!
//! Connection management, transports, and keepalive live elsewhere; this
//! crate operates purely on already-decoded payloads.

#![forbid(unsafe_code)]

pub mod dispatch;
pub mod flow;

mod error;
mod payload;
mod requester;
mod responder;

pub use dispatch::ServiceDispatcher;
pub use error::RpcError;
pub use payload::Payload;
pub use requester::Requester;
pub use responder::Responder;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use harfang_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::flow::{Flow, Publisher, Subscriber, Subscription};
    pub use crate::{Payload, Requester, Responder, RpcError, ServiceDispatcher};
}
