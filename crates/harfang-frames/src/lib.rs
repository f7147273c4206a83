//! Routing metadata codec for harfang RPC calls.
//!
//! Every call carries an out-of-band metadata buffer whose prefix names the
//! target service and method (plus an opaque tracing field). This crate owns
//! the byte layout of that prefix; the dispatcher and the caller-side
//! requester consume it through the accessors in [`metadata`].

pub mod metadata;

pub use metadata::{MetadataError, RouteMetadata};
