use std::fmt;

use harfang_frames::MetadataError;

/// Errors surfaced by the dispatch and flow layers.
///
/// Protocol violations (`AlreadySubscribed`, `InvalidDemand`) are always
/// delivered synchronously, on the violating party's own channel. Routing
/// and handler failures travel on whichever channel the verb provides: the
/// returned `Result` for fire-and-forget and metadata-push, an error signal
/// on the result stream for everything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// A stream component accepts exactly one subscriber and already has it.
    AlreadySubscribed,

    /// `request(n)` was called with a non-positive demand.
    InvalidDemand(u32),

    /// The call requires metadata and none was attached.
    MissingMetadata,

    /// The decoded service name has no registered handler.
    UnknownService(String),

    /// The routing header could not be decoded.
    Metadata(MetadataError),

    /// A handler reported a failure.
    Handler(String),

    /// The verb is not implemented by this responder.
    Unimplemented(&'static str),
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::AlreadySubscribed => write!(f, "only one subscriber allowed"),
            RpcError::InvalidDemand(n) => {
                write!(f, "invalid demand, must be > 0: {}", n)
            }
            RpcError::MissingMetadata => write!(f, "metadata is empty"),
            RpcError::UnknownService(service) => {
                write!(f, "no handler registered for service {}", service)
            }
            RpcError::Metadata(err) => write!(f, "malformed routing metadata: {}", err),
            RpcError::Handler(msg) => write!(f, "handler failed: {}", msg),
            RpcError::Unimplemented(what) => write!(f, "{} is not implemented", what),
        }
    }
}

impl std::error::Error for RpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RpcError::Metadata(err) => Some(err),
            _ => None,
        }
    }
}

impl From<MetadataError> for RpcError {
    fn from(err: MetadataError) -> Self {
        RpcError::Metadata(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_service() {
        let err = RpcError::UnknownService("com.example.Ghost".to_string());
        let s = format!("{}", err);
        assert!(s.contains("com.example.Ghost"));
    }

    #[test]
    fn metadata_error_converts() {
        let err: RpcError = MetadataError::Truncated.into();
        assert_eq!(err, RpcError::Metadata(MetadataError::Truncated));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn invalid_demand_display() {
        let s = format!("{}", RpcError::InvalidDemand(0));
        assert!(s.contains("0"));
    }
}
