use bytes::Bytes;

/// A single unit of data exchanged over a connection.
///
/// Metadata is out-of-band with respect to the data; its absence is a
/// distinct, observable state and is what the dispatcher rejects with
/// [`RpcError::MissingMetadata`](crate::RpcError::MissingMetadata), not an
/// empty buffer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Payload {
    pub data: Bytes,
    pub metadata: Option<Bytes>,
}

impl Payload {
    /// A payload with no metadata attached.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Payload {
            data: data.into(),
            metadata: None,
        }
    }

    /// A payload carrying out-of-band metadata.
    pub fn with_metadata(data: impl Into<Bytes>, metadata: impl Into<Bytes>) -> Self {
        Payload {
            data: data.into(),
            metadata: Some(metadata.into()),
        }
    }
}
