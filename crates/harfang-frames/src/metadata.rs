//! Encoding and decoding of the routing header carried in call metadata.
//!
//! Layout, all integers big-endian:
//!
//! ```text
//! u16 version
//! u16 service length | UTF-8 service name
//! u16 method length  | UTF-8 method name
//! u16 tracing length | raw tracing bytes
//! application metadata (remainder of buffer, no length prefix)
//! ```
//!
//! The accessors are flyweights: each walks the buffer on demand and borrows
//! from it, so reading the service name off a hot dispatch path costs no
//! allocation. Round-trip fidelity (`decode(encode(x)) == x`) is a wire
//! contract with peers; see the tests at the bottom of this file.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

/// Current version of the routing header layout.
pub const VERSION: u16 = 1;

const VERSION_SIZE: usize = 2;
const LEN_PREFIX_SIZE: usize = 2;

/// Error type for metadata encoding/decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataError {
    /// Buffer ends before the field being read.
    Truncated,
    /// Service or method name is not valid UTF-8.
    InvalidUtf8,
    /// Service name does not fit in a u16 length prefix.
    ServiceTooLong,
    /// Method name does not fit in a u16 length prefix.
    MethodTooLong,
    /// Tracing field does not fit in a u16 length prefix.
    TracingTooLong,
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataError::Truncated => write!(f, "metadata buffer truncated"),
            MetadataError::InvalidUtf8 => write!(f, "invalid UTF-8 in metadata name"),
            MetadataError::ServiceTooLong => {
                write!(f, "service name exceeds {} bytes", u16::MAX)
            }
            MetadataError::MethodTooLong => {
                write!(f, "method name exceeds {} bytes", u16::MAX)
            }
            MetadataError::TracingTooLong => {
                write!(f, "tracing field exceeds {} bytes", u16::MAX)
            }
        }
    }
}

impl std::error::Error for MetadataError {}

/// Encode a routing header.
///
/// An absent tracing context is encoded as an explicit zero-length field,
/// never omitted; application metadata occupies the remainder of the buffer
/// unprefixed and may be empty.
pub fn encode(
    service: &str,
    method: &str,
    tracing: &[u8],
    app_metadata: &[u8],
) -> Result<Bytes, MetadataError> {
    if service.len() > u16::MAX as usize {
        return Err(MetadataError::ServiceTooLong);
    }
    if method.len() > u16::MAX as usize {
        return Err(MetadataError::MethodTooLong);
    }
    if tracing.len() > u16::MAX as usize {
        return Err(MetadataError::TracingTooLong);
    }

    let mut buf = BytesMut::with_capacity(
        VERSION_SIZE
            + LEN_PREFIX_SIZE
            + service.len()
            + LEN_PREFIX_SIZE
            + method.len()
            + LEN_PREFIX_SIZE
            + tracing.len()
            + app_metadata.len(),
    );

    buf.put_u16(VERSION);
    buf.put_u16(service.len() as u16);
    buf.put_slice(service.as_bytes());
    buf.put_u16(method.len() as u16);
    buf.put_slice(method.as_bytes());
    buf.put_u16(tracing.len() as u16);
    buf.put_slice(tracing);
    buf.put_slice(app_metadata);

    Ok(buf.freeze())
}

fn read_u16(buf: &[u8], offset: usize) -> Result<u16, MetadataError> {
    let bytes = buf
        .get(offset..offset + 2)
        .ok_or(MetadataError::Truncated)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_field(buf: &[u8], offset: usize) -> Result<(&[u8], usize), MetadataError> {
    let len = read_u16(buf, offset)? as usize;
    let start = offset + LEN_PREFIX_SIZE;
    let field = buf
        .get(start..start + len)
        .ok_or(MetadataError::Truncated)?;
    Ok((field, start + len))
}

/// Read the layout version from a routing header.
pub fn version(buf: &[u8]) -> Result<u16, MetadataError> {
    read_u16(buf, 0)
}

/// Read the service name from a routing header.
pub fn service(buf: &[u8]) -> Result<&str, MetadataError> {
    let (field, _) = read_field(buf, VERSION_SIZE)?;
    std::str::from_utf8(field).map_err(|_| MetadataError::InvalidUtf8)
}

/// Read the method name from a routing header.
pub fn method(buf: &[u8]) -> Result<&str, MetadataError> {
    let (_, offset) = read_field(buf, VERSION_SIZE)?;
    let (field, _) = read_field(buf, offset)?;
    std::str::from_utf8(field).map_err(|_| MetadataError::InvalidUtf8)
}

/// Read the opaque tracing bytes from a routing header.
pub fn tracing(buf: &[u8]) -> Result<&[u8], MetadataError> {
    let (_, offset) = read_field(buf, VERSION_SIZE)?;
    let (_, offset) = read_field(buf, offset)?;
    let (field, _) = read_field(buf, offset)?;
    Ok(field)
}

/// Read the application metadata trailer from a routing header.
pub fn app_metadata(buf: &[u8]) -> Result<&[u8], MetadataError> {
    let (_, offset) = read_field(buf, VERSION_SIZE)?;
    let (_, offset) = read_field(buf, offset)?;
    let (_, offset) = read_field(buf, offset)?;
    // Remainder of the buffer, possibly empty.
    buf.get(offset..).ok_or(MetadataError::Truncated)
}

/// Owned view of a decoded routing header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMetadata {
    pub version: u16,
    pub service: String,
    pub method: String,
    pub tracing: Bytes,
    pub app_metadata: Bytes,
}

/// Decode a complete routing header into its owned form.
pub fn decode(buf: &[u8]) -> Result<RouteMetadata, MetadataError> {
    Ok(RouteMetadata {
        version: version(buf)?,
        service: service(buf)?.to_string(),
        method: method(buf)?.to_string(),
        tracing: Bytes::copy_from_slice(tracing(buf)?),
        app_metadata: Bytes::copy_from_slice(app_metadata(buf)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_fields() {
        let buf = encode(
            "com.example.Echo",
            "echo",
            &[0xde, 0xad],
            b"app-metadata",
        )
        .unwrap();

        let decoded = decode(&buf).unwrap();
        assert_eq!(decoded.version, VERSION);
        assert_eq!(decoded.service, "com.example.Echo");
        assert_eq!(decoded.method, "echo");
        assert_eq!(decoded.tracing, Bytes::from_static(&[0xde, 0xad]));
        assert_eq!(decoded.app_metadata, Bytes::from_static(b"app-metadata"));
    }

    #[test]
    fn zero_length_tracing_is_explicit() {
        let buf = encode("svc", "m", &[], b"trail").unwrap();

        // The tracing field is present as an explicit zero-length value,
        // and the trailer still decodes from the correct offset.
        assert_eq!(tracing(&buf).unwrap(), &[] as &[u8]);
        assert_eq!(app_metadata(&buf).unwrap(), b"trail");

        let decoded = decode(&buf).unwrap();
        assert_eq!(decoded.tracing.len(), 0);
        assert_eq!(decoded.app_metadata, Bytes::from_static(b"trail"));
    }

    #[test]
    fn empty_app_metadata() {
        let buf = encode("svc", "m", &[1, 2, 3], &[]).unwrap();
        assert_eq!(app_metadata(&buf).unwrap(), &[] as &[u8]);
    }

    #[test]
    fn accessors_walk_independently() {
        let buf = encode("weather", "forecast", &[7], b"x").unwrap();

        assert_eq!(version(&buf).unwrap(), VERSION);
        assert_eq!(service(&buf).unwrap(), "weather");
        assert_eq!(method(&buf).unwrap(), "forecast");
        assert_eq!(tracing(&buf).unwrap(), &[7]);
        assert_eq!(app_metadata(&buf).unwrap(), b"x");
    }

    #[test]
    fn empty_names_roundtrip() {
        let buf = encode("", "", &[], &[]).unwrap();
        let decoded = decode(&buf).unwrap();
        assert_eq!(decoded.service, "");
        assert_eq!(decoded.method, "");
    }

    #[test]
    fn truncated_buffer_rejected() {
        let buf = encode("service", "method", &[1, 2], b"meta").unwrap();

        // Chop the buffer at every boundary up to the end of the tracing
        // field and make sure nothing panics. (The trailer carries no
        // length prefix, so cuts inside it are not detectable.)
        let trailer_start = buf.len() - b"meta".len();
        for end in 0..trailer_start {
            let cut = &buf[..end];
            assert!(decode(cut).is_err(), "decode of {end} bytes should fail");
        }

        // A cut inside the service name fails the service accessor too.
        assert_eq!(service(&buf[..5]), Err(MetadataError::Truncated));
    }

    #[test]
    fn bad_length_prefix_rejected() {
        let mut raw = encode("svc", "m", &[], &[]).unwrap().to_vec();
        // Claim the service name is far longer than the buffer.
        raw[2] = 0xff;
        raw[3] = 0xff;
        assert_eq!(service(&raw), Err(MetadataError::Truncated));
    }

    #[test]
    fn invalid_utf8_rejected() {
        let mut raw = encode("ab", "m", &[], &[]).unwrap().to_vec();
        // Corrupt the service name bytes.
        raw[4] = 0xff;
        raw[5] = 0xfe;
        assert_eq!(service(&raw), Err(MetadataError::InvalidUtf8));
    }

    #[test]
    fn oversized_fields_rejected() {
        let long = "x".repeat(u16::MAX as usize + 1);
        assert_eq!(
            encode(&long, "m", &[], &[]),
            Err(MetadataError::ServiceTooLong)
        );
        assert_eq!(
            encode("s", &long, &[], &[]),
            Err(MetadataError::MethodTooLong)
        );
        let blob = vec![0u8; u16::MAX as usize + 1];
        assert_eq!(
            encode("s", "m", &blob, &[]),
            Err(MetadataError::TracingTooLong)
        );
    }

    #[test]
    fn version_is_first_two_bytes() {
        let buf = encode("s", "m", &[], &[]).unwrap();
        assert_eq!(&buf[..2], &VERSION.to_be_bytes());
    }

    #[test]
    fn error_display() {
        let s = format!("{}", MetadataError::Truncated);
        assert!(s.contains("truncated"));
        let s = format!("{}", MetadataError::ServiceTooLong);
        assert!(s.contains("service"));
    }
}
