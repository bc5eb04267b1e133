use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::constants::{flags, ErrorCode, FrameType};
use crate::error::{FrameError, Result};
use crate::frame::{Cancel, ErrorFrame, Frame, FrameBody, Keepalive, Lease, Payload, Setup};

/// Frame header: length (4) + type (2) + flags (2) + stream id (4) = 12 bytes.
pub const HEADER_SIZE: usize = 12;

/// Width of the metadata length field, which counts itself.
pub const METADATA_LENGTH_SIZE: usize = 4;

/// Default maximum frame size: 16 MiB.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const MAX_ENCODING_NAME: usize = u8::MAX as usize;

/// The fixed frame header as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub frame_type: u16,
    pub flags: u16,
    pub stream_id: u32,
}

/// Options for a single decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Skip the header length check, for transports that already delimit frames.
    pub length_optional: bool,
}

/// Configuration for the frame transform adapters.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum frame size in bytes, header included. Default: 16 MiB.
    pub max_frame_size: usize,
    /// Accept pre-delimited frames whose length field disagrees with the block.
    pub length_optional: bool,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            length_optional: false,
        }
    }
}

impl FrameConfig {
    pub(crate) fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            length_optional: self.length_optional,
        }
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────┬──────────┬───────────┬──────────────┬──────────────────────┐
/// │ Length     │ Type     │ Flags     │ Stream ID    │ Body                 │
/// │ (4B BE)    │ (2B BE)  │ (2B BE)   │ (4B BE)      │ type fields,         │
/// │ whole frame│          │           │              │ [md len+md], [data]  │
/// └────────────┴──────────┴───────────┴──────────────┴──────────────────────┘
/// ```
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    let total = frame.encoded_len();
    let length = u32::try_from(total).map_err(|_| FrameError::FrameTooLarge {
        size: total,
        max: u32::MAX as usize,
    })?;

    if let FrameBody::Setup(setup) = &frame.body {
        validate_encoding_name(&setup.metadata_encoding)?;
        validate_encoding_name(&setup.data_encoding)?;
    }

    let start = dst.len();
    dst.reserve(total);
    dst.put_u32(length);
    dst.put_u16(frame.frame_type().code());
    dst.put_u16(frame.wire_flags());
    dst.put_u32(frame.stream_id);

    match &frame.body {
        FrameBody::Setup(setup) => {
            dst.put_u32(setup.version);
            dst.put_u32(setup.keepalive);
            dst.put_u32(setup.max_lifetime);
            put_encoding_name(dst, &setup.metadata_encoding);
            put_encoding_name(dst, &setup.data_encoding);
            put_payload(dst, &setup.payload)?;
        }
        FrameBody::Lease(lease) => {
            dst.put_u32(lease.ttl);
            dst.put_u32(lease.budget);
            put_metadata(dst, lease.metadata.as_ref())?;
        }
        FrameBody::Keepalive(keepalive) => dst.put_slice(&keepalive.data),
        FrameBody::RequestResponse(payload) | FrameBody::Response(payload) => {
            put_payload(dst, payload)?;
        }
        FrameBody::Error(error) => {
            dst.put_u32(error.code.0);
            put_payload(dst, &error.payload)?;
        }
        FrameBody::Cancel(cancel) => put_metadata(dst, cancel.metadata.as_ref())?,
    }

    debug_assert_eq!(dst.len() - start, total);
    trace!(
        stream_id = frame.stream_id,
        frame_type = %frame.frame_type(),
        length,
        "encoded frame"
    );
    Ok(())
}

/// Encode a frame into a freshly allocated buffer.
pub fn encode_to_bytes(frame: &Frame) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(frame.encoded_len());
    encode_frame(frame, &mut buf)?;
    Ok(buf.freeze())
}

fn validate_encoding_name(name: &str) -> Result<()> {
    if !name.is_ascii() || name.len() > MAX_ENCODING_NAME {
        return Err(FrameError::InvalidEncodingName(name.to_string()));
    }
    Ok(())
}

fn put_encoding_name(dst: &mut BytesMut, name: &str) {
    // Length already validated to fit in a u8.
    dst.put_u8(name.len() as u8);
    dst.put_slice(name.as_bytes());
}

fn put_metadata(dst: &mut BytesMut, metadata: Option<&Bytes>) -> Result<()> {
    if let Some(metadata) = metadata {
        let len = METADATA_LENGTH_SIZE + metadata.len();
        let field = u32::try_from(len).map_err(|_| FrameError::FrameTooLarge {
            size: len,
            max: u32::MAX as usize,
        })?;
        dst.put_u32(field);
        dst.put_slice(metadata);
    }
    Ok(())
}

fn put_payload(dst: &mut BytesMut, payload: &Payload) -> Result<()> {
    put_metadata(dst, payload.metadata.as_ref())?;
    dst.put_slice(&payload.data);
    Ok(())
}

/// Decode the fixed header from the start of a buffer.
pub fn decode_header(buf: &[u8]) -> Result<FrameHeader> {
    if buf.len() < HEADER_SIZE {
        return Err(FrameError::Truncated {
            field: "header",
            needed: HEADER_SIZE,
            available: buf.len(),
        });
    }
    let mut header = &buf[..HEADER_SIZE];
    Ok(FrameHeader {
        length: header.get_u32(),
        frame_type: header.get_u16(),
        flags: header.get_u16(),
        stream_id: header.get_u32(),
    })
}

/// Decode one complete frame.
///
/// `buf` must hold exactly one frame. Metadata and data are sliced out of `buf`
/// without copying.
pub fn decode_frame(buf: Bytes, options: &DecodeOptions) -> Result<Frame> {
    let header = decode_header(&buf)?;

    if !options.length_optional && header.length as usize != buf.len() {
        return Err(FrameError::LengthMismatch {
            header: header.length,
            actual: buf.len(),
        });
    }

    let frame_type =
        FrameType::from_code(header.frame_type).ok_or(FrameError::UnknownType(header.frame_type))?;
    if !frame_type.is_implemented() {
        return Err(FrameError::UnimplementedType(frame_type));
    }

    let has_metadata = header.flags & flags::METADATA != 0;
    let mut cursor = Cursor::new(buf.slice(HEADER_SIZE..));

    let body = match frame_type {
        FrameType::Setup => {
            let version = cursor.u32("setup version")?;
            let keepalive = cursor.u32("setup keepalive")?;
            let max_lifetime = cursor.u32("setup max lifetime")?;
            let metadata_encoding = cursor.encoding_name("setup metadata encoding")?;
            let data_encoding = cursor.encoding_name("setup data encoding")?;
            FrameBody::Setup(Setup {
                version,
                keepalive,
                max_lifetime,
                lease: header.flags & flags::LEASE != 0,
                metadata_encoding,
                data_encoding,
                payload: cursor.payload(has_metadata)?,
            })
        }
        FrameType::Lease => {
            let ttl = cursor.u32("lease ttl")?;
            let budget = cursor.u32("lease budget")?;
            let metadata = cursor.metadata(has_metadata)?;
            cursor.ignore_trailing(frame_type);
            FrameBody::Lease(Lease {
                ttl,
                budget,
                metadata,
            })
        }
        FrameType::Keepalive => FrameBody::Keepalive(Keepalive {
            response: header.flags & flags::KEEPALIVE_RESPONSE != 0,
            data: cursor.rest(),
        }),
        FrameType::RequestResponse => FrameBody::RequestResponse(cursor.payload(has_metadata)?),
        FrameType::Response => FrameBody::Response(cursor.payload(has_metadata)?),
        FrameType::Error => {
            let code = ErrorCode(cursor.u32("error code")?);
            if !code.is_known() {
                debug!(stream_id = header.stream_id, %code, "passing through unknown error code");
            }
            FrameBody::Error(ErrorFrame {
                code,
                payload: cursor.payload(has_metadata)?,
            })
        }
        FrameType::Cancel => {
            let metadata = cursor.metadata(has_metadata)?;
            cursor.ignore_trailing(frame_type);
            FrameBody::Cancel(Cancel { metadata })
        }
        other => return Err(FrameError::UnimplementedType(other)),
    };

    trace!(
        stream_id = header.stream_id,
        frame_type = %frame_type,
        length = header.length,
        "decoded frame"
    );

    Ok(Frame {
        stream_id: header.stream_id,
        flags: header.flags & !frame_type.derived_flags(),
        body,
    })
}

/// Decode one complete frame from a borrowed slice (copies the bytes).
pub fn decode_slice(buf: &[u8], options: &DecodeOptions) -> Result<Frame> {
    decode_frame(Bytes::copy_from_slice(buf), options)
}

/// Split one complete length-prefixed frame off the front of a stream buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet. The
/// length prefix is validated before buffering so a corrupt prefix fails fast.
pub fn split_frame(src: &mut BytesMut, max_frame_size: usize) -> Result<Option<Bytes>> {
    if src.len() < 4 {
        return Ok(None);
    }

    let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
    let total = length as usize;
    if total < HEADER_SIZE {
        return Err(FrameError::InvalidLengthPrefix(length));
    }
    if total > max_frame_size {
        return Err(FrameError::FrameTooLarge {
            size: total,
            max: max_frame_size,
        });
    }

    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    Ok(Some(src.split_to(total).freeze()))
}

/// Bounds-checked reader over a frame body.
struct Cursor {
    buf: Bytes,
}

impl Cursor {
    fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn ensure(&self, field: &'static str, needed: usize) -> Result<()> {
        if self.buf.remaining() < needed {
            return Err(FrameError::Truncated {
                field,
                needed,
                available: self.buf.remaining(),
            });
        }
        Ok(())
    }

    fn u32(&mut self, field: &'static str) -> Result<u32> {
        self.ensure(field, 4)?;
        Ok(self.buf.get_u32())
    }

    fn encoding_name(&mut self, field: &'static str) -> Result<String> {
        self.ensure(field, 1)?;
        let len = usize::from(self.buf.get_u8());
        self.ensure(field, len)?;
        let raw = self.buf.split_to(len);
        if !raw.is_ascii() {
            return Err(FrameError::InvalidEncodingName(
                String::from_utf8_lossy(&raw).into_owned(),
            ));
        }
        // ASCII is valid UTF-8.
        Ok(raw.iter().map(|&b| char::from(b)).collect())
    }

    fn metadata(&mut self, present: bool) -> Result<Option<Bytes>> {
        if !present {
            return Ok(None);
        }
        self.ensure("metadata length", METADATA_LENGTH_SIZE)?;
        let field = self.buf.get_u32();
        let len = (field as usize)
            .checked_sub(METADATA_LENGTH_SIZE)
            .ok_or(FrameError::MalformedMetadataLength(field))?;
        self.ensure("metadata", len)?;
        Ok(Some(self.buf.split_to(len)))
    }

    fn payload(&mut self, has_metadata: bool) -> Result<Payload> {
        let metadata = self.metadata(has_metadata)?;
        Ok(Payload {
            metadata,
            data: self.rest(),
        })
    }

    fn rest(&mut self) -> Bytes {
        self.buf.split_to(self.buf.len())
    }

    fn ignore_trailing(&mut self, frame_type: FrameType) {
        if !self.buf.is_empty() {
            debug!(
                frame_type = %frame_type,
                trailing = self.buf.len(),
                "ignoring trailing bytes"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::VERSION;

    fn roundtrip(frame: &Frame) -> Frame {
        let bytes = encode_to_bytes(frame).unwrap();
        assert_eq!(bytes.len(), frame.encoded_len());
        decode_frame(bytes, &DecodeOptions::default()).unwrap()
    }

    fn sample_frames() -> Vec<Frame> {
        let mut setup = Setup::new(1_000, 10_000, "utf-8", "ascii");
        setup.payload = Payload::new("setup data").with_metadata("setup md");
        let leased = Setup {
            lease: true,
            ..Setup::new(0, 0, "", "binary")
        };

        vec![
            Frame::setup(setup),
            Frame::setup(leased).with_flags(flags::STRICT),
            Frame::lease(30_000, 100, None),
            Frame::lease(30_000, 100, Some(Bytes::from_static(b"lease md"))),
            Frame::keepalive(false, ""),
            Frame::keepalive(true, "ping"),
            Frame::request_response(1, Payload::new("data only")),
            Frame::request_response(3, Payload::new("").with_metadata("")),
            Frame::request_response(5, Payload::default()),
            Frame::response(2, Payload::new("d").with_metadata("m"))
                .with_flags(flags::COMPLETE),
            Frame::response(4, Payload::new("fragment")).with_flags(flags::FOLLOWS),
            Frame::error(7, ErrorCode::APPLICATION_ERROR, Payload::new("boom").with_metadata("why")),
            Frame::error(0, ErrorCode::CONNECTION_ERROR, Payload::default()),
            Frame::error(9, ErrorCode(0xDEAD), Payload::new("future code")),
            Frame::cancel(11, None),
            Frame::cancel(13, Some(Bytes::from_static(b"cancel md"))),
            Frame::request_response(15, Payload::new("x")).with_flags(flags::IGNORE),
        ]
    }

    #[test]
    fn test_roundtrip_every_type() {
        for frame in sample_frames() {
            assert_eq!(roundtrip(&frame), frame);
        }
    }

    #[test]
    fn test_header_layout() {
        let frame = Frame::request_response(0x0102_0304, Payload::new("hi").with_metadata("m"));
        let bytes = encode_to_bytes(&frame).unwrap();

        assert_eq!(&bytes[0..4], &(bytes.len() as u32).to_be_bytes());
        assert_eq!(&bytes[4..6], &[0x00, 0x04]);
        assert_eq!(&bytes[6..8], &flags::METADATA.to_be_bytes());
        assert_eq!(&bytes[8..12], &[0x01, 0x02, 0x03, 0x04]);

        let header = decode_header(&bytes).unwrap();
        assert_eq!(header, frame.header());
    }

    #[test]
    fn test_metadata_length_is_self_inclusive() {
        let frame = Frame::response(2, Payload::new("tail").with_metadata("hello"));
        let bytes = encode_to_bytes(&frame).unwrap();

        let md_len = u32::from_be_bytes(bytes[12..16].try_into().unwrap());
        assert_eq!(md_len as usize, 5 + METADATA_LENGTH_SIZE);
        assert_eq!(&bytes[16..21], b"hello");
        assert_eq!(&bytes[21..], b"tail");

        let decoded = decode_frame(bytes, &DecodeOptions::default()).unwrap();
        let FrameBody::Response(payload) = decoded.body else {
            panic!("expected response");
        };
        assert_eq!(payload.metadata.as_deref(), Some(&b"hello"[..]));
        assert_eq!(payload.data.as_ref(), b"tail");
    }

    #[test]
    fn test_absent_and_empty_metadata_differ() {
        let absent = encode_to_bytes(&Frame::response(2, Payload::new("x"))).unwrap();
        let empty = encode_to_bytes(&Frame::response(2, Payload::new("x").with_metadata(""))).unwrap();
        assert_eq!(empty.len(), absent.len() + METADATA_LENGTH_SIZE);

        let decoded = decode_frame(empty, &DecodeOptions::default()).unwrap();
        assert_eq!(decoded.metadata().map(|m| m.len()), Some(0));
        let decoded = decode_frame(absent, &DecodeOptions::default()).unwrap();
        assert_eq!(decoded.metadata(), None);
    }

    #[test]
    fn test_setup_lease_flag() {
        let leased = Setup {
            lease: true,
            ..Setup::new(500, 1_500, "utf-8", "utf-8")
        };
        let bytes = encode_to_bytes(&Frame::setup(leased)).unwrap();
        let header = decode_header(&bytes).unwrap();
        assert_eq!(header.flags & flags::LEASE, flags::LEASE);

        let FrameBody::Setup(setup) = decode_frame(bytes, &DecodeOptions::default()).unwrap().body
        else {
            panic!("expected setup");
        };
        assert!(setup.lease);
        assert_eq!(setup.version, VERSION);

        let plain = encode_to_bytes(&Frame::setup(Setup::new(500, 1_500, "utf-8", "utf-8"))).unwrap();
        let FrameBody::Setup(setup) = decode_frame(plain, &DecodeOptions::default()).unwrap().body
        else {
            panic!("expected setup");
        };
        assert!(!setup.lease);
    }

    #[test]
    fn test_length_mismatch() {
        let bytes = encode_to_bytes(&Frame::response(2, Payload::new("abc"))).unwrap();

        let mut longer = BytesMut::from(&bytes[..]);
        longer.put_u8(0);
        let err = decode_frame(longer.freeze(), &DecodeOptions::default()).unwrap_err();
        assert!(matches!(err, FrameError::LengthMismatch { header: 15, actual: 16 }));

        let shorter = bytes.slice(..bytes.len() - 1);
        assert!(matches!(
            decode_frame(shorter, &DecodeOptions::default()),
            Err(FrameError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_length_optional_skips_check() {
        let mut buf = BytesMut::from(&encode_to_bytes(&Frame::response(2, Payload::new("abc"))).unwrap()[..]);
        buf[0..4].copy_from_slice(&0u32.to_be_bytes());
        buf.put_slice(b"def");

        let options = DecodeOptions {
            length_optional: true,
        };
        let frame = decode_frame(buf.freeze(), &options).unwrap();
        let FrameBody::Response(payload) = frame.body else {
            panic!("expected response");
        };
        assert_eq!(payload.data.as_ref(), b"abcdef");
    }

    #[test]
    fn test_unimplemented_and_unknown_types() {
        for code in [0x0005u16, 0x0008, 0x0009, 0x000E, 0x000F, 0x0010] {
            let mut buf = BytesMut::new();
            buf.put_u32(HEADER_SIZE as u32);
            buf.put_u16(code);
            buf.put_u16(0);
            buf.put_u32(1);
            let err = decode_frame(buf.freeze(), &DecodeOptions::default()).unwrap_err();
            assert!(matches!(err, FrameError::UnimplementedType(ty) if ty.code() == code));
        }

        for code in [0x0000u16, 0x0011, 0x7777] {
            let mut buf = BytesMut::new();
            buf.put_u32(HEADER_SIZE as u32);
            buf.put_u16(code);
            buf.put_u16(0);
            buf.put_u32(1);
            let err = decode_frame(buf.freeze(), &DecodeOptions::default()).unwrap_err();
            assert!(matches!(err, FrameError::UnknownType(c) if c == code));
        }
    }

    #[test]
    fn test_truncated_bodies_fail_cleanly() {
        let bytes = encode_to_bytes(&Frame::setup(Setup::new(1, 2, "utf-8", "utf-8"))).unwrap();
        for cut in HEADER_SIZE..bytes.len() {
            let options = DecodeOptions {
                length_optional: true,
            };
            assert!(
                decode_frame(bytes.slice(..cut), &options).is_err(),
                "cut at {cut} should fail"
            );
        }

        assert!(matches!(
            decode_slice(&bytes[..5], &DecodeOptions::default()),
            Err(FrameError::Truncated { field: "header", .. })
        ));
    }

    #[test]
    fn test_metadata_length_overruns_buffer() {
        let mut buf = BytesMut::new();
        buf.put_u32(20);
        buf.put_u16(FrameType::Response.code());
        buf.put_u16(flags::METADATA);
        buf.put_u32(2);
        buf.put_u32(100);
        buf.put_u32(0);
        let err = decode_frame(buf.freeze(), &DecodeOptions::default()).unwrap_err();
        assert!(matches!(err, FrameError::Truncated { field: "metadata", .. }));
    }

    #[test]
    fn test_metadata_length_below_field_width() {
        let mut buf = BytesMut::new();
        buf.put_u32(16);
        buf.put_u16(FrameType::Cancel.code());
        buf.put_u16(flags::METADATA);
        buf.put_u32(2);
        buf.put_u32(3);
        let err = decode_frame(buf.freeze(), &DecodeOptions::default()).unwrap_err();
        assert!(matches!(err, FrameError::MalformedMetadataLength(3)));
    }

    #[test]
    fn test_cancel_ignores_trailing_bytes() {
        let mut buf = BytesMut::new();
        buf.put_u32(15);
        buf.put_u16(FrameType::Cancel.code());
        buf.put_u16(0);
        buf.put_u32(9);
        buf.put_slice(b"xyz");
        let frame = decode_frame(buf.freeze(), &DecodeOptions::default()).unwrap();
        assert_eq!(frame, Frame::cancel(9, None));
    }

    #[test]
    fn test_invalid_encoding_name_rejected() {
        let setup = Setup::new(1, 2, "caf\u{e9}", "utf-8");
        assert!(matches!(
            encode_to_bytes(&Frame::setup(setup)),
            Err(FrameError::InvalidEncodingName(_))
        ));

        let setup = Setup::new(1, 2, "a".repeat(256), "utf-8");
        assert!(matches!(
            encode_to_bytes(&Frame::setup(setup)),
            Err(FrameError::InvalidEncodingName(_))
        ));
    }

    #[test]
    fn test_split_frame_partial_and_pipelined() {
        let a = encode_to_bytes(&Frame::request_response(1, Payload::new("first"))).unwrap();
        let b = encode_to_bytes(&Frame::request_response(3, Payload::new("second"))).unwrap();

        let mut buf = BytesMut::new();
        buf.put_slice(&a[..3]);
        assert!(split_frame(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap().is_none());
        buf.put_slice(&a[3..]);
        buf.put_slice(&b);

        assert_eq!(split_frame(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap().unwrap(), a);
        assert_eq!(split_frame(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap().unwrap(), b);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_split_frame_rejects_bad_prefix() {
        let mut buf = BytesMut::from(&[0, 0, 0, 4][..]);
        assert!(matches!(
            split_frame(&mut buf, DEFAULT_MAX_FRAME_SIZE),
            Err(FrameError::InvalidLengthPrefix(4))
        ));

        let mut buf = BytesMut::from(&[0, 0, 1, 0][..]);
        assert!(matches!(
            split_frame(&mut buf, 64),
            Err(FrameError::FrameTooLarge { size: 256, max: 64 })
        ));
    }
}
