//! Frame decode/encode over an [`IOBuffer`]. A frame is a JSON header
//! object followed immediately by `s` bytes of opaque payload. The header is
//! capped at [`HEADER_MAX`] bytes and must contain no nested `}`, so a
//! decoder can find its end with a plain byte scan for the first `}`.

use iobuf::IOBuffer;

use crate::header::{Header, HeaderError};

/// Header fields are specified as at most ~256 bytes.
pub const HEADER_MAX: usize = 256;

/// A fully decoded frame: header plus its opaque payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub payload: Vec<u8>,
}

/// Result of attempting to decode one frame from a read buffer.
#[derive(Debug)]
pub enum Decoded {
    /// Not enough bytes buffered yet; the buffer is untouched, retry after
    /// more data arrives.
    Incomplete,
    /// One frame decoded and consumed from the buffer.
    Frame(Frame),
    /// A `}` was found but the header text before it did not parse. The
    /// malformed header bytes (and nothing past them, since payload length
    /// is unknown) were consumed so the stream can resynchronize on the
    /// next `}`.
    Invalid(HeaderError),
}

/// Attempts to decode the next frame from `buf`.
pub fn decode_frame(buf: &mut IOBuffer) -> Decoded {
    let data = buf.peek();
    let scan_len = data.len().min(HEADER_MAX);
    let Some(brace_idx) = data[..scan_len].iter().position(|&b| b == b'}') else {
        if data.len() > HEADER_MAX {
            // Oversized header with no terminator in the allowed window:
            // drop it so one corrupt peer can't wedge the connection.
            buf.get(HEADER_MAX);
            return Decoded::Invalid(HeaderError::TooLong);
        }
        return Decoded::Incomplete;
    };

    let header_len = brace_idx + 1;
    let header_text = String::from_utf8_lossy(&data[..header_len]).into_owned();
    let header = match Header::decode(&header_text) {
        Ok(header) => header,
        Err(err) => {
            buf.get(header_len);
            return Decoded::Invalid(err);
        }
    };

    let total_len = header_len + header.payload_len;
    if buf.len() < total_len {
        // Header parsed, but the payload hasn't fully arrived. Leave the
        // buffer untouched (we only peeked) and wait for the next poll.
        return Decoded::Incomplete;
    }

    let mut consumed = buf.get(total_len);
    let payload = consumed.split_off(header_len);
    Decoded::Frame(Frame { header, payload })
}

/// Encodes a header and its payload as a single frame.
#[must_use]
pub fn encode_frame(header: &Header, payload: &[u8]) -> Vec<u8> {
    debug_assert_eq!(header.payload_len, payload.len());
    let mut out = header.encode().into_bytes();
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Status;

    #[test]
    fn decodes_a_pipelined_pair_of_frames() {
        let mut buf = IOBuffer::new(4096);
        buf.add(&encode_frame(&Header::list_request(), &[]));
        buf.add(&encode_frame(
            &Header::block("a.log", 0, 3, false),
            b"abc",
        ));

        let first = match decode_frame(&mut buf) {
            Decoded::Frame(f) => f,
            other => panic!("expected frame, got {other:?}"),
        };
        assert_eq!(first.header.cmd, Some(crate::header::Cmd::List));
        assert!(first.payload.is_empty());

        let second = match decode_frame(&mut buf) {
            Decoded::Frame(f) => f,
            other => panic!("expected frame, got {other:?}"),
        };
        assert_eq!(second.payload, b"abc");
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_payload_bytes_without_consuming_header() {
        let mut buf = IOBuffer::new(4096);
        let full = encode_frame(&Header::block("a.log", 0, 5, false), b"hello");
        buf.add(&full[..full.len() - 2]);
        assert!(matches!(decode_frame(&mut buf), Decoded::Incomplete));
        assert_eq!(buf.len(), full.len() - 2);
        buf.add(&full[full.len() - 2..]);
        assert!(matches!(decode_frame(&mut buf), Decoded::Frame(_)));
    }

    #[test]
    fn waits_when_no_closing_brace_yet() {
        let mut buf = IOBuffer::new(4096);
        buf.add(br#"{"cmd":"LIST""#);
        assert!(matches!(decode_frame(&mut buf), Decoded::Incomplete));
    }

    #[test]
    fn invalid_header_is_dropped_and_resynchronizes() {
        let mut buf = IOBuffer::new(4096);
        buf.add(br#"{"cmd":"NOPE","s":"0"}"#);
        buf.add(&encode_frame(&Header::list_request(), &[]));
        assert!(matches!(decode_frame(&mut buf), Decoded::Invalid(_)));
        assert!(matches!(decode_frame(&mut buf), Decoded::Frame(_)));
    }

    #[test]
    fn status_field_round_trips_through_frame() {
        let header = Header::stream_status("a.log", Status::InProgress);
        let mut buf = IOBuffer::new(4096);
        buf.add(&encode_frame(&header, &[]));
        let frame = match decode_frame(&mut buf) {
            Decoded::Frame(f) => f,
            other => panic!("expected frame, got {other:?}"),
        };
        assert_eq!(frame.header.status, Some(Status::InProgress));
    }
}
