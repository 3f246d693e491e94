//! The Frame Codec: a `tokio_util::codec::{Decoder, Encoder}` pair turning a
//! byte stream into `Frame`s and back, per the wire contract's two framing
//! modes (with and without the trailing newline after the null terminator).

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use broker_core::{BrokerError, Frame};

/// Decodes and encodes STOMP 1.0 frames over a byte stream.
///
/// `newline_after_null` controls only the encoder: whether an extra `\n` is
/// appended after the frame's terminating `\x00`. The decoder tolerates
/// either form on ingress, consuming an optional trailing newline if one
/// follows the null byte.
pub struct StompCodec {
    newline_after_null: bool,
}

impl StompCodec {
    /// Builds a codec whose encoder appends the optional trailing newline
    /// iff `newline_after_null` is set.
    pub fn new(newline_after_null: bool) -> Self {
        Self { newline_after_null }
    }
}

impl Decoder for StompCodec {
    type Item = Frame;
    type Error = BrokerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, BrokerError> {
        let Some(command_end) = find(src, b"\n") else {
            return Ok(None);
        };
        let command = String::from_utf8_lossy(&src[..command_end]).trim().to_string();
        if command.is_empty() {
            return Err(BrokerError::Codec("empty command line".to_string()));
        }

        let mut headers = Vec::new();
        let mut cursor = command_end + 1;
        let headers_end = loop {
            let Some(line_end) = find(&src[cursor..], b"\n") else {
                return Ok(None);
            };
            if line_end == 0 {
                break cursor + 1;
            }
            let line = &src[cursor..cursor + line_end];
            if let Some(colon) = find(line, b":") {
                let key = String::from_utf8_lossy(&line[..colon]).to_lowercase();
                let value = String::from_utf8_lossy(&line[colon + 1..]).trim().to_string();
                headers.push((key, value));
            }
            cursor += line_end + 1;
        };

        let content_length: Option<usize> = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .and_then(|(_, v)| v.parse().ok());

        let (body_end, terminator_at) = match content_length {
            Some(len) => {
                let body_end = headers_end + len;
                if src.len() <= body_end {
                    return Ok(None);
                }
                (body_end, body_end)
            }
            None => match find(&src[headers_end..], b"\x00") {
                Some(offset) => (headers_end + offset, headers_end + offset),
                None => return Ok(None),
            },
        };

        if src.len() <= terminator_at {
            return Ok(None);
        }

        let body = src[headers_end..body_end].to_vec();
        let mut consumed = terminator_at + 1;
        if src.len() > consumed && src[consumed] == b'\n' {
            consumed += 1;
        }

        src.advance(consumed);
        Ok(Some(Frame { command, headers, body }))
    }
}

impl Encoder<Frame> for StompCodec {
    type Error = BrokerError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), BrokerError> {
        dst.reserve(frame.command.len() + frame.body.len() + 64);
        dst.put_slice(frame.command.as_bytes());
        dst.put_u8(b'\n');
        for (key, value) in &frame.headers {
            dst.put_slice(key.as_bytes());
            dst.put_u8(b':');
            dst.put_slice(value.as_bytes());
            dst.put_u8(b'\n');
        }
        if !frame.headers.iter().any(|(k, _)| k == "content-length") {
            dst.put_slice(b"content-length:");
            dst.put_slice(frame.body.len().to_string().as_bytes());
            dst.put_u8(b'\n');
        }
        dst.put_u8(b'\n');
        dst.put_slice(&frame.body);
        dst.put_u8(b'\x00');
        if self.newline_after_null {
            dst.put_u8(b'\n');
        }
        Ok(())
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_send_frame_with_content_length() {
        let mut codec = StompCodec::new(true);
        let mut buf = BytesMut::from(&b"SEND\ndestination:/queue/work\ncontent-length:5\n\nhello\x00\n"[..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.command, "SEND");
        assert_eq!(frame.header("destination"), Some("/queue/work"));
        assert_eq!(frame.body, b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn decodes_without_content_length_scanning_for_null() {
        let mut codec = StompCodec::new(false);
        let mut buf = BytesMut::from(&b"DISCONNECT\n\n\x00"[..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.command, "DISCONNECT");
        assert!(frame.body.is_empty());
    }

    #[test]
    fn returns_none_on_partial_frame() {
        let mut codec = StompCodec::new(true);
        let mut buf = BytesMut::from(&b"SEND\ndestination:/queue/w"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn header_keys_are_lowercased_and_values_trimmed() {
        let mut codec = StompCodec::new(true);
        let mut buf = BytesMut::from(&b"SEND\nDestination: /queue/work \n\n\x00"[..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.header("destination"), Some("/queue/work"));
    }

    #[test]
    fn encode_always_sets_newline_per_mode() {
        let mut with_newline = StompCodec::new(true);
        let mut buf = BytesMut::new();
        with_newline.encode(Frame::receipt("r1"), &mut buf).unwrap();
        assert!(buf.ends_with(b"\x00\n"));

        let mut without_newline = StompCodec::new(false);
        let mut buf = BytesMut::new();
        without_newline.encode(Frame::receipt("r1"), &mut buf).unwrap();
        assert!(buf.ends_with(b"\x00"));
        assert!(!buf.ends_with(b"\n\x00\n"));
    }

    #[test]
    fn encode_inserts_content_length_when_the_frame_omits_it() {
        let mut codec = StompCodec::new(true);
        let mut buf = BytesMut::new();
        codec.encode(Frame::connected(7), &mut buf).unwrap();
        let text = String::from_utf8_lossy(&buf);
        assert!(text.contains("content-length:0\n"));
    }

    #[test]
    fn encode_leaves_an_explicit_content_length_untouched() {
        let mut codec = StompCodec::new(true);
        let mut buf = BytesMut::new();
        codec.encode(Frame::message("msg-1", "/queue/work", b"hi".to_vec()), &mut buf).unwrap();
        let text = String::from_utf8_lossy(&buf);
        assert_eq!(text.matches("content-length").count(), 1);
        assert!(text.contains("content-length:2\n"));
    }

    #[test]
    fn decode_rejects_a_blank_command_line() {
        let mut codec = StompCodec::new(true);
        let mut buf = BytesMut::from(&b"\n\n\x00"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(BrokerError::Codec(_))));
    }
}
