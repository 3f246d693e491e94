//! The STOMP frame type shared between the dispatch engine and the
//! byte-level codec. Encoding/decoding bytes to and from `Frame` is the
//! Frame Codec's job (an external collaborator, see the crate root docs);
//! this module only defines the shape and the handful of constructors the
//! command dispatch table needs to build outgoing frames.

/// A STOMP frame: a command, an ordered list of headers, and a body.
///
/// Header keys are lowercased on ingress per the wire contract; this type
/// makes no distinction between an ingress and egress frame beyond that the
/// command is conventionally uppercase on the wire in both directions.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    /// The STOMP command, e.g. `"SEND"` or `"MESSAGE"`.
    pub command: String,
    /// Headers in wire order; keys are lowercase.
    pub headers: Vec<(String, String)>,
    /// The frame body. Empty for frames without one.
    pub body: Vec<u8>,
}

impl Frame {
    /// Builds a frame with no headers and an empty body.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Appends a header, preserving insertion order.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Sets the body and its `content-length` header together, so the two
    /// can never drift out of sync. Frames built without a body (e.g.
    /// `connected`, `receipt`) get `content-length` inserted by the codec
    /// at encode time instead.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        let len = body.len();
        self.body = body;
        self.with_header("content-length", len.to_string())
    }

    /// Looks up a header by (lowercase) key.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Builds the CONNECTED reply to a successful handshake.
    pub fn connected(conn_id: u64) -> Self {
        Frame::new("CONNECTED").with_header("session", conn_id.to_string())
    }

    /// Builds an outgoing MESSAGE frame for delivery to a subscriber.
    pub fn message(message_id: &str, destination: &str, body: Vec<u8>) -> Self {
        Frame::new("MESSAGE")
            .with_header("message-id", message_id)
            .with_header("destination", destination)
            .with_body(body)
    }

    /// Builds a RECEIPT frame acknowledging a client-requested receipt.
    pub fn receipt(receipt_id: &str) -> Self {
        Frame::new("RECEIPT").with_header("receipt-id", receipt_id)
    }

    /// Builds an ERROR frame whose body is the given message text.
    pub fn error(message: &str) -> Self {
        Frame::new("ERROR").with_body(message.as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_body_sets_content_length() {
        let frame = Frame::new("SEND").with_body(b"hello".to_vec());
        assert_eq!(frame.header("content-length"), Some("5"));
        assert_eq!(frame.body, b"hello");
    }

    #[test]
    fn header_lookup_is_case_sensitive_and_first_match_wins() {
        let frame = Frame::new("SEND").with_header("a", "1").with_header("a", "2");
        assert_eq!(frame.header("a"), Some("1"));
        assert_eq!(frame.header("missing"), None);
    }

    #[test]
    fn message_frame_carries_destination_and_id() {
        let frame = Frame::message("msg-1", "/queue/work", b"hi".to_vec());
        assert_eq!(frame.command, "MESSAGE");
        assert_eq!(frame.header("message-id"), Some("msg-1"));
        assert_eq!(frame.header("destination"), Some("/queue/work"));
        assert_eq!(frame.header("content-length"), Some("2"));
    }
}
