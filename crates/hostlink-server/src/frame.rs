//! Server-sent event framing.
//!
//! Every frame is complete and self-delimiting (terminated by a blank line),
//! so frames written whole never corrupt each other.

use bytes::Bytes;

/// Handshake naming the URL the client posts to.
pub fn endpoint_event(endpoint: &str) -> Bytes {
    event("endpoint", endpoint)
}

/// One protocol message, already serialized as JSON.
pub fn message_event(json: &str) -> Bytes {
    event("message", json)
}

/// Comment line that keeps idle connections open. Clients ignore it.
pub fn keep_alive() -> Bytes {
    Bytes::from_static(b": keep-alive\n\n")
}

fn event(name: &str, data: &str) -> Bytes {
    let mut frame = String::with_capacity(name.len() + data.len() + 16);
    frame.push_str("event: ");
    frame.push_str(name);
    frame.push('\n');
    for line in data.split('\n') {
        frame.push_str("data: ");
        frame.push_str(line.strip_suffix('\r').unwrap_or(line));
        frame.push('\n');
    }
    frame.push('\n');
    Bytes::from(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_frame() {
        assert_eq!(
            endpoint_event("/api/message?sessionId=abc"),
            "event: endpoint\ndata: /api/message?sessionId=abc\n\n"
        );
    }

    #[test]
    fn message_frame() {
        assert_eq!(
            message_event(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#),
            "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n"
        );
    }

    #[test]
    fn multiline_data_gets_one_prefix_per_line() {
        assert_eq!(
            message_event("{\n  \"a\": 1\r\n}"),
            "event: message\ndata: {\ndata:   \"a\": 1\ndata: }\n\n"
        );
    }

    #[test]
    fn keep_alive_is_a_comment() {
        assert!(keep_alive().starts_with(b":"));
        assert!(keep_alive().ends_with(b"\n\n"));
    }
}
