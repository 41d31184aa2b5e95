fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use cowork_protocol::{
        FrameBuffer, HandshakeRequest, HandshakeResponse, Message, MessageType,
        NegotiateResponse, TransportType,
    };

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn read_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        serde_json::from_str(&read_fixture(name))
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"))
    }

    /// Normalizes JSON values so that integer-valued floats compare equal.
    ///
    /// Hub servers are free to write `1` or `1.0` for numeric arguments.
    fn normalize_value(v: &serde_json::Value) -> serde_json::Value {
        match v {
            serde_json::Value::Number(n) => {
                if let Some(f) = n.as_f64() {
                    serde_json::json!(f)
                } else {
                    v.clone()
                }
            }
            serde_json::Value::Object(map) => {
                let normalized: serde_json::Map<String, serde_json::Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), normalize_value(v)))
                    .collect();
                serde_json::Value::Object(normalized)
            }
            serde_json::Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(normalize_value).collect())
            }
            _ => v.clone(),
        }
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (order-independent, float-normalized comparison).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            normalize_value(&fixture),
            normalize_value(&reserialized),
            "roundtrip mismatch for {name}:\n  server: {fixture}\n  client: {reserialized}"
        );
        parsed
    }

    // --- Handshake ---

    #[test]
    fn fixture_handshake_request() {
        let req = roundtrip_test::<HandshakeRequest>("handshake_request.json");
        assert_eq!(req, HandshakeRequest::json());
    }

    #[test]
    fn fixture_handshake_response_error() {
        let resp = roundtrip_test::<HandshakeResponse>("handshake_response_error.json");
        assert!(resp.rejection().is_some_and(|e| e.contains("messagepack")));
    }

    #[test]
    fn empty_handshake_response_is_accepted() {
        let resp: HandshakeResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.rejection().is_none());
    }

    // --- Negotiate ---

    #[test]
    fn fixture_negotiate_v1() {
        let resp = roundtrip_test::<NegotiateResponse>("negotiate_v1.json");
        assert_eq!(
            resp.connection_key(),
            Some("4b1df3b2-2d1f-4a1b-9d3c-7ee1b5d0a1c2")
        );
        assert_eq!(
            resp.preferred_transports(),
            vec![
                TransportType::WebSockets,
                TransportType::ServerSentEvents,
                TransportType::LongPolling,
            ]
        );
        assert!(!resp.is_redirect());
    }

    #[test]
    fn fixture_negotiate_v0_uses_connection_id() {
        let resp = roundtrip_test::<NegotiateResponse>("negotiate_v0.json");
        assert_eq!(
            resp.connection_key(),
            Some("807809a5-31bf-470d-9e23-afaee35d8a0d")
        );
        assert_eq!(resp.preferred_transports(), vec![TransportType::LongPolling]);
    }

    #[test]
    fn fixture_negotiate_redirect() {
        // Redirect bodies omit the transport list, so compare fields instead of
        // the reserialized document.
        let resp: NegotiateResponse =
            serde_json::from_value(load_fixture("negotiate_redirect.json")).unwrap();
        assert!(resp.is_redirect());
        assert_eq!(
            resp.access_token.as_deref(),
            Some("eyJhbGciOiJIUzI1NiJ9.redirect")
        );
        assert!(resp.available_transports.is_empty());
        assert!(resp.connection_key().is_none());
    }

    // --- Hub messages ---

    #[test]
    fn fixture_invocation() {
        let msg = roundtrip_test::<Message>("invocation.json");
        assert_eq!(msg.msg_type, MessageType::Invocation);
        assert_eq!(msg.invocation_id.as_deref(), Some("5"));
        assert_eq!(msg.target.as_deref(), Some("ApproveBlog"));
        assert_eq!(msg.args().len(), 2);
    }

    #[test]
    fn fixture_server_push() {
        let msg = roundtrip_test::<Message>("server_push.json");
        assert!(msg.invocation_id.is_none());
        assert_eq!(msg.args()[0]["blogId"], 42);
    }

    #[test]
    fn fixture_invocation_headers() {
        let msg = roundtrip_test::<Message>("invocation_headers.json");
        let headers = msg.headers.expect("headers");
        assert_eq!(headers["x-tenant"], "coworking-7");
    }

    #[test]
    fn fixture_completion_result() {
        let msg = roundtrip_test::<Message>("completion_result.json");
        assert_eq!(msg.msg_type, MessageType::Completion);
        assert_eq!(msg.result.as_ref().unwrap()["approved"], true);
        assert!(msg.error.is_none());
    }

    #[test]
    fn fixture_completion_error() {
        let msg = roundtrip_test::<Message>("completion_error.json");
        assert_eq!(msg.error.as_deref(), Some("Blog 99 not found"));
        assert!(msg.result.is_none());
    }

    #[test]
    fn fixture_close_reconnect() {
        let msg = roundtrip_test::<Message>("close_reconnect.json");
        assert_eq!(msg.msg_type, MessageType::Close);
        assert_eq!(msg.allow_reconnect, Some(true));
    }

    #[test]
    fn fixture_ping() {
        let msg = roundtrip_test::<Message>("ping.json");
        assert_eq!(msg, Message::ping());
    }

    // --- Framing ---

    #[test]
    fn fixture_batch_splits_into_frames() {
        let payload = read_fixture("batch.txt");
        let mut buffer = FrameBuffer::default();
        let frames = buffer.push(&payload).unwrap();
        assert_eq!(frames.len(), 3);
        assert!(!buffer.has_partial());

        let types: Vec<MessageType> = frames
            .iter()
            .map(|f| serde_json::from_str::<Message>(f).unwrap().msg_type)
            .collect();
        assert_eq!(
            types,
            vec![MessageType::Ping, MessageType::Invocation, MessageType::Completion]
        );
    }

    #[test]
    fn fixture_batch_split_across_chunks() {
        let payload = read_fixture("batch.txt");
        let (head, tail) = payload.split_at(payload.len() / 2);

        let mut buffer = FrameBuffer::default();
        let mut frames = buffer.push(head).unwrap();
        assert!(buffer.has_partial());
        frames.extend(buffer.push(tail).unwrap());
        assert_eq!(frames.len(), 3);
        assert!(!buffer.has_partial());
    }
}
