//! Feed Codec
//!
//! Inbound frames arrive as gzip-compressed JSON in binary WebSocket
//! messages; outbound frames are plain JSON text. Classification follows
//! a fixed priority: ping, tick, subscription ack, error, anything else.

use std::io::Read;

use flate2::read::GzDecoder;
use serde_json::Value;

use super::messages::{
    ErrorMessage, FeedMessage, PingMessage, SubscribeRequest, SubscribedMessage, TickMessage,
};

/// Upper bound on a decompressed frame.
const MAX_FRAME_BYTES: u64 = 1 << 20;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Gzip decompression failed.
    #[error("decompression failed: {0}")]
    Decompress(#[from] std::io::Error),

    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is not a JSON object or exceeds the size limit.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for the ticker feed.
#[derive(Debug, Default, Clone)]
pub struct FeedCodec;

impl FeedCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decompress and decode a binary frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not valid gzip or not a decodable
    /// JSON object.
    pub fn decode_binary(&self, data: &[u8]) -> Result<FeedMessage, CodecError> {
        let text = decompress(data)?;
        self.decode_text(&text)
    }

    /// Decode an uncompressed JSON frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object, or if a
    /// recognized shape carries malformed fields.
    pub fn decode_text(&self, text: &str) -> Result<FeedMessage, CodecError> {
        let value: Value = serde_json::from_str(text.trim())?;

        let Some(object) = value.as_object() else {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}",
                truncate(text, 50)
            )));
        };

        if object.contains_key("ping") {
            let m: PingMessage = serde_json::from_value(value)?;
            Ok(FeedMessage::Ping(m))
        } else if object.contains_key("tick") && object.contains_key("ch") {
            let m: TickMessage = serde_json::from_value(value)?;
            Ok(FeedMessage::Tick(m))
        } else if object.contains_key("subbed") {
            let m: SubscribedMessage = serde_json::from_value(value)?;
            Ok(FeedMessage::Subscribed(m))
        } else if object.get("status").and_then(Value::as_str) == Some("error") {
            let m: ErrorMessage = serde_json::from_value(value)?;
            Ok(FeedMessage::Error(m))
        } else {
            Ok(FeedMessage::Unknown(value))
        }
    }

    /// Encode the reply to a ping, e.g. `{"pong": 12345}`.
    #[must_use]
    pub fn encode_pong(&self, token: i64) -> String {
        format!("{{\"pong\": {token}}}")
    }

    /// Encode a subscription request.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel or id cannot be serialized.
    pub fn encode_subscribe(&self, request: &SubscribeRequest) -> Result<String, CodecError> {
        Ok(format!(
            "{{\"sub\": {}, \"id\": {}}}",
            serde_json::to_string(&request.sub)?,
            serde_json::to_string(&request.id)?
        ))
    }
}

/// Decompress a gzip frame into UTF-8 text.
///
/// # Errors
///
/// Returns `Decompress` for corrupt gzip or invalid UTF-8, and
/// `InvalidFormat` if the frame inflates past the size limit.
pub fn decompress(data: &[u8]) -> Result<String, CodecError> {
    let mut text = String::new();
    let read = GzDecoder::new(data)
        .take(MAX_FRAME_BYTES + 1)
        .read_to_string(&mut text)?;

    if read as u64 > MAX_FRAME_BYTES {
        return Err(CodecError::InvalidFormat(format!(
            "frame exceeds {MAX_FRAME_BYTES} bytes"
        )));
    }
    Ok(text)
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::str::FromStr;

    use flate2::Compression;
    use flate2::write::GzEncoder;
    use rust_decimal::Decimal;

    fn gzip(text: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn decodes_compressed_ping() {
        let codec = FeedCodec::new();
        let msg = codec.decode_binary(&gzip(r#"{"ping": 12345}"#)).unwrap();
        assert_eq!(msg, FeedMessage::Ping(PingMessage { ping: 12345 }));
    }

    #[test]
    fn pong_echoes_token_exactly() {
        let codec = FeedCodec::new();
        let pong = codec.encode_pong(12345);
        assert_eq!(pong, r#"{"pong": 12345}"#);

        let parsed: serde_json::Value = serde_json::from_str(&pong).unwrap();
        assert_eq!(parsed["pong"], 12345);
    }

    #[test]
    fn decodes_tick() {
        let codec = FeedCodec::new();
        let msg = codec
            .decode_binary(&gzip(
                r#"{"ch":"market.btcusdt.detail","ts":1600000000000,"tick":{"close":9999.995}}"#,
            ))
            .unwrap();

        match msg {
            FeedMessage::Tick(tick) => {
                assert_eq!(tick.ch, "market.btcusdt.detail");
                assert_eq!(tick.ts, Some(1_600_000_000_000));
                assert_eq!(tick.tick.close, Decimal::from_str("9999.995").unwrap());
            }
            other => panic!("expected Tick, got {other:?}"),
        }
    }

    #[test]
    fn decodes_subscription_ack() {
        let codec = FeedCodec::new();
        let msg = codec
            .decode_text(
                r#"{"id":"btcusdt.detail","status":"ok","subbed":"market.btcusdt.detail","ts":1}"#,
            )
            .unwrap();
        assert!(matches!(msg, FeedMessage::Subscribed(ack) if ack.subbed == "market.btcusdt.detail"));
    }

    #[test]
    fn decodes_error_response() {
        let codec = FeedCodec::new();
        let msg = codec
            .decode_text(r#"{"id":"x.detail","status":"error","err-code":"bad-request","err-msg":"invalid topic"}"#)
            .unwrap();
        assert!(matches!(msg, FeedMessage::Error(e) if e.err_msg.as_deref() == Some("invalid topic")));
    }

    #[test]
    fn ping_takes_priority_over_other_keys() {
        let codec = FeedCodec::new();
        let msg = codec
            .decode_text(r#"{"ping": 7, "subbed": "market.btcusdt.detail"}"#)
            .unwrap();
        assert!(matches!(msg, FeedMessage::Ping(PingMessage { ping: 7 })));
    }

    #[test]
    fn unrecognized_shapes_are_kept() {
        let codec = FeedCodec::new();
        let msg = codec.decode_text(r#"{"status":"ok","data":[]}"#).unwrap();
        assert!(matches!(msg, FeedMessage::Unknown(_)));
    }

    #[test]
    fn malformed_frames_are_errors() {
        let codec = FeedCodec::new();
        assert!(matches!(
            codec.decode_binary(b"not gzip"),
            Err(CodecError::Decompress(_))
        ));
        assert!(matches!(codec.decode_text("[1,2]"), Err(CodecError::InvalidFormat(_))));
        assert!(matches!(codec.decode_text("{"), Err(CodecError::Json(_))));
        assert!(matches!(
            codec.decode_text(r#"{"ping": "soon"}"#),
            Err(CodecError::Json(_))
        ));
    }

    #[test]
    fn encodes_subscribe_request() {
        let codec = FeedCodec::new();
        let json = codec
            .encode_subscribe(&SubscribeRequest::for_symbol("btcusdt"))
            .unwrap();
        assert_eq!(
            json,
            r#"{"sub": "market.btcusdt.detail", "id": "btcusdt.detail"}"#
        );

        let parsed: SubscribeRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, SubscribeRequest::for_symbol("btcusdt"));
    }
}
