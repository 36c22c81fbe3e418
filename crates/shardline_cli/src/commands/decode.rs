//! Decode command implementation.

use super::CliError;
use serde::Serialize;
use serde_json::{Map, Number};
use shardline_access::proxy::peek_frame;
use shardline_access::{decode_message, Message};
use shardline_codec::{from_cbor, Value};

/// A decoded frame, for output.
#[derive(Debug, Serialize)]
pub struct FrameInfo {
    /// Version name.
    pub version: String,
    /// Version wire value.
    pub version_code: u16,
    /// Wire message type.
    pub message_type: String,
    /// Request or response kind.
    pub kind: String,
    /// Addressed identifier.
    pub target: String,
    /// Sequence number.
    pub sequence: u64,
    /// Failure text, for failure responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Whether a failure is retriable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retriable: Option<bool>,
    /// Raw message body.
    pub body: serde_json::Value,
}

/// Runs the decode command.
pub fn run(frame: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = parse_hex(frame)?;
    let message = decode_message(&bytes)?;

    match format {
        "text" => {
            let (version, message_type) = peek_frame(&bytes)?;
            println!("{message_type} at {version}");
            println!("{message:#?}");
        }
        _ => {
            let info = frame_info(&bytes, &message)?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
    }
    Ok(())
}

/// Describes a frame that already decoded as `message`.
pub fn frame_info(
    bytes: &[u8],
    message: &Message,
) -> Result<FrameInfo, Box<dyn std::error::Error>> {
    let (version, message_type) = peek_frame(bytes)?;
    let frame = from_cbor(bytes)?;
    let body = frame
        .as_array()
        .and_then(|items| items.get(2))
        .map(value_to_json)
        .unwrap_or(serde_json::Value::Null);

    let (kind, target, sequence, failure) = match message {
        Message::Request(request) => (request.kind(), request.target(), request.sequence(), None),
        Message::Response(response) => (
            response.kind(),
            response.target(),
            response.sequence(),
            response.as_failure().map(|f| &f.cause),
        ),
    };

    Ok(FrameInfo {
        version: version.to_string(),
        version_code: version.short_value(),
        message_type: message_type.to_string(),
        kind: kind.to_string(),
        target: target.to_string(),
        sequence,
        failure: failure.map(ToString::to_string),
        retriable: failure.map(|cause| cause.is_retriable()),
        body,
    })
}

/// JSON rendering of a CBOR value. Byte strings become hex text and map
/// keys that are not text are rendered as JSON text.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Integer(n) => {
            if let Ok(n) = i64::try_from(*n) {
                Number::from(n).into()
            } else if let Ok(n) = u64::try_from(*n) {
                Number::from(n).into()
            } else {
                serde_json::Value::String(n.to_string())
            }
        }
        Value::Bytes(b) => serde_json::Value::String(hex_encode(b)),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Map(pairs) => {
            let mut object = Map::new();
            for (key, item) in pairs {
                let key = match key {
                    Value::Text(s) => s.clone(),
                    other => value_to_json(other).to_string(),
                };
                object.insert(key, value_to_json(item));
            }
            serde_json::Value::Object(object)
        }
    }
}

/// Parses hex text, ignoring whitespace and an optional `0x` prefix.
pub fn parse_hex(input: &str) -> Result<Vec<u8>, CliError> {
    let digits: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let digits = digits.strip_prefix("0x").unwrap_or(&digits);
    if digits.len() % 2 != 0 {
        return Err(CliError::InvalidHex("odd number of digits".into()));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            digits
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| CliError::InvalidHex(format!("bad digit pair at offset {i}")))
        })
        .collect()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardline_access::{
        encode_request, AbiVersion, ClientIdentifier, FrontendIdentifier, LocalHistoryIdentifier,
        ReplyTo, Request, TransactionIdentifier, TransactionPayload, TransactionRequest,
    };

    fn purge_request(version: AbiVersion) -> Request {
        let frontend = FrontendIdentifier::parse("member-1", "datastore").unwrap();
        let client = ClientIdentifier::new(frontend, 2);
        let tx = TransactionIdentifier::new(LocalHistoryIdentifier::new(client, 1), 4);
        let request = TransactionRequest::new(tx, 3, ReplyTo::default(), TransactionPayload::Purge);
        Request::from(request).clone_as_version(version)
    }

    #[test]
    fn hex_parsing() {
        assert_eq!(parse_hex("0x01ff").unwrap(), vec![0x01, 0xff]);
        assert_eq!(parse_hex("01 ff\n").unwrap(), vec![0x01, 0xff]);
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn describes_a_request_frame() {
        let request = purge_request(AbiVersion::NeonSr2);
        let bytes = encode_request(&request).unwrap();
        let hex = hex_encode(&bytes);

        let parsed = parse_hex(&hex).unwrap();
        let message = decode_message(&parsed).unwrap();
        let info = frame_info(&parsed, &message).unwrap();
        assert_eq!(info.version, "NEON_SR2");
        assert_eq!(info.version_code, 6);
        assert_eq!(info.message_type, "TransactionPurgeRequest");
        assert_eq!(info.kind, "TransactionPurgeRequest");
        assert_eq!(info.target, "member-1-frontend-datastore-fe-2-chn-1-txn-4");
        assert_eq!(info.sequence, 3);
        assert!(info.failure.is_none());
        assert!(info.body.is_object());
    }

    #[test]
    fn large_integers_become_text() {
        assert_eq!(value_to_json(&Value::Integer(-5)), serde_json::json!(-5));
        assert_eq!(value_to_json(&Value::Integer(u64::MAX.into())), serde_json::json!(u64::MAX));
        assert_eq!(
            value_to_json(&Value::Integer(-(1i128 << 64))),
            serde_json::json!("-18446744073709551616")
        );
        assert_eq!(value_to_json(&Value::Bytes(vec![0xab])), serde_json::json!("ab"));
    }
}
