use crate::error::DecodeError;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A decoded, not yet validated message: property name to raw JSON value.
pub type RawReading = Map<String, Value>;

/// Prefix left in front of the inner JSON by the `echo -n` upstream tooling.
const CLI_ECHO_PREFIX: &str = "-n ";

/// Wire shape a broker delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// Payload is the reading itself.
    #[default]
    Plain,
    /// Payload may be a LoRaWAN network-server event carrying the reading as
    /// base64 in `downlink_queued.frm_payload`.
    NetworkServer,
}

#[derive(Debug, Clone, Copy)]
pub struct Decoder {
    kind: EnvelopeKind,
}

impl Decoder {
    pub fn new(kind: EnvelopeKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> EnvelopeKind {
        self.kind
    }

    /// Turn raw message bytes into a reading mapping.
    ///
    /// Bytes that are not a JSON object come back as `{"message": <text>}`,
    /// which never validates; only a broken network-server envelope is an error.
    pub fn decode(&self, raw: &[u8]) -> Result<RawReading, DecodeError> {
        let obj = match serde_json::from_slice::<Value>(raw) {
            Ok(Value::Object(obj)) => obj,
            _ => return Ok(text_fallback(raw)),
        };

        if self.kind == EnvelopeKind::NetworkServer {
            if let Some(downlink) = obj.get("downlink_queued") {
                return unwrap_frm_payload(downlink);
            }
        }
        Ok(obj)
    }
}

/// Decode with envelope detection enabled.
pub fn decode(raw: &[u8]) -> Result<RawReading, DecodeError> {
    Decoder::new(EnvelopeKind::NetworkServer).decode(raw)
}

fn unwrap_frm_payload(downlink: &Value) -> Result<RawReading, DecodeError> {
    let encoded = downlink
        .get("frm_payload")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingFrmPayload)?;

    let bytes = STANDARD.decode(encoded.trim())?;
    let text = String::from_utf8(bytes)?;
    let inner = text.strip_prefix(CLI_ECHO_PREFIX).unwrap_or(&text);

    match serde_json::from_str::<Value>(inner).map_err(DecodeError::InnerJson)? {
        Value::Object(obj) => Ok(obj),
        _ => Err(DecodeError::InnerNotObject),
    }
}

fn text_fallback(raw: &[u8]) -> RawReading {
    let mut obj = Map::new();
    obj.insert(
        "message".to_string(),
        Value::String(String::from_utf8_lossy(raw).into_owned()),
    );
    obj
}

/// At most `max` characters of a payload, for log lines.
pub fn excerpt(raw: &[u8], max: usize) -> String {
    let text = String::from_utf8_lossy(raw);
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.into_owned(),
    }
}
