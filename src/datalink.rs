//! Wire schemas of the two datalink feeds
//!
//! - ACARS (acarsdec style): a flat JSON object
//! - VDLM2 (dumpvdl2 style): everything nested under a `vdl2` envelope
//!
//! Only the fields the normalizer reads are modelled; everything else in the
//! payload is ignored by serde.

use serde::Deserialize;
use serde_json::Value;

use crate::message::MessageType;
use crate::normalizer::NormalizeError;

/// Envelope key that marks a VDLM2 payload
pub const VDLM2_ENVELOPE_KEY: &str = "vdl2";

/// `error` in ACARS payloads is numeric from most decoders, a string from some
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ErrorField {
    Count(u32),
    Text(String),
}

impl ErrorField {
    /// Error count, with textual values coerced to 0 or 1
    pub fn count(&self) -> u32 {
        match self {
            ErrorField::Count(n) => *n,
            ErrorField::Text(s) => {
                let s = s.trim();
                if let Ok(n) = s.parse::<u32>() {
                    return n.min(1);
                }
                match s.to_ascii_lowercase().as_str() {
                    "" | "false" | "no" => 0,
                    _ => 1,
                }
            }
        }
    }
}

/// ICAO address: numeric in acarsdec output, hex text from some routers
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum IcaoField {
    Numeric(u32),
    Hex(String),
}

impl IcaoField {
    /// Six-digit lowercase hex rendering
    pub fn to_hex(&self) -> Option<String> {
        match self {
            IcaoField::Numeric(n) => Some(format!("{:06x}", n)),
            IcaoField::Hex(s) => {
                let s = s.trim();
                if s.is_empty() {
                    None
                } else {
                    Some(s.to_ascii_lowercase())
                }
            }
        }
    }
}

/// VDLM2 frequency in Hz: numeric from dumpvdl2, text from some routers
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FrequencyField {
    Hz(u64),
    Text(String),
}

impl FrequencyField {
    pub fn hz(&self) -> Option<u64> {
        match self {
            FrequencyField::Hz(hz) => Some(*hz),
            FrequencyField::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Flat ACARS payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AcarsFrame {
    pub timestamp: f64,
    pub station_id: Option<String>,
    /// MHz
    pub freq: Option<f64>,
    pub error: Option<ErrorField>,
    pub label: Option<String>,
    pub tail: Option<String>,
    pub flight: Option<String>,
    pub msgno: Option<String>,
    pub text: Option<String>,
    pub icao: Option<IcaoField>,
}

/// AVLC source or destination address
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AvlcAddress {
    pub addr: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: Option<String>,
}

/// Source type tag of an airborne station
pub const AVLC_AIRCRAFT: &str = "Aircraft";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Vdl2Acars {
    #[serde(default)]
    pub err: bool,
    pub reg: Option<String>,
    pub label: Option<String>,
    pub flight: Option<String>,
    pub msg_num: Option<String>,
    pub msg_num_seq: Option<String>,
    pub sublabel: Option<String>,
    pub msg_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Avlc {
    pub src: AvlcAddress,
    pub dst: Option<AvlcAddress>,
    pub acars: Option<Vdl2Acars>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Vdl2Time {
    pub sec: i64,
    pub usec: i64,
}

impl Vdl2Time {
    pub fn as_epoch_seconds(&self) -> f64 {
        self.sec as f64 + self.usec as f64 / 1_000_000.0
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Vdl2Envelope {
    pub avlc: Avlc,
    pub t: Vdl2Time,
    pub freq: Option<FrequencyField>,
    pub station: Option<String>,
}

/// Nested VDLM2 payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Vdlm2Frame {
    pub vdl2: Vdl2Envelope,
}

/// A datalink payload, discriminated once by its envelope
#[derive(Debug, Clone, PartialEq)]
pub enum RawDatalinkMessage {
    Acars(AcarsFrame),
    Vdlm2(Box<Vdlm2Frame>),
}

impl RawDatalinkMessage {
    /// Parse one JSON payload and pick the schema by the presence of the
    /// `vdl2` envelope key
    pub fn from_json(payload: &str) -> Result<Self, NormalizeError> {
        let value: Value = serde_json::from_str(payload).map_err(NormalizeError::InvalidJson)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, NormalizeError> {
        let Some(object) = value.as_object() else {
            return Err(NormalizeError::NotAnObject);
        };

        if object.contains_key(VDLM2_ENVELOPE_KEY) {
            serde_json::from_value::<Vdlm2Frame>(value)
                .map(|frame| RawDatalinkMessage::Vdlm2(Box::new(frame)))
                .map_err(|source| NormalizeError::Schema {
                    message_type: MessageType::Vdlm2,
                    source,
                })
        } else {
            serde_json::from_value::<AcarsFrame>(value)
                .map(RawDatalinkMessage::Acars)
                .map_err(|source| NormalizeError::Schema {
                    message_type: MessageType::Acars,
                    source,
                })
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            RawDatalinkMessage::Acars(_) => MessageType::Acars,
            RawDatalinkMessage::Vdlm2(_) => MessageType::Vdlm2,
        }
    }
}
