use serde::{Deserialize, Serialize};
use std::fmt;

use crate::decoder::DecodedText;

/// Datalink protocol a message arrived over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "ACARS")]
    Acars,
    #[serde(rename = "VDLM2")]
    Vdlm2,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Acars => "ACARS",
            MessageType::Vdlm2 => "VDLM2",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A datalink message normalized from either wire schema
///
/// Identity fields are hints for the registry; `duplicate`, `duplicate_count`
/// and `decoded` are owned by the aircraft that stores the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub message_type: MessageType,
    /// Epoch seconds, fractional
    pub timestamp: f64,
    pub station_id: Option<String>,
    /// Frequency in MHz
    pub frequency: Option<f64>,
    pub icao_hex: Option<String>,
    pub iata_callsign: Option<String>,
    pub icao_callsign: Option<String>,
    pub iata_callsign_normalized: Option<String>,
    pub icao_callsign_normalized: Option<String>,
    pub airline: Option<String>,
    pub tail: Option<String>,
    pub label: Option<String>,
    pub text: Option<String>,
    pub message_number: Option<String>,
    pub error_count: u32,
    #[serde(default)]
    pub duplicate: bool,
    #[serde(default)]
    pub duplicate_count: u32,
    #[serde(default)]
    pub decoded: Option<DecodedText>,
}

impl CanonicalMessage {
    /// Empty message of the given type; used as a base by the normalizer
    pub fn new(message_type: MessageType, timestamp: f64) -> Self {
        Self {
            message_type,
            timestamp,
            station_id: None,
            frequency: None,
            icao_hex: None,
            iata_callsign: None,
            icao_callsign: None,
            iata_callsign_normalized: None,
            icao_callsign_normalized: None,
            airline: None,
            tail: None,
            label: None,
            text: None,
            message_number: None,
            error_count: 0,
            duplicate: false,
            duplicate_count: 0,
            decoded: None,
        }
    }

    /// Key used for the IATA callsign slot, normalized form preferred
    pub fn iata_callsign_key(&self) -> Option<&str> {
        self.iata_callsign_normalized
            .as_deref()
            .or(self.iata_callsign.as_deref())
    }

    /// Key used for the ICAO callsign slot, normalized form preferred
    pub fn icao_callsign_key(&self) -> Option<&str> {
        self.icao_callsign_normalized
            .as_deref()
            .or(self.icao_callsign.as_deref())
    }

    /// Two messages are duplicates when text and label match
    pub fn same_content(&self, other: &CanonicalMessage) -> bool {
        self.text == other.text && self.label == other.label
    }

    pub fn is_squitter(&self) -> bool {
        self.label.as_deref() == Some(SQUITTER_LABEL)
    }
}

/// Label of ground-station squitter messages
pub const SQUITTER_LABEL: &str = "SQ";
