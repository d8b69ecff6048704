//! Datalink message normalization
//!
//! Turns either wire schema into a [`CanonicalMessage`] and derives the
//! identity keys the registry correlates on: hex address, tail, raw and
//! normalized IATA/ICAO callsigns.

use std::sync::Arc;

use thiserror::Error;

use crate::datalink::{AVLC_AIRCRAFT, AcarsFrame, FrequencyField, RawDatalinkMessage, Vdlm2Frame};
use crate::iata::IataResolver;
use crate::message::{CanonicalMessage, MessageType};

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("payload does not match the {message_type} schema: {source}")]
    Schema {
        message_type: MessageType,
        #[source]
        source: serde_json::Error,
    },
}

/// Reduce an airline + flight number callsign to its canonical form.
///
/// The callsign is split at its first digit and the leading zeros of the
/// flight number are dropped: `UAL0007` → `UAL7`. Only the leading digit run
/// of the suffix counts as the flight number. Callsigns without any digit
/// have no canonical form.
pub fn normalize_callsign(callsign: &str) -> Option<String> {
    let callsign = callsign.trim();
    let split = callsign.find(|c: char| c.is_ascii_digit())?;
    let (prefix, suffix) = callsign.split_at(split);

    let digits_end = suffix
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(suffix.len());
    let number = suffix[..digits_end].trim_start_matches('0');
    let number = if number.is_empty() { "0" } else { number };

    Some(format!("{}{}", prefix, number))
}

/// Strip the leading separator dumpvdl2 puts in front of registrations
pub fn clean_tail(tail: &str) -> Option<String> {
    let tail = tail.trim().trim_start_matches('.').trim();
    if tail.is_empty() {
        None
    } else {
        Some(tail.to_string())
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Converts raw datalink payloads into canonical messages
#[derive(Debug, Clone)]
pub struct Normalizer {
    resolver: Arc<IataResolver>,
}

impl Normalizer {
    pub fn new(resolver: Arc<IataResolver>) -> Self {
        Self { resolver }
    }

    /// Parse and normalize one JSON payload
    pub fn normalize_json(&self, payload: &str) -> Result<CanonicalMessage, NormalizeError> {
        RawDatalinkMessage::from_json(payload).map(|raw| self.normalize(&raw))
    }

    pub fn normalize(&self, raw: &RawDatalinkMessage) -> CanonicalMessage {
        let mut message = match raw {
            RawDatalinkMessage::Acars(frame) => Self::from_acars(frame),
            RawDatalinkMessage::Vdlm2(frame) => Self::from_vdlm2(frame),
        };
        self.derive_callsigns(&mut message);
        message
    }

    fn from_acars(frame: &AcarsFrame) -> CanonicalMessage {
        let mut message = CanonicalMessage::new(MessageType::Acars, frame.timestamp);
        message.station_id = non_empty(frame.station_id.as_deref());
        message.frequency = frame.freq;
        message.icao_hex = frame.icao.as_ref().and_then(|icao| icao.to_hex());
        message.iata_callsign = non_empty(frame.flight.as_deref());
        message.tail = frame.tail.as_deref().and_then(clean_tail);
        message.label = non_empty(frame.label.as_deref());
        message.text = frame.text.clone().filter(|t| !t.is_empty());
        message.message_number = non_empty(frame.msgno.as_deref());
        message.error_count = frame.error.as_ref().map_or(0, |e| e.count());
        message
    }

    fn from_vdlm2(frame: &Vdlm2Frame) -> CanonicalMessage {
        let vdl2 = &frame.vdl2;
        let mut message = CanonicalMessage::new(MessageType::Vdlm2, vdl2.t.as_epoch_seconds());
        message.station_id = non_empty(vdl2.station.as_deref());
        message.frequency = vdl2
            .freq
            .as_ref()
            .and_then(FrequencyField::hz)
            .map(|hz| hz as f64 / 1_000_000.0);

        // Ground stations transmit too; only airborne sources identify an aircraft
        if vdl2.avlc.src.kind == AVLC_AIRCRAFT {
            message.icao_hex =
                non_empty(Some(vdl2.avlc.src.addr.as_str())).map(|h| h.to_ascii_lowercase());
        }

        if let Some(acars) = &vdl2.avlc.acars {
            message.iata_callsign = non_empty(acars.flight.as_deref());
            message.tail = acars.reg.as_deref().and_then(clean_tail);
            message.label = non_empty(acars.label.as_deref());
            message.text = acars.msg_text.clone().filter(|t| !t.is_empty());
            message.message_number = acars.msg_num.as_deref().map(|num| {
                format!("{}{}", num, acars.msg_num_seq.as_deref().unwrap_or_default())
            });
            message.error_count = u32::from(acars.err);
        }

        message
    }

    fn derive_callsigns(&self, message: &mut CanonicalMessage) {
        let Some(iata) = message.iata_callsign.clone() else {
            return;
        };

        message.icao_callsign = self.resolver.lookup(&iata);
        message.airline = self.resolver.airline_name(&iata).map(str::to_string);
        message.iata_callsign_normalized = normalize_callsign(&iata);
        message.icao_callsign_normalized = message
            .icao_callsign
            .as_deref()
            .and_then(normalize_callsign);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iata::AirlineCodes;
    use std::collections::HashMap;

    fn normalizer() -> Normalizer {
        let mut table = HashMap::new();
        table.insert(
            "UA".to_string(),
            AirlineCodes {
                icao: "UAL".to_string(),
                name: "United Airlines".to_string(),
            },
        );
        Normalizer::new(Arc::new(IataResolver::from_table(table)))
    }

    #[test]
    fn test_normalize_callsign() {
        assert_eq!(normalize_callsign("UAL0007"), Some("UAL7".to_string()));
        assert_eq!(normalize_callsign("UAL007"), Some("UAL7".to_string()));
        assert_eq!(normalize_callsign("UAL123"), Some("UAL123".to_string()));
        assert_eq!(normalize_callsign("UAL000"), Some("UAL0".to_string()));
        assert_eq!(normalize_callsign("UA0123A"), Some("UA123".to_string()));
        assert_eq!(normalize_callsign(" DAL42 "), Some("DAL42".to_string()));
        assert_eq!(normalize_callsign("NODIGITS"), None);
        assert_eq!(normalize_callsign(""), None);
    }

    #[test]
    fn test_clean_tail() {
        assert_eq!(clean_tail(".N12345"), Some("N12345".to_string()));
        assert_eq!(clean_tail("..G-ABCD"), Some("G-ABCD".to_string()));
        assert_eq!(clean_tail("N12345"), Some("N12345".to_string()));
        assert_eq!(clean_tail("."), None);
    }

    #[test]
    fn test_normalize_acars() {
        let payload = r#"{
            "timestamp": 1700000000.25,
            "station_id": "KJFK-1",
            "freq": 131.55,
            "error": 2,
            "label": "H1",
            "tail": "N12345",
            "flight": "UA0123",
            "msgno": "M01A",
            "text": "POSITION REPORT",
            "icao": 2162
        }"#;

        let msg = normalizer().normalize_json(payload).unwrap();
        assert_eq!(msg.message_type, MessageType::Acars);
        assert_eq!(msg.timestamp, 1700000000.25);
        assert_eq!(msg.station_id.as_deref(), Some("KJFK-1"));
        assert_eq!(msg.frequency, Some(131.55));
        assert_eq!(msg.icao_hex.as_deref(), Some("000872"));
        assert_eq!(msg.iata_callsign.as_deref(), Some("UA0123"));
        assert_eq!(msg.icao_callsign.as_deref(), Some("UAL0123"));
        assert_eq!(msg.iata_callsign_normalized.as_deref(), Some("UA123"));
        assert_eq!(msg.icao_callsign_normalized.as_deref(), Some("UAL123"));
        assert_eq!(msg.airline.as_deref(), Some("United Airlines"));
        assert_eq!(msg.tail.as_deref(), Some("N12345"));
        assert_eq!(msg.label.as_deref(), Some("H1"));
        assert_eq!(msg.text.as_deref(), Some("POSITION REPORT"));
        assert_eq!(msg.message_number.as_deref(), Some("M01A"));
        assert_eq!(msg.error_count, 2);
        assert!(!msg.duplicate);
        assert_eq!(msg.duplicate_count, 0);
    }

    #[test]
    fn test_normalize_acars_string_error_and_unknown_airline() {
        let payload = r#"{"timestamp": 1.0, "flight": "ZZ99", "error": "crc"}"#;
        let msg = normalizer().normalize_json(payload).unwrap();
        assert_eq!(msg.error_count, 1);
        assert_eq!(msg.icao_callsign, None);
        assert_eq!(msg.icao_callsign_normalized, None);
        assert_eq!(msg.iata_callsign_normalized.as_deref(), Some("ZZ99"));
        assert_eq!(msg.icao_hex, None);
    }

    #[test]
    fn test_normalize_vdlm2_aircraft_source() {
        let payload = r#"{"vdl2": {
            "app": {"name": "dumpvdl2", "ver": "2.3.0"},
            "t": {"sec": 1700000100, "usec": 500000},
            "freq": 136975000,
            "station": "KJFK-VDL",
            "avlc": {
                "src": {"addr": "A1B2C3", "type": "Aircraft", "status": "Airborne"},
                "dst": {"addr": "10916D", "type": "Ground station"},
                "acars": {
                    "err": false, "crc_ok": true, "more": false,
                    "reg": ".N12345", "mode": "2", "label": "H1",
                    "flight": "UA123", "msg_num": "M12", "msg_num_seq": "A",
                    "msg_text": "HELLO"
                }
            }
        }}"#;

        let msg = normalizer().normalize_json(payload).unwrap();
        assert_eq!(msg.message_type, MessageType::Vdlm2);
        assert!((msg.timestamp - 1700000100.5).abs() < 1e-6);
        assert_eq!(msg.frequency, Some(136.975));
        assert_eq!(msg.station_id.as_deref(), Some("KJFK-VDL"));
        assert_eq!(msg.icao_hex.as_deref(), Some("a1b2c3"));
        assert_eq!(msg.tail.as_deref(), Some("N12345"));
        assert_eq!(msg.iata_callsign.as_deref(), Some("UA123"));
        assert_eq!(msg.icao_callsign.as_deref(), Some("UAL123"));
        assert_eq!(msg.label.as_deref(), Some("H1"));
        assert_eq!(msg.text.as_deref(), Some("HELLO"));
        assert_eq!(msg.message_number.as_deref(), Some("M12A"));
        assert_eq!(msg.error_count, 0);
    }

    #[test]
    fn test_normalize_vdlm2_ground_station_has_no_hex() {
        let payload = r#"{"vdl2": {
            "t": {"sec": 1700000100, "usec": 0},
            "avlc": {
                "src": {"addr": "10916D", "type": "Ground station", "status": "On ground"},
                "acars": {"err": true, "label": "SQ", "msg_text": "02XAKJFKKJFK1"}
            }
        }}"#;

        let msg = normalizer().normalize_json(payload).unwrap();
        assert_eq!(msg.icao_hex, None);
        assert_eq!(msg.label.as_deref(), Some("SQ"));
        assert!(msg.is_squitter());
        assert_eq!(msg.error_count, 1);
        assert_eq!(msg.iata_callsign, None);
    }

    #[test]
    fn test_normalize_vdlm2_text_frequency() {
        let payload = r#"{"vdl2": {
            "t": {"sec": 10, "usec": 0}, "freq": "136975000",
            "avlc": {"src": {"addr": "ABCDEF", "type": "Aircraft"},
                     "acars": {"reg": ".N12345", "label": "H1", "msg_text": "HI"}}
        }}"#;

        let msg = normalizer().normalize_json(payload).unwrap();
        assert_eq!(msg.frequency, Some(136.975));
        assert_eq!(msg.icao_hex.as_deref(), Some("abcdef"));
        assert_eq!(msg.tail.as_deref(), Some("N12345"));

        let unparseable = payload.replace("\"136975000\"", "\"n/a\"");
        let msg = normalizer().normalize_json(&unparseable).unwrap();
        assert_eq!(msg.frequency, None);
        assert_eq!(msg.text.as_deref(), Some("HI"));
    }

    #[test]
    fn test_normalize_vdlm2_without_acars_block() {
        let payload = r#"{"vdl2": {
            "t": {"sec": 10, "usec": 0},
            "avlc": {"src": {"addr": "ABCDEF", "type": "Aircraft"}}
        }}"#;

        let msg = normalizer().normalize_json(payload).unwrap();
        assert_eq!(msg.icao_hex.as_deref(), Some("abcdef"));
        assert_eq!(msg.text, None);
        assert_eq!(msg.label, None);
        assert_eq!(msg.message_number, None);
    }

    #[test]
    fn test_invalid_payloads() {
        let n = normalizer();
        assert!(n.normalize_json("").is_err());
        assert!(n.normalize_json("\"just a string\"").is_err());
        // ACARS payloads require a timestamp
        assert!(matches!(
            n.normalize_json(r#"{"flight": "UA1"}"#),
            Err(NormalizeError::Schema { message_type: MessageType::Acars, .. })
        ));
    }
}
