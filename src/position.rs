use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::normalizer::normalize_callsign;

/// Prefix readsb puts in front of non-ICAO (TIS-B, anonymous) addresses
const NON_ICAO_HEX_MARKER: char = '~';

/// Filler characters transponders pad callsigns with
fn is_callsign_filler(c: char) -> bool {
    c.is_whitespace() || c == '@' || c == '_'
}

/// One aircraft object as emitted by the ADS-B JSON stream
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AdsbAircraft {
    pub now: f64,
    pub hex: String,
    #[serde(rename = "type")]
    pub source_type: Option<String>,
    pub flight: Option<String>,
    /// Registration from the receiver's aircraft database
    pub r: Option<String>,
    /// Aircraft type designator from the receiver's aircraft database
    pub t: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// Feet, or the string `"ground"`
    pub alt_baro: Option<Value>,
    pub alt_geom: Option<f64>,
    pub gs: Option<f64>,
    pub track: Option<f64>,
    pub baro_rate: Option<f64>,
    pub squawk: Option<String>,
    pub category: Option<String>,
    pub emergency: Option<String>,
    pub seen: Option<f64>,
    pub rssi: Option<f64>,
    /// Anything else the receiver sends along
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Position and status fields carried through untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Kinematics {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude_baro: Option<Value>,
    pub altitude_geom: Option<f64>,
    pub ground_speed_knots: Option<f64>,
    pub track_degrees: Option<f64>,
    pub vertical_rate_fpm: Option<f64>,
    pub squawk: Option<String>,
    pub category: Option<String>,
    pub emergency: Option<String>,
    pub seen: Option<f64>,
    pub rssi: Option<f64>,
}

/// Normalized ADS-B position snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    /// Epoch seconds at the receiver
    pub now: f64,
    /// Uppercase ICAO address; absent for non-ICAO addresses
    pub hex: Option<String>,
    pub registration: Option<String>,
    pub aircraft_type: Option<String>,
    pub source_type: Option<String>,
    /// Callsign with filler characters removed
    pub callsign: Option<String>,
    pub callsign_normalized: Option<String>,
    pub kinematics: Kinematics,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

pub fn clean_callsign(flight: &str) -> Option<String> {
    let cleaned = flight.trim_matches(is_callsign_filler);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Uppercase the hex address; `~`-prefixed addresses are not ICAO addresses
pub fn clean_hex(hex: &str) -> Option<String> {
    let hex = hex.trim();
    if hex.is_empty() || hex.starts_with(NON_ICAO_HEX_MARKER) {
        return None;
    }
    Some(hex.to_ascii_uppercase())
}

impl PositionReport {
    pub fn from_wire(aircraft: AdsbAircraft) -> Self {
        let callsign = aircraft.flight.as_deref().and_then(clean_callsign);
        let callsign_normalized = callsign.as_deref().and_then(normalize_callsign);
        let registration = aircraft
            .r
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);

        Self {
            now: aircraft.now,
            hex: clean_hex(&aircraft.hex),
            registration,
            aircraft_type: aircraft.t,
            source_type: aircraft.source_type,
            callsign,
            callsign_normalized,
            kinematics: Kinematics {
                latitude: aircraft.lat,
                longitude: aircraft.lon,
                altitude_baro: aircraft.alt_baro,
                altitude_geom: aircraft.alt_geom,
                ground_speed_knots: aircraft.gs,
                track_degrees: aircraft.track,
                vertical_rate_fpm: aircraft.baro_rate,
                squawk: aircraft.squawk,
                category: aircraft.category,
                emergency: aircraft.emergency,
                seen: aircraft.seen,
                rssi: aircraft.rssi,
            },
            extra: aircraft.extra,
        }
    }

    /// Parse one JSON object from the ADS-B stream
    pub fn from_json(object: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<AdsbAircraft>(object).map(Self::from_wire)
    }

    /// Key used for the callsign slot, normalized form preferred
    pub fn callsign_key(&self) -> Option<&str> {
        self.callsign_normalized
            .as_deref()
            .or(self.callsign.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_derives_fields() {
        let json = r#"{
            "now": 1700000000.1, "hex": "a1b2c3", "type": "adsb_icao",
            "flight": "UAL0123 ", "r": "N12345", "t": "B738",
            "lat": 40.64, "lon": -73.78, "alt_baro": 3500, "gs": 210.5,
            "track": 44.1, "squawk": "1200", "category": "A3",
            "rssi": -18.2, "nac_p": 9
        }"#;

        let pos = PositionReport::from_json(json).unwrap();
        assert_eq!(pos.now, 1700000000.1);
        assert_eq!(pos.hex.as_deref(), Some("A1B2C3"));
        assert_eq!(pos.callsign.as_deref(), Some("UAL0123"));
        assert_eq!(pos.callsign_normalized.as_deref(), Some("UAL123"));
        assert_eq!(pos.callsign_key(), Some("UAL123"));
        assert_eq!(pos.registration.as_deref(), Some("N12345"));
        assert_eq!(pos.aircraft_type.as_deref(), Some("B738"));
        assert_eq!(pos.source_type.as_deref(), Some("adsb_icao"));
        assert_eq!(pos.kinematics.latitude, Some(40.64));
        assert_eq!(pos.kinematics.altitude_baro, Some(Value::from(3500)));
        assert_eq!(pos.kinematics.squawk.as_deref(), Some("1200"));
        assert_eq!(pos.extra.get("nac_p"), Some(&Value::from(9)));
    }

    #[test]
    fn test_non_icao_hex_is_absent() {
        let pos = PositionReport::from_json(r#"{"now": 1.0, "hex": "~2a0b1c"}"#).unwrap();
        assert_eq!(pos.hex, None);
    }

    #[test]
    fn test_ground_altitude_passes_through() {
        let pos =
            PositionReport::from_json(r#"{"now": 1.0, "hex": "abc123", "alt_baro": "ground"}"#)
                .unwrap();
        assert_eq!(
            pos.kinematics.altitude_baro,
            Some(Value::String("ground".to_string()))
        );
    }

    #[test]
    fn test_clean_callsign() {
        assert_eq!(clean_callsign("DAL42   "), Some("DAL42".to_string()));
        assert_eq!(clean_callsign("DAL42@@@"), Some("DAL42".to_string()));
        assert_eq!(clean_callsign("__N123AB"), Some("N123AB".to_string()));
        assert_eq!(clean_callsign("@@@@@@@@"), None);
        assert_eq!(clean_callsign(""), None);
    }

    #[test]
    fn test_clean_hex() {
        assert_eq!(clean_hex(" abc123 "), Some("ABC123".to_string()));
        assert_eq!(clean_hex("~abc123"), None);
        assert_eq!(clean_hex(""), None);
    }

    #[test]
    fn test_missing_now_is_rejected() {
        assert!(PositionReport::from_json(r#"{"hex": "abc123"}"#).is_err());
    }
}
