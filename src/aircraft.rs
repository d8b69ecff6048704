use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::decoder::TextDecoder;
use crate::message::CanonicalMessage;
use crate::position::{Kinematics, PositionReport};

/// Minimum spacing between two accepted position reports, in seconds
pub const MIN_POSITION_INTERVAL_SECS: f64 = 10.0;

/// One tracked aircraft, correlated from positions and datalink messages
#[derive(Debug, Clone)]
pub struct Aircraft {
    uid: Uuid,
    pub icao_hex: Option<String>,
    pub registration: Option<String>,
    /// Raw ICAO callsign
    pub callsign: Option<String>,
    pub iata_callsign: Option<String>,
    pub iata_callsign_normalized: Option<String>,
    pub icao_callsign_normalized: Option<String>,
    pub aircraft_type: Option<String>,
    pub is_squitter: bool,
    pub squitter_id: Option<String>,
    pub last_position_time: Option<f64>,
    pub last_message_time: Option<f64>,
    positions: Vec<PositionReport>,
    messages: Vec<CanonicalMessage>,
}

/// Serializable view of an aircraft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AircraftSummary {
    pub uid: Uuid,
    pub icao_hex: Option<String>,
    pub registration: Option<String>,
    pub callsign: Option<String>,
    pub iata_callsign: Option<String>,
    pub aircraft_type: Option<String>,
    pub is_squitter: bool,
    pub last_position_time: Option<f64>,
    pub last_message_time: Option<f64>,
    pub position_count: usize,
    pub message_count: usize,
    pub latest_position: Option<Kinematics>,
    pub latest_message: Option<CanonicalMessage>,
}

fn decode_best_effort(message: &mut CanonicalMessage, decoder: &dyn TextDecoder) {
    if message.text.is_none() {
        return;
    }
    match decoder.decode(message) {
        Ok(decoded) => message.decoded = decoded,
        Err(e) => debug!(
            "Failed to decode {} message label {:?}: {}",
            message.message_type, message.label, e
        ),
    }
}

impl Aircraft {
    fn empty() -> Self {
        Self {
            uid: Uuid::new_v4(),
            icao_hex: None,
            registration: None,
            callsign: None,
            iata_callsign: None,
            iata_callsign_normalized: None,
            icao_callsign_normalized: None,
            aircraft_type: None,
            is_squitter: false,
            squitter_id: None,
            last_position_time: None,
            last_message_time: None,
            positions: Vec::new(),
            messages: Vec::new(),
        }
    }

    pub fn from_position(pos: PositionReport) -> Self {
        let mut aircraft = Self::empty();
        aircraft.icao_hex = pos.hex.clone();
        aircraft.registration = pos.registration.clone();
        aircraft.callsign = pos.callsign.clone();
        aircraft.icao_callsign_normalized = pos.callsign_normalized.clone();
        aircraft.aircraft_type = pos.aircraft_type.clone();
        aircraft.last_position_time = Some(pos.now);
        aircraft.positions.push(pos);
        aircraft
    }

    /// A message labelled `SQ` produces a squitter aircraft whose identity
    /// is frozen from then on
    pub fn from_message(mut msg: CanonicalMessage, decoder: &dyn TextDecoder) -> Self {
        let mut aircraft = Self::empty();
        if msg.is_squitter() {
            aircraft.is_squitter = true;
            aircraft.squitter_id = msg.text.clone();
        }
        aircraft.refresh_identity(&msg);
        aircraft.last_message_time = Some(msg.timestamp);

        msg.duplicate = false;
        msg.duplicate_count = 0;
        decode_best_effort(&mut msg, decoder);
        aircraft.messages.push(msg);
        aircraft
    }

    pub fn uid(&self) -> Uuid {
        self.uid
    }

    pub fn positions(&self) -> &[PositionReport] {
        &self.positions
    }

    pub fn messages(&self) -> &[CanonicalMessage] {
        &self.messages
    }

    /// Returns whether the report was accepted
    pub fn update_position(&mut self, pos: PositionReport) -> bool {
        if let Some(last) = self.last_position_time
            && (pos.now <= last || pos.now - last < MIN_POSITION_INTERVAL_SECS)
        {
            trace!(
                "Ignoring position for {} at {} (last accepted {})",
                self.uid, pos.now, last
            );
            return false;
        }

        if self.icao_hex.is_none() {
            self.icao_hex = pos.hex.clone();
        }
        if pos.registration.is_some() {
            self.registration = pos.registration.clone();
        }
        if pos.callsign.is_some() {
            self.callsign = pos.callsign.clone();
        }
        if pos.callsign_normalized.is_some() {
            self.icao_callsign_normalized = pos.callsign_normalized.clone();
        }
        if pos.aircraft_type.is_some() {
            self.aircraft_type = pos.aircraft_type.clone();
        }

        self.last_position_time = Some(pos.now);
        self.positions.push(pos);
        true
    }

    pub fn update_message(&mut self, mut msg: CanonicalMessage, decoder: &dyn TextDecoder) {
        if !self.is_squitter {
            self.refresh_identity(&msg);
        }

        self.last_message_time = Some(match self.last_message_time {
            Some(last) => last.max(msg.timestamp),
            None => msg.timestamp,
        });

        if let Some(existing) = self
            .messages
            .iter_mut()
            .rev()
            .find(|existing| existing.same_content(&msg))
        {
            existing.duplicate = true;
            existing.duplicate_count += 1;
            existing.timestamp = msg.timestamp;
            trace!(
                "Duplicate message for {} (seen {} times)",
                self.uid,
                existing.duplicate_count + 1
            );
            return;
        }

        msg.duplicate = false;
        msg.duplicate_count = 0;
        decode_best_effort(&mut msg, decoder);
        self.messages.push(msg);
    }

    /// Only values present in the message replace what is known
    fn refresh_identity(&mut self, msg: &CanonicalMessage) {
        if msg.icao_hex.is_some() {
            self.icao_hex = msg.icao_hex.clone();
        }
        if msg.tail.is_some() {
            self.registration = msg.tail.clone();
        }
        if msg.icao_callsign.is_some() {
            self.callsign = msg.icao_callsign.clone();
        }
        if msg.iata_callsign.is_some() {
            self.iata_callsign = msg.iata_callsign.clone();
        }
        if msg.iata_callsign_normalized.is_some() {
            self.iata_callsign_normalized = msg.iata_callsign_normalized.clone();
        }
        if msg.icao_callsign_normalized.is_some() {
            self.icao_callsign_normalized = msg.icao_callsign_normalized.clone();
        }
    }

    /// True only when stale on both feeds; a missing watermark counts as stale
    pub fn is_old(&self, position_cutoff: f64, message_cutoff: f64) -> bool {
        let position_stale = self.last_position_time.is_none_or(|t| t < position_cutoff);
        let message_stale = self.last_message_time.is_none_or(|t| t < message_cutoff);
        position_stale && message_stale
    }

    /// Keys this aircraft can be found under, in index slot order:
    /// hex, registration, IATA callsign, ICAO callsign
    pub fn identity_keys(&self) -> Vec<&str> {
        [
            self.icao_hex.as_deref(),
            self.registration.as_deref(),
            self.iata_callsign_normalized
                .as_deref()
                .or(self.iata_callsign.as_deref()),
            self.icao_callsign_normalized
                .as_deref()
                .or(self.callsign.as_deref()),
        ]
        .into_iter()
        .flatten()
        .filter(|key| !key.trim().is_empty())
        .collect()
    }

    pub fn summary(&self) -> AircraftSummary {
        AircraftSummary {
            uid: self.uid,
            icao_hex: self.icao_hex.clone(),
            registration: self.registration.clone(),
            callsign: self.callsign.clone(),
            iata_callsign: self.iata_callsign.clone(),
            aircraft_type: self.aircraft_type.clone(),
            is_squitter: self.is_squitter,
            last_position_time: self.last_position_time,
            last_message_time: self.last_message_time,
            position_count: self.positions.len(),
            message_count: self.messages.len(),
            latest_position: self.positions.last().map(|p| p.kinematics.clone()),
            latest_message: self.messages.last().cloned(),
        }
    }
}
