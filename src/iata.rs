//! IATA → ICAO airline code resolution
//!
//! Datalink messages carry IATA-style flight numbers (`UA123`) while ADS-B
//! transponders broadcast ICAO-style callsigns (`UAL123`). The resolver maps
//! the two-letter IATA airline prefix onto its three-letter ICAO designator so
//! both feeds can be matched on the same callsign.
//!
//! The table is loaded from a JSON file of the form:
//!
//! ```json
//! { "AA": { "ICAO": "AAL", "NAME": "American Airlines" } }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ConfigError;

/// ICAO designator and airline name for one IATA code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirlineCodes {
    #[serde(rename = "ICAO")]
    pub icao: String,
    #[serde(rename = "NAME")]
    pub name: String,
}

/// Operator supplied `IATA|ICAO|NAME` override
///
/// Overrides are validated when parsed, so a resolver only ever receives
/// well-formed entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IataOverride {
    pub iata: String,
    pub icao: String,
    pub name: String,
}

impl FromStr for IataOverride {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidIataOverride {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = s.split('|').collect();
        let [iata, icao, name] = parts.as_slice() else {
            return Err(invalid("must be IATA|ICAO|Name"));
        };

        if iata.chars().count() != 2 {
            return Err(invalid("IATA must be 2 characters"));
        }
        if icao.chars().count() != 3 {
            return Err(invalid("ICAO must be 3 characters"));
        }
        if name.is_empty() {
            return Err(invalid("Name must be at least 1 character"));
        }

        Ok(Self {
            iata: iata.to_string(),
            icao: icao.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for IataOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.iata, self.icao, self.name)
    }
}

/// Lookup table from IATA airline prefix to ICAO designator
#[derive(Debug, Clone, Default)]
pub struct IataResolver {
    airlines: HashMap<String, AirlineCodes>,
}

impl IataResolver {
    /// Resolver with no entries; every lookup misses
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_table(airlines: HashMap<String, AirlineCodes>) -> Self {
        Self { airlines }
    }

    /// Load the table from `path` and apply `overrides` on top of it.
    ///
    /// A missing or unreadable table is not fatal: the resolver keeps running
    /// with only the overrides, and lookups for everything else miss.
    pub async fn load<P: AsRef<Path>>(path: P, overrides: &[IataOverride]) -> Self {
        let path = path.as_ref();
        let mut resolver = match Self::read_table(path).await {
            Ok(airlines) => {
                info!(
                    "Loaded {} IATA airline codes from {}",
                    airlines.len(),
                    path.display()
                );
                Self::from_table(airlines)
            }
            Err(e) => {
                warn!(
                    "Unable to load IATA table from {}, continuing without it: {:#}",
                    path.display(),
                    e
                );
                metrics::counter!("iata.table.load_failed_total").increment(1);
                Self::empty()
            }
        };

        resolver.apply_overrides(overrides);
        resolver
    }

    async fn read_table(path: &Path) -> Result<HashMap<String, AirlineCodes>> {
        let data = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&data).context("Failed to parse IATA table JSON")
    }

    /// Overrides replace any file-loaded entry with the same IATA code
    pub fn apply_overrides(&mut self, overrides: &[IataOverride]) {
        for o in overrides {
            debug!("Applying IATA override {}", o);
            self.airlines.insert(
                o.iata.clone(),
                AirlineCodes {
                    icao: o.icao.clone(),
                    name: o.name.clone(),
                },
            );
        }
    }

    /// Split a callsign into its 2-character airline prefix and the rest.
    /// Callsigns of 2 characters or fewer have no flight number.
    fn split_callsign(callsign: &str) -> Option<(&str, &str)> {
        if callsign.chars().count() <= 2 {
            return None;
        }
        let split = callsign.char_indices().nth(2).map(|(i, _)| i)?;
        Some(callsign.split_at(split))
    }

    /// Entry for the airline prefix of an IATA callsign
    pub fn airline(&self, callsign: &str) -> Option<&AirlineCodes> {
        let (prefix, _) = Self::split_callsign(callsign)?;
        self.airlines.get(prefix)
    }

    pub fn airline_name(&self, callsign: &str) -> Option<&str> {
        self.airline(callsign).map(|a| a.name.as_str())
    }

    /// Translate an IATA callsign (`AA1234`) into its ICAO form (`AAL1234`)
    pub fn lookup(&self, callsign: &str) -> Option<String> {
        let (prefix, flight_number) = Self::split_callsign(callsign)?;
        self.airlines
            .get(prefix)
            .map(|airline| format!("{}{}", airline.icao, flight_number))
    }

    pub fn len(&self) -> usize {
        self.airlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.airlines.is_empty()
    }
}
