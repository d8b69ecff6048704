//! acarshub - correlates ACARS/VDLM2 datalink messages with ADS-B positions
//!
//! Datalink messages arrive over ZeroMQ subscriptions and ADS-B positions
//! over a TCP JSON stream. Both are normalized and merged into a registry of
//! aircraft keyed by ICAO hex, registration and callsigns.

pub mod adsb_ingestor;
pub mod aircraft;
pub mod aircraft_registry;
pub mod config;
pub mod datalink;
pub mod datalink_ingestor;
pub mod datalink_sources;
pub mod decoder;
pub mod hub;
pub mod iata;
pub mod ingestor;
pub mod log_format;
pub mod message;
pub mod metrics;
pub mod normalizer;
pub mod position;
pub mod stats;

pub use aircraft::{Aircraft, AircraftSummary};
pub use aircraft_registry::{AircraftRegistry, RegistryHandle};
pub use config::{ConfigError, HubConfig, RetentionConfig};
pub use hub::Hub;
pub use message::{CanonicalMessage, MessageType};
pub use position::PositionReport;
