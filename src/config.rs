use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::iata::IataOverride;

/// Default TCP port of the ADS-B JSON output
pub const DEFAULT_ADSB_PORT: u16 = 30047;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid IATA override '{value}': {reason}")]
    InvalidIataOverride { value: String, reason: String },

    #[error("no feed enabled; enable at least one of ACARS, VDLM2 or ADS-B")]
    NoFeedEnabled,

    #[error("{feed} is enabled but no source address was given")]
    MissingSources { feed: &'static str },

    #[error("{feed} source address is empty")]
    EmptySource { feed: &'static str },

    #[error("{feed} source '{source_addr}' is listed more than once")]
    DuplicateSource {
        feed: &'static str,
        source_addr: String,
    },

    #[error("ADS-B is enabled but no host was given")]
    MissingAdsbHost,

    #[error("{what} port must be non-zero")]
    InvalidPort { what: &'static str },

    #[error("{what} must be greater than zero")]
    InvalidRetention { what: &'static str },
}

/// Eviction windows of the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Aircraft without a position newer than this are stale on positions
    pub position_window: Duration,
    /// Aircraft without a message newer than this are stale on messages
    pub message_window: Duration,
    pub prune_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            position_window: Duration::from_secs(120),
            message_window: Duration::from_secs(900),
            prune_interval: Duration::from_secs(10),
        }
    }
}

impl RetentionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.position_window.is_zero() {
            return Err(ConfigError::InvalidRetention {
                what: "position retention window",
            });
        }
        if self.message_window.is_zero() {
            return Err(ConfigError::InvalidRetention {
                what: "message retention window",
            });
        }
        if self.prune_interval.is_zero() {
            return Err(ConfigError::InvalidRetention {
                what: "prune interval",
            });
        }
        Ok(())
    }
}

/// Validated configuration handed to [`crate::hub::Hub::start`]
#[derive(Debug, Clone, PartialEq)]
pub struct HubConfig {
    pub enable_acars: bool,
    pub enable_vdlm2: bool,
    pub enable_adsb: bool,
    /// `host:port` of each ACARS publisher
    pub acars_sources: Vec<String>,
    /// `host:port` of each VDLM2 publisher
    pub vdlm2_sources: Vec<String>,
    pub adsb_host: Option<String>,
    pub adsb_port: u16,
    pub iata_table: Option<PathBuf>,
    pub iata_overrides: Vec<IataOverride>,
    pub retention: RetentionConfig,
    pub stats_interval: Duration,
    pub metrics_port: Option<u16>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            enable_acars: false,
            enable_vdlm2: false,
            enable_adsb: false,
            acars_sources: Vec::new(),
            vdlm2_sources: Vec::new(),
            adsb_host: None,
            adsb_port: DEFAULT_ADSB_PORT,
            iata_table: None,
            iata_overrides: Vec::new(),
            retention: RetentionConfig::default(),
            stats_interval: Duration::from_secs(60),
            metrics_port: None,
        }
    }
}

fn validate_sources(feed: &'static str, sources: &[String]) -> Result<(), ConfigError> {
    if sources.is_empty() {
        return Err(ConfigError::MissingSources { feed });
    }

    let mut seen = HashSet::new();
    for source in sources {
        let source = source.trim();
        if source.is_empty() {
            return Err(ConfigError::EmptySource { feed });
        }
        if !seen.insert(source) {
            return Err(ConfigError::DuplicateSource {
                feed,
                source_addr: source.to_string(),
            });
        }
    }
    Ok(())
}

impl HubConfig {
    /// Check the configuration before anything is started
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enable_acars && !self.enable_vdlm2 && !self.enable_adsb {
            return Err(ConfigError::NoFeedEnabled);
        }

        if self.enable_acars {
            validate_sources("ACARS", &self.acars_sources)?;
        }
        if self.enable_vdlm2 {
            validate_sources("VDLM2", &self.vdlm2_sources)?;
        }

        if self.enable_adsb {
            let has_host = self
                .adsb_host
                .as_deref()
                .is_some_and(|h| !h.trim().is_empty());
            if !has_host {
                return Err(ConfigError::MissingAdsbHost);
            }
            if self.adsb_port == 0 {
                return Err(ConfigError::InvalidPort { what: "ADS-B" });
            }
        }

        if self.metrics_port == Some(0) {
            return Err(ConfigError::InvalidPort { what: "metrics" });
        }
        if self.stats_interval.is_zero() {
            return Err(ConfigError::InvalidRetention {
                what: "stats interval",
            });
        }

        self.retention.validate()
    }

    pub fn datalink_enabled(&self) -> bool {
        self.enable_acars || self.enable_vdlm2
    }
}
