//! ADS-B position feed
//!
//! Connects to a decoder's JSON output port (a continuous stream of aircraft
//! objects), frames the byte stream into complete JSON objects and hands each
//! [`PositionReport`] to the registry. The connection is retried forever with
//! an exponential backoff that resets on every successful connect.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, trace, warn};

use crate::aircraft_registry::RegistryHandle;
use crate::ingestor::IngestorHandle;
use crate::position::PositionReport;
use crate::stats::IngestCounters;

/// Objects larger than this are dropped without being parsed
pub const MAX_OBJECT_BYTES: usize = 1 << 20;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Exponential reconnect delay: doubles per consecutive failure up to a cap
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(15), Duration::from_secs(60))
    }
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; the following call returns the doubled delay
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = std::cmp::min(self.current.saturating_mul(2), self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}

/// Splits a byte stream into top-level JSON objects
///
/// Tracks brace depth outside of string literals (honouring backslash
/// escapes), so braces inside strings and whitespace or separators between
/// objects are handled. Bytes outside an object are skipped.
///
/// The stream carries one object per line, so a newline inside an
/// unfinished object means the object was truncated: it is dropped and
/// framing restarts at the next `{`.
#[derive(Debug)]
pub struct JsonObjectFramer {
    buffer: Vec<u8>,
    depth: usize,
    in_string: bool,
    escaped: bool,
    /// Set while skipping the rest of an oversized object
    discarding: bool,
    max_object_bytes: usize,
    dropped: u64,
}

impl Default for JsonObjectFramer {
    fn default() -> Self {
        Self::new(MAX_OBJECT_BYTES)
    }
}

impl JsonObjectFramer {
    pub fn new(max_object_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            depth: 0,
            in_string: false,
            escaped: false,
            discarding: false,
            max_object_bytes,
            dropped: 0,
        }
    }

    /// Feed a chunk; returns every object completed by it, in order
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut objects = Vec::new();

        for &byte in chunk {
            if self.depth == 0 {
                if byte == b'{' {
                    self.depth = 1;
                    self.in_string = false;
                    self.escaped = false;
                    self.buffer.clear();
                    self.buffer.push(byte);
                }
                continue;
            }

            if byte == b'\n' {
                self.abandon_object();
                continue;
            }

            if !self.discarding {
                self.buffer.push(byte);
                if self.buffer.len() > self.max_object_bytes {
                    warn!(
                        "Discarding JSON object larger than {} bytes",
                        self.max_object_bytes
                    );
                    self.discarding = true;
                    self.buffer = Vec::new();
                }
            }

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match byte {
                b'"' => self.in_string = true,
                b'{' => self.depth += 1,
                b'}' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        self.finish_object(&mut objects);
                    }
                }
                _ => {}
            }
        }

        objects
    }

    fn abandon_object(&mut self) {
        debug!(
            "Dropping unterminated JSON object ({} bytes buffered)",
            self.buffer.len()
        );
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
        self.discarding = false;
        self.buffer.clear();
        self.dropped += 1;
    }

    fn finish_object(&mut self, objects: &mut Vec<String>) {
        if self.discarding {
            self.discarding = false;
            self.dropped += 1;
            return;
        }

        match String::from_utf8(std::mem::take(&mut self.buffer)) {
            Ok(object) => objects.push(object),
            Err(e) => {
                debug!("Dropping non UTF-8 JSON object: {}", e);
                self.dropped += 1;
            }
        }
    }

    /// Bytes of the object currently being assembled
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Objects dropped for size or encoding
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Result of one connection attempt
enum ConnectionResult {
    /// Server closed the connection
    Closed,
    Cancelled,
    /// Could not establish the connection
    ConnectionFailed(anyhow::Error),
    /// Connection was established but failed during operation
    OperationFailed(anyhow::Error),
    /// Registry worker is gone; nothing left to feed
    RegistryClosed(anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct PositionIngestorConfig {
    pub host: String,
    pub port: u16,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Interval of the ingest summary log line
    pub log_interval: Duration,
}

impl PositionIngestorConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            initial_backoff: Duration::from_secs(15),
            max_backoff: Duration::from_secs(60),
            log_interval: Duration::from_secs(300),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub struct PositionIngestor {
    config: PositionIngestorConfig,
    registry: RegistryHandle,
    counters: Arc<IngestCounters>,
}

impl PositionIngestor {
    pub fn new(config: PositionIngestorConfig, registry: RegistryHandle) -> Self {
        Self {
            config,
            registry,
            counters: Arc::new(IngestCounters::new()),
        }
    }

    pub fn counters(&self) -> Arc<IngestCounters> {
        self.counters.clone()
    }

    /// Run the reconnect loop until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        let address = self.config.address();
        let mut backoff = ReconnectBackoff::new(self.config.initial_backoff, self.config.max_backoff);

        loop {
            match self.connect_and_process(&address, &mut backoff, &cancel).await {
                ConnectionResult::Cancelled => break,
                ConnectionResult::RegistryClosed(e) => {
                    warn!("Stopping ADS-B ingest from {}: {}", address, e);
                    break;
                }
                ConnectionResult::Closed => {
                    info!("ADS-B server {} closed the connection", address);
                }
                ConnectionResult::ConnectionFailed(e) => {
                    metrics::counter!("adsb.connection.failed_total").increment(1);
                    warn!("Failed to connect to ADS-B server {}: {}", address, e);
                }
                ConnectionResult::OperationFailed(e) => {
                    metrics::counter!("adsb.connection.operation_failed_total").increment(1);
                    warn!("ADS-B connection to {} failed: {}", address, e);
                }
            }

            let delay = backoff.next_delay();
            info!("Reconnecting to ADS-B server {} in {:?}", address, delay);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        metrics::gauge!("adsb.connection.connected").set(0.0);
        info!(
            "ADS-B ingest from {} stopped after {} positions ({} rejected)",
            address,
            self.counters.total(),
            self.counters.rejected()
        );
    }

    #[tracing::instrument(skip_all, fields(source = %address))]
    async fn connect_and_process(
        &self,
        address: &str,
        backoff: &mut ReconnectBackoff,
        cancel: &CancellationToken,
    ) -> ConnectionResult {
        info!("Connecting to ADS-B server");

        let stream = tokio::select! {
            _ = cancel.cancelled() => return ConnectionResult::Cancelled,
            result = TcpStream::connect(address) => match result {
                Ok(stream) => stream,
                Err(e) => {
                    metrics::gauge!("adsb.connection.connected").set(0.0);
                    return ConnectionResult::ConnectionFailed(anyhow!("Failed to connect: {}", e));
                }
            },
        };

        info!("Connected to ADS-B server");
        metrics::gauge!("adsb.connection.connected").set(1.0);
        backoff.reset();

        let result = self.process_connection(stream, cancel).await;
        metrics::gauge!("adsb.connection.connected").set(0.0);
        result
    }

    async fn process_connection(
        &self,
        mut stream: TcpStream,
        cancel: &CancellationToken,
    ) -> ConnectionResult {
        let mut framer = JsonObjectFramer::default();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let connection_start = std::time::Instant::now();

        let mut log_ticker = tokio::time::interval(self.config.log_interval);
        log_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log_ticker.tick().await;

        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(
                        "Closing ADS-B connection after {:.1}s",
                        connection_start.elapsed().as_secs_f64()
                    );
                    return ConnectionResult::Cancelled;
                }
                _ = log_ticker.tick() => {
                    let window = self.counters.take_log_window();
                    info!(
                        "ADS-B: {} positions ({} rejected) in the last {:?}, {} total",
                        window.total, window.errors, self.config.log_interval, self.counters.total()
                    );
                    continue;
                }
                read = stream.read(&mut buf) => read,
            };

            let n = match read {
                Ok(0) => return ConnectionResult::Closed,
                Ok(n) => n,
                Err(e) => return ConnectionResult::OperationFailed(anyhow!("Read failed: {}", e)),
            };
            metrics::counter!("adsb.bytes.received_total").increment(n as u64);

            for object in framer.push(&buf[..n]) {
                if let Err(e) = self.handle_object(&object).await {
                    return ConnectionResult::RegistryClosed(e);
                }
            }
        }
    }

    /// Parse one framed object and forward it; malformed objects are dropped
    pub async fn handle_object(&self, object: &str) -> anyhow::Result<()> {
        let position = match PositionReport::from_json(object) {
            Ok(position) => position,
            Err(e) => {
                debug!("Dropping malformed ADS-B object: {}", e);
                trace!("Malformed object: {}", object);
                self.counters.record_rejected();
                metrics::counter!("adsb.positions.rejected_total").increment(1);
                return Ok(());
            }
        };

        self.counters.record_accepted();
        metrics::counter!("adsb.positions.received_total").increment(1);
        self.registry.process_position(position).await
    }

    pub fn spawn(self, cancel: CancellationToken) -> IngestorHandle {
        let name = format!("ADS-B {}", self.config.address());
        let join = tokio::spawn(
            self.run(cancel.clone())
                .instrument(tracing::info_span!("adsb_ingest")),
        );
        IngestorHandle::new(name, cancel, join)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = ReconnectBackoff::default();
        let delays: Vec<u64> = (0..5).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![15, 30, 60, 60, 60]);

        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_secs(15));
        assert_eq!(backoff.next_delay(), Duration::from_secs(15));
    }

    #[test]
    fn test_framer_splits_concatenated_objects() {
        let mut framer = JsonObjectFramer::default();
        let objects = framer.push(b"{\"hex\":\"a\"}\n{\"hex\":\"b\"}  \r\n{\"hex\":\"c\"}");
        assert_eq!(
            objects,
            vec![r#"{"hex":"a"}"#, r#"{"hex":"b"}"#, r#"{"hex":"c"}"#]
        );
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn test_framer_joins_objects_across_chunks() {
        let mut framer = JsonObjectFramer::default();
        assert!(framer.push(br#"{"now": 1.0, "hex": "ab"#).is_empty());
        assert!(framer.pending_len() > 0);
        let objects = framer.push(br#"c123", "nested": {"a": 1}}{"now""#);
        assert_eq!(
            objects,
            vec![r#"{"now": 1.0, "hex": "abc123", "nested": {"a": 1}}"#]
        );
        let objects = framer.push(br#": 2.0}"#);
        assert_eq!(objects, vec![r#"{"now": 2.0}"#]);
    }

    #[test]
    fn test_framer_ignores_braces_in_strings() {
        let mut framer = JsonObjectFramer::default();
        let input = br#"{"flight": "A}B{", "note": "say \"}\" \\"}"#;
        let objects = framer.push(input);
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].as_bytes(), input);
        let value: serde_json::Value = serde_json::from_str(&objects[0]).unwrap();
        assert_eq!(value["flight"], "A}B{");
    }

    #[test]
    fn test_framer_skips_bytes_outside_objects() {
        let mut framer = JsonObjectFramer::default();
        let objects = framer.push(b"garbage ] , {\"a\":1} trailing");
        assert_eq!(objects, vec![r#"{"a":1}"#]);
    }

    #[test]
    fn test_framer_discards_oversized_objects() {
        let mut framer = JsonObjectFramer::new(16);
        let objects = framer.push(br#"{"text": "this object is far too long"}{"a":1}"#);
        assert_eq!(objects, vec![r#"{"a":1}"#]);
        assert_eq!(framer.dropped(), 1);
    }

    #[test]
    fn test_framer_recovers_after_truncated_object() {
        let mut framer = JsonObjectFramer::default();
        let mut input = b"{\"now\": 1.0, \"hex\": \"aaaaaa\", \"x\": {\n".to_vec();
        for i in 0..5 {
            input.extend_from_slice(format!("{{\"now\": {}.0, \"hex\": \"b{}\"}}\n", i, i).as_bytes());
        }

        let objects = framer.push(&input);
        assert_eq!(objects.len(), 5);
        assert_eq!(objects[0], r#"{"now": 0.0, "hex": "b0"}"#);
        assert_eq!(framer.dropped(), 1);
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn test_framer_recovers_after_unterminated_string() {
        let mut framer = JsonObjectFramer::default();
        assert!(framer.push(b"{\"flight\": \"DAL4").is_empty());
        let objects = framer.push(b"\n{\"hex\": \"c0ffee\"}\n");
        assert_eq!(objects, vec![r#"{"hex": "c0ffee"}"#]);
        assert_eq!(framer.dropped(), 1);
    }

    #[test]
    fn test_framer_recovers_after_unbalanced_oversized_object() {
        let mut framer = JsonObjectFramer::new(16);
        let objects = framer.push(b"{\"text\": {\"deep\": \"far too long to keep\"\n{\"a\":1}\n");
        assert_eq!(objects, vec![r#"{"a":1}"#]);
        assert_eq!(framer.dropped(), 1);
    }
}
