//! Correlation of positions and datalink messages into aircraft
//!
//! The [`AircraftRegistry`] owns every tracked [`Aircraft`] together with an
//! [`IdentityIndex`] that maps identity hints (ICAO hex, registration,
//! callsigns) to the aircraft's uid. Hints are only lookup accelerators: the
//! uid is the identity.
//!
//! In the running service the registry is owned by a single worker task
//! ([`spawn_registry`]) and driven through a cloneable [`RegistryHandle`], so
//! find-or-create and eviction are never interleaved.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, trace, warn};
use uuid::Uuid;

use crate::aircraft::{Aircraft, AircraftSummary};
use crate::config::RetentionConfig;
use crate::decoder::TextDecoder;
use crate::message::CanonicalMessage;
use crate::position::PositionReport;

/// What to do when a key is already claimed by another aircraft
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClaimPolicy {
    /// Re-point the key at the claiming aircraft
    Overwrite,
    /// Leave the existing claim alone
    FirstWriterWins,
}

/// Keys of an aircraft created from a position
pub const POSITION_KEY_POLICY: KeyClaimPolicy = KeyClaimPolicy::Overwrite;
/// Registration of a position matched to an existing aircraft
pub const POSITION_REGISTRATION_UPDATE_POLICY: KeyClaimPolicy = KeyClaimPolicy::Overwrite;
/// Hex and callsign of a position matched to an existing aircraft
pub const POSITION_HINT_UPDATE_POLICY: KeyClaimPolicy = KeyClaimPolicy::FirstWriterWins;
pub const MESSAGE_KEY_POLICY: KeyClaimPolicy = KeyClaimPolicy::FirstWriterWins;

const REGISTRY_QUEUE_SIZE: usize = 1_000;

/// Wall clock as fractional epoch seconds
pub fn now_epoch_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

fn canonical_key(key: &str) -> Option<String> {
    let key = key.trim();
    if key.is_empty() {
        None
    } else {
        Some(key.to_ascii_uppercase())
    }
}

/// Identity key → aircraft uid
#[derive(Debug, Default)]
pub struct IdentityIndex {
    keys: HashMap<String, Uuid>,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, key: &str) -> Option<Uuid> {
        canonical_key(key).and_then(|key| self.keys.get(&key).copied())
    }

    /// Returns whether the key now points at `uid`
    pub fn claim(&mut self, key: &str, uid: Uuid, policy: KeyClaimPolicy) -> bool {
        let Some(key) = canonical_key(key) else {
            return false;
        };

        match self.keys.get(&key) {
            Some(existing) if *existing == uid => true,
            Some(existing) if policy == KeyClaimPolicy::FirstWriterWins => {
                trace!("Key {} stays with {} (claimed by {})", key, existing, uid);
                false
            }
            _ => {
                self.keys.insert(key, uid);
                true
            }
        }
    }

    /// Drop every key pointing at `uid`; returns how many were removed
    pub fn remove_uid(&mut self, uid: Uuid) -> usize {
        let before = self.keys.len();
        self.keys.retain(|_, value| *value != uid);
        before - self.keys.len()
    }

    pub fn keys_for(&self, uid: Uuid) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .keys
            .iter()
            .filter(|(_, value)| **value == uid)
            .map(|(key, _)| key.as_str())
            .collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Outcome of one eviction sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub evicted: usize,
    pub remaining: usize,
    /// Remaining aircraft with a position inside the position window
    pub fresh_positions: usize,
    /// Remaining aircraft with a message inside the message window
    pub fresh_messages: usize,
    pub fresh_both: usize,
    pub keys_removed: usize,
}

fn position_keys(pos: &PositionReport) -> Vec<String> {
    [
        pos.hex.as_deref(),
        pos.registration.as_deref(),
        pos.callsign_key(),
    ]
    .into_iter()
    .flatten()
    .map(str::to_string)
    .collect()
}

/// Keys of a matched position with the policy each is claimed under
fn position_update_claims(pos: &PositionReport) -> Vec<(String, KeyClaimPolicy)> {
    [
        (pos.hex.as_deref(), POSITION_HINT_UPDATE_POLICY),
        (pos.registration.as_deref(), POSITION_REGISTRATION_UPDATE_POLICY),
        (pos.callsign_key(), POSITION_HINT_UPDATE_POLICY),
    ]
    .into_iter()
    .filter_map(|(key, policy)| key.map(|key| (key.to_string(), policy)))
    .collect()
}

fn message_keys(msg: &CanonicalMessage) -> Vec<String> {
    [
        msg.icao_hex.as_deref(),
        msg.tail.as_deref(),
        msg.iata_callsign_key(),
        msg.icao_callsign_key(),
    ]
    .into_iter()
    .flatten()
    .map(str::to_string)
    .collect()
}

pub struct AircraftRegistry {
    aircraft: HashMap<Uuid, Aircraft>,
    index: IdentityIndex,
    decoder: Arc<dyn TextDecoder>,
    retention: RetentionConfig,
}

impl AircraftRegistry {
    pub fn new(decoder: Arc<dyn TextDecoder>, retention: RetentionConfig) -> Self {
        Self {
            aircraft: HashMap::new(),
            index: IdentityIndex::new(),
            decoder,
            retention,
        }
    }

    pub fn retention(&self) -> RetentionConfig {
        self.retention
    }

    /// First key that resolves to a live aircraft wins
    fn resolve(&self, keys: &[String]) -> Option<Uuid> {
        keys.iter()
            .filter_map(|key| self.index.lookup(key))
            .find(|uid| self.aircraft.contains_key(uid))
    }

    /// Correlate a position report; returns the uid it was attributed to
    pub fn process_position(&mut self, pos: PositionReport) -> Uuid {
        let keys = position_keys(&pos);

        if let Some(uid) = self.resolve(&keys)
            && let Some(aircraft) = self.aircraft.get_mut(&uid)
        {
            let claims = position_update_claims(&pos);
            if aircraft.update_position(pos) {
                for (key, policy) in &claims {
                    self.index.claim(key, uid, *policy);
                }
            } else {
                metrics::counter!("registry.positions.rate_limited_total").increment(1);
            }
            return uid;
        }

        let aircraft = Aircraft::from_position(pos);
        let uid = aircraft.uid();
        for key in &keys {
            self.index.claim(key, uid, POSITION_KEY_POLICY);
        }
        debug!("New aircraft {} from position, keys {:?}", uid, keys);
        self.insert(aircraft);
        uid
    }

    /// Correlate a datalink message; returns the uid it was attributed to
    pub fn process_message(&mut self, msg: CanonicalMessage) -> Uuid {
        let keys = message_keys(&msg);

        if let Some(uid) = self.resolve(&keys)
            && let Some(aircraft) = self.aircraft.get_mut(&uid)
        {
            aircraft.update_message(msg, self.decoder.as_ref());
            for key in aircraft.identity_keys() {
                self.index.claim(key, uid, MESSAGE_KEY_POLICY);
            }
            return uid;
        }

        let aircraft = Aircraft::from_message(msg, self.decoder.as_ref());
        let uid = aircraft.uid();
        for key in aircraft.identity_keys() {
            self.index.claim(key, uid, MESSAGE_KEY_POLICY);
        }
        debug!("New aircraft {} from message, keys {:?}", uid, keys);
        self.insert(aircraft);
        uid
    }

    fn insert(&mut self, aircraft: Aircraft) {
        self.aircraft.insert(aircraft.uid(), aircraft);
        metrics::counter!("registry.aircraft.created_total").increment(1);
        metrics::gauge!("registry.aircraft.tracked").set(self.aircraft.len() as f64);
    }

    /// Evict aircraft stale on both feeds relative to `now` (epoch seconds)
    pub fn prune(&mut self, now: f64) -> PruneReport {
        let position_cutoff = now - self.retention.position_window.as_secs_f64();
        let message_cutoff = now - self.retention.message_window.as_secs_f64();

        let stale: Vec<Uuid> = self
            .aircraft
            .values()
            .filter(|a| a.is_old(position_cutoff, message_cutoff))
            .map(Aircraft::uid)
            .collect();

        let mut report = PruneReport::default();
        for uid in stale {
            self.aircraft.remove(&uid);
            report.keys_removed += self.index.remove_uid(uid);
            report.evicted += 1;
        }

        for aircraft in self.aircraft.values() {
            let fresh_position = aircraft
                .last_position_time
                .is_some_and(|t| t >= position_cutoff);
            let fresh_message = aircraft
                .last_message_time
                .is_some_and(|t| t >= message_cutoff);
            report.fresh_positions += usize::from(fresh_position);
            report.fresh_messages += usize::from(fresh_message);
            report.fresh_both += usize::from(fresh_position && fresh_message);
        }
        report.remaining = self.aircraft.len();

        metrics::counter!("registry.aircraft.evicted_total").increment(report.evicted as u64);
        metrics::gauge!("registry.aircraft.tracked").set(report.remaining as f64);
        metrics::gauge!("registry.aircraft.fresh_positions").set(report.fresh_positions as f64);
        metrics::gauge!("registry.aircraft.fresh_messages").set(report.fresh_messages as f64);
        metrics::gauge!("registry.aircraft.fresh_both").set(report.fresh_both as f64);
        metrics::gauge!("registry.index.keys").set(self.index.len() as f64);

        report
    }

    pub fn aircraft_count(&self) -> usize {
        self.aircraft.len()
    }

    pub fn get(&self, uid: Uuid) -> Option<&Aircraft> {
        self.aircraft.get(&uid)
    }

    pub fn find_by_key(&self, key: &str) -> Option<&Aircraft> {
        self.index.lookup(key).and_then(|uid| self.aircraft.get(&uid))
    }

    pub fn index(&self) -> &IdentityIndex {
        &self.index
    }

    /// Snapshot of every aircraft, most recently active first
    pub fn summaries(&self) -> Vec<AircraftSummary> {
        let mut summaries: Vec<AircraftSummary> =
            self.aircraft.values().map(Aircraft::summary).collect();
        let last_seen = |s: &AircraftSummary| {
            s.last_position_time
                .unwrap_or(f64::MIN)
                .max(s.last_message_time.unwrap_or(f64::MIN))
        };
        summaries.sort_by(|a, b| last_seen(b).total_cmp(&last_seen(a)));
        summaries
    }
}

/// Work items for the registry worker
enum RegistryCommand {
    Position(Box<PositionReport>),
    Message(Box<CanonicalMessage>),
    Prune {
        now: f64,
        reply: oneshot::Sender<PruneReport>,
    },
    Snapshot(oneshot::Sender<Vec<AircraftSummary>>),
    Count(oneshot::Sender<usize>),
}

/// Cloneable handle to the registry worker
#[derive(Clone)]
pub struct RegistryHandle {
    tx: flume::Sender<RegistryCommand>,
}

impl RegistryHandle {
    async fn send(&self, command: RegistryCommand) -> Result<()> {
        // Block until space is available - never drop updates
        self.tx
            .send_async(command)
            .await
            .map_err(|_| anyhow::anyhow!("registry worker has stopped"))
    }

    pub async fn process_position(&self, pos: PositionReport) -> Result<()> {
        self.send(RegistryCommand::Position(Box::new(pos))).await
    }

    pub async fn process_message(&self, msg: CanonicalMessage) -> Result<()> {
        self.send(RegistryCommand::Message(Box::new(msg))).await
    }

    /// Run an eviction sweep now instead of waiting for the timer
    pub async fn prune_now(&self) -> Result<PruneReport> {
        self.prune_at(now_epoch_seconds()).await
    }

    pub async fn prune_at(&self, now: f64) -> Result<PruneReport> {
        let (reply, rx) = oneshot::channel();
        self.send(RegistryCommand::Prune { now, reply }).await?;
        rx.await.context("registry worker dropped prune reply")
    }

    pub async fn snapshot(&self) -> Result<Vec<AircraftSummary>> {
        let (reply, rx) = oneshot::channel();
        self.send(RegistryCommand::Snapshot(reply)).await?;
        rx.await.context("registry worker dropped snapshot reply")
    }

    pub async fn aircraft_count(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(RegistryCommand::Count(reply)).await?;
        rx.await.context("registry worker dropped count reply")
    }

    pub fn queue_depth(&self) -> usize {
        self.tx.len()
    }
}

fn log_prune(report: &PruneReport) {
    if report.evicted > 0 {
        debug!(
            "Pruned {} aircraft ({} keys), {} remaining: {} with positions, {} with messages, {} with both",
            report.evicted,
            report.keys_removed,
            report.remaining,
            report.fresh_positions,
            report.fresh_messages,
            report.fresh_both
        );
    } else {
        trace!("Prune sweep: {} aircraft tracked", report.remaining);
    }
}

impl AircraftRegistry {
    fn handle(&mut self, command: RegistryCommand) {
        match command {
            RegistryCommand::Position(pos) => {
                self.process_position(*pos);
            }
            RegistryCommand::Message(msg) => {
                self.process_message(*msg);
            }
            RegistryCommand::Prune { now, reply } => {
                let report = self.prune(now);
                log_prune(&report);
                let _ = reply.send(report);
            }
            RegistryCommand::Snapshot(reply) => {
                let _ = reply.send(self.summaries());
            }
            RegistryCommand::Count(reply) => {
                let _ = reply.send(self.aircraft_count());
            }
        }
    }
}

/// Move the registry onto its own worker task
///
/// The worker also runs the eviction sweep every `prune_interval`. It stops
/// when `cancel` fires or every handle has been dropped.
pub fn spawn_registry(
    mut registry: AircraftRegistry,
    cancel: CancellationToken,
) -> (RegistryHandle, JoinHandle<()>) {
    let (tx, rx) = flume::bounded::<RegistryCommand>(REGISTRY_QUEUE_SIZE);
    let prune_interval = registry.retention.prune_interval;

    let join = tokio::spawn(
        async move {
            info!(
                "Registry worker started (prune every {:?}, positions kept {:?}, messages kept {:?})",
                prune_interval,
                registry.retention.position_window,
                registry.retention.message_window
            );

            let mut ticker = tokio::time::interval(prune_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Registry worker cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = registry.prune(now_epoch_seconds());
                        log_prune(&report);
                    }
                    command = rx.recv_async() => {
                        match command {
                            Ok(command) => registry.handle(command),
                            Err(_) => {
                                warn!("All registry handles dropped, stopping worker");
                                break;
                            }
                        }
                        metrics::gauge!("registry.queue_depth").set(rx.len() as f64);
                    }
                }
            }

            info!(
                "Registry worker stopped with {} aircraft tracked",
                registry.aircraft_count()
            );
        }
        .instrument(tracing::info_span!("registry_worker")),
    );

    (RegistryHandle { tx }, join)
}
