//! Sources of raw datalink payloads
//!
//! - Production: a ZeroMQ SUB socket on an acars_router / decoder publisher
//! - Replay: a recorded capture file, one JSON payload per line
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::{debug, info, trace, warn};
use zeromq::{Socket, SocketEvent, SocketRecv, SubSocket, ZmqMessage};

/// Source of raw JSON datalink payloads
#[async_trait]
pub trait DatalinkSource: Send {
    /// Human-readable source address, for logs
    fn describe(&self) -> String;

    /// Get the next payload from the source
    ///
    /// Returns:
    /// - `Ok(Some(payload))` - Next payload available
    /// - `Ok(None)` - End of stream (replay sources only)
    /// - `Err(e)` - Transport error; the caller may call [`reconnect`](Self::reconnect)
    async fn next_message(&mut self) -> Result<Option<String>>;

    /// Tear down and re-establish the transport
    async fn reconnect(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Turn `host:port` into a ZeroMQ endpoint; full endpoints pass through
pub fn zmq_endpoint(address: &str) -> String {
    let address = address.trim();
    if address.contains("://") {
        address.to_string()
    } else {
        format!("tcp://{}", address)
    }
}

/// Silence after which a subscription is assumed dead and rebuilt
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// A connected SUB socket and its monitor event stream
struct Subscription {
    socket: SubSocket,
    events: BoxStream<'static, SocketEvent>,
}

enum Received {
    Message(ZmqMessage),
    Failed(zeromq::ZmqError),
    Disconnected,
    OtherEvent,
    Idle,
}

/// ZeroMQ SUB subscription to every topic of one publisher
///
/// The socket is connected lazily so a publisher that is not up yet is just
/// another transport error for the ingestor to retry. A SUB socket never
/// reports a lost publisher from `recv`, so a `Disconnected` monitor event or
/// no payload for `idle_timeout` is surfaced as a transport error.
pub struct ZmqDatalinkSource {
    endpoint: String,
    idle_timeout: Duration,
    subscription: Option<Subscription>,
}

impl ZmqDatalinkSource {
    pub fn new(address: &str) -> Self {
        Self {
            endpoint: zmq_endpoint(address),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            subscription: None,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    async fn connect(&mut self) -> Result<&mut Subscription> {
        if self.subscription.is_none() {
            let mut socket = SubSocket::new();
            let events = socket.monitor().boxed();
            socket
                .connect(&self.endpoint)
                .await
                .with_context(|| format!("Failed to connect to {}", self.endpoint))?;
            socket
                .subscribe("")
                .await
                .with_context(|| format!("Failed to subscribe on {}", self.endpoint))?;
            info!("Subscribed to datalink publisher at {}", self.endpoint);
            self.subscription = Some(Subscription { socket, events });
        }

        self.subscription
            .as_mut()
            .context("ZeroMQ socket missing after connect")
    }
}

#[async_trait]
impl DatalinkSource for ZmqDatalinkSource {
    fn describe(&self) -> String {
        self.endpoint.clone()
    }

    async fn next_message(&mut self) -> Result<Option<String>> {
        let idle_timeout = self.idle_timeout;

        loop {
            let subscription = self.connect().await?;
            let received = tokio::select! {
                event = subscription.events.next() => match event {
                    Some(SocketEvent::Disconnected(_)) | None => Received::Disconnected,
                    Some(_) => Received::OtherEvent,
                },
                result = tokio::time::timeout(idle_timeout, subscription.socket.recv()) => match result {
                    Ok(Ok(message)) => Received::Message(message),
                    Ok(Err(e)) => Received::Failed(e),
                    Err(_) => Received::Idle,
                },
            };

            let message = match received {
                Received::Message(message) => message,
                Received::OtherEvent => {
                    trace!("ZeroMQ monitor event on {}", self.endpoint);
                    continue;
                }
                Received::Failed(e) => {
                    // Force a fresh socket on the next call
                    self.subscription = None;
                    return Err(e).with_context(|| format!("Receive failed on {}", self.endpoint));
                }
                Received::Disconnected => {
                    self.subscription = None;
                    bail!("Publisher {} disconnected", self.endpoint);
                }
                Received::Idle => {
                    self.subscription = None;
                    bail!(
                        "No payload from {} for {}s",
                        self.endpoint,
                        idle_timeout.as_secs()
                    );
                }
            };

            // Topic frames (if any) come first; the payload is the last frame
            let Some(frame) = message.into_vec().pop() else {
                debug!("Empty ZeroMQ message from {}", self.endpoint);
                continue;
            };

            match std::str::from_utf8(&frame) {
                Ok(payload) => return Ok(Some(payload.to_string())),
                Err(e) => {
                    warn!("Non UTF-8 payload from {}: {}", self.endpoint, e);
                    metrics::counter!("datalink.messages.invalid_utf8_total").increment(1);
                }
            }
        }
    }

    async fn reconnect(&mut self) -> Result<()> {
        if let Some(subscription) = self.subscription.take() {
            // Errors on close are irrelevant, the socket is being replaced
            let _ = subscription.socket.close().await;
        }
        self.connect().await.map(|_| ())
    }
}

/// Recorded capture, one JSON payload per line
pub struct FileDatalinkSource {
    name: String,
    lines: Lines<BufReader<File>>,
    lines_read: usize,
}

impl FileDatalinkSource {
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .await
            .with_context(|| format!("Failed to open capture {}", path.display()))?;

        debug!("Opened datalink capture {:?}", path);

        Ok(Self {
            name: path.display().to_string(),
            lines: BufReader::new(file).lines(),
            lines_read: 0,
        })
    }

    pub fn lines_read(&self) -> usize {
        self.lines_read
    }
}

#[async_trait]
impl DatalinkSource for FileDatalinkSource {
    fn describe(&self) -> String {
        self.name.clone()
    }

    async fn next_message(&mut self) -> Result<Option<String>> {
        // next_line is cancel safe; the ingestor polls this inside select!
        while let Some(line) = self.lines.next_line().await? {
            self.lines_read += 1;
            let payload = line.trim();
            if !payload.is_empty() {
                return Ok(Some(payload.to_string()));
            }
        }

        debug!(
            "Reached end of {} after {} lines",
            self.name, self.lines_read
        );
        Ok(None)
    }
}
