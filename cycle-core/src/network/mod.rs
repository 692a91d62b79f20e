//! Two-layer connection management for the telemetry uplink.
//!
//! The uplink is a wireless association (the link) carrying a stream socket
//! (the transport). [`ConnectionManager`] owns the connection state for the
//! life of the device and exposes idempotent "ensure" operations that recover
//! either layer independently. Every wait is bounded: link association is
//! polled inside a fixed window, transport connects carry a timeout, and
//! periodic maintenance is rate-limited so reconnect storms cannot starve the
//! caller.

#![allow(async_fn_in_trait)]

use core::{fmt, time::Duration};

use heapless::String;

use crate::telemetry::WireError;
use crate::timing::Timestamp;

pub mod reporter;

pub use reporter::{Delivery, TelemetryReporter};

/// Longest SSID accepted by the radio.
pub const MAX_SSID_LEN: usize = 32;
/// Longest WPA passphrase accepted by the radio.
pub const MAX_PASSPHRASE_LEN: usize = 64;
/// Longest collector host name or dotted address.
pub const MAX_HOST_LEN: usize = 64;

/// Floor applied to [`ConnectionTiming::link_poll`] so the wait window always advances.
const MIN_LINK_POLL: Duration = Duration::from_millis(1);

/// Wireless association layer.
pub trait Link {
    /// Radio-specific failure.
    type Error;

    /// Reports whether the radio is currently associated.
    async fn is_associated(&mut self) -> bool;

    /// Requests association; completion is observed through [`Link::is_associated`].
    async fn associate(&mut self, credentials: &LinkCredentials) -> Result<(), Self::Error>;
}

/// Stream transport carried over the link.
pub trait Transport {
    /// Socket-specific failure.
    type Error;

    /// Reports whether the stream is currently open.
    async fn is_open(&mut self) -> bool;

    /// Tears down the stream. Closing an absent stream is not an error.
    async fn close(&mut self);

    /// Opens a fresh stream to `endpoint`, giving up after `timeout`.
    async fn connect(&mut self, endpoint: &Endpoint, timeout: Duration)
    -> Result<(), Self::Error>;

    /// Writes `bytes`, returning how many were accepted.
    async fn write(&mut self, bytes: &[u8]) -> Result<usize, Self::Error>;
}

/// Cooperative delay source.
pub trait Delay {
    /// Suspends the caller for `duration`.
    async fn delay(&mut self, duration: Duration);
}

/// Network failures surfaced to callers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NetworkError {
    /// Association absent and not restored within the wait window.
    LinkUnavailable,
    /// Stream absent and the fresh connect failed.
    TransportUnavailable,
    /// Fewer bytes written than the encoded record length.
    PartialWrite { written: usize, expected: usize },
    /// Record could not be encoded.
    Encode(WireError),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::LinkUnavailable => f.write_str("link unavailable"),
            NetworkError::TransportUnavailable => f.write_str("transport unavailable"),
            NetworkError::PartialWrite { written, expected } => {
                write!(f, "partial write ({written} of {expected} bytes)")
            }
            NetworkError::Encode(err) => write!(f, "encode failed: {err}"),
        }
    }
}

impl From<WireError> for NetworkError {
    fn from(value: WireError) -> Self {
        NetworkError::Encode(value)
    }
}

/// Configuration values that do not fit their bounded buffers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    SsidTooLong,
    PassphraseTooLong,
    HostTooLong,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::SsidTooLong => write!(f, "SSID exceeds {MAX_SSID_LEN} bytes"),
            ConfigError::PassphraseTooLong => {
                write!(f, "passphrase exceeds {MAX_PASSPHRASE_LEN} bytes")
            }
            ConfigError::HostTooLong => write!(f, "host exceeds {MAX_HOST_LEN} bytes"),
        }
    }
}

/// Association name and secret.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LinkCredentials {
    pub ssid: String<MAX_SSID_LEN>,
    pub passphrase: String<MAX_PASSPHRASE_LEN>,
}

impl LinkCredentials {
    /// Copies the credentials into bounded buffers.
    pub fn new(ssid: &str, passphrase: &str) -> Result<Self, ConfigError> {
        let mut bounded_ssid = String::new();
        bounded_ssid
            .push_str(ssid)
            .map_err(|_| ConfigError::SsidTooLong)?;
        let mut bounded_passphrase = String::new();
        bounded_passphrase
            .push_str(passphrase)
            .map_err(|_| ConfigError::PassphraseTooLong)?;

        Ok(Self {
            ssid: bounded_ssid,
            passphrase: bounded_passphrase,
        })
    }
}

/// Collector address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Endpoint {
    pub host: String<MAX_HOST_LEN>,
    pub port: u16,
}

impl Endpoint {
    /// Copies the host into a bounded buffer.
    pub fn new(host: &str, port: u16) -> Result<Self, ConfigError> {
        let mut bounded_host = String::new();
        bounded_host
            .push_str(host)
            .map_err(|_| ConfigError::HostTooLong)?;
        Ok(Self {
            host: bounded_host,
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Uplink settings fixed at initialisation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NetworkConfig {
    pub credentials: LinkCredentials,
    pub endpoint: Endpoint,
}

/// Bounded waits used by [`ConnectionManager`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ConnectionTiming {
    /// Longest time one call waits for association.
    pub link_wait: Duration,
    /// Interval between association checks inside the wait window.
    pub link_poll: Duration,
    /// Pause between tearing down a stale stream and reconnecting.
    pub transport_settle: Duration,
    /// Timeout handed to [`Transport::connect`].
    pub connect_timeout: Duration,
    /// Minimum spacing between maintenance passes.
    pub maintain_interval: Duration,
}

impl ConnectionTiming {
    pub const DEFAULT: Self = Self {
        link_wait: Duration::from_secs(5),
        link_poll: Duration::from_millis(250),
        transport_settle: Duration::from_millis(100),
        connect_timeout: Duration::from_secs(3),
        maintain_interval: Duration::from_secs(2),
    };
}

impl Default for ConnectionTiming {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Last observed state of both layers.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ConnectionState {
    pub link_connected: bool,
    pub transport_connected: bool,
    pub last_reconnect_attempt: Option<Timestamp>,
}

/// Result of a [`ConnectionManager::maintain`] pass.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MaintainOutcome {
    /// Called again inside the maintenance interval; nothing was done.
    Deferred,
    /// Both layers are up.
    Healthy,
    /// One layer could not be restored.
    Degraded(NetworkError),
}

/// Owns the uplink and its [`ConnectionState`].
pub struct ConnectionManager<N, D> {
    net: N,
    delay: D,
    config: NetworkConfig,
    timing: ConnectionTiming,
    state: ConnectionState,
    // Time spent waiting inside the current maintenance pass.
    busy: Duration,
}

impl<N, D> ConnectionManager<N, D>
where
    N: Link + Transport,
    D: Delay,
{
    /// Creates a manager with default timings. No connection is attempted yet.
    pub fn new(net: N, delay: D, config: NetworkConfig) -> Self {
        Self::with_timing(net, delay, config, ConnectionTiming::DEFAULT)
    }

    /// Creates a manager with explicit timings.
    pub fn with_timing(net: N, delay: D, config: NetworkConfig, timing: ConnectionTiming) -> Self {
        Self {
            net,
            delay,
            config,
            timing,
            state: ConnectionState::default(),
            busy: Duration::ZERO,
        }
    }

    /// Returns immediately when associated; otherwise requests association and
    /// polls for it until the wait window closes.
    pub async fn ensure_link_connected(&mut self) -> Result<(), NetworkError> {
        if self.net.is_associated().await {
            self.state.link_connected = true;
            return Ok(());
        }

        self.state.link_connected = false;
        self.state.transport_connected = false;

        // A refused request may still complete, so keep polling either way.
        let _ = self.net.associate(&self.config.credentials).await;

        let step = self.timing.link_poll.max(MIN_LINK_POLL);
        let mut waited = Duration::ZERO;
        while waited < self.timing.link_wait {
            self.wait(step).await;
            waited += step;

            if self.net.is_associated().await {
                self.state.link_connected = true;
                return Ok(());
            }
        }

        Err(NetworkError::LinkUnavailable)
    }

    /// Returns immediately when the stream is open; otherwise replaces it with
    /// a fresh connection.
    pub async fn ensure_transport_connected(&mut self) -> Result<(), NetworkError> {
        if self.net.is_open().await {
            self.state.transport_connected = true;
            return Ok(());
        }

        self.open_transport().await
    }

    /// Drops the current stream unconditionally and connects again.
    pub async fn reconnect_transport(&mut self) -> Result<(), NetworkError> {
        self.open_transport().await
    }

    /// Periodic health pass, skipped inside the maintenance interval.
    ///
    /// The interval runs from the end of the previous pass: the recorded
    /// attempt time is `now` plus the time the pass spent waiting.
    pub async fn maintain(&mut self, now: Timestamp) -> MaintainOutcome {
        if let Some(last) = self.state.last_reconnect_attempt {
            if now.saturating_duration_since(last) < self.timing.maintain_interval {
                return MaintainOutcome::Deferred;
            }
        }

        self.busy = Duration::ZERO;
        let outcome = match self.ensure_link_connected().await {
            Ok(()) => match self.ensure_transport_connected().await {
                Ok(()) => MaintainOutcome::Healthy,
                Err(err) => MaintainOutcome::Degraded(err),
            },
            Err(err) => MaintainOutcome::Degraded(err),
        };
        self.state.last_reconnect_attempt = Some(now + self.busy);

        outcome
    }

    /// Writes raw bytes on the current stream; a transport error counts as zero bytes.
    pub async fn write(&mut self, bytes: &[u8]) -> usize {
        match self.net.write(bytes).await {
            Ok(written) => written,
            Err(_) => 0,
        }
    }

    /// Marks the stream as unusable after a failed write.
    pub fn mark_transport_lost(&mut self) {
        self.state.transport_connected = false;
    }

    /// Snapshot of the connection state.
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Uplink configuration.
    pub const fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Active timings.
    pub const fn timing(&self) -> ConnectionTiming {
        self.timing
    }

    /// Access to the network interface.
    pub const fn net(&self) -> &N {
        &self.net
    }

    /// Mutable access to the network interface.
    pub fn net_mut(&mut self) -> &mut N {
        &mut self.net
    }

    async fn open_transport(&mut self) -> Result<(), NetworkError> {
        self.state.transport_connected = false;
        self.net.close().await;
        self.wait(self.timing.transport_settle).await;

        match self
            .net
            .connect(&self.config.endpoint, self.timing.connect_timeout)
            .await
        {
            Ok(()) => {
                self.state.transport_connected = true;
                Ok(())
            }
            Err(_) => {
                // A failed connect is charged its full timeout.
                self.busy += self.timing.connect_timeout;
                Err(NetworkError::TransportUnavailable)
            }
        }
    }

    async fn wait(&mut self, duration: Duration) {
        self.delay.delay(duration).await;
        self.busy += duration;
    }
}
