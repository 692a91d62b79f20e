use super::{
    ConnectionManager, ConnectionState, Delay, Link, MaintainOutcome, NetworkError, Transport,
};
use crate::telemetry::{TelemetryRecord, WireFormat};
use crate::timing::Timestamp;

/// Diagnostics for a delivered record.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Delivery {
    /// Write attempts made, including the retry.
    pub attempts: u8,
    /// Bytes written on the successful attempt.
    pub bytes: usize,
}

/// Encodes cycle records and writes them over a [`ConnectionManager`].
///
/// Records are sent at most twice: a short write triggers one forced
/// reconnect and a single resend. Anything still undelivered after that is
/// reported to the caller and dropped.
pub struct TelemetryReporter<N, D> {
    connection: ConnectionManager<N, D>,
    format: WireFormat,
}

impl<N, D> TelemetryReporter<N, D>
where
    N: Link + Transport,
    D: Delay,
{
    pub const fn new(connection: ConnectionManager<N, D>, format: WireFormat) -> Self {
        Self { connection, format }
    }

    pub const fn format(&self) -> WireFormat {
        self.format
    }

    pub const fn connection(&self) -> &ConnectionManager<N, D> {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut ConnectionManager<N, D> {
        &mut self.connection
    }

    pub const fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Runs a rate-limited health pass on the underlying connection.
    pub async fn maintain(&mut self, now: Timestamp) -> MaintainOutcome {
        self.connection.maintain(now).await
    }

    /// Delivers one record.
    ///
    /// Nothing is written unless both layers are up first.
    pub async fn send(&mut self, record: &TelemetryRecord) -> Result<Delivery, NetworkError> {
        self.connection.ensure_link_connected().await?;
        self.connection.ensure_transport_connected().await?;

        let line = record.encode(self.format)?;
        let bytes = line.as_bytes();
        let expected = bytes.len();

        let written = self.connection.write(bytes).await;
        if written == expected {
            return Ok(Delivery {
                attempts: 1,
                bytes: written,
            });
        }

        self.connection.mark_transport_lost();
        self.connection.reconnect_transport().await?;

        let written = self.connection.write(bytes).await;
        if written == expected {
            Ok(Delivery {
                attempts: 2,
                bytes: written,
            })
        } else {
            self.connection.mark_transport_lost();
            Err(NetworkError::PartialWrite { written, expected })
        }
    }
}
