use cycle_core::network::{ConnectionManager, NetworkConfig, TelemetryReporter};
use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Timer};

use super::FirmwareModem;
use crate::config::WIRE_FORMAT;
use crate::status;
use crate::telemetry::{self, ReportReceiver};
use crate::timing::{EmbassyDelay, now, to_embassy};

const MODEM_RETRY: Duration = Duration::from_secs(1);

#[embassy_executor::task]
pub async fn run(
    mut modem: FirmwareModem,
    config: NetworkConfig,
    records: ReportReceiver<'static>,
) -> ! {
    while let Err(err) = modem.initialize().await {
        telemetry::log_modem_error("init", err);
        Timer::after(MODEM_RETRY).await;
    }

    let connection = ConnectionManager::new(modem, EmbassyDelay, config);
    let maintain_every = to_embassy(connection.timing().maintain_interval);
    let mut reporter = TelemetryReporter::new(connection, WIRE_FORMAT);

    loop {
        match select(records.receive(), Timer::after(maintain_every)).await {
            Either::First(record) => match reporter.send(&record).await {
                Ok(delivery) => {
                    status::record_delivered();
                    telemetry::log_delivered(delivery);
                }
                Err(err) => {
                    status::record_lost();
                    telemetry::log_send_failed(err);
                }
            },
            Either::Second(()) => {
                telemetry::log_maintain(reporter.maintain(now()).await);
            }
        }

        let state = reporter.state();
        if status::record_connection(state) {
            telemetry::log_connection_change(state.link_connected, state.transport_connected);
        }
    }
}
