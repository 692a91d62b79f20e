//! Report queue between the cycle task and the network task, plus the
//! defmt / host console hooks used to narrate both.

use cycle_core::cycle::{CycleReport, CycleState, ReportDisposition, ReportSink};
use cycle_core::network::{Delivery, MaintainOutcome, NetworkError};
use cycle_core::telemetry::TelemetryRecord;
use embassy_sync::channel::{Channel, Receiver, Sender, TrySendError};

#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;

use crate::config::REPORT_QUEUE_DEPTH;
use crate::modem::ModemError;
use crate::status::StatusSnapshot;

#[cfg(target_os = "none")]
type ReportMutex = ThreadModeRawMutex;
#[cfg(not(target_os = "none"))]
type ReportMutex = NoopRawMutex;

/// Bounded queue of finished cycles awaiting delivery.
pub type ReportQueue = Channel<ReportMutex, TelemetryRecord, REPORT_QUEUE_DEPTH>;

pub type ReportSender<'a> = Sender<'a, ReportMutex, TelemetryRecord, REPORT_QUEUE_DEPTH>;

pub type ReportReceiver<'a> = Receiver<'a, ReportMutex, TelemetryRecord, REPORT_QUEUE_DEPTH>;

/// [`ReportSink`] that hands records to the network task without waiting.
pub struct ChannelSink<'a> {
    sender: ReportSender<'a>,
}

impl<'a> ChannelSink<'a> {
    pub fn new(sender: ReportSender<'a>) -> Self {
        Self { sender }
    }
}

impl ReportSink for ChannelSink<'_> {
    type Error = TrySendError<TelemetryRecord>;

    fn submit(&mut self, record: TelemetryRecord) -> Result<(), Self::Error> {
        self.sender.try_send(record)
    }
}

const fn state_label(state: CycleState) -> &'static str {
    match state {
        CycleState::Inactive => "inactive",
        CycleState::Producing => "producing",
        CycleState::Paused => "paused",
    }
}

const fn disposition_label(disposition: ReportDisposition) -> &'static str {
    match disposition {
        ReportDisposition::Submitted => "queued",
        ReportDisposition::BelowThreshold => "below threshold",
        ReportDisposition::SinkRejected => "dropped (queue full)",
    }
}

const fn error_label(error: NetworkError) -> &'static str {
    match error {
        NetworkError::LinkUnavailable => "link unavailable",
        NetworkError::TransportUnavailable => "transport unavailable",
        NetworkError::PartialWrite { .. } => "partial write",
        NetworkError::Encode(_) => "encode failed",
    }
}

#[cfg(target_os = "none")]
pub fn log_state_change(from: CycleState, to: CycleState) {
    defmt::info!("cycle: {} -> {}", state_label(from), state_label(to));
}

#[cfg(not(target_os = "none"))]
pub fn log_state_change(from: CycleState, to: CycleState) {
    println!("cycle: {} -> {}", state_label(from), state_label(to));
}

#[cfg(target_os = "none")]
pub fn log_cycle_closed(report: &CycleReport, status: StatusSnapshot) {
    defmt::info!(
        "cycle: closed production={}s pause={}s total={}s {} link={} transport={}",
        report.production_seconds,
        report.pause_seconds,
        report.total_seconds,
        disposition_label(report.disposition),
        status.link_up,
        status.transport_up
    );
    if report.disposition == ReportDisposition::SinkRejected {
        defmt::warn!("cycle: report queue full, record lost");
    }
}

#[cfg(not(target_os = "none"))]
pub fn log_cycle_closed(report: &CycleReport, status: StatusSnapshot) {
    println!(
        "cycle: closed production={}s pause={}s total={}s {} link={} transport={}",
        report.production_seconds,
        report.pause_seconds,
        report.total_seconds,
        disposition_label(report.disposition),
        status.link_up,
        status.transport_up
    );
    if report.disposition == ReportDisposition::SinkRejected {
        println!("cycle: report queue full, record lost");
    }
}

#[cfg(target_os = "none")]
pub fn log_delivered(delivery: Delivery) {
    if delivery.attempts > 1 {
        defmt::warn!(
            "net: record sent after reconnect ({} bytes, {} attempts)",
            delivery.bytes,
            delivery.attempts
        );
    } else {
        defmt::info!("net: record sent ({} bytes)", delivery.bytes);
    }
}

#[cfg(not(target_os = "none"))]
pub fn log_delivered(delivery: Delivery) {
    if delivery.attempts > 1 {
        println!(
            "net: record sent after reconnect ({} bytes, {} attempts)",
            delivery.bytes, delivery.attempts
        );
    } else {
        println!("net: record sent ({} bytes)", delivery.bytes);
    }
}

#[cfg(target_os = "none")]
pub fn log_send_failed(error: NetworkError) {
    if let NetworkError::PartialWrite { written, expected } = error {
        defmt::error!("net: record lost, wrote {} of {} bytes", written, expected);
    } else {
        defmt::error!("net: record lost, {}", error_label(error));
    }
}

#[cfg(not(target_os = "none"))]
pub fn log_send_failed(error: NetworkError) {
    if let NetworkError::PartialWrite { written, expected } = error {
        println!("net: record lost, wrote {written} of {expected} bytes");
    } else {
        println!("net: record lost, {}", error_label(error));
    }
}

/// Logs maintenance results; quiet while healthy.
#[cfg(target_os = "none")]
pub fn log_maintain(outcome: MaintainOutcome) {
    if let MaintainOutcome::Degraded(error) = outcome {
        defmt::warn!("net: maintenance failed, {}", error_label(error));
    }
}

#[cfg(not(target_os = "none"))]
pub fn log_maintain(outcome: MaintainOutcome) {
    if let MaintainOutcome::Degraded(error) = outcome {
        println!("net: maintenance failed, {}", error_label(error));
    }
}

#[cfg(target_os = "none")]
pub fn log_connection_change(link_up: bool, transport_up: bool) {
    defmt::info!("net: link={} transport={}", link_up, transport_up);
}

#[cfg(not(target_os = "none"))]
pub fn log_connection_change(link_up: bool, transport_up: bool) {
    println!("net: link={link_up} transport={transport_up}");
}

#[cfg(target_os = "none")]
pub fn log_modem_error(context: &'static str, error: ModemError) {
    defmt::error!("modem: {} failed ({})", context, error.label());
}

#[cfg(not(target_os = "none"))]
pub fn log_modem_error(context: &'static str, error: ModemError) {
    println!("modem: {context} failed ({})", error.label());
}

#[cfg(test)]
mod tests {
    use super::*;
    use cycle_core::telemetry::machine_code;

    fn record(production: u32) -> TelemetryRecord {
        TelemetryRecord::cycle(machine_code("TKC110 002 002").unwrap(), production, 0)
    }

    #[test]
    fn full_queue_rejects_without_blocking() {
        let queue = ReportQueue::new();
        let mut sink = ChannelSink::new(queue.sender());

        for seconds in 0..REPORT_QUEUE_DEPTH {
            let seconds = u32::try_from(seconds).unwrap();
            assert!(sink.submit(record(seconds)).is_ok());
        }
        assert!(sink.submit(record(99)).is_err());

        let receiver = queue.receiver();
        assert_eq!(receiver.try_receive().unwrap().production_seconds, 0);
        assert!(sink.submit(record(100)).is_ok());
    }

    #[test]
    fn labels_cover_dispositions() {
        assert_eq!(
            disposition_label(ReportDisposition::BelowThreshold),
            "below threshold"
        );
        assert_eq!(state_label(CycleState::Paused), "paused");
        assert_eq!(
            error_label(NetworkError::PartialWrite {
                written: 1,
                expected: 2
            }),
            "partial write"
        );
    }
}
