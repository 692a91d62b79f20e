use cycle_core::cycle::PollOutcome;
use embassy_time::{Duration, Ticker};

use super::FirmwareController;
use crate::status;
use crate::telemetry::{self, ChannelSink};
use crate::timing::now;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[embassy_executor::task]
pub async fn run(mut controller: FirmwareController, mut sink: ChannelSink<'static>) -> ! {
    let mut ticker = Ticker::every(POLL_INTERVAL);
    let mut last_state = controller.state();

    loop {
        if let PollOutcome::CycleClosed(report) = controller.poll(now(), &mut sink) {
            telemetry::log_cycle_closed(&report, status::snapshot());
        }

        let state = controller.state();
        if state != last_state {
            telemetry::log_state_change(last_state, state);
            last_state = state;
        }

        ticker.next().await;
    }
}
