//! Glue between Embassy's clock and the core's clock-free timing types.

use embassy_time::Duration;

#[cfg(target_os = "none")]
use cycle_core::network::Delay;
#[cfg(target_os = "none")]
use cycle_core::timing::Timestamp;
#[cfg(target_os = "none")]
use embassy_time::{Instant, Timer};

pub fn to_embassy(duration: core::time::Duration) -> Duration {
    let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
    Duration::from_micros(micros)
}

/// Samples the Embassy monotonic clock.
#[cfg(target_os = "none")]
pub fn now() -> Timestamp {
    Timestamp::from_millis(Instant::now().as_millis())
}

/// [`Delay`] backed by the Embassy timer queue.
#[cfg(target_os = "none")]
pub struct EmbassyDelay;

#[cfg(target_os = "none")]
impl Delay for EmbassyDelay {
    async fn delay(&mut self, duration: core::time::Duration) {
        Timer::after(to_embassy(duration)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_without_losing_precision() {
        let converted = to_embassy(core::time::Duration::from_millis(250));
        assert_eq!(converted.as_millis(), 250);
    }
}
