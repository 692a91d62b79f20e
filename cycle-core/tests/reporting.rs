use core::cell::Cell;
use core::time::Duration;
use std::collections::VecDeque;
use std::rc::Rc;

use cycle_core::network::{
    ConnectionManager, ConnectionTiming, Delay, Endpoint, Link, LinkCredentials, MaintainOutcome,
    NetworkConfig, NetworkError, TelemetryReporter, Transport,
};
use cycle_core::telemetry::{TelemetryRecord, WireFormat, machine_code};
use cycle_core::timing::Timestamp;
use embassy_futures::block_on;

type Clock = Rc<Cell<u64>>;

#[derive(Default)]
struct Radio {
    associated: bool,
    /// Association completes after this many `is_associated` checks; `None` never completes.
    associates_after: Option<usize>,
    open: bool,
    connect_fails: bool,
    /// Byte counts returned by successive writes; the full length once empty.
    short_writes: VecDeque<usize>,
    associate_requests: usize,
    status_checks: usize,
    closes: usize,
    connects: usize,
    writes: Vec<Vec<u8>>,
}

impl Link for Radio {
    type Error = ();

    async fn is_associated(&mut self) -> bool {
        if !self.associated {
            if let Some(remaining) = self.associates_after.as_mut() {
                if *remaining == 0 {
                    self.associated = true;
                } else {
                    *remaining -= 1;
                }
            }
        }
        self.associated
    }

    async fn associate(&mut self, _credentials: &LinkCredentials) -> Result<(), ()> {
        self.associate_requests += 1;
        Ok(())
    }
}

impl Transport for Radio {
    type Error = ();

    async fn is_open(&mut self) -> bool {
        self.status_checks += 1;
        self.open
    }

    async fn close(&mut self) {
        self.closes += 1;
        self.open = false;
    }

    async fn connect(&mut self, _endpoint: &Endpoint, _timeout: Duration) -> Result<(), ()> {
        self.connects += 1;
        if self.connect_fails {
            return Err(());
        }
        self.open = true;
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<usize, ()> {
        self.writes.push(bytes.to_vec());
        Ok(self.short_writes.pop_front().unwrap_or(bytes.len()))
    }
}

struct SimDelay {
    clock: Clock,
}

impl Delay for SimDelay {
    async fn delay(&mut self, duration: Duration) {
        self.clock.set(self.clock.get() + millis(duration));
    }
}

fn config() -> NetworkConfig {
    NetworkConfig {
        credentials: LinkCredentials::new("plant-floor", "hunter22").unwrap(),
        endpoint: Endpoint::new("10.48.0.113", 5050).unwrap(),
    }
}

fn manager(radio: Radio) -> (ConnectionManager<Radio, SimDelay>, Clock) {
    let clock = Clock::default();
    let delay = SimDelay {
        clock: clock.clone(),
    };
    (ConnectionManager::new(radio, delay, config()), clock)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap()
}

fn connected_radio() -> Radio {
    Radio {
        associated: true,
        open: true,
        ..Radio::default()
    }
}

fn record() -> TelemetryRecord {
    TelemetryRecord::cycle(machine_code("TKC110 002 002").unwrap(), 7, 3)
}

#[test]
fn open_transport_is_left_alone() {
    let (mut manager, clock) = manager(connected_radio());

    for _ in 0..5 {
        assert_eq!(block_on(manager.ensure_transport_connected()), Ok(()));
    }

    assert_eq!(manager.net().closes, 0);
    assert_eq!(manager.net().connects, 0);
    assert_eq!(clock.get(), 0);
    assert!(manager.state().transport_connected);
}

#[test]
fn closed_transport_is_torn_down_then_reconnected() {
    let (mut manager, clock) = manager(Radio {
        associated: true,
        ..Radio::default()
    });

    assert_eq!(block_on(manager.ensure_transport_connected()), Ok(()));

    assert_eq!(manager.net().closes, 1);
    assert_eq!(manager.net().connects, 1);
    assert_eq!(clock.get(), millis(ConnectionTiming::DEFAULT.transport_settle));
}

#[test]
fn failed_connect_reports_transport_unavailable() {
    let (mut manager, _clock) = manager(Radio {
        associated: true,
        connect_fails: true,
        ..Radio::default()
    });

    assert_eq!(
        block_on(manager.ensure_transport_connected()),
        Err(NetworkError::TransportUnavailable)
    );
    assert!(!manager.state().transport_connected);
}

#[test]
fn link_recovers_inside_wait_window() {
    let (mut manager, clock) = manager(Radio {
        associates_after: Some(4),
        ..Radio::default()
    });

    assert_eq!(block_on(manager.ensure_link_connected()), Ok(()));
    assert_eq!(manager.net().associate_requests, 1);
    assert!(manager.state().link_connected);
    assert!(clock.get() < millis(ConnectionTiming::DEFAULT.link_wait));
}

#[test]
fn short_write_is_retried_once_over_fresh_transport() {
    let (manager, _clock) = manager(Radio {
        short_writes: VecDeque::from([4]),
        ..connected_radio()
    });
    let mut reporter = TelemetryReporter::new(manager, WireFormat::Dual);

    let delivery = block_on(reporter.send(&record())).unwrap();

    let expected = b"TKC110 002 002;7;3;10;1\n";
    assert_eq!(delivery.attempts, 2);
    assert_eq!(delivery.bytes, expected.len());

    let radio = reporter.connection().net();
    assert_eq!(radio.writes.len(), 2);
    assert!(radio.writes.iter().all(|line| line.as_slice() == expected));
    assert_eq!(radio.closes, 1);
    assert_eq!(radio.connects, 1);
}

#[test]
fn second_short_write_is_reported_and_dropped() {
    let (manager, _clock) = manager(Radio {
        short_writes: VecDeque::from([0, 5]),
        ..connected_radio()
    });
    let mut reporter = TelemetryReporter::new(manager, WireFormat::Single);

    let result = block_on(reporter.send(&record()));

    assert_eq!(
        result,
        Err(NetworkError::PartialWrite {
            written: 5,
            expected: "TKC110 002 002;10;1\n".len(),
        })
    );
    assert_eq!(reporter.connection().net().writes.len(), 2);
    assert!(!reporter.state().transport_connected);
}

#[test]
fn failed_reconnect_after_short_write_stops_retrying() {
    let (manager, _clock) = manager(Radio {
        short_writes: VecDeque::from([1]),
        connect_fails: true,
        ..connected_radio()
    });
    let mut reporter = TelemetryReporter::new(manager, WireFormat::Dual);

    assert_eq!(
        block_on(reporter.send(&record())),
        Err(NetworkError::TransportUnavailable)
    );
    assert_eq!(reporter.connection().net().writes.len(), 1);
}

#[test]
fn missing_link_aborts_before_any_write() {
    let (manager, clock) = manager(Radio::default());
    let mut reporter = TelemetryReporter::new(manager, WireFormat::Dual);

    assert_eq!(
        block_on(reporter.send(&record())),
        Err(NetworkError::LinkUnavailable)
    );

    let radio = reporter.connection().net();
    assert!(radio.writes.is_empty());
    assert_eq!(radio.connects, 0);
    assert_eq!(radio.associate_requests, 1);
    assert_eq!(clock.get(), millis(ConnectionTiming::DEFAULT.link_wait));
}

#[test]
fn maintain_is_rate_limited() {
    let (mut manager, _clock) = manager(connected_radio());

    assert_eq!(
        block_on(manager.maintain(Timestamp::from_millis(10_000))),
        MaintainOutcome::Healthy
    );
    assert_eq!(
        block_on(manager.maintain(Timestamp::from_millis(11_500))),
        MaintainOutcome::Deferred
    );
    assert_eq!(manager.net().status_checks, 1);

    assert_eq!(
        block_on(manager.maintain(Timestamp::from_millis(12_000))),
        MaintainOutcome::Healthy
    );
    assert_eq!(manager.net().status_checks, 2);
    assert_eq!(
        manager.state().last_reconnect_attempt,
        Some(Timestamp::from_millis(12_000))
    );
}

#[test]
fn maintain_restores_dropped_transport() {
    let (mut manager, _clock) = manager(connected_radio());
    manager.net_mut().open = false;

    assert_eq!(
        block_on(manager.maintain(Timestamp::from_millis(0))),
        MaintainOutcome::Healthy
    );
    assert_eq!(manager.net().connects, 1);
    assert!(manager.state().transport_connected);
}

#[test]
fn maintain_reports_lost_link() {
    let (mut manager, _clock) = manager(Radio::default());

    assert_eq!(
        block_on(manager.maintain(Timestamp::from_millis(0))),
        MaintainOutcome::Degraded(NetworkError::LinkUnavailable)
    );
    assert!(!manager.state().link_connected);
    assert!(!manager.state().transport_connected);
}

#[test]
fn maintain_defers_after_a_pass_that_waited_out_the_link() {
    let (mut manager, clock) = manager(Radio::default());
    let timing = ConnectionTiming::DEFAULT;

    assert_eq!(
        block_on(manager.maintain(Timestamp::from_millis(clock.get()))),
        MaintainOutcome::Degraded(NetworkError::LinkUnavailable)
    );
    let finished = clock.get();
    assert_eq!(finished, millis(timing.link_wait));

    assert_eq!(
        block_on(manager.maintain(Timestamp::from_millis(finished + 10))),
        MaintainOutcome::Deferred
    );
    assert_eq!(
        block_on(manager.maintain(Timestamp::from_millis(
            finished + millis(timing.maintain_interval) - 10
        ))),
        MaintainOutcome::Deferred
    );
    assert_eq!(manager.net().associate_requests, 1);
    assert_eq!(clock.get(), finished);

    assert_eq!(
        block_on(manager.maintain(Timestamp::from_millis(
            finished + millis(timing.maintain_interval)
        ))),
        MaintainOutcome::Degraded(NetworkError::LinkUnavailable)
    );
    assert_eq!(manager.net().associate_requests, 2);
}

#[test]
fn polling_loop_keeps_running_while_link_is_down() {
    let (mut manager, clock) = manager(Radio::default());
    let tick = 10;
    let mut deferred = 0;
    let mut passes: usize = 0;

    // Simulated poll loop: every tick costs 10 ms plus whatever maintain waited.
    while clock.get() < 60_000 {
        match block_on(manager.maintain(Timestamp::from_millis(clock.get()))) {
            MaintainOutcome::Deferred => deferred += 1,
            MaintainOutcome::Degraded(NetworkError::LinkUnavailable) => passes += 1,
            other => panic!("unexpected outcome {other:?}"),
        }
        clock.set(clock.get() + tick);
    }

    let timing = ConnectionTiming::DEFAULT;
    let cycle = millis(timing.link_wait) + millis(timing.maintain_interval);
    assert!(deferred > 0);
    assert!(u64::try_from(passes).unwrap() <= 60_000 / cycle + 1);
    assert_eq!(manager.net().associate_requests, passes);
}

#[test]
fn zero_link_poll_still_ends_the_wait() {
    let clock = Clock::default();
    let timing = ConnectionTiming {
        link_poll: Duration::ZERO,
        link_wait: Duration::from_millis(20),
        ..ConnectionTiming::DEFAULT
    };
    let mut manager = ConnectionManager::with_timing(
        Radio::default(),
        SimDelay {
            clock: clock.clone(),
        },
        config(),
        timing,
    );

    assert_eq!(
        block_on(manager.ensure_link_connected()),
        Err(NetworkError::LinkUnavailable)
    );
    assert_eq!(clock.get(), 20);
}
