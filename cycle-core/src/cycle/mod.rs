//! Machine cycle state machine.
//!
//! The controller is polled at a fixed cadence. Each poll samples the sensor
//! and pause inputs, moves production/pause time between two
//! [`TimerAccumulator`]s, drives the indicator lamp and buzzer, and closes the
//! cycle once the sensor drops. A closed cycle whose total exceeds the
//! configured threshold is handed to a [`ReportSink`] exactly once; shorter
//! cycles are discarded. Polling never blocks: the transition beep is armed
//! with a deadline and released by a later poll.

use core::{fmt, time::Duration};

use crate::telemetry::{MachineCode, TelemetryRecord};
use crate::timing::{TimerAccumulator, Timestamp, whole_seconds};

/// Minimum cycle length (seconds) that produces a report.
pub const DEFAULT_THRESHOLD_SECS: u32 = 5;

/// Lamp toggle period while the machine is paused.
pub const DEFAULT_BLINK_PERIOD: Duration = Duration::from_millis(300);

/// Length of the transition beep.
pub const DEFAULT_BEEP_DURATION: Duration = Duration::from_millis(100);

/// Cycle phase tracked between polls.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum CycleState {
    #[default]
    Inactive,
    Producing,
    Paused,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CycleState::Inactive => "inactive",
            CycleState::Producing => "producing",
            CycleState::Paused => "paused",
        })
    }
}

/// Colors of the two-channel status lamp.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IndicatorColor {
    /// Red channel: machine stopped.
    Stopped,
    /// Green channel: machine producing.
    Running,
}

impl IndicatorColor {
    const fn toggled(self) -> Self {
        match self {
            IndicatorColor::Stopped => IndicatorColor::Running,
            IndicatorColor::Running => IndicatorColor::Stopped,
        }
    }
}

/// Digital inputs sampled on every poll.
pub trait MachineInputs {
    /// Returns `true` while the machine sensor reports activity.
    fn sensor_active(&mut self) -> bool;

    /// Returns `true` while the operator holds the pause request.
    fn pause_requested(&mut self) -> bool;
}

/// Two-color status lamp.
pub trait Indicator {
    /// Lights the requested color and extinguishes the other.
    fn show(&mut self, color: IndicatorColor);
}

/// Audible transducer.
pub trait Buzzer {
    /// Switches the buzzer on or off.
    fn set_active(&mut self, active: bool);
}

/// Destination for finished cycle records.
///
/// Implementations must return promptly; the firmware queues the record for
/// a separate network task while the emulator transmits inline.
pub trait ReportSink {
    /// Sink-specific failure.
    type Error;

    /// Accepts one record for delivery.
    fn submit(&mut self, record: TelemetryRecord) -> Result<(), Self::Error>;
}

/// Tunables for a [`CycleController`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CycleConfig {
    pub code: MachineCode,
    pub threshold_secs: u32,
    pub blink_period: Duration,
    pub beep_duration: Duration,
}

impl CycleConfig {
    /// Default timings for the given machine code.
    #[must_use]
    pub const fn new(code: MachineCode) -> Self {
        Self {
            code,
            threshold_secs: DEFAULT_THRESHOLD_SECS,
            blink_period: DEFAULT_BLINK_PERIOD,
            beep_duration: DEFAULT_BEEP_DURATION,
        }
    }

    /// Overrides the reporting threshold.
    #[must_use]
    pub fn with_threshold_secs(mut self, threshold_secs: u32) -> Self {
        self.threshold_secs = threshold_secs;
        self
    }
}

/// What happened to a cycle when the sensor dropped.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReportDisposition {
    /// Record handed to the sink.
    Submitted,
    /// Total did not exceed the threshold; nothing was sent.
    BelowThreshold,
    /// Sink refused the record; it is lost.
    SinkRejected,
}

/// Totals of a closed cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CycleReport {
    pub production_seconds: u32,
    pub pause_seconds: u32,
    pub total_seconds: u32,
    pub disposition: ReportDisposition,
}

/// Result of one [`CycleController::poll`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PollOutcome {
    /// Sensor inactive and no cycle was open.
    Idle,
    Producing,
    Paused,
    /// Sensor dropped and the open cycle was closed and reset.
    CycleClosed(CycleReport),
}

/// Drives the cycle state machine against its I/O collaborators.
pub struct CycleController<I, L, B> {
    config: CycleConfig,
    inputs: I,
    indicator: L,
    buzzer: B,
    state: CycleState,
    production: TimerAccumulator,
    pause: TimerAccumulator,
    beep_latched: bool,
    beep_deadline: Option<Timestamp>,
    lamp: IndicatorColor,
    last_blink: Option<Timestamp>,
}

impl<I, L, B> CycleController<I, L, B>
where
    I: MachineInputs,
    L: Indicator,
    B: Buzzer,
{
    /// Creates a controller in the [`CycleState::Inactive`] state.
    pub const fn with_components(config: CycleConfig, inputs: I, indicator: L, buzzer: B) -> Self {
        Self {
            config,
            inputs,
            indicator,
            buzzer,
            state: CycleState::Inactive,
            production: TimerAccumulator::new(),
            pause: TimerAccumulator::new(),
            beep_latched: false,
            beep_deadline: None,
            lamp: IndicatorColor::Stopped,
            last_blink: None,
        }
    }

    /// Samples the inputs and advances the state machine by one tick.
    pub fn poll<S: ReportSink>(&mut self, now: Timestamp, sink: &mut S) -> PollOutcome {
        self.service_beep(now);

        if !self.inputs.sensor_active() {
            return self.close_cycle(now, sink);
        }

        if self.inputs.pause_requested() {
            self.production.pause(now);
            self.pause.start(now);
            if self.state != CycleState::Paused {
                self.last_blink = None;
            }
            self.blink(now);
            self.state = CycleState::Paused;
            return PollOutcome::Paused;
        }

        self.pause.pause(now);
        self.production.start(now);
        self.show(IndicatorColor::Running);

        if !self.beep_latched {
            self.beep_latched = true;
            self.buzzer.set_active(true);
            self.beep_deadline = Some(now + self.config.beep_duration);
        }

        self.state = CycleState::Producing;
        PollOutcome::Producing
    }

    /// Current cycle phase.
    pub const fn state(&self) -> CycleState {
        self.state
    }

    /// Production time accrued in the open cycle.
    pub fn production_elapsed(&self, now: Timestamp) -> Duration {
        self.production.elapsed(now)
    }

    /// Pause time accrued in the open cycle.
    pub fn pause_elapsed(&self, now: Timestamp) -> Duration {
        self.pause.elapsed(now)
    }

    /// Active configuration.
    pub const fn config(&self) -> &CycleConfig {
        &self.config
    }

    /// Mutable access to the input collaborator.
    pub fn inputs_mut(&mut self) -> &mut I {
        &mut self.inputs
    }

    /// Access to the lamp collaborator.
    pub const fn indicator(&self) -> &L {
        &self.indicator
    }

    /// Access to the buzzer collaborator.
    pub const fn buzzer(&self) -> &B {
        &self.buzzer
    }

    fn close_cycle<S: ReportSink>(&mut self, now: Timestamp, sink: &mut S) -> PollOutcome {
        self.production.pause(now);
        self.pause.pause(now);

        let production_seconds = whole_seconds(self.production.elapsed(now));
        let pause_seconds = whole_seconds(self.pause.elapsed(now));
        let was_open = self.state != CycleState::Inactive;

        let outcome = if was_open {
            let record =
                TelemetryRecord::cycle(self.config.code.clone(), production_seconds, pause_seconds);
            let total_seconds = record.total_seconds;
            let disposition = if total_seconds > self.config.threshold_secs {
                match sink.submit(record) {
                    Ok(()) => ReportDisposition::Submitted,
                    Err(_) => ReportDisposition::SinkRejected,
                }
            } else {
                ReportDisposition::BelowThreshold
            };

            PollOutcome::CycleClosed(CycleReport {
                production_seconds,
                pause_seconds,
                total_seconds,
                disposition,
            })
        } else {
            PollOutcome::Idle
        };

        self.production.reset();
        self.pause.reset();
        self.beep_latched = false;
        self.state = CycleState::Inactive;
        self.show(IndicatorColor::Stopped);

        outcome
    }

    fn show(&mut self, color: IndicatorColor) {
        self.lamp = color;
        self.indicator.show(color);
    }

    // Toggles away from whatever the lamp shows, so entering a pause is visible at once.
    fn blink(&mut self, now: Timestamp) {
        let due = self.last_blink.is_none_or(|last| {
            now.saturating_duration_since(last) >= self.config.blink_period
        });

        if due {
            self.last_blink = Some(now);
            self.show(self.lamp.toggled());
        }
    }

    fn service_beep(&mut self, now: Timestamp) {
        if let Some(deadline) = self.beep_deadline {
            if now >= deadline {
                self.buzzer.set_active(false);
                self.beep_deadline = None;
            }
        }
    }
}
