use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant as HostInstant};

use crossterm::cursor::MoveToColumn;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::Print;
use crossterm::terminal::{self, Clear, ClearType};
use crossterm::queue;
use cycle_core::cycle::{
    Buzzer, CycleConfig, CycleController, CycleReport, CycleState, Indicator, IndicatorColor,
    MachineInputs, PollOutcome, ReportDisposition, ReportSink,
};
use cycle_core::network::{
    ConnectionManager, ConnectionTiming, MaintainOutcome, NetworkConfig, NetworkError,
    TelemetryReporter,
};
use cycle_core::telemetry::{MachineCode, TelemetryRecord, WireFormat};
use cycle_core::timing::Timestamp;
use embassy_futures::block_on;

use crate::net::{HostDelay, HostNet};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub const KEY_HELP: &str = "keys: [s] sensor on/off  [p] pause hold  [l] radio on/off  [q] quit";

/// Everything needed to start a bench session.
pub struct SessionOptions {
    pub network: NetworkConfig,
    pub code: MachineCode,
    pub threshold_secs: u32,
    pub format: WireFormat,
    pub timing: ConnectionTiming,
    pub transcript: Option<PathBuf>,
}

/// Operator actions mapped from the keyboard.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Key {
    ToggleSensor,
    TogglePause,
    ToggleRadio,
    Quit,
}

impl Key {
    pub fn from_event(event: KeyEvent) -> Option<Self> {
        if event.kind != KeyEventKind::Press {
            return None;
        }
        match event.code {
            KeyCode::Char('c') if event.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(Self::Quit)
            }
            KeyCode::Char('s' | 'S') => Some(Self::ToggleSensor),
            KeyCode::Char('p' | 'P') => Some(Self::TogglePause),
            KeyCode::Char('l' | 'L') => Some(Self::ToggleRadio),
            KeyCode::Char('q' | 'Q') | KeyCode::Esc => Some(Self::Quit),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Key::ToggleSensor => "sensor",
            Key::TogglePause => "pause",
            Key::ToggleRadio => "radio",
            Key::Quit => "quit",
        }
    }
}

#[derive(Default)]
pub struct KeyPanel {
    sensor: bool,
    pause: bool,
}

impl MachineInputs for KeyPanel {
    fn sensor_active(&mut self) -> bool {
        self.sensor
    }

    fn pause_requested(&mut self) -> bool {
        self.pause
    }
}

#[derive(Default)]
pub struct ConsoleLamp {
    color: Option<IndicatorColor>,
}

impl Indicator for ConsoleLamp {
    fn show(&mut self, color: IndicatorColor) {
        self.color = Some(color);
    }
}

#[derive(Default)]
pub struct ConsoleBuzzer {
    active: bool,
    beeps: u32,
}

impl Buzzer for ConsoleBuzzer {
    fn set_active(&mut self, active: bool) {
        if active && !self.active {
            self.beeps += 1;
        }
        self.active = active;
    }
}

/// Sends records inline, blocking the poll loop for the duration of the send.
pub struct HostSink {
    reporter: TelemetryReporter<HostNet, HostDelay>,
    delivered: u32,
    lost: u32,
    last_error: Option<NetworkError>,
}

impl ReportSink for HostSink {
    type Error = NetworkError;

    fn submit(&mut self, record: TelemetryRecord) -> Result<(), NetworkError> {
        match block_on(self.reporter.send(&record)) {
            Ok(_) => {
                self.delivered += 1;
                self.last_error = None;
                Ok(())
            }
            Err(err) => {
                self.lost += 1;
                self.last_error = Some(err);
                Err(err)
            }
        }
    }
}

pub struct Session {
    controller: CycleController<KeyPanel, ConsoleLamp, ConsoleBuzzer>,
    sink: HostSink,
    transcript: Option<TranscriptLogger>,
    last_state: CycleState,
    link_up: bool,
    transport_up: bool,
    notices: Vec<String>,
}

impl Session {
    pub fn new(options: SessionOptions) -> io::Result<Self> {
        let transcript = options
            .transcript
            .as_deref()
            .map(TranscriptLogger::new)
            .transpose()?;

        let config = CycleConfig::new(options.code).with_threshold_secs(options.threshold_secs);
        let controller = CycleController::with_components(
            config,
            KeyPanel::default(),
            ConsoleLamp::default(),
            ConsoleBuzzer::default(),
        );

        let connection =
            ConnectionManager::with_timing(HostNet::new(), HostDelay, options.network, options.timing);
        let sink = HostSink {
            reporter: TelemetryReporter::new(connection, options.format),
            delivered: 0,
            lost: 0,
            last_error: None,
        };

        Ok(Self {
            controller,
            sink,
            transcript,
            last_state: CycleState::Inactive,
            link_up: false,
            transport_up: false,
            notices: Vec::new(),
        })
    }

    /// Applies an operator key; returns `false` when the session should end.
    pub fn handle_key(&mut self, key: Key, now: Timestamp) -> io::Result<bool> {
        self.record(now, TranscriptRole::Operator, key.label())?;

        match key {
            Key::ToggleSensor => {
                let inputs = self.controller.inputs_mut();
                inputs.sensor = !inputs.sensor;
            }
            Key::TogglePause => {
                let inputs = self.controller.inputs_mut();
                inputs.pause = !inputs.pause;
            }
            Key::ToggleRadio => {
                let net = self.sink.reporter.connection_mut().net_mut();
                let enabled = !net.radio_enabled();
                net.set_radio_enabled(enabled);
                let message = if enabled { "radio on" } else { "radio off" };
                self.notice(now, TranscriptRole::Network, message.to_string())?;
            }
            Key::Quit => return Ok(false),
        }

        Ok(true)
    }

    /// One pass of the monitor loop: poll the machine, then service the uplink.
    pub fn tick(&mut self, now: Timestamp) -> io::Result<PollOutcome> {
        let outcome = self.controller.poll(now, &mut self.sink);

        if let PollOutcome::CycleClosed(report) = outcome {
            let message = self.describe_close(&report);
            self.notice(now, TranscriptRole::Monitor, message)?;
        }

        let state = self.controller.state();
        if state != self.last_state {
            let message = format!("state {} -> {}", self.last_state, state);
            self.record(now, TranscriptRole::Monitor, &message)?;
            self.last_state = state;
        }

        if let MaintainOutcome::Degraded(err) = block_on(self.sink.reporter.maintain(now)) {
            self.record(now, TranscriptRole::Network, &format!("maintenance failed: {err}"))?;
        }
        self.track_connection(now)?;

        Ok(outcome)
    }

    pub fn status_line(&self, now: Timestamp) -> String {
        let lamp = match self.controller.indicator().color {
            Some(IndicatorColor::Running) => "green",
            Some(IndicatorColor::Stopped) => "red",
            None => "off",
        };
        let buzzer = if self.controller.buzzer().active {
            "BEEP"
        } else {
            "-"
        };
        let radio = if self.sink.reporter.connection().net().radio_enabled() {
            "on"
        } else {
            "off"
        };

        format!(
            "{state:<9} prod={prod:>4}s pause={pause:>4}s lamp={lamp:<5} buzzer={buzzer:<4} radio={radio:<3} link={link} tcp={tcp} sent={sent} lost={lost}",
            state = self.controller.state().to_string(),
            prod = self.controller.production_elapsed(now).as_secs(),
            pause = self.controller.pause_elapsed(now).as_secs(),
            link = up_down(self.link_up),
            tcp = up_down(self.transport_up),
            sent = self.sink.delivered,
            lost = self.sink.lost,
        )
    }

    /// Notices produced since the last call, oldest first.
    pub fn take_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notices)
    }

    /// Runs the interactive bench until the operator quits.
    pub fn run(&mut self) -> io::Result<()> {
        let _raw = RawMode::enable()?;
        let started_at = HostInstant::now();
        let mut stdout = io::stdout();

        queue!(stdout, Print(KEY_HELP), Print("\r\n"))?;
        stdout.flush()?;

        loop {
            if event::poll(POLL_INTERVAL)? {
                if let Event::Key(event) = event::read()? {
                    if let Some(key) = Key::from_event(event) {
                        if !self.handle_key(key, elapsed_since(started_at))? {
                            break;
                        }
                    }
                }
            }

            let now = elapsed_since(started_at);
            self.tick(now)?;

            queue!(stdout, MoveToColumn(0), Clear(ClearType::CurrentLine))?;
            for notice in self.take_notices() {
                queue!(stdout, Print(notice), Print("\r\n"))?;
            }
            queue!(stdout, Print(self.status_line(now)))?;
            stdout.flush()?;
        }

        queue!(stdout, Print("\r\n"))?;
        stdout.flush()
    }

    fn describe_close(&self, report: &CycleReport) -> String {
        let totals = format!(
            "cycle closed production={}s pause={}s total={}s",
            report.production_seconds, report.pause_seconds, report.total_seconds
        );
        match report.disposition {
            ReportDisposition::Submitted => format!("{totals}: reported"),
            ReportDisposition::BelowThreshold => format!(
                "{totals}: not reported (threshold {}s)",
                self.controller.config().threshold_secs
            ),
            ReportDisposition::SinkRejected => match self.sink.last_error {
                Some(err) => format!("{totals}: lost ({err})"),
                None => format!("{totals}: lost"),
            },
        }
    }

    fn track_connection(&mut self, now: Timestamp) -> io::Result<()> {
        let state = self.sink.reporter.state();
        if state.link_connected != self.link_up || state.transport_connected != self.transport_up {
            self.link_up = state.link_connected;
            self.transport_up = state.transport_connected;
            let message = format!(
                "link {} tcp {} ({})",
                up_down(self.link_up),
                up_down(self.transport_up),
                self.sink.reporter.connection().config().endpoint
            );
            self.notice(now, TranscriptRole::Network, message)?;
        }
        Ok(())
    }

    fn notice(&mut self, now: Timestamp, role: TranscriptRole, message: String) -> io::Result<()> {
        self.record(now, role, &message)?;
        self.notices.push(message);
        Ok(())
    }

    fn record(&mut self, now: Timestamp, role: TranscriptRole, line: &str) -> io::Result<()> {
        match self.transcript.as_mut() {
            Some(transcript) => transcript.append_line(now, role, line),
            None => Ok(()),
        }
    }
}

fn up_down(up: bool) -> &'static str {
    if up { "up" } else { "down" }
}

fn elapsed_since(started_at: HostInstant) -> Timestamp {
    let millis = u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX);
    Timestamp::from_millis(millis)
}

struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

struct TranscriptLogger {
    writer: BufWriter<fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        logger.write_header()?;
        Ok(logger)
    }

    fn write_header(&mut self) -> io::Result<()> {
        writeln!(self.writer, "# Cycle monitor emulator transcript")?;
        writeln!(
            self.writer,
            "# Timestamps are milliseconds since session start"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(&mut self, now: Timestamp, role: TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            now.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

#[derive(Clone, Copy)]
enum TranscriptRole {
    Operator,
    Monitor,
    Network,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Operator => "KEY >",
            TranscriptRole::Monitor => "MON <",
            TranscriptRole::Network => "NET <",
        }
    }
}
