//! ESP-AT Wi-Fi co-processor driver.
//!
//! The module speaks the ESP-AT command set over any `embedded-io-async`
//! byte stream and implements the core [`Link`] and [`Transport`] traits on
//! top of it. Only single-connection TCP client mode is used:
//!
//! * `AT+CWJAP` joins the access point,
//! * `AT+CIPSTATUS` reports association (2/3/4) and an open socket (3),
//! * `AT+CIPSTART` / `AT+CIPCLOSE` manage the socket,
//! * `AT+CIPSEND=<len>` waits for the `>` prompt before the payload is
//!   written and confirms with `SEND OK` or `SEND FAIL`.
//!
//! Replies from the collector arrive as unsolicited `+IPD,<len>:<payload>`
//! frames and are skipped byte for byte.

use core::fmt::Write as _;
use core::time::Duration;

use cycle_core::network::{Endpoint, Link, LinkCredentials, Transport};
use embassy_time::with_timeout;
use embedded_io_async::{Read, ReadReady, Write};
use heapless::String;

use crate::timing::to_embassy;

/// Longest response line kept; longer lines are truncated.
pub const MAX_LINE_LEN: usize = 128;

const MAX_COMMAND_LEN: usize = 192;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Access-point association reported by `AT+CIPSTATUS`.
const STATUS_GOT_IP: u8 = 2;
const STATUS_CONNECTED: u8 = 3;
const STATUS_DISCONNECTED: u8 = 4;

pub type ResponseLine = String<MAX_LINE_LEN>;

/// Modem failures.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ModemError {
    /// UART read or write failed.
    Io,
    /// No final reply before the deadline.
    Timeout,
    /// The modem answered `ERROR` or `FAIL`.
    Rejected,
    /// A command did not fit the command buffer.
    CommandTooLong,
}

impl ModemError {
    pub const fn label(self) -> &'static str {
        match self {
            ModemError::Io => "uart i/o",
            ModemError::Timeout => "timeout",
            ModemError::Rejected => "rejected",
            ModemError::CommandTooLong => "command too long",
        }
    }
}

/// Classified response line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Reply {
    Ok,
    Error,
    Fail,
    SendOk,
    SendFail,
    /// `CIPSTART` on an open socket; the modem follows it with `ERROR`.
    AlreadyConnected,
    /// `STATUS:<n>` from `AT+CIPSTATUS`.
    Status(u8),
    /// `+CIPSTATUS:...` describing an open link.
    LinkEntry,
    /// Intermediate `busy p...` / `busy s...`; the command is still running.
    Busy,
    /// Anything else (echo, `WIFI CONNECTED`, `CONNECT`, `CLOSED`, ...).
    Info,
}

impl Reply {
    /// Returns `true` when the reply terminates a command.
    pub const fn is_final(self) -> bool {
        matches!(
            self,
            Reply::Ok
                | Reply::Error
                | Reply::Fail
                | Reply::SendOk
                | Reply::SendFail
        )
    }
}

pub fn classify(line: &str) -> Reply {
    match line {
        "OK" => Reply::Ok,
        "ERROR" => Reply::Error,
        "FAIL" => Reply::Fail,
        "SEND OK" => Reply::SendOk,
        "SEND FAIL" => Reply::SendFail,
        "ALREADY CONNECTED" => Reply::AlreadyConnected,
        _ => {
            if let Some(status) = line.strip_prefix("STATUS:") {
                status.trim().parse().map_or(Reply::Info, Reply::Status)
            } else if line.starts_with("+CIPSTATUS:") {
                Reply::LinkEntry
            } else if line.starts_with("busy ") {
                Reply::Busy
            } else {
                Reply::Info
            }
        }
    }
}

/// Byte-level events produced by [`ResponseParser`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParserEvent {
    Line(ResponseLine),
    /// `>` prompt from `AT+CIPSEND`.
    Prompt,
}

/// Splits the modem byte stream into lines, prompts and skipped `+IPD` payloads.
#[derive(Default)]
pub struct ResponseParser {
    line: ResponseLine,
    skip: usize,
}

impl ResponseParser {
    pub const fn new() -> Self {
        Self {
            line: String::new(),
            skip: 0,
        }
    }

    pub fn feed(&mut self, byte: u8) -> Option<ParserEvent> {
        if self.skip > 0 {
            self.skip -= 1;
            return None;
        }

        match byte {
            b'\r' => None,
            b' ' if self.line.is_empty() => None,
            b'\n' => {
                if self.line.is_empty() {
                    return None;
                }
                let line = core::mem::take(&mut self.line);
                Some(ParserEvent::Line(line))
            }
            b'>' if self.line.is_empty() => Some(ParserEvent::Prompt),
            b':' if self.line.starts_with("+IPD,") => {
                self.skip = ipd_length(&self.line).unwrap_or(0);
                self.line.clear();
                None
            }
            _ => {
                // Overlong lines are truncated; only their prefix is classified.
                let _ = self.line.push(char::from(byte));
                None
            }
        }
    }
}

fn ipd_length(header: &str) -> Option<usize> {
    // Single-connection mode: `+IPD,<len>`; multi-connection: `+IPD,<id>,<len>`.
    header
        .strip_prefix("+IPD,")?
        .rsplit(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

/// Appends `value` with ESP-AT escaping for quoted parameters.
pub fn push_escaped<const N: usize>(out: &mut String<N>, value: &str) -> Result<(), ModemError> {
    for ch in value.chars() {
        if matches!(ch, '"' | ',' | '\\') {
            out.push('\\').map_err(|_| ModemError::CommandTooLong)?;
        }
        out.push(ch).map_err(|_| ModemError::CommandTooLong)?;
    }
    Ok(())
}

pub fn join_command(credentials: &LinkCredentials) -> Result<String<MAX_COMMAND_LEN>, ModemError> {
    let mut command = String::new();
    command
        .push_str("AT+CWJAP=\"")
        .map_err(|_| ModemError::CommandTooLong)?;
    push_escaped(&mut command, &credentials.ssid)?;
    command
        .push_str("\",\"")
        .map_err(|_| ModemError::CommandTooLong)?;
    push_escaped(&mut command, &credentials.passphrase)?;
    command
        .push('"')
        .map_err(|_| ModemError::CommandTooLong)?;
    Ok(command)
}

pub fn connect_command(endpoint: &Endpoint) -> Result<String<MAX_COMMAND_LEN>, ModemError> {
    let mut command = String::new();
    write!(
        command,
        "AT+CIPSTART=\"TCP\",\"{}\",{}",
        endpoint.host, endpoint.port
    )
    .map_err(|_| ModemError::CommandTooLong)?;
    Ok(command)
}

/// Snapshot decoded from one `AT+CIPSTATUS` exchange.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ModemStatus {
    pub associated: bool,
    pub socket_open: bool,
}

impl ModemStatus {
    fn observe(&mut self, reply: Reply) {
        match reply {
            Reply::Status(code) => {
                self.associated =
                    matches!(code, STATUS_GOT_IP | STATUS_CONNECTED | STATUS_DISCONNECTED);
                self.socket_open = code == STATUS_CONNECTED;
            }
            Reply::LinkEntry => self.socket_open = true,
            _ => {}
        }
    }
}

/// ESP-AT modem on a byte stream.
pub struct AtModem<U> {
    uart: U,
    parser: ResponseParser,
}

impl<U> AtModem<U>
where
    U: Read + ReadReady + Write,
{
    pub const fn new(uart: U) -> Self {
        Self {
            uart,
            parser: ResponseParser::new(),
        }
    }

    /// Puts the modem into single-connection station mode with echo off.
    pub async fn initialize(&mut self) -> Result<(), ModemError> {
        for command in ["AT", "ATE0", "AT+CWMODE=1", "AT+CIPMUX=0"] {
            self.command(command, COMMAND_TIMEOUT).await?;
        }
        Ok(())
    }

    /// Runs `AT+CIPSTATUS`.
    pub async fn status(&mut self) -> Result<ModemStatus, ModemError> {
        self.send_line("AT+CIPSTATUS").await?;

        let mut status = ModemStatus::default();
        let reply = with_timeout(
            to_embassy(COMMAND_TIMEOUT),
            self.read_until_final(Some(&mut status)),
        )
        .await
        .map_err(|_| ModemError::Timeout)??;

        if reply == Reply::Ok {
            Ok(status)
        } else {
            Err(ModemError::Rejected)
        }
    }

    /// Sends `command` and waits for its final reply.
    pub async fn command(&mut self, command: &str, timeout: Duration) -> Result<Reply, ModemError> {
        self.send_line(command).await?;
        let reply = self.final_reply(timeout).await?;
        match reply {
            Reply::Error | Reply::Fail => Err(ModemError::Rejected),
            other => Ok(other),
        }
    }

    async fn final_reply(&mut self, timeout: Duration) -> Result<Reply, ModemError> {
        with_timeout(to_embassy(timeout), self.read_until_final(None))
            .await
            .map_err(|_| ModemError::Timeout)?
    }

    async fn read_until_final(
        &mut self,
        mut status: Option<&mut ModemStatus>,
    ) -> Result<Reply, ModemError> {
        let mut already_connected = false;
        loop {
            let reply = self.next_reply().await?;
            if let Some(status) = status.as_deref_mut() {
                status.observe(reply);
            }
            already_connected |= reply == Reply::AlreadyConnected;
            if reply.is_final() {
                return Ok(if already_connected {
                    Reply::AlreadyConnected
                } else {
                    reply
                });
            }
        }
    }

    async fn wait_for_prompt(&mut self, timeout: Duration) -> Result<(), ModemError> {
        with_timeout(to_embassy(timeout), self.read_until_prompt())
            .await
            .map_err(|_| ModemError::Timeout)?
    }

    async fn read_until_prompt(&mut self) -> Result<(), ModemError> {
        loop {
            match self.next_event().await? {
                ParserEvent::Prompt => return Ok(()),
                ParserEvent::Line(line) => {
                    let reply = classify(&line);
                    if reply.is_final() && reply != Reply::Ok {
                        return Err(ModemError::Rejected);
                    }
                }
            }
        }
    }

    async fn next_reply(&mut self) -> Result<Reply, ModemError> {
        loop {
            if let ParserEvent::Line(line) = self.next_event().await? {
                return Ok(classify(&line));
            }
        }
    }

    async fn next_event(&mut self) -> Result<ParserEvent, ModemError> {
        let mut byte = [0u8; 1];
        loop {
            let count = self.uart.read(&mut byte).await.map_err(|_| ModemError::Io)?;
            if count == 0 {
                continue;
            }
            if let Some(event) = self.parser.feed(byte[0]) {
                return Ok(event);
            }
        }
    }

    async fn send_line(&mut self, command: &str) -> Result<(), ModemError> {
        self.discard_pending().await?;
        self.write_all(command.as_bytes()).await?;
        self.write_all(b"\r\n").await?;
        self.uart.flush().await.map_err(|_| ModemError::Io)
    }

    /// Drops output left over from an exchange that timed out, so the next
    /// command only sees its own replies.
    async fn discard_pending(&mut self) -> Result<(), ModemError> {
        let mut scratch = [0u8; 32];
        while self.uart.read_ready().map_err(|_| ModemError::Io)? {
            self.uart
                .read(&mut scratch)
                .await
                .map_err(|_| ModemError::Io)?;
        }
        self.parser = ResponseParser::new();
        Ok(())
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), ModemError> {
        self.uart.write_all(bytes).await.map_err(|_| ModemError::Io)
    }
}

impl<U> Link for AtModem<U>
where
    U: Read + ReadReady + Write,
{
    type Error = ModemError;

    async fn is_associated(&mut self) -> bool {
        self.status().await.is_ok_and(|status| status.associated)
    }

    async fn associate(&mut self, credentials: &LinkCredentials) -> Result<(), ModemError> {
        let command = join_command(credentials)?;
        self.command(&command, JOIN_TIMEOUT).await.map(|_| ())
    }
}

impl<U> Transport for AtModem<U>
where
    U: Read + ReadReady + Write,
{
    type Error = ModemError;

    async fn is_open(&mut self) -> bool {
        self.status().await.is_ok_and(|status| status.socket_open)
    }

    async fn close(&mut self) {
        // `ERROR` here only means nothing was open.
        let _ = self.command("AT+CIPCLOSE", COMMAND_TIMEOUT).await;
    }

    async fn connect(&mut self, endpoint: &Endpoint, timeout: Duration) -> Result<(), ModemError> {
        let command = connect_command(endpoint)?;
        self.command(&command, timeout).await.map(|_| ())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<usize, ModemError> {
        let mut command: String<24> = String::new();
        write!(command, "AT+CIPSEND={}", bytes.len()).map_err(|_| ModemError::CommandTooLong)?;

        self.send_line(&command).await?;
        self.wait_for_prompt(COMMAND_TIMEOUT).await?;

        self.write_all(bytes).await?;
        self.uart.flush().await.map_err(|_| ModemError::Io)?;

        match self.final_reply(SEND_TIMEOUT).await? {
            Reply::SendOk => Ok(bytes.len()),
            Reply::SendFail => Ok(0),
            _ => Err(ModemError::Rejected),
        }
    }
}
