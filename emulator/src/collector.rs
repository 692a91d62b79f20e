//! Line-oriented TCP collector for cycle records.
//!
//! Each device connection gets its own thread. Every non-empty line is
//! acknowledged with `OK`, appended to the log as `<local time> | <line>`
//! and, when it decodes as a cycle record, folded into per-code statistics.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use chrono::Local;
use cycle_core::telemetry::{DecodedLine, parse_line};

const ACK: &[u8] = b"OK";
const STAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct CollectorOptions {
    pub port: u16,
    pub log: PathBuf,
}

/// Running totals for one machine code.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CodeStats {
    pub cycles: u64,
    pub total_seconds: u64,
}

impl CodeStats {
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_total_seconds(&self) -> f64 {
        if self.cycles == 0 {
            0.0
        } else {
            self.total_seconds as f64 / self.cycles as f64
        }
    }
}

/// Per-code statistics shared by all connection threads.
#[derive(Default)]
pub struct Ledger {
    stats: HashMap<String, CodeStats>,
}

impl Ledger {
    /// Folds one decoded record in and returns the updated totals for its code.
    pub fn record(&mut self, decoded: &DecodedLine) -> CodeStats {
        let record = &decoded.record;
        let entry = self.stats.entry(record.code.as_str().to_owned()).or_default();
        entry.cycles += u64::from(record.quantity);
        entry.total_seconds += u64::from(record.total_seconds);
        *entry
    }

    pub fn get(&self, code: &str) -> Option<CodeStats> {
        self.stats.get(code).copied()
    }
}

pub struct Collector {
    listener: TcpListener,
    ledger: Arc<Mutex<Ledger>>,
    log: Arc<Mutex<File>>,
}

impl Collector {
    pub fn bind(options: &CollectorOptions) -> io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", options.port))?;
        Self::with_listener(listener, &options.log)
    }

    pub fn with_listener(listener: TcpListener, log_path: &Path) -> io::Result<Self> {
        if let Some(parent) = log_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let log = OpenOptions::new().create(true).append(true).open(log_path)?;

        Ok(Self {
            listener,
            ledger: Arc::new(Mutex::new(Ledger::default())),
            log: Arc::new(Mutex::new(log)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn ledger(&self) -> Arc<Mutex<Ledger>> {
        Arc::clone(&self.ledger)
    }

    /// Accepts connections forever.
    pub fn run(&self) -> io::Result<()> {
        println!("[collector] listening on {}", self.local_addr()?);

        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    let ledger = Arc::clone(&self.ledger);
                    let log = Arc::clone(&self.log);
                    thread::spawn(move || serve_client(stream, &ledger, &log));
                }
                Err(err) => eprintln!("[collector] accept failed: {err}"),
            }
        }
        Ok(())
    }
}

fn serve_client(stream: TcpStream, ledger: &Mutex<Ledger>, log: &Mutex<File>) {
    let peer = stream
        .peer_addr()
        .map_or_else(|_| "unknown peer".to_string(), |addr| addr.to_string());
    println!("[collector] {peer} connected");

    if let Err(err) = handle_lines(stream, ledger, log) {
        eprintln!("[collector] {peer}: {err}");
    }
    println!("[collector] {peer} disconnected");
}

fn handle_lines(stream: TcpStream, ledger: &Mutex<Ledger>, log: &Mutex<File>) -> io::Result<()> {
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    let mut raw = Vec::new();

    loop {
        raw.clear();
        if reader.read_until(b'\n', &mut raw)? == 0 {
            break;
        }
        // Undecodable bytes are dropped rather than failing the connection.
        let decoded = String::from_utf8_lossy(&raw).replace(char::REPLACEMENT_CHARACTER, "");
        let line = decoded.trim();
        if line.is_empty() {
            continue;
        }

        let stamp = Local::now().format(STAMP_FORMAT).to_string();
        println!("[{stamp}] received: {line}");
        {
            let mut file = log.lock().unwrap_or_else(PoisonError::into_inner);
            writeln!(file, "{stamp} | {line}")?;
        }

        match parse_line(line) {
            Ok(decoded) => {
                let stats = ledger
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record(&decoded);
                println!(
                    "[{stamp}] {code}: cycles={} mean-total={:.1}s",
                    stats.cycles,
                    stats.mean_total_seconds(),
                    code = decoded.record.code,
                );
            }
            Err(err) => eprintln!("[{stamp}] unparsed line ({err})"),
        }

        writer.write_all(ACK)?;
    }

    Ok(())
}
