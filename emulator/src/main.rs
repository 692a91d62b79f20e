mod collector;
mod net;
mod session;

use std::env;
use std::io;
use std::path::PathBuf;
use std::process;

use collector::{Collector, CollectorOptions};
use cycle_core::cycle::DEFAULT_THRESHOLD_SECS;
use cycle_core::network::{ConnectionTiming, Endpoint, LinkCredentials, NetworkConfig};
use cycle_core::telemetry::{WireFormat, machine_code};
use session::{Session, SessionOptions};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 5050;
const DEFAULT_CODE: &str = "TKC110 002 002";
const DEFAULT_COLLECTOR_LOG: &str = "collector.log";

const USAGE: &str = "Usage: cycle-emulator [--host <addr>] [--port <port>] [--code <machine-code>] \
[--threshold <secs>] [--format <dual|single>] [--transcript <path>]\n       \
cycle-emulator collector [--port <port>] [--log <path>]";

enum Mode {
    Bench(SessionOptions),
    Collector(CollectorOptions),
}

fn main() -> io::Result<()> {
    let mode = parse_args(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    match mode {
        Mode::Bench(options) => {
            println!(
                "Cycle monitor emulator reporting to {} as `{}`.",
                options.network.endpoint, options.code
            );
            Session::new(options)?.run()
        }
        Mode::Collector(options) => Collector::bind(&options)?.run(),
    }
}

fn parse_args<I>(args: I) -> Result<Mode, String>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().peekable();
    if args.peek().is_some_and(|arg| arg == "collector") {
        args.next();
        return parse_collector_args(args).map(Mode::Collector);
    }
    parse_bench_args(args).map(Mode::Bench)
}

fn parse_bench_args(mut args: impl Iterator<Item = String>) -> Result<SessionOptions, String> {
    let mut host = DEFAULT_HOST.to_string();
    let mut port = DEFAULT_PORT;
    let mut code = DEFAULT_CODE.to_string();
    let mut threshold_secs = DEFAULT_THRESHOLD_SECS;
    let mut format = WireFormat::Dual;
    let mut transcript = None;

    while let Some(arg) = args.next() {
        let (flag, value) = split_flag(&arg, &mut args)?;
        match flag.as_str() {
            "--host" => host = value,
            "--port" => port = parse_number(&flag, &value)?,
            "--code" => code = value,
            "--threshold" => threshold_secs = parse_number(&flag, &value)?,
            "--format" => {
                format = WireFormat::from_tag(&value)
                    .ok_or_else(|| format!("Unknown wire format `{value}`"))?;
            }
            "--transcript" => transcript = Some(PathBuf::from(value)),
            _ => return Err(format!("Unknown option `{flag}`")),
        }
    }

    let endpoint = Endpoint::new(&host, port).map_err(|err| err.to_string())?;
    let credentials = LinkCredentials::new("emulator", "").map_err(|err| err.to_string())?;

    Ok(SessionOptions {
        network: NetworkConfig {
            credentials,
            endpoint,
        },
        code: machine_code(&code).map_err(|err| err.to_string())?,
        threshold_secs,
        format,
        timing: ConnectionTiming::DEFAULT,
        transcript,
    })
}

fn parse_collector_args(
    mut args: impl Iterator<Item = String>,
) -> Result<CollectorOptions, String> {
    let mut options = CollectorOptions {
        port: DEFAULT_PORT,
        log: PathBuf::from(DEFAULT_COLLECTOR_LOG),
    };

    while let Some(arg) = args.next() {
        let (flag, value) = split_flag(&arg, &mut args)?;
        match flag.as_str() {
            "--port" => options.port = parse_number(&flag, &value)?,
            "--log" => options.log = PathBuf::from(value),
            _ => return Err(format!("Unknown option `{flag}`")),
        }
    }

    Ok(options)
}

/// Accepts both `--flag value` and `--flag=value`.
fn split_flag(
    arg: &str,
    rest: &mut impl Iterator<Item = String>,
) -> Result<(String, String), String> {
    if let Some((flag, value)) = arg.split_once('=') {
        return Ok((flag.to_string(), value.to_string()));
    }
    if !arg.starts_with("--") {
        return Err(format!("Unexpected argument `{arg}`"));
    }
    rest.next()
        .map(|value| (arg.to_string(), value))
        .ok_or_else(|| format!("Expected value after {arg}"))
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid value `{value}` for {flag}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|arg| (*arg).to_string()).collect()
    }

    #[test]
    fn bench_defaults_target_local_collector() {
        let Ok(Mode::Bench(options)) = parse_args(args(&[])) else {
            panic!("expected bench mode");
        };
        assert_eq!(options.network.endpoint.host.as_str(), DEFAULT_HOST);
        assert_eq!(options.network.endpoint.port, DEFAULT_PORT);
        assert_eq!(options.code.as_str(), DEFAULT_CODE);
        assert_eq!(options.threshold_secs, DEFAULT_THRESHOLD_SECS);
        assert_eq!(options.format, WireFormat::Dual);
    }

    #[test]
    fn bench_flags_override_defaults() {
        let Ok(Mode::Bench(options)) = parse_args(args(&[
            "--host",
            "10.48.0.113",
            "--port=6000",
            "--code",
            "PRESS-4",
            "--threshold",
            "12",
            "--format",
            "single",
            "--transcript",
            "bench.log",
        ])) else {
            panic!("expected bench mode");
        };
        assert_eq!(options.network.endpoint.host.as_str(), "10.48.0.113");
        assert_eq!(options.network.endpoint.port, 6000);
        assert_eq!(options.code.as_str(), "PRESS-4");
        assert_eq!(options.threshold_secs, 12);
        assert_eq!(options.format, WireFormat::Single);
        assert_eq!(options.transcript, Some(PathBuf::from("bench.log")));
    }

    #[test]
    fn collector_mode_parses_its_own_flags() {
        let Ok(Mode::Collector(options)) =
            parse_args(args(&["collector", "--port", "7070", "--log", "cycles.log"]))
        else {
            panic!("expected collector mode");
        };
        assert_eq!(options.port, 7070);
        assert_eq!(options.log, PathBuf::from("cycles.log"));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_args(args(&["--port", "99999"])).is_err());
        assert!(parse_args(args(&["--format", "triple"])).is_err());
        assert!(parse_args(args(&["--threshold"])).is_err());
        assert!(parse_args(args(&["collector", "--host", "x"])).is_err());
        assert!(parse_args(args(&["stray"])).is_err());
    }
}
