//! Build-time deployment settings.
//!
//! Values come from `CYCLE_*` environment variables at compile time so a
//! single image can be flashed per machine without touching the source.

use cycle_core::cycle::{CycleConfig, DEFAULT_THRESHOLD_SECS};
use cycle_core::network::{ConfigError, Endpoint, LinkCredentials, NetworkConfig};
use cycle_core::telemetry::{WireError, WireFormat, machine_code};

pub const WIFI_SSID: &str = env_or(option_env!("CYCLE_WIFI_SSID"), "");
pub const WIFI_PASSPHRASE: &str = env_or(option_env!("CYCLE_WIFI_PASS"), "");
pub const COLLECTOR_HOST: &str = env_or(option_env!("CYCLE_COLLECTOR_HOST"), "10.48.0.113");
pub const COLLECTOR_PORT: u16 = parse_u16_or(option_env!("CYCLE_COLLECTOR_PORT"), 5050);
pub const MACHINE_CODE: &str = env_or(option_env!("CYCLE_MACHINE_CODE"), "TKC110 002 002");
pub const THRESHOLD_SECS: u32 = parse_u32_or(
    option_env!("CYCLE_THRESHOLD_SECS"),
    DEFAULT_THRESHOLD_SECS,
);

pub const WIRE_FORMAT: WireFormat = WireFormat::Dual;

/// Depth of the queue between the cycle task and the network task.
pub const REPORT_QUEUE_DEPTH: usize = 4;

pub fn network_config() -> Result<NetworkConfig, ConfigError> {
    Ok(NetworkConfig {
        credentials: LinkCredentials::new(WIFI_SSID, WIFI_PASSPHRASE)?,
        endpoint: Endpoint::new(COLLECTOR_HOST, COLLECTOR_PORT)?,
    })
}

pub fn cycle_config() -> Result<CycleConfig, WireError> {
    Ok(CycleConfig::new(machine_code(MACHINE_CODE)?).with_threshold_secs(THRESHOLD_SECS))
}

const fn env_or(value: Option<&'static str>, default: &'static str) -> &'static str {
    match value {
        Some(value) => value,
        None => default,
    }
}

const fn parse_u16_or(value: Option<&str>, default: u16) -> u16 {
    let parsed = parse_u32_or(value, default as u32);
    if parsed > u16::MAX as u32 {
        default
    } else {
        parsed as u16
    }
}

// Falls back to `default` on anything but plain decimal digits.
const fn parse_u32_or(value: Option<&str>, default: u32) -> u32 {
    let Some(value) = value else {
        return default;
    };
    let bytes = value.as_bytes();
    if bytes.is_empty() {
        return default;
    }

    let mut parsed: u32 = 0;
    let mut index = 0;
    while index < bytes.len() {
        let digit = bytes[index];
        if !digit.is_ascii_digit() {
            return default;
        }
        parsed = match parsed.checked_mul(10) {
            Some(value) => match value.checked_add((digit - b'0') as u32) {
                Some(value) => value,
                None => return default,
            },
            None => return default,
        };
        index += 1;
    }
    parsed
}
