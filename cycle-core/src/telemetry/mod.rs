//! Cycle summary records and their line-oriented wire format.
//!
//! A record is built once per qualifying cycle, encoded into a bounded
//! ASCII line and written to the collector. Two layouts exist on the wire:
//!
//! * dual-timer: `<code>;<production>;<pause>;<total>;<quantity>\n`
//! * single-timer: `<code>;<elapsed>;<quantity>\n`
//!
//! The decoder accepts either layout so host tooling can ingest lines from
//! older single-timer nodes as well.

use core::fmt::{self, Write as _};

use heapless::{String, Vec};
use winnow::ascii::dec_uint;
use winnow::combinator::{opt, preceded};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::take_till;

/// Longest machine/process identifier accepted in a record.
pub const MAX_CODE_LEN: usize = 32;

/// Upper bound on one encoded line (code, four `u32` fields, separators, newline).
pub const MAX_WIRE_LEN: usize = 96;

/// Every record carries exactly one finished cycle.
pub const CYCLE_QUANTITY: u32 = 1;

const MAX_NUMERIC_FIELDS: usize = 4;

/// Opaque machine identifier configured at start-up.
pub type MachineCode = String<MAX_CODE_LEN>;

/// Encoded wire line, newline included.
pub type WireLine = String<MAX_WIRE_LEN>;

/// Wire layout used when encoding a record.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum WireFormat {
    /// Production, pause and total seconds plus quantity.
    #[default]
    Dual,
    /// Total seconds plus quantity.
    Single,
}

impl WireFormat {
    /// Parses a CLI/config tag (`dual` or `single`).
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        if tag.eq_ignore_ascii_case("dual") {
            Some(Self::Dual)
        } else if tag.eq_ignore_ascii_case("single") {
            Some(Self::Single)
        } else {
            None
        }
    }
}

/// Failures raised while building, encoding or decoding records.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WireError {
    /// Machine code does not fit in [`MAX_CODE_LEN`] bytes.
    CodeTooLong,
    /// Encoded line does not fit in [`MAX_WIRE_LEN`] bytes.
    Overflow,
    /// Line does not match either wire layout.
    Malformed,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::CodeTooLong => write!(f, "machine code exceeds {MAX_CODE_LEN} bytes"),
            WireError::Overflow => write!(f, "record exceeds {MAX_WIRE_LEN} bytes"),
            WireError::Malformed => f.write_str("malformed record line"),
        }
    }
}

/// Copies `code` into a bounded [`MachineCode`].
pub fn machine_code(code: &str) -> Result<MachineCode, WireError> {
    let mut bounded = MachineCode::new();
    bounded
        .push_str(code)
        .map_err(|_| WireError::CodeTooLong)?;
    Ok(bounded)
}

/// Summary of one finished machine cycle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TelemetryRecord {
    pub code: MachineCode,
    pub production_seconds: u32,
    pub pause_seconds: u32,
    pub total_seconds: u32,
    pub quantity: u32,
}

impl TelemetryRecord {
    /// Builds the record for one cycle; the total is the sum of both timers.
    #[must_use]
    pub fn cycle(code: MachineCode, production_seconds: u32, pause_seconds: u32) -> Self {
        Self {
            code,
            production_seconds,
            pause_seconds,
            total_seconds: production_seconds.saturating_add(pause_seconds),
            quantity: CYCLE_QUANTITY,
        }
    }

    /// Encodes the record, trailing newline included.
    pub fn encode(&self, format: WireFormat) -> Result<WireLine, WireError> {
        let mut line = WireLine::new();
        match format {
            WireFormat::Dual => writeln!(
                line,
                "{};{};{};{};{}",
                self.code,
                self.production_seconds,
                self.pause_seconds,
                self.total_seconds,
                self.quantity
            ),
            WireFormat::Single => {
                writeln!(line, "{};{};{}", self.code, self.total_seconds, self.quantity)
            }
        }
        .map_err(|_| WireError::Overflow)?;
        Ok(line)
    }
}

/// Record recovered from a wire line together with the layout it used.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DecodedLine {
    pub record: TelemetryRecord,
    pub format: WireFormat,
}

/// Decodes one wire line. A trailing `\n` or `\r\n` is optional.
///
/// Single-timer lines decode with the elapsed value as production time and a
/// zero pause.
pub fn parse_line(line: &str) -> Result<DecodedLine, WireError> {
    let body = line.trim_end_matches(['\r', '\n']);
    let (code, values) = record_fields.parse(body).map_err(|_| WireError::Malformed)?;
    let code = machine_code(code)?;

    match values.as_slice() {
        [elapsed, quantity] => Ok(DecodedLine {
            record: TelemetryRecord {
                code,
                production_seconds: *elapsed,
                pause_seconds: 0,
                total_seconds: *elapsed,
                quantity: *quantity,
            },
            format: WireFormat::Single,
        }),
        [production, pause, total, quantity] => Ok(DecodedLine {
            record: TelemetryRecord {
                code,
                production_seconds: *production,
                pause_seconds: *pause,
                total_seconds: *total,
                quantity: *quantity,
            },
            format: WireFormat::Dual,
        }),
        _ => Err(WireError::Malformed),
    }
}

type FieldList = Vec<u32, MAX_NUMERIC_FIELDS>;

fn record_fields<'s>(
    input: &mut &'s str,
) -> Result<(&'s str, FieldList), ErrMode<ContextError>> {
    let code = take_till(1.., ';').parse_next(input)?;
    let mut values = FieldList::new();

    while !values.is_full() {
        match opt(numeric_field).parse_next(input)? {
            Some(value) => {
                // Capacity was checked by the loop guard.
                let _ = values.push(value);
            }
            None => break,
        }
    }

    Ok((code, values))
}

fn numeric_field(input: &mut &str) -> Result<u32, ErrMode<ContextError>> {
    preceded(';', dec_uint).parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(production: u32, pause: u32) -> TelemetryRecord {
        TelemetryRecord::cycle(machine_code("TKC110 002 002").unwrap(), production, pause)
    }

    #[test]
    fn cycle_record_sums_timers_and_counts_one() {
        let record = record(7, 3);
        assert_eq!(record.total_seconds, 10);
        assert_eq!(record.quantity, 1);
    }

    #[test]
    fn encodes_dual_timer_line() {
        let line = record(7, 3).encode(WireFormat::Dual).unwrap();
        assert_eq!(line.as_str(), "TKC110 002 002;7;3;10;1\n");
    }

    #[test]
    fn encodes_single_timer_line_with_total() {
        let line = record(7, 3).encode(WireFormat::Single).unwrap();
        assert_eq!(line.as_str(), "TKC110 002 002;10;1\n");
    }

    #[test]
    fn longest_code_with_max_fields_still_fits() {
        let code = machine_code("ABCDEFGHIJKLMNOPQRSTUVWXYZ012345").unwrap();
        let record = TelemetryRecord {
            code,
            production_seconds: u32::MAX,
            pause_seconds: u32::MAX,
            total_seconds: u32::MAX,
            quantity: u32::MAX,
        };
        assert!(record.encode(WireFormat::Dual).is_ok());
    }

    #[test]
    fn rejects_oversized_code() {
        let oversized = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456";
        assert_eq!(oversized.len(), MAX_CODE_LEN + 1);
        assert_eq!(machine_code(oversized), Err(WireError::CodeTooLong));
    }

    #[test]
    fn parses_dual_line_with_crlf() {
        let decoded = parse_line("PRESS-4;12;5;17;1\r\n").unwrap();
        assert_eq!(decoded.format, WireFormat::Dual);
        assert_eq!(decoded.record.code.as_str(), "PRESS-4");
        assert_eq!(decoded.record.production_seconds, 12);
        assert_eq!(decoded.record.pause_seconds, 5);
        assert_eq!(decoded.record.total_seconds, 17);
        assert_eq!(decoded.record.quantity, 1);
    }

    #[test]
    fn parses_single_line_as_production_time() {
        let decoded = parse_line("LATHE;42;1").unwrap();
        assert_eq!(decoded.format, WireFormat::Single);
        assert_eq!(decoded.record.production_seconds, 42);
        assert_eq!(decoded.record.pause_seconds, 0);
        assert_eq!(decoded.record.total_seconds, 42);
    }

    #[test]
    fn rejects_malformed_lines() {
        for line in [
            "",
            ";1;2",
            "CODE",
            "CODE;1",
            "CODE;1;2;3",
            "CODE;1;2;3;4;5",
            "CODE;-1;2",
            "CODE;1;x",
            "CODE;1;2;",
        ] {
            assert_eq!(parse_line(line), Err(WireError::Malformed), "line {line:?}");
        }
    }

    #[test]
    fn format_tags_are_case_insensitive() {
        assert_eq!(WireFormat::from_tag("DUAL"), Some(WireFormat::Dual));
        assert_eq!(WireFormat::from_tag("single"), Some(WireFormat::Single));
        assert_eq!(WireFormat::from_tag("triple"), None);
    }
}
