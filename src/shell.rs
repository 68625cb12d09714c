//! Diagnostic shell commands.
//!
//! These are the scanner's entries in the debug command line.  They print to any
//! [`core::fmt::Write`], and report failures as text: nothing here returns a scanner error, and
//! apart from recalibrating, nothing changes acquisition state.

use core::fmt::{self, Write};

use embedded_hal::delay::DelayNs;

use crate::converter::Converter;
use crate::matrix::{Matrix, NullSink};
use crate::scan::{Scanner, Stall};
use crate::transfer::TransferEngine;
use crate::{ConverterId, CHANNELS, ROWS};

/// The commands, and their help text.
pub static COMMANDS: [(&str, &str); 3] = [
    ("adcprint", "Prints contents of the ADC buffers.  'adcprint delta' prints the change."),
    ("t", "Run scan cycles, reporting stalls.  Takes an optional count."),
    ("adccal", "Calibrate, print results.  Takes an optional converter, 0 or 1."),
];

/// How many anomalies a stress run keeps the details of.
pub const MAX_ANOMALIES: usize = 16;

/// Dots are printed this often during a stress run.
const PROGRESS_EVERY: u32 = 1000;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Command {
    /// Dump the buffers, raw or as deltas.
    Print { delta: bool },
    /// Run this many cycles.
    Stress { count: u32 },
    /// Recalibrate one converter, or both.
    Calibrate { converter: Option<ConverterId> },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParseError {
    Empty,
    UnknownCommand,
    BadArgument,
}

impl Command {
    pub fn parse(line: &str) -> Result<Command, ParseError> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or(ParseError::Empty)?;
        let arg = words.next();
        if words.next().is_some() {
            return Err(ParseError::BadArgument);
        }

        if name.eq_ignore_ascii_case("adcprint") {
            match arg {
                None => Ok(Command::Print { delta: false }),
                Some("delta") => Ok(Command::Print { delta: true }),
                Some(_) => Err(ParseError::BadArgument),
            }
        } else if name.eq_ignore_ascii_case("t") {
            let count = match arg {
                None => 1,
                Some(n) => n.parse().map_err(|_| ParseError::BadArgument)?,
            };
            Ok(Command::Stress { count })
        } else if name.eq_ignore_ascii_case("adccal") {
            let converter = match arg {
                None => None,
                Some("0") => Some(ConverterId::Adc0),
                Some("1") => Some(ConverterId::Adc1),
                Some(_) => return Err(ParseError::BadArgument),
            };
            Ok(Command::Calibrate { converter })
        } else {
            Err(ParseError::UnknownCommand)
        }
    }
}

/// One stall seen during a stress run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Anomaly {
    pub iteration: u32,
    pub stall: Stall,
}

/// The results of a stress run.
#[derive(Debug, Default)]
pub struct StressReport {
    pub cycles: u32,
    /// Cycles that were abandoned.
    pub failed: u32,
    /// Every stall, including those a retry recovered from, up to [`MAX_ANOMALIES`].
    pub anomalies: heapless::Vec<Anomaly, MAX_ANOMALIES>,
    /// Anomalies beyond those that fit.
    pub dropped: u32,
}

/// Run a parsed command.
pub fn execute<A, T, M, D, W>(
    scanner: &mut Scanner<A, T, M, D>,
    command: Command,
    out: &mut W,
) -> fmt::Result
where
    A: Converter,
    T: TransferEngine,
    M: Matrix,
    D: DelayNs,
    W: Write,
{
    match command {
        Command::Print { delta } => print_buffers(scanner, delta, out),
        Command::Stress { count } => stress(scanner, count, out).map(|_| ()),
        Command::Calibrate { converter: Some(converter) } => calibrate(scanner, converter, out),
        Command::Calibrate { converter: None } => {
            for converter in ConverterId::ALL {
                calibrate(scanner, converter, out)?;
            }
            Ok(())
        }
    }
}

/// Parse and run a command line.
pub fn run_line<A, T, M, D, W>(scanner: &mut Scanner<A, T, M, D>, line: &str, out: &mut W) -> fmt::Result
where
    A: Converter,
    T: TransferEngine,
    M: Matrix,
    D: DelayNs,
    W: Write,
{
    match Command::parse(line) {
        Ok(command) => execute(scanner, command, out),
        Err(ParseError::Empty) => Ok(()),
        Err(ParseError::UnknownCommand) => {
            writeln!(out, "unknown command, try one of:")?;
            for (name, help) in COMMANDS.iter() {
                writeln!(out, "  {:10} {}", name, help)?;
            }
            Ok(())
        }
        Err(ParseError::BadArgument) => writeln!(out, "bad argument"),
    }
}

fn print_buffers<A, T, M, D, W>(scanner: &Scanner<A, T, M, D>, delta: bool, out: &mut W) -> fmt::Result
where
    A: Converter,
    T: TransferEngine,
    M: Matrix,
    D: DelayNs,
    W: Write,
{
    if let Some(counters) = scanner.transfer_counters() {
        write!(out, "remaining")?;
        for (command, result) in counters {
            write!(out, " {:04x} {:04x}", command, result)?;
        }
        writeln!(out)?;
    }

    let store = scanner.store();
    for converter in ConverterId::ALL {
        writeln!(out, "{}:", converter)?;
        for row in 0..ROWS {
            write!(out, "{:2}:", row)?;
            for channel in 0..CHANNELS {
                if delta {
                    let mark = if store.is_falling(converter, row, channel) { '!' } else { ' ' };
                    write!(out, " {:4}{}", store.delta(converter, row, channel), mark)?;
                } else {
                    write!(out, " {:4}", store.get(converter, row, channel))?;
                }
            }
            writeln!(out)?;
        }
    }
    Ok(())
}

fn print_cal_data<A: Converter, W: Write>(adc: &A, out: &mut W) -> fmt::Result {
    let data = adc.calibration_data();
    writeln!(
        out,
        "{:04x} {:04x} {:04x} {:04x} {:04x} {:04x} {:04x} {:04x}",
        adc.gain().bits(),
        data.clp0,
        data.clp1,
        data.clp2,
        data.clp3,
        data.clp4,
        data.clps,
        data.clpd
    )
}

fn calibrate<A, T, M, D, W>(
    scanner: &mut Scanner<A, T, M, D>,
    converter: ConverterId,
    out: &mut W,
) -> fmt::Result
where
    A: Converter,
    T: TransferEngine,
    M: Matrix,
    D: DelayNs,
    W: Write,
{
    writeln!(out, "{}", converter)?;
    write!(out, "Old: ")?;
    print_cal_data(scanner.sensor(converter).adc(), out)?;

    let res = scanner.recalibrate(converter);

    write!(out, "New: ")?;
    print_cal_data(scanner.sensor(converter).adc(), out)?;
    match res {
        Ok(cal) => writeln!(out, "ok, {} polls spare", cal.spare),
        Err(err) => writeln!(out, "{}", err),
    }
}

/// Run `count` cycles, collecting every stall.  Progress dots are printed along the way, then
/// each anomaly.
pub fn stress<A, T, M, D, W>(
    scanner: &mut Scanner<A, T, M, D>,
    count: u32,
    out: &mut W,
) -> Result<StressReport, fmt::Error>
where
    A: Converter,
    T: TransferEngine,
    M: Matrix,
    D: DelayNs,
    W: Write,
{
    let mut report = StressReport::default();

    for iteration in 0..count {
        if scanner.scan(&mut NullSink).is_err() {
            report.failed += 1;
        }
        report.cycles += 1;

        for stall in scanner.stalls() {
            let anomaly = Anomaly {
                iteration,
                stall: *stall,
            };
            if report.anomalies.push(anomaly).is_err() {
                report.dropped += 1;
            }
        }
        report.dropped += scanner.stalls_dropped();

        if iteration % PROGRESS_EVERY == 0 {
            write!(out, ".")?;
        }
    }
    writeln!(out)?;

    for anomaly in report.anomalies.iter() {
        writeln!(
            out,
            "!!!! {} {}: row {}, {} outstanding",
            anomaly.iteration, anomaly.stall.converter, anomaly.stall.row, anomaly.stall.remaining
        )?;
    }
    if report.dropped > 0 {
        writeln!(out, "[{} more anomalies dropped]", report.dropped)?;
    }
    writeln!(
        out,
        "{} cycles, {} failed, {} stalls",
        report.cycles,
        report.failed,
        report.anomalies.len() as u32 + report.dropped
    )?;

    Ok(report)
}

#[test]
fn test_parse() {
    assert_eq!(Command::parse("adcprint"), Ok(Command::Print { delta: false }));
    assert_eq!(Command::parse("ADCPrint delta"), Ok(Command::Print { delta: true }));
    assert_eq!(Command::parse("t"), Ok(Command::Stress { count: 1 }));
    assert_eq!(Command::parse("t 2500"), Ok(Command::Stress { count: 2500 }));
    assert_eq!(
        Command::parse("adccal 1"),
        Ok(Command::Calibrate { converter: Some(ConverterId::Adc1) })
    );
    assert_eq!(Command::parse("   "), Err(ParseError::Empty));
    assert_eq!(Command::parse("t lots"), Err(ParseError::BadArgument));
    assert_eq!(Command::parse("adccal 2"), Err(ParseError::BadArgument));
    assert_eq!(Command::parse("t 1 2"), Err(ParseError::BadArgument));
    assert_eq!(Command::parse("reboot"), Err(ParseError::UnknownCommand));
}
