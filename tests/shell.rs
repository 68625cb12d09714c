//! The diagnostic commands, against the simulated board.

mod common;

use core::fmt::Write;

use bbq_sense::completion::CompletionFlag;
use bbq_sense::config::REFERENCE_TABLES;
use bbq_sense::shell::{self, MAX_ANOMALIES};
use bbq_sense::sim::CalBehavior;
use bbq_sense::{ConverterId, ScanConfig, CHANNELS};

use common::{level, stages, Recorder, Rig};

#[test]
fn test_adccal_prints_old_and_new() {
    common::setup_log();
    static FLAGS: [CompletionFlag; 2] = [CompletionFlag::new(), CompletionFlag::new()];

    let rig = Rig::new();
    let mut scanner = rig.chained(&FLAGS, ScanConfig::transfer_chained(), |_| ());
    scanner.setup().unwrap();

    let mut changed = stages();
    changed.clp0 = 0x0180;
    rig.adc(ConverterId::Adc0)
        .set_calibration(changed, CalBehavior::Complete { after: 5 });

    let mut out = String::new();
    shell::run_line(&mut scanner, "adccal 0", &mut out).unwrap();
    assert_eq!(
        out,
        "adc0\n\
         Old: 8f98 0100 0200 0400 0800 1000 0030 0041\n\
         New: 8fd8 0180 0200 0400 0800 1000 0030 0041\n\
         ok, 99996 polls spare\n"
    );

    // Still scans afterwards.
    scanner.scan(&mut Recorder::default()).unwrap();
}

#[test]
fn test_adccal_failure() {
    static FLAGS: [CompletionFlag; 2] = [CompletionFlag::new(), CompletionFlag::new()];

    let rig = Rig::new();
    let mut scanner = rig.chained(&FLAGS, ScanConfig::transfer_chained(), |_| ());
    scanner.setup().unwrap();

    rig.adc(ConverterId::Adc1)
        .set_calibration(stages(), CalBehavior::Fail { after: 2 });

    let mut out = String::new();
    shell::run_line(&mut scanner, "adccal", &mut out).unwrap();
    let lines: Vec<_> = out.lines().collect();
    assert_eq!(lines.len(), 8);
    assert_eq!(lines[0], "adc0");
    assert_eq!(lines[3], "ok, 99996 polls spare");
    assert_eq!(lines[4], "adc1");
    assert_eq!(lines[6], "New: 0000 0100 0200 0400 0800 1000 0030 0041");
    assert_eq!(lines[7], "adc1: calibration failed");
}

#[test]
fn test_adcprint() {
    static FLAGS: [CompletionFlag; 2] = [CompletionFlag::new(), CompletionFlag::new()];

    let rig = Rig::new();
    let mut scanner = rig.chained(&FLAGS, ScanConfig::transfer_chained(), |_| ());
    scanner.setup().unwrap();
    scanner.scan(&mut Recorder::default()).unwrap();

    let mut out = String::new();
    shell::run_line(&mut scanner, "adcprint", &mut out).unwrap();
    let lines: Vec<_> = out.lines().collect();
    assert_eq!(lines.len(), 1 + 2 * 9);
    assert_eq!(lines[0], "remaining 0010 0010 0010 0010");
    assert_eq!(lines[1], "adc0:");
    assert_eq!(lines[10], "adc1:");

    let mut row5 = String::from(" 5:");
    for index in 0..CHANNELS {
        let channel = REFERENCE_TABLES[1].get(index).unwrap().channel();
        write!(row5, " {:4}", level(5, channel)).unwrap();
    }
    assert_eq!(lines[16], row5);
}

#[test]
fn test_adcprint_delta() {
    static FLAGS: [CompletionFlag; 2] = [CompletionFlag::new(), CompletionFlag::new()];

    let rig = Rig::new();
    let mut scanner = rig.without_engine(&FLAGS, ScanConfig::polling_sequential());
    scanner.setup().unwrap();
    scanner.scan(&mut Recorder::default()).unwrap();

    rig.board.set_level(3, 4, level(3, 4) - 40);
    rig.board.set_level(4, 4, level(4, 4) + 40);
    scanner.scan(&mut Recorder::default()).unwrap();

    let mut out = String::new();
    shell::run_line(&mut scanner, "adcprint delta", &mut out).unwrap();
    let lines: Vec<_> = out.lines().collect();
    // No transfer counters when polling.
    assert_eq!(lines.len(), 2 * 9);
    assert_eq!(lines[0], "adc0:");
    assert!(lines[1].starts_with(" 0:    0     0 "));
    assert!(lines[4].starts_with(" 3:    0!    0 "));
    assert!(lines[5].starts_with(" 4:   20     0 "));
    assert_eq!(out.matches('!').count(), 2);
}

#[test]
fn test_stress_reports_anomalies() {
    common::setup_log();
    static FLAGS: [CompletionFlag; 2] = [CompletionFlag::new(), CompletionFlag::new()];

    let rig = Rig::new();
    let mut scanner = rig.chained(&FLAGS, ScanConfig::transfer_chained(), |dma| {
        dma.stall(ConverterId::Adc1, 5, 1)
    });
    scanner.setup().unwrap();

    let mut out = String::new();
    let report = shell::stress(&mut scanner, 3, &mut out).unwrap();
    assert_eq!(report.cycles, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(report.anomalies.len(), 1);
    assert_eq!(report.anomalies[0].iteration, 0);
    assert_eq!(report.anomalies[0].stall.converter, ConverterId::Adc1);
    assert_eq!(
        out,
        ".\n\
         !!!! 0 adc1: row 0, 11 outstanding\n\
         3 cycles, 0 failed, 1 stalls\n"
    );
}

#[test]
fn test_stress_counts_every_stall() {
    static FLAGS: [CompletionFlag; 2] = [CompletionFlag::new(), CompletionFlag::new()];

    let rig = Rig::new();
    let config = ScanConfig {
        stall_retries: 20,
        ..ScanConfig::transfer_chained()
    };
    let mut scanner = rig.chained(&FLAGS, config, |dma| dma.stall(ConverterId::Adc1, 5, 12));
    scanner.setup().unwrap();

    let mut out = String::new();
    let report = shell::stress(&mut scanner, 1, &mut out).unwrap();
    assert_eq!(report.failed, 0);
    assert_eq!(report.anomalies.len() as u32 + report.dropped, 12);
    assert!(out.ends_with("1 cycles, 0 failed, 12 stalls\n"));
}

#[test]
fn test_stress_progress() {
    static FLAGS: [CompletionFlag; 2] = [CompletionFlag::new(), CompletionFlag::new()];

    let rig = Rig::new();
    let mut scanner = rig.chained(&FLAGS, ScanConfig::transfer_chained(), |_| ());
    scanner.setup().unwrap();

    let mut out = String::new();
    shell::run_line(&mut scanner, "t 2001", &mut out).unwrap();
    assert_eq!(out, "...\n2001 cycles, 0 failed, 0 stalls\n");
    assert_eq!(scanner.scan_count(), 2001);
}

#[test]
fn test_stress_failures() {
    static FLAGS: [CompletionFlag; 2] = [CompletionFlag::new(), CompletionFlag::new()];

    let rig = Rig::new();
    let mut scanner = rig.chained(&FLAGS, ScanConfig::transfer_chained(), |dma| {
        dma.stall(ConverterId::Adc0, 2, u32::MAX)
    });
    scanner.setup().unwrap();

    let mut out = String::new();
    let report = shell::stress(&mut scanner, 10, &mut out).unwrap();
    assert_eq!(report.failed, 10);
    assert_eq!(report.anomalies.len(), MAX_ANOMALIES);
    assert_eq!(report.dropped, 30 - MAX_ANOMALIES as u32);
    assert!(out.contains("!!!! 5 adc0: row 0, 14 outstanding\n"));
    assert!(out.contains("[14 more anomalies dropped]\n"));
    assert!(out.ends_with("10 cycles, 10 failed, 30 stalls\n"));
}

#[test]
fn test_unknown_command() {
    static FLAGS: [CompletionFlag; 2] = [CompletionFlag::new(), CompletionFlag::new()];

    let rig = Rig::new();
    let mut scanner = rig.without_engine(&FLAGS, ScanConfig::polling_sequential());

    let mut out = String::new();
    shell::run_line(&mut scanner, "frob", &mut out).unwrap();
    assert!(out.starts_with("unknown command"));
    assert!(out.contains("adccal"));

    out.clear();
    shell::run_line(&mut scanner, "adcprint raw", &mut out).unwrap();
    assert_eq!(out, "bad argument\n");
}
