//! A simulated board, wired up the way the reference keyboard is.

#![allow(dead_code)]

use bbq_sense::calibrate::CalibrationData;
use bbq_sense::completion::{CompletionFlag, CompletionWait};
use bbq_sense::config::REFERENCE_TABLES;
use bbq_sense::matrix::SampleSink;
use bbq_sense::scan::Transfers;
use bbq_sense::sequencer::Sensor;
use bbq_sense::sim::{CalBehavior, SimAdc, SimBoard, SimDelay, SimDma, SimMatrix};
use bbq_sense::store::ResultMatrix;
use bbq_sense::transfer::{NoEngine, Slot};
use bbq_sense::{ConverterId, Error, ResultStore, Sample, ScanConfig, Scanner, ROWS};

pub type ChainedScanner = Scanner<SimAdc, SimDma, SimMatrix, SimDelay>;
pub type PollingScanner = Scanner<SimAdc, NoEngine, SimMatrix, SimDelay>;

pub const SLOTS: [(Slot, Slot); 2] = [(Slot(0), Slot(1)), (Slot(2), Slot(3))];

/// What input `channel` reads while `row` is strobed.  Distinct for every cell, and even, so the
/// polled value is just half of it.
pub fn level(row: usize, channel: u8) -> Sample {
    0x100 * (row as Sample + 1) + 2 * channel as Sample
}

pub fn stages() -> CalibrationData {
    CalibrationData {
        clp0: 0x0100,
        clp1: 0x0200,
        clp2: 0x0400,
        clp3: 0x0800,
        clp4: 0x1000,
        clps: 0x0030,
        clpd: 0x0041,
    }
}

/// The board, and handles to its converters that stay usable after they're given to a scanner.
pub struct Rig {
    pub board: SimBoard,
    pub adcs: [SimAdc; 2],
}

impl Rig {
    pub fn new() -> Rig {
        let board = SimBoard::new();
        for row in 0..ROWS {
            for channel in 0..32 {
                board.set_level(row, channel, level(row, channel));
            }
        }
        let adcs = ConverterId::ALL.map(|id| {
            let mut adc = SimAdc::new(id, &board);
            adc.set_calibration(stages(), CalBehavior::Complete { after: 5 });
            adc
        });
        Rig { board, adcs }
    }

    pub fn adc(&self, id: ConverterId) -> SimAdc {
        self.adcs[id.index()].clone()
    }

    fn sensors(&self) -> [Sensor<SimAdc>; 2] {
        ConverterId::ALL.map(|id| Sensor::new(self.adc(id), REFERENCE_TABLES[id.index()]))
    }

    /// A scanner using the simulated transfer engine.  `prepare` can inject faults before the
    /// engine is handed over.
    pub fn chained(
        &self,
        flags: &'static [CompletionFlag; 2],
        config: ScanConfig,
        prepare: impl FnOnce(&mut SimDma),
    ) -> ChainedScanner {
        let (signal0, wait0) = flags[0].split().unwrap();
        let (signal1, wait1) = flags[1].split().unwrap();
        let mut engine = SimDma::new(self.adcs.clone(), [signal0, signal1]);
        prepare(&mut engine);

        Scanner::new(
            self.sensors(),
            [wait0, wait1],
            Some(Transfers {
                engine,
                slots: SLOTS,
            }),
            SimMatrix::new(&self.board),
            SimDelay::new(),
            config,
        )
    }

    /// A scanner with no transfer engine at all.
    pub fn without_engine(
        &self,
        flags: &'static [CompletionFlag; 2],
        config: ScanConfig,
    ) -> PollingScanner {
        let waits: [CompletionWait; 2] = [
            flags[0].split().unwrap().1,
            flags[1].split().unwrap().1,
        ];
        Scanner::new(
            self.sensors(),
            waits,
            None,
            SimMatrix::new(&self.board),
            SimDelay::new(),
            config,
        )
    }
}

/// A sink that remembers what it was told.
#[derive(Default)]
pub struct Recorder {
    pub ready: usize,
    pub errors: Vec<Error>,
    pub last: Option<[ResultMatrix; 2]>,
}

impl SampleSink for Recorder {
    fn samples_ready(&mut self, store: &ResultStore) {
        self.ready += 1;
        self.last = Some(ConverterId::ALL.map(|id| *store.current(id)));
    }

    fn hardware_unavailable(&mut self, error: Error) {
        self.errors.push(error);
    }
}

pub fn setup_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}
