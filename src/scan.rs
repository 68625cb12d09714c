//! The acquisition cycle.
//!
//! A cycle strobes each of the [`ROWS`] rows in turn:
//!
//! ```text
//! Idle -> Strobe(0) -> Strobe(1) -> ... -> Strobe(7) -> Idle
//! ```
//!
//! For each row, sense is enabled and the row strobed, both converters run a full pass over their
//! channel tables, and then the strobe and sense are released and the row allowed to settle
//! before the next one is driven.  Only one row is ever strobed at a time.
//!
//! Nothing here waits without a budget.  A row whose pass doesn't complete is retried, with the
//! converters and descriptors re-initialized, a configured number of times.  After that the cycle
//! is abandoned, the matrix lines are forced off, and the sink is told the hardware is unavailable.

use embedded_hal::delay::DelayNs;

use crate::budget::Budget;
use crate::calibrate::Calibration;
use crate::completion::CompletionWait;
use crate::config::{ScanConfig, StrategyKind};
use crate::converter::Converter;
use crate::log::{debug, info, warn};
use crate::matrix::{Matrix, SampleSink};
use crate::sequencer::Sensor;
use crate::store::ResultStore;
use crate::transfer::{Slot, SlotUnavailable, TransferEngine, TransferPipeline};
use crate::{ConverterId, Error, CHANNELS, CONVERTERS, ROWS};

/// Where the scanner is within a cycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    Idle,
    Strobe(usize),
}

/// A row pass that didn't complete within its budget.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Stall {
    pub converter: ConverterId,
    pub row: usize,
    /// Results still outstanding when the wait gave up.
    pub remaining: u16,
}

impl From<Stall> for Error {
    fn from(stall: Stall) -> Error {
        Error::AcquisitionStall {
            converter: stall.converter,
            row: stall.row,
            remaining: stall.remaining,
        }
    }
}

/// Stalls remembered per cycle, including ones a retry recovered from.
pub const MAX_STALLS: usize = 8;

/// A transfer engine, and the (command, result) slots for each converter's pipeline.
pub struct Transfers<T> {
    pub engine: T,
    pub slots: [(Slot, Slot); CONVERTERS],
}

enum Strategy<T> {
    TransferChained {
        engine: T,
        pipelines: [TransferPipeline; CONVERTERS],
    },
    PollingSequential,
}

pub struct Scanner<A, T, M, D> {
    sensors: [Sensor<A>; CONVERTERS],
    flags: [CompletionWait; CONVERTERS],
    strategy: Strategy<T>,
    config: ScanConfig,
    matrix: M,
    delay: D,
    store: ResultStore,
    state: State,
    /// The converters are configured for scanning, and the descriptors installed.
    armed: bool,
    /// Cycles since the output layer last caught up.
    scan_count: u16,
    stalls: heapless::Vec<Stall, MAX_STALLS>,
    /// Stalls this cycle that didn't fit in `stalls`.
    stalls_dropped: u32,
}

impl<A, T, M, D> Scanner<A, T, M, D>
where
    A: Converter,
    T: TransferEngine,
    M: Matrix,
    D: DelayNs,
{
    /// Build a scanner.  `sensors` and `flags` are indexed by [`ConverterId::index`].
    ///
    /// Asking for the transfer strategy without supplying `transfers` falls back to polling, with
    /// the polling timings.
    ///
    /// # Panics
    ///
    /// If `sensors` isn't in [`ConverterId::ALL`] order.
    pub fn new(
        sensors: [Sensor<A>; CONVERTERS],
        flags: [CompletionWait; CONVERTERS],
        transfers: Option<Transfers<T>>,
        matrix: M,
        delay: D,
        config: ScanConfig,
    ) -> Self {
        for (i, sensor) in sensors.iter().enumerate() {
            assert_eq!(sensor.id().index(), i, "sensors out of order");
        }

        let (strategy, config) = match (config.strategy, transfers) {
            (StrategyKind::TransferChained, Some(transfers)) => {
                let pipelines = core::array::from_fn(|i| {
                    let (command, result) = transfers.slots[i];
                    TransferPipeline::new(sensors[i].id(), sensors[i].table(), command, result)
                });
                let strategy = Strategy::TransferChained {
                    engine: transfers.engine,
                    pipelines,
                };
                (strategy, config)
            }
            (StrategyKind::TransferChained, None) => {
                warn!("No transfer engine, scanning by polling");
                (Strategy::PollingSequential, polling_fallback(&config))
            }
            (StrategyKind::PollingSequential, _) => (Strategy::PollingSequential, config),
        };

        Scanner {
            sensors,
            flags,
            strategy,
            config,
            matrix,
            delay,
            store: ResultStore::new(),
            state: State::Idle,
            armed: false,
            scan_count: 0,
            stalls: heapless::Vec::new(),
            stalls_dropped: 0,
        }
    }

    /// Bring everything up: the matrix pins, then calibration of every converter, then the
    /// scanning configuration.
    ///
    /// Both converters are calibrated even if the first fails, so both show up in the log.  The
    /// first failure is returned, and scanning refuses to run until a calibration succeeds.
    pub fn setup(&mut self) -> Result<(), Error> {
        self.matrix.setup();
        self.reset();

        let budget = self.config.calibration_budget;
        let mut result = Ok(());
        for sensor in self.sensors.iter_mut() {
            sensor.power_on();
            if let Err(err) = sensor.calibrate(budget) {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result?;

        self.arm()?;
        info!("Scanner ready, {} strategy", strategy_name(self.strategy_kind()));
        Ok(())
    }

    /// Configure the converters for scanning and install the transfer descriptors.
    ///
    /// If the engine can't take the descriptors, the scanner permanently drops to polling.
    fn arm(&mut self) -> Result<(), Error> {
        let transfers = matches!(self.strategy, Strategy::TransferChained { .. });
        for sensor in self.sensors.iter_mut() {
            sensor.configure(transfers)?;
        }

        let unavailable = match &mut self.strategy {
            Strategy::TransferChained { engine, pipelines } => pipelines
                .iter()
                .map(|pipeline| pipeline.install(engine))
                .find_map(|res| res.err()),
            Strategy::PollingSequential => None,
        };

        if let Some(SlotUnavailable(slot)) = unavailable {
            warn!("Transfer slot {} unavailable, scanning by polling", slot.0);
            self.strategy = Strategy::PollingSequential;
            self.config = polling_fallback(&self.config);
            for sensor in self.sensors.iter_mut() {
                sensor.configure(false)?;
            }
        }

        for flag in self.flags.iter_mut() {
            flag.clear();
        }
        self.armed = true;
        Ok(())
    }

    /// Run one full cycle, retrying stalled rows as configured.
    pub fn scan(&mut self, sink: &mut impl SampleSink) -> Result<(), Error> {
        let retries = self.config.stall_retries;
        self.scan_with_retries(sink, retries)
    }

    /// Run one full cycle, retrying each stalled row up to `retries` times.
    ///
    /// On success, the samples are current in the store and `sink` has been told.  On failure
    /// the scanner has been reset, and will re-initialize the converters on the next cycle.
    pub fn scan_with_retries(
        &mut self,
        sink: &mut impl SampleSink,
        retries: u8,
    ) -> Result<(), Error> {
        if !self.armed {
            self.arm()?;
        }

        self.stalls.clear();
        self.stalls_dropped = 0;
        self.store.swap();

        for row in 0..ROWS {
            self.state = State::Strobe(row);
            if let Err(err) = self.row_with_retries(row, retries) {
                warn!("Scan abandoned: {}", err);
                self.store.revert_swap();
                self.reset();
                self.armed = false;
                sink.hardware_unavailable(err);
                return Err(err);
            }
        }

        self.state = State::Idle;
        self.scan_count = self.scan_count.wrapping_add(1);
        sink.samples_ready(&self.store);
        Ok(())
    }

    fn row_with_retries(&mut self, row: usize, retries: u8) -> Result<(), Error> {
        let mut attempt = 0;
        loop {
            let stall = match self.row(row) {
                Ok(()) => return Ok(()),
                Err(stall) => stall,
            };

            if self.stalls.push(stall).is_err() {
                self.stalls_dropped += 1;
            }
            if attempt == retries {
                return Err(stall.into());
            }
            attempt += 1;
            warn!(
                "{}: row {} stalled with {} outstanding, re-initializing (attempt {})",
                stall.converter, row, stall.remaining, attempt
            );
            self.arm()?;
        }
    }

    /// Strobe a single row and sample it.
    fn row(&mut self, row: usize) -> Result<(), Stall> {
        self.matrix.sense(true);
        self.matrix.strobe(row, true);

        let res = match &mut self.strategy {
            Strategy::TransferChained { engine, pipelines } => chained_pass(
                engine,
                pipelines,
                &mut self.flags,
                &mut self.store,
                row,
                self.config.completion_budget,
            ),
            Strategy::PollingSequential => polled_pass(
                &mut self.sensors,
                &mut self.store,
                &mut self.delay,
                row,
                &self.config,
            ),
        };

        self.matrix.strobe(row, false);
        self.matrix.sense(false);
        self.delay.delay_us(self.config.row_settle_us);
        res
    }

    /// Force every strobe and the sense lines off, and return to idle.
    pub fn reset(&mut self) {
        for row in 0..ROWS {
            self.matrix.strobe(row, false);
        }
        self.matrix.sense(false);
        for flag in self.flags.iter_mut() {
            flag.clear();
        }
        self.state = State::Idle;
    }

    /// Re-run calibration on one converter.  The sample buffers are left alone; the converters
    /// are reconfigured at the start of the next cycle.
    pub fn recalibrate(&mut self, converter: ConverterId) -> Result<Calibration, Error> {
        self.armed = false;
        let budget = self.config.calibration_budget;
        self.sensors[converter.index()].calibrate(budget)
    }

    /// The output layer has dealt with everything scanned so far.
    pub fn finished_with_output(&mut self) {
        self.scan_count = 0;
    }

    /// Pass a change in available current on to the matrix.
    pub fn current_change(&mut self, milliamps: u32) {
        debug!("Current change: {} mA", milliamps);
        self.matrix.current_change(milliamps);
    }

    /// The remaining counts of each converter's (command, result) descriptors, if the transfer
    /// strategy is in use.
    pub fn transfer_counters(&self) -> Option<[(u16, u16); CONVERTERS]> {
        match &self.strategy {
            Strategy::TransferChained { engine, pipelines } => Some(core::array::from_fn(|i| {
                (
                    engine.remaining(pipelines[i].command),
                    engine.remaining(pipelines[i].result),
                )
            })),
            Strategy::PollingSequential => None,
        }
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        match self.strategy {
            Strategy::TransferChained { .. } => StrategyKind::TransferChained,
            Strategy::PollingSequential => StrategyKind::PollingSequential,
        }
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn sensor(&self, converter: ConverterId) -> &Sensor<A> {
        &self.sensors[converter.index()]
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn scan_count(&self) -> u16 {
        self.scan_count
    }

    /// Stalls seen during the last cycle, whether or not a retry recovered them.  Only the first
    /// [`MAX_STALLS`] are kept.
    pub fn stalls(&self) -> &[Stall] {
        &self.stalls
    }

    /// How many stalls the last cycle had beyond those in [`stalls`](Self::stalls).
    pub fn stalls_dropped(&self) -> u32 {
        self.stalls_dropped
    }

    pub fn matrix(&self) -> &M {
        &self.matrix
    }

    /// The transfer engine, while the transfer strategy is in use.
    pub fn engine(&self) -> Option<&T> {
        match &self.strategy {
            Strategy::TransferChained { engine, .. } => Some(engine),
            Strategy::PollingSequential => None,
        }
    }
}

/// Run one row's pass on both converters through the transfer engine.
fn chained_pass<T: TransferEngine>(
    engine: &mut T,
    pipelines: &[TransferPipeline; CONVERTERS],
    flags: &mut [CompletionWait; CONVERTERS],
    store: &mut ResultStore,
    row: usize,
    budget: Budget,
) -> Result<(), Stall> {
    for flag in flags.iter_mut() {
        flag.clear();
    }
    for pipeline in pipelines {
        pipeline.trigger(engine);
    }

    if budget
        .spin_until(|| flags.iter().all(|flag| flag.is_set()))
        .is_err()
    {
        let index = flags.iter().position(|flag| !flag.is_set()).unwrap_or(0);
        let pipeline = &pipelines[index];
        return Err(Stall {
            converter: pipeline.converter,
            row,
            remaining: pipeline.outstanding(engine),
        });
    }

    for pipeline in pipelines {
        let landing = engine.landing(pipeline.converter);
        store.record_row(pipeline.converter, row, &landing[..pipeline.len()]);
    }
    Ok(())
}

/// Run one row's pass on each converter in turn, by polling.
fn polled_pass<A: Converter, D: DelayNs>(
    sensors: &mut [Sensor<A>; CONVERTERS],
    store: &mut ResultStore,
    delay: &mut D,
    row: usize,
    config: &ScanConfig,
) -> Result<(), Stall> {
    for sensor in sensors.iter_mut() {
        let converter = sensor.id();
        let len = sensor.table().len();
        let mut samples = [0; CHANNELS];
        sensor
            .poll_pass(
                &mut samples[..len],
                config.completion_budget,
                config.channel_settle_us,
                delay,
            )
            .map_err(|stall| Stall {
                converter,
                row,
                remaining: (len - stall.index) as u16,
            })?;
        store.record_row(converter, row, &samples[..len]);
    }
    Ok(())
}

/// The polling preset, keeping the calibration and retry settings that aren't about timing.
fn polling_fallback(config: &ScanConfig) -> ScanConfig {
    ScanConfig {
        calibration_budget: config.calibration_budget,
        stall_retries: config.stall_retries,
        ..ScanConfig::polling_sequential()
    }
}

fn strategy_name(kind: StrategyKind) -> &'static str {
    match kind {
        StrategyKind::TransferChained => "transfer chained",
        StrategyKind::PollingSequential => "polling",
    }
}
