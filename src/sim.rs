//! Simulated hardware.
//!
//! Stand-ins for the converters, the transfer engine, the matrix lines and the delay, so that the
//! scanner can be run off target.  They all hang off a shared [`SimBoard`], which holds the analog
//! level each sense channel sees when a row is strobed, and records how the lines were driven.
//!
//! The simulated transfer engine really executes the descriptors it is given, one step at a time,
//! checking the pipeline rules with a [`PassTracker`] as it goes.

use std::cell::RefCell;
use std::rc::Rc;
use std::vec::Vec;

use embedded_hal::delay::DelayNs;

use crate::calibrate::{CalibrationData, GainCorrection};
use crate::completion::CompletionSignal;
use crate::converter::{ChannelSelector, Converter, Mode, Status};
use crate::matrix::Matrix;
use crate::transfer::{
    Completion, Endpoint, PassTracker, Slot, SlotUnavailable, TransferDescriptor, TransferEngine,
    Trigger,
};
use crate::{ConverterId, Sample, CHANNELS, CONVERTERS, ROWS};

/// Analog inputs per converter.
pub const INPUTS: usize = 32;

/// Something done to the matrix lines.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LineEvent {
    Setup,
    Sense(bool),
    Strobe(usize, bool),
}

#[derive(Debug)]
struct BoardState {
    levels: [[Sample; INPUTS]; ROWS],
    strobed: [bool; ROWS],
    sense: bool,
    trace: Vec<LineEvent>,
    /// The most rows ever strobed at once.
    max_strobed: usize,
    /// Conversions taken with anything other than exactly one row strobed and sense enabled.
    bad_samples: usize,
    current: Option<u32>,
}

/// The shared analog and line state.  Cloning gives another handle to the same board.
#[derive(Clone, Debug)]
pub struct SimBoard(Rc<RefCell<BoardState>>);

impl SimBoard {
    pub fn new() -> SimBoard {
        SimBoard(Rc::new(RefCell::new(BoardState {
            levels: [[0; INPUTS]; ROWS],
            strobed: [false; ROWS],
            sense: false,
            trace: Vec::new(),
            max_strobed: 0,
            bad_samples: 0,
            current: None,
        })))
    }

    /// Set the level input `channel` sees while `row` is strobed.
    pub fn set_level(&self, row: usize, channel: u8, level: Sample) {
        self.0.borrow_mut().levels[row][channel as usize] = level;
    }

    /// The strobed row, if exactly one is.
    pub fn strobed_row(&self) -> Option<usize> {
        let state = self.0.borrow();
        let mut rows = state.strobed.iter().enumerate().filter(|(_, on)| **on);
        match (rows.next(), rows.next()) {
            (Some((row, _)), None) => Some(row),
            _ => None,
        }
    }

    pub fn any_strobed(&self) -> bool {
        self.0.borrow().strobed.iter().any(|&on| on)
    }

    pub fn sense_enabled(&self) -> bool {
        self.0.borrow().sense
    }

    pub fn trace(&self) -> Vec<LineEvent> {
        self.0.borrow().trace.clone()
    }

    pub fn clear_trace(&self) {
        self.0.borrow_mut().trace.clear();
    }

    pub fn max_strobed(&self) -> usize {
        self.0.borrow().max_strobed
    }

    pub fn bad_samples(&self) -> usize {
        self.0.borrow().bad_samples
    }

    pub fn current(&self) -> Option<u32> {
        self.0.borrow().current
    }

    /// What a conversion of `channel` reads right now.
    fn sample(&self, channel: u8) -> Sample {
        let row = self.strobed_row();
        let mut state = self.0.borrow_mut();
        match row {
            Some(row) if state.sense => state.levels[row][channel as usize],
            _ => {
                state.bad_samples += 1;
                0
            }
        }
    }
}

impl Default for SimBoard {
    fn default() -> Self {
        Self::new()
    }
}

/// The matrix lines of a [`SimBoard`].
pub struct SimMatrix(SimBoard);

impl SimMatrix {
    pub fn new(board: &SimBoard) -> SimMatrix {
        SimMatrix(board.clone())
    }
}

impl Matrix for SimMatrix {
    fn setup(&mut self) {
        let mut state = self.0 .0.borrow_mut();
        state.trace.push(LineEvent::Setup);
        state.strobed = [false; ROWS];
        state.sense = false;
    }

    fn sense(&mut self, enable: bool) {
        let mut state = self.0 .0.borrow_mut();
        state.trace.push(LineEvent::Sense(enable));
        state.sense = enable;
    }

    fn strobe(&mut self, row: usize, enable: bool) {
        let mut state = self.0 .0.borrow_mut();
        state.trace.push(LineEvent::Strobe(row, enable));
        state.strobed[row] = enable;
        let count = state.strobed.iter().filter(|&&on| on).count();
        state.max_strobed = state.max_strobed.max(count);
    }

    fn current_change(&mut self, milliamps: u32) {
        self.0 .0.borrow_mut().current = Some(milliamps);
    }
}

/// How the simulated calibration sequence ends.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CalBehavior {
    /// Completes successfully on the given status poll.
    Complete { after: u32 },
    /// Completes on the given poll, with the failure flag set.
    Fail { after: u32 },
    /// Never completes.
    Hang,
}

#[derive(Debug)]
struct AdcState {
    id: ConverterId,
    board: SimBoard,
    powered: bool,
    mode: Option<Mode>,
    gain: GainCorrection,
    /// What the stage registers read now.
    cal_data: CalibrationData,
    /// What the next calibration run leaves in them.
    cal_result: CalibrationData,
    cal_behavior: CalBehavior,
    /// Status polls since calibration started, while it is running.
    cal_polls: Option<u32>,
    status: Status,
    status_reads: u32,
    selections: Vec<u8>,
    result: Sample,
    /// Conversions left before they stop completing.
    hang_after: Option<usize>,
    low_bit_noise: bool,
}

/// A simulated converter.  Cloning gives another handle to the same converter.
#[derive(Clone, Debug)]
pub struct SimAdc(Rc<RefCell<AdcState>>);

impl SimAdc {
    pub fn new(id: ConverterId, board: &SimBoard) -> SimAdc {
        SimAdc(Rc::new(RefCell::new(AdcState {
            id,
            board: board.clone(),
            powered: false,
            mode: None,
            gain: GainCorrection::UNSET,
            cal_data: CalibrationData::default(),
            cal_result: CalibrationData::default(),
            cal_behavior: CalBehavior::Complete { after: 1 },
            cal_polls: None,
            status: Status::empty(),
            status_reads: 0,
            selections: Vec::new(),
            result: 0,
            hang_after: None,
            low_bit_noise: false,
        })))
    }

    /// Set what the next calibration run produces.  The stage registers keep their values until
    /// a run finishes.
    pub fn set_calibration(&mut self, data: CalibrationData, behavior: CalBehavior) {
        let mut state = self.0.borrow_mut();
        state.cal_result = data;
        state.cal_behavior = behavior;
    }

    /// Let `count` more conversions complete, then hang.
    pub fn hang_after(&mut self, count: usize) {
        self.0.borrow_mut().hang_after = Some(count);
    }

    pub fn clear_hang(&mut self) {
        self.0.borrow_mut().hang_after = None;
    }

    /// Set the (invalid) lowest bit of every result.
    pub fn set_low_bit_noise(&mut self, noise: bool) {
        self.0.borrow_mut().low_bit_noise = noise;
    }

    pub fn mode(&self) -> Option<Mode> {
        self.0.borrow().mode
    }

    pub fn is_powered(&self) -> bool {
        self.0.borrow().powered
    }

    pub fn status_reads(&self) -> u32 {
        self.0.borrow().status_reads
    }

    /// Every channel selected so far, in order.
    pub fn selections(&self) -> Vec<u8> {
        self.0.borrow().selections.clone()
    }
}

impl Converter for SimAdc {
    fn id(&self) -> ConverterId {
        self.0.borrow().id
    }

    fn power_on(&mut self) {
        self.0.borrow_mut().powered = true;
    }

    fn set_mode(&mut self, mode: &Mode) {
        self.0.borrow_mut().mode = Some(*mode);
    }

    fn start_calibration(&mut self) {
        let mut state = self.0.borrow_mut();
        state.status = Status::ACTIVE;
        state.cal_polls = Some(0);
    }

    fn status(&self) -> Status {
        let mut state = self.0.borrow_mut();
        state.status_reads += 1;

        if let Some(polls) = state.cal_polls {
            let polls = polls + 1;
            state.cal_polls = Some(polls);
            match state.cal_behavior {
                CalBehavior::Complete { after } if polls >= after => {
                    state.status = Status::COMPLETE;
                    state.cal_polls = None;
                    state.cal_data = state.cal_result;
                }
                CalBehavior::Fail { after } if polls >= after => {
                    state.status = Status::COMPLETE | Status::CAL_FAILED;
                    state.cal_polls = None;
                    state.cal_data = state.cal_result;
                }
                _ => (),
            }
        }

        state.status
    }

    fn calibration_data(&self) -> CalibrationData {
        self.0.borrow().cal_data
    }

    fn gain(&self) -> GainCorrection {
        self.0.borrow().gain
    }

    fn set_gain(&mut self, gain: GainCorrection) {
        self.0.borrow_mut().gain = gain;
    }

    fn select(&mut self, selector: ChannelSelector) {
        let mut state = self.0.borrow_mut();
        state.selections.push(selector.channel());

        if let Some(left) = state.hang_after {
            if left == 0 {
                state.status = Status::ACTIVE;
                return;
            }
            state.hang_after = Some(left - 1);
        }

        let level = state.board.sample(selector.channel());
        state.result = if state.low_bit_noise { level | 1 } else { level };
        state.status = Status::COMPLETE;
    }

    fn result(&mut self) -> Sample {
        let mut state = self.0.borrow_mut();
        state.status.remove(Status::COMPLETE);
        state.result
    }
}

/// One sample landing, as seen by the simulated transfer engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LandingWrite {
    pub converter: ConverterId,
    /// The row strobed at the time.
    pub row: Option<usize>,
    pub index: usize,
    pub channel: u8,
}

#[derive(Clone, Copy, Debug)]
struct SlotState {
    descriptor: TransferDescriptor,
    remaining: u16,
    /// Element offset of whichever end of the transfer moves.
    position: i32,
}

/// Injected failure: after `after` results, stop for `times` passes.
#[derive(Clone, Copy, Debug)]
struct StallPlan {
    after: u16,
    times: u32,
}

const SIM_SLOTS: usize = 16;

/// A simulated transfer engine, wired to simulated converters.
pub struct SimDma {
    adcs: [SimAdc; CONVERTERS],
    signals: [CompletionSignal; CONVERTERS],
    slots: [Option<SlotState>; SIM_SLOTS],
    /// Slots at or above this can't be programmed.
    usable: usize,
    landing: [[Sample; CHANNELS]; CONVERTERS],
    stalls: [Option<StallPlan>; CONVERTERS],
    writes: Vec<LandingWrite>,
    passes: [u32; CONVERTERS],
}

impl SimDma {
    pub fn new(adcs: [SimAdc; CONVERTERS], signals: [CompletionSignal; CONVERTERS]) -> SimDma {
        SimDma {
            adcs,
            signals,
            slots: [None; SIM_SLOTS],
            usable: SIM_SLOTS,
            landing: [[0; CHANNELS]; CONVERTERS],
            stalls: [None; CONVERTERS],
            writes: Vec::new(),
            passes: [0; CONVERTERS],
        }
    }

    /// Limit the usable slots to the first `count`.
    pub fn limit_slots(&mut self, count: usize) {
        self.usable = count;
    }

    /// For the next `times` passes on `converter`, stop after `after` results without completing.
    pub fn stall(&mut self, converter: ConverterId, after: u16, times: u32) {
        self.stalls[converter.index()] = Some(StallPlan { after, times });
    }

    pub fn writes(&self) -> &[LandingWrite] {
        &self.writes
    }

    /// Completed passes on `converter`.
    pub fn passes(&self, converter: ConverterId) -> u32 {
        self.passes[converter.index()]
    }

    fn state(&self, slot: Slot) -> SlotState {
        match self.slots.get(slot.0 as usize).copied().flatten() {
            Some(state) => state,
            None => panic!("slot {} started before being programmed", slot.0),
        }
    }

    /// Find the result descriptor that links back to `command`.
    fn result_for(&self, command: Slot, converter: ConverterId) -> Slot {
        let found = self.slots.iter().position(|s| match s {
            Some(s) => {
                s.descriptor.link == Some(command)
                    && s.descriptor.trigger == Trigger::ConversionComplete(converter)
            }
            None => false,
        });
        match found {
            Some(index) => Slot(index as u8),
            None => panic!("no result descriptor linked to slot {}", command.0),
        }
    }

    /// Run a pass started from the command descriptor in `command`, for as long as the converter
    /// keeps completing conversions.
    fn run(&mut self, command: Slot) {
        let cmd = self.state(command);
        let (table, converter) = match (cmd.descriptor.source, cmd.descriptor.dest) {
            (Endpoint::Table(table), Endpoint::ChannelSelect(converter)) => (table, converter),
            _ => panic!("slot {} is not a command descriptor", command.0),
        };
        let result = self.result_for(command, converter);
        let res = self.state(result);
        let ci = converter.index();

        let mut tracker = PassTracker::new(res.remaining);
        let mut cmd_remaining = cmd.descriptor.count;
        let mut cmd_pos = cmd.position;
        let mut res_remaining = res.remaining;
        let mut res_pos = res.position;

        let stall_at = match self.stalls[ci] {
            Some(plan) if plan.times > 0 => {
                self.stalls[ci] = Some(StallPlan { times: plan.times - 1, ..plan });
                Some(plan.after)
            }
            _ => None,
        };

        loop {
            // Command minor loop: one selector into the converter.
            tracker.issue();
            let selector = match table.get(cmd_pos as usize) {
                Some(selector) => selector,
                None => panic!("command read outside the channel table"),
            };
            self.adcs[ci].select(selector);
            cmd_pos += cmd.descriptor.source_stride as i32;
            cmd_remaining -= 1;
            if cmd_remaining == 0 {
                cmd_pos += cmd.descriptor.source_rewind as i32;
                cmd_remaining = cmd.descriptor.count;
            }

            // The result transfer is only requested by a finished conversion.
            if !self.adcs[ci].status().contains(Status::COMPLETE)
                || stall_at == Some(tracker.consumed())
            {
                break;
            }

            // Result minor loop.
            let value = self.adcs[ci].result();
            let (index, done) = tracker.consume();
            assert_eq!(index as i32, res_pos, "landing out of step with the pass");
            self.landing[ci][res_pos as usize] = value;
            self.writes.push(LandingWrite {
                converter,
                row: self.adcs[ci].0.borrow().board.strobed_row(),
                index,
                channel: selector.channel(),
            });
            res_pos += res.descriptor.dest_stride as i32;
            res_remaining -= 1;

            if res_remaining == 0 {
                assert!(done);
                res_pos += res.descriptor.dest_rewind as i32;
                res_remaining = res.descriptor.count;
                if res.descriptor.completion == Completion::Interrupt {
                    self.signals[ci].raise();
                }
                self.passes[ci] += 1;
                break;
            }
            // Otherwise, the link steps the command descriptor again.
        }

        self.slots[command.0 as usize] = Some(SlotState {
            remaining: cmd_remaining,
            position: cmd_pos,
            ..cmd
        });
        self.slots[result.0 as usize] = Some(SlotState {
            remaining: res_remaining,
            position: res_pos,
            ..res
        });
    }
}

impl TransferEngine for SimDma {
    fn program(
        &mut self,
        slot: Slot,
        descriptor: &TransferDescriptor,
    ) -> Result<(), SlotUnavailable> {
        let index = slot.0 as usize;
        if index >= self.usable {
            return Err(SlotUnavailable(slot));
        }
        self.slots[index] = Some(SlotState {
            descriptor: *descriptor,
            remaining: descriptor.count,
            position: 0,
        });
        Ok(())
    }

    fn start(&mut self, slot: Slot) {
        // Starting re-arms the major loop count.
        let state = self.state(slot);
        self.slots[slot.0 as usize] = Some(SlotState {
            remaining: state.descriptor.count,
            ..state
        });
        self.run(slot);
    }

    fn remaining(&self, slot: Slot) -> u16 {
        match self.slots.get(slot.0 as usize).copied().flatten() {
            Some(state) => state.remaining,
            None => 0,
        }
    }

    fn landing(&self, converter: ConverterId) -> &[Sample] {
        &self.landing[converter.index()]
    }
}

/// A delay that just adds up how long it was asked to wait.
#[derive(Debug, Default)]
pub struct SimDelay {
    total_ns: u64,
}

impl SimDelay {
    pub fn new() -> SimDelay {
        SimDelay::default()
    }

    pub fn total_ns(&self) -> u64 {
        self.total_ns
    }
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += ns as u64;
    }
}
