//! Autonomous transfer pipeline.
//!
//! Each converter is fed by two chained transfer descriptors, so a full pass over the channel
//! table runs without the CPU touching individual samples:
//!
//! - The *command* descriptor copies the next selector out of the channel table into the
//!   converter's channel select register, which starts that conversion.
//! - The *result* descriptor is requested by the converter's conversion complete.  It copies the
//!   result register into the next slot of the landing row, and then links to the command
//!   descriptor, which issues the next selector.
//!
//! The command descriptor is started once by software, and after that only steps when the result
//! descriptor links to it.  This keeps it exactly one selector ahead of the results at most: a
//! selector is never replaced before its conversion has been collected.  It doesn't depend on how
//! the engine prioritizes the two channels.
//!
//! After `table.len()` results, the result descriptor finishes its major loop: it rewinds the
//! landing address, re-arms its count, and interrupts.  The interrupt raises the converter's
//! [`CompletionSignal`](crate::completion::CompletionSignal).  The result side is the authority on
//! the pass being complete.

use crate::converter::ChannelTable;
use crate::log::debug;
use crate::{ConverterId, Sample};

/// A hardware transfer channel, holding one descriptor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Slot(pub u8);

/// Where a transfer reads from or writes to.
#[derive(Clone, Copy, Debug)]
pub enum Endpoint {
    /// A converter's channel selector table.
    Table(ChannelTable),
    /// A converter's channel select register.
    ChannelSelect(ConverterId),
    /// A converter's result register.
    Result(ConverterId),
    /// The row of memory results are gathered into for a converter.
    Landing(ConverterId),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ElementSize {
    Bits8,
    Bits16,
}

/// What starts each minor loop of a descriptor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Trigger {
    /// Only software starts, or links from another descriptor.
    Software,
    /// The converter's conversion complete request.
    ConversionComplete(ConverterId),
}

/// What happens at the end of the major loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Completion {
    None,
    /// Raise the transfer complete interrupt.  The counts and addresses re-arm regardless.
    Interrupt,
}

/// An autonomous copy operation.  Strides and rewinds are in elements.
#[derive(Clone, Copy, Debug)]
pub struct TransferDescriptor {
    pub source: Endpoint,
    pub source_stride: i16,
    /// Applied to the source position at the end of the major loop.
    pub source_rewind: i16,
    pub dest: Endpoint,
    pub dest_stride: i16,
    pub dest_rewind: i16,
    pub size: ElementSize,
    /// Elements per major loop.
    pub count: u16,
    pub trigger: Trigger,
    /// Descriptor to step after every minor loop except the last one.
    pub link: Option<Slot>,
    pub completion: Completion,
}

impl TransferDescriptor {
    /// The command half: walk the table into the channel select register.
    pub fn command(converter: ConverterId, table: ChannelTable) -> TransferDescriptor {
        let len = table.len() as i16;
        TransferDescriptor {
            source: Endpoint::Table(table),
            source_stride: 1,
            source_rewind: -len,
            dest: Endpoint::ChannelSelect(converter),
            dest_stride: 0,
            dest_rewind: 0,
            size: ElementSize::Bits8,
            count: len as u16,
            trigger: Trigger::Software,
            link: None,
            completion: Completion::None,
        }
    }

    /// The result half: gather conversions into the landing row, stepping `command` each time.
    pub fn result(converter: ConverterId, len: usize, command: Slot) -> TransferDescriptor {
        let len = len as i16;
        TransferDescriptor {
            source: Endpoint::Result(converter),
            source_stride: 0,
            source_rewind: 0,
            dest: Endpoint::Landing(converter),
            dest_stride: 1,
            dest_rewind: -len,
            size: ElementSize::Bits16,
            count: len as u16,
            trigger: Trigger::ConversionComplete(converter),
            link: Some(command),
            completion: Completion::Interrupt,
        }
    }
}

/// The descriptor slot can't be used as asked (for instance, the engine only supports linking
/// from some of its channels).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotUnavailable(pub Slot);

/// Access to a transfer engine.
pub trait TransferEngine {
    /// Program `slot` with `descriptor`, and enable its hardware requests.
    fn program(&mut self, slot: Slot, descriptor: &TransferDescriptor)
        -> Result<(), SlotUnavailable>;

    /// Re-arm the iteration count of `slot`, and start one minor loop from software.
    fn start(&mut self, slot: Slot);

    /// The iterations left in the current major loop of `slot`.
    fn remaining(&self, slot: Slot) -> u16;

    /// The landing row for `converter`.  Only meaningful once its pass has completed.
    fn landing(&self, converter: ConverterId) -> &[Sample];
}

/// The engine type for boards scanning without one.  It can't be constructed.
#[derive(Debug)]
pub enum NoEngine {}

impl TransferEngine for NoEngine {
    fn program(&mut self, _: Slot, _: &TransferDescriptor) -> Result<(), SlotUnavailable> {
        match *self {}
    }

    fn start(&mut self, _: Slot) {
        match *self {}
    }

    fn remaining(&self, _: Slot) -> u16 {
        match *self {}
    }

    fn landing(&self, _: ConverterId) -> &[Sample] {
        match *self {}
    }
}

/// The pair of descriptors serving one converter.
#[derive(Clone, Copy, Debug)]
pub struct TransferPipeline {
    pub converter: ConverterId,
    pub command: Slot,
    pub result: Slot,
    table: ChannelTable,
}

impl TransferPipeline {
    pub fn new(
        converter: ConverterId,
        table: ChannelTable,
        command: Slot,
        result: Slot,
    ) -> TransferPipeline {
        TransferPipeline {
            converter,
            command,
            result,
            table,
        }
    }

    /// Program both descriptors.  Also used to re-initialize after a stall.
    pub fn install<T: TransferEngine>(&self, engine: &mut T) -> Result<(), SlotUnavailable> {
        engine.program(self.command, &TransferDescriptor::command(self.converter, self.table))?;
        engine.program(
            self.result,
            &TransferDescriptor::result(self.converter, self.table.len(), self.command),
        )?;
        debug!(
            "{}: pipeline installed, command {}, result {}",
            self.converter, self.command.0, self.result.0
        );
        Ok(())
    }

    /// Start a pass.  Completion arrives through the converter's completion signal.
    pub fn trigger<T: TransferEngine>(&self, engine: &mut T) {
        engine.start(self.command);
    }

    /// How many results the current pass still lacks.
    pub fn outstanding<T: TransferEngine>(&self, engine: &T) -> u16 {
        engine.remaining(self.result)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Tracks how far the two halves of a pipeline have got within one pass.
///
/// Engines that can observe the individual steps use this to hold the pipeline to its rules: the
/// command side may lead the result side by one selector at most, and the result side may never
/// gather more than a table's worth.  Breaking either means the descriptors were built wrong, so
/// both panic.
#[derive(Clone, Copy, Debug)]
pub struct PassTracker {
    len: u16,
    issued: u16,
    consumed: u16,
}

impl PassTracker {
    pub fn new(len: u16) -> PassTracker {
        PassTracker {
            len,
            issued: 0,
            consumed: 0,
        }
    }

    /// The command side issued a selector.  Returns its index in the table.
    pub fn issue(&mut self) -> usize {
        assert!(
            self.issued == self.consumed && self.issued < self.len,
            "command lookahead: issued {}, consumed {}",
            self.issued,
            self.consumed
        );
        self.issued += 1;
        self.issued as usize - 1
    }

    /// The result side gathered a sample.  Returns its landing index, and whether that finished
    /// the pass.
    pub fn consume(&mut self) -> (usize, bool) {
        assert!(
            self.consumed < self.len,
            "sample overrun: {} samples into a table of {}",
            self.consumed + 1,
            self.len
        );
        assert!(self.consumed < self.issued, "result gathered before its selector was issued");
        self.consumed += 1;
        (self.consumed as usize - 1, self.consumed == self.len)
    }

    pub fn issued(&self) -> u16 {
        self.issued
    }

    pub fn consumed(&self) -> u16 {
        self.consumed
    }

    /// Results still outstanding in this pass.
    pub fn remaining(&self) -> u16 {
        self.len - self.consumed
    }
}
