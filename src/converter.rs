//! Converter access.
//!
//! The [`Converter`] trait is the register level view of one analog to digital converter.  The
//! calibration engine and sequencer are written entirely in terms of it, so the register block
//! itself can live in the board crate (or be simulated, see [`crate::sim`]).

use core::fmt;

use bitflags::bitflags;

use crate::calibrate::{CalibrationData, GainCorrection};
use crate::{Sample, CHANNELS, CONVERTERS};

/// Which of the converters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConverterId {
    Adc0,
    Adc1,
}

impl ConverterId {
    pub const ALL: [ConverterId; CONVERTERS] = [ConverterId::Adc0, ConverterId::Adc1];

    pub fn index(self) -> usize {
        match self {
            ConverterId::Adc0 => 0,
            ConverterId::Adc1 => 1,
        }
    }
}

impl fmt::Display for ConverterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConverterId::Adc0 => write!(f, "adc0"),
            ConverterId::Adc1 => write!(f, "adc1"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ConverterId {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            ConverterId::Adc0 => defmt::write!(fmt, "adc0"),
            ConverterId::Adc1 => defmt::write!(fmt, "adc1"),
        }
    }
}

/// The value written to a converter's channel select register.
///
/// The low five bits pick the analog input; writing the selector starts a conversion.  Bit 6
/// requests a conversion complete interrupt, which is only wanted for diagnostics, since the
/// transfer engine consumes the completion itself.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelSelector(u8);

impl ChannelSelector {
    const CHANNEL: u8 = 0x1f;
    const INTERRUPT: u8 = 0x40;

    /// Selecting this channel powers the converter down.
    pub const DISABLED: ChannelSelector = ChannelSelector(Self::CHANNEL);

    pub const fn new(channel: u8) -> ChannelSelector {
        ChannelSelector(channel & Self::CHANNEL)
    }

    pub const fn with_interrupt(self) -> ChannelSelector {
        ChannelSelector(self.0 | Self::INTERRUPT)
    }

    pub const fn channel(self) -> u8 {
        self.0 & Self::CHANNEL
    }

    pub const fn interrupt(self) -> bool {
        self.0 & Self::INTERRUPT != 0
    }

    /// The raw register value.
    pub const fn bits(self) -> u8 {
        self.0
    }
}

/// The ordered list of channels a converter samples for each row.
///
/// The transfer engine reads the selectors straight out of this table, so it has to be static.
/// The order here is the sampling order, and also the order the results are stored in.  It says
/// nothing about wiring.
#[derive(Clone, Copy, Debug)]
pub struct ChannelTable(&'static [ChannelSelector]);

impl ChannelTable {
    pub const fn new(selectors: &'static [ChannelSelector]) -> ChannelTable {
        assert!(!selectors.is_empty() && selectors.len() <= CHANNELS);
        ChannelTable(selectors)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<ChannelSelector> {
        self.0.get(index).copied()
    }

    pub fn selectors(&self) -> &'static [ChannelSelector] {
        self.0
    }
}

bitflags! {
    /// Converter status, as reported by the hardware.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct Status: u8 {
        /// A conversion (or the calibration sequence) has finished.
        const COMPLETE = 0b0000_0001;
        /// The calibration sequence finished, but the result is not usable.
        const CAL_FAILED = 0b0000_0010;
        /// A conversion is in progress.
        const ACTIVE = 0b0000_0100;
    }
}

bitflags! {
    /// Configuration options for the converter.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct ModeFlags: u8 {
        /// Use the converter's own asynchronous clock.
        const ASYNC_CLOCK = 0b0000_0001;
        /// High speed conversion sequence.
        const HIGH_SPEED = 0b0000_0010;
        /// Use the 'b' input mux for the shared channel numbers.
        const MUX_B = 0b0000_0100;
        /// Completed conversions raise a transfer request instead of waiting to be read.
        const TRANSFER_REQUESTS = 0b0000_1000;
    }
}

/// Resolution of a single conversion.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Resolution {
    Bits8,
    Bits10,
    Bits12,
    Bits16,
}

/// How long the input is sampled before conversion.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SampleTime {
    Short,
    /// Long sample, total converter clocks.
    Long24,
    Long16,
    Long10,
    Long6,
}

/// Hardware averaging of consecutive conversions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Averaging {
    Off,
    X4,
    X8,
    X16,
    X32,
}

/// Voltage reference selection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reference {
    /// The alternate reference pair, used while calibrating.
    Alternate,
    /// The on-chip regulated reference.
    Internal,
}

/// A complete converter configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Mode {
    pub resolution: Resolution,
    pub sample_time: SampleTime,
    pub averaging: Averaging,
    pub reference: Reference,
    pub flags: ModeFlags,
}

impl Mode {
    /// Settings for running the calibration sequence: software triggered, no transfer requests,
    /// slow and heavily averaged for noise rejection.
    pub const fn calibration() -> Mode {
        Mode {
            resolution: Resolution::Bits10,
            sample_time: SampleTime::Long24,
            averaging: Averaging::X32,
            reference: Reference::Alternate,
            flags: ModeFlags::ASYNC_CLOCK
                .union(ModeFlags::HIGH_SPEED)
                .union(ModeFlags::MUX_B),
        }
    }

    /// Settings for scanning: single shot, no averaging, fast sampling on the internal reference.
    /// With `transfers`, each completed conversion requests the result transfer.
    pub const fn conversion(transfers: bool) -> Mode {
        let flags = ModeFlags::ASYNC_CLOCK
            .union(ModeFlags::HIGH_SPEED)
            .union(ModeFlags::MUX_B);
        Mode {
            resolution: Resolution::Bits12,
            sample_time: SampleTime::Short,
            averaging: Averaging::Off,
            reference: Reference::Internal,
            flags: if transfers {
                flags.union(ModeFlags::TRANSFER_REQUESTS)
            } else {
                flags
            },
        }
    }
}

/// Register level access to one converter.
pub trait Converter {
    fn id(&self) -> ConverterId;

    /// Gate the converter's clock on and enable its reference.
    fn power_on(&mut self);

    fn set_mode(&mut self, mode: &Mode);

    /// Begin the self calibration sequence with the current mode.
    fn start_calibration(&mut self);

    fn status(&self) -> Status;

    /// The per-stage values the calibration sequence left behind.
    fn calibration_data(&self) -> CalibrationData;

    fn gain(&self) -> GainCorrection;

    fn set_gain(&mut self, gain: GainCorrection);

    /// Write the channel select register, which starts a conversion.
    fn select(&mut self, selector: ChannelSelector);

    /// Read the result register.  This clears [`Status::COMPLETE`].
    fn result(&mut self) -> Sample;
}

#[test]
fn test_selector_bits() {
    let sel = ChannelSelector::new(19).with_interrupt();
    assert_eq!(sel.channel(), 19);
    assert!(sel.interrupt());
    assert_eq!(sel.bits(), 0x53);
    assert_eq!(ChannelSelector::new(0x3f).channel(), 0x1f);
    assert!(!ChannelSelector::new(4).interrupt());
}
