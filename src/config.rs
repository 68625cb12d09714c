//! Scanner configuration.
//!
//! The matrix geometry is fixed at compile time (see [`crate::ROWS`] and [`crate::CHANNELS`]).
//! What can vary per board is captured in [`ScanConfig`], which is CBOR encoded so it can be kept
//! in a fixed flash page next to the board information.
//!
//! The two strategies are not timing equivalent.  Each has its own preset, and the presets are
//! used whole: mixing the settle time of one with the other gives a scanner that was never
//! characterized.

use minicbor::{Decode, Encode};

use crate::budget::Budget;
use crate::converter::{ChannelSelector, ChannelTable};
use crate::log::warn;
use crate::CHANNELS;

/// How each converter walks its channel table.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Encode, Decode)]
#[cbor(index_only)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StrategyKind {
    /// The transfer engine feeds selectors and gathers results; the CPU only waits for the pass.
    #[n(0)]
    TransferChained,
    /// The CPU starts each conversion and spins for its result.
    #[n(1)]
    PollingSequential,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Encode, Decode)]
#[cbor(map)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanConfig {
    #[n(1)]
    pub strategy: StrategyKind,
    /// Delay after releasing a strobe, before the next row is driven.
    #[n(2)]
    pub row_settle_us: u32,
    /// Delay between polled conversions.  Unused by the transfer strategy.
    #[n(3)]
    pub channel_settle_us: u32,
    #[n(4)]
    pub calibration_budget: Budget,
    /// For the transfer strategy, the wait for a whole pass; when polling, for each conversion.
    #[n(5)]
    pub completion_budget: Budget,
    /// How many times a stalled row is retried, re-initializing the converter each time, before
    /// the hardware is declared unavailable.
    #[n(6)]
    pub stall_retries: u8,
}

impl ScanConfig {
    pub const fn transfer_chained() -> ScanConfig {
        ScanConfig {
            strategy: StrategyKind::TransferChained,
            row_settle_us: 200,
            channel_settle_us: 0,
            calibration_budget: Budget::iterations(100_000),
            completion_budget: Budget::iterations(10_000),
            stall_retries: 2,
        }
    }

    pub const fn polling_sequential() -> ScanConfig {
        ScanConfig {
            strategy: StrategyKind::PollingSequential,
            row_settle_us: 3,
            channel_settle_us: 3,
            calibration_budget: Budget::iterations(100_000),
            completion_budget: Budget::iterations(1_000),
            stall_retries: 2,
        }
    }

    /// The preset for `kind`.
    pub const fn preset(kind: StrategyKind) -> ScanConfig {
        match kind {
            StrategyKind::TransferChained => Self::transfer_chained(),
            StrategyKind::PollingSequential => Self::polling_sequential(),
        }
    }

    /// Decode a stored configuration.  Returns None (and logs why) if it doesn't decode.
    pub fn decode(buffer: &[u8]) -> Option<ScanConfig> {
        match minicbor::decode(buffer) {
            Ok(config) => Some(config),
            Err(_) => {
                warn!("Fail to read ScanConfig, using defaults");
                None
            }
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::transfer_chained()
    }
}

const fn selectors(channels: [u8; CHANNELS]) -> [ChannelSelector; CHANNELS] {
    let mut result = [ChannelSelector::DISABLED; CHANNELS];
    let mut i = 0;
    while i < CHANNELS {
        result[i] = ChannelSelector::new(channels[i]);
        i += 1;
    }
    result
}

// The sense lines alternate with channel 19, the grounded differential input, which drains the
// sample capacitor between neighbouring lines.
static ADC0_SELECTORS: [ChannelSelector; CHANNELS] =
    selectors([4, 19, 15, 19, 7, 19, 6, 19, 12, 19, 13, 19, 14, 19, 5, 19]);
static ADC1_SELECTORS: [ChannelSelector; CHANNELS] =
    selectors([19, 9, 19, 8, 19, 5, 19, 4, 19, 6, 19, 7, 19, 0, 19, 3]);

/// The channel tables for the reference board, indexed by converter.
pub static REFERENCE_TABLES: [ChannelTable; 2] = [
    ChannelTable::new(&ADC0_SELECTORS),
    ChannelTable::new(&ADC1_SELECTORS),
];
