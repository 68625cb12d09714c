//! BBQ analog sense
//!
//! Acquisition core for analog key matrices.  Each of the [`ROWS`] strobe lines is excited in turn,
//! and while it is driven, every sense line is sampled through one of the two on-chip converters.
//! The raw readings land in a double buffered [`store::ResultStore`], which the key-state layer
//! reads once a full cycle has completed.
//!
//! The hardware is reached through a small number of traits:
//!
//! - [`converter::Converter`] is register level access to one analog to digital converter.
//! - [`transfer::TransferEngine`] programs the autonomous transfer descriptors that feed the
//!   converter its channel selectors, and harvest the results.
//! - [`matrix::Matrix`] drives the strobe and sense lines themselves.
//!
//! The [`sim`] module provides simulated versions of all of these, so that the scanner can be
//! exercised off target.

#![cfg_attr(not(any(feature = "std", test)), no_std)]
// #![deny(missing_docs)]

#[cfg(not(any(feature = "std", test)))]
extern crate core as std;

pub mod budget;
pub mod calibrate;
pub mod completion;
pub mod config;
pub mod converter;
pub mod error;
pub mod matrix;
pub mod scan;
pub mod sequencer;
pub mod shell;
pub mod store;
pub mod transfer;

#[cfg(any(feature = "std", test))]
pub mod sim;

#[cfg(test)]
mod testlog;

pub use config::{ScanConfig, StrategyKind};
pub use converter::{ChannelSelector, ChannelTable, ConverterId};
pub use error::Error;
pub use scan::Scanner;
pub use store::ResultStore;

/// The number of strobe rows in the matrix.
pub const ROWS: usize = 8;

/// The number of sense channels sampled by each converter for every row.
pub const CHANNELS: usize = 16;

/// The number of converters sampling the matrix.
pub const CONVERTERS: usize = 2;

/// A single raw reading from a converter.
pub type Sample = u16;

cfg_if::cfg_if! {
    if #[cfg(feature = "defmt")] {
        mod log {
            pub use defmt::{debug, info, warn};
        }
    } else if #[cfg(any(feature = "log", test))] {
        mod log {
            pub use log::{debug, info, warn};
        }
    } else {
        // Without a logging backend, still evaluate nothing, but accept the same syntax.
        mod log {
            macro_rules! discard {
                ($($arg:tt)*) => {{}};
            }
            pub(crate) use discard as debug;
            pub(crate) use discard as info;
            pub(crate) use discard as warn;
        }
    }
}
