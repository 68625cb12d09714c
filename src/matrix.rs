//! The collaborators on either side of the scanner.

use crate::{Error, ResultStore};

/// The strobe and sense lines of the key matrix.
///
/// Which pins these are, and how they're configured electrically, is up to the implementation.
pub trait Matrix {
    /// Configure the pins.  Everything starts out disabled.
    fn setup(&mut self);

    /// Enable or disable the sense lines.
    fn sense(&mut self, enable: bool);

    /// Drive (or release) strobe line `row`.
    fn strobe(&mut self, row: usize, enable: bool);

    /// The current available to the keyboard has changed, in mA.
    fn current_change(&mut self, milliamps: u32);
}

/// Whatever consumes the samples (the key state layer).
pub trait SampleSink {
    /// A full cycle is complete, and `store` holds its samples as current.
    fn samples_ready(&mut self, store: &ResultStore);

    /// The scanner has given up on the hardware.  No samples will arrive until it has been
    /// re-initialized.
    fn hardware_unavailable(&mut self, error: Error);
}

/// A sink that discards everything, for when nothing is listening yet.
pub struct NullSink;

impl SampleSink for NullSink {
    fn samples_ready(&mut self, _store: &ResultStore) {}

    fn hardware_unavailable(&mut self, _error: Error) {}
}
