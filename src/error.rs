//! Acquisition errors.

use core::fmt;

use crate::ConverterId;

/// Everything that can go wrong while calibrating or scanning.
///
/// Overrunning the channel table during an autonomous transfer is not in here.  That can only
/// happen when the descriptors were built wrong, and is treated as a bug (it panics).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    /// The converter never reported the end of its calibration sequence.
    CalibrationTimeout(ConverterId),
    /// The converter finished calibration, but flagged the result as bad.
    CalibrationFailed(ConverterId),
    /// A conversion was requested on a converter with no valid gain correction.
    NotCalibrated(ConverterId),
    /// A row's conversion pass never completed, even after re-initializing the converter.
    AcquisitionStall {
        converter: ConverterId,
        row: usize,
        /// Elements the result transfer still had outstanding when the wait gave up.
        remaining: u16,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::CalibrationTimeout(c) => write!(f, "{}: calibration timed out", c),
            Error::CalibrationFailed(c) => write!(f, "{}: calibration failed", c),
            Error::NotCalibrated(c) => write!(f, "{}: not calibrated", c),
            Error::AcquisitionStall { converter, row, remaining } => write!(
                f,
                "{}: stalled on row {} ({} samples outstanding)",
                converter, row, remaining
            ),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Error::CalibrationTimeout(c) => defmt::write!(fmt, "{}: calibration timed out", c),
            Error::CalibrationFailed(c) => defmt::write!(fmt, "{}: calibration failed", c),
            Error::NotCalibrated(c) => defmt::write!(fmt, "{}: not calibrated", c),
            Error::AcquisitionStall { converter, row, remaining } => defmt::write!(
                fmt,
                "{}: stalled on row {} ({} samples outstanding)",
                converter,
                row,
                remaining
            ),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
