//! Converter self calibration.
//!
//! The converters can measure their own front end against the reference, leaving a set of
//! per-stage correction values behind.  The hardware doesn't apply these to the gain itself, so
//! after the sequence finishes the gain word has to be derived from the stage values and written
//! back by hand.

use crate::budget::{Budget, Exhausted};
use crate::converter::{Converter, Mode, Status};
use crate::log::{debug, info, warn};
use crate::Error;

/// The plus side stage values left by the calibration sequence.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationData {
    pub clp0: u16,
    pub clp1: u16,
    pub clp2: u16,
    pub clp3: u16,
    pub clp4: u16,
    pub clps: u16,
    /// Differential stage.  Not part of the single ended gain, but shown in diagnostics.
    pub clpd: u16,
}

impl CalibrationData {
    /// Derive the plus side gain: half the sum of the single ended stages, marked valid.
    pub fn plus_gain(&self) -> GainCorrection {
        let sum = self.clp0 as u32
            + self.clp1 as u32
            + self.clp2 as u32
            + self.clp3 as u32
            + self.clp4 as u32
            + self.clps as u32;
        GainCorrection::from_bits((sum / 2) as u16 | GainCorrection::VALID)
    }
}

/// The gain correction word.  Bit 15 marks a word derived from a successful calibration.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GainCorrection(u16);

impl GainCorrection {
    const VALID: u16 = 0x8000;

    /// No calibration has produced a gain.
    pub const UNSET: GainCorrection = GainCorrection(0);

    pub const fn from_bits(bits: u16) -> GainCorrection {
        GainCorrection(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 & Self::VALID != 0
    }
}

/// The outcome of a successful calibration run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Calibration {
    pub gain: GainCorrection,
    pub data: CalibrationData,
    /// Polls left in the budget when the sequence finished.
    pub spare: u32,
}

/// Run the calibration sequence on `adc`, and install the derived gain.
///
/// The hardware failure flag and running out of `budget` are reported separately.  If the failure
/// flag is set it wins, since the hardware has told us outright the values are bad.  On either
/// failure the converter's gain is cleared, so nothing can carry on with a stale one.
pub fn calibrate<A: Converter>(adc: &mut A, budget: Budget) -> Result<Calibration, Error> {
    let id = adc.id();

    adc.set_mode(&Mode::calibration());
    debug!("{}: calibration start", id);
    adc.start_calibration();

    let waited = budget.spin_until(|| adc.status().contains(Status::COMPLETE));

    if adc.status().contains(Status::CAL_FAILED) {
        warn!("{}: calibration failed", id);
        adc.set_gain(GainCorrection::UNSET);
        return Err(Error::CalibrationFailed(id));
    }

    let spare = match waited {
        Ok(spare) => spare,
        Err(Exhausted) => {
            warn!("{}: calibration timed out after {} polls", id, budget.get());
            adc.set_gain(GainCorrection::UNSET);
            return Err(Error::CalibrationTimeout(id));
        }
    };

    let data = adc.calibration_data();
    let gain = data.plus_gain();
    adc.set_gain(gain);
    info!("{}: calibrated, gain {:#x}, {} polls spare", id, gain.bits(), spare);

    Ok(Calibration { gain, data, spare })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{CalBehavior, SimAdc, SimBoard};
    use crate::ConverterId;

    fn stages() -> CalibrationData {
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

    #[test]
    fn test_gain_derivation() {
        // 0x1f30 / 2 = 0xf98
        assert_eq!(stages().plus_gain().bits(), 0x8f98);
        assert!(stages().plus_gain().is_valid());
        assert!(!GainCorrection::UNSET.is_valid());
    }

    #[test]
    fn test_calibrate_success() {
        crate::testlog::setup();

        let board = SimBoard::new();
        let mut adc = SimAdc::new(ConverterId::Adc0, &board);
        adc.set_calibration(stages(), CalBehavior::Complete { after: 20 });

        let cal = calibrate(&mut adc, Budget::iterations(100)).unwrap();
        assert_eq!(cal.gain.bits(), 0x8f98);
        assert_eq!(cal.data, stages());
        assert_eq!(adc.gain(), cal.gain);
        assert_eq!(adc.mode(), Some(Mode::calibration()));
    }

    #[test]
    fn test_calibrate_timeout() {
        crate::testlog::setup();

        let board = SimBoard::new();
        let mut adc = SimAdc::new(ConverterId::Adc1, &board);
        adc.set_gain(GainCorrection::from_bits(0x8123));
        adc.set_calibration(stages(), CalBehavior::Hang);

        let res = calibrate(&mut adc, Budget::iterations(1000));
        assert_eq!(res, Err(Error::CalibrationTimeout(ConverterId::Adc1)));
        // Polled exactly once per budget step, plus the initial check.
        assert_eq!(adc.status_reads(), 1001 + 1);
        assert!(!adc.gain().is_valid());
    }

    #[test]
    fn test_calibrate_failed() {
        crate::testlog::setup();

        let board = SimBoard::new();
        let mut adc = SimAdc::new(ConverterId::Adc0, &board);
        adc.set_gain(GainCorrection::from_bits(0x8123));
        adc.set_calibration(stages(), CalBehavior::Fail { after: 3 });

        let res = calibrate(&mut adc, Budget::iterations(1000));
        assert_eq!(res, Err(Error::CalibrationFailed(ConverterId::Adc0)));
        assert!(!adc.gain().is_valid());
    }
}
