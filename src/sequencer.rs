//! Conversion sequencing.
//!
//! A [`Sensor`] is one converter together with the channel table it walks and the calibration it
//! was last given.  It refuses to be configured for scanning without a valid gain.
//!
//! When the transfer pipeline isn't in use, [`Sensor::poll_pass`] walks the table by hand.

use embedded_hal::delay::DelayNs;

use crate::budget::Budget;
use crate::calibrate::{self, Calibration};
use crate::converter::{ChannelTable, Converter, Mode, Status};
use crate::log::{debug, warn};
use crate::{ConverterId, Error, Sample};

pub struct Sensor<A> {
    adc: A,
    table: ChannelTable,
    calibration: Option<Calibration>,
}

/// A polled conversion never completed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PollStall {
    /// Index into the channel table of the conversion that hung.
    pub index: usize,
}

impl<A: Converter> Sensor<A> {
    pub fn new(adc: A, table: ChannelTable) -> Sensor<A> {
        Sensor {
            adc,
            table,
            calibration: None,
        }
    }

    pub fn id(&self) -> ConverterId {
        self.adc.id()
    }

    pub fn table(&self) -> ChannelTable {
        self.table
    }

    /// The calibration in force, if the last run succeeded.
    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    pub fn adc(&self) -> &A {
        &self.adc
    }

    pub fn adc_mut(&mut self) -> &mut A {
        &mut self.adc
    }

    pub fn power_on(&mut self) {
        self.adc.power_on();
    }

    /// Run the calibration sequence.  The previous calibration is forgotten first, so a failed
    /// run leaves the sensor uncalibrated.
    pub fn calibrate(&mut self, budget: Budget) -> Result<Calibration, Error> {
        self.calibration = None;
        let cal = calibrate::calibrate(&mut self.adc, budget)?;
        self.calibration = Some(cal);
        Ok(cal)
    }

    /// Set the converter up for scanning.  Nothing is triggered.
    pub fn configure(&mut self, transfers: bool) -> Result<(), Error> {
        let cal = match self.calibration {
            Some(cal) if cal.gain.is_valid() => cal,
            _ => {
                warn!("{}: refusing to scan without calibration", self.id());
                return Err(Error::NotCalibrated(self.id()));
            }
        };

        self.adc.set_gain(cal.gain);
        self.adc.set_mode(&Mode::conversion(transfers));
        debug!("{}: configured, {} channels", self.id(), self.table.len());
        Ok(())
    }

    /// Convert every channel in the table, in order, into `out`.
    ///
    /// The lowest result bit is not valid on all converter revisions, so it is shifted out.  The
    /// result register isn't valid for a short time after a conversion starts, so the next
    /// conversion isn't started until `settle_us` has passed.
    pub fn poll_pass<D: DelayNs>(
        &mut self,
        out: &mut [Sample],
        budget: Budget,
        settle_us: u32,
        delay: &mut D,
    ) -> Result<(), PollStall> {
        let adc = &mut self.adc;
        for (index, (selector, slot)) in self.table.selectors().iter().zip(out.iter_mut()).enumerate()
        {
            adc.select(*selector);
            if budget
                .spin_until(|| adc.status().contains(Status::COMPLETE))
                .is_err()
            {
                return Err(PollStall { index });
            }
            *slot = adc.result() >> 1;
            delay.delay_us(settle_us);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibrate::CalibrationData;
    use crate::matrix::Matrix;
    use crate::sim::{CalBehavior, SimAdc, SimBoard, SimDelay, SimMatrix};
    use crate::ChannelSelector;

    static TABLE: [ChannelSelector; 4] = [
        ChannelSelector::new(4),
        ChannelSelector::new(19),
        ChannelSelector::new(15),
        ChannelSelector::new(19),
    ];

    fn sensor(board: &SimBoard) -> Sensor<SimAdc> {
        let mut adc = SimAdc::new(ConverterId::Adc0, board);
        adc.set_calibration(CalibrationData::default(), CalBehavior::Complete { after: 1 });
        Sensor::new(adc, ChannelTable::new(&TABLE))
    }

    #[test]
    fn test_configure_requires_calibration() {
        crate::testlog::setup();

        let board = SimBoard::new();
        let mut sensor = sensor(&board);
        assert_eq!(sensor.configure(true), Err(Error::NotCalibrated(ConverterId::Adc0)));
        assert_eq!(sensor.adc().mode(), None);

        sensor.calibrate(Budget::iterations(10)).unwrap();
        sensor.configure(true).unwrap();
        assert_eq!(sensor.adc().mode(), Some(Mode::conversion(true)));
        assert!(sensor.adc().gain().is_valid());
    }

    #[test]
    fn test_failed_recalibration_forgets_gain() {
        let board = SimBoard::new();
        let mut sensor = sensor(&board);
        sensor.calibrate(Budget::iterations(10)).unwrap();
        assert!(sensor.calibration().is_some());

        sensor
            .adc_mut()
            .set_calibration(CalibrationData::default(), CalBehavior::Fail { after: 1 });
        assert_eq!(
            sensor.calibrate(Budget::iterations(10)),
            Err(Error::CalibrationFailed(ConverterId::Adc0))
        );
        assert!(sensor.calibration().is_none());
        assert_eq!(sensor.configure(false), Err(Error::NotCalibrated(ConverterId::Adc0)));
    }

    #[test]
    fn test_poll_pass_order() {
        crate::testlog::setup();

        let board = SimBoard::new();
        board.set_level(0, 4, 0x0400);
        board.set_level(0, 15, 0x0150);
        board.set_level(0, 19, 0x0003);
        let mut sensor = sensor(&board);
        sensor.calibrate(Budget::iterations(10)).unwrap();
        sensor.configure(false).unwrap();

        let mut matrix = SimMatrix::new(&board);
        matrix.sense(true);
        matrix.strobe(0, true);

        let mut delay = SimDelay::new();
        let mut out = [0xffff; 4];
        sensor.poll_pass(&mut out, Budget::iterations(10), 3, &mut delay).unwrap();

        assert_eq!(out, [0x0200, 0x0001, 0x00a8, 0x0001]);
        assert_eq!(sensor.adc().selections(), &[4, 19, 15, 19]);
        assert_eq!(delay.total_ns(), 4 * 3_000);
        assert_eq!(board.bad_samples(), 0);
    }

    #[test]
    fn test_poll_pass_drops_low_bit() {
        let board = SimBoard::new();
        board.set_level(0, 4, 0x0400);
        board.set_level(0, 15, 0x0150);
        board.set_level(0, 19, 0x0002);
        let mut sensor = sensor(&board);
        sensor.calibrate(Budget::iterations(10)).unwrap();
        sensor.configure(false).unwrap();
        sensor.adc_mut().set_low_bit_noise(true);

        let mut matrix = SimMatrix::new(&board);
        matrix.sense(true);
        matrix.strobe(0, true);

        let mut out = [0; 4];
        sensor.poll_pass(&mut out, Budget::iterations(10), 3, &mut SimDelay::new()).unwrap();
        assert_eq!(out, [0x0200, 0x0001, 0x00a8, 0x0001]);
    }

    #[test]
    fn test_poll_pass_stall() {
        let board = SimBoard::new();
        let mut sensor = sensor(&board);
        sensor.calibrate(Budget::iterations(10)).unwrap();
        sensor.configure(false).unwrap();
        sensor.adc_mut().hang_after(2);

        let mut out = [0; 4];
        let res = sensor.poll_pass(&mut out, Budget::iterations(50), 3, &mut SimDelay::new());
        assert_eq!(res, Err(PollStall { index: 2 }));
    }
}
