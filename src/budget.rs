//! Bounded waiting.
//!
//! The converters and transfer engine report progress through flags that are polled.  None of
//! those waits are allowed to spin forever: each one is handed a [`Budget`], and running out of it
//! is reported to the caller, who turns it into a named error.

use minicbor::{Decode, Encode};

/// A counted number of polls.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Encode, Decode)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Budget {
    #[n(0)]
    iterations: u32,
}

/// The budget ran out before the condition became true.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Exhausted;

impl Budget {
    pub const fn iterations(iterations: u32) -> Budget {
        Budget { iterations }
    }

    pub fn get(&self) -> u32 {
        self.iterations
    }

    /// Poll `done` until it returns true.
    ///
    /// On success, returns how many polls were left over, which is handy for characterizing how
    /// close a wait came to the limit.
    pub fn spin_until(self, mut done: impl FnMut() -> bool) -> Result<u32, Exhausted> {
        let mut left = self.iterations;
        loop {
            if done() {
                return Ok(left);
            }
            if left == 0 {
                return Err(Exhausted);
            }
            left -= 1;
            core::hint::spin_loop();
        }
    }
}

#[test]
fn test_budget_counts() {
    let mut polls = 0;
    let left = Budget::iterations(10).spin_until(|| {
        polls += 1;
        polls == 4
    });
    assert_eq!(left, Ok(7));

    let mut polls = 0;
    let res = Budget::iterations(10).spin_until(|| {
        polls += 1;
        false
    });
    assert_eq!(res, Err(Exhausted));
    assert_eq!(polls, 11);

    assert_eq!(Budget::iterations(0).spin_until(|| true), Ok(0));
}
