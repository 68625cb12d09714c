//! Result storage.
//!
//! Each converter has two result matrices.  One is "current", and receives the samples of the
//! cycle in progress.  The other is "previous", and holds the cycle before that, so the key-state
//! layer can look at how each cell moved.
//!
//! The two trade roles when the scanner starts a new cycle, by flipping an index, never in the
//! middle of one.  The matrix that becomes current is zeroed at that point.  If the cycle is then
//! abandoned, the swap is reverted, so "previous" is always the last cycle that completed before
//! the current one.

use crate::{ConverterId, Sample, CHANNELS, CONVERTERS, ROWS};

/// One converter's samples for a full cycle, indexed `[row][channel]`.
pub type ResultMatrix = [[Sample; CHANNELS]; ROWS];

pub struct ResultStore {
    buffers: [[ResultMatrix; 2]; CONVERTERS],
    /// Which of the two buffers is current.
    current: usize,
}

impl ResultStore {
    pub const fn new() -> ResultStore {
        ResultStore {
            buffers: [[[[0; CHANNELS]; ROWS]; 2]; CONVERTERS],
            current: 0,
        }
    }

    /// Store a single sample into the current matrix.
    pub fn record(&mut self, converter: ConverterId, row: usize, channel: usize, value: Sample) {
        self.buffers[converter.index()][self.current][row][channel] = value;
    }

    /// Store the samples of a full pass for one row, starting at channel 0.
    pub fn record_row(&mut self, converter: ConverterId, row: usize, values: &[Sample]) {
        self.buffers[converter.index()][self.current][row][..values.len()].copy_from_slice(values);
    }

    /// Make the current matrices previous, and start a fresh, zeroed, current.
    pub fn swap(&mut self) {
        self.current ^= 1;
        for conv in self.buffers.iter_mut() {
            conv[self.current] = [[0; CHANNELS]; ROWS];
        }
    }

    /// Undo the last [`swap`](Self::swap), for a cycle that didn't complete.  The partial matrix
    /// becomes previous, and is zeroed again by the next swap before anything reads it as current.
    pub fn revert_swap(&mut self) {
        self.current ^= 1;
    }

    pub fn current(&self, converter: ConverterId) -> &ResultMatrix {
        &self.buffers[converter.index()][self.current]
    }

    pub fn previous(&self, converter: ConverterId) -> &ResultMatrix {
        &self.buffers[converter.index()][self.current ^ 1]
    }

    pub fn get(&self, converter: ConverterId, row: usize, channel: usize) -> Sample {
        self.current(converter)[row][channel]
    }

    /// How far a cell rose since the previous cycle.
    ///
    /// Samples are unsigned, and so is the delta: a cell whose reading fell saturates at zero.
    /// Use [`is_falling`](Self::is_falling) to tell a falling cell from a steady one.
    pub fn delta(&self, converter: ConverterId, row: usize, channel: usize) -> Sample {
        let cur = self.current(converter)[row][channel];
        let prev = self.previous(converter)[row][channel];
        cur.saturating_sub(prev)
    }

    /// Did this cell's reading drop since the previous cycle?
    pub fn is_falling(&self, converter: ConverterId, row: usize, channel: usize) -> bool {
        self.current(converter)[row][channel] < self.previous(converter)[row][channel]
    }
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A0: ConverterId = ConverterId::Adc0;
    const A1: ConverterId = ConverterId::Adc1;

    fn fill(store: &mut ResultStore, base: Sample) {
        for conv in ConverterId::ALL {
            for row in 0..ROWS {
                for ch in 0..CHANNELS {
                    store.record(conv, row, ch, base + (row * CHANNELS + ch) as Sample);
                }
            }
        }
    }

    #[test]
    fn test_steady_delta_is_zero() {
        let mut store = ResultStore::new();
        fill(&mut store, 100);
        store.swap();
        fill(&mut store, 100);

        for conv in ConverterId::ALL {
            for row in 0..ROWS {
                for ch in 0..CHANNELS {
                    assert_eq!(store.delta(conv, row, ch), 0);
                    assert!(!store.is_falling(conv, row, ch));
                }
            }
        }
    }

    #[test]
    fn test_delta_policy() {
        let mut store = ResultStore::new();
        store.record(A0, 0, 0, 300);
        store.swap();
        store.record(A0, 0, 0, 500);
        assert_eq!(store.delta(A0, 0, 0), 200);
        assert!(!store.is_falling(A0, 0, 0));

        store.swap();
        store.record(A0, 0, 0, 100);
        // 100 - 500 saturates.
        assert_eq!(store.delta(A0, 0, 0), 0);
        assert!(store.is_falling(A0, 0, 0));

        store.swap();
        store.record(A0, 0, 0, 100);
        store.swap();
        store.record(A0, 0, 0, 300);
        store.swap();
        store.record(A0, 0, 0, 100);
        assert_eq!(store.delta(A0, 0, 0), 0);
        assert!(store.is_falling(A0, 0, 0));
    }

    #[test]
    fn test_swap_moves_and_zeroes() {
        let mut store = ResultStore::new();
        store.record_row(A1, 3, &[1, 2, 3, 4]);
        store.record(A0, 7, 15, 9);
        store.swap();

        assert_eq!(&store.previous(A1)[3][..5], &[1, 2, 3, 4, 0]);
        assert_eq!(store.previous(A0)[7][15], 9);
        assert!(store.current(A0).iter().flatten().all(|&s| s == 0));
        assert!(store.current(A1).iter().flatten().all(|&s| s == 0));

        // The converters are independent.
        store.record(A1, 3, 0, 11);
        assert_eq!(store.get(A1, 3, 0), 11);
        assert_eq!(store.get(A0, 3, 0), 0);
    }

    #[test]
    fn test_revert_abandoned_cycle() {
        let mut store = ResultStore::new();
        store.record(A0, 5, 0, 400);
        store.swap();
        store.record(A0, 5, 0, 400);

        // A cycle that only got partway.
        store.swap();
        store.record(A0, 0, 0, 400);
        store.revert_swap();
        assert_eq!(store.get(A0, 5, 0), 400);

        store.swap();
        store.record(A0, 5, 0, 400);
        assert_eq!(store.previous(A0)[5][0], 400);
        assert_eq!(store.delta(A0, 5, 0), 0);
    }
}
