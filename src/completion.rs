//! Pass completion flags.
//!
//! When a converter's result transfer finishes a major loop, the transfer complete interrupt
//! raises that converter's flag, and the scanner, spinning in thread context, sees it.  These are
//! the only values shared between the interrupt and the scanner.
//!
//! Each flag is split once into a [`CompletionSignal`], which belongs to the interrupt handler, and
//! a [`CompletionWait`], which belongs to the scanner.  Only the signal can set the flag, and only
//! the wait side can clear it.

use portable_atomic::{AtomicBool, Ordering};

/// A single completion flag, meant to live in a static.
#[derive(Debug)]
pub struct CompletionFlag {
    set: AtomicBool,
    split: AtomicBool,
}

impl CompletionFlag {
    pub const fn new() -> CompletionFlag {
        CompletionFlag {
            set: AtomicBool::new(false),
            split: AtomicBool::new(false),
        }
    }

    /// Split the flag into its two halves.  Returns None if it has already been split.
    pub fn split(&'static self) -> Option<(CompletionSignal, CompletionWait)> {
        if self.split.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some((CompletionSignal(self), CompletionWait(self)))
    }
}

impl Default for CompletionFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// The interrupt side of a completion flag.
#[derive(Debug)]
pub struct CompletionSignal(&'static CompletionFlag);

impl CompletionSignal {
    /// Mark the pass complete.
    ///
    /// Runs with interrupts masked, so a nested completion can't interleave with this one.
    pub fn raise(&self) {
        critical_section::with(|_| {
            self.0.set.store(true, Ordering::Release);
        });
    }
}

/// The scanner side of a completion flag.
#[derive(Debug)]
pub struct CompletionWait(&'static CompletionFlag);

impl CompletionWait {
    /// Clear the flag.  This must happen before the pass is triggered, otherwise a flag left over
    /// from the previous row could be mistaken for this one.
    pub fn clear(&mut self) {
        self.0.set.store(false, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.set.load(Ordering::Acquire)
    }
}

#[test]
fn test_flag_halves() {
    static FLAG: CompletionFlag = CompletionFlag::new();

    let (signal, mut wait) = FLAG.split().unwrap();
    assert!(FLAG.split().is_none());

    assert!(!wait.is_set());
    signal.raise();
    assert!(wait.is_set());
    // Raising twice is harmless.
    signal.raise();
    wait.clear();
    assert!(!wait.is_set());
}
