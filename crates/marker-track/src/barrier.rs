use std::sync::atomic::{AtomicUsize, Ordering};

/// Countdown shared by the camera tasks of one marker.
///
/// Exactly one caller of [`StepBarrier::arrive`] sees `true`: the one that
/// brings the count to zero. That caller runs the per-frame aggregation.
#[derive(Debug)]
pub struct StepBarrier {
    remaining: AtomicUsize,
}

impl StepBarrier {
    pub fn new(tasks: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(tasks),
        }
    }

    /// Count one finished task. Returns `true` for the last arrival.
    pub fn arrive(&self) -> bool {
        let prev = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        matches!(prev, Ok(1))
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }
}
