// =============================================================================
// Bar Window: capacity-bounded, chronologically ordered bar cache
// =============================================================================
//
// Each indicator owns one window holding copies of the most recent bars it
// needs. Eviction happens only here, at the append step:
//
//   incoming.bucket_start == last.bucket_start  → replace last (same bucket)
//   incoming.bucket_start >  last.bucket_start  → append, evict oldest
//   incoming.bucket_start <  last.bucket_start  → reject
//
// Bars with broken prices never enter the window.

use std::collections::VecDeque;

use tracing::warn;

use crate::market_data::Bar;

/// Outcome of pushing one bar into a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowUpdate {
    /// The in-progress bucket was amended in place.
    Replaced,
    /// A new bucket was appended (possibly evicting the oldest).
    Appended,
    /// The bar was invalid or out of order; the window is unchanged.
    Rejected,
}

#[derive(Debug, Clone)]
pub struct BarWindow {
    bars: VecDeque<Bar>,
    capacity: usize,
}

impl BarWindow {
    /// Empty window holding at most `capacity` bars. Storage grows as bars
    /// arrive rather than being reserved up front.
    pub fn new(capacity: usize) -> Self {
        Self {
            bars: VecDeque::new(),
            capacity,
        }
    }

    /// Replace the contents with the most recent `capacity` bars of `history`.
    ///
    /// Invalid bars are skipped. If the remaining bars are not strictly
    /// increasing in time the whole history is rejected, the window is left
    /// empty and `false` is returned.
    pub fn load(&mut self, history: &[Bar]) -> bool {
        self.bars.clear();

        let start = history.len().saturating_sub(self.capacity);
        let mut accepted: Vec<Bar> = Vec::with_capacity(history.len() - start);
        for bar in &history[start..] {
            match bar.defect() {
                Some(reason) => {
                    warn!(bucket_start = bar.bucket_start, reason, "skipping invalid bar in history");
                }
                None => accepted.push(*bar),
            }
        }

        if !accepted.windows(2).all(|w| w[0].bucket_start < w[1].bucket_start) {
            warn!(
                bars = accepted.len(),
                "rejecting history: bar timestamps are not strictly increasing"
            );
            return false;
        }

        self.bars.extend(accepted);
        true
    }

    /// Incorporate one new or amended bar.
    pub fn push(&mut self, bar: &Bar) -> WindowUpdate {
        if let Some(reason) = bar.defect() {
            warn!(bucket_start = bar.bucket_start, reason, "rejecting invalid bar");
            return WindowUpdate::Rejected;
        }

        match self.bars.back_mut() {
            Some(last) if last.bucket_start == bar.bucket_start => {
                *last = *bar;
                WindowUpdate::Replaced
            }
            Some(last) if last.bucket_start > bar.bucket_start => {
                warn!(
                    bucket_start = bar.bucket_start,
                    last = last.bucket_start,
                    "rejecting out-of-order bar"
                );
                WindowUpdate::Rejected
            }
            _ => {
                self.bars.push_back(*bar);
                while self.bars.len() > self.capacity {
                    self.bars.pop_front();
                }
                WindowUpdate::Appended
            }
        }
    }

    pub fn clear(&mut self) {
        self.bars.clear();
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.back()
    }

    /// Contiguous oldest-first view, for routines that want a slice.
    pub fn as_slice(&mut self) -> &[Bar] {
        self.bars.make_contiguous()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }
}
