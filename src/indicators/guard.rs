// =============================================================================
// Busy flag: at most one recomputation in flight per indicator instance
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Atomic check-and-set flag guarding an indicator's recompute step.
#[derive(Debug, Clone, Default)]
pub struct BusyFlag(Arc<AtomicBool>);

impl BusyFlag {
    /// Claim the flag. Returns `None` if a computation is already in flight.
    ///
    /// The returned guard clears the flag when dropped, including on early
    /// return or unwinding.
    pub fn try_enter(&self) -> Option<BusyGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(self.0.clone()))
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
