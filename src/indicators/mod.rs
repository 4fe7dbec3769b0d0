// =============================================================================
// Indicators
// =============================================================================
//
// Stateful indicators fed bar by bar. Each instance owns its own bounded bar
// window and derived buffers; nothing is shared between instances. The pure
// numeric routines (`atr`, `roc`, `calculate_rsi`) return empty output for
// insufficient data and an error for numerical failures.
//
// No indicator entry point returns an error or panics: insufficient data is a
// silent no-op, bad input is dropped and logged, and computation failures are
// contained inside the indicator.

pub mod atr;
pub mod breakout;
pub mod guard;
pub mod roc;
pub mod rsi;
pub mod signal;
pub mod window;

use tokio::sync::mpsc;

use crate::market_data::Bar;

pub use breakout::{ArmState, Transition, VolatilityBreakoutDetector, VolatilityFn};
pub use rsi::{Crossing, MomentumOscillator};
pub use signal::{SignalFired, SignalHub};
pub use window::{BarWindow, WindowUpdate};

/// Uniform surface every indicator exposes to the strategy layer.
///
/// Callers must not invoke these methods concurrently on one instance; wrap
/// the indicator in a lock when it is shared.
pub trait Indicator: Send {
    /// Short stable name used in logs and signal messages.
    fn name(&self) -> &'static str;

    /// Number of most-recent bars the indicator keeps.
    fn required_history_depth(&self) -> usize;

    /// Seed from a superset of history: keep the most recent
    /// `required_history_depth()` bars, validate them and compute.
    /// Calling it again with fresh history starts over.
    fn handle_snapshot(&mut self, bars: &[Bar]);

    /// Incorporate exactly one new or amended bar and recompute.
    fn handle_update(&mut self, bar: &Bar);

    /// Clear the window and all derived state. Listeners stay registered.
    fn reset(&mut self);

    /// Current value, NaN until the first valid computation.
    fn value(&self) -> f64;

    /// Value before the most recent computation, NaN until two exist.
    fn previous_value(&self) -> f64;

    /// Bucket start of the last bar used in a computation.
    fn timestamp(&self) -> Option<i64>;

    /// Number of bars currently retained.
    fn window_len(&self) -> usize;

    /// Register a callback invoked synchronously whenever the indicator fires.
    /// Only the indicator itself can raise a signal.
    fn subscribe(&mut self, listener: Box<dyn FnMut() + Send>);

    /// Register a channel listener receiving one message per firing.
    fn subscribe_channel(&mut self) -> mpsc::UnboundedReceiver<SignalFired>;

    /// Number of registered listeners of either kind.
    fn listener_count(&self) -> usize;

    /// Retry a stalled computation without waiting for a new bar.
    /// Returns `true` if a retry was attempted.
    fn force_recalculation_if_needed(&mut self) -> bool {
        false
    }
}
