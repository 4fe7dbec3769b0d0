// =============================================================================
// Relative Strength Index (RSI): Wilder's Smoothing
// =============================================================================
//
// Step 1: Compute price changes (deltas) from consecutive closes.
// Step 2: Seed average gain / average loss with the SMA of the first `period`
//          gains / losses.
// Step 3: Apply Wilder's exponential smoothing:
//            avg_gain = (prev_avg_gain * (period - 1) + current_gain) / period
//            avg_loss = (prev_avg_loss * (period - 1) + current_loss) / period
// Step 4: RS  = avg_gain / avg_loss
//          RSI = 100 - 100 / (1 + RS)
//
// `MomentumOscillator` recomputes the series over its whole window on every
// update and signals when the latest value crosses a threshold.
// =============================================================================

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::OscillatorParams;
use crate::indicators::guard::BusyFlag;
use crate::indicators::signal::{SignalFired, SignalHub};
use crate::indicators::window::{BarWindow, WindowUpdate};
use crate::indicators::Indicator;
use crate::market_data::Bar;

/// History kept by the oscillator, as a multiple of its period.
pub const DEPTH_MULTIPLIER: usize = 6;

/// Compute the full RSI series for the given `closes` and `period`.
///
/// The returned vector has one RSI value for each close starting at index
/// `period` (the first `period` closes are consumed to seed the averages).
///
/// # Edge cases
/// - `period == 0` => empty vec
/// - `closes.len() < period + 1` => empty vec (need at least `period` deltas)
/// - If average loss is zero (no down moves), RSI is clamped to 100.0.
/// - Non-finite results are dropped and the series is truncated.
pub fn calculate_rsi(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period + 1 {
        return Vec::new();
    }

    // --- Compute price deltas ------------------------------------------------
    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    // --- Seed averages with SMA of first `period` deltas ---------------------
    let (sum_gain, sum_loss) = deltas[..period].iter().fold((0.0_f64, 0.0_f64), |(g, l), &d| {
        if d > 0.0 {
            (g + d, l)
        } else {
            (g, l + d.abs())
        }
    });

    let period_f = period as f64;
    let mut avg_gain = sum_gain / period_f;
    let mut avg_loss = sum_loss / period_f;

    let Some(first_rsi) = rsi_from_averages(avg_gain, avg_loss) else {
        return Vec::new();
    };

    let mut result = Vec::with_capacity(deltas.len() - period + 1);
    result.push(first_rsi);

    // --- Wilder's smoothing for subsequent values ----------------------------
    for &delta in &deltas[period..] {
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);

        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;

        match rsi_from_averages(avg_gain, avg_loss) {
            Some(rsi) => result.push(rsi),
            None => break, // Non-finite, stop producing values.
        }
    }

    result
}

/// Convert average gain / average loss into an RSI value in [0, 100].
///
/// - If both averages are zero, RSI is 50.0 (no movement).
/// - If average loss is zero (only gains), RSI is 100.0.
/// - Returns `None` when the result is non-finite.
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    let rsi = if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    };

    rsi.is_finite().then_some(rsi)
}

// =============================================================================
// Crossover rule
// =============================================================================

/// Which threshold the latest value crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crossing {
    /// Crossed the overbought level from below.
    IntoOverbought,
    /// Crossed the oversold level from above.
    IntoOversold,
}

impl std::fmt::Display for Crossing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IntoOverbought => write!(f, "OVERBOUGHT"),
            Self::IntoOversold => write!(f, "OVERSOLD"),
        }
    }
}

/// Compare one computation against the one before it. No crossing is
/// reported while `previous` is NaN.
pub fn detect_crossing(previous: f64, current: f64, overbought: f64, oversold: f64) -> Option<Crossing> {
    if previous.is_nan() || current.is_nan() {
        return None;
    }
    if previous < overbought && current >= overbought {
        Some(Crossing::IntoOverbought)
    } else if previous > oversold && current <= oversold {
        Some(Crossing::IntoOversold)
    } else {
        None
    }
}

// =============================================================================
// MomentumOscillator
// =============================================================================

/// RSI over a bounded bar window with threshold-crossover signals.
#[derive(Debug)]
pub struct MomentumOscillator {
    params: OscillatorParams,
    window: BarWindow,
    value: f64,
    previous_value: f64,
    timestamp: Option<i64>,
    last_crossing: Option<Crossing>,
    busy: BusyFlag,
    signals: SignalHub,
}

impl MomentumOscillator {
    pub fn new(params: OscillatorParams) -> Self {
        let depth = params.period.saturating_mul(DEPTH_MULTIPLIER);
        if params.confirmation_bars > 0 {
            debug!(
                confirmation_bars = params.confirmation_bars,
                "confirmation delay configured but not applied; crossovers fire immediately"
            );
        }
        Self {
            params,
            window: BarWindow::new(depth),
            value: f64::NAN,
            previous_value: f64::NAN,
            timestamp: None,
            last_crossing: None,
            busy: BusyFlag::default(),
            signals: SignalHub::new("rsi"),
        }
    }

    pub fn params(&self) -> &OscillatorParams {
        &self.params
    }

    /// The crossing reported by the most recent signal.
    pub fn last_crossing(&self) -> Option<Crossing> {
        self.last_crossing
    }

    fn clear_state(&mut self) {
        self.window.clear();
        self.value = f64::NAN;
        self.previous_value = f64::NAN;
        self.timestamp = None;
        self.last_crossing = None;
    }

    fn recalculate(&mut self) {
        let Some(_guard) = self.busy.try_enter() else {
            debug!("rsi recompute already in flight; skipping");
            return;
        };

        let series = calculate_rsi(&self.window.closes(), self.params.period);
        let Some(&current) = series.last() else {
            debug!(bars = self.window.len(), "rsi warming up");
            return;
        };

        self.previous_value = self.value;
        self.value = current;
        self.timestamp = self.window.last().map(|b| b.bucket_start);

        let crossing = detect_crossing(
            self.previous_value,
            self.value,
            self.params.overbought,
            self.params.oversold,
        );
        if let Some(crossing) = crossing {
            let timestamp = self.timestamp.unwrap_or_default();
            info!(
                rsi = format!("{:.2}", self.value),
                previous = format!("{:.2}", self.previous_value),
                zone = %crossing,
                timestamp,
                "rsi crossover"
            );
            self.last_crossing = Some(crossing);
            self.signals.emit(timestamp);
        }
    }
}

impl Indicator for MomentumOscillator {
    fn name(&self) -> &'static str {
        "rsi"
    }

    fn required_history_depth(&self) -> usize {
        self.window.capacity()
    }

    fn handle_snapshot(&mut self, bars: &[Bar]) {
        self.clear_state();
        if self.window.load(bars) {
            self.recalculate();
        }
    }

    fn handle_update(&mut self, bar: &Bar) {
        if self.window.push(bar) != WindowUpdate::Rejected {
            self.recalculate();
        }
    }

    fn reset(&mut self) {
        self.clear_state();
    }

    fn value(&self) -> f64 {
        self.value
    }

    fn previous_value(&self) -> f64 {
        self.previous_value
    }

    fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    fn window_len(&self) -> usize {
        self.window.len()
    }

    fn subscribe(&mut self, listener: Box<dyn FnMut() + Send>) {
        self.signals.subscribe_boxed(listener);
    }

    fn subscribe_channel(&mut self) -> mpsc::UnboundedReceiver<SignalFired> {
        self.signals.subscribe_channel()
    }

    fn listener_count(&self) -> usize {
        self.signals.listener_count()
    }
}
