// =============================================================================
// Volatility Breakout Detector: ATR dual rate-of-change "sniper" model
// =============================================================================
//
// Volatility contraction over a long horizon arms the detector; a sharp
// short-horizon expansion while armed fires a single signal.
//
//   vol      = ATR(base_period) series over the window
//   ROC_long = ROC(vol, long_lookback)     (series indices, not bar indices)
//   ROC_short= ROC(vol, short_lookback)
//
// State machine, evaluated once per successful recompute:
//
//   UNARMED ── ROC_long <= compression ──────────────▶ ARMED
//   ARMED   ── ROC_short > expansion ──▶ fire ───────▶ UNARMED
//   ARMED   ── ROC_long > compression (no fire) ─────▶ UNARMED
//
// Arming and firing never happen in the same cycle.
//
// Failure handling: a failed recompute (volatility routine error, empty
// output, unusable ROC base) leaves value/previous_value untouched and bumps
// a failure counter. After `max_consecutive_failures` in a row the detector
// resets itself completely and re-enters warm-up.
// =============================================================================

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::BreakoutParams;
use crate::indicators::atr::calculate_atr_series;
use crate::indicators::guard::BusyFlag;
use crate::indicators::roc::roc_at;
use crate::indicators::signal::{SignalFired, SignalHub};
use crate::indicators::window::{BarWindow, WindowUpdate};
use crate::indicators::Indicator;
use crate::market_data::Bar;

/// Extra bars kept on top of the ATR warm-up and the longest lookback.
pub const DEPTH_MARGIN: usize = 10;
/// Multiplier applied to the depth so the ATR smoothing has settled well
/// before the oldest lookback element.
pub const DEPTH_MULTIPLIER: usize = 3;

/// Volatility routine: `(bars, base_period) -> series`. Must return one
/// element per bar from index `base_period` on, or fail.
pub type VolatilityFn = Box<dyn Fn(&[Bar], usize) -> Result<Vec<f64>> + Send>;

// =============================================================================
// State machine
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArmState {
    #[default]
    Unarmed,
    Armed,
}

impl std::fmt::Display for ArmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unarmed => write!(f, "UNARMED"),
            Self::Armed => write!(f, "ARMED"),
        }
    }
}

/// What one evaluation of the state machine did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Armed,
    Fired,
    Disarmed,
}

impl ArmState {
    /// Evaluate one cycle.
    pub fn step(
        self,
        roc_long: f64,
        roc_short: f64,
        compression_threshold: f64,
        expansion_threshold: f64,
    ) -> (ArmState, Transition) {
        match self {
            Self::Unarmed if roc_long <= compression_threshold => (Self::Armed, Transition::Armed),
            Self::Unarmed => (Self::Unarmed, Transition::Unchanged),
            Self::Armed if roc_short > expansion_threshold => (Self::Unarmed, Transition::Fired),
            Self::Armed if roc_long > compression_threshold => {
                (Self::Unarmed, Transition::Disarmed)
            }
            Self::Armed => (Self::Armed, Transition::Unchanged),
        }
    }
}

// =============================================================================
// VolatilityBreakoutDetector
// =============================================================================

/// Readings produced by one successful computation, committed atomically.
struct Readings {
    volatility: Vec<f64>,
    current: f64,
    rocs: Option<(f64, f64)>,
}

pub struct VolatilityBreakoutDetector {
    params: BreakoutParams,
    window: BarWindow,
    volatility_fn: VolatilityFn,

    value: f64,
    previous_value: f64,
    timestamp: Option<i64>,
    volatility: Vec<f64>,
    roc_long: f64,
    roc_short: f64,

    state: ArmState,
    armed_at: Option<i64>,

    consecutive_failures: u32,
    last_attempt_ms: Option<i64>,

    busy: BusyFlag,
    signals: SignalHub,
}

impl VolatilityBreakoutDetector {
    pub fn new(params: BreakoutParams) -> Self {
        Self::with_volatility_fn(params, Box::new(calculate_atr_series))
    }

    /// Build a detector around a custom volatility routine.
    pub fn with_volatility_fn(params: BreakoutParams, volatility_fn: VolatilityFn) -> Self {
        let depth = Self::depth_for(&params);
        Self {
            params,
            window: BarWindow::new(depth),
            volatility_fn,
            value: f64::NAN,
            previous_value: f64::NAN,
            timestamp: None,
            volatility: Vec::new(),
            roc_long: f64::NAN,
            roc_short: f64::NAN,
            state: ArmState::Unarmed,
            armed_at: None,
            consecutive_failures: 0,
            last_attempt_ms: None,
            busy: BusyFlag::default(),
            signals: SignalHub::new("breakout"),
        }
    }

    fn depth_for(params: &BreakoutParams) -> usize {
        let lookback = params.long_lookback.max(params.short_lookback);
        params
            .base_period
            .saturating_add(lookback)
            .saturating_add(DEPTH_MARGIN)
            .saturating_mul(DEPTH_MULTIPLIER)
    }

    pub fn params(&self) -> &BreakoutParams {
        &self.params
    }

    pub fn state(&self) -> ArmState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        self.state == ArmState::Armed
    }

    /// Bucket start of the bar on which the detector armed.
    pub fn armed_at(&self) -> Option<i64> {
        self.armed_at
    }

    pub fn roc_long(&self) -> f64 {
        self.roc_long
    }

    pub fn roc_short(&self) -> f64 {
        self.roc_short
    }

    pub fn volatility_series(&self) -> &[f64] {
        &self.volatility
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Wall-clock time (ms) of the last recompute attempt.
    pub fn last_attempt_ms(&self) -> Option<i64> {
        self.last_attempt_ms
    }

    /// Handle to the reentrancy flag guarding recomputation.
    pub fn busy_flag(&self) -> BusyFlag {
        self.busy.clone()
    }

    /// Enough bars for the volatility routine to produce output.
    fn has_enough_bars(&self) -> bool {
        self.window.len() > self.params.base_period
    }

    /// Retry once if the value is still NaN, the last attempt was at least
    /// `force_recalc_interval_ms` before `now_ms` and enough bars are held.
    pub fn force_recalculation_at(&mut self, now_ms: i64) -> bool {
        if !self.value.is_nan() || !self.has_enough_bars() {
            return false;
        }
        if let Some(last) = self.last_attempt_ms {
            if now_ms - last < self.params.force_recalc_interval_ms {
                return false;
            }
        }
        debug!(bars = self.window.len(), "forcing breakout recalculation");
        self.recalculate_at(now_ms);
        true
    }

    fn clear_state(&mut self) {
        self.window.clear();
        self.volatility.clear();
        self.value = f64::NAN;
        self.previous_value = f64::NAN;
        self.timestamp = None;
        self.roc_long = f64::NAN;
        self.roc_short = f64::NAN;
        self.state = ArmState::Unarmed;
        self.armed_at = None;
        self.consecutive_failures = 0;
        self.last_attempt_ms = None;
    }

    fn recalculate(&mut self) {
        self.recalculate_at(Utc::now().timestamp_millis());
    }

    fn recalculate_at(&mut self, now_ms: i64) {
        let Some(_guard) = self.busy.try_enter() else {
            debug!("breakout recompute already in flight; skipping");
            return;
        };
        self.last_attempt_ms = Some(now_ms);

        if !self.has_enough_bars() {
            debug!(bars = self.window.len(), "breakout warming up");
            return;
        }

        match self.compute() {
            Ok(readings) => {
                self.consecutive_failures = 0;
                self.commit(readings);
            }
            Err(e) => {
                self.consecutive_failures += 1;
                warn!(
                    error = %e,
                    failures = self.consecutive_failures,
                    "breakout computation failed"
                );
                if self.consecutive_failures >= self.params.max_consecutive_failures {
                    warn!(
                        failures = self.consecutive_failures,
                        "too many consecutive breakout failures; resetting"
                    );
                    self.clear_state();
                }
            }
        }
    }

    /// Run the volatility routine and both ROC readings without touching any
    /// committed state.
    fn compute(&mut self) -> Result<Readings> {
        let period = self.params.base_period;
        let bars = self.window.as_slice();
        let volatility = (self.volatility_fn)(bars, period).context("volatility routine failed")?;

        let Some(&current) = volatility.last() else {
            bail!("volatility routine produced no output from {} bars", bars.len());
        };
        if !current.is_finite() {
            bail!("volatility routine produced a non-finite value");
        }

        let long = roc_at(&volatility, self.params.long_lookback).context("long ROC")?;
        let short = roc_at(&volatility, self.params.short_lookback).context("short ROC")?;
        let rocs = long.zip(short);

        Ok(Readings {
            volatility,
            current,
            rocs,
        })
    }

    fn commit(&mut self, readings: Readings) {
        self.previous_value = self.value;
        self.value = readings.current;
        self.volatility = readings.volatility;
        self.timestamp = self.window.last().map(|b| b.bucket_start);

        let Some((roc_long, roc_short)) = readings.rocs else {
            debug!(
                volatility_len = self.volatility.len(),
                "not enough volatility history for ROC; state unchanged"
            );
            return;
        };
        self.roc_long = roc_long;
        self.roc_short = roc_short;

        let (next, transition) = self.state.step(
            roc_long,
            roc_short,
            self.params.compression_threshold,
            self.params.expansion_threshold,
        );
        self.state = next;

        let timestamp = self.timestamp.unwrap_or_default();
        match transition {
            Transition::Unchanged => {}
            Transition::Armed => {
                self.armed_at = Some(timestamp);
                debug!(
                    roc_long = format!("{roc_long:.2}"),
                    timestamp,
                    "breakout armed on volatility compression"
                );
            }
            Transition::Disarmed => {
                self.armed_at = None;
                debug!(
                    roc_long = format!("{roc_long:.2}"),
                    timestamp,
                    "breakout disarmed; compression no longer holds"
                );
            }
            Transition::Fired => {
                info!(
                    roc_short = format!("{roc_short:.2}"),
                    roc_long = format!("{roc_long:.2}"),
                    atr = self.value,
                    armed_at = ?self.armed_at,
                    timestamp,
                    "volatility breakout fired"
                );
                self.armed_at = None;
                self.signals.emit(timestamp);
            }
        }
    }
}

impl Indicator for VolatilityBreakoutDetector {
    fn name(&self) -> &'static str {
        "breakout"
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

    fn force_recalculation_if_needed(&mut self) -> bool {
        self.force_recalculation_at(Utc::now().timestamp_millis())
    }
}

impl std::fmt::Debug for VolatilityBreakoutDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolatilityBreakoutDetector")
            .field("params", &self.params)
            .field("window", &self.window.len())
            .field("value", &self.value)
            .field("state", &self.state)
            .field("roc_long", &self.roc_long)
            .field("roc_short", &self.roc_short)
            .field("consecutive_failures", &self.consecutive_failures)
            .finish()
    }
}
