// =============================================================================
// Average True Range (ATR): Wilder's Smoothing Method
// =============================================================================
//
// True Range (TR) for each bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR is the smoothed average of TR using Wilder's method:
//   ATR_0   = SMA of first `period` TR values
//   ATR_t   = (ATR_{t-1} * (period - 1) + TR_t) / period
//
// The output series has one element per bar from index `period` onward, so
// `bars.len() - period` elements in total.
// =============================================================================

use anyhow::{bail, Result};

use crate::market_data::Bar;

/// Compute the full ATR series for `bars` (oldest first).
///
/// Returns an empty series when there are fewer than `period + 1` bars (each
/// TR needs a previous close). Fails when `period` is zero or any intermediate
/// value is non-finite.
pub fn calculate_atr_series(bars: &[Bar], period: usize) -> Result<Vec<f64>> {
    if period == 0 {
        bail!("ATR period must be positive");
    }
    if bars.len() < period + 1 {
        return Ok(Vec::new());
    }
    // `f64::max` swallows NaN, so broken inputs must be caught up front.
    if let Some(idx) = bars
        .iter()
        .position(|b| !(b.high.is_finite() && b.low.is_finite() && b.close.is_finite()))
    {
        bail!("non-finite price in bar {idx}");
    }

    // --- Step 1: True Range for each consecutive pair ------------------------
    let tr_values: Vec<f64> = bars
        .windows(2)
        .map(|w| {
            let (prev, cur) = (&w[0], &w[1]);
            let hl = cur.high - cur.low;
            let hc = (cur.high - prev.close).abs();
            let lc = (cur.low - prev.close).abs();
            hl.max(hc).max(lc)
        })
        .collect();

    // --- Step 2: Seed with SMA of the first `period` TR values ---------------
    let period_f = period as f64;
    let mut atr = tr_values[..period].iter().sum::<f64>() / period_f;
    if !atr.is_finite() {
        bail!("ATR seed is non-finite");
    }

    let mut series = Vec::with_capacity(tr_values.len() - period + 1);
    series.push(atr);

    // --- Step 3: Wilder's smoothing for remaining TR values ------------------
    for &tr in &tr_values[period..] {
        atr = (atr * (period_f - 1.0) + tr) / period_f;
        if !atr.is_finite() {
            bail!("ATR became non-finite at element {}", series.len());
        }
        series.push(atr);
    }

    Ok(series)
}
