// =============================================================================
// Rate of Change (ROC)
// =============================================================================
//
// Percentage change of a series relative to its value `lookback` elements
// earlier:
//   ROC = ((x_t - x_{t-n}) / x_{t-n}) * 100

use anyhow::{bail, Result};

/// ROC of the last element of `series` against the element `lookback`
/// positions earlier.
///
/// Returns `Ok(None)` when the series holds fewer than `lookback + 1`
/// elements. A zero or non-finite base, or a non-finite result, is an error.
pub fn roc_at(series: &[f64], lookback: usize) -> Result<Option<f64>> {
    if series.len() < lookback + 1 {
        return Ok(None);
    }

    let idx = series.len() - 1;
    let current = series[idx];
    let base = series[idx - lookback];

    if !base.is_finite() || base == 0.0 {
        bail!("ROC base at index {} is unusable: {base}", idx - lookback);
    }

    let roc = (current - base) / base * 100.0;
    if !roc.is_finite() {
        bail!("ROC over {lookback} elements is non-finite");
    }
    Ok(Some(roc))
}
