// =============================================================================
// Engine Configuration: bucket width and indicator parameters
// =============================================================================
//
// Every tunable parameter of the aggregator and the indicators lives here.
// All fields carry `#[serde(default)]` so that adding new fields never breaks
// loading an older config file. Persistence uses an atomic tmp + rename.
//
// =============================================================================

use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_bucket_width() -> i64 {
    60
}

fn default_rsi_period() -> usize {
    14
}

fn default_overbought() -> f64 {
    70.0
}

fn default_oversold() -> f64 {
    30.0
}

fn default_base_period() -> usize {
    14
}

fn default_long_lookback() -> usize {
    20
}

fn default_short_lookback() -> usize {
    3
}

fn default_compression_threshold() -> f64 {
    -20.0
}

fn default_expansion_threshold() -> f64 {
    25.0
}

fn default_max_consecutive_failures() -> u32 {
    5
}

fn default_force_recalc_interval_ms() -> i64 {
    3_000
}

/// Upper bound on any period or lookback. Window depths are derived from
/// these by multiplication, so they must stay well inside `usize`.
pub const MAX_LOOKBACK: usize = 10_000;

// =============================================================================
// OscillatorParams
// =============================================================================

/// Parameters for the RSI-style momentum oscillator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OscillatorParams {
    /// Wilder smoothing period.
    #[serde(default = "default_rsi_period")]
    pub period: usize,

    /// Signal when the value crosses this level from below.
    #[serde(default = "default_overbought")]
    pub overbought: f64,

    /// Signal when the value crosses this level from above.
    #[serde(default = "default_oversold")]
    pub oversold: f64,

    /// Bars of confirmation before a crossover signal. Accepted for
    /// compatibility with existing config files; crossovers fire on the bar
    /// where they happen regardless of this value.
    #[serde(default)]
    pub confirmation_bars: u32,
}

impl Default for OscillatorParams {
    fn default() -> Self {
        Self {
            period: default_rsi_period(),
            overbought: default_overbought(),
            oversold: default_oversold(),
            confirmation_bars: 0,
        }
    }
}

impl OscillatorParams {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.period > 0, "oscillator period must be positive");
        ensure!(
            self.period <= MAX_LOOKBACK,
            "oscillator period {} exceeds {MAX_LOOKBACK}",
            self.period
        );
        ensure!(
            self.oversold < self.overbought,
            "oversold ({}) must be below overbought ({})",
            self.oversold,
            self.overbought
        );
        Ok(())
    }
}

// =============================================================================
// BreakoutParams
// =============================================================================

/// Parameters for the ATR dual rate-of-change breakout detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakoutParams {
    /// ATR length.
    #[serde(default = "default_base_period")]
    pub base_period: usize,

    /// Lookback (in ATR samples) for the compression reading.
    #[serde(default = "default_long_lookback")]
    pub long_lookback: usize,

    /// Lookback (in ATR samples) for the expansion reading.
    #[serde(default = "default_short_lookback")]
    pub short_lookback: usize,

    /// Arm when the long ROC (percent) is at or below this level.
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: f64,

    /// Fire when armed and the short ROC (percent) exceeds this level.
    #[serde(default = "default_expansion_threshold")]
    pub expansion_threshold: f64,

    /// Consecutive computation failures tolerated before a full reset.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Minimum spacing between forced recalculation attempts.
    #[serde(default = "default_force_recalc_interval_ms")]
    pub force_recalc_interval_ms: i64,
}

impl Default for BreakoutParams {
    fn default() -> Self {
        Self {
            base_period: default_base_period(),
            long_lookback: default_long_lookback(),
            short_lookback: default_short_lookback(),
            compression_threshold: default_compression_threshold(),
            expansion_threshold: default_expansion_threshold(),
            max_consecutive_failures: default_max_consecutive_failures(),
            force_recalc_interval_ms: default_force_recalc_interval_ms(),
        }
    }
}

impl BreakoutParams {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.base_period > 0, "breakout base_period must be positive");
        ensure!(self.long_lookback > 0, "breakout long_lookback must be positive");
        ensure!(self.short_lookback > 0, "breakout short_lookback must be positive");
        for (name, value) in [
            ("base_period", self.base_period),
            ("long_lookback", self.long_lookback),
            ("short_lookback", self.short_lookback),
        ] {
            ensure!(value <= MAX_LOOKBACK, "breakout {name} {value} exceeds {MAX_LOOKBACK}");
        }
        ensure!(
            self.max_consecutive_failures > 0,
            "max_consecutive_failures must be positive"
        );
        Ok(())
    }
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Aggregation width plus the parameters of both indicators. Missing fields
/// take their defaults, so `{}` is a valid config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Signed bucket width: seconds when positive, samples per bar when
    /// negative.
    #[serde(default = "default_bucket_width")]
    pub bucket_width: i64,

    #[serde(default)]
    pub oscillator: OscillatorParams,

    #[serde(default)]
    pub breakout: BreakoutParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bucket_width: default_bucket_width(),
            oscillator: OscillatorParams::default(),
            breakout: BreakoutParams::default(),
        }
    }
}

impl EngineConfig {
    /// Read, parse and validate a config file. A missing file is an error;
    /// the binary falls back to defaults in that case.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("invalid engine config in {}", path.display()))?;

        info!(
            path = %path.display(),
            bucket_width = config.bucket_width,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Write the config as pretty JSON. Readers never observe a partial file:
    /// the content goes to a sibling `.json.tmp` that is then renamed over `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise engine config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.bucket_width != 0, "bucket_width must be non-zero");
        self.oscillator.validate()?;
        self.breakout.validate()?;
        Ok(())
    }
}
