// =============================================================================
// candle-signals: streaming candle aggregation + incremental indicators
// =============================================================================
//
// Raw price samples are grouped into fixed-width bars by `CandleAggregator`
// and fed to stateful indicators that raise signals on defined conditions:
//
//   - `MomentumOscillator`          RSI threshold crossover
//   - `VolatilityBreakoutDetector`  ATR dual-ROC arm/fire state machine
//
// `SignalEngine` wires the aggregator to any number of indicators.
// =============================================================================

pub mod config;
pub mod engine;
pub mod indicators;
pub mod market_data;

pub use crate::config::{BreakoutParams, EngineConfig, OscillatorParams};
pub use crate::engine::SignalEngine;
pub use crate::indicators::{
    ArmState, Indicator, MomentumOscillator, SignalFired, VolatilityBreakoutDetector,
};
pub use crate::market_data::{Bar, BucketMode, CandleAggregator, FeedEvent, History, Quote, Tick};
