// =============================================================================
// Signal Engine: aggregator feeding a set of indicators
// =============================================================================
//
//   samples ──▶ CandleAggregator ──▶ bar ──▶ indicator.handle_update (each)
//   history ──▶ CandleAggregator ──▶ bars ─▶ indicator.handle_snapshot (each)
//
// Every indicator receives its own copy of each bar. Indicators are invoked in
// registration order, and any signal they raise is delivered before the next
// indicator sees the bar.

use anyhow::Result;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::indicators::{Indicator, MomentumOscillator, VolatilityBreakoutDetector};
use crate::market_data::{Bar, CandleAggregator, FeedEvent, Tick};

pub struct SignalEngine {
    aggregator: CandleAggregator,
    indicators: Vec<Box<dyn Indicator>>,
}

impl SignalEngine {
    /// Build an engine with no indicators attached.
    pub fn new(aggregator: CandleAggregator) -> Self {
        Self {
            aggregator,
            indicators: Vec::new(),
        }
    }

    /// Build the standard engine: one momentum oscillator and one breakout
    /// detector, configured from `config`.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let mut engine = Self::new(CandleAggregator::new(config.bucket_width)?);
        engine.add_indicator(Box::new(MomentumOscillator::new(config.oscillator.clone())));
        engine.add_indicator(Box::new(VolatilityBreakoutDetector::new(config.breakout.clone())));

        info!(
            mode = %engine.aggregator.bucket_mode(),
            indicators = engine.indicators.len(),
            "signal engine ready"
        );
        Ok(engine)
    }

    /// Attach an indicator and return its index.
    pub fn add_indicator(&mut self, indicator: Box<dyn Indicator>) -> usize {
        debug!(
            indicator = indicator.name(),
            depth = indicator.required_history_depth(),
            "indicator attached"
        );
        self.indicators.push(indicator);
        self.indicators.len() - 1
    }

    pub fn indicators(&self) -> &[Box<dyn Indicator>] {
        &self.indicators
    }

    pub fn indicator_mut(&mut self, index: usize) -> Option<&mut Box<dyn Indicator>> {
        self.indicators.get_mut(index)
    }

    pub fn aggregator(&self) -> &CandleAggregator {
        &self.aggregator
    }

    /// Ingest a `(times, prices)` history and snapshot every indicator with
    /// the resulting bars.
    pub fn seed_history(&mut self, times: &[i64], prices: &[f64]) -> usize {
        let bars = self.aggregator.ingest_history(times, prices);
        for indicator in &mut self.indicators {
            indicator.handle_snapshot(&bars);
        }
        info!(bars = bars.len(), "indicators seeded from history");
        bars.len()
    }

    /// Feed one raw sample. Returns the bar that absorbed it.
    pub fn on_sample(&mut self, price: f64, epoch: i64) -> Option<Bar> {
        let bar = self.aggregator.process_sample(price, epoch)?;
        self.dispatch(&bar);
        Some(bar)
    }

    /// Feed one finer-grained bar. Returns the bar that absorbed it.
    pub fn on_bar(&mut self, finer: &Bar) -> Option<Bar> {
        let bar = self.aggregator.process_bar(finer)?;
        self.dispatch(&bar);
        Some(bar)
    }

    /// Feed one decoded tick. Returns the bar that absorbed it.
    pub fn on_tick(&mut self, tick: &Tick) -> Option<Bar> {
        let bar = self.aggregator.process_tick(tick)?;
        self.dispatch(&bar);
        Some(bar)
    }

    pub fn on_event(&mut self, event: &FeedEvent) -> Option<Bar> {
        match event {
            FeedEvent::Tick(tick) => self.on_tick(tick),
            FeedEvent::Bar(bar) => self.on_bar(bar),
        }
    }

    /// Give every indicator a chance to recover a stalled computation.
    /// Returns how many retried.
    pub fn force_recalculation(&mut self) -> usize {
        self.indicators
            .iter_mut()
            .map(|ind| ind.force_recalculation_if_needed())
            .filter(|&retried| retried)
            .count()
    }

    /// Reset every indicator. The aggregator's bars are kept.
    pub fn reset_indicators(&mut self) {
        for indicator in &mut self.indicators {
            indicator.reset();
        }
    }

    fn dispatch(&mut self, bar: &Bar) {
        for indicator in &mut self.indicators {
            indicator.handle_update(bar);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BreakoutParams, OscillatorParams};

    fn small_config() -> EngineConfig {
        EngineConfig {
            bucket_width: 60,
            oscillator: OscillatorParams {
                period: 3,
                ..OscillatorParams::default()
            },
            breakout: BreakoutParams {
                base_period: 3,
                long_lookback: 4,
                short_lookback: 2,
                ..BreakoutParams::default()
            },
        }
    }

    #[test]
    fn from_config_attaches_both_indicators() {
        let engine = SignalEngine::from_config(&small_config()).unwrap();
        let names: Vec<&str> = engine.indicators().iter().map(|i| i.name()).collect();
        assert_eq!(names, vec!["rsi", "breakout"]);
    }

    #[test]
    fn from_config_rejects_invalid_config() {
        let mut cfg = small_config();
        cfg.bucket_width = 0;
        assert!(SignalEngine::from_config(&cfg).is_err());
    }

    #[test]
    fn from_config_rejects_oversized_lookbacks() {
        let mut cfg = small_config();
        cfg.breakout.long_lookback = usize::MAX / 2;
        assert!(SignalEngine::from_config(&cfg).is_err());

        let mut cfg = small_config();
        cfg.oscillator.period = usize::MAX / 3;
        assert!(SignalEngine::from_config(&cfg).is_err());
    }

    #[test]
    fn samples_flow_through_to_indicators() {
        let mut engine = SignalEngine::from_config(&small_config()).unwrap();
        for i in 0..40_i64 {
            let price = 100.0 + ((i as f64) * 0.9).sin() * 4.0;
            // Two samples per one-minute bucket.
            engine.on_sample(price, i * 30);
        }
        assert_eq!(engine.aggregator().len(), 20);
        for ind in engine.indicators() {
            assert!(ind.window_len() > 0);
            assert!(ind.window_len() <= ind.required_history_depth());
            assert!(!ind.value().is_nan(), "{} never computed", ind.name());
            assert_eq!(ind.timestamp(), Some(19 * 60));
        }
    }

    #[test]
    fn seed_history_snapshots_every_indicator() {
        let mut engine = SignalEngine::from_config(&small_config()).unwrap();
        let times: Vec<i64> = (0..300).map(|i| i * 20).collect();
        let prices: Vec<f64> = (0..300).map(|i| 50.0 + (i % 11) as f64 * 0.3).collect();
        let bars = engine.seed_history(&times, &prices);
        assert_eq!(bars, 100);
        for ind in engine.indicators() {
            assert_eq!(ind.window_len(), ind.required_history_depth());
            assert!(!ind.value().is_nan());
        }
    }

    #[test]
    fn channel_listeners_receive_signals() {
        let mut engine = SignalEngine::from_config(&small_config()).unwrap();
        let mut rx = engine.indicator_mut(0).unwrap().subscribe_channel();

        // Falling then rising closes push RSI(3) through 70.
        let closes = [100.0, 99.0, 98.0, 97.0, 96.0, 95.0, 96.0, 97.0, 98.0, 99.0];
        for (i, &c) in closes.iter().enumerate() {
            engine.on_event(&FeedEvent::Tick(Tick {
                price: c,
                epoch: i as i64 * 60,
            }));
        }
        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.indicator, "rsi");
        assert_eq!(msg.timestamp, 8 * 60);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn listeners_attach_per_indicator() {
        let mut engine = SignalEngine::from_config(&small_config()).unwrap();
        let breakout = engine.indicator_mut(1).unwrap();
        breakout.subscribe(Box::new(|| {}));
        let _rx = breakout.subscribe_channel();
        assert_eq!(engine.indicators()[0].listener_count(), 0);
        assert_eq!(engine.indicators()[1].listener_count(), 2);
    }

    #[test]
    fn invalid_samples_do_not_reach_indicators() {
        let mut engine = SignalEngine::from_config(&small_config()).unwrap();
        assert!(engine.on_sample(f64::NAN, 0).is_none());
        assert!(engine.aggregator().is_empty());
        assert!(engine.indicators().iter().all(|i| i.window_len() == 0));
    }

    #[test]
    fn tick_events_go_through_the_aggregator() {
        let mut engine = SignalEngine::from_config(&small_config()).unwrap();
        let bar = engine
            .on_event(&FeedEvent::Tick(Tick { price: 101.5, epoch: 125 }))
            .unwrap();
        assert_eq!(bar.bucket_start, 120);
        assert_eq!(engine.aggregator().len(), 1);
        assert!(engine.indicators().iter().all(|i| i.window_len() == 1));

        let dropped = engine.on_event(&FeedEvent::Tick(Tick { price: -1.0, epoch: 130 }));
        assert!(dropped.is_none());
        assert_eq!(engine.aggregator().current().unwrap().sample_count, 1);
    }

    #[test]
    fn reset_indicators_keeps_aggregator() {
        let mut engine = SignalEngine::from_config(&small_config()).unwrap();
        for i in 0..30_i64 {
            engine.on_sample(100.0 + i as f64, i * 60);
        }
        engine.reset_indicators();
        assert_eq!(engine.aggregator().len(), 30);
        for ind in engine.indicators() {
            assert_eq!(ind.window_len(), 0);
            assert!(ind.value().is_nan());
        }
    }

    #[test]
    fn force_recalculation_skips_healthy_indicators() {
        let mut engine = SignalEngine::from_config(&small_config()).unwrap();
        for i in 0..30_i64 {
            engine.on_sample(100.0 + (i % 4) as f64, i * 60);
        }
        assert_eq!(engine.force_recalculation(), 0);
    }
}
