// =============================================================================
// Bar / Tick / Quote: the data points flowing through the engine
// =============================================================================
//
// A `Bar` is the OHLC summary of one bucket. It is mutated only while it is
// the in-progress bucket of an aggregator; once a newer bucket opens it is
// never touched again.
//
// Invariant for every bar the engine produces:
//   low <= min(open, close)  and  high >= max(open, close)
//   all prices finite and > 0

use serde::{Deserialize, Serialize};

/// OHLC bar keyed by the start of its bucket (epoch seconds).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Bucket start, epoch seconds.
    #[serde(alias = "epoch")]
    pub bucket_start: i64,
    /// Number of raw samples folded into this bar (volume proxy).
    #[serde(default = "default_sample_count")]
    pub sample_count: u64,
}

fn default_sample_count() -> u64 {
    1
}

impl Bar {
    /// A fresh bar opened by a single sample.
    pub fn from_price(price: f64, bucket_start: i64) -> Self {
        Self {
            open: price,
            high: price,
            low: price,
            close: price,
            bucket_start,
            sample_count: 1,
        }
    }

    /// Fold one more sample into this bar.
    pub fn absorb(&mut self, price: f64) {
        self.close = price;
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.sample_count += 1;
    }

    /// Fold a finer-grained bar into this one. The open is kept, the range is
    /// extended and the close replaced.
    pub fn merge(&mut self, finer: &Bar) {
        self.close = finer.close;
        self.high = self.high.max(finer.high);
        self.low = self.low.min(finer.low);
        self.sample_count += finer.sample_count.max(1);
    }

    /// Why this bar must not enter an indicator window, if anything.
    ///
    /// Checks the fields the indicators actually read (high/low/close) plus
    /// the open, since a bar with a broken open violates the OHLC invariant.
    pub fn defect(&self) -> Option<&'static str> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite()) {
            return Some("non-finite price");
        }
        if prices.iter().any(|&p| p <= 0.0) {
            return Some("non-positive price");
        }
        if self.high < self.low {
            return Some("high below low");
        }
        None
    }

    pub fn is_valid(&self) -> bool {
        self.defect().is_none()
    }
}

impl std::fmt::Display for Bar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] O={} H={} L={} C={} n={}",
            self.bucket_start, self.open, self.high, self.low, self.close, self.sample_count
        )
    }
}

/// A single raw price observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub price: f64,
    /// Epoch seconds.
    pub epoch: i64,
}

/// Bid/ask quote. Collapses to a single representative price before it
/// reaches the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    #[serde(default)]
    pub bid: Option<f64>,
    #[serde(default)]
    pub ask: Option<f64>,
    pub epoch: i64,
}

impl Quote {
    /// Mid price when both sides are usable, otherwise whichever side is.
    /// Returns `None` when neither side is a valid price.
    pub fn to_tick(&self) -> Option<Tick> {
        let usable = |p: Option<f64>| p.filter(|v| v.is_finite() && *v > 0.0);
        let price = match (usable(self.bid), usable(self.ask)) {
            (Some(b), Some(a)) => (b + a) / 2.0,
            (Some(b), None) => b,
            (None, Some(a)) => a,
            (None, None) => return None,
        };
        Some(Tick {
            price,
            epoch: self.epoch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_bar_is_flat() {
        let b = Bar::from_price(101.5, 60);
        assert_eq!(b.open, 101.5);
        assert_eq!(b.high, 101.5);
        assert_eq!(b.low, 101.5);
        assert_eq!(b.close, 101.5);
        assert_eq!(b.sample_count, 1);
    }

    #[test]
    fn absorb_extends_range() {
        let mut b = Bar::from_price(100.0, 0);
        b.absorb(105.0);
        b.absorb(97.0);
        b.absorb(99.0);
        assert_eq!(b.open, 100.0);
        assert_eq!(b.high, 105.0);
        assert_eq!(b.low, 97.0);
        assert_eq!(b.close, 99.0);
        assert_eq!(b.sample_count, 4);
    }

    #[test]
    fn merge_keeps_open_and_sums_counts() {
        let mut b = Bar::from_price(100.0, 0);
        let finer = Bar {
            open: 100.5,
            high: 103.0,
            low: 99.5,
            close: 102.0,
            bucket_start: 30,
            sample_count: 7,
        };
        b.merge(&finer);
        assert_eq!(b.open, 100.0);
        assert_eq!(b.high, 103.0);
        assert_eq!(b.low, 99.5);
        assert_eq!(b.close, 102.0);
        assert_eq!(b.sample_count, 8);
    }

    #[test]
    fn defects_are_reported() {
        let mut b = Bar::from_price(100.0, 0);
        assert!(b.is_valid());

        b.high = f64::NAN;
        assert_eq!(b.defect(), Some("non-finite price"));

        let mut b = Bar::from_price(100.0, 0);
        b.low = 0.0;
        assert_eq!(b.defect(), Some("non-positive price"));

        let mut b = Bar::from_price(100.0, 0);
        b.high = 99.0;
        b.low = 101.0;
        assert_eq!(b.defect(), Some("high below low"));
    }

    #[test]
    fn quote_collapses_to_mid() {
        let q = Quote {
            bid: Some(99.0),
            ask: Some(101.0),
            epoch: 5,
        };
        assert_eq!(q.to_tick(), Some(Tick { price: 100.0, epoch: 5 }));
    }

    #[test]
    fn one_sided_quote_uses_available_side() {
        let q = Quote {
            bid: None,
            ask: Some(101.0),
            epoch: 5,
        };
        assert_eq!(q.to_tick().map(|t| t.price), Some(101.0));

        let q = Quote {
            bid: Some(-1.0),
            ask: None,
            epoch: 5,
        };
        assert!(q.to_tick().is_none());
    }

    #[test]
    fn bar_deserialises_with_epoch_alias() {
        let json = r#"{"open":1.0,"high":2.0,"low":0.5,"close":1.5,"epoch":120}"#;
        let b: Bar = serde_json::from_str(json).unwrap();
        assert_eq!(b.bucket_start, 120);
        assert_eq!(b.sample_count, 1);
    }
}
