// =============================================================================
// Candle Aggregator: raw samples into fixed-width bars
// =============================================================================
//
// Two bucketing modes, selected by the sign of the configured width:
//
//   width > 0  → time buckets of `width` seconds,
//                bucket_start = floor(epoch / width) * width
//   width < 0  → count buckets: a bar closes after |width| samples
//
// The most recent bar is the in-progress bucket and is updated in place. Every
// bar is kept for the lifetime of the aggregator; indicators copy the tail
// they need.

use anyhow::{bail, Result};
use tracing::{debug, warn};

use super::bar::{Bar, Tick};

/// How samples are grouped into bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketMode {
    /// Fixed time span in seconds.
    Time(i64),
    /// Fixed number of samples per bar.
    Count(u64),
}

impl BucketMode {
    /// Decode the signed width encoding. Zero is not a valid width.
    pub fn from_width(width: i64) -> Result<Self> {
        match width {
            0 => bail!("bucket width must be non-zero"),
            w if w > 0 => Ok(Self::Time(w)),
            w => Ok(Self::Count(w.unsigned_abs())),
        }
    }
}

impl std::fmt::Display for BucketMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Time(secs) => write!(f, "{secs}s"),
            Self::Count(n) => write!(f, "{n} samples"),
        }
    }
}

/// Converts a stream of samples into a sequence of bars.
pub struct CandleAggregator {
    mode: BucketMode,
    bars: Vec<Bar>,
}

impl CandleAggregator {
    /// Create an aggregator from a signed bucket width (see module docs).
    pub fn new(bucket_width: i64) -> Result<Self> {
        Ok(Self::with_mode(BucketMode::from_width(bucket_width)?))
    }

    pub fn with_mode(mode: BucketMode) -> Self {
        Self {
            mode,
            bars: Vec::new(),
        }
    }

    pub fn bucket_mode(&self) -> BucketMode {
        self.mode
    }

    /// Fold one sample into the bar sequence and return the bar that absorbed
    /// it. Callers compare `bucket_start` against the previous return value to
    /// detect bucket boundaries.
    ///
    /// Returns `None` when the sample is dropped: a non-finite or non-positive
    /// price, or (time mode) a sample older than the in-progress bucket.
    pub fn process_sample(&mut self, price: f64, epoch: i64) -> Option<Bar> {
        if !price.is_finite() || price <= 0.0 {
            warn!(price, epoch, "dropping invalid sample");
            return None;
        }

        let bucket_start = self.bucket_for(epoch)?;
        if self.opens_new_bucket(bucket_start) {
            let bar = Bar::from_price(price, bucket_start);
            debug!(bucket_start, price, mode = %self.mode, "new bar opened");
            self.bars.push(bar);
            return Some(bar);
        }

        let current = self.bars.last_mut()?;
        current.absorb(price);
        Some(*current)
    }

    /// Convenience wrapper over [`process_sample`](Self::process_sample).
    pub fn process_tick(&mut self, tick: &Tick) -> Option<Bar> {
        self.process_sample(tick.price, tick.epoch)
    }

    /// Fold a finer-grained bar into the sequence. Uses the finer bar's
    /// `bucket_start` for the boundary decision; in count mode the finer bar's
    /// sample count is what fills the bucket.
    ///
    /// A finer bar is never split. In count mode a bucket closes once its
    /// sample count reaches the limit, so the last finer bar merged into it
    /// may carry the count past the limit.
    pub fn process_bar(&mut self, finer: &Bar) -> Option<Bar> {
        if let Some(reason) = finer.defect() {
            warn!(bucket_start = finer.bucket_start, reason, "dropping invalid bar");
            return None;
        }

        let bucket_start = self.bucket_for(finer.bucket_start)?;
        if self.opens_new_bucket(bucket_start) {
            let bar = Bar {
                bucket_start,
                sample_count: finer.sample_count.max(1),
                ..*finer
            };
            debug!(bucket_start, mode = %self.mode, "new bar opened from finer bar");
            self.bars.push(bar);
            return Some(bar);
        }

        let current = self.bars.last_mut()?;
        current.merge(finer);
        Some(*current)
    }

    /// Replay a `(times, prices)` history pair in order and return the full
    /// accumulated bar sequence. Used once, at subscription time, to seed
    /// indicators.
    pub fn ingest_history(&mut self, times: &[i64], prices: &[f64]) -> Vec<Bar> {
        if times.len() != prices.len() {
            warn!(
                times = times.len(),
                prices = prices.len(),
                "history arrays differ in length; extra entries ignored"
            );
        }
        for (&epoch, &price) in times.iter().zip(prices) {
            self.process_sample(price, epoch);
        }
        debug!(bars = self.bars.len(), "history ingested");
        self.bars.clone()
    }

    /// The in-progress bar, if any.
    pub fn current(&self) -> Option<&Bar> {
        self.bars.last()
    }

    /// All bars produced so far (oldest first).
    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    // -------------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------------

    /// Bucket key for a sample at `epoch`, or `None` if the sample belongs to
    /// a bucket that has already been superseded.
    fn bucket_for(&self, epoch: i64) -> Option<i64> {
        match self.mode {
            BucketMode::Time(width) => {
                let start = epoch.div_euclid(width) * width;
                match self.bars.last() {
                    Some(last) if start < last.bucket_start => {
                        warn!(
                            epoch,
                            bucket_start = start,
                            current = last.bucket_start,
                            "dropping late sample for a closed bucket"
                        );
                        None
                    }
                    _ => Some(start),
                }
            }
            BucketMode::Count(limit) => match self.bars.last() {
                // Still filling the current bar: keep its key.
                Some(last) if last.sample_count < limit => Some(last.bucket_start),
                // Bar keys must stay strictly increasing even when several
                // count buckets close within the same second.
                Some(last) => Some(epoch.max(last.bucket_start + 1)),
                None => Some(epoch),
            },
        }
    }

    fn opens_new_bucket(&self, bucket_start: i64) -> bool {
        match (self.mode, self.bars.last()) {
            (_, None) => true,
            (BucketMode::Time(_), Some(last)) => last.bucket_start != bucket_start,
            (BucketMode::Count(limit), Some(last)) => last.sample_count >= limit,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn assert_ohlc_invariant(bars: &[Bar]) {
        for b in bars {
            assert!(b.low <= b.open && b.open <= b.high, "open out of range: {b}");
            assert!(b.low <= b.close && b.close <= b.high, "close out of range: {b}");
        }
    }

    #[test]
    fn zero_width_rejected() {
        assert!(CandleAggregator::new(0).is_err());
    }

    #[test]
    fn width_sign_selects_mode() {
        assert_eq!(CandleAggregator::new(60).unwrap().bucket_mode(), BucketMode::Time(60));
        assert_eq!(CandleAggregator::new(-5).unwrap().bucket_mode(), BucketMode::Count(5));
    }

    #[test]
    fn time_buckets_follow_floor_division() {
        let mut agg = CandleAggregator::new(60).unwrap();
        let samples = [(0, 100.0), (59, 101.0), (60, 102.0), (119, 99.0), (185, 98.0)];
        for (epoch, price) in samples {
            agg.process_sample(price, epoch).unwrap();
        }
        let starts: Vec<i64> = agg.bars().iter().map(|b| b.bucket_start).collect();
        assert_eq!(starts, vec![0, 60, 180]);
        assert_eq!(agg.bars()[0].sample_count, 2);
        assert_eq!(agg.bars()[1].sample_count, 2);
        assert_eq!(agg.bars()[1].low, 99.0);
    }

    #[test]
    fn same_bucket_iff_same_floor() {
        let w = 30;
        let epochs = [3, 29, 30, 31, 59, 60, 61, 200, 209, 210];
        for &e1 in &epochs {
            for &e2 in &epochs {
                if e2 < e1 {
                    continue;
                }
                let mut agg = CandleAggregator::new(w).unwrap();
                let a = agg.process_sample(100.0, e1).unwrap();
                let b = agg.process_sample(101.0, e2).unwrap();
                let same = a.bucket_start == b.bucket_start;
                assert_eq!(same, e1.div_euclid(w) == e2.div_euclid(w), "e1={e1} e2={e2}");
            }
        }
    }

    #[test]
    fn negative_epochs_floor_correctly() {
        let mut agg = CandleAggregator::new(60).unwrap();
        let bar = agg.process_sample(100.0, -1).unwrap();
        assert_eq!(bar.bucket_start, -60);
    }

    #[test]
    fn count_buckets_close_every_n_samples() {
        let mut agg = CandleAggregator::new(-3).unwrap();
        for i in 0..10 {
            agg.process_sample(100.0 + i as f64, 1_000 + i).unwrap();
        }
        let counts: Vec<u64> = agg.bars().iter().map(|b| b.sample_count).collect();
        assert_eq!(counts, vec![3, 3, 3, 1]);
        assert_eq!(agg.bars()[1].open, 103.0);
        assert_eq!(agg.bars()[1].close, 105.0);
    }

    #[test]
    fn count_bucket_keys_stay_increasing_within_one_second() {
        let mut agg = CandleAggregator::new(-2).unwrap();
        for i in 0..6 {
            agg.process_sample(100.0 + i as f64, 500).unwrap();
        }
        let starts: Vec<i64> = agg.bars().iter().map(|b| b.bucket_start).collect();
        assert_eq!(starts, vec![500, 501, 502]);
    }

    #[test]
    fn returned_bar_reflects_update() {
        let mut agg = CandleAggregator::new(60).unwrap();
        agg.process_sample(100.0, 0);
        let bar = agg.process_sample(110.0, 10).unwrap();
        assert_eq!(bar.high, 110.0);
        assert_eq!(bar.close, 110.0);
        assert_eq!(bar.sample_count, 2);
        assert_eq!(agg.current(), Some(&bar));
    }

    #[test]
    fn invalid_prices_dropped() {
        let mut agg = CandleAggregator::new(60).unwrap();
        assert!(agg.process_sample(f64::NAN, 0).is_none());
        assert!(agg.process_sample(-1.0, 0).is_none());
        assert!(agg.process_sample(0.0, 0).is_none());
        assert!(agg.is_empty());
    }

    #[test]
    fn late_samples_dropped() {
        let mut agg = CandleAggregator::new(60).unwrap();
        agg.process_sample(100.0, 125);
        assert!(agg.process_sample(90.0, 30).is_none());
        assert_eq!(agg.len(), 1);
        assert_eq!(agg.current().unwrap().low, 100.0);
    }

    #[test]
    fn ohlc_invariant_holds_for_noisy_stream() {
        let mut agg = CandleAggregator::new(15).unwrap();
        for i in 0..500_i64 {
            let price = 100.0 + ((i as f64) * 0.37).sin() * 5.0 + (i % 7) as f64 * 0.1;
            agg.process_sample(price, i * 2);
        }
        assert!(agg.len() > 10);
        assert_ohlc_invariant(agg.bars());
    }

    #[test]
    fn ingest_history_returns_all_bars() {
        let mut agg = CandleAggregator::new(10).unwrap();
        let times = [0, 1, 12, 15, 27];
        let prices = [1.0, 2.0, 3.0, 2.5, 4.0];
        let bars = agg.ingest_history(&times, &prices);
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].close, 2.0);
        assert_eq!(bars[1].high, 3.0);
        assert_eq!(bars[2].bucket_start, 20);
    }

    #[test]
    fn ingest_history_truncates_mismatched_lengths() {
        let mut agg = CandleAggregator::new(10).unwrap();
        let bars = agg.ingest_history(&[0, 10, 20], &[1.0, 2.0]);
        assert_eq!(bars.len(), 2);
    }

    #[test]
    fn finer_bars_merge_into_coarser_buckets() {
        let mut agg = CandleAggregator::new(300).unwrap();
        let finer = |start: i64, o: f64, h: f64, l: f64, c: f64| Bar {
            open: o,
            high: h,
            low: l,
            close: c,
            bucket_start: start,
            sample_count: 4,
        };
        agg.process_bar(&finer(0, 100.0, 102.0, 99.0, 101.0));
        agg.process_bar(&finer(60, 101.0, 104.0, 100.0, 103.0));
        agg.process_bar(&finer(300, 103.0, 103.5, 101.0, 102.0));
        assert_eq!(agg.len(), 2);
        let first = agg.bars()[0];
        assert_eq!(first.open, 100.0);
        assert_eq!(first.high, 104.0);
        assert_eq!(first.low, 99.0);
        assert_eq!(first.close, 103.0);
        assert_eq!(first.sample_count, 8);
        assert_eq!(agg.bars()[1].bucket_start, 300);
    }

    #[test]
    fn ticks_bucket_like_raw_samples() {
        let mut agg = CandleAggregator::new(60).unwrap();
        let a = agg.process_tick(&Tick { price: 10.0, epoch: 61 }).unwrap();
        let b = agg.process_tick(&Tick { price: 12.0, epoch: 119 }).unwrap();
        assert_eq!((a.bucket_start, b.bucket_start), (60, 60));
        assert_eq!(b.high, 12.0);
        assert!(agg.process_tick(&Tick { price: f64::NAN, epoch: 120 }).is_none());
        assert_eq!(agg.len(), 1);
    }

    #[test]
    fn count_mode_finer_bars_are_not_split() {
        let mut agg = CandleAggregator::new(-3).unwrap();
        for (i, epoch) in [10_i64, 20, 30, 40].into_iter().enumerate() {
            let mut b = Bar::from_price(100.0 + i as f64, epoch);
            b.sample_count = 2;
            assert!(agg.process_bar(&b).is_some());
        }
        let counts: Vec<u64> = agg.bars().iter().map(|b| b.sample_count).collect();
        assert_eq!(counts, vec![4, 4]);
        let starts: Vec<i64> = agg.bars().iter().map(|b| b.bucket_start).collect();
        assert_eq!(starts, vec![10, 30]);
        assert_eq!(agg.bars()[0].close, 101.0);
    }

    #[test]
    fn finer_bar_with_defect_dropped() {
        let mut agg = CandleAggregator::new(300).unwrap();
        let mut bad = Bar::from_price(100.0, 0);
        bad.high = 90.0;
        assert!(agg.process_bar(&bad).is_none());
        assert!(agg.is_empty());
    }
}
