// =============================================================================
// Feed decoding: JSON-lines samples and history seeds
// =============================================================================
//
// Upstream delivers either a one-off history pair `(times, prices)` or a stream
// of individual events. Each event line is one of:
//
//   { "price": "37000.5", "epoch": 1700000000 }               tick
//   { "bid": 36999.0, "ask": 37001.0, "epoch": 1700000000 }   quote → mid
//   { "open": .., "high": .., "low": .., "close": .., "epoch": .. }  bar
//
// Numeric fields may arrive as JSON numbers or numeric strings.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::bar::{Bar, Quote, Tick};

/// A decoded upstream event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeedEvent {
    Tick(Tick),
    Bar(Bar),
}

/// Bulk history consumed once at subscription time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    pub times: Vec<i64>,
    pub prices: Vec<f64>,
}

impl History {
    /// Load a `{"times": [...], "prices": [...]}` document from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read history from {}", path.display()))?;
        let history: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse history from {}", path.display()))?;

        info!(
            path = %path.display(),
            samples = history.times.len(),
            "history loaded"
        );
        Ok(history)
    }
}

/// Decode one JSON line into a feed event.
///
/// Quotes are collapsed to a tick here; a quote without a usable side is an
/// error so the caller can log and skip it.
pub fn parse_event(text: &str) -> Result<FeedEvent> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse feed JSON")?;

    let epoch = parse_epoch(&root["epoch"]).context("missing or invalid field epoch")?;

    if root.get("close").is_some() {
        let bar = Bar {
            open: parse_f64(&root["open"], "open")?,
            high: parse_f64(&root["high"], "high")?,
            low: parse_f64(&root["low"], "low")?,
            close: parse_f64(&root["close"], "close")?,
            bucket_start: epoch,
            sample_count: root["sample_count"].as_u64().unwrap_or(1),
        };
        return Ok(FeedEvent::Bar(bar));
    }

    if root.get("price").is_some() {
        let price = parse_f64(&root["price"], "price")?;
        return Ok(FeedEvent::Tick(Tick { price, epoch }));
    }

    if root.get("bid").is_some() || root.get("ask").is_some() {
        let quote = Quote {
            bid: parse_optional_f64(&root["bid"], "bid")?,
            ask: parse_optional_f64(&root["ask"], "ask")?,
            epoch,
        };
        return quote
            .to_tick()
            .map(FeedEvent::Tick)
            .context("quote has no usable side");
    }

    bail!("feed line is neither a tick, a quote nor a bar")
}

/// Feeds send numbers both as JSON numbers and as numeric strings.
fn parse_f64(val: &serde_json::Value, name: &str) -> Result<f64> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name} as f64: {s}")),
        serde_json::Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("field {name} is not a valid f64")),
        serde_json::Value::Null => bail!("missing field {name}"),
        _ => bail!("field {name} has unexpected JSON type"),
    }
}

fn parse_optional_f64(val: &serde_json::Value, name: &str) -> Result<Option<f64>> {
    if val.is_null() {
        return Ok(None);
    }
    parse_f64(val, name).map(Some)
}

fn parse_epoch(val: &serde_json::Value) -> Result<i64> {
    match val {
        serde_json::Value::String(s) => s.parse::<i64>().context("epoch is not an integer"),
        serde_json::Value::Number(n) => n.as_i64().context("epoch is not an integer"),
        _ => bail!("epoch has unexpected JSON type"),
    }
}
