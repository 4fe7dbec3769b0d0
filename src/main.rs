// =============================================================================
// candle-signals: Replay Entry Point
// =============================================================================
//
// Reads JSON-lines ticks, quotes or bars from stdin, aggregates them into
// candles and runs the indicator set over them. Signals are logged as they
// fire. The engine is optionally seeded from a history file first.
// =============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use candle_signals::market_data::feed::parse_event;
use candle_signals::{EngineConfig, History, Indicator, SignalEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path =
        std::env::var("CANDLE_CONFIG").unwrap_or_else(|_| "engine_config.json".into());
    let mut config = EngineConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        EngineConfig::default()
    });

    // Override bucket width from env if available.
    if let Ok(width) = std::env::var("CANDLE_BUCKET_WIDTH") {
        match width.trim().parse::<i64>() {
            Ok(w) => config.bucket_width = w,
            Err(e) => warn!(value = %width, error = %e, "ignoring invalid CANDLE_BUCKET_WIDTH"),
        }
    }

    // ── 2. Build the engine ──────────────────────────────────────────────
    let engine = Arc::new(Mutex::new(SignalEngine::from_config(&config)?));

    // ── 3. Signal listeners ──────────────────────────────────────────────
    let receivers: Vec<_> = {
        let mut eng = engine.lock();
        (0..eng.indicators().len())
            .filter_map(|idx| eng.indicator_mut(idx).map(|ind| ind.subscribe_channel()))
            .collect()
    };
    // Firing values are logged by the indicators themselves; these tasks only
    // route the notification.
    for mut rx in receivers {
        tokio::spawn(async move {
            while let Some(fired) = rx.recv().await {
                info!(
                    indicator = fired.indicator,
                    timestamp = fired.timestamp,
                    "SIGNAL"
                );
            }
        });
    }

    // ── 4. Optional history seed ─────────────────────────────────────────
    if let Ok(path) = std::env::var("CANDLE_HISTORY") {
        match History::load(&path) {
            Ok(history) => {
                engine.lock().seed_history(&history.times, &history.prices);
            }
            Err(e) => error!(path = %path, error = %e, "Failed to load history; starting cold"),
        }
    }

    // ── 5. Forced-recalculation sweep ────────────────────────────────────
    let sweep_engine = engine.clone();
    let sweep_ms = config.breakout.force_recalc_interval_ms.max(100) as u64;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(sweep_ms));
        loop {
            interval.tick().await;
            let retried = sweep_engine.lock().force_recalculation();
            if retried > 0 {
                info!(retried, "forced recalculation attempted");
            }
        }
    });

    // ── 6. Feed loop (stdin, one JSON event per line) ────────────────────
    let feed_engine = engine.clone();
    let feed = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut processed: u64 = 0;
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match parse_event(line) {
                        Ok(event) => {
                            feed_engine.lock().on_event(&event);
                            processed += 1;
                        }
                        Err(e) => warn!(error = %e, "failed to parse feed line"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "stdin read error");
                    break;
                }
            }
        }
        processed
    });

    info!("Feed running. Press Ctrl+C to stop.");

    // ── 7. Shutdown on EOF or Ctrl+C ─────────────────────────────────────
    tokio::select! {
        result = feed => {
            match result {
                Ok(processed) => info!(processed, "feed ended"),
                Err(e) => error!(error = %e, "feed task failed"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Shutdown signal received, stopping");
        }
    }

    // Let listener tasks drain what is already queued.
    tokio::task::yield_now().await;

    let bars = engine.lock().aggregator().len();
    info!(bars, "candle-signals shut down complete.");
    Ok(())
}
