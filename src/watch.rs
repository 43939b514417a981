//! Long-running sync loop.
//!
//! Runs the indexer on a fixed interval. Each tick still goes through the
//! indexer's staleness gate, so a short interval doesn't re-crawl a fresh
//! catalog.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::app::context::format_duration;
use crate::app::{AppContext, Result};
use crate::indexer::RunOutcome;

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub interval_secs: u64,
    /// Run a sync immediately instead of waiting for the first tick.
    pub sync_on_start: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval_secs: 6 * 3600,
            sync_on_start: true,
        }
    }
}

impl WatchConfig {
    /// Parses intervals like "30m", "6h", "1d", "90s" or raw seconds.
    pub fn parse_interval(s: &str) -> std::result::Result<u64, String> {
        let s = s.trim().to_lowercase();

        let (digits, scale, unit) = if let Some(d) = s.strip_suffix('d') {
            (d, 86400, "days")
        } else if let Some(h) = s.strip_suffix('h') {
            (h, 3600, "hours")
        } else if let Some(m) = s.strip_suffix('m') {
            (m, 60, "minutes")
        } else if let Some(sec) = s.strip_suffix('s') {
            (sec, 1, "seconds")
        } else {
            (s.as_str(), 1, "interval")
        };

        let value = digits
            .parse::<u64>()
            .map_err(|_| format!("Invalid {}: {}. Use a format like '30m', '6h', '1d'", unit, s))?;
        if value == 0 {
            return Err("Interval must be greater than zero".to_string());
        }
        value
            .checked_mul(scale)
            .ok_or_else(|| format!("Interval too large: {}", s))
    }

    pub fn format_interval(secs: u64) -> String {
        if secs >= 86400 && secs.is_multiple_of(86400) {
            format!("{}d", secs / 86400)
        } else if secs >= 3600 && secs.is_multiple_of(3600) {
            format!("{}h", secs / 3600)
        } else if secs >= 60 && secs.is_multiple_of(60) {
            format!("{}m", secs / 60)
        } else {
            format!("{}s", secs)
        }
    }
}

pub struct Watcher {
    ctx: Arc<AppContext>,
    config: WatchConfig,
}

impl Watcher {
    pub fn new(ctx: Arc<AppContext>, config: WatchConfig) -> Self {
        Self { ctx, config }
    }

    /// Loops until Ctrl-C or the context is cancelled.
    pub async fn run(&self) -> Result<()> {
        let cancel = self.ctx.cancellation();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, stopping");
                on_signal.cancel();
            }
        });

        info!(
            interval = %WatchConfig::format_interval(self.config.interval_secs),
            "Watching portal"
        );

        let mut timer = interval(Duration::from_secs(self.config.interval_secs));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if !self.config.sync_on_start {
            timer.tick().await;
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => self.sync_once().await,
            }
        }

        info!("Watch loop stopped");
        Ok(())
    }

    async fn sync_once(&self) {
        match self.ctx.indexer.run(false).await {
            Ok(RunOutcome::Fresh) => debug!("Index fresh, skipping"),
            Ok(RunOutcome::AlreadyRunning) => debug!("Indexer already running"),
            Ok(RunOutcome::Completed(report)) => info!(
                categories = report.categories,
                pages = report.pages,
                items = report.items,
                persisted = report.persisted,
                "Sync finished in {}",
                format_duration(report.duration)
            ),
            Err(e) if e.is_cancelled() => debug!("Sync cancelled"),
            Err(e) => error!("Sync failed: {}", e),
        }
    }
}
