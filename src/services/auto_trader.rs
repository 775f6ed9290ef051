//! Auto-Trading Loop
//!
//! Periodically marks the book to market, asks the strategy manager for
//! signals on each configured symbol and submits the confident ones to the
//! engine. Runs as a supervised tokio task with explicit start/stop.

use crate::config::AutoTradeConfig;
use crate::services::strategy_manager::StrategyManager;
use crate::services::trading::{PaperTradingEngine, TradingError};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Loop status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoTraderStatus {
    /// Whether the loop task is running
    pub running: bool,
    /// Engine auto-trading flag (cycles are skipped while false)
    pub enabled: bool,
    /// Cycles that ran, skipped ones excluded
    pub cycles: u64,
    pub signals_seen: u64,
    pub orders_filled: u64,
    pub orders_rejected: u64,
    pub last_error: Option<String>,
    /// When the last non-skipped cycle finished (ms)
    pub last_cycle_at: Option<i64>,
}

/// Outcome of one cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    /// Auto-trading was disabled, nothing ran
    pub skipped: bool,
    pub positions_marked: usize,
    pub signals: usize,
    /// Signals that cleared the confidence bar and were sent to the engine
    pub submitted: usize,
    pub filled: usize,
    pub rejected: usize,
    pub errors: Vec<String>,
}

/// Supervised auto-trading task.
pub struct AutoTrader {
    engine: Arc<PaperTradingEngine>,
    manager: Arc<StrategyManager>,
    config: AutoTradeConfig,
    status: RwLock<AutoTraderStatus>,
    shutdown_tx: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AutoTrader {
    pub fn new(
        engine: Arc<PaperTradingEngine>,
        manager: Arc<StrategyManager>,
        config: AutoTradeConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            engine,
            manager,
            config,
            status: RwLock::new(AutoTraderStatus::default()),
            shutdown_tx,
            handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &AutoTradeConfig {
        &self.config
    }

    /// Current status, with the engine's enabled flag filled in.
    pub fn status(&self) -> AutoTraderStatus {
        let mut status = match self.status.read() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        status.enabled = self.engine.is_auto_trading_enabled();
        status
    }

    fn update_status(&self, f: impl FnOnce(&mut AutoTraderStatus)) {
        match self.status.write() {
            Ok(mut status) => f(&mut *status),
            Err(poisoned) => f(&mut *poisoned.into_inner()),
        }
    }

    /// Spawn the loop. Returns false if it is already running.
    pub async fn start(self: &Arc<Self>) -> bool {
        let mut handle = self.handle.lock().await;
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }

        let trader = Arc::clone(self);
        let shutdown_rx = self.shutdown_tx.subscribe();
        *handle = Some(tokio::spawn(async move {
            trader.run(shutdown_rx).await;
        }));

        self.update_status(|s| s.running = true);
        info!(
            "Auto-trader started ({} symbols, every {:?})",
            self.config.symbols.len(),
            self.config.interval
        );
        true
    }

    /// Signal the loop to stop and wait for it. A cycle in progress finishes first.
    pub async fn stop(&self) {
        let handle = self.handle.lock().await.take();
        let Some(handle) = handle else {
            return;
        };

        let _ = self.shutdown_tx.send(());
        if let Err(e) = handle.await {
            error!("Auto-trader task ended abnormally: {}", e);
        }

        self.update_status(|s| s.running = false);
        info!("Auto-trader stopped");
    }

    async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = interval(self.config.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_cycle().await;
                    for e in &report.errors {
                        error!("Auto-trading cycle error: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Auto-trader received shutdown signal");
                    break;
                }
            }
        }
    }

    /// Run one cycle now.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        if !self.engine.is_auto_trading_enabled() {
            report.skipped = true;
            return report;
        }

        match self.engine.mark_to_market().await {
            Ok(marked) => report.positions_marked = marked,
            Err(TradingError::NotInitialized) => {
                report.errors.push(TradingError::NotInitialized.to_string());
                self.record(&report);
                return report;
            }
            Err(e) => report.errors.push(format!("mark to market: {}", e)),
        }

        for symbol in &self.config.symbols {
            let snapshot = match self.engine.snapshot(symbol).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    report.errors.push(format!("{}: {}", symbol, e));
                    continue;
                }
            };

            let signals = self.manager.generate_signals(symbol, &snapshot).await;
            report.signals += signals.len();

            for signal in signals {
                if signal.confidence < self.config.min_confidence {
                    debug!(
                        "Skipping {} signal from {}: confidence {:.2} below {:.2}",
                        signal.symbol, signal.strategy_id, signal.confidence, self.config.min_confidence
                    );
                    continue;
                }

                report.submitted += 1;
                match self.engine.execute_signal(&signal).await {
                    Ok(result) => {
                        report.filled += 1;
                        debug!("Auto-trade filled order {}", result.order.id);
                    }
                    Err(e) => {
                        report.rejected += 1;
                        warn!("Auto-trade on {} rejected: {}", signal.symbol, e);
                    }
                }
            }
        }

        self.record(&report);
        debug!(
            "Auto-trading cycle: {} signals, {} filled, {} rejected",
            report.signals, report.filled, report.rejected
        );
        report
    }

    fn record(&self, report: &CycleReport) {
        self.update_status(|s| {
            s.cycles += 1;
            s.signals_seen += report.signals as u64;
            s.orders_filled += report.filled as u64;
            s.orders_rejected += report.rejected as u64;
            s.last_error = report.errors.last().cloned();
            s.last_cycle_at = Some(chrono::Utc::now().timestamp_millis());
        });
    }
}
