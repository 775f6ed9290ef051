//! Auto-trading loop tests
//!
//! Drives the supervised loop on paused tokio time against a scripted market.

use specter::config::{AutoTradeConfig, ClassifierConfig, EngineConfig};
use specter::services::{
    AutoTrader, InMemoryLedger, MarketConditionClassifier, PaperTradingEngine, SimulatedMarket,
    StrategyManager,
};
use specter::types::*;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    engine: Arc<PaperTradingEngine>,
    trader: Arc<AutoTrader>,
    market: Arc<SimulatedMarket>,
}

fn uptrend(n: usize) -> Vec<PriceSample> {
    (0..n)
        .map(|i| PriceSample::new(i as i64 * 1_000, 100.0 * 1.003f64.powi(i as i32), 10.0))
        .collect()
}

async fn harness(min_confidence: f64) -> Harness {
    let market = Arc::new(SimulatedMarket::new(9));
    market.load_series("SOL/USD", uptrend(60));

    let engine = Arc::new(PaperTradingEngine::new(
        Arc::new(InMemoryLedger::new()),
        market.clone(),
        EngineConfig::default(),
    ));
    engine.initialize("auto", Some(100_000.0)).await.unwrap();

    let manager = Arc::new(StrategyManager::new(
        market.clone(),
        MarketConditionClassifier::new(ClassifierConfig::default()),
    ));
    let trader = Arc::new(AutoTrader::new(
        engine.clone(),
        manager,
        AutoTradeConfig {
            interval: Duration::from_secs(5),
            symbols: vec!["SOL/USD".to_string()],
            min_confidence,
            enabled_on_start: false,
        },
    ));

    Harness {
        engine,
        trader,
        market,
    }
}

// =============================================================================
// Loop
// =============================================================================

mod loop_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_loop_trades_while_enabled() {
        let h = harness(0.6).await;
        h.engine.enable_auto_trading();

        assert!(h.trader.start().await);
        tokio::time::sleep(Duration::from_secs(12)).await;
        h.trader.stop().await;

        let status = h.trader.status();
        assert!(!status.running);
        assert!(status.cycles >= 2);
        assert!(status.orders_filled >= 2);

        let orders = h.engine.orders(50).await.unwrap();
        assert_eq!(orders.len() as u64, status.orders_filled);
        assert!(orders.iter().all(|o| o.strategy == "momentum_rider"));
        assert!(orders.iter().all(|o| o.side == OrderSide::Buy));

        let account = h.engine.account().await.unwrap();
        assert!(account.cash_balance >= 0.0);
        assert!(account.cash_balance < 100_000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabling_stops_new_trades() {
        let h = harness(0.6).await;
        h.engine.enable_auto_trading();
        h.trader.start().await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        h.engine.disable_auto_trading();
        let placed = h.engine.orders(50).await.unwrap().len();
        assert!(placed >= 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.engine.orders(50).await.unwrap().len(), placed);

        let status = h.trader.status();
        assert!(status.running);
        assert!(!status.enabled);

        h.trader.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_and_restart() {
        let h = harness(0.6).await;

        assert!(h.trader.start().await);
        assert!(!h.trader.start().await);
        h.trader.stop().await;
        assert!(!h.trader.status().running);

        assert!(h.trader.start().await);
        assert!(h.trader.status().running);
        h.trader.stop().await;
    }
}

// =============================================================================
// Single cycles
// =============================================================================

mod cycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_confidence_threshold_filters_signals() {
        let h = harness(0.95).await;
        h.engine.enable_auto_trading();

        let report = h.trader.run_cycle().await;
        assert_eq!(report.signals, 1);
        assert_eq!(report.submitted, 0);
        assert!(h.engine.orders(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_outage_cycle_places_nothing() {
        let h = harness(0.6).await;
        h.engine.enable_auto_trading();
        h.market.set_unavailable(true);

        let report = h.trader.run_cycle().await;
        assert!(!report.skipped);
        assert_eq!(report.signals, 0);
        assert_eq!(report.filled, 0);
        assert!(h.engine.orders(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cycle_marks_open_positions() {
        let h = harness(0.6).await;
        h.engine.enable_auto_trading();

        let first = h.trader.run_cycle().await;
        assert_eq!(first.filled, 1);

        let second = h.trader.run_cycle().await;
        assert_eq!(second.positions_marked, 1);
        assert_eq!(h.trader.status().cycles, 2);
    }

    #[tokio::test]
    async fn test_rejections_are_counted() {
        let h = harness(0.6).await;
        h.engine.enable_auto_trading();

        // Signal targets 4000 of notional, well past the engine's cap
        h.engine
            .update_config(specter::config::ConfigUpdate {
                max_position_size: Some(1_000.0),
                ..Default::default()
            })
            .await
            .unwrap();

        let report = h.trader.run_cycle().await;
        assert_eq!(report.submitted, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(h.trader.status().orders_rejected, 1);
    }

    #[tokio::test]
    async fn test_fee_bound_account_still_fills() {
        let h = harness(0.6).await;
        h.engine.initialize("auto", Some(1_000.0)).await.unwrap();
        h.engine.enable_auto_trading();
        h.engine
            .update_config(specter::config::ConfigUpdate {
                fee_rate: Some(0.001),
                flat_fee: Some(1.0),
                ..Default::default()
            })
            .await
            .unwrap();

        let report = h.trader.run_cycle().await;
        assert_eq!(report.filled, 1);
        assert_eq!(report.rejected, 0);

        let account = h.engine.account().await.unwrap();
        assert!(account.cash_balance >= 0.0);
        assert!(account.cash_balance < 0.01);
    }
}
