use specter::config::Config;
use specter::services::{
    AutoTrader, EngineEvent, InMemoryLedger, Ledger, MarketConditionClassifier, PaperTradingEngine,
    SimulatedMarket, SqliteStore, StrategyManager,
};
use specter::AppState;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "specter=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env());
    info!("Starting Specter server on {}:{}", config.host, config.port);

    // Ledger: SQLite when a path is configured, otherwise in-memory
    let ledger: Arc<dyn Ledger> = match &config.database_path {
        Some(path) => {
            info!("Using SQLite ledger at {}", path);
            Arc::new(SqliteStore::new(path)?)
        }
        None => {
            info!("Using in-memory ledger");
            Arc::new(InMemoryLedger::new())
        }
    };

    // Simulated market feed, warmed up so the classifier has a full window
    let market = Arc::new(SimulatedMarket::with_defaults(
        config.market_seed,
        config.classifier.window * 2,
    ));

    let engine = Arc::new(PaperTradingEngine::new(
        ledger,
        market.clone(),
        config.engine.clone(),
    ));

    // Pick up an existing account from a durable ledger, or start fresh
    if engine.resume(&config.user_id).await?.is_none() {
        engine.initialize(&config.user_id, None).await?;
    }

    let strategies = Arc::new(
        StrategyManager::new(
            market.clone(),
            MarketConditionClassifier::new(config.classifier.clone()),
        )
        .with_gateway_timeout(config.engine.gateway_timeout),
    );

    let auto_trader = Arc::new(AutoTrader::new(
        engine.clone(),
        strategies.clone(),
        config.auto_trade.clone(),
    ));

    // Notification sink: log every engine event
    {
        let mut events = engine.subscribe_events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => log_event(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event sink lagged, dropped {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    // Background tasks
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let market_task = tokio::spawn(
        market
            .clone()
            .run(config.market_tick, shutdown_tx.subscribe()),
    );

    if config.auto_trade.enabled_on_start {
        engine.enable_auto_trading();
    }
    auto_trader.start().await;

    // Create application state
    let state = AppState {
        config: config.clone(),
        engine,
        strategies,
        auto_trader: auto_trader.clone(),
    };

    // Start the server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Specter server listening on {}", addr);

    axum::serve(listener, specter::app(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        })
        .await?;

    auto_trader.stop().await;
    let _ = shutdown_tx.send(());
    let _ = market_task.await;

    info!("Specter server stopped");
    Ok(())
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::AccountInitialized { account } => {
            info!(
                "[event] account {} ready with {:.2}",
                account.id, account.cash_balance
            );
        }
        EngineEvent::OrderFilled {
            order,
            realized_pnl,
            ..
        } => {
            info!(
                "[event] {} {} {} @ {:.2} via {} (realized {:.2})",
                order.side,
                order.quantity,
                order.symbol,
                order.fill_price.unwrap_or_default(),
                order.strategy,
                realized_pnl
            );
        }
        EngineEvent::OrderRejected { order, error_kind } => {
            warn!(
                "[event] rejected {} {} {} via {}: {} ({})",
                order.side,
                order.quantity,
                order.symbol,
                order.strategy,
                order.reject_reason.as_deref().unwrap_or("unknown"),
                error_kind
            );
        }
        EngineEvent::AutoTradingToggled { enabled, .. } => {
            info!("[event] auto-trading {}", if *enabled { "on" } else { "off" });
        }
        EngineEvent::ConfigUpdated { config } => {
            info!("[event] engine config updated: {:?}", config);
        }
    }
}
