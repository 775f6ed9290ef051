pub mod auto_trader;
pub mod classifier;
pub mod ledger;
pub mod market_data;
pub mod sqlite_store;
pub mod strategy_manager;
pub mod trading;

pub use auto_trader::{AutoTrader, AutoTraderStatus, CycleReport};
pub use classifier::MarketConditionClassifier;
pub use ledger::{InMemoryLedger, Ledger, LedgerCommit, LedgerError, PositionChange};
pub use market_data::{GatewayError, GatewayFuture, MarketDataGateway, SimulatedMarket};
pub use sqlite_store::SqliteStore;
pub use strategy_manager::{builtin_strategies, compatibility_score, StrategyError, StrategyManager};
pub use trading::{EngineEvent, PaperTradingEngine, TradingError};
