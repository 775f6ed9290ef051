//! Strategy catalog and signal types.

use serde::{Deserialize, Serialize};

use super::{MarketCondition, OrderSide};

/// Strategy family, the key into the compatibility matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyFamily {
    Momentum,
    MeanReversion,
    Breakout,
    AdaptiveComposite,
}

impl std::fmt::Display for StrategyFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyFamily::Momentum => write!(f, "momentum"),
            StrategyFamily::MeanReversion => write!(f, "mean reversion"),
            StrategyFamily::Breakout => write!(f, "breakout"),
            StrategyFamily::AdaptiveComposite => write!(f, "adaptive composite"),
        }
    }
}

/// Risk appetite of a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Conservative,
    #[default]
    Moderate,
    Aggressive,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Conservative => write!(f, "conservative"),
            RiskLevel::Moderate => write!(f, "moderate"),
            RiskLevel::Aggressive => write!(f, "aggressive"),
        }
    }
}

/// Activation state. Only `Active` strategies produce signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyState {
    Active,
    #[default]
    Paused,
    /// Stopped until explicitly re-activated
    Stopped,
}

impl std::fmt::Display for StrategyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyState::Active => write!(f, "active"),
            StrategyState::Paused => write!(f, "paused"),
            StrategyState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Tunable parameters of a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyParameters {
    #[serde(default)]
    pub risk_level: RiskLevel,
    /// Cap on the notional of any single signal
    pub max_position_size: f64,
    /// Stop-loss distance as a fraction of entry (0.02 = 2%)
    pub stop_loss_pct: f64,
    /// Take-profit distance as a fraction of entry
    pub take_profit_pct: f64,
    /// Bar timeframe the strategy is tuned for (e.g. "15m")
    pub timeframe: String,
    /// Eligible symbols; empty means every symbol
    #[serde(default)]
    pub symbols: Vec<String>,
}

impl Default for StrategyParameters {
    fn default() -> Self {
        Self {
            risk_level: RiskLevel::Moderate,
            max_position_size: 5_000.0,
            stop_loss_pct: 0.02,
            take_profit_pct: 0.04,
            timeframe: "15m".to_string(),
            symbols: Vec::new(),
        }
    }
}

/// A catalog entry. Configuration only; nothing runs per strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub family: StrategyFamily,
    pub parameters: StrategyParameters,
    #[serde(default)]
    pub state: StrategyState,
}

impl StrategyDefinition {
    pub fn new(id: &str, name: &str, family: StrategyFamily, parameters: StrategyParameters) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            family,
            parameters,
            state: StrategyState::Paused,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_state(mut self, state: StrategyState) -> Self {
        self.state = state;
        self
    }

    pub fn is_active(&self) -> bool {
        self.state == StrategyState::Active
    }

    /// Whether this strategy may trade `symbol`.
    pub fn is_eligible_for(&self, symbol: &str) -> bool {
        self.parameters.symbols.is_empty()
            || self
                .parameters
                .symbols
                .iter()
                .any(|s| s.eq_ignore_ascii_case(symbol))
    }
}

/// An active strategy with its compatibility score (0-100) for a condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredStrategy {
    pub strategy: StrategyDefinition,
    pub score: f64,
}

/// A proposed trade. The engine decides whether it becomes an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub strategy_id: String,
    /// Compatibility score normalized to [0, 1]
    pub confidence: f64,
    pub explanation: String,
    /// Price the quantity was sized against
    pub reference_price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<f64>,
    pub condition: MarketCondition,
    /// Timestamp (ms)
    pub timestamp: i64,
}

impl Signal {
    pub fn notional(&self) -> f64 {
        self.quantity * self.reference_price
    }
}
