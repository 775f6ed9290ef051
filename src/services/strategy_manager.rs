//! Adaptive Strategy Manager
//!
//! Holds the strategy catalog, scores active strategies against the current
//! market condition and turns the best fit into a trade signal. Nothing here
//! touches the ledger; the auto-trader decides what reaches the engine.

use crate::services::classifier::MarketConditionClassifier;
use crate::services::market_data::{GatewayError, MarketDataGateway};
use crate::types::{
    AccountSnapshot, MarketCondition, OrderSide, RiskLevel, ScoredStrategy, Signal,
    StrategyDefinition, StrategyFamily, StrategyParameters, StrategyState, TrendLabel,
    VolatilityLabel,
};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Strategy manager errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StrategyError {
    #[error("Strategy not found: {0}")]
    NotFound(String),

    #[error("Strategy {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: StrategyState,
        to: StrategyState,
    },

    #[error("Strategy already registered: {0}")]
    AlreadyExists(String),
}

impl StrategyError {
    pub fn kind(&self) -> &'static str {
        match self {
            StrategyError::NotFound(_) => "NOT_FOUND",
            StrategyError::InvalidTransition { .. } => "INVALID_TRANSITION",
            StrategyError::AlreadyExists(_) => "ALREADY_EXISTS",
        }
    }
}

/// Minimum distance from the long average before mean reversion takes a side.
const MIN_REVERSION_BAND: f64 = 0.002;

/// Held quantities below this are treated as flat.
const MIN_HOLDING: f64 = 1e-9;

/// The catalog shipped with the server, one strategy per family.
pub fn builtin_strategies() -> Vec<StrategyDefinition> {
    vec![
        StrategyDefinition::new(
            "momentum_rider",
            "Momentum Rider",
            StrategyFamily::Momentum,
            StrategyParameters {
                risk_level: RiskLevel::Aggressive,
                max_position_size: 5_000.0,
                stop_loss_pct: 0.03,
                take_profit_pct: 0.06,
                timeframe: "15m".to_string(),
                symbols: Vec::new(),
            },
        )
        .with_description("Follows established trends in the direction of the moving-average spread")
        .with_state(StrategyState::Active),
        StrategyDefinition::new(
            "mean_reversion",
            "Mean Reversion",
            StrategyFamily::MeanReversion,
            StrategyParameters {
                risk_level: RiskLevel::Conservative,
                max_position_size: 3_000.0,
                stop_loss_pct: 0.015,
                take_profit_pct: 0.025,
                timeframe: "5m".to_string(),
                symbols: Vec::new(),
            },
        )
        .with_description("Fades stretches away from the long moving average in quiet ranges")
        .with_state(StrategyState::Active),
        StrategyDefinition::new(
            "volatility_breakout",
            "Volatility Breakout",
            StrategyFamily::Breakout,
            StrategyParameters {
                risk_level: RiskLevel::Moderate,
                max_position_size: 4_000.0,
                stop_loss_pct: 0.02,
                take_profit_pct: 0.05,
                timeframe: "1h".to_string(),
                symbols: Vec::new(),
            },
        )
        .with_description("Trades the direction of a move when volatility starts expanding")
        .with_state(StrategyState::Active),
        StrategyDefinition::new(
            "adaptive_composite",
            "Adaptive Composite",
            StrategyFamily::AdaptiveComposite,
            StrategyParameters::default(),
        )
        .with_description("Trend following in trends, mean reversion in ranges")
        .with_state(StrategyState::Active),
    ]
}

// =============================================================================
// Scoring
// =============================================================================

/// Compatibility score (0-100) of a strategy with a market condition.
pub fn compatibility_score(strategy: &StrategyDefinition, condition: &MarketCondition) -> f64 {
    let trending = condition.trend.is_trending();
    let rising = condition.volatility_rising();

    // (trending base, sideways base, volatility adjustment [low, medium, high, extreme])
    let (trend_base, range_base, vol_adjust): (f64, f64, [f64; 4]) = match strategy.family {
        StrategyFamily::Momentum => (80.0, 20.0, [0.0, 10.0, 0.0, -30.0]),
        StrategyFamily::MeanReversion => (30.0, 80.0, [15.0, 5.0, -15.0, -35.0]),
        StrategyFamily::Breakout => (55.0, 50.0, [-20.0, 10.0, 25.0, 5.0]),
        StrategyFamily::AdaptiveComposite => (60.0, 55.0, [0.0, 5.0, -5.0, -20.0]),
    };

    let mut score = if trending { trend_base } else { range_base };
    score += vol_adjust[volatility_index(condition.volatility)];

    if strategy.family == StrategyFamily::Breakout && rising {
        score += 10.0;
    }

    if condition.volatility == VolatilityLabel::Extreme {
        score += match strategy.parameters.risk_level {
            RiskLevel::Aggressive => -10.0,
            RiskLevel::Moderate => 0.0,
            RiskLevel::Conservative => 5.0,
        };
    }

    score.clamp(0.0, 100.0)
}

fn volatility_index(label: VolatilityLabel) -> usize {
    match label {
        VolatilityLabel::Low => 0,
        VolatilityLabel::Medium => 1,
        VolatilityLabel::High => 2,
        VolatilityLabel::Extreme => 3,
    }
}

/// One sentence on how the family fits the condition.
fn fit_reason(family: StrategyFamily, condition: &MarketCondition) -> &'static str {
    let trending = condition.trend.is_trending();
    match family {
        StrategyFamily::Momentum if trending => "an established trend gives momentum a direction to follow",
        StrategyFamily::Momentum => "there is no established trend for momentum to follow",
        StrategyFamily::MeanReversion if trending => "a trending market tends to run over reversion entries",
        StrategyFamily::MeanReversion => "a ranging market favours fading moves back to the average",
        StrategyFamily::Breakout if condition.volatility_rising() => {
            "expanding volatility often precedes a breakout"
        }
        StrategyFamily::Breakout => "volatility is not expanding, so breakouts are less likely",
        StrategyFamily::AdaptiveComposite if trending => "the composite switches to trend following",
        StrategyFamily::AdaptiveComposite => "the composite switches to range trading",
    }
}

/// Which side, if any, a family takes in this condition.
fn directional_view(
    family: StrategyFamily,
    condition: &MarketCondition,
    held: f64,
) -> Option<OrderSide> {
    let follow_trend = || match condition.trend {
        TrendLabel::Uptrend => Some(OrderSide::Buy),
        TrendLabel::Downtrend if held > MIN_HOLDING => Some(OrderSide::Sell),
        _ => None,
    };

    let revert = || {
        let metrics = &condition.metrics;
        if metrics.long_ma <= 0.0 {
            return None;
        }
        let deviation = (metrics.last_price - metrics.long_ma) / metrics.long_ma;
        let band = (2.0 * metrics.realized_volatility).max(MIN_REVERSION_BAND);
        if deviation < -band {
            Some(OrderSide::Buy)
        } else if deviation > band && held > MIN_HOLDING {
            Some(OrderSide::Sell)
        } else {
            None
        }
    };

    match family {
        StrategyFamily::Momentum => follow_trend(),
        StrategyFamily::MeanReversion => revert(),
        StrategyFamily::Breakout => {
            if condition.trend.is_trending() {
                follow_trend()
            } else if condition.volatility_rising() {
                let momentum = condition.metrics.momentum;
                if momentum > 0.0 {
                    Some(OrderSide::Buy)
                } else if momentum < 0.0 && held > MIN_HOLDING {
                    Some(OrderSide::Sell)
                } else {
                    None
                }
            } else {
                None
            }
        }
        StrategyFamily::AdaptiveComposite => {
            if condition.trend.is_trending() {
                follow_trend()
            } else {
                revert()
            }
        }
    }
}

// =============================================================================
// Manager
// =============================================================================

/// Strategy catalog and signal synthesis.
pub struct StrategyManager {
    strategies: RwLock<BTreeMap<String, StrategyDefinition>>,
    gateway: Arc<dyn MarketDataGateway>,
    classifier: MarketConditionClassifier,
    gateway_timeout: Duration,
}

impl StrategyManager {
    /// Manager with the built-in catalog.
    pub fn new(gateway: Arc<dyn MarketDataGateway>, classifier: MarketConditionClassifier) -> Self {
        Self::with_catalog(gateway, classifier, builtin_strategies())
    }

    pub fn with_catalog(
        gateway: Arc<dyn MarketDataGateway>,
        classifier: MarketConditionClassifier,
        catalog: Vec<StrategyDefinition>,
    ) -> Self {
        let strategies = catalog.into_iter().map(|s| (s.id.clone(), s)).collect();
        Self {
            strategies: RwLock::new(strategies),
            gateway,
            classifier,
            gateway_timeout: Duration::from_secs(2),
        }
    }

    /// Bound on each gateway call made while generating signals.
    pub fn with_gateway_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_timeout = timeout;
        self
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, StrategyDefinition>> {
        match self.strategies.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, StrategyDefinition>> {
        match self.strategies.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    /// Every strategy, ordered by id.
    pub fn get_all_strategies(&self) -> Vec<StrategyDefinition> {
        self.read().values().cloned().collect()
    }

    pub fn get_strategy(&self, id: &str) -> Result<StrategyDefinition, StrategyError> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| StrategyError::NotFound(id.to_string()))
    }

    /// Add a custom strategy. Ids are unique.
    pub fn register_strategy(
        &self,
        definition: StrategyDefinition,
    ) -> Result<StrategyDefinition, StrategyError> {
        let mut strategies = self.write();
        if strategies.contains_key(&definition.id) {
            return Err(StrategyError::AlreadyExists(definition.id));
        }
        info!("Registered strategy {} ({})", definition.id, definition.family);
        strategies.insert(definition.id.clone(), definition.clone());
        Ok(definition)
    }

    /// Allowed from any state.
    pub fn activate_strategy(&self, id: &str) -> Result<StrategyDefinition, StrategyError> {
        self.transition(id, StrategyState::Active)
    }

    /// Active or paused -> paused. A stopped strategy must be re-activated first.
    pub fn deactivate_strategy(&self, id: &str) -> Result<StrategyDefinition, StrategyError> {
        self.transition(id, StrategyState::Paused)
    }

    pub fn stop_strategy(&self, id: &str) -> Result<StrategyDefinition, StrategyError> {
        self.transition(id, StrategyState::Stopped)
    }

    fn transition(&self, id: &str, to: StrategyState) -> Result<StrategyDefinition, StrategyError> {
        let mut strategies = self.write();
        let strategy = strategies
            .get_mut(id)
            .ok_or_else(|| StrategyError::NotFound(id.to_string()))?;

        let from = strategy.state;
        if from == StrategyState::Stopped && to == StrategyState::Paused {
            return Err(StrategyError::InvalidTransition {
                id: id.to_string(),
                from,
                to,
            });
        }

        if from != to {
            info!("Strategy {}: {} -> {}", id, from, to);
        }
        strategy.state = to;
        Ok(strategy.clone())
    }

    // =========================================================================
    // Selection
    // =========================================================================

    /// Active strategies by descending score, ties broken by id.
    pub fn select_optimal_strategies(&self, condition: &MarketCondition) -> Vec<ScoredStrategy> {
        let mut ranked: Vec<ScoredStrategy> = self
            .read()
            .values()
            .filter(|s| s.is_active())
            .map(|s| ScoredStrategy {
                score: compatibility_score(s, condition),
                strategy: s.clone(),
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.strategy.id.cmp(&b.strategy.id))
        });
        ranked
    }

    /// Human-readable account of a strategy's score.
    pub fn get_strategy_explanation(
        &self,
        strategy: &StrategyDefinition,
        condition: &MarketCondition,
    ) -> String {
        let score = compatibility_score(strategy, condition);
        let mut text = format!(
            "{} scores {:.0}/100 on {}: {} market with {} volatility; {}.",
            strategy.name,
            score,
            condition.symbol,
            condition.trend,
            condition.volatility,
            fit_reason(strategy.family, condition)
        );
        if condition.volatility == VolatilityLabel::Extreme {
            text.push_str(&format!(
                " Extreme volatility adjusts {} risk.",
                strategy.parameters.risk_level
            ));
        }
        text
    }

    /// Classify the symbol from recent gateway history.
    pub async fn current_condition(&self, symbol: &str) -> Result<MarketCondition, GatewayError> {
        let window = self.classifier.config().window;
        let samples = tokio::time::timeout(
            self.gateway_timeout,
            self.gateway.recent_series(symbol, window),
        )
        .await
        .map_err(|_| GatewayError::Timeout(self.gateway_timeout))??;

        Ok(self.classifier.classify(&symbol.trim().to_uppercase(), &samples))
    }

    /// Signals for `symbol` from the best-ranked eligible strategy. Empty when
    /// nothing applies or market data is unavailable.
    pub async fn generate_signals(&self, symbol: &str, account: &AccountSnapshot) -> Vec<Signal> {
        let condition = match self.current_condition(symbol).await {
            Ok(condition) => condition,
            Err(e) => {
                warn!("No signals for {}: {}", symbol, e);
                return Vec::new();
            }
        };

        let Some(best) = self
            .select_optimal_strategies(&condition)
            .into_iter()
            .find(|s| s.strategy.is_eligible_for(&condition.symbol))
        else {
            debug!("No active strategy eligible for {}", condition.symbol);
            return Vec::new();
        };

        match self.build_signal(&best, &condition, account) {
            Some(signal) => {
                debug!(
                    "{} signal from {}: {} {} (confidence {:.2})",
                    signal.symbol, signal.strategy_id, signal.side, signal.quantity, signal.confidence
                );
                vec![signal]
            }
            None => {
                debug!("{} has no directional view on {}", best.strategy.id, condition.symbol);
                Vec::new()
            }
        }
    }

    fn build_signal(
        &self,
        scored: &ScoredStrategy,
        condition: &MarketCondition,
        account: &AccountSnapshot,
    ) -> Option<Signal> {
        let strategy = &scored.strategy;
        let params = &strategy.parameters;
        let price = condition.metrics.last_price;
        if price <= 0.0 {
            return None;
        }

        let side = directional_view(strategy.family, condition, account.position_quantity)?;
        let confidence = (scored.score / 100.0).clamp(0.0, 1.0);
        let target = params.max_position_size * confidence;

        let quantity = match side {
            OrderSide::Buy => target.min(account.spendable()).max(0.0) / price,
            OrderSide::Sell => (target / price).min(account.position_quantity),
        };
        if quantity <= MIN_HOLDING {
            return None;
        }

        let (stop_loss, take_profit) = match side {
            OrderSide::Buy => (
                price * (1.0 - params.stop_loss_pct),
                price * (1.0 + params.take_profit_pct),
            ),
            OrderSide::Sell => (
                price * (1.0 + params.stop_loss_pct),
                price * (1.0 - params.take_profit_pct),
            ),
        };

        let explanation = format!(
            "{} Proposing {} of {:.6} {}.",
            self.get_strategy_explanation(strategy, condition),
            side,
            quantity,
            condition.symbol
        );

        Some(Signal {
            symbol: condition.symbol.clone(),
            side,
            quantity,
            strategy_id: strategy.id.clone(),
            confidence,
            explanation,
            reference_price: price,
            stop_loss: Some(stop_loss),
            take_profit: Some(take_profit),
            condition: condition.clone(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        })
    }
}
