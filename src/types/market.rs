//! Market data and market condition types.

use serde::{Deserialize, Serialize};

/// A single observation from the market data gateway.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSample {
    /// Timestamp (ms)
    pub timestamp: i64,
    pub price: f64,
    pub volume: f64,
}

impl PriceSample {
    pub fn new(timestamp: i64, price: f64, volume: f64) -> Self {
        Self {
            timestamp,
            price,
            volume,
        }
    }
}

/// Trend direction derived from the moving-average spread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendLabel {
    Uptrend,
    Downtrend,
    Sideways,
}

impl TrendLabel {
    pub fn is_trending(&self) -> bool {
        !matches!(self, TrendLabel::Sideways)
    }
}

impl std::fmt::Display for TrendLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrendLabel::Uptrend => write!(f, "uptrend"),
            TrendLabel::Downtrend => write!(f, "downtrend"),
            TrendLabel::Sideways => write!(f, "sideways"),
        }
    }
}

/// Volatility regime derived from return dispersion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityLabel {
    Low,
    Medium,
    High,
    Extreme,
}

impl std::fmt::Display for VolatilityLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolatilityLabel::Low => write!(f, "low"),
            VolatilityLabel::Medium => write!(f, "medium"),
            VolatilityLabel::High => write!(f, "high"),
            VolatilityLabel::Extreme => write!(f, "extreme"),
        }
    }
}

/// Numbers behind a condition label.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionMetrics {
    pub short_ma: f64,
    pub long_ma: f64,
    /// (short_ma - long_ma) / long_ma
    pub ma_spread: f64,
    /// Standard deviation of per-sample returns
    pub realized_volatility: f64,
    /// Return dispersion of the recent half of the window over the earlier half
    pub volatility_expansion: f64,
    /// Fractional price change across the window
    pub momentum: f64,
    /// Recent average volume over window average volume
    pub volume_ratio: f64,
    pub last_price: f64,
    pub sample_size: usize,
}

/// Classified market state for one symbol. Always recomputed, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketCondition {
    pub symbol: String,
    /// Timestamp (ms)
    pub timestamp: i64,
    pub trend: TrendLabel,
    pub volatility: VolatilityLabel,
    pub metrics: ConditionMetrics,
}

impl MarketCondition {
    /// Whether return dispersion is growing across the window.
    pub fn volatility_rising(&self) -> bool {
        self.metrics.volatility_expansion > 1.2
    }
}
