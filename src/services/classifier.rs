//! Market Condition Classifier
//!
//! Turns a price/volume window into a trend and volatility label. Pure: the
//! same samples always produce the same condition, timestamp included.

use crate::config::ClassifierConfig;
use crate::types::{ConditionMetrics, MarketCondition, PriceSample, TrendLabel, VolatilityLabel};

/// Cap on the volatility expansion ratio when the earlier half is flat.
const MAX_EXPANSION: f64 = 10.0;

/// Stateless classifier over a configured window.
#[derive(Debug, Clone, Default)]
pub struct MarketConditionClassifier {
    config: ClassifierConfig,
}

impl MarketConditionClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classify `samples` (oldest first).
    pub fn classify(&self, symbol: &str, samples: &[PriceSample]) -> MarketCondition {
        let timestamp = samples.last().map(|s| s.timestamp).unwrap_or_default();

        if samples.len() < 2 {
            let last_price = samples.last().map(|s| s.price).unwrap_or_default();
            return MarketCondition {
                symbol: symbol.to_string(),
                timestamp,
                trend: TrendLabel::Sideways,
                volatility: VolatilityLabel::Low,
                metrics: ConditionMetrics {
                    short_ma: last_price,
                    long_ma: last_price,
                    volatility_expansion: 1.0,
                    volume_ratio: 1.0,
                    last_price,
                    sample_size: samples.len(),
                    ..Default::default()
                },
            };
        }

        let prices: Vec<f64> = samples.iter().map(|s| s.price).collect();
        let volumes: Vec<f64> = samples.iter().map(|s| s.volume).collect();

        let short_ma = tail_mean(&prices, self.config.short_period);
        let long_ma = tail_mean(&prices, self.config.long_period);
        let ma_spread = if long_ma > 0.0 {
            (short_ma - long_ma) / long_ma
        } else {
            0.0
        };

        let returns = returns(&prices);
        let realized_volatility = std_dev(&returns);
        let volatility_expansion = expansion(&returns);

        let first = prices[0];
        let last_price = prices[prices.len() - 1];
        let momentum = if first > 0.0 { last_price / first - 1.0 } else { 0.0 };

        let window_volume = mean(&volumes);
        let volume_ratio = if window_volume > 0.0 {
            tail_mean(&volumes, self.config.short_period) / window_volume
        } else {
            1.0
        };

        MarketCondition {
            symbol: symbol.to_string(),
            timestamp,
            trend: self.trend_label(ma_spread),
            volatility: self.volatility_label(realized_volatility),
            metrics: ConditionMetrics {
                short_ma,
                long_ma,
                ma_spread,
                realized_volatility,
                volatility_expansion,
                momentum,
                volume_ratio,
                last_price,
                sample_size: samples.len(),
            },
        }
    }

    fn trend_label(&self, ma_spread: f64) -> TrendLabel {
        if ma_spread > self.config.trend_threshold {
            TrendLabel::Uptrend
        } else if ma_spread < -self.config.trend_threshold {
            TrendLabel::Downtrend
        } else {
            TrendLabel::Sideways
        }
    }

    fn volatility_label(&self, volatility: f64) -> VolatilityLabel {
        let [low, medium, high] = self.config.volatility_thresholds;
        if volatility < low {
            VolatilityLabel::Low
        } else if volatility < medium {
            VolatilityLabel::Medium
        } else if volatility < high {
            VolatilityLabel::High
        } else {
            VolatilityLabel::Extreme
        }
    }
}

// =============================================================================
// Series helpers
// =============================================================================

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Mean of the last `period` values (all of them if fewer).
fn tail_mean(values: &[f64], period: usize) -> f64 {
    let period = period.clamp(1, values.len().max(1));
    mean(&values[values.len().saturating_sub(period)..])
}

/// Population standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect()
}

/// Dispersion of the recent half of returns over the earlier half.
fn expansion(returns: &[f64]) -> f64 {
    if returns.len() < 4 {
        return 1.0;
    }
    let (earlier, recent) = returns.split_at(returns.len() / 2);
    let (earlier, recent) = (std_dev(earlier), std_dev(recent));
    if earlier <= f64::EPSILON {
        if recent <= f64::EPSILON {
            1.0
        } else {
            MAX_EXPANSION
        }
    } else {
        (recent / earlier).min(MAX_EXPANSION)
    }
}
