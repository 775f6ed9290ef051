use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Paper trading engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Balance used when an account is initialized without an explicit amount.
    pub initial_balance: f64,
    /// Percentage fee as a fraction of notional (0.001 = 0.1%).
    pub fee_rate: f64,
    /// Flat fee charged per fill.
    pub flat_fee: f64,
    /// Optional cap on a position's notional.
    pub max_position_size: Option<f64>,
    /// Multiplier applied to cash net of short liabilities to get buying power.
    pub max_leverage: f64,
    /// Whether a sell without a long holding may open a short.
    pub allow_short: bool,
    /// Upper bound on a single market data gateway call.
    #[serde(with = "duration_ms")]
    pub gateway_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_balance: 100_000.0,
            fee_rate: 0.0,
            flat_fee: 0.0,
            max_position_size: None,
            max_leverage: 1.0,
            allow_short: false,
            gateway_timeout: Duration::from_millis(2_000),
        }
    }
}

impl EngineConfig {
    /// Fee for a fill of the given notional.
    pub fn fee_for(&self, notional: f64) -> f64 {
        self.flat_fee + notional.abs() * self.fee_rate
    }

    /// Merge a partial update. Invalid values are skipped and reported back.
    pub fn apply(&mut self, update: &ConfigUpdate) -> Vec<String> {
        let mut ignored = Vec::new();

        if let Some(v) = update.initial_balance {
            if v.is_finite() && v > 0.0 {
                self.initial_balance = v;
            } else {
                ignored.push(format!("initialBalance={}", v));
            }
        }
        if let Some(v) = update.fee_rate {
            if v.is_finite() && (0.0..1.0).contains(&v) {
                self.fee_rate = v;
            } else {
                ignored.push(format!("feeRate={}", v));
            }
        }
        if let Some(v) = update.flat_fee {
            if v.is_finite() && v >= 0.0 {
                self.flat_fee = v;
            } else {
                ignored.push(format!("flatFee={}", v));
            }
        }
        if let Some(v) = update.max_position_size {
            // Zero or negative clears the cap
            if v.is_finite() && v > 0.0 {
                self.max_position_size = Some(v);
            } else {
                self.max_position_size = None;
            }
        }
        if let Some(v) = update.max_leverage {
            if v.is_finite() && v >= 1.0 {
                self.max_leverage = v;
            } else {
                ignored.push(format!("maxLeverage={}", v));
            }
        }
        if let Some(v) = update.allow_short {
            self.allow_short = v;
        }
        if let Some(ms) = update.gateway_timeout_ms {
            if ms > 0 {
                self.gateway_timeout = Duration::from_millis(ms);
            } else {
                ignored.push(format!("gatewayTimeoutMs={}", ms));
            }
        }

        ignored
    }

    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            initial_balance: parse_env("INITIAL_BALANCE").unwrap_or(defaults.initial_balance),
            fee_rate: parse_env("FEE_RATE").unwrap_or(defaults.fee_rate),
            flat_fee: parse_env("FLAT_FEE").unwrap_or(defaults.flat_fee),
            max_position_size: parse_env::<f64>("MAX_POSITION_SIZE").filter(|v| *v > 0.0),
            max_leverage: parse_env("MAX_LEVERAGE").unwrap_or(defaults.max_leverage),
            allow_short: parse_bool_env("ALLOW_SHORT").unwrap_or(defaults.allow_short),
            gateway_timeout: parse_env("GATEWAY_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.gateway_timeout),
        }
    }
}

/// Partial engine configuration. Unknown keys are ignored on deserialize.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    pub initial_balance: Option<f64>,
    pub fee_rate: Option<f64>,
    pub flat_fee: Option<f64>,
    pub max_position_size: Option<f64>,
    pub max_leverage: Option<f64>,
    pub allow_short: Option<bool>,
    pub gateway_timeout_ms: Option<u64>,
}

/// Market condition classifier settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierConfig {
    /// Samples requested from the gateway per classification.
    pub window: usize,
    pub short_period: usize,
    pub long_period: usize,
    /// Minimum |MA spread| (fraction) to call a trend.
    pub trend_threshold: f64,
    /// Per-sample return std-dev boundaries: low/medium, medium/high, high/extreme.
    pub volatility_thresholds: [f64; 3],
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            window: 60,
            short_period: 10,
            long_period: 30,
            trend_threshold: 0.002,
            volatility_thresholds: [0.004, 0.012, 0.03],
        }
    }
}

impl ClassifierConfig {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            window: parse_env("CLASSIFIER_WINDOW").unwrap_or(defaults.window),
            short_period: parse_env("CLASSIFIER_SHORT_PERIOD").unwrap_or(defaults.short_period),
            long_period: parse_env("CLASSIFIER_LONG_PERIOD").unwrap_or(defaults.long_period),
            trend_threshold: parse_env("CLASSIFIER_TREND_THRESHOLD")
                .unwrap_or(defaults.trend_threshold),
            volatility_thresholds: defaults.volatility_thresholds,
        }
    }
}

/// Auto-trading loop settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoTradeConfig {
    /// Time between cycles.
    pub interval: Duration,
    /// Symbols evaluated every cycle.
    pub symbols: Vec<String>,
    /// Signals below this confidence are not submitted.
    pub min_confidence: f64,
    /// Enable auto-trading on startup.
    pub enabled_on_start: bool,
}

impl Default for AutoTradeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            symbols: vec!["BTC/USD".to_string(), "ETH/USD".to_string()],
            min_confidence: 0.6,
            enabled_on_start: false,
        }
    }
}

impl AutoTradeConfig {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            interval: parse_env("AUTO_TRADE_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.interval),
            symbols: env::var("AUTO_TRADE_SYMBOLS")
                .ok()
                .map(|s| parse_symbols(&s))
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.symbols),
            min_confidence: parse_env("AUTO_TRADE_MIN_CONFIDENCE")
                .unwrap_or(defaults.min_confidence),
            enabled_on_start: parse_bool_env("AUTO_TRADE_ENABLED")
                .unwrap_or(defaults.enabled_on_start),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// SQLite ledger path. In-memory ledger when unset.
    pub database_path: Option<String>,
    /// User the server's paper account belongs to.
    pub user_id: String,
    /// Seed for the simulated market feed.
    pub market_seed: u64,
    /// How often the simulated feed advances.
    pub market_tick: Duration,
    pub engine: EngineConfig,
    pub classifier: ClassifierConfig,
    pub auto_trade: AutoTradeConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_env("PORT").unwrap_or(3002),
            database_path: env::var("DATABASE_PATH").ok().filter(|p| !p.is_empty()),
            user_id: env::var("PAPER_USER_ID").unwrap_or_else(|_| "default".to_string()),
            market_seed: parse_env("MARKET_SEED").unwrap_or(42),
            market_tick: parse_env("MARKET_TICK_MS")
                .map(Duration::from_millis)
                .unwrap_or(Duration::from_secs(1)),
            engine: EngineConfig::from_env(),
            classifier: ClassifierConfig::from_env(),
            auto_trade: AutoTradeConfig::from_env(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_bool_env(key: &str) -> Option<bool> {
    env::var(key).ok().map(|v| v == "true" || v == "1")
}

/// Parse a comma-separated symbol list, e.g. "btc/usd, ETH/USD".
pub fn parse_symbols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
