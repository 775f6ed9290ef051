//! Trading Types
//!
//! Types for the paper trading engine: accounts, positions, orders and the
//! results a fill produces.

use serde::{Deserialize, Serialize};

// =============================================================================
// Enums
// =============================================================================

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for buys, -1 for sells.
    pub fn sign(&self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }

    /// The side that unwinds a position opened by this side.
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

impl std::str::FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            other => Err(format!("unknown order side: {}", other)),
        }
    }
}

/// Order kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    /// Fill immediately at the gateway price
    #[default]
    Market,
    /// Fill at the supplied limit price
    Limit,
    /// Fill at the supplied stop price
    Stop,
}

impl OrderKind {
    /// Whether the fill price comes from the caller rather than the gateway.
    pub fn requires_price(&self) -> bool {
        !matches!(self, OrderKind::Market)
    }
}

impl std::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderKind::Market => write!(f, "market"),
            OrderKind::Limit => write!(f, "limit"),
            OrderKind::Stop => write!(f, "stop"),
        }
    }
}

impl std::str::FromStr for OrderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "market" => Ok(OrderKind::Market),
            "limit" => Ok(OrderKind::Limit),
            "stop" => Ok(OrderKind::Stop),
            other => Err(format!("unknown order kind: {}", other)),
        }
    }
}

/// Order status. `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Filled,
    Rejected,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "pending"),
            OrderStatus::Filled => write!(f, "filled"),
            OrderStatus::Rejected => write!(f, "rejected"),
            OrderStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "filled" => Ok(OrderStatus::Filled),
            "rejected" => Ok(OrderStatus::Rejected),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

// =============================================================================
// Account
// =============================================================================

/// A simulated trading account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Account ID (derived from the owning user)
    pub id: String,
    /// Owner's user ID
    pub user_id: String,
    /// Current cash balance
    pub cash_balance: f64,
    /// Capacity for new exposure: cash net of short liabilities times max
    /// leverage, less the short exposure already carried (floored at 0)
    pub buying_power: f64,
    /// Starting balance, reference for P&L %
    pub initial_balance: f64,
    /// Realized P&L booked by closing fills
    #[serde(default)]
    pub realized_pnl: f64,
    /// Total fees paid
    #[serde(default)]
    pub total_fees: f64,
    /// Fills that flattened or flipped a position
    #[serde(default)]
    pub closed_trades: u64,
    /// Closed trades whose position realized a net profit
    #[serde(default)]
    pub winning_trades: u64,
    /// When the account was created (ms)
    pub created_at: i64,
    /// When the account was last updated (ms)
    pub updated_at: i64,
}

impl Account {
    /// Deterministic account ID for a user.
    pub fn id_for_user(user_id: &str) -> String {
        format!("paper_{}", user_id)
    }

    /// Create a fresh account holding `initial_balance` in cash.
    pub fn new(user_id: &str, initial_balance: f64, max_leverage: f64) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        let mut account = Self {
            id: Self::id_for_user(user_id),
            user_id: user_id.to_string(),
            cash_balance: initial_balance,
            buying_power: 0.0,
            initial_balance,
            realized_pnl: 0.0,
            total_fees: 0.0,
            closed_trades: 0,
            winning_trades: 0,
            created_at: now,
            updated_at: now,
        };
        account.recalculate(max_leverage, 0.0);
        account
    }

    /// Refresh derived fields after cash or marks change. `short_liability`
    /// is the cost of buying back every open short at its mark.
    pub fn recalculate(&mut self, max_leverage: f64, short_liability: f64) {
        let net_cash = self.cash_balance - short_liability;
        self.buying_power = (net_cash * max_leverage - short_liability).max(0.0);
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    /// Fraction of closed trades that were profitable.
    pub fn win_rate(&self) -> f64 {
        if self.closed_trades == 0 {
            0.0
        } else {
            self.winning_trades as f64 / self.closed_trades as f64
        }
    }
}

// =============================================================================
// Position
// =============================================================================

/// An open position. Quantity is signed: positive long, negative short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    /// Account this position belongs to
    pub account_id: String,
    /// Symbol (e.g., "BTC/USD")
    pub symbol: String,
    /// Signed quantity
    pub quantity: f64,
    /// Weighted average entry price
    pub avg_cost: f64,
    /// Latest observed price
    pub mark_price: f64,
    /// (mark - avg_cost) * quantity
    pub unrealized_pnl: f64,
    /// Realized P&L booked by partial reductions since the position opened
    #[serde(default)]
    pub realized_pnl: f64,
    /// When the position was opened (ms)
    pub opened_at: i64,
    /// When the position was last updated (ms)
    pub updated_at: i64,
}

impl Position {
    pub fn new(account_id: String, symbol: String, quantity: f64, price: f64) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            account_id,
            symbol,
            quantity,
            avg_cost: price,
            mark_price: price,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            opened_at: now,
            updated_at: now,
        }
    }

    pub fn is_long(&self) -> bool {
        self.quantity > 0.0
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0.0
    }

    /// The side that opened this position.
    pub fn side(&self) -> OrderSide {
        if self.is_short() {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        }
    }

    /// Cost of buying back a short at the mark, 0 for longs.
    pub fn liability(&self) -> f64 {
        if self.is_short() {
            -self.quantity * self.mark_price
        } else {
            0.0
        }
    }

    /// Signed market value at the mark price.
    pub fn market_value(&self) -> f64 {
        self.quantity * self.mark_price
    }

    /// Update the mark price and unrealized P&L.
    pub fn mark(&mut self, price: f64) {
        self.mark_price = price;
        self.unrealized_pnl = (self.mark_price - self.avg_cost) * self.quantity;
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }
}

// =============================================================================
// Orders
// =============================================================================

/// Caller-supplied order parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    #[serde(default)]
    pub kind: OrderKind,
    /// Limit or stop price; ignored for market orders
    #[serde(default)]
    pub price: Option<f64>,
    /// Originating strategy name ("manual" for hand-entered orders)
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_strategy() -> String {
    "manual".to_string()
}

fn default_confidence() -> f64 {
    1.0
}

impl OrderRequest {
    /// A manual market order.
    pub fn market(symbol: &str, side: OrderSide, quantity: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            quantity,
            kind: OrderKind::Market,
            price: None,
            strategy: default_strategy(),
            reasoning: String::new(),
            confidence: default_confidence(),
        }
    }

    /// A manual limit order filled at `price`.
    pub fn limit(symbol: &str, side: OrderSide, quantity: f64, price: f64) -> Self {
        Self {
            kind: OrderKind::Limit,
            price: Some(price),
            ..Self::market(symbol, side, quantity)
        }
    }

    pub fn with_strategy(mut self, strategy: &str, reasoning: &str, confidence: f64) -> Self {
        self.strategy = strategy.to_string();
        self.reasoning = reasoning.to_string();
        self.confidence = confidence;
        self
    }
}

/// An order record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub account_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub kind: OrderKind,
    /// Limit/stop price as requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    pub status: OrderStatus,
    pub strategy: String,
    pub reasoning: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filled_at: Option<i64>,
    #[serde(default)]
    pub fee: f64,
    /// Realized P&L if this fill reduced a position
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realized_pnl: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<String>,
    pub created_at: i64,
}

impl Order {
    /// Build a pending order from a request.
    pub fn pending(account_id: &str, request: &OrderRequest) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            symbol: request.symbol.clone(),
            side: request.side,
            quantity: request.quantity,
            kind: request.kind,
            price: request.price,
            status: OrderStatus::Pending,
            strategy: request.strategy.clone(),
            reasoning: request.reasoning.clone(),
            confidence: request.confidence,
            fill_price: None,
            filled_at: None,
            fee: 0.0,
            realized_pnl: None,
            reject_reason: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// pending -> filled. Returns false if the order was already terminal.
    pub fn fill(&mut self, price: f64, fee: f64, realized_pnl: Option<f64>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = OrderStatus::Filled;
        self.fill_price = Some(price);
        self.filled_at = Some(chrono::Utc::now().timestamp_millis());
        self.fee = fee;
        self.realized_pnl = realized_pnl;
        true
    }

    /// pending -> rejected. Returns false if the order was already terminal.
    pub fn reject(&mut self, reason: &str) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = OrderStatus::Rejected;
        self.reject_reason = Some(reason.to_string());
        true
    }

    pub fn notional(&self) -> Option<f64> {
        self.fill_price.map(|p| p * self.quantity)
    }
}

// =============================================================================
// Results and Snapshots
// =============================================================================

/// Result of a successful fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub order: Order,
    /// The position after the fill, `None` when the fill closed it
    pub position: Option<Position>,
    pub account: Account,
    pub realized_pnl: f64,
}

/// Aggregate portfolio view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioMetrics {
    pub account_id: String,
    pub cash_balance: f64,
    pub buying_power: f64,
    /// Signed sum of quantity * mark over open positions
    pub positions_value: f64,
    /// cash + positions_value
    pub total_equity: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    /// total_equity - initial_balance
    pub total_pnl: f64,
    pub total_pnl_pct: f64,
    /// Winning share of closed trades. A trade closes when a fill flattens or
    /// flips the position; partial reductions are not counted.
    pub win_rate: f64,
    pub closed_trades: u64,
    pub total_fees: f64,
    pub open_positions: usize,
}

/// Total buy-back cost of the shorts in `positions`.
pub fn short_liability<'a>(positions: impl IntoIterator<Item = &'a Position>) -> f64 {
    positions.into_iter().map(Position::liability).sum()
}

/// Read-only view of one account, handed to the strategy layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub account_id: String,
    /// Cash a buy may spend, including its fee
    pub buying_power: f64,
    /// Signed quantity held in the symbol of interest (0 when flat)
    pub position_quantity: f64,
    #[serde(default)]
    pub fee_rate: f64,
    #[serde(default)]
    pub flat_fee: f64,
}

/// Relative shave on buy sizing so quantity * price cannot round past the limit.
const SIZING_MARGIN: f64 = 1e-9;

impl AccountSnapshot {
    /// Largest buy notional whose fee still fits in buying power.
    pub fn spendable(&self) -> f64 {
        let notional = (self.buying_power - self.flat_fee) / (1.0 + self.fee_rate);
        (notional * (1.0 - SIZING_MARGIN)).max(0.0)
    }
}
