//! Paper Trading Engine
//!
//! Simulated order execution for one account:
//! - Account lifecycle (initialize / reset)
//! - Market, limit and stop orders filled against a gateway or supplied price
//! - Position bookkeeping (weighted average cost, realized and unrealized P&L)
//! - Runtime configuration and the auto-trading toggle
//!
//! Fills are serialized by a per-engine mutex and written to the ledger as a
//! single commit. Fills and rejections are published on a broadcast channel.

use crate::config::{ConfigUpdate, EngineConfig};
use crate::services::ledger::{Ledger, LedgerCommit, LedgerError, PositionChange};
use crate::services::market_data::{GatewayError, MarketDataGateway};
use crate::types::{
    Account, AccountSnapshot, ExecutionResult, Order, OrderKind, OrderRequest, OrderSide,
    short_liability, PortfolioMetrics, Position, Signal,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

/// Quantities closer to zero than this are treated as flat.
const QTY_EPSILON: f64 = 1e-9;

/// Trading engine errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TradingError {
    #[error("Invalid order: {0}")]
    Validation(String),

    #[error("Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: f64, available: f64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Market data unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Ledger invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Position limit exceeded: notional {notional} over limit {limit}")]
    RiskLimit { notional: f64, limit: f64 },

    #[error("Paper trading account not initialized")]
    NotInitialized,

    #[error("Storage error: {0}")]
    Storage(String),
}

impl TradingError {
    /// Machine-readable kind used in API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            TradingError::Validation(_) => "VALIDATION",
            TradingError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            TradingError::NotFound(_) => "NOT_FOUND",
            TradingError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            TradingError::InvariantViolation(_) => "INVARIANT_VIOLATION",
            TradingError::RiskLimit { .. } => "RISK_LIMIT",
            TradingError::NotInitialized => "NOT_INITIALIZED",
            TradingError::Storage(_) => "STORAGE",
        }
    }
}

impl From<LedgerError> for TradingError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::DuplicateOrder(_) | LedgerError::NonTerminalOrder(_) => {
                TradingError::InvariantViolation(e.to_string())
            }
            LedgerError::Storage(_) | LedgerError::Corrupt(_) => TradingError::Storage(e.to_string()),
        }
    }
}

impl From<GatewayError> for TradingError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::UnknownSymbol(_) => TradingError::Validation(e.to_string()),
            GatewayError::Unavailable(_) | GatewayError::Timeout(_) => {
                TradingError::UpstreamUnavailable(e.to_string())
            }
        }
    }
}

/// Structured engine notifications.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    AccountInitialized {
        account: Account,
    },
    OrderFilled {
        order: Order,
        position: Option<Position>,
        realized_pnl: f64,
    },
    /// Rejected orders are published but never written to the ledger.
    OrderRejected {
        order: Order,
        error_kind: String,
    },
    AutoTradingToggled {
        account_id: String,
        enabled: bool,
    },
    ConfigUpdated {
        config: EngineConfig,
    },
}

// =============================================================================
// Fill planning
// =============================================================================

/// Everything a validated fill changes, computed before anything is written.
#[derive(Debug, Clone)]
struct FillPlan {
    account: Account,
    change: PositionChange,
    position: Option<Position>,
    fee: f64,
    realized_pnl: Option<f64>,
}

/// Work out the effect of filling `quantity` at `price` against the current
/// account and position. `other_liability` is the buy-back cost of shorts in
/// other symbols. Checks run in order: holdings, funds, risk.
#[allow(clippy::too_many_arguments)]
fn plan_fill(
    config: &EngineConfig,
    account: &Account,
    current: Option<&Position>,
    other_liability: f64,
    symbol: &str,
    side: OrderSide,
    quantity: f64,
    price: f64,
) -> Result<FillPlan, TradingError> {
    let notional = quantity * price;
    let fee = config.fee_for(notional);
    let held = current.map(|p| p.quantity).unwrap_or(0.0);
    let signed = side.sign() * quantity;

    // Part of the order that unwinds existing exposure, the rest opens new exposure
    let reduces = held.abs() > QTY_EPSILON && held.signum() != signed.signum();
    let reducing_qty = if reduces { quantity.min(held.abs()) } else { 0.0 };
    let opening_qty = if quantity - reducing_qty > QTY_EPSILON {
        quantity - reducing_qty
    } else {
        0.0
    };
    let mut new_qty = held + signed;
    if new_qty.abs() < QTY_EPSILON {
        new_qty = 0.0;
    }

    if side == OrderSide::Sell && opening_qty > 0.0 && !config.allow_short {
        return Err(TradingError::Validation(format!(
            "cannot sell {} {}: holding {}",
            quantity,
            symbol,
            held.max(0.0)
        )));
    }

    // Capacity at this fill's price, shorts included
    let mut before = account.clone();
    let current_liability = current
        .map(|p| if p.is_short() { -p.quantity * price } else { 0.0 })
        .unwrap_or(0.0);
    before.recalculate(config.max_leverage, other_liability + current_liability);

    // Only new exposure draws on buying power, unwinding needs cash alone
    if opening_qty > 0.0 {
        let needed = opening_qty * price + fee;
        let available = match side {
            OrderSide::Buy => before.cash_balance.min(before.buying_power),
            OrderSide::Sell => before.buying_power,
        };
        if needed > available {
            return Err(TradingError::InsufficientFunds { needed, available });
        }
    }

    let cash_after = account.cash_balance - side.sign() * notional - fee;
    if cash_after < 0.0 {
        return Err(match side {
            OrderSide::Buy => TradingError::InsufficientFunds {
                needed: notional + fee,
                available: account.cash_balance,
            },
            OrderSide::Sell => TradingError::InsufficientFunds {
                needed: fee,
                available: account.cash_balance + notional,
            },
        });
    }

    if let Some(limit) = config.max_position_size {
        let exposure = new_qty.abs() * price;
        if opening_qty > 0.0 && exposure > limit {
            return Err(TradingError::RiskLimit {
                notional: exposure,
                limit,
            });
        }
    }

    let realized = current
        .filter(|_| reduces)
        .map(|p| (price - p.avg_cost) * reducing_qty * p.quantity.signum());

    let position = match current {
        None => Some(Position::new(
            account.id.clone(),
            symbol.to_string(),
            new_qty,
            price,
        )),
        Some(_) if new_qty == 0.0 => None,
        Some(existing) => {
            let mut position = existing.clone();
            if !reduces {
                // Same-direction add
                let total = held.abs() + quantity;
                position.avg_cost = (held.abs() * existing.avg_cost + quantity * price) / total;
                position.quantity = new_qty;
            } else if opening_qty > 0.0 {
                // Flipped through zero, the remainder opens fresh at the fill price
                position = Position::new(account.id.clone(), symbol.to_string(), new_qty, price);
            } else {
                position.quantity = new_qty;
                position.realized_pnl += realized.unwrap_or(0.0);
            }
            Some(position)
        }
    };
    let position = position.map(|mut p| {
        p.mark(price);
        p
    });

    let mut next = account.clone();
    next.cash_balance = cash_after;
    next.total_fees += fee;
    if let Some(pnl) = realized {
        next.realized_pnl += pnl;
    }

    // A trade closes when the position reaches zero or flips; it wins on the
    // net P&L realized over its whole life
    if let (Some(existing), Some(pnl)) = (current, realized) {
        if new_qty == 0.0 || opening_qty > 0.0 {
            next.closed_trades += 1;
            if existing.realized_pnl + pnl > 0.0 {
                next.winning_trades += 1;
            }
        }
    }

    let liability_after = other_liability + position.as_ref().map(Position::liability).unwrap_or(0.0);
    next.recalculate(config.max_leverage, liability_after);

    let change = match &position {
        Some(p) => PositionChange::Upsert(p.clone()),
        None => PositionChange::Remove {
            symbol: symbol.to_string(),
        },
    };

    Ok(FillPlan {
        account: next,
        change,
        position,
        fee,
        realized_pnl: realized,
    })
}

/// Upper-case the symbol and check the caller-supplied fields.
fn normalize_request(mut request: OrderRequest) -> Result<OrderRequest, (OrderRequest, TradingError)> {
    request.symbol = request.symbol.trim().to_uppercase();

    let problem = if request.symbol.is_empty() {
        Some("symbol is required".to_string())
    } else if !request.quantity.is_finite() || request.quantity <= 0.0 {
        Some(format!("quantity must be positive, got {}", request.quantity))
    } else if !request.confidence.is_finite() || !(0.0..=1.0).contains(&request.confidence) {
        Some(format!("confidence must be within [0, 1], got {}", request.confidence))
    } else if request.kind.requires_price() {
        match request.price {
            Some(p) if p.is_finite() && p > 0.0 => None,
            Some(p) => Some(format!("{} price must be positive, got {}", request.kind, p)),
            None => Some(format!("{} orders require a price", request.kind)),
        }
    } else {
        None
    };

    match problem {
        Some(reason) => Err((request, TradingError::Validation(reason))),
        None => Ok(request),
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Paper trading engine for a single account.
pub struct PaperTradingEngine {
    ledger: Arc<dyn Ledger>,
    gateway: Arc<dyn MarketDataGateway>,
    config: RwLock<EngineConfig>,
    /// Set by `initialize` / `resume`
    account_id: RwLock<Option<String>>,
    auto_trading: AtomicBool,
    /// Serializes fills and consistent reads
    fill_lock: Mutex<()>,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl PaperTradingEngine {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        gateway: Arc<dyn MarketDataGateway>,
        config: EngineConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            ledger,
            gateway,
            config: RwLock::new(config),
            account_id: RwLock::new(None),
            auto_trading: AtomicBool::new(false),
            fill_lock: Mutex::new(()),
            event_tx,
        }
    }

    /// Subscribe to fills, rejections and state changes.
    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    fn publish(&self, event: EngineEvent) {
        // No receivers is fine
        let _ = self.event_tx.send(event);
    }

    /// Current engine configuration.
    pub fn config(&self) -> EngineConfig {
        match self.config.read() {
            Ok(config) => config.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn account_id(&self) -> Result<String, TradingError> {
        let guard = self
            .account_id
            .read()
            .map_err(|_| TradingError::InvariantViolation("account id lock poisoned".into()))?;
        guard.clone().ok_or(TradingError::NotInitialized)
    }

    fn set_account_id(&self, id: String) -> Result<(), TradingError> {
        let mut guard = self
            .account_id
            .write()
            .map_err(|_| TradingError::InvariantViolation("account id lock poisoned".into()))?;
        *guard = Some(id);
        Ok(())
    }

    fn load_account(&self, account_id: &str) -> Result<Account, TradingError> {
        self.ledger.get_account(account_id)?.ok_or_else(|| {
            TradingError::InvariantViolation(format!("account {} missing from ledger", account_id))
        })
    }

    // =========================================================================
    // Account lifecycle
    // =========================================================================

    /// Create or reset the account for `user_id`. Any previous positions and
    /// orders for that account are discarded. `None` uses the configured
    /// initial balance.
    pub async fn initialize(
        &self,
        user_id: &str,
        initial_balance: Option<f64>,
    ) -> Result<Account, TradingError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(TradingError::Validation("user id is required".into()));
        }

        let config = self.config();
        let balance = initial_balance.unwrap_or(config.initial_balance);
        if !balance.is_finite() || balance <= 0.0 {
            return Err(TradingError::Validation(format!(
                "initial balance must be positive, got {}",
                balance
            )));
        }

        let _guard = self.fill_lock.lock().await;

        let account = Account::new(user_id, balance, config.max_leverage);
        self.ledger.reset_account(&account)?;
        self.set_account_id(account.id.clone())?;

        info!("Initialized paper account {} with {:.2}", account.id, balance);
        self.publish(EngineEvent::AccountInitialized {
            account: account.clone(),
        });

        Ok(account)
    }

    /// Attach to an account that already exists in the ledger.
    pub async fn resume(&self, user_id: &str) -> Result<Option<Account>, TradingError> {
        let _guard = self.fill_lock.lock().await;

        let account_id = Account::id_for_user(user_id.trim());
        let Some(account) = self.ledger.get_account(&account_id)? else {
            return Ok(None);
        };
        self.set_account_id(account.id.clone())?;
        info!(
            "Resumed paper account {} (cash {:.2})",
            account.id, account.cash_balance
        );
        Ok(Some(account))
    }

    // =========================================================================
    // Orders
    // =========================================================================

    /// Validate, price and fill an order.
    pub async fn execute_order(&self, request: OrderRequest) -> Result<ExecutionResult, TradingError> {
        let account_id = self.account_id()?;

        let request = match normalize_request(request) {
            Ok(request) => request,
            Err((request, e)) => return Err(self.reject(&account_id, &request, e)),
        };

        let price = match self.fill_price(&request).await {
            Ok(price) => price,
            Err(e) => return Err(self.reject(&account_id, &request, e)),
        };

        let _guard = self.fill_lock.lock().await;
        self.fill(&account_id, &request, price)
            .map_err(|e| self.reject(&account_id, &request, e))
    }

    /// Close the whole position in `symbol` at market.
    pub async fn close_position(
        &self,
        symbol: &str,
        reason: &str,
    ) -> Result<ExecutionResult, TradingError> {
        let account_id = self.account_id()?;
        let symbol = symbol.trim().to_uppercase();

        if self.ledger.get_position(&account_id, &symbol)?.is_none() {
            return Err(TradingError::NotFound(format!("no open position in {}", symbol)));
        }

        let price = self.market_price(&symbol).await?;

        let _guard = self.fill_lock.lock().await;

        // Re-read under the lock, a concurrent fill may have closed it
        let position = self
            .ledger
            .get_position(&account_id, &symbol)?
            .ok_or_else(|| TradingError::NotFound(format!("no open position in {}", symbol)))?;

        let side = position.side().opposite();
        let request = OrderRequest::market(&symbol, side, position.quantity.abs()).with_strategy(
            "close_position",
            reason,
            1.0,
        );

        self.fill(&account_id, &request, price)
            .map_err(|e| self.reject(&account_id, &request, e))
    }

    /// Submit a strategy signal as a market order.
    pub async fn execute_signal(&self, signal: &Signal) -> Result<ExecutionResult, TradingError> {
        let request = OrderRequest::market(&signal.symbol, signal.side, signal.quantity)
            .with_strategy(&signal.strategy_id, &signal.explanation, signal.confidence);
        self.execute_order(request).await
    }

    /// Every order kind asks the gateway for a quote so unknown symbols are
    /// rejected. Limit and stop orders then fill at their own price.
    async fn fill_price(&self, request: &OrderRequest) -> Result<f64, TradingError> {
        let quote = self.market_price(&request.symbol).await?;
        match (request.kind, request.price) {
            (OrderKind::Market, _) => Ok(quote),
            (_, Some(price)) => Ok(price),
            (kind, None) => Err(TradingError::Validation(format!("{} orders require a price", kind))),
        }
    }

    async fn market_price(&self, symbol: &str) -> Result<f64, TradingError> {
        let timeout = self.config().gateway_timeout;
        let price = tokio::time::timeout(timeout, self.gateway.current_price(symbol))
            .await
            .map_err(|_| GatewayError::Timeout(timeout))??;

        if !price.is_finite() || price <= 0.0 {
            return Err(TradingError::UpstreamUnavailable(format!(
                "gateway returned invalid price {} for {}",
                price, symbol
            )));
        }
        Ok(price)
    }

    /// Apply a fill. Caller holds the fill lock.
    fn fill(
        &self,
        account_id: &str,
        request: &OrderRequest,
        price: f64,
    ) -> Result<ExecutionResult, TradingError> {
        let config = self.config();
        let account = self.load_account(account_id)?;
        let positions = self.ledger.list_positions(account_id)?;
        let current = positions.iter().find(|p| p.symbol == request.symbol);
        let other_liability = short_liability(positions.iter().filter(|p| p.symbol != request.symbol));

        let plan = plan_fill(
            &config,
            &account,
            current,
            other_liability,
            &request.symbol,
            request.side,
            request.quantity,
            price,
        )?;

        let mut order = Order::pending(account_id, request);
        order.fill(price, plan.fee, plan.realized_pnl);

        self.ledger.commit_fill(&LedgerCommit {
            account: plan.account.clone(),
            position: plan.change,
            order: order.clone(),
        })?;

        let realized_pnl = plan.realized_pnl.unwrap_or(0.0);
        info!(
            "Filled {} {} {} @ {:.2} (fee {:.2}, realized {:.2}, cash {:.2})",
            order.side,
            order.quantity,
            order.symbol,
            price,
            plan.fee,
            realized_pnl,
            plan.account.cash_balance
        );

        self.publish(EngineEvent::OrderFilled {
            order: order.clone(),
            position: plan.position.clone(),
            realized_pnl,
        });

        Ok(ExecutionResult {
            order,
            position: plan.position,
            account: plan.account,
            realized_pnl,
        })
    }

    /// Publish a rejection and hand the error back.
    fn reject(&self, account_id: &str, request: &OrderRequest, error: TradingError) -> TradingError {
        let mut order = Order::pending(account_id, request);
        order.reject(&error.to_string());

        warn!(
            "Rejected {} {} {} ({}): {}",
            request.side,
            request.quantity,
            request.symbol,
            request.strategy,
            error
        );

        self.publish(EngineEvent::OrderRejected {
            order,
            error_kind: error.kind().to_string(),
        });
        error
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn account(&self) -> Result<Account, TradingError> {
        let account_id = self.account_id()?;
        let _guard = self.fill_lock.lock().await;
        self.load_account(&account_id)
    }

    pub async fn positions(&self) -> Result<Vec<Position>, TradingError> {
        let account_id = self.account_id()?;
        let _guard = self.fill_lock.lock().await;
        Ok(self.ledger.list_positions(&account_id)?)
    }

    /// Order history, most recent first.
    pub async fn orders(&self, limit: usize) -> Result<Vec<Order>, TradingError> {
        let account_id = self.account_id()?;
        Ok(self.ledger.list_orders(&account_id, limit)?)
    }

    /// Read-only view for the strategy layer. Buying power is what a buy may
    /// spend, so it never exceeds cash.
    pub async fn snapshot(&self, symbol: &str) -> Result<AccountSnapshot, TradingError> {
        let account_id = self.account_id()?;
        let symbol = symbol.trim().to_uppercase();
        let config = self.config();
        let _guard = self.fill_lock.lock().await;

        let account = self.load_account(&account_id)?;
        let position_quantity = self
            .ledger
            .get_position(&account_id, &symbol)?
            .map(|p| p.quantity)
            .unwrap_or(0.0);

        Ok(AccountSnapshot {
            account_id,
            buying_power: account.cash_balance.min(account.buying_power).max(0.0),
            position_quantity,
            fee_rate: config.fee_rate,
            flat_fee: config.flat_fee,
        })
    }

    /// Aggregate view over cash and marked positions.
    pub async fn get_portfolio_metrics(&self) -> Result<PortfolioMetrics, TradingError> {
        let account_id = self.account_id()?;
        let _guard = self.fill_lock.lock().await;

        let account = self.load_account(&account_id)?;
        let positions = self.ledger.list_positions(&account_id)?;

        let positions_value: f64 = positions.iter().map(|p| p.market_value()).sum();
        let unrealized_pnl: f64 = positions.iter().map(|p| p.unrealized_pnl).sum();
        let total_equity = account.cash_balance + positions_value;
        let total_pnl = total_equity - account.initial_balance;
        let total_pnl_pct = if account.initial_balance > 0.0 {
            total_pnl / account.initial_balance * 100.0
        } else {
            0.0
        };

        Ok(PortfolioMetrics {
            account_id,
            cash_balance: account.cash_balance,
            buying_power: account.buying_power,
            positions_value,
            total_equity,
            unrealized_pnl,
            realized_pnl: account.realized_pnl,
            total_pnl,
            total_pnl_pct,
            win_rate: account.win_rate(),
            closed_trades: account.closed_trades,
            total_fees: account.total_fees,
            open_positions: positions.len(),
        })
    }

    /// Refresh mark prices from the gateway. Symbols whose quote fails keep
    /// their previous mark. Buying power follows the new short marks.
    /// Returns the number of positions updated.
    pub async fn mark_to_market(&self) -> Result<usize, TradingError> {
        let account_id = self.account_id()?;
        let symbols: Vec<String> = self
            .ledger
            .list_positions(&account_id)?
            .into_iter()
            .map(|p| p.symbol)
            .collect();

        let mut quotes = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            match self.market_price(&symbol).await {
                Ok(price) => quotes.push((symbol, price)),
                Err(e) => warn!("Skipping mark for {}: {}", symbol, e),
            }
        }

        let _guard = self.fill_lock.lock().await;
        let mut marked = 0;
        for (symbol, price) in quotes {
            if let Some(mut position) = self.ledger.get_position(&account_id, &symbol)? {
                position.mark(price);
                self.ledger.upsert_position(&position)?;
                marked += 1;
            }
        }

        if marked > 0 {
            let mut account = self.load_account(&account_id)?;
            let positions = self.ledger.list_positions(&account_id)?;
            account.recalculate(self.config().max_leverage, short_liability(&positions));
            self.ledger.put_account(&account)?;
        }

        debug!("Marked {} positions to market", marked);
        Ok(marked)
    }

    // =========================================================================
    // Settings
    // =========================================================================

    pub fn enable_auto_trading(&self) {
        self.set_auto_trading(true);
    }

    pub fn disable_auto_trading(&self) {
        self.set_auto_trading(false);
    }

    pub fn is_auto_trading_enabled(&self) -> bool {
        self.auto_trading.load(Ordering::SeqCst)
    }

    fn set_auto_trading(&self, enabled: bool) {
        let previous = self.auto_trading.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            info!("Auto-trading {}", if enabled { "enabled" } else { "disabled" });
            self.publish(EngineEvent::AutoTradingToggled {
                account_id: self.account_id().unwrap_or_default(),
                enabled,
            });
        }
    }

    /// Merge a partial configuration. Invalid entries are skipped with a
    /// warning. A leverage change is applied to the account's buying power
    /// immediately.
    pub async fn update_config(&self, update: ConfigUpdate) -> Result<EngineConfig, TradingError> {
        let _guard = self.fill_lock.lock().await;

        let config = {
            let mut config = self
                .config
                .write()
                .map_err(|_| TradingError::InvariantViolation("config lock poisoned".into()))?;
            for entry in config.apply(&update) {
                warn!("Ignoring invalid config value {}", entry);
            }
            config.clone()
        };

        if let Ok(account_id) = self.account_id() {
            let mut account = self.load_account(&account_id)?;
            let positions = self.ledger.list_positions(&account_id)?;
            account.recalculate(config.max_leverage, short_liability(&positions));
            self.ledger.put_account(&account)?;
        }

        info!("Engine config updated: {:?}", config);
        self.publish(EngineEvent::ConfigUpdated {
            config: config.clone(),
        });
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ledger::InMemoryLedger;
    use crate::services::market_data::SimulatedMarket;

    fn account(cash: f64) -> Account {
        Account::new("t", cash, 1.0)
    }

    fn position(qty: f64, avg: f64) -> Position {
        Position::new("paper_t".into(), "BTC/USD".into(), qty, avg)
    }

    #[test]
    fn test_plan_same_direction_add_averages_cost() {
        let config = EngineConfig::default();
        let existing = position(1.0, 100.0);
        let plan = plan_fill(
            &config,
            &account(1_000.0),
            Some(&existing),
            0.0,
            "BTC/USD",
            OrderSide::Buy,
            1.0,
            200.0,
        )
        .unwrap();

        let p = plan.position.unwrap();
        assert_eq!(p.quantity, 2.0);
        assert!((p.avg_cost - 150.0).abs() < 1e-9);
        assert!((p.unrealized_pnl - 100.0).abs() < 1e-9);
        assert!((plan.account.cash_balance - 800.0).abs() < 1e-9);
        assert!(plan.realized_pnl.is_none());
    }

    #[test]
    fn test_plan_partial_reduce_books_realized() {
        let config = EngineConfig::default();
        let existing = position(2.0, 100.0);
        let plan = plan_fill(
            &config,
            &account(1_000.0),
            Some(&existing),
            0.0,
            "BTC/USD",
            OrderSide::Sell,
            0.5,
            90.0,
        )
        .unwrap();

        let p = plan.position.unwrap();
        assert!((p.quantity - 1.5).abs() < 1e-9);
        assert_eq!(p.avg_cost, 100.0);
        assert!((plan.realized_pnl.unwrap() + 5.0).abs() < 1e-9);
        assert!((p.realized_pnl + 5.0).abs() < 1e-9);
        // Still open, so no trade has closed yet
        assert_eq!(plan.account.closed_trades, 0);
    }

    #[test]
    fn test_plan_trade_wins_on_net_realized() {
        let config = EngineConfig::default();
        let mut existing = position(1.5, 100.0);
        existing.realized_pnl = -5.0;

        // +15 on the rest outweighs the earlier -5
        let plan = plan_fill(
            &config,
            &account(1_000.0),
            Some(&existing),
            0.0,
            "BTC/USD",
            OrderSide::Sell,
            1.5,
            110.0,
        )
        .unwrap();
        assert!(plan.position.is_none());
        assert_eq!(plan.account.closed_trades, 1);
        assert_eq!(plan.account.winning_trades, 1);

        existing.realized_pnl = -20.0;
        let plan = plan_fill(
            &config,
            &account(1_000.0),
            Some(&existing),
            0.0,
            "BTC/USD",
            OrderSide::Sell,
            1.5,
            110.0,
        )
        .unwrap();
        assert_eq!(plan.account.closed_trades, 1);
        assert_eq!(plan.account.winning_trades, 0);
    }

    #[test]
    fn test_plan_cover_shortfall_reports_cost_against_cash() {
        let config = EngineConfig {
            allow_short: true,
            ..Default::default()
        };
        let existing = position(-2.0, 100.0);
        let err = plan_fill(
            &config,
            &account(300.0),
            Some(&existing),
            0.0,
            "BTC/USD",
            OrderSide::Buy,
            2.0,
            200.0,
        )
        .unwrap_err();
        assert_eq!(
            err,
            TradingError::InsufficientFunds {
                needed: 400.0,
                available: 300.0
            }
        );
    }

    #[test]
    fn test_plan_short_capacity_counts_open_shorts() {
        let config = EngineConfig {
            allow_short: true,
            ..Default::default()
        };
        let first = plan_fill(&config, &account(1_000.0), None, 0.0, "BTC/USD", OrderSide::Sell, 10.0, 100.0)
            .unwrap();
        assert_eq!(first.account.cash_balance, 2_000.0);
        assert_eq!(first.account.buying_power, 0.0);

        // Proceeds do not fund another short in the same symbol
        let open = first.position.unwrap();
        let err = plan_fill(
            &config,
            &first.account,
            Some(&open),
            0.0,
            "BTC/USD",
            OrderSide::Sell,
            1.0,
            100.0,
        )
        .unwrap_err();
        assert!(matches!(err, TradingError::InsufficientFunds { .. }));

        // Nor in another symbol
        let err = plan_fill(&config, &first.account, None, 1_000.0, "ETH/USD", OrderSide::Sell, 1.0, 100.0)
            .unwrap_err();
        assert!(matches!(err, TradingError::InsufficientFunds { .. }));

        // Covering only needs cash
        let cover = plan_fill(
            &config,
            &first.account,
            Some(&open),
            0.0,
            "BTC/USD",
            OrderSide::Buy,
            10.0,
            100.0,
        )
        .unwrap();
        assert_eq!(cover.account.cash_balance, 1_000.0);
        assert_eq!(cover.account.buying_power, 1_000.0);
    }

    #[test]
    fn test_plan_oversell_rejected_without_shorting() {
        let config = EngineConfig::default();
        let existing = position(1.0, 100.0);
        let err = plan_fill(
            &config,
            &account(1_000.0),
            Some(&existing),
            0.0,
            "BTC/USD",
            OrderSide::Sell,
            2.0,
            100.0,
        )
        .unwrap_err();
        assert!(matches!(err, TradingError::Validation(_)));
    }

    #[test]
    fn test_plan_short_flip_when_allowed() {
        let config = EngineConfig {
            allow_short: true,
            ..Default::default()
        };
        let existing = position(1.0, 100.0);
        let plan = plan_fill(
            &config,
            &account(1_000.0),
            Some(&existing),
            0.0,
            "BTC/USD",
            OrderSide::Sell,
            3.0,
            110.0,
        )
        .unwrap();

        let p = plan.position.unwrap();
        assert!((p.quantity + 2.0).abs() < 1e-9);
        assert_eq!(p.avg_cost, 110.0);
        assert!((plan.realized_pnl.unwrap() - 10.0).abs() < 1e-9);
        assert!((plan.account.cash_balance - 1_330.0).abs() < 1e-9);
        assert_eq!(plan.account.closed_trades, 1);
        assert_eq!(p.realized_pnl, 0.0);
        // (1330 - 220) - 220
        assert!((plan.account.buying_power - 890.0).abs() < 1e-9);
    }

    #[test]
    fn test_plan_short_cover_profit() {
        let config = EngineConfig {
            allow_short: true,
            ..Default::default()
        };
        let existing = position(-2.0, 100.0);
        let plan = plan_fill(
            &config,
            &account(1_200.0),
            Some(&existing),
            0.0,
            "BTC/USD",
            OrderSide::Buy,
            2.0,
            80.0,
        )
        .unwrap();

        assert!(plan.position.is_none());
        assert!(matches!(plan.change, PositionChange::Remove { .. }));
        assert!((plan.realized_pnl.unwrap() - 40.0).abs() < 1e-9);
        assert_eq!(plan.account.winning_trades, 1);
    }

    #[test]
    fn test_plan_risk_limit_after_funds() {
        let config = EngineConfig {
            max_position_size: Some(500.0),
            ..Default::default()
        };
        let err = plan_fill(&config, &account(1_000.0), None, 0.0, "BTC/USD", OrderSide::Buy, 6.0, 100.0)
            .unwrap_err();
        assert_eq!(
            err,
            TradingError::RiskLimit {
                notional: 600.0,
                limit: 500.0
            }
        );

        // Funds are checked first
        let err = plan_fill(&config, &account(100.0), None, 0.0, "BTC/USD", OrderSide::Buy, 6.0, 100.0)
            .unwrap_err();
        assert!(matches!(err, TradingError::InsufficientFunds { .. }));
    }

    #[test]
    fn test_plan_reducing_is_exempt_from_risk_limit() {
        let config = EngineConfig {
            max_position_size: Some(50.0),
            ..Default::default()
        };
        let existing = position(2.0, 100.0);
        let plan = plan_fill(
            &config,
            &account(0.0),
            Some(&existing),
            0.0,
            "BTC/USD",
            OrderSide::Sell,
            1.0,
            100.0,
        );
        assert!(plan.is_ok());
    }

    #[test]
    fn test_normalize_request() {
        let ok = normalize_request(OrderRequest::market(" btc/usd ", OrderSide::Buy, 1.0)).unwrap();
        assert_eq!(ok.symbol, "BTC/USD");

        let bad_conf = OrderRequest::market("BTC/USD", OrderSide::Buy, 1.0).with_strategy("m", "", 1.5);
        assert!(normalize_request(bad_conf).is_err());

        let mut no_price = OrderRequest::limit("BTC/USD", OrderSide::Buy, 1.0, 10.0);
        no_price.price = None;
        assert!(normalize_request(no_price).is_err());

        assert!(normalize_request(OrderRequest::market("BTC/USD", OrderSide::Buy, 0.0)).is_err());
        assert!(normalize_request(OrderRequest::market("BTC/USD", OrderSide::Buy, f64::NAN)).is_err());
    }

    #[test]
    fn test_error_mapping() {
        let e: TradingError = GatewayError::UnknownSymbol("X".into()).into();
        assert_eq!(e.kind(), "VALIDATION");
        let e: TradingError = GatewayError::Timeout(std::time::Duration::from_millis(5)).into();
        assert_eq!(e.kind(), "UPSTREAM_UNAVAILABLE");
        let e: TradingError = LedgerError::DuplicateOrder("o".into()).into();
        assert_eq!(e.kind(), "INVARIANT_VIOLATION");
    }

    #[tokio::test]
    async fn test_operations_before_initialize() {
        let engine = PaperTradingEngine::new(
            Arc::new(InMemoryLedger::new()),
            Arc::new(SimulatedMarket::new(1)),
            EngineConfig::default(),
        );
        assert_eq!(
            engine.get_portfolio_metrics().await.unwrap_err(),
            TradingError::NotInitialized
        );
        let err = engine
            .execute_order(OrderRequest::market("BTC/USD", OrderSide::Buy, 1.0))
            .await
            .unwrap_err();
        assert_eq!(err, TradingError::NotInitialized);
    }

    #[tokio::test]
    async fn test_resume_attaches_existing_account() {
        let ledger: Arc<dyn Ledger> = Arc::new(InMemoryLedger::new());
        let market = Arc::new(SimulatedMarket::new(1));

        let first = PaperTradingEngine::new(ledger.clone(), market.clone(), EngineConfig::default());
        first.initialize("zoe", Some(2_000.0)).await.unwrap();

        let second = PaperTradingEngine::new(ledger, market, EngineConfig::default());
        assert!(second.resume("nobody").await.unwrap().is_none());
        let account = second.resume("zoe").await.unwrap().unwrap();
        assert_eq!(account.cash_balance, 2_000.0);
        assert_eq!(second.account().await.unwrap().id, "paper_zoe");
    }
}
