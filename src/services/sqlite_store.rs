//! SQLite persistence for the ledger.
//!
//! Accounts, open positions and order history live in three tables. A fill is
//! written inside one transaction so a crash never leaves cash, position and
//! order history out of step.

use crate::services::ledger::{Ledger, LedgerCommit, LedgerError, PositionChange};
use crate::types::{Account, Order, Position};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// SQLite-backed ledger.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create a new SQLite store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!("SQLite ledger initialized");
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub fn new_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        debug!("In-memory SQLite ledger initialized");
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn
            .lock()
            .map_err(|_| LedgerError::Storage("connection mutex poisoned".to_string()))
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<(), LedgerError> {
        let conn = self.conn()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                cash_balance REAL NOT NULL,
                buying_power REAL NOT NULL,
                initial_balance REAL NOT NULL,
                realized_pnl REAL NOT NULL DEFAULT 0,
                total_fees REAL NOT NULL DEFAULT 0,
                closed_trades INTEGER NOT NULL DEFAULT 0,
                winning_trades INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS positions (
                account_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                quantity REAL NOT NULL,
                avg_cost REAL NOT NULL,
                mark_price REAL NOT NULL,
                unrealized_pnl REAL NOT NULL,
                realized_pnl REAL NOT NULL DEFAULT 0,
                opened_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (account_id, symbol)
            );

            CREATE TABLE IF NOT EXISTS orders (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT UNIQUE NOT NULL,
                account_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity REAL NOT NULL,
                kind TEXT NOT NULL,
                price REAL,
                status TEXT NOT NULL,
                strategy TEXT NOT NULL,
                reasoning TEXT NOT NULL,
                confidence REAL NOT NULL,
                fill_price REAL,
                filled_at INTEGER,
                fee REAL NOT NULL DEFAULT 0,
                realized_pnl REAL,
                reject_reason TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_orders_account ON orders(account_id, seq);",
        )?;

        Ok(())
    }
}

// =============================================================================
// Statement helpers (shared by plain calls and transactions)
// =============================================================================

fn write_account(conn: &Connection, account: &Account) -> Result<(), LedgerError> {
    conn.execute(
        "INSERT INTO accounts (id, user_id, cash_balance, buying_power, initial_balance,
            realized_pnl, total_fees, closed_trades, winning_trades, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(id) DO UPDATE SET
            user_id = excluded.user_id,
            cash_balance = excluded.cash_balance,
            buying_power = excluded.buying_power,
            initial_balance = excluded.initial_balance,
            realized_pnl = excluded.realized_pnl,
            total_fees = excluded.total_fees,
            closed_trades = excluded.closed_trades,
            winning_trades = excluded.winning_trades,
            updated_at = excluded.updated_at",
        params![
            account.id,
            account.user_id,
            account.cash_balance,
            account.buying_power,
            account.initial_balance,
            account.realized_pnl,
            account.total_fees,
            account.closed_trades as i64,
            account.winning_trades as i64,
            account.created_at,
            account.updated_at,
        ],
    )?;
    Ok(())
}

fn delete_account_rows(conn: &Connection, account_id: &str) -> Result<(), LedgerError> {
    conn.execute("DELETE FROM orders WHERE account_id = ?1", params![account_id])?;
    conn.execute("DELETE FROM positions WHERE account_id = ?1", params![account_id])?;
    conn.execute("DELETE FROM accounts WHERE id = ?1", params![account_id])?;
    Ok(())
}

fn write_position(conn: &Connection, position: &Position) -> Result<(), LedgerError> {
    conn.execute(
        "INSERT INTO positions (account_id, symbol, quantity, avg_cost, mark_price,
            unrealized_pnl, realized_pnl, opened_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(account_id, symbol) DO UPDATE SET
            quantity = excluded.quantity,
            avg_cost = excluded.avg_cost,
            mark_price = excluded.mark_price,
            unrealized_pnl = excluded.unrealized_pnl,
            realized_pnl = excluded.realized_pnl,
            updated_at = excluded.updated_at",
        params![
            position.account_id,
            position.symbol,
            position.quantity,
            position.avg_cost,
            position.mark_price,
            position.unrealized_pnl,
            position.realized_pnl,
            position.opened_at,
            position.updated_at,
        ],
    )?;
    Ok(())
}

fn delete_position(conn: &Connection, account_id: &str, symbol: &str) -> Result<bool, LedgerError> {
    let removed = conn.execute(
        "DELETE FROM positions WHERE account_id = ?1 AND symbol = ?2",
        params![account_id, symbol],
    )?;
    Ok(removed > 0)
}

fn insert_order(conn: &Connection, order: &Order) -> Result<(), LedgerError> {
    if !order.status.is_terminal() {
        return Err(LedgerError::NonTerminalOrder(order.id.clone()));
    }

    let result = conn.execute(
        "INSERT INTO orders (id, account_id, symbol, side, quantity, kind, price, status,
            strategy, reasoning, confidence, fill_price, filled_at, fee, realized_pnl,
            reject_reason, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            order.id,
            order.account_id,
            order.symbol,
            order.side.to_string(),
            order.quantity,
            order.kind.to_string(),
            order.price,
            order.status.to_string(),
            order.strategy,
            order.reasoning,
            order.confidence,
            order.fill_price,
            order.filled_at,
            order.fee,
            order.realized_pnl,
            order.reject_reason,
            order.created_at,
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            Err(LedgerError::DuplicateOrder(order.id.clone()))
        }
        Err(e) => Err(e.into()),
    }
}

fn parse_column<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn account_from_row(row: &Row) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        user_id: row.get(1)?,
        cash_balance: row.get(2)?,
        buying_power: row.get(3)?,
        initial_balance: row.get(4)?,
        realized_pnl: row.get(5)?,
        total_fees: row.get(6)?,
        closed_trades: row.get::<_, i64>(7)? as u64,
        winning_trades: row.get::<_, i64>(8)? as u64,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn position_from_row(row: &Row) -> rusqlite::Result<Position> {
    Ok(Position {
        account_id: row.get(0)?,
        symbol: row.get(1)?,
        quantity: row.get(2)?,
        avg_cost: row.get(3)?,
        mark_price: row.get(4)?,
        unrealized_pnl: row.get(5)?,
        realized_pnl: row.get(6)?,
        opened_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn order_from_row(row: &Row) -> rusqlite::Result<Order> {
    Ok(Order {
        id: row.get(0)?,
        account_id: row.get(1)?,
        symbol: row.get(2)?,
        side: parse_column(row, 3)?,
        quantity: row.get(4)?,
        kind: parse_column(row, 5)?,
        price: row.get(6)?,
        status: parse_column(row, 7)?,
        strategy: row.get(8)?,
        reasoning: row.get(9)?,
        confidence: row.get(10)?,
        fill_price: row.get(11)?,
        filled_at: row.get(12)?,
        fee: row.get(13)?,
        realized_pnl: row.get(14)?,
        reject_reason: row.get(15)?,
        created_at: row.get(16)?,
    })
}

const ACCOUNT_COLUMNS: &str = "id, user_id, cash_balance, buying_power, initial_balance,
    realized_pnl, total_fees, closed_trades, winning_trades, created_at, updated_at";

const POSITION_COLUMNS: &str = "account_id, symbol, quantity, avg_cost, mark_price,
    unrealized_pnl, realized_pnl, opened_at, updated_at";

const ORDER_COLUMNS: &str = "id, account_id, symbol, side, quantity, kind, price, status,
    strategy, reasoning, confidence, fill_price, filled_at, fee, realized_pnl,
    reject_reason, created_at";

impl Ledger for SqliteStore {
    fn get_account(&self, account_id: &str) -> Result<Option<Account>, LedgerError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLUMNS);
        Ok(conn
            .query_row(&sql, params![account_id], account_from_row)
            .optional()?)
    }

    fn put_account(&self, account: &Account) -> Result<(), LedgerError> {
        let conn = self.conn()?;
        write_account(&conn, account)
    }

    fn delete_account(&self, account_id: &str) -> Result<(), LedgerError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        delete_account_rows(&tx, account_id)?;
        tx.commit()?;
        Ok(())
    }

    fn reset_account(&self, account: &Account) -> Result<(), LedgerError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        delete_account_rows(&tx, &account.id)?;
        write_account(&tx, account)?;
        tx.commit()?;
        Ok(())
    }

    fn get_position(
        &self,
        account_id: &str,
        symbol: &str,
    ) -> Result<Option<Position>, LedgerError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM positions WHERE account_id = ?1 AND symbol = ?2",
            POSITION_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![account_id, symbol], position_from_row)
            .optional()?)
    }

    fn upsert_position(&self, position: &Position) -> Result<(), LedgerError> {
        let conn = self.conn()?;
        write_position(&conn, position)
    }

    fn remove_position(&self, account_id: &str, symbol: &str) -> Result<bool, LedgerError> {
        let conn = self.conn()?;
        delete_position(&conn, account_id, symbol)
    }

    fn append_order(&self, order: &Order) -> Result<(), LedgerError> {
        let conn = self.conn()?;
        insert_order(&conn, order)
    }

    fn list_orders(&self, account_id: &str, limit: usize) -> Result<Vec<Order>, LedgerError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM orders WHERE account_id = ?1 ORDER BY seq DESC LIMIT ?2",
            ORDER_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let orders = stmt
            .query_map(params![account_id, limit as i64], order_from_row)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| LedgerError::Corrupt(e.to_string()))?;
        Ok(orders)
    }

    fn list_positions(&self, account_id: &str) -> Result<Vec<Position>, LedgerError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM positions WHERE account_id = ?1 ORDER BY symbol",
            POSITION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let positions = stmt
            .query_map(params![account_id], position_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(positions)
    }

    fn commit_fill(&self, commit: &LedgerCommit) -> Result<(), LedgerError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        insert_order(&tx, &commit.order)?;
        match &commit.position {
            PositionChange::Upsert(position) => write_position(&tx, position)?,
            PositionChange::Remove { symbol } => {
                delete_position(&tx, &commit.account.id, symbol)?;
            }
        }
        write_account(&tx, &commit.account)?;

        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderKind, OrderRequest, OrderSide, OrderStatus};

    fn store() -> SqliteStore {
        SqliteStore::new_in_memory().unwrap()
    }

    #[test]
    fn test_account_round_trip() {
        let store = store();
        let mut account = Account::new("carol", 25_000.0, 1.0);
        store.put_account(&account).unwrap();

        account.cash_balance = 20_000.0;
        account.closed_trades = 3;
        account.winning_trades = 2;
        store.put_account(&account).unwrap();

        let loaded = store.get_account(&account.id).unwrap().unwrap();
        assert_eq!(loaded, account);
        assert!(store.get_account("missing").unwrap().is_none());
    }

    #[test]
    fn test_orders_keep_fields_and_order() {
        let store = store();
        let request = OrderRequest::limit("ETH/USD", OrderSide::Sell, 2.0, 2_500.0)
            .with_strategy("mean_reversion", "price stretched above average", 0.72);
        let mut first = Order::pending("acct", &request);
        first.fill(2_500.0, 1.25, Some(40.0));
        let mut second = Order::pending("acct", &OrderRequest::market("BTC/USD", OrderSide::Buy, 1.0));
        second.reject("insufficient funds");

        store.append_order(&first).unwrap();
        store.append_order(&second).unwrap();

        let orders = store.list_orders("acct", 10).unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].status, OrderStatus::Rejected);
        assert_eq!(orders[0].reject_reason.as_deref(), Some("insufficient funds"));
        assert_eq!(orders[1], first);
        assert_eq!(orders[1].kind, OrderKind::Limit);
    }

    #[test]
    fn test_duplicate_order_is_rejected() {
        let store = store();
        let mut order = Order::pending("acct", &OrderRequest::market("BTC/USD", OrderSide::Buy, 1.0));
        order.fill(10.0, 0.0, None);
        store.append_order(&order).unwrap();
        assert!(matches!(
            store.append_order(&order),
            Err(LedgerError::DuplicateOrder(_))
        ));
    }

    #[test]
    fn test_commit_fill_is_atomic() {
        let store = store();
        let account = Account::new("dave", 1_000.0, 1.0);
        store.put_account(&account).unwrap();

        let mut order = Order::pending(&account.id, &OrderRequest::market("BTC/USD", OrderSide::Buy, 1.0));
        order.fill(100.0, 0.0, None);
        store.append_order(&order).unwrap();

        // Re-using the order id fails inside the transaction; nothing else lands
        let mut changed = account.clone();
        changed.cash_balance = 900.0;
        let commit = LedgerCommit {
            account: changed,
            position: PositionChange::Upsert(Position::new(
                account.id.clone(),
                "BTC/USD".into(),
                1.0,
                100.0,
            )),
            order,
        };

        assert!(store.commit_fill(&commit).is_err());
        assert_eq!(store.get_account(&account.id).unwrap().unwrap().cash_balance, 1_000.0);
        assert!(store.list_positions(&account.id).unwrap().is_empty());
    }

    #[test]
    fn test_delete_account_cascades() {
        let store = store();
        let account = Account::new("erin", 1_000.0, 1.0);
        store.put_account(&account).unwrap();
        store
            .upsert_position(&Position::new(account.id.clone(), "SOL/USD".into(), 5.0, 20.0))
            .unwrap();

        store.delete_account(&account.id).unwrap();
        assert!(store.get_account(&account.id).unwrap().is_none());
        assert!(store.list_positions(&account.id).unwrap().is_empty());
    }

    #[test]
    fn test_reset_account_is_atomic() {
        let store = store();
        let account = Account::new("fay", 1_000.0, 1.0);
        store.put_account(&account).unwrap();
        store
            .upsert_position(&Position::new(account.id.clone(), "SOL/USD".into(), 5.0, 20.0))
            .unwrap();

        // NaN binds as NULL, so the insert fails after the deletes ran
        let mut broken = Account::new("fay", 500.0, 1.0);
        broken.cash_balance = f64::NAN;
        assert!(store.reset_account(&broken).is_err());
        assert_eq!(store.get_account(&account.id).unwrap().unwrap().cash_balance, 1_000.0);
        assert_eq!(store.list_positions(&account.id).unwrap().len(), 1);

        let fresh = Account::new("fay", 500.0, 1.0);
        store.reset_account(&fresh).unwrap();
        assert_eq!(store.get_account(&fresh.id).unwrap().unwrap(), fresh);
        assert!(store.list_positions(&fresh.id).unwrap().is_empty());
    }
}
