//! Position & Order Ledger
//!
//! Bookkeeping for accounts, open positions and order history. Every lookup is
//! keyed by account ID; absence is `Ok(None)` or an empty list, never an error.
//!
//! Implementations:
//! - [`InMemoryLedger`]: DashMap-backed, used by tests and ephemeral servers
//! - [`SqliteStore`](crate::services::SqliteStore): durable, file or in-memory

use crate::types::{Account, Order, Position};
use dashmap::DashMap;
use std::collections::BTreeMap;
use thiserror::Error;

/// Ledger errors. Absence of a record is not one of them.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Order {0} already recorded")]
    DuplicateOrder(String),

    #[error("Order {0} is not terminal and cannot be recorded")]
    NonTerminalOrder(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        LedgerError::Storage(e.to_string())
    }
}

/// What a fill does to the account's position row.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionChange {
    Upsert(Position),
    Remove { symbol: String },
}

/// Everything one fill writes. Applied as a unit by [`Ledger::commit_fill`].
#[derive(Debug, Clone)]
pub struct LedgerCommit {
    pub account: Account,
    pub position: PositionChange,
    pub order: Order,
}

/// Storage contract for the paper trading engine.
pub trait Ledger: Send + Sync {
    fn get_account(&self, account_id: &str) -> Result<Option<Account>, LedgerError>;

    fn put_account(&self, account: &Account) -> Result<(), LedgerError>;

    /// Remove an account together with its positions and orders.
    fn delete_account(&self, account_id: &str) -> Result<(), LedgerError>;

    /// Replace an account with a fresh one, dropping its positions and orders.
    fn reset_account(&self, account: &Account) -> Result<(), LedgerError> {
        self.delete_account(&account.id)?;
        self.put_account(account)
    }

    fn get_position(&self, account_id: &str, symbol: &str)
        -> Result<Option<Position>, LedgerError>;

    fn upsert_position(&self, position: &Position) -> Result<(), LedgerError>;

    /// Returns whether a row was removed.
    fn remove_position(&self, account_id: &str, symbol: &str) -> Result<bool, LedgerError>;

    /// Record a terminal order. Orders are never rewritten.
    fn append_order(&self, order: &Order) -> Result<(), LedgerError>;

    /// Most recent first.
    fn list_orders(&self, account_id: &str, limit: usize) -> Result<Vec<Order>, LedgerError>;

    /// Ordered by symbol.
    fn list_positions(&self, account_id: &str) -> Result<Vec<Position>, LedgerError>;

    /// Apply one fill. The order is checked first so a rejected append leaves
    /// the account and position untouched.
    fn commit_fill(&self, commit: &LedgerCommit) -> Result<(), LedgerError> {
        if !commit.order.status.is_terminal() {
            return Err(LedgerError::NonTerminalOrder(commit.order.id.clone()));
        }
        self.append_order(&commit.order)?;
        match &commit.position {
            PositionChange::Upsert(position) => self.upsert_position(position)?,
            PositionChange::Remove { symbol } => {
                self.remove_position(&commit.account.id, symbol)?;
            }
        }
        self.put_account(&commit.account)
    }
}

/// In-memory ledger.
#[derive(Default)]
pub struct InMemoryLedger {
    accounts: DashMap<String, Account>,
    /// account_id -> symbol -> position
    positions: DashMap<String, BTreeMap<String, Position>>,
    /// account_id -> orders in append order
    orders: DashMap<String, Vec<Order>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Ledger for InMemoryLedger {
    fn get_account(&self, account_id: &str) -> Result<Option<Account>, LedgerError> {
        Ok(self.accounts.get(account_id).map(|a| a.clone()))
    }

    fn put_account(&self, account: &Account) -> Result<(), LedgerError> {
        self.accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    fn delete_account(&self, account_id: &str) -> Result<(), LedgerError> {
        self.accounts.remove(account_id);
        self.positions.remove(account_id);
        self.orders.remove(account_id);
        Ok(())
    }

    fn get_position(
        &self,
        account_id: &str,
        symbol: &str,
    ) -> Result<Option<Position>, LedgerError> {
        Ok(self
            .positions
            .get(account_id)
            .and_then(|book| book.get(symbol).cloned()))
    }

    fn upsert_position(&self, position: &Position) -> Result<(), LedgerError> {
        self.positions
            .entry(position.account_id.clone())
            .or_default()
            .insert(position.symbol.clone(), position.clone());
        Ok(())
    }

    fn remove_position(&self, account_id: &str, symbol: &str) -> Result<bool, LedgerError> {
        Ok(self
            .positions
            .get_mut(account_id)
            .map(|mut book| book.remove(symbol).is_some())
            .unwrap_or(false))
    }

    fn append_order(&self, order: &Order) -> Result<(), LedgerError> {
        if !order.status.is_terminal() {
            return Err(LedgerError::NonTerminalOrder(order.id.clone()));
        }
        let mut history = self.orders.entry(order.account_id.clone()).or_default();
        if history.iter().any(|o| o.id == order.id) {
            return Err(LedgerError::DuplicateOrder(order.id.clone()));
        }
        history.push(order.clone());
        Ok(())
    }

    fn list_orders(&self, account_id: &str, limit: usize) -> Result<Vec<Order>, LedgerError> {
        Ok(self
            .orders
            .get(account_id)
            .map(|history| history.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    fn list_positions(&self, account_id: &str) -> Result<Vec<Position>, LedgerError> {
        Ok(self
            .positions
            .get(account_id)
            .map(|book| book.values().cloned().collect())
            .unwrap_or_default())
    }
}
