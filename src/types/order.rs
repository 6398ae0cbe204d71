#![allow(dead_code)]
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Symbol;

/// One fill of an iceberg batch, journalled inside its parent entry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubOrderRecord {
    pub order_id: String,
    pub size: Decimal,
    pub avg_price: Decimal,
    pub stage: String,
    pub timestamp: DateTime<Utc>,
}

/// Journalled buy fill. The entry journal is the durable source of truth for
/// what was bought; active positions are derived by subtracting exits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: Symbol,
    pub exchange_id: String,
    pub order_id: String,
    pub size: Decimal,
    pub avg_price: Decimal,
    pub stage: String,
    pub is_iceberg: bool,
    pub cost: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_orders: Option<Vec<SubOrderRecord>>,
}

/// Journalled sell fill, annotated with the matching entry when one exists so
/// realized P&L can be read straight from the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: Symbol,
    pub exchange_id: String,
    pub order_id: String,
    pub size: Decimal,
    pub avg_price: Decimal,
    pub reason: String,
    pub revenue: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profit_percentage: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profit_amount: Option<Decimal>,
}

/// Aggregate statistics derived from the two journals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradingStats {
    pub total_entries: usize,
    pub total_exits: usize,
    pub total_profit: Decimal,
    pub win_count: usize,
    pub loss_count: usize,
    pub win_rate: Decimal,
    pub avg_profit_percentage: Decimal,
    pub max_profit_percentage: Decimal,
    pub max_loss_percentage: Decimal,
    pub total_volume: Decimal,
    pub active_positions: Vec<EntryRecord>,
}

#[derive(Debug, Clone)]
pub struct TradingHistory {
    pub entry_orders: Vec<EntryRecord>,
    pub exit_orders: Vec<ExitRecord>,
    pub stats: TradingStats,
}

/// Result of a completed entry execution (single or iceberg).
#[derive(Debug, Clone)]
pub struct EntryFill {
    pub order_id: String,
    pub symbol: Symbol,
    pub size: Decimal,
    pub avg_price: Decimal,
    pub stage: String,
    pub timestamp: DateTime<Utc>,
    pub sub_orders: Vec<SubOrderRecord>,
}

impl EntryFill {
    pub fn is_iceberg(&self) -> bool {
        !self.sub_orders.is_empty()
    }
}

/// Result of a completed exit execution.
#[derive(Debug, Clone)]
pub struct ExitFill {
    pub order_id: String,
    pub symbol: Symbol,
    pub size: Decimal,
    pub avg_price: Decimal,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// A resting stop order. When the exchange lacks native stop support the
/// marker is soft and the engine enforces the stop by monitoring price.
#[derive(Debug, Clone)]
pub struct StopOrder {
    pub order_id: Option<String>,
    pub stop_price: Decimal,
    pub size: Decimal,
    pub soft: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    PriceAbove,
    PriceBelow,
}

#[derive(Debug, Clone, Copy)]
pub struct TriggerCondition {
    pub kind: TriggerKind,
    pub price: Decimal,
}

/// A conditional (trigger) order, soft when the exchange cannot host it.
#[derive(Debug, Clone)]
pub struct ConditionalOrder {
    pub order_id: Option<String>,
    pub trigger: TriggerCondition,
    pub limit_price: Decimal,
    pub size: Decimal,
    pub stage: String,
    pub soft: bool,
}
