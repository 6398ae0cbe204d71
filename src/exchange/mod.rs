#![allow(dead_code)]
pub mod binance;

pub use binance::*;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{
    Candle, MarketInfo, OrderBookSnapshot, Symbol, Ticker, TimeFrame, TriggerCondition,
};

/// Optional adapter features. Callers must check `supports` before using the
/// corresponding operation; unsupported calls return an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    StopLossOrder,
    TriggerOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOrderStatus {
    Open,
    Closed,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOrderKind {
    Limit,
    Market,
    StopLoss,
    Trigger,
}

#[derive(Debug, Clone)]
pub struct ExchangeOrder {
    pub id: String,
    pub symbol: Symbol,
    pub status: ExchangeOrderStatus,
    pub kind: ExchangeOrderKind,
    pub amount: Decimal,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub price: Option<Decimal>,
    pub average: Option<Decimal>,
}

impl ExchangeOrder {
    pub fn fill_price(&self) -> Option<Decimal> {
        self.average.or(self.price)
    }
}

/// Uniform access to one spot exchange. The trading core only ever talks to
/// this trait; concrete adapters translate to the venue's REST surface.
#[async_trait]
pub trait Exchange: Send + Sync {
    fn id(&self) -> &str;

    fn supports(&self, capability: Capability) -> bool;

    /// Routes to the venue sandbox where one exists. Called before the
    /// adapter is shared; a no-op for venues without a sandbox.
    fn set_sandbox_mode(&mut self, _enabled: bool) {}

    async fn load_markets(&self) -> anyhow::Result<Vec<MarketInfo>>;

    async fn symbols(&self) -> anyhow::Result<Vec<Symbol>>;

    async fn market(&self, symbol: &Symbol) -> anyhow::Result<MarketInfo>;

    async fn fetch_ticker(&self, symbol: &Symbol) -> anyhow::Result<Ticker>;

    async fn fetch_ohlcv(
        &self,
        symbol: &Symbol,
        timeframe: TimeFrame,
        limit: u32,
    ) -> anyhow::Result<Vec<Candle>>;

    async fn fetch_order_book(&self, symbol: &Symbol, depth: u32)
        -> anyhow::Result<OrderBookSnapshot>;

    async fn create_limit_buy_order(
        &self,
        symbol: &Symbol,
        amount: Decimal,
        price: Decimal,
    ) -> anyhow::Result<ExchangeOrder>;

    async fn create_limit_sell_order(
        &self,
        symbol: &Symbol,
        amount: Decimal,
        price: Decimal,
    ) -> anyhow::Result<ExchangeOrder>;

    async fn create_market_buy_order(
        &self,
        symbol: &Symbol,
        amount: Decimal,
    ) -> anyhow::Result<ExchangeOrder>;

    async fn create_market_sell_order(
        &self,
        symbol: &Symbol,
        amount: Decimal,
    ) -> anyhow::Result<ExchangeOrder>;

    /// Only valid when `supports(Capability::StopLossOrder)`.
    async fn create_stop_loss_order(
        &self,
        symbol: &Symbol,
        amount: Decimal,
        stop_price: Decimal,
    ) -> anyhow::Result<ExchangeOrder>;

    /// Only valid when `supports(Capability::TriggerOrder)`.
    async fn create_trigger_order(
        &self,
        symbol: &Symbol,
        amount: Decimal,
        price: Decimal,
        trigger: TriggerCondition,
    ) -> anyhow::Result<ExchangeOrder>;

    async fn fetch_order(&self, order_id: &str, symbol: &Symbol) -> anyhow::Result<ExchangeOrder>;

    async fn cancel_order(&self, order_id: &str, symbol: &Symbol) -> anyhow::Result<()>;

    async fn fetch_open_orders(&self, symbol: &Symbol) -> anyhow::Result<Vec<ExchangeOrder>>;
}
