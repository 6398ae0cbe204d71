#![allow(dead_code)]
pub mod journal;

pub use journal::calculate_trading_stats;

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::exchange::{Capability, Exchange, ExchangeOrderKind, ExchangeOrderStatus};
use crate::types::{
    ConditionalOrder, EntryFill, EntryRecord, ExitFill, ExitRecord, MarketInfo, OrderBookSnapshot,
    Precision, StopOrder, SubOrderRecord, Symbol, TradingHistory, TriggerCondition,
};

const ENTRY_FILL_TIMEOUT: Duration = Duration::from_secs(60);
const EXIT_FILL_TIMEOUT: Duration = Duration::from_secs(30);
const FILL_POLL_INTERVAL: Duration = Duration::from_secs(3);
const FILL_POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);
const ICEBERG_MAX_BATCHES: u32 = 5;
const ORDER_BOOK_DEPTH: u32 = 20;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("exchange {0} is not configured")]
    UnknownExchange(String),
    #[error("{0} is not listed on the exchange")]
    UnknownSymbol(Symbol),
    #[error("no order book for {0}")]
    NoOrderBook(Symbol),
    #[error("order notional {notional} below minimum {min}")]
    BelowMinNotional { notional: Decimal, min: Decimal },
    #[error("exchange rejected order: {0}")]
    Rejected(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Computes the price a buy must quote to fill promptly: the best ask when
/// the target already crosses it, otherwise one tick above the target.
pub(crate) fn buy_price(
    target: Decimal,
    book: &OrderBookSnapshot,
    market: &MarketInfo,
) -> Decimal {
    match book.best_ask() {
        None => target,
        Some(ask) if target >= ask => ask,
        Some(_) => target + tick_size(&market.price_precision),
    }
}

/// Mirror image for sells against the best bid.
pub(crate) fn sell_price(
    target: Decimal,
    book: &OrderBookSnapshot,
    market: &MarketInfo,
) -> Decimal {
    match book.best_bid() {
        None => target,
        Some(bid) if target <= bid => bid,
        Some(_) => target - tick_size(&market.price_precision),
    }
}

pub(crate) fn tick_size(precision: &Precision) -> Decimal {
    match precision {
        Precision::Digits(digits) => Decimal::new(1, *digits),
        Precision::Step(step) => *step,
    }
}

/// Sizes are always rounded down to the exchange precision so an order can
/// never exceed the requested amount.
pub(crate) fn adjust_amount(size: Decimal, precision: &Precision) -> Decimal {
    match precision {
        Precision::Digits(digits) => {
            let factor = Decimal::from(10u64.pow(*digits));
            (size * factor).floor() / factor
        }
        Precision::Step(step) => {
            if step.is_zero() {
                size
            } else {
                (size / step).floor() * *step
            }
        }
    }
}

/// Executes entries and exits against the configured exchanges and appends
/// every fill to the durable order journals. In dry-run mode no network order
/// is placed; fills are assumed at the computed price and the journals are
/// still written.
pub struct OrderExecutor {
    exchanges: HashMap<String, Arc<dyn Exchange>>,
    default_exchange: String,
    dry_run: bool,
    iceberg_threshold: Decimal,
    min_order_amount: Decimal,
    entry_log: PathBuf,
    exit_log: PathBuf,
    journal_lock: Mutex<()>,
}

impl OrderExecutor {
    pub fn new(
        exchanges: HashMap<String, Arc<dyn Exchange>>,
        default_exchange: String,
        dry_run: bool,
        iceberg_threshold: Decimal,
        min_order_amount: Decimal,
        log_dir: PathBuf,
    ) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&log_dir)?;
        Ok(Self {
            exchanges,
            default_exchange,
            dry_run,
            iceberg_threshold,
            min_order_amount,
            entry_log: log_dir.join("entry_orders.json"),
            exit_log: log_dir.join("exit_orders.json"),
            journal_lock: Mutex::new(()),
        })
    }

    fn exchange(&self, exchange_id: Option<&str>) -> Result<(String, Arc<dyn Exchange>), ExecutorError> {
        let id = exchange_id.unwrap_or(&self.default_exchange).to_string();
        match self.exchanges.get(&id) {
            Some(exchange) => Ok((id, Arc::clone(exchange))),
            None => Err(ExecutorError::UnknownExchange(id)),
        }
    }

    fn synthetic_order_id(prefix: &str) -> String {
        format!("{}_{}", prefix, Uuid::new_v4().simple())
    }

    /// Buys `size` of `symbol` near `price`. Orders above the iceberg
    /// threshold are split into up to five sequential batches.
    pub async fn execute_entry(
        &self,
        symbol: &Symbol,
        size: Decimal,
        price: Decimal,
        stage: &str,
        exchange_id: Option<&str>,
    ) -> Result<EntryFill, ExecutorError> {
        let (exchange_id, exchange) = self.exchange(exchange_id)?;

        let fill = if size > self.iceberg_threshold {
            self.execute_iceberg_entry(&exchange, symbol, size, price, stage)
                .await?
        } else {
            self.execute_single_entry(&exchange, symbol, size, price, stage)
                .await?
        };

        self.log_entry_order(&fill, &exchange_id).await;
        Ok(fill)
    }

    async fn execute_single_entry(
        &self,
        exchange: &Arc<dyn Exchange>,
        symbol: &Symbol,
        size: Decimal,
        price: Decimal,
        stage: &str,
    ) -> Result<EntryFill, ExecutorError> {
        info!(
            "Entry order: {} size={} price={} stage={}",
            symbol, size, price, stage
        );

        let market = exchange
            .market(symbol)
            .await
            .map_err(|_| ExecutorError::UnknownSymbol(symbol.clone()))?;

        let book = exchange
            .fetch_order_book(symbol, ORDER_BOOK_DEPTH)
            .await
            .map_err(|_| ExecutorError::NoOrderBook(symbol.clone()))?;

        let actual_price = buy_price(price, &book, &market);
        let adjusted_size = adjust_amount(size, &market.amount_precision);

        let min_amount = market.min_cost.unwrap_or(self.min_order_amount);
        let notional = adjusted_size * actual_price;
        if notional < min_amount {
            return Err(ExecutorError::BelowMinNotional {
                notional,
                min: min_amount,
            });
        }

        let (order_id, avg_price) = if self.dry_run {
            info!(
                "[dry run] buy {}: size={} price={}",
                symbol, adjusted_size, actual_price
            );
            (Self::synthetic_order_id("dry_run"), actual_price)
        } else {
            let order = exchange
                .create_limit_buy_order(symbol, adjusted_size, actual_price)
                .await
                .map_err(|e| ExecutorError::Rejected(e.to_string()))?;
            let order_id = order.id.clone();

            let filled = self
                .wait_for_order_fill(exchange, &order_id, symbol, ENTRY_FILL_TIMEOUT)
                .await;
            if !filled {
                let _ = exchange.cancel_order(&order_id, symbol).await;
                let remaining = exchange
                    .fetch_order(&order_id, symbol)
                    .await
                    .map(|o| o.remaining)
                    .unwrap_or(Decimal::ZERO);
                if remaining > Decimal::ZERO {
                    exchange
                        .create_market_buy_order(symbol, remaining)
                        .await
                        .map_err(|e| ExecutorError::Rejected(e.to_string()))?;
                }
            }

            let final_state = exchange.fetch_order(&order_id, symbol).await?;
            (order_id, final_state.fill_price().unwrap_or(actual_price))
        };

        info!("Bought {}: order={} avg={}", symbol, order_id, avg_price);

        Ok(EntryFill {
            order_id,
            symbol: symbol.clone(),
            size: adjusted_size,
            avg_price,
            stage: stage.to_string(),
            timestamp: Utc::now(),
            sub_orders: Vec::new(),
        })
    }

    async fn execute_iceberg_entry(
        &self,
        exchange: &Arc<dyn Exchange>,
        symbol: &Symbol,
        size: Decimal,
        price: Decimal,
        stage: &str,
    ) -> Result<EntryFill, ExecutorError> {
        let batches = (size / self.iceberg_threshold)
            .ceil()
            .to_u32()
            .unwrap_or(1)
            .clamp(1, ICEBERG_MAX_BATCHES);
        let batch_size = size / Decimal::from(batches);

        info!(
            "Iceberg entry: {} total={} price={} batches={}",
            symbol, size, price, batches
        );

        let mut sub_orders: Vec<SubOrderRecord> = Vec::new();
        let mut total_filled = Decimal::ZERO;
        let mut total_cost = Decimal::ZERO;

        for i in 0..batches {
            let remaining = size - total_filled;
            let current = batch_size.min(remaining);
            let batch_stage = format!("{}_iceberg_{}", stage, i + 1);

            match self
                .execute_single_entry(exchange, symbol, current, price, &batch_stage)
                .await
            {
                Ok(fill) => {
                    total_filled += fill.size;
                    total_cost += fill.size * fill.avg_price;
                    sub_orders.push(SubOrderRecord {
                        order_id: fill.order_id,
                        size: fill.size,
                        avg_price: fill.avg_price,
                        stage: fill.stage,
                        timestamp: fill.timestamp,
                    });
                }
                Err(e) => {
                    warn!("Iceberg batch {}/{} failed: {}", i + 1, batches, e);
                    break;
                }
            }

            // Randomized gap between visible batches.
            if i + 1 < batches {
                let secs = {
                    let mut rng = rand::thread_rng();
                    rng.gen_range(3.0..7.0)
                };
                tokio::time::sleep(Duration::from_secs_f64(secs)).await;
            }
        }

        if total_filled.is_zero() {
            return Err(ExecutorError::Rejected(
                "no iceberg batch filled".to_string(),
            ));
        }

        let avg_price = total_cost / total_filled;
        let order_id = sub_orders
            .first()
            .map(|o| o.order_id.clone())
            .unwrap_or_else(|| Self::synthetic_order_id("iceberg"));

        Ok(EntryFill {
            order_id,
            symbol: symbol.clone(),
            size: total_filled,
            avg_price,
            stage: stage.to_string(),
            timestamp: Utc::now(),
            sub_orders,
        })
    }

    /// Sells `size` of `symbol` near `price`. A limit order is given 30
    /// seconds to fill, then cancelled with the remainder sold at market.
    pub async fn execute_exit(
        &self,
        symbol: &Symbol,
        size: Decimal,
        price: Decimal,
        reason: &str,
        exchange_id: Option<&str>,
    ) -> Result<ExitFill, ExecutorError> {
        let (exchange_id, exchange) = self.exchange(exchange_id)?;

        info!(
            "Exit order: {} size={} price={} reason={}",
            symbol, size, price, reason
        );

        let market = exchange
            .market(symbol)
            .await
            .map_err(|_| ExecutorError::UnknownSymbol(symbol.clone()))?;
        let book = exchange
            .fetch_order_book(symbol, ORDER_BOOK_DEPTH)
            .await
            .map_err(|_| ExecutorError::NoOrderBook(symbol.clone()))?;

        let actual_price = sell_price(price, &book, &market);
        let adjusted_size = adjust_amount(size, &market.amount_precision);

        let (order_id, avg_price) = if self.dry_run {
            info!(
                "[dry run] sell {}: size={} price={}",
                symbol, adjusted_size, actual_price
            );
            (Self::synthetic_order_id("dry_run"), actual_price)
        } else {
            let order = exchange
                .create_limit_sell_order(symbol, adjusted_size, actual_price)
                .await
                .map_err(|e| ExecutorError::Rejected(e.to_string()))?;
            let order_id = order.id.clone();

            let filled = self
                .wait_for_order_fill(&exchange, &order_id, symbol, EXIT_FILL_TIMEOUT)
                .await;
            if !filled {
                let _ = exchange.cancel_order(&order_id, symbol).await;
                let remaining = exchange
                    .fetch_order(&order_id, symbol)
                    .await
                    .map(|o| o.remaining)
                    .unwrap_or(Decimal::ZERO);
                if remaining > Decimal::ZERO {
                    exchange
                        .create_market_sell_order(symbol, remaining)
                        .await
                        .map_err(|e| ExecutorError::Rejected(e.to_string()))?;
                }
            }

            let final_state = exchange.fetch_order(&order_id, symbol).await?;
            (order_id, final_state.fill_price().unwrap_or(actual_price))
        };

        info!("Sold {}: order={} avg={}", symbol, order_id, avg_price);

        let fill = ExitFill {
            order_id,
            symbol: symbol.clone(),
            size: adjusted_size,
            avg_price,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        };
        self.log_exit_order(&fill, &exchange_id).await;
        Ok(fill)
    }

    /// Places an exchange-native stop when the venue supports one, otherwise
    /// returns a soft marker for the engine to enforce.
    pub async fn set_stop_loss(
        &self,
        symbol: &Symbol,
        stop_price: Decimal,
        size: Decimal,
        exchange_id: Option<&str>,
    ) -> Result<StopOrder, ExecutorError> {
        let (exchange_id, exchange) = self.exchange(exchange_id)?;

        let market = exchange
            .market(symbol)
            .await
            .map_err(|_| ExecutorError::UnknownSymbol(symbol.clone()))?;
        let adjusted_size = adjust_amount(size, &market.amount_precision);

        if !exchange.supports(Capability::StopLossOrder) {
            warn!(
                "{} has no native stop orders, {} falls back to a soft stop",
                exchange_id, symbol
            );
            return Ok(StopOrder {
                order_id: None,
                stop_price,
                size: adjusted_size,
                soft: true,
            });
        }

        let order_id = if self.dry_run {
            info!(
                "[dry run] stop loss {}: trigger={} size={}",
                symbol, stop_price, adjusted_size
            );
            Self::synthetic_order_id("dry_run_sl")
        } else {
            exchange
                .create_stop_loss_order(symbol, adjusted_size, stop_price)
                .await
                .map_err(|e| ExecutorError::Rejected(e.to_string()))?
                .id
        };

        info!("Stop loss set for {}: order={} @ {}", symbol, order_id, stop_price);
        Ok(StopOrder {
            order_id: Some(order_id),
            stop_price,
            size: adjusted_size,
            soft: false,
        })
    }

    /// Cancels any resting stop for the symbol and places a fresh one.
    pub async fn update_stop_loss(
        &self,
        symbol: &Symbol,
        new_stop_price: Decimal,
        size: Decimal,
        exchange_id: Option<&str>,
    ) -> Result<StopOrder, ExecutorError> {
        let (_, exchange) = self.exchange(exchange_id)?;

        if !self.dry_run {
            match exchange.fetch_open_orders(symbol).await {
                Ok(open_orders) => {
                    for order in open_orders {
                        if order.kind == ExchangeOrderKind::StopLoss {
                            if let Err(e) = exchange.cancel_order(&order.id, symbol).await {
                                warn!("Cancelling old stop {} failed: {}", order.id, e);
                            }
                        }
                    }
                }
                Err(e) => warn!("Listing open orders for {} failed: {}", symbol, e),
            }
        }

        self.set_stop_loss(symbol, new_stop_price, size, exchange_id).await
    }

    /// Registers a triggered buy. Without native trigger support the caller
    /// receives a soft marker and the engine watches the condition itself.
    pub async fn set_conditional_order(
        &self,
        symbol: &Symbol,
        size: Decimal,
        price: Decimal,
        stage: &str,
        condition: TriggerCondition,
        exchange_id: Option<&str>,
    ) -> Result<ConditionalOrder, ExecutorError> {
        let (exchange_id, exchange) = self.exchange(exchange_id)?;

        let market = exchange
            .market(symbol)
            .await
            .map_err(|_| ExecutorError::UnknownSymbol(symbol.clone()))?;
        let adjusted_size = adjust_amount(size, &market.amount_precision);

        if !exchange.supports(Capability::TriggerOrder) {
            debug!(
                "{} has no native trigger orders, {} {} becomes a soft conditional",
                exchange_id, symbol, stage
            );
            return Ok(ConditionalOrder {
                order_id: None,
                trigger: condition,
                limit_price: price,
                size: adjusted_size,
                stage: stage.to_string(),
                soft: true,
            });
        }

        let order_id = if self.dry_run {
            info!(
                "[dry run] conditional {}: trigger={} price={} size={}",
                symbol, condition.price, price, adjusted_size
            );
            Self::synthetic_order_id("dry_run_cond")
        } else {
            exchange
                .create_trigger_order(symbol, adjusted_size, price, condition)
                .await
                .map_err(|e| ExecutorError::Rejected(e.to_string()))?
                .id
        };

        info!(
            "Conditional order set for {}: order={} trigger={}",
            symbol, order_id, condition.price
        );
        Ok(ConditionalOrder {
            order_id: Some(order_id),
            trigger: condition,
            limit_price: price,
            size: adjusted_size,
            stage: stage.to_string(),
            soft: false,
        })
    }

    /// Cancels a resting exchange order, e.g. a stop left behind by a closed
    /// position. A no-op in dry-run mode.
    pub async fn cancel_order(
        &self,
        symbol: &Symbol,
        order_id: &str,
        exchange_id: Option<&str>,
    ) -> Result<(), ExecutorError> {
        let (_, exchange) = self.exchange(exchange_id)?;
        if self.dry_run {
            return Ok(());
        }
        exchange
            .cancel_order(order_id, symbol)
            .await
            .map_err(ExecutorError::Other)
    }

    /// Polls the order every few seconds until it closes, is cancelled, or
    /// the timeout passes. Returns whether the order filled completely.
    async fn wait_for_order_fill(
        &self,
        exchange: &Arc<dyn Exchange>,
        order_id: &str,
        symbol: &Symbol,
        timeout: Duration,
    ) -> bool {
        debug!("Waiting for order {} to fill...", order_id);
        let started = Instant::now();

        while started.elapsed() < timeout {
            match exchange.fetch_order(order_id, symbol).await {
                Ok(order) => match order.status {
                    ExchangeOrderStatus::Closed => {
                        debug!("Order {} filled", order_id);
                        return true;
                    }
                    ExchangeOrderStatus::Canceled => {
                        warn!("Order {} was cancelled", order_id);
                        return false;
                    }
                    ExchangeOrderStatus::Open => {
                        if order.filled > Decimal::ZERO {
                            debug!(
                                "Order {} partially filled: {}/{}",
                                order_id, order.filled, order.amount
                            );
                        }
                        tokio::time::sleep(FILL_POLL_INTERVAL).await;
                    }
                },
                Err(e) => {
                    warn!("Polling order {} failed: {}", order_id, e);
                    tokio::time::sleep(FILL_POLL_ERROR_BACKOFF).await;
                }
            }
        }

        warn!("Order {} did not fill within {:?}", order_id, timeout);
        false
    }

    async fn log_entry_order(&self, fill: &EntryFill, exchange_id: &str) {
        let record = EntryRecord {
            timestamp: fill.timestamp,
            symbol: fill.symbol.clone(),
            exchange_id: exchange_id.to_string(),
            order_id: fill.order_id.clone(),
            size: fill.size,
            avg_price: fill.avg_price,
            stage: fill.stage.clone(),
            is_iceberg: fill.is_iceberg(),
            cost: fill.size * fill.avg_price,
            sub_orders: if fill.sub_orders.is_empty() {
                None
            } else {
                Some(fill.sub_orders.clone())
            },
        };

        let _guard = self.journal_lock.lock().await;
        if let Err(e) = journal::append_record(&self.entry_log, record) {
            warn!("Appending entry journal failed: {}", e);
        }
    }

    async fn log_exit_order(&self, fill: &ExitFill, exchange_id: &str) {
        let mut record = ExitRecord {
            timestamp: fill.timestamp,
            symbol: fill.symbol.clone(),
            exchange_id: exchange_id.to_string(),
            order_id: fill.order_id.clone(),
            size: fill.size,
            avg_price: fill.avg_price,
            reason: fill.reason.clone(),
            revenue: fill.size * fill.avg_price,
            entry_order_id: None,
            entry_price: None,
            profit_percentage: None,
            profit_amount: None,
        };

        // Annotate with the most recent matching entry so realized P&L lives
        // in the journal itself.
        let entries = self.get_entry_orders(Some(&fill.symbol), Some(exchange_id), None, None);
        if let Some(latest) = entries.iter().max_by_key(|e| e.timestamp) {
            let entry_price = latest.avg_price;
            if !entry_price.is_zero() {
                record.entry_order_id = Some(latest.order_id.clone());
                record.entry_price = Some(entry_price);
                record.profit_percentage =
                    Some((fill.avg_price - entry_price) / entry_price * Decimal::from(100));
                record.profit_amount = Some((fill.avg_price - entry_price) * fill.size);
            }
        }

        let _guard = self.journal_lock.lock().await;
        if let Err(e) = journal::append_record(&self.exit_log, record) {
            warn!("Appending exit journal failed: {}", e);
        }
    }

    pub fn get_entry_orders(
        &self,
        symbol: Option<&Symbol>,
        exchange_id: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<EntryRecord> {
        journal::read_records::<EntryRecord>(&self.entry_log)
            .into_iter()
            .filter(|r| symbol.map_or(true, |s| &r.symbol == s))
            .filter(|r| exchange_id.map_or(true, |id| r.exchange_id == id))
            .filter(|r| start.map_or(true, |t| r.timestamp >= t))
            .filter(|r| end.map_or(true, |t| r.timestamp <= t))
            .collect()
    }

    pub fn get_exit_orders(
        &self,
        symbol: Option<&Symbol>,
        exchange_id: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<ExitRecord> {
        journal::read_records::<ExitRecord>(&self.exit_log)
            .into_iter()
            .filter(|r| symbol.map_or(true, |s| &r.symbol == s))
            .filter(|r| exchange_id.map_or(true, |id| r.exchange_id == id))
            .filter(|r| start.map_or(true, |t| r.timestamp >= t))
            .filter(|r| end.map_or(true, |t| r.timestamp <= t))
            .collect()
    }

    /// Both journals plus the stats derived from them.
    pub fn get_trading_history(
        &self,
        symbol: Option<&Symbol>,
        exchange_id: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> TradingHistory {
        let entry_orders = self.get_entry_orders(symbol, exchange_id, start, end);
        let exit_orders = self.get_exit_orders(symbol, exchange_id, start, end);
        let stats = journal::calculate_trading_stats(&entry_orders, &exit_orders);
        TradingHistory {
            entry_orders,
            exit_orders,
            stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::testutil::StubExchange;
    use rust_decimal_macros::dec;

    fn market(symbol: &str) -> MarketInfo {
        MarketInfo {
            symbol: Symbol::from(symbol),
            amount_precision: Precision::Digits(2),
            price_precision: Precision::Digits(2),
            min_cost: Some(dec!(10)),
        }
    }

    fn book(symbol: &str, bid: Decimal, ask: Decimal) -> OrderBookSnapshot {
        OrderBookSnapshot {
            symbol: Symbol::from(symbol),
            bids: vec![(bid, dec!(10))],
            asks: vec![(ask, dec!(10))],
        }
    }

    #[test]
    fn test_buy_price_never_below_target_direction() {
        let market = market("SOL/USDT");
        let book = book("SOL/USDT", dec!(99.98), dec!(100.02));

        // Target crosses the ask: lift the ask.
        assert_eq!(buy_price(dec!(100.50), &book, &market), dec!(100.02));
        // Target below the ask: one tick above the target.
        assert_eq!(buy_price(dec!(99.50), &book, &market), dec!(99.51));
    }

    #[test]
    fn test_sell_price_mirror() {
        let market = market("SOL/USDT");
        let book = book("SOL/USDT", dec!(99.98), dec!(100.02));

        assert_eq!(sell_price(dec!(99.50), &book, &market), dec!(99.98));
        assert_eq!(sell_price(dec!(100.50), &book, &market), dec!(100.49));
    }

    #[test]
    fn test_empty_book_uses_target() {
        let market = market("SOL/USDT");
        let empty = OrderBookSnapshot {
            symbol: Symbol::from("SOL/USDT"),
            bids: vec![],
            asks: vec![],
        };
        assert_eq!(buy_price(dec!(100), &empty, &market), dec!(100));
        assert_eq!(sell_price(dec!(100), &empty, &market), dec!(100));
    }

    #[test]
    fn test_tick_size() {
        assert_eq!(tick_size(&Precision::Digits(2)), dec!(0.01));
        assert_eq!(tick_size(&Precision::Step(dec!(0.05))), dec!(0.05));
    }

    #[test]
    fn test_amount_floored_to_precision() {
        assert_eq!(adjust_amount(dec!(1.23999), &Precision::Digits(2)), dec!(1.23));
        let step = dec!(0.05);
        let adjusted = adjust_amount(dec!(1.23), &Precision::Step(step));
        assert_eq!(adjusted, dec!(1.20));
        // Adjusted size is never above the request and lands on a step.
        assert!(adjusted <= dec!(1.23));
        assert_eq!(adjusted % step, Decimal::ZERO);
    }

    fn stub_with_market(symbol: &str, bid: Decimal, ask: Decimal) -> Arc<StubExchange> {
        let stub = Arc::new(StubExchange::new());
        stub.add_market(symbol);
        stub.set_book(symbol, bid, ask);
        stub
    }

    fn executor(stub: Arc<StubExchange>, dir: &std::path::Path, threshold: Decimal) -> OrderExecutor {
        let mut exchanges: HashMap<String, Arc<dyn Exchange>> = HashMap::new();
        exchanges.insert("stub".to_string(), stub);
        OrderExecutor::new(
            exchanges,
            "stub".to_string(),
            true,
            threshold,
            dec!(10),
            dir.to_path_buf(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_dry_run_entry_journals_record() {
        let dir = tempfile::tempdir().unwrap();
        let stub = stub_with_market("SOL/USDT", dec!(99.99), dec!(100.01));
        let exec = executor(stub, dir.path(), dec!(1000));
        let symbol = Symbol::from("SOL/USDT");

        let fill = exec
            .execute_entry(&symbol, dec!(5), dec!(100.5), "first_stage", None)
            .await
            .unwrap();
        assert_eq!(fill.avg_price, dec!(100.01));
        assert!(fill.order_id.starts_with("dry_run_"));

        let entries = exec.get_entry_orders(Some(&symbol), None, None, None);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].order_id, fill.order_id);
        assert_eq!(entries[0].cost, fill.size * fill.avg_price);
        assert!(!entries[0].is_iceberg);
    }

    #[tokio::test]
    async fn test_journal_round_trip_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let stub = stub_with_market("SOL/USDT", dec!(99.99), dec!(100.01));
        let exec = executor(stub, dir.path(), dec!(1000));
        let symbol = Symbol::from("SOL/USDT");

        exec.execute_entry(&symbol, dec!(5), dec!(100.5), "first_stage", None)
            .await
            .unwrap();
        let first_read = exec.get_entry_orders(None, None, None, None);
        let second_read = exec.get_entry_orders(None, None, None, None);
        assert_eq!(first_read, second_read);
        assert_eq!(
            serde_json::to_string(&first_read).unwrap(),
            serde_json::to_string(&second_read).unwrap()
        );
    }

    #[tokio::test]
    async fn test_below_min_notional_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let stub = stub_with_market("SOL/USDT", dec!(0.99), dec!(1.01));
        let exec = executor(stub, dir.path(), dec!(1000));
        let symbol = Symbol::from("SOL/USDT");

        let result = exec
            .execute_entry(&symbol, dec!(1), dec!(1.0), "first_stage", None)
            .await;
        assert!(matches!(
            result,
            Err(ExecutorError::BelowMinNotional { .. })
        ));
        assert!(exec.get_entry_orders(None, None, None, None).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_iceberg_split_into_three_batches() {
        let dir = tempfile::tempdir().unwrap();
        let stub = stub_with_market("SOL/USDT", dec!(99.99), dec!(100.01));
        let exec = executor(stub, dir.path(), dec!(10));
        let symbol = Symbol::from("SOL/USDT");

        // 25 over a threshold of 10 splits into ceil(2.5) = 3 batches.
        let fill = exec
            .execute_entry(&symbol, dec!(25), dec!(100.5), "first_stage", None)
            .await
            .unwrap();

        assert_eq!(fill.sub_orders.len(), 3);
        assert!(fill.is_iceberg());
        for (i, sub) in fill.sub_orders.iter().enumerate() {
            assert_eq!(sub.stage, format!("first_stage_iceberg_{}", i + 1));
        }

        let entries = exec.get_entry_orders(None, None, None, None);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_iceberg);
        assert_eq!(entries[0].sub_orders.as_ref().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_exit_annotated_with_matching_entry() {
        let dir = tempfile::tempdir().unwrap();
        let stub = stub_with_market("SOL/USDT", dec!(104.99), dec!(105.01));
        let exec = executor(stub, dir.path(), dec!(1000));
        let symbol = Symbol::from("SOL/USDT");

        let entry = exec
            .execute_entry(&symbol, dec!(5), dec!(105.5), "first_stage", None)
            .await
            .unwrap();
        let exit = exec
            .execute_exit(&symbol, dec!(5), dec!(104), "take_profit", None)
            .await
            .unwrap();
        // Sell target below the bid fills at the bid.
        assert_eq!(exit.avg_price, dec!(104.99));

        let exits = exec.get_exit_orders(Some(&symbol), None, None, None);
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].entry_order_id.as_deref(), Some(entry.order_id.as_str()));
        assert_eq!(exits[0].entry_price, Some(entry.avg_price));
        assert!(exits[0].profit_percentage.is_some());
        assert!(exits[0].profit_amount.is_some());
    }

    #[tokio::test]
    async fn test_corrupt_journal_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let stub = stub_with_market("SOL/USDT", dec!(99.99), dec!(100.01));
        let exec = executor(stub, dir.path(), dec!(1000));
        let symbol = Symbol::from("SOL/USDT");

        std::fs::write(dir.path().join("entry_orders.json"), "not json {").unwrap();
        assert!(exec.get_entry_orders(None, None, None, None).is_empty());

        // The next append recreates a clean journal.
        exec.execute_entry(&symbol, dec!(5), dec!(100.5), "first_stage", None)
            .await
            .unwrap();
        assert_eq!(exec.get_entry_orders(None, None, None, None).len(), 1);
    }

    #[tokio::test]
    async fn test_soft_stop_marker_without_native_support() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubExchange::new().without_stop_orders());
        stub.add_market("SOL/USDT");
        let exec = executor(stub, dir.path(), dec!(1000));
        let symbol = Symbol::from("SOL/USDT");

        let stop = exec
            .set_stop_loss(&symbol, dec!(98), dec!(5), None)
            .await
            .unwrap();
        assert!(stop.soft);
        assert!(stop.order_id.is_none());
    }

    #[tokio::test]
    async fn test_native_stop_in_dry_run() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubExchange::new());
        stub.add_market("SOL/USDT");
        let exec = executor(stub, dir.path(), dec!(1000));
        let symbol = Symbol::from("SOL/USDT");

        let stop = exec
            .set_stop_loss(&symbol, dec!(98), dec!(5), None)
            .await
            .unwrap();
        assert!(!stop.soft);
        assert!(stop.order_id.unwrap().starts_with("dry_run_sl_"));
    }

    #[tokio::test]
    async fn test_conditional_falls_back_to_soft() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubExchange::new());
        stub.add_market("SOL/USDT");
        let exec = executor(stub, dir.path(), dec!(1000));
        let symbol = Symbol::from("SOL/USDT");

        let conditional = exec
            .set_conditional_order(
                &symbol,
                dec!(5),
                dec!(110),
                "second_stage",
                TriggerCondition {
                    kind: crate::types::TriggerKind::PriceAbove,
                    price: dec!(109.5),
                },
                None,
            )
            .await
            .unwrap();
        assert!(conditional.soft);
        assert!(conditional.order_id.is_none());
    }

    #[test]
    fn test_trading_stats_active_positions() {
        use chrono::Utc;

        let entry = |id: &str| EntryRecord {
            timestamp: Utc::now(),
            symbol: Symbol::from("SOL/USDT"),
            exchange_id: "stub".to_string(),
            order_id: id.to_string(),
            size: dec!(1),
            avg_price: dec!(100),
            stage: "first_stage".to_string(),
            is_iceberg: false,
            cost: dec!(100),
            sub_orders: None,
        };
        let exit = |entry_id: &str, profit: Decimal| ExitRecord {
            timestamp: Utc::now(),
            symbol: Symbol::from("SOL/USDT"),
            exchange_id: "stub".to_string(),
            order_id: format!("x_{}", entry_id),
            size: dec!(1),
            avg_price: dec!(100) + profit,
            reason: "take_profit".to_string(),
            revenue: dec!(100) + profit,
            entry_order_id: Some(entry_id.to_string()),
            entry_price: Some(dec!(100)),
            profit_percentage: Some(profit),
            profit_amount: Some(profit),
        };

        let entries = vec![entry("a"), entry("b"), entry("c")];
        let exits = vec![exit("a", dec!(5)), exit("b", dec!(-2))];
        let stats = calculate_trading_stats(&entries, &exits);

        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.total_exits, 2);
        assert_eq!(stats.win_count, 1);
        assert_eq!(stats.loss_count, 1);
        assert_eq!(stats.win_rate, dec!(50));
        assert_eq!(stats.max_profit_percentage, dec!(5));
        assert_eq!(stats.max_loss_percentage, dec!(-2));
        assert_eq!(stats.active_positions.len(), 1);
        assert_eq!(stats.active_positions[0].order_id, "c");
    }
}
