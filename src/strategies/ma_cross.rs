use anyhow::{anyhow, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::data::MarketDataCache;
use crate::executor::OrderExecutor;
use crate::indicators::sma;
use crate::types::{Symbol, TimeFrame};

const STRATEGY_NAME: &str = "ma_cross";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossSignal {
    Golden,
    Death,
}

/// A cross is only reported on the bar where it happens: the short SMA is on
/// the other side of the long SMA than it was one bar earlier.
pub fn detect_cross(closes: &[Decimal], short: usize, long: usize) -> Option<CrossSignal> {
    if closes.len() < long + 1 {
        return None;
    }
    let prev = &closes[..closes.len() - 1];

    let short_now = sma(closes, short)?;
    let long_now = sma(closes, long)?;
    let short_prev = sma(prev, short)?;
    let long_prev = sma(prev, long)?;

    if short_prev <= long_prev && short_now > long_now {
        Some(CrossSignal::Golden)
    } else if short_prev >= long_prev && short_now < long_now {
        Some(CrossSignal::Death)
    } else {
        None
    }
}

#[derive(Debug, Clone)]
pub struct MaCrossParams {
    pub short_window: usize,
    pub long_window: usize,
    pub timeframe: TimeFrame,
    pub position_size: Decimal,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub max_positions: usize,
    pub max_trades_per_day: usize,
    pub min_volume_usd: Decimal,
    pub check_interval: Duration,
}

impl MaCrossParams {
    pub fn from_parameters(parameters: &BTreeMap<String, Value>) -> Self {
        let usize_param = |key: &str, default: usize| {
            parameters
                .get(key)
                .and_then(Value::as_u64)
                .map(|v| v as usize)
                .unwrap_or(default)
        };
        let decimal_param = |key: &str, default: Decimal| {
            parameters
                .get(key)
                .and_then(Value::as_f64)
                .and_then(Decimal::from_f64_retain)
                .unwrap_or(default)
        };

        Self {
            short_window: usize_param("short_window", 5),
            long_window: usize_param("long_window", 20),
            timeframe: parameters
                .get("timeframe")
                .and_then(Value::as_str)
                .and_then(TimeFrame::from_str)
                .unwrap_or(TimeFrame::H1),
            position_size: decimal_param("position_size", dec!(0.1)),
            stop_loss_pct: decimal_param("stop_loss_pct", dec!(3.0)),
            take_profit_pct: decimal_param("take_profit_pct", dec!(5.0)),
            max_positions: usize_param("max_positions", 3),
            max_trades_per_day: usize_param("max_trades_per_day", 3),
            min_volume_usd: decimal_param("min_volume_usd", dec!(1000000)),
            check_interval: Duration::from_secs(
                parameters
                    .get("check_interval")
                    .and_then(Value::as_u64)
                    .unwrap_or(60),
            ),
        }
    }
}

/// Stand-alone moving-average cross demo. It shares nothing with the
/// momentum core except the order executor and the persisted journals, which
/// it reads back as its only position state.
pub struct MaCrossStrategy {
    symbol: Symbol,
    exchange_id: String,
    params: MaCrossParams,
    data: Arc<MarketDataCache>,
    executor: Arc<OrderExecutor>,
}

impl MaCrossStrategy {
    pub fn from_config(
        config: &Config,
        data: Arc<MarketDataCache>,
        executor: Arc<OrderExecutor>,
    ) -> Result<Self> {
        if !config.is_strategy_enabled(STRATEGY_NAME) {
            return Err(anyhow!("strategy {} is not enabled", STRATEGY_NAME));
        }

        let symbols = config.strategy_symbols(STRATEGY_NAME);
        let symbol = symbols
            .first()
            .map(|s| Symbol::from(s.as_str()))
            .ok_or_else(|| anyhow!("strategy {} has no symbols configured", STRATEGY_NAME))?;

        let params = MaCrossParams::from_parameters(&config.strategy_parameters(STRATEGY_NAME));
        info!(
            "MA cross strategy on {}: short={} long={} tf={}",
            symbol, params.short_window, params.long_window, params.timeframe
        );

        Ok(Self {
            symbol,
            exchange_id: config.default_exchange.clone(),
            params,
            data,
            executor,
        })
    }

    pub async fn run(self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.params.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                warn!("MA cross pass failed: {:#}", e);
            }
        }
    }

    fn entries_today(&self) -> usize {
        let today = Utc::now().date_naive();
        self.executor
            .get_entry_orders(Some(&self.symbol), Some(&self.exchange_id), None, None)
            .iter()
            .filter(|e| e.timestamp.date_naive() == today)
            .count()
    }

    /// One evaluation pass: manage open journal positions first, then look
    /// for a fresh cross.
    pub async fn run_once(&self) -> Result<()> {
        let ticker = self
            .data
            .get_ticker(&self.symbol)
            .await
            .ok_or_else(|| anyhow!("no ticker for {}", self.symbol))?;

        if ticker.quote_volume_24h < self.params.min_volume_usd {
            debug!(
                "{} 24h volume ${:.0} below the floor, idle",
                self.symbol, ticker.quote_volume_24h
            );
            return Ok(());
        }

        let limit = (self.params.long_window + 2) as u32;
        let candles = self
            .data
            .get_candles(&self.symbol, self.params.timeframe, limit)
            .await
            .ok_or_else(|| anyhow!("no candles for {}", self.symbol))?;
        let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();

        let cross = detect_cross(&closes, self.params.short_window, self.params.long_window);
        let price = ticker.last;

        let history =
            self.executor
                .get_trading_history(Some(&self.symbol), Some(&self.exchange_id), None, None);
        let active = history.stats.active_positions;

        // Exits: death cross closes everything, and each open entry carries
        // its own stop and target derived from its fill price.
        for entry in &active {
            let stop = entry.avg_price * (Decimal::ONE - self.params.stop_loss_pct / dec!(100));
            let target = entry.avg_price * (Decimal::ONE + self.params.take_profit_pct / dec!(100));

            let reason = if cross == Some(CrossSignal::Death) {
                Some("ma_cross_exit")
            } else if price <= stop {
                Some("stop_loss")
            } else if price >= target {
                Some("take_profit")
            } else {
                None
            };

            if let Some(reason) = reason {
                info!(
                    "MA cross closing {} entry {} at {} ({})",
                    self.symbol, entry.order_id, price, reason
                );
                if let Err(e) = self
                    .executor
                    .execute_exit(
                        &self.symbol,
                        entry.size,
                        price,
                        reason,
                        Some(&self.exchange_id),
                    )
                    .await
                {
                    warn!("MA cross exit failed: {}", e);
                }
            }
        }

        // Entry on a golden cross, bounded by position and daily trade caps.
        if cross == Some(CrossSignal::Golden) {
            if active.len() >= self.params.max_positions {
                debug!("{} golden cross ignored: position cap reached", self.symbol);
                return Ok(());
            }
            if self.entries_today() >= self.params.max_trades_per_day {
                debug!("{} golden cross ignored: daily trade cap reached", self.symbol);
                return Ok(());
            }

            info!("MA cross entering {} at {}", self.symbol, price);
            self.executor
                .execute_entry(
                    &self.symbol,
                    self.params.position_size,
                    price,
                    "ma_cross",
                    Some(&self.exchange_id),
                )
                .await
                .map_err(|e| anyhow!("MA cross entry failed: {}", e))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closes(values: &[i64]) -> Vec<Decimal> {
        values.iter().map(|v| Decimal::from(*v)).collect()
    }

    #[test]
    fn test_golden_cross_detected() {
        // Short SMA(2) crosses above long SMA(4) on the last bar.
        let series = closes(&[10, 10, 10, 10, 9, 14]);
        assert_eq!(detect_cross(&series, 2, 4), Some(CrossSignal::Golden));
    }

    #[test]
    fn test_death_cross_detected() {
        let series = closes(&[10, 10, 10, 10, 11, 6]);
        assert_eq!(detect_cross(&series, 2, 4), Some(CrossSignal::Death));
    }

    #[test]
    fn test_no_cross_on_flat_series() {
        let series = closes(&[10, 10, 10, 10, 10, 10]);
        assert_eq!(detect_cross(&series, 2, 4), None);
    }

    #[test]
    fn test_insufficient_history() {
        let series = closes(&[10, 10, 10]);
        assert_eq!(detect_cross(&series, 2, 4), None);
    }

    #[test]
    fn test_params_from_json() {
        let mut parameters = BTreeMap::new();
        parameters.insert("short_window".to_string(), serde_json::json!(8));
        parameters.insert("timeframe".to_string(), serde_json::json!("15m"));
        parameters.insert("stop_loss_pct".to_string(), serde_json::json!(2.5));

        let params = MaCrossParams::from_parameters(&parameters);
        assert_eq!(params.short_window, 8);
        assert_eq!(params.long_window, 20);
        assert_eq!(params.timeframe, TimeFrame::M15);
        assert_eq!(params.stop_loss_pct, dec!(2.5));
    }
}
