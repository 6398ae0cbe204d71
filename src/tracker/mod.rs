#![allow(dead_code)]
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::types::Symbol;

fn is_closing_action(action: &str) -> bool {
    matches!(
        action,
        "exit" | "exit_all" | "take_profit" | "stop_loss" | "time_stop"
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLogEntry {
    pub symbol: Symbol,
    pub action: String,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub size: Decimal,
    pub profit_pct: Decimal,
    pub profit_amount: Decimal,
    pub fees: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: Decimal,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub profit_loss_ratio: Decimal,
    pub expectancy: Decimal,
    pub total_profit: Decimal,
    pub total_loss: Decimal,
    pub total_fees: Decimal,
    pub net_profit: Decimal,
    pub max_drawdown: Decimal,
    pub max_drawdown_pct: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
struct DailyMetrics {
    trades: usize,
    wins: usize,
    losses: usize,
    win_rate: Decimal,
    profit: Decimal,
    fees: Decimal,
    net_profit: Decimal,
}

#[derive(Debug, Clone, Serialize)]
struct DailyReport {
    date: String,
    daily_metrics: DailyMetrics,
    overall_metrics: PerformanceMetrics,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Aggregates {
    total_trades: usize,
    winning_trades: usize,
    losing_trades: usize,
    total_profit: Decimal,
    total_loss: Decimal,
    total_fees: Decimal,
    max_drawdown: Decimal,
}

#[derive(Default)]
struct TrackerState {
    trades: Vec<TradeLogEntry>,
    aggregates: Aggregates,
}

/// Records every closing trade and keeps running performance aggregates,
/// persisted to `data/trades.json` and `data/performance.json`. A daily JSON
/// report is written at midnight.
pub struct PerformanceTracker {
    data_dir: PathBuf,
    account_balance: Decimal,
    trades_file: PathBuf,
    performance_file: PathBuf,
    state: Mutex<TrackerState>,
}

impl PerformanceTracker {
    pub fn new(data_dir: PathBuf, account_balance: Decimal) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating data dir {}", data_dir.display()))?;

        let trades_file = data_dir.join("trades.json");
        let performance_file = data_dir.join("performance.json");

        let mut state = TrackerState::default();
        if let Ok(raw) = std::fs::read_to_string(&trades_file) {
            match serde_json::from_str::<Vec<TradeLogEntry>>(&raw) {
                Ok(trades) => {
                    info!("Loaded {} historical trade records", trades.len());
                    state.trades = trades;
                }
                Err(e) => warn!("Trade history unreadable ({}), starting fresh", e),
            }
        }
        if let Ok(raw) = std::fs::read_to_string(&performance_file) {
            match serde_json::from_str::<Aggregates>(&raw) {
                Ok(aggregates) => state.aggregates = aggregates,
                Err(e) => warn!("Performance state unreadable ({}), starting fresh", e),
            }
        }

        Ok(Self {
            data_dir,
            account_balance,
            trades_file,
            performance_file,
            state: Mutex::new(state),
        })
    }

    pub async fn record_trade(
        &self,
        symbol: &Symbol,
        action: &str,
        entry_price: Decimal,
        exit_price: Decimal,
        size: Decimal,
        fees: Decimal,
    ) {
        let closing = is_closing_action(action);
        let (profit_pct, profit_amount) = if closing && !entry_price.is_zero() {
            (
                (exit_price / entry_price - Decimal::ONE) * Decimal::from(100),
                (exit_price - entry_price) * size,
            )
        } else {
            (Decimal::ZERO, Decimal::ZERO)
        };

        let trade = TradeLogEntry {
            symbol: symbol.clone(),
            action: action.to_string(),
            entry_price,
            exit_price,
            size,
            profit_pct,
            profit_amount,
            fees,
            timestamp: Utc::now(),
        };

        let mut state = self.state.lock().await;
        state.trades.push(trade);

        if closing {
            state.aggregates.total_trades += 1;
            if profit_amount > Decimal::ZERO {
                state.aggregates.winning_trades += 1;
                state.aggregates.total_profit += profit_amount;
            } else {
                state.aggregates.losing_trades += 1;
                state.aggregates.total_loss += profit_amount.abs();
            }
            state.aggregates.total_fees += fees;

            info!(
                "Trade recorded: {} {} profit ${:.2} ({:.2}%)",
                symbol, action, profit_amount, profit_pct
            );
        }

        self.recompute_max_drawdown(&mut state);
        self.persist(&state);
    }

    fn recompute_max_drawdown(&self, state: &mut TrackerState) {
        let mut balance = self.account_balance;
        let mut peak = balance;
        let mut drawdown = Decimal::ZERO;

        let mut trades: Vec<&TradeLogEntry> = state
            .trades
            .iter()
            .filter(|t| is_closing_action(&t.action))
            .collect();
        trades.sort_by_key(|t| t.timestamp);

        for trade in trades {
            balance += trade.profit_amount - trade.fees;
            if balance > peak {
                peak = balance;
            }
            let current = peak - balance;
            if current > drawdown {
                drawdown = current;
            }
        }

        state.aggregates.max_drawdown = drawdown;
    }

    fn metrics_from(&self, aggregates: &Aggregates) -> PerformanceMetrics {
        let total = aggregates.total_trades;
        let win_rate = if total > 0 {
            Decimal::from(aggregates.winning_trades as u64) / Decimal::from(total as u64)
                * Decimal::from(100)
        } else {
            Decimal::ZERO
        };
        let avg_win = if aggregates.winning_trades > 0 {
            aggregates.total_profit / Decimal::from(aggregates.winning_trades as u64)
        } else {
            Decimal::ZERO
        };
        let avg_loss = if aggregates.losing_trades > 0 {
            aggregates.total_loss / Decimal::from(aggregates.losing_trades as u64)
        } else {
            Decimal::ZERO
        };
        let profit_loss_ratio = if avg_loss > Decimal::ZERO {
            avg_win / avg_loss
        } else {
            Decimal::ZERO
        };
        let expectancy = (win_rate / Decimal::from(100)) * avg_win
            - ((Decimal::from(100) - win_rate) / Decimal::from(100)) * avg_loss;

        let max_drawdown_pct = if self.account_balance > Decimal::ZERO {
            aggregates.max_drawdown / self.account_balance * Decimal::from(100)
        } else {
            Decimal::ZERO
        };

        PerformanceMetrics {
            total_trades: total,
            winning_trades: aggregates.winning_trades,
            losing_trades: aggregates.losing_trades,
            win_rate,
            avg_win,
            avg_loss,
            profit_loss_ratio,
            expectancy,
            total_profit: aggregates.total_profit,
            total_loss: aggregates.total_loss,
            total_fees: aggregates.total_fees,
            net_profit: aggregates.total_profit - aggregates.total_loss - aggregates.total_fees,
            max_drawdown: aggregates.max_drawdown,
            max_drawdown_pct,
            timestamp: Utc::now(),
        }
    }

    pub async fn calculate_metrics(&self) -> PerformanceMetrics {
        let state = self.state.lock().await;
        self.metrics_from(&state.aggregates)
    }

    fn persist(&self, state: &TrackerState) {
        match serde_json::to_string_pretty(&state.trades) {
            Ok(serialized) => {
                if let Err(e) = std::fs::write(&self.trades_file, serialized) {
                    warn!("Saving trade history failed: {}", e);
                }
            }
            Err(e) => warn!("Serializing trade history failed: {}", e),
        }
        match serde_json::to_string_pretty(&state.aggregates) {
            Ok(serialized) => {
                if let Err(e) = std::fs::write(&self.performance_file, serialized) {
                    warn!("Saving performance state failed: {}", e);
                }
            }
            Err(e) => warn!("Serializing performance state failed: {}", e),
        }
    }

    /// Writes `data/report_YYYY-MM-DD.json` with the day's trades and the
    /// overall metrics.
    pub async fn daily_report(&self) -> Result<()> {
        let state = self.state.lock().await;
        let today = Utc::now().date_naive();

        let today_trades: Vec<&TradeLogEntry> = state
            .trades
            .iter()
            .filter(|t| t.timestamp.date_naive() == today && is_closing_action(&t.action))
            .collect();

        if today_trades.is_empty() {
            info!("No trades today, skipping daily report");
            return Ok(());
        }

        let wins = today_trades
            .iter()
            .filter(|t| t.profit_amount > Decimal::ZERO)
            .count();
        let losses = today_trades.len() - wins;
        let profit: Decimal = today_trades.iter().map(|t| t.profit_amount).sum();
        let fees: Decimal = today_trades.iter().map(|t| t.fees).sum();

        let daily = DailyMetrics {
            trades: today_trades.len(),
            wins,
            losses,
            win_rate: Decimal::from(wins as u64) / Decimal::from(today_trades.len() as u64)
                * Decimal::from(100),
            profit,
            fees,
            net_profit: profit - fees,
        };

        info!(
            "Daily report {}: {} trades, {} wins, net ${:.2}",
            today, daily.trades, daily.wins, daily.net_profit
        );

        let report = DailyReport {
            date: today.to_string(),
            daily_metrics: daily,
            overall_metrics: self.metrics_from(&state.aggregates),
            timestamp: Utc::now(),
        };

        let path = self.data_dir.join(format!("report_{}.json", today));
        std::fs::write(&path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("writing daily report {}", path.display()))?;
        info!("Daily report saved to {}", path.display());
        Ok(())
    }

    pub async fn recent_trades(&self, count: usize) -> Vec<TradeLogEntry> {
        let state = self.state.lock().await;
        let mut trades = state.trades.clone();
        trades.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        trades.truncate(count);
        trades
    }
}
