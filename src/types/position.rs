#![allow(dead_code)]
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Symbol, TriggerCondition};

/// Second-stage entry armed after the first fill: buy the reserved size once
/// price breaks the recent high while RSI stays below the cap. Held on the
/// position so it dies with it.
#[derive(Debug, Clone)]
pub struct SecondStageEntry {
    /// Exchange order id when the adapter hosts the trigger natively.
    pub order_id: Option<String>,
    pub trigger: TriggerCondition,
    pub limit_price: Decimal,
    pub size: Decimal,
    pub rsi_below: Decimal,
}

/// An open position owned by the trading engine, at most one per symbol.
///
/// Invariants: `position_size >= 0` and the record is removed when it reaches
/// zero; `stop_loss` never decreases while the position is open; the
/// `tp*_done` flags transition only from false to true.
#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: Symbol,
    pub entry_time: DateTime<Utc>,
    pub entry_price: Decimal,
    pub position_size: Decimal,
    pub stop_loss: Decimal,
    pub target_profit: Decimal,
    pub stage: u8,
    pub sector: Option<String>,
    pub tp1_done: bool,
    pub tp2_done: bool,
    pub tp3_done: bool,
    pub orders: Vec<ExecutedFill>,
    pub second_stage: Option<SecondStageEntry>,
    pub stop_order_id: Option<String>,
    /// True when the stop is enforced client-side by the monitor loop.
    pub soft_stop: bool,
}

/// A fill already executed against this position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedFill {
    pub order_id: String,
    pub size: Decimal,
    pub avg_price: Decimal,
    pub stage: String,
    pub timestamp: DateTime<Utc>,
}

impl Position {
    pub fn new(
        symbol: Symbol,
        entry_price: Decimal,
        position_size: Decimal,
        stop_loss: Decimal,
        target_profit: Decimal,
        sector: Option<String>,
    ) -> Self {
        Self {
            symbol,
            entry_time: Utc::now(),
            entry_price,
            position_size,
            stop_loss,
            target_profit,
            stage: 1,
            sector,
            tp1_done: false,
            tp2_done: false,
            tp3_done: false,
            orders: Vec::new(),
            second_stage: None,
            stop_order_id: None,
            soft_stop: false,
        }
    }

    /// Raises the stop to `candidate` if it is strictly higher. Returns true
    /// when the stop moved. The stop never moves down.
    pub fn raise_stop(&mut self, candidate: Decimal) -> bool {
        if candidate > self.stop_loss {
            self.stop_loss = candidate;
            true
        } else {
            false
        }
    }

    pub fn profit_pct(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        (price / self.entry_price - Decimal::ONE) * Decimal::from(100)
    }

    pub fn target_pct(&self) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        (self.target_profit / self.entry_price - Decimal::ONE) * Decimal::from(100)
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.entry_time
    }

    pub fn reduce(&mut self, size: Decimal) {
        self.position_size = (self.position_size - size).max(Decimal::ZERO);
    }

    pub fn is_exhausted(&self) -> bool {
        self.position_size <= Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position() -> Position {
        Position::new(
            Symbol::from("SOL/USDT"),
            dec!(100),
            dec!(10),
            dec!(98),
            dec!(120),
            None,
        )
    }

    #[test]
    fn test_stop_only_rises() {
        let mut p = position();
        assert!(p.raise_stop(dec!(99)));
        assert_eq!(p.stop_loss, dec!(99));
        assert!(!p.raise_stop(dec!(98.5)));
        assert_eq!(p.stop_loss, dec!(99));
        assert!(!p.raise_stop(dec!(99)));
    }

    #[test]
    fn test_profit_and_target_pct() {
        let p = position();
        assert_eq!(p.profit_pct(dec!(103)), dec!(3.00));
        assert_eq!(p.target_pct(), dec!(20.0));
    }

    #[test]
    fn test_reduce_floors_at_zero() {
        let mut p = position();
        p.reduce(dec!(4));
        assert_eq!(p.position_size, dec!(6));
        p.reduce(dec!(10));
        assert_eq!(p.position_size, Decimal::ZERO);
        assert!(p.is_exhausted());
    }
}
