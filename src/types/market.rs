#![allow(dead_code)]
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

const STABLECOINS: &[&str] = &["USDT", "USDC", "BUSD", "DAI", "TUSD", "USDP", "GUSD"];

/// A spot market identifier in `BASE/QUOTE` form, e.g. `SOL/USDT`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn base(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }

    pub fn quote(&self) -> &str {
        self.0.split('/').nth(1).unwrap_or("")
    }

    /// Margin and option markets carry a `:` suffix; plain spot pairs do not.
    pub fn is_spot(&self) -> bool {
        self.0.contains('/') && !self.0.contains(':')
    }

    pub fn is_stable_to_stable(&self) -> bool {
        STABLECOINS.contains(&self.base()) && STABLECOINS.contains(&self.quote())
    }

    /// A symbol is tradable iff it is a spot pair quoted in one of the
    /// configured quote currencies and is not a stablecoin-to-stablecoin pair.
    pub fn is_valid_market(&self, quote_currencies: &[String]) -> bool {
        if !self.is_spot() {
            return false;
        }
        if self.is_stable_to_stable() {
            return false;
        }
        quote_currencies.iter().any(|q| q == self.quote())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeFrame {
    M1,
    M5,
    M15,
    H1,
    D1,
}

impl TimeFrame {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFrame::M1 => "1m",
            TimeFrame::M5 => "5m",
            TimeFrame::M15 => "15m",
            TimeFrame::H1 => "1h",
            TimeFrame::D1 => "1d",
        }
    }

    pub fn to_minutes(&self) -> u32 {
        match self {
            TimeFrame::M1 => 1,
            TimeFrame::M5 => 5,
            TimeFrame::M15 => 15,
            TimeFrame::H1 => 60,
            TimeFrame::D1 => 1440,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(TimeFrame::M1),
            "5m" => Some(TimeFrame::M5),
            "15m" => Some(TimeFrame::M15),
            "1h" => Some(TimeFrame::H1),
            "1d" => Some(TimeFrame::D1),
            _ => None,
        }
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    pub fn change_percentage(&self) -> Decimal {
        if self.open.is_zero() {
            return Decimal::ZERO;
        }
        ((self.close - self.open) / self.open) * Decimal::from(100)
    }

    pub fn quote_volume(&self) -> Decimal {
        self.close * self.volume
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: Symbol,
    pub last: Decimal,
    pub quote_volume_24h: Decimal,
    /// 24 h change in percent.
    pub percentage_24h: Decimal,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct OrderBookSnapshot {
    pub symbol: Symbol,
    /// Descending by price.
    pub bids: Vec<(Decimal, Decimal)>,
    /// Ascending by price.
    pub asks: Vec<(Decimal, Decimal)>,
}

impl OrderBookSnapshot {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|(p, _)| *p)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|(p, _)| *p)
    }
}

/// Exchange precision for a price or amount: either a number of decimal
/// digits or an explicit step size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precision {
    Digits(u32),
    Step(Decimal),
}

#[derive(Debug, Clone)]
pub struct MarketInfo {
    pub symbol: Symbol,
    pub amount_precision: Precision,
    pub price_precision: Precision,
    /// Exchange-imposed minimum notional, when published.
    pub min_cost: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketState {
    StrongBull,
    Bull,
    Neutral,
    Bear,
    StrongBear,
}

impl MarketState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketState::StrongBull => "strong_bull",
            MarketState::Bull => "bull",
            MarketState::Neutral => "neutral",
            MarketState::Bear => "bear",
            MarketState::StrongBear => "strong_bear",
        }
    }

    pub fn is_bearish(&self) -> bool {
        matches!(self, MarketState::Bear | MarketState::StrongBear)
    }

    /// Position-size multiplier applied by the risk manager.
    pub fn size_multiplier(&self) -> Decimal {
        match self {
            MarketState::StrongBull => dec!(1.2),
            MarketState::Bull | MarketState::Neutral => Decimal::ONE,
            MarketState::Bear => dec!(0.7),
            MarketState::StrongBear => dec!(0.5),
        }
    }
}

impl fmt::Display for MarketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The minutes horizon over which short-term momentum is measured, with the
/// threshold band that qualifies a move as a signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MomentumWindow {
    pub minutes: u32,
    pub threshold_min: Decimal,
    pub threshold_max: Decimal,
}
