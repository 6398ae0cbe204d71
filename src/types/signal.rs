use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{MarketState, Symbol};

/// A scored momentum entry candidate produced by one scan pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: Symbol,
    /// Percent change over the active momentum window.
    pub momentum: Decimal,
    pub volume_ratio: Decimal,
    pub rsi: Decimal,
    pub entry_price: Decimal,
    /// ATR as a percentage of close.
    pub atr: Decimal,
    /// Fractional profit target, capped at 0.10.
    pub profit_target: Decimal,
    pub sector: Option<String>,
    pub score: Decimal,
    pub market_state: MarketState,
    pub timestamp: DateTime<Utc>,
}
