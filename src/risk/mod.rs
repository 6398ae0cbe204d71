#![allow(dead_code)]
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::data::MarketDataCache;
use crate::indicators::IndicatorService;
use crate::types::{Signal, Symbol};

const MARKET_ATR_CEILING: Decimal = dec!(7);
const BEAR_MIN_SCORE: Decimal = dec!(70);
const SCORE_FULL_SIZE: Decimal = dec!(60);
const IMPLICIT_STOP: Decimal = dec!(0.02);

const BLACKLIST_DRAWDOWN_PCT: Decimal = dec!(25);
const BLACKLIST_MIN_VOLUME_USD: Decimal = dec!(1000000);
const BLACKLIST_DRAWDOWN_DAYS: u32 = 7;
const BLACKLIST_VOLUME_DAYS: u32 = 30;
const BLACKLIST_BATCH_SIZE: usize = 20;
const BLACKLIST_MAX_BATCHES: usize = 5;
const BLACKLIST_BUDGET: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy)]
pub struct RiskParams {
    /// Risk budget per trade, percent of balance.
    pub max_risk_per_trade: Decimal,
    /// Cap on the sum of per-trade risk across open positions, percent.
    pub max_total_risk: Decimal,
    /// Fraction of total risk a single sector may hold.
    pub max_sector_allocation: Decimal,
    pub account_balance: Decimal,
}

#[derive(Debug, Clone)]
pub enum PositionAction {
    Open { size: Decimal },
    Close,
    PartialClose { size: Decimal },
}

#[derive(Debug, Clone)]
struct OpenPosition {
    sector: Option<String>,
    size: Decimal,
    risk_pct: Decimal,
}

#[derive(Default)]
struct RiskState {
    blacklist: HashSet<Symbol>,
    positions: HashMap<Symbol, OpenPosition>,
    total_risk_pct: Decimal,
    sector_allocation_pct: HashMap<String, Decimal>,
}

/// Applies the risk rules in order: market gate, per-signal filters, exposure
/// caps, then sizing. Counters are only touched through these methods and
/// each position's sector is recorded at open so exactly that contribution is
/// debited on close.
pub struct RiskManager {
    params: RiskParams,
    indicators: Arc<IndicatorService>,
    data: Arc<MarketDataCache>,
    state: RwLock<RiskState>,
}

impl RiskManager {
    pub fn new(
        params: RiskParams,
        indicators: Arc<IndicatorService>,
        data: Arc<MarketDataCache>,
    ) -> Self {
        Self {
            params,
            indicators,
            data,
            state: RwLock::new(RiskState::default()),
        }
    }

    /// New entries are blocked outright when market-wide volatility runs hot.
    /// Defaults to allow when the indicator cannot be computed.
    pub async fn check_market_risk(&self) -> bool {
        match self.indicators.atr_pct(&Symbol::from("BTC/USDT")).await {
            Some(atr) if atr > MARKET_ATR_CEILING => {
                warn!("Market ATR {:.2}% above {}% ceiling", atr, MARKET_ATR_CEILING);
                false
            }
            _ => true,
        }
    }

    pub async fn filter_signals(&self, signals: Vec<Signal>) -> Vec<Signal> {
        let state = self.state.read().await;
        let before = signals.len();

        let filtered: Vec<Signal> = signals
            .into_iter()
            .filter(|signal| {
                if state.blacklist.contains(&signal.symbol) {
                    debug!("{} dropped: blacklisted", signal.symbol);
                    return false;
                }
                if signal.rsi > dec!(75) {
                    debug!("{} dropped: RSI {:.1} overbought", signal.symbol, signal.rsi);
                    return false;
                }
                if state.positions.contains_key(&signal.symbol) {
                    debug!("{} dropped: position already open", signal.symbol);
                    return false;
                }
                true
            })
            .collect();

        info!("Signal filter: {} in, {} out", before, filtered.len());
        filtered
    }

    /// Signals arrive already score-ordered; this is the seam for any future
    /// reweighting.
    pub fn rank_signals(&self, signals: Vec<Signal>) -> Vec<Signal> {
        signals
    }

    pub async fn can_open_position(&self, signal: &Signal) -> bool {
        let state = self.state.read().await;

        if state.total_risk_pct + self.params.max_risk_per_trade > self.params.max_total_risk {
            warn!(
                "{} rejected: total risk {:.2}% at the {:.2}% cap",
                signal.symbol, state.total_risk_pct, self.params.max_total_risk
            );
            return false;
        }

        if let Some(sector) = &signal.sector {
            let allocated = state
                .sector_allocation_pct
                .get(sector)
                .copied()
                .unwrap_or(Decimal::ZERO);
            let sector_cap = self.params.max_sector_allocation * self.params.max_total_risk;
            if allocated + self.params.max_risk_per_trade > sector_cap {
                warn!(
                    "{} rejected: {} allocation {:.2}% at the {:.2}% cap",
                    signal.symbol, sector, allocated, sector_cap
                );
                return false;
            }
        }

        if signal.market_state.is_bearish() && signal.score < BEAR_MIN_SCORE {
            warn!(
                "{} rejected: score {:.1} too low for a {} market",
                signal.symbol, signal.score, signal.market_state
            );
            return false;
        }

        true
    }

    /// Position size in base units. Risk budget is scaled by signal quality
    /// and regime, then translated to notional through the implicit 2% stop.
    /// Side effect: reserves the trade's risk in the exposure counters.
    pub async fn calculate_position_size(&self, signal: &Signal) -> Decimal {
        let risk_amount =
            self.params.account_balance * self.params.max_risk_per_trade / Decimal::from(100);
        let score_factor = (signal.score / SCORE_FULL_SIZE).min(Decimal::ONE);
        let adjusted_risk = risk_amount * score_factor * signal.market_state.size_multiplier();

        let position_value = adjusted_risk / IMPLICIT_STOP;
        let size = if signal.entry_price.is_zero() {
            Decimal::ZERO
        } else {
            position_value / signal.entry_price
        };

        info!(
            "{} sizing: risk ${:.2}, notional ${:.2}, size {:.6}",
            signal.symbol, adjusted_risk, position_value, size
        );

        let mut state = self.state.write().await;
        state.total_risk_pct += self.params.max_risk_per_trade;
        if let Some(sector) = &signal.sector {
            *state
                .sector_allocation_pct
                .entry(sector.clone())
                .or_insert(Decimal::ZERO) += self.params.max_risk_per_trade;
        }
        state.positions.insert(
            signal.symbol.clone(),
            OpenPosition {
                sector: signal.sector.clone(),
                size,
                risk_pct: self.params.max_risk_per_trade,
            },
        );

        size
    }

    pub async fn update_position(&self, symbol: &Symbol, action: PositionAction) {
        let mut state = self.state.write().await;
        match action {
            PositionAction::Open { size } => {
                if let Some(position) = state.positions.get_mut(symbol) {
                    position.size = size;
                }
            }
            PositionAction::Close => {
                if let Some(position) = state.positions.remove(symbol) {
                    state.total_risk_pct =
                        (state.total_risk_pct - position.risk_pct).max(Decimal::ZERO);
                    if let Some(sector) = &position.sector {
                        if let Some(allocated) = state.sector_allocation_pct.get_mut(sector) {
                            *allocated = (*allocated - position.risk_pct).max(Decimal::ZERO);
                        }
                    }
                }
            }
            PositionAction::PartialClose { size } => {
                let released = state.positions.get_mut(symbol).and_then(|position| {
                    if position.size <= Decimal::ZERO {
                        return None;
                    }
                    let ratio = (size / position.size).min(Decimal::ONE);
                    let released = position.risk_pct * ratio;
                    position.risk_pct -= released;
                    position.size -= size.min(position.size);
                    Some((released, position.sector.clone()))
                });

                if let Some((released, sector)) = released {
                    state.total_risk_pct = (state.total_risk_pct - released).max(Decimal::ZERO);
                    if let Some(sector) = sector {
                        if let Some(allocated) = state.sector_allocation_pct.get_mut(&sector) {
                            *allocated = (*allocated - released).max(Decimal::ZERO);
                        }
                    }
                }
            }
        }
    }

    pub async fn is_blacklisted(&self, symbol: &Symbol) -> bool {
        self.state.read().await.blacklist.contains(symbol)
    }

    pub async fn blacklist(&self) -> HashSet<Symbol> {
        self.state.read().await.blacklist.clone()
    }

    pub async fn total_risk_pct(&self) -> Decimal {
        self.state.read().await.total_risk_pct
    }

    pub async fn sector_allocation_pct(&self, sector: &str) -> Decimal {
        self.state
            .read()
            .await
            .sector_allocation_pct
            .get(sector)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    async fn should_blacklist(&self, symbol: &Symbol) -> bool {
        if let Some(drawdown) = self
            .indicators
            .max_drawdown(symbol, BLACKLIST_DRAWDOWN_DAYS)
            .await
        {
            if drawdown > BLACKLIST_DRAWDOWN_PCT {
                debug!("{} blacklisted: 7d drawdown {:.2}%", symbol, drawdown);
                return true;
            }
        }

        if let Some(volume) = self
            .indicators
            .trading_volume_usd(symbol, BLACKLIST_VOLUME_DAYS)
            .await
        {
            if volume < BLACKLIST_MIN_VOLUME_USD {
                debug!("{} blacklisted: 30d volume ${:.0}", symbol, volume);
                return true;
            }
        }

        false
    }

    /// Rebuilds the blacklist over the symbol universe in batches under a
    /// wall-clock budget, then swaps it in wholesale. Returns the new size.
    pub async fn update_blacklist(&self) -> usize {
        info!("Rebuilding symbol blacklist...");
        let started = Instant::now();

        let symbols = self.data.tradable_symbols(None).await;
        let mut new_blacklist = HashSet::new();

        let limit = (BLACKLIST_MAX_BATCHES * BLACKLIST_BATCH_SIZE).min(symbols.len());
        for (batch_idx, batch) in symbols[..limit].chunks(BLACKLIST_BATCH_SIZE).enumerate() {
            if started.elapsed() > BLACKLIST_BUDGET {
                warn!(
                    "Blacklist rebuild budget exhausted after {} symbols",
                    batch_idx * BLACKLIST_BATCH_SIZE
                );
                break;
            }

            for symbol in batch {
                if self.should_blacklist(symbol).await {
                    new_blacklist.insert(symbol.clone());
                }
            }

            // Pause between batches to spread the API load.
            if (batch_idx + 1) * BLACKLIST_BATCH_SIZE < limit {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }

        let count = new_blacklist.len();
        self.state.write().await.blacklist = new_blacklist;
        info!(
            "Blacklist rebuilt: {} symbols in {:.1}s",
            count,
            started.elapsed().as_secs_f64()
        );
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::testutil::StubExchange;
    use crate::exchange::Exchange;
    use crate::types::MarketState;
    use chrono::{Duration as ChronoDuration, Utc};

    fn params() -> RiskParams {
        RiskParams {
            max_risk_per_trade: dec!(2),
            max_total_risk: dec!(6),
            max_sector_allocation: dec!(0.5),
            account_balance: dec!(10000),
        }
    }

    fn manager_with(stub: Arc<StubExchange>) -> RiskManager {
        let mut exchanges: HashMap<String, Arc<dyn Exchange>> = HashMap::new();
        exchanges.insert("stub".to_string(), stub);
        let data = Arc::new(MarketDataCache::new(
            exchanges,
            "stub".to_string(),
            vec!["USDT".to_string()],
            Duration::from_secs(60),
        ));
        let indicators = Arc::new(IndicatorService::new(
            Arc::clone(&data),
            Duration::from_secs(60),
        ));
        RiskManager::new(params(), indicators, data)
    }

    fn manager() -> RiskManager {
        manager_with(Arc::new(StubExchange::new()))
    }

    fn signal(symbol: &str, score: Decimal, state: MarketState) -> Signal {
        Signal {
            symbol: Symbol::from(symbol),
            momentum: dec!(6),
            volume_ratio: dec!(2),
            rsi: dec!(55),
            entry_price: dec!(100),
            atr: dec!(4),
            profit_target: dec!(0.06),
            sector: None,
            score,
            market_state: state,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_bear_market_requires_high_score() {
        let risk = manager();
        let weak = signal("SOL/USDT", dec!(61.5), MarketState::Bear);
        assert!(!risk.can_open_position(&weak).await);

        let in_bull = signal("SOL/USDT", dec!(61.5), MarketState::Bull);
        assert!(risk.can_open_position(&in_bull).await);

        let strong_in_bear = signal("SOL/USDT", dec!(72), MarketState::Bear);
        assert!(risk.can_open_position(&strong_in_bear).await);
    }

    #[tokio::test]
    async fn test_total_risk_cap() {
        let risk = manager();
        for i in 0..3 {
            let s = signal(&format!("S{}/USDT", i), dec!(60), MarketState::Bull);
            assert!(risk.can_open_position(&s).await);
            risk.calculate_position_size(&s).await;
        }
        // 3 x 2% = 6%; a fourth trade would breach the cap.
        let s = signal("S4/USDT", dec!(60), MarketState::Bull);
        assert!(!risk.can_open_position(&s).await);
    }

    #[tokio::test]
    async fn test_sector_cap() {
        let risk = manager();
        // Sector cap is 0.5 * 6% = 3%, so the second 2% DeFi trade breaches.
        let mut first = signal("UNI/USDT", dec!(60), MarketState::Bull);
        first.sector = Some("DeFi".to_string());
        assert!(risk.can_open_position(&first).await);
        risk.calculate_position_size(&first).await;

        let mut second = signal("AAVE/USDT", dec!(60), MarketState::Bull);
        second.sector = Some("DeFi".to_string());
        assert!(!risk.can_open_position(&second).await);
    }

    #[tokio::test]
    async fn test_position_sizing() {
        let risk = manager();
        // risk = 10000 * 2% = 200; score 60 -> factor 1; bull -> x1
        // notional = 200 / 0.02 = 10000; size = 10000 / 100 = 100
        let s = signal("SOL/USDT", dec!(60), MarketState::Bull);
        assert_eq!(risk.calculate_position_size(&s).await, dec!(100));

        // Half score halves the risk; strong bull scales by 1.2.
        let s = signal("ETH/USDT", dec!(30), MarketState::StrongBull);
        assert_eq!(risk.calculate_position_size(&s).await, dec!(60));
    }

    #[tokio::test]
    async fn test_close_releases_exact_sector_share() {
        let risk = manager();
        let mut defi = signal("UNI/USDT", dec!(60), MarketState::Bull);
        defi.sector = Some("DeFi".to_string());
        let mut meme = signal("DOGE/USDT", dec!(60), MarketState::Bull);
        meme.sector = Some("Meme".to_string());

        let size = risk.calculate_position_size(&defi).await;
        risk.calculate_position_size(&meme).await;
        assert_eq!(risk.total_risk_pct().await, dec!(4));
        assert_eq!(risk.sector_allocation_pct("DeFi").await, dec!(2));

        risk.update_position(&defi.symbol, PositionAction::Open { size })
            .await;
        risk.update_position(&defi.symbol, PositionAction::Close).await;

        assert_eq!(risk.total_risk_pct().await, dec!(2));
        assert_eq!(risk.sector_allocation_pct("DeFi").await, Decimal::ZERO);
        // The other sector is untouched.
        assert_eq!(risk.sector_allocation_pct("Meme").await, dec!(2));
    }

    #[tokio::test]
    async fn test_partial_close_releases_proportionally() {
        let risk = manager();
        let s = signal("SOL/USDT", dec!(60), MarketState::Bull);
        let size = risk.calculate_position_size(&s).await;
        risk.update_position(&s.symbol, PositionAction::Open { size })
            .await;

        risk.update_position(
            &s.symbol,
            PositionAction::PartialClose { size: size / dec!(2) },
        )
        .await;
        assert_eq!(risk.total_risk_pct().await, dec!(1));
    }

    #[tokio::test]
    async fn test_filter_drops_held_and_overbought() {
        let risk = manager();
        let held = signal("SOL/USDT", dec!(60), MarketState::Bull);
        risk.calculate_position_size(&held).await;

        let mut overbought = signal("ETH/USDT", dec!(60), MarketState::Bull);
        overbought.rsi = dec!(80);
        let clean = signal("ARB/USDT", dec!(60), MarketState::Bull);

        let out = risk
            .filter_signals(vec![held.clone(), overbought, clean.clone()])
            .await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].symbol, clean.symbol);
    }

    fn daily(closes_volumes: &[(Decimal, Decimal)]) -> Vec<crate::types::Candle> {
        let start = Utc::now() - ChronoDuration::days(closes_volumes.len() as i64);
        closes_volumes
            .iter()
            .enumerate()
            .map(|(i, (close, volume))| crate::types::Candle {
                timestamp: start + ChronoDuration::days(i as i64),
                open: *close,
                high: *close,
                low: *close,
                close: *close,
                volume: *volume,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_blacklist_conditions() {
        let stub = Arc::new(StubExchange::new());
        // CRASH: 30% drawdown but healthy volume -> blacklisted.
        let mut crash: Vec<(Decimal, Decimal)> = vec![(dec!(100), dec!(1000)); 29];
        crash.push((dec!(70), dec!(1000)));
        stub.set_candles("CRASH/USDT", crate::types::TimeFrame::D1, daily(&crash));
        // THIN: steady price but ~$600k of 30d volume -> blacklisted.
        let thin: Vec<(Decimal, Decimal)> = vec![(dec!(1), dec!(20000)); 30];
        stub.set_candles("THIN/USDT", crate::types::TimeFrame::D1, daily(&thin));
        // OK: steady price, $3M volume -> kept.
        let ok: Vec<(Decimal, Decimal)> = vec![(dec!(1), dec!(100000)); 30];
        stub.set_candles("OK/USDT", crate::types::TimeFrame::D1, daily(&ok));

        for s in ["CRASH/USDT", "THIN/USDT", "OK/USDT"] {
            stub.add_market(s);
        }

        let risk = manager_with(Arc::clone(&stub));
        risk.data.init().await;
        risk.update_blacklist().await;

        assert!(risk.is_blacklisted(&Symbol::from("CRASH/USDT")).await);
        assert!(risk.is_blacklisted(&Symbol::from("THIN/USDT")).await);
        assert!(!risk.is_blacklisted(&Symbol::from("OK/USDT")).await);
    }
}
