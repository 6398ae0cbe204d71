#![allow(dead_code)]
use async_trait::async_trait;
use chrono::{Datelike, Local, Timelike, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::data::MarketDataCache;
use crate::indicators::{self, IndicatorService};
use crate::types::{MarketState, MomentumWindow, Symbol, TimeFrame};

const BTC_SYMBOL: &str = "BTC/USDT";
const DEFAULT_MARKET_ATR: Decimal = dec!(4.0);
const SECTOR_CACHE_TTL: Duration = Duration::from_secs(3600);
const SECTOR_TOTAL_BUDGET: Duration = Duration::from_secs(60);
const SECTOR_PER_SECTOR_BUDGET: Duration = Duration::from_secs(15);
const SECTOR_SAMPLE_SIZE: usize = 10;

/// Hook for an external social-sentiment feed. When the feature is disabled
/// the engine sees `None`; no synthetic values are ever produced.
#[async_trait]
pub trait SocialMomentumProvider: Send + Sync {
    async fn momentum_growth(&self, symbol: &Symbol) -> Option<Decimal>;
}

#[derive(Debug, Clone)]
pub struct SectorScore {
    pub name: String,
    pub avg_change: Decimal,
    pub max_change: Decimal,
    pub volume_growth: Decimal,
    pub score: Decimal,
}

/// Derives the market regime from BTC, sizes the momentum window from market
/// volatility, and ranks sectors by recent strength.
pub struct MarketAnalyzer {
    data: Arc<MarketDataCache>,
    indicators: Arc<IndicatorService>,
    sectors: BTreeMap<String, Vec<String>>,
    state_ttl: Duration,
    social: Option<Arc<dyn SocialMomentumProvider>>,
    social_enabled: bool,
    state_cache: Mutex<Option<(MarketState, Instant)>>,
    sector_cache: Mutex<Option<(Vec<SectorScore>, Instant)>>,
}

impl MarketAnalyzer {
    pub fn new(
        data: Arc<MarketDataCache>,
        indicators: Arc<IndicatorService>,
        sectors: BTreeMap<String, Vec<String>>,
        state_ttl: Duration,
        social: Option<Arc<dyn SocialMomentumProvider>>,
        social_enabled: bool,
    ) -> Self {
        Self {
            data,
            indicators,
            sectors,
            state_ttl,
            social,
            social_enabled,
            state_cache: Mutex::new(None),
            sector_cache: Mutex::new(None),
        }
    }

    /// BTC close vs its 20-day SMA crossed with the 5-day change.
    pub fn classify_market_state(
        close: Decimal,
        ma20: Decimal,
        five_day_change: Decimal,
    ) -> MarketState {
        if close > ma20 * dec!(1.05) && five_day_change > dec!(5) {
            MarketState::StrongBull
        } else if close > ma20 && five_day_change > Decimal::ZERO {
            MarketState::Bull
        } else if close < ma20 * dec!(0.95) && five_day_change < dec!(-5) {
            MarketState::StrongBear
        } else if close < ma20 && five_day_change < Decimal::ZERO {
            MarketState::Bear
        } else {
            MarketState::Neutral
        }
    }

    pub async fn assess_market_state(&self) -> MarketState {
        {
            let cache = self.state_cache.lock().await;
            if let Some((state, at)) = *cache {
                if at.elapsed() < self.state_ttl {
                    return state;
                }
            }
        }

        let btc = Symbol::from(BTC_SYMBOL);
        let candles = match self.data.get_candles(&btc, TimeFrame::D1, 20).await {
            Some(candles) if !candles.is_empty() => candles,
            _ => {
                warn!("No BTC data, defaulting market state to neutral");
                return MarketState::Neutral;
            }
        };

        let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
        let latest_close = *closes.last().expect("non-empty");

        // With fewer than 20 bars, fall back to the mean of what exists.
        let ma20 = indicators::sma(&closes, 20).unwrap_or_else(|| {
            let sum: Decimal = closes.iter().sum();
            sum / Decimal::from(closes.len() as u64)
        });

        let five_day_change = if closes.len() >= 5 {
            let past = closes[closes.len() - 5];
            if past.is_zero() {
                Decimal::ZERO
            } else {
                (latest_close / past - Decimal::ONE) * Decimal::from(100)
            }
        } else {
            Decimal::ZERO
        };

        let state = Self::classify_market_state(latest_close, ma20, five_day_change);
        info!("Market state: {}", state);

        *self.state_cache.lock().await = Some((state, Instant::now()));
        state
    }

    /// BTC ATR% as the whole-market volatility proxy, defaulting to 4%.
    pub async fn market_atr(&self) -> Decimal {
        self.indicators
            .atr_pct(&Symbol::from(BTC_SYMBOL))
            .await
            .unwrap_or(DEFAULT_MARKET_ATR)
    }

    pub fn window_for_atr(market_atr: Decimal) -> MomentumWindow {
        if market_atr > dec!(5.0) {
            MomentumWindow {
                minutes: 5,
                threshold_min: dec!(3.0),
                threshold_max: dec!(5.0),
            }
        } else if market_atr >= dec!(3.0) {
            MomentumWindow {
                minutes: 10,
                threshold_min: dec!(2.0),
                threshold_max: dec!(3.0),
            }
        } else {
            MomentumWindow {
                minutes: 15,
                threshold_min: dec!(1.5),
                threshold_max: dec!(2.5),
            }
        }
    }

    pub async fn determine_momentum_window(&self) -> MomentumWindow {
        Self::window_for_atr(self.market_atr().await)
    }

    /// Session adjustment: the Asian session is thin so the bar is raised;
    /// weekends are quiet so it is lowered.
    pub fn adjusted_threshold_for(
        base: Decimal,
        utc_hour: u32,
        is_weekend: bool,
    ) -> Decimal {
        if (3..=5).contains(&utc_hour) {
            return base + dec!(0.5);
        }
        if is_weekend {
            return base - dec!(0.3);
        }
        base
    }

    pub fn adjust_threshold(&self, base: Decimal) -> Decimal {
        let utc_hour = Utc::now().hour();
        let weekday = Local::now().weekday();
        let is_weekend = matches!(weekday, chrono::Weekday::Sat | chrono::Weekday::Sun);
        Self::adjusted_threshold_for(base, utc_hour, is_weekend)
    }

    pub fn sector_score(
        avg_change: Decimal,
        max_change: Decimal,
        volume_growth: Decimal,
    ) -> Decimal {
        avg_change * dec!(0.4)
            + max_change * dec!(0.3)
            + (volume_growth - Decimal::ONE) * dec!(30) * dec!(0.3)
    }

    /// Symbols belonging to a configured sector, matched by prefix.
    pub async fn sector_symbols(&self, sector: &str) -> Vec<Symbol> {
        let prefixes = match self.sectors.get(sector) {
            Some(prefixes) => prefixes,
            None => return Vec::new(),
        };
        self.data
            .tradable_symbols(None)
            .await
            .into_iter()
            .filter(|s| prefixes.iter().any(|p| s.as_str().starts_with(p.as_str())))
            .collect()
    }

    /// Scores every configured sector from 24 h change and volume growth of
    /// up to ten representative symbols. Bounded by a total and a per-sector
    /// wall-clock budget; on exhaustion the ranking covers what finished.
    pub async fn rank_sectors(&self) -> Vec<SectorScore> {
        {
            let cache = self.sector_cache.lock().await;
            if let Some((ranking, at)) = cache.as_ref() {
                if at.elapsed() < SECTOR_CACHE_TTL {
                    return ranking.clone();
                }
            }
        }

        info!("Ranking {} sectors...", self.sectors.len());
        let started = Instant::now();
        let mut scored = Vec::new();

        for sector in self.sectors.keys() {
            if started.elapsed() > SECTOR_TOTAL_BUDGET {
                warn!(
                    "Sector ranking budget exhausted after {} sectors",
                    scored.len()
                );
                break;
            }

            let symbols = self.sector_symbols(sector).await;
            if symbols.is_empty() {
                warn!("Sector {} has no tradable symbols", sector);
                continue;
            }

            let sector_started = Instant::now();
            let mut avg_change = Decimal::ZERO;
            let mut max_change = Decimal::ZERO;
            let mut volume_growth = Decimal::ZERO;
            let mut valid = 0u32;

            for symbol in symbols.iter().take(SECTOR_SAMPLE_SIZE) {
                if sector_started.elapsed() > SECTOR_PER_SECTOR_BUDGET {
                    warn!("Sector {} budget exhausted after {} symbols", sector, valid);
                    break;
                }

                if let Some(ticker) = self.data.get_ticker(symbol).await {
                    avg_change += ticker.percentage_24h;
                    max_change = max_change.max(ticker.percentage_24h);
                    valid += 1;
                }
                if let Some(ratio) = self.indicators.volume_ratio(symbol).await {
                    volume_growth += ratio;
                }
            }

            if valid > 0 {
                avg_change /= Decimal::from(valid);
                volume_growth /= Decimal::from(valid);
                let score = Self::sector_score(avg_change, max_change, volume_growth);
                scored.push(SectorScore {
                    name: sector.clone(),
                    avg_change,
                    max_change,
                    volume_growth,
                    score,
                });
            }
        }

        scored.sort_by(|a, b| b.score.cmp(&a.score));
        info!(
            "Sector ranking: {:?}",
            scored.iter().map(|s| s.name.as_str()).collect::<Vec<_>>()
        );

        *self.sector_cache.lock().await = Some((scored.clone(), Instant::now()));
        scored
    }

    pub async fn top_sectors(&self, count: usize) -> Vec<String> {
        self.rank_sectors()
            .await
            .into_iter()
            .take(count)
            .map(|s| s.name)
            .collect()
    }

    /// Sector the symbol belongs to, if any of the given sectors claims it.
    pub fn sector_of<'a>(&self, symbol: &Symbol, among: &'a [String]) -> Option<&'a String> {
        among.iter().find(|sector| {
            self.sectors
                .get(sector.as_str())
                .map(|prefixes| prefixes.iter().any(|p| symbol.as_str().starts_with(p.as_str())))
                .unwrap_or(false)
        })
    }

    pub async fn social_momentum(&self, symbol: &Symbol) -> Option<Decimal> {
        if !self.social_enabled {
            return None;
        }
        self.social.as_ref()?.momentum_growth(symbol).await
    }

    pub async fn has_social_momentum(&self, symbol: &Symbol, threshold: Decimal) -> bool {
        match self.social_momentum(symbol).await {
            Some(growth) => growth > threshold,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_market_state_table() {
        // BTC at 45000 over a 40000 MA20 with +8% over five days.
        assert_eq!(
            MarketAnalyzer::classify_market_state(dec!(45000), dec!(40000), dec!(8)),
            MarketState::StrongBull
        );
        assert_eq!(
            MarketAnalyzer::classify_market_state(dec!(41000), dec!(40000), dec!(2)),
            MarketState::Bull
        );
        assert_eq!(
            MarketAnalyzer::classify_market_state(dec!(37000), dec!(40000), dec!(-8)),
            MarketState::StrongBear
        );
        assert_eq!(
            MarketAnalyzer::classify_market_state(dec!(39500), dec!(40000), dec!(-2)),
            MarketState::Bear
        );
        assert_eq!(
            MarketAnalyzer::classify_market_state(dec!(41000), dec!(40000), dec!(-1)),
            MarketState::Neutral
        );
    }

    #[test]
    fn test_window_for_atr() {
        let high = MarketAnalyzer::window_for_atr(dec!(6));
        assert_eq!(high.minutes, 5);
        assert_eq!(high.threshold_min, dec!(3.0));
        assert_eq!(high.threshold_max, dec!(5.0));

        let medium = MarketAnalyzer::window_for_atr(dec!(4));
        assert_eq!(medium.minutes, 10);
        assert_eq!(medium.threshold_min, dec!(2.0));

        let low = MarketAnalyzer::window_for_atr(dec!(2));
        assert_eq!(low.minutes, 15);
        assert_eq!(low.threshold_min, dec!(1.5));
    }

    #[test]
    fn test_threshold_session_adjustment() {
        // Weekday midday outside the Asian session: unchanged.
        assert_eq!(
            MarketAnalyzer::adjusted_threshold_for(dec!(3.0), 14, false),
            dec!(3.0)
        );
        // Asian session raises the bar, and wins over the weekend discount.
        assert_eq!(
            MarketAnalyzer::adjusted_threshold_for(dec!(3.0), 4, true),
            dec!(3.5)
        );
        // Weekend outside the Asian session lowers it.
        assert_eq!(
            MarketAnalyzer::adjusted_threshold_for(dec!(3.0), 14, true),
            dec!(2.7)
        );
    }

    #[test]
    fn test_sector_score_formula() {
        // 0.4 * 4 + 0.3 * 10 + 0.3 * (2 - 1) * 30 = 1.6 + 3 + 9
        assert_eq!(
            MarketAnalyzer::sector_score(dec!(4), dec!(10), dec!(2)),
            dec!(13.6)
        );
    }
}
