#![allow(dead_code)]
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::data::MarketDataCache;
use crate::types::{Symbol, TimeFrame};

use super::calc;

const MOMENTUM_TTL: Duration = Duration::from_secs(60);
const VOLUME_RATIO_TTL: Duration = Duration::from_secs(300);

pub const DEFAULT_VOLUME_DAYS: u32 = 20;
pub const DEFAULT_ATR_PERIOD: usize = 14;
pub const DEFAULT_RSI_PERIOD: usize = 14;

struct Memo {
    value: Option<Decimal>,
    computed_at: Instant,
}

/// Derived metrics over cached candles. Every indicator is memoized under its
/// own key and TTL so a scan over thousands of symbols does not recompute the
/// same series; an absent value means the data was insufficient and is never
/// substituted with a numeric default here.
pub struct IndicatorService {
    data: Arc<MarketDataCache>,
    candle_ttl: Duration,
    momentum: Mutex<HashMap<(Symbol, u32), Memo>>,
    volume_ratios: Mutex<HashMap<(Symbol, u32), Memo>>,
    values: Mutex<HashMap<String, Memo>>,
}

impl IndicatorService {
    pub fn new(data: Arc<MarketDataCache>, candle_ttl: Duration) -> Self {
        Self {
            data,
            candle_ttl,
            momentum: Mutex::new(HashMap::new()),
            volume_ratios: Mutex::new(HashMap::new()),
            values: Mutex::new(HashMap::new()),
        }
    }

    pub fn data(&self) -> &Arc<MarketDataCache> {
        &self.data
    }

    /// Timeframe granular enough to resolve a minutes window without pulling
    /// an excessive number of bars.
    fn timeframe_for_window(minutes: u32) -> TimeFrame {
        if minutes <= 5 {
            TimeFrame::M1
        } else if minutes <= 15 {
            TimeFrame::M5
        } else if minutes <= 60 {
            TimeFrame::M15
        } else {
            TimeFrame::H1
        }
    }

    /// Percent change of the close over the last `minutes`.
    pub async fn momentum(&self, symbol: &Symbol, minutes: u32) -> Option<Decimal> {
        let key = (symbol.clone(), minutes);
        {
            let cache = self.momentum.lock().await;
            if let Some(memo) = cache.get(&key) {
                if memo.computed_at.elapsed() < MOMENTUM_TTL {
                    return memo.value;
                }
            }
        }

        let timeframe = Self::timeframe_for_window(minutes);
        let bars_back = (minutes / timeframe.to_minutes()).max(1) as usize;
        let limit = (bars_back + 3) as u32;

        let value = match self.data.get_candles(symbol, timeframe, limit).await {
            Some(candles) => calc::momentum_pct(&candles, bars_back),
            None => None,
        };

        self.momentum.lock().await.insert(
            key,
            Memo {
                value,
                computed_at: Instant::now(),
            },
        );
        value
    }

    /// Latest daily volume over the mean of the preceding `days`.
    pub async fn volume_ratio(&self, symbol: &Symbol) -> Option<Decimal> {
        self.volume_ratio_over(symbol, DEFAULT_VOLUME_DAYS).await
    }

    pub async fn volume_ratio_over(&self, symbol: &Symbol, days: u32) -> Option<Decimal> {
        let key = (symbol.clone(), days);
        {
            let cache = self.volume_ratios.lock().await;
            if let Some(memo) = cache.get(&key) {
                if memo.computed_at.elapsed() < VOLUME_RATIO_TTL {
                    return memo.value;
                }
            }
        }

        let value = match self.data.get_candles(symbol, TimeFrame::D1, days + 1).await {
            Some(candles) => calc::volume_ratio(&candles, days as usize),
            None => None,
        };

        self.volume_ratios.lock().await.insert(
            key,
            Memo {
                value,
                computed_at: Instant::now(),
            },
        );
        value
    }

    async fn memoized_value(
        &self,
        key: String,
        value: impl std::future::Future<Output = Option<Decimal>>,
    ) -> Option<Decimal> {
        {
            let cache = self.values.lock().await;
            if let Some(memo) = cache.get(&key) {
                if memo.computed_at.elapsed() < self.candle_ttl {
                    return memo.value;
                }
            }
        }

        let value = value.await;
        self.values.lock().await.insert(
            key,
            Memo {
                value,
                computed_at: Instant::now(),
            },
        );
        value
    }

    /// Daily ATR as a percentage of the latest close.
    pub async fn atr_pct(&self, symbol: &Symbol) -> Option<Decimal> {
        self.atr_pct_over(symbol, DEFAULT_ATR_PERIOD).await
    }

    pub async fn atr_pct_over(&self, symbol: &Symbol, period: usize) -> Option<Decimal> {
        let key = format!("{}_{}_atr", symbol, period);
        let data = Arc::clone(&self.data);
        let symbol = symbol.clone();
        self.memoized_value(key, async move {
            let candles = data
                .get_candles(&symbol, TimeFrame::D1, (period * 2) as u32)
                .await?;
            calc::atr_pct(&candles, period)
        })
        .await
    }

    /// Hourly RSI by default.
    pub async fn rsi(&self, symbol: &Symbol) -> Option<Decimal> {
        self.rsi_over(symbol, DEFAULT_RSI_PERIOD, TimeFrame::H1).await
    }

    pub async fn rsi_over(
        &self,
        symbol: &Symbol,
        period: usize,
        timeframe: TimeFrame,
    ) -> Option<Decimal> {
        let key = format!("{}_{}_{}_rsi", symbol, timeframe, period);
        let data = Arc::clone(&self.data);
        let symbol = symbol.clone();
        self.memoized_value(key, async move {
            let candles = data
                .get_candles(&symbol, timeframe, (period * 3) as u32)
                .await?;
            calc::rsi(&candles, period)
        })
        .await
    }

    pub async fn max_drawdown(&self, symbol: &Symbol, days: u32) -> Option<Decimal> {
        let candles = self.data.get_candles(symbol, TimeFrame::D1, days).await?;
        calc::max_drawdown_pct(&candles)
    }

    pub async fn trading_volume_usd(&self, symbol: &Symbol, days: u32) -> Option<Decimal> {
        let candles = self.data.get_candles(symbol, TimeFrame::D1, days).await?;
        calc::trading_volume_usd(&candles)
    }

    pub async fn previous_high(&self, symbol: &Symbol, days: u32) -> Option<Decimal> {
        let candles = self.data.get_candles(symbol, TimeFrame::D1, days).await?;
        calc::previous_high(&candles)
    }

    /// Close nearest to `minutes_ago` before now.
    pub async fn historical_price(&self, symbol: &Symbol, minutes_ago: u32) -> Option<Decimal> {
        let timeframe = Self::timeframe_for_window(minutes_ago);
        let limit = ((minutes_ago / timeframe.to_minutes()) + 2).min(100);
        let candles = self.data.get_candles(symbol, timeframe, limit).await?;
        if candles.is_empty() {
            return None;
        }

        let target: DateTime<Utc> = Utc::now() - ChronoDuration::minutes(minutes_ago as i64);
        let closest = candles.iter().min_by_key(|c| {
            (c.timestamp - target).num_seconds().abs()
        })?;
        debug!(
            "Historical price for {} at {}: {}",
            symbol, closest.timestamp, closest.close
        );
        Some(closest.close)
    }
}
