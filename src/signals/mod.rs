use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::analyzer::MarketAnalyzer;
use crate::indicators::IndicatorService;
use crate::types::{Signal, Symbol};

const BATCH_SIZE: usize = 50;
const VOLUME_RATIO_FLOOR: Decimal = dec!(1.5);
const RSI_CEILING: Decimal = dec!(75);
const DEFAULT_ATR: Decimal = dec!(4.0);
const MAX_PROFIT_TARGET: Decimal = dec!(0.1);
const TOP_SECTOR_COUNT: usize = 3;

/// Signal score from its components, 0-90. Momentum is worth up to 40,
/// volume up to 25, sector membership a flat 15, and a healthy RSI up to 10.
pub fn score_signal(
    momentum: Decimal,
    volume_ratio: Decimal,
    rsi: Decimal,
    in_top_sector: bool,
) -> Decimal {
    let mut score = Decimal::ZERO;

    score += (momentum / dec!(10) * dec!(40)).min(dec!(40));
    score += ((volume_ratio - Decimal::ONE) * dec!(12.5)).min(dec!(25));

    if in_top_sector {
        score += dec!(15);
    }

    if rsi >= dec!(40) && rsi <= dec!(60) {
        score += dec!(10);
    } else if (rsi >= dec!(30) && rsi < dec!(40)) || (rsi > dec!(60) && rsi <= dec!(70)) {
        score += dec!(5);
    }

    score
}

/// Walks the symbol universe through a prefilter funnel and scores the
/// survivors. Filters run cheapest first and short-circuit on the first
/// failure so most symbols cost a single indicator lookup.
pub struct SignalGenerator {
    indicators: Arc<IndicatorService>,
    analyzer: Arc<MarketAnalyzer>,
}

impl SignalGenerator {
    pub fn new(indicators: Arc<IndicatorService>, analyzer: Arc<MarketAnalyzer>) -> Self {
        Self {
            indicators,
            analyzer,
        }
    }

    pub async fn generate_signals(&self, symbols: &[Symbol]) -> Vec<Signal> {
        info!("Generating signals over {} symbols...", symbols.len());

        let market_state = self.analyzer.assess_market_state().await;
        let top_sectors = self.analyzer.top_sectors(TOP_SECTOR_COUNT).await;
        let window = self.analyzer.determine_momentum_window().await;
        let threshold = self.analyzer.adjust_threshold(window.threshold_min);

        info!(
            "Scan context: state={}, top sectors={:?}, window={}m, threshold={}%",
            market_state, top_sectors, window.minutes, threshold
        );

        let started = Instant::now();
        let mut signals = Vec::new();
        let mut processed = 0usize;

        for batch in symbols.chunks(BATCH_SIZE) {
            for symbol in batch {
                if let Some(signal) = self
                    .evaluate_symbol(symbol, window.minutes, threshold, &top_sectors, market_state)
                    .await
                {
                    signals.push(signal);
                }

                processed += 1;
                if processed % BATCH_SIZE == 0 {
                    let progress = processed as f64 / symbols.len() as f64 * 100.0;
                    info!(
                        "Signal progress: {}/{} ({:.1}%), {} found, {:.1}s elapsed",
                        processed,
                        symbols.len(),
                        progress,
                        signals.len(),
                        started.elapsed().as_secs_f64()
                    );
                }
            }
        }

        signals.sort_by(|a, b| b.score.cmp(&a.score));
        info!(
            "Signal generation done: {} signals from {} symbols in {:.1}s",
            signals.len(),
            symbols.len(),
            started.elapsed().as_secs_f64()
        );
        signals
    }

    async fn evaluate_symbol(
        &self,
        symbol: &Symbol,
        window_minutes: u32,
        threshold: Decimal,
        top_sectors: &[String],
        market_state: crate::types::MarketState,
    ) -> Option<Signal> {
        let momentum = self.indicators.momentum(symbol, window_minutes).await?;
        if momentum < threshold {
            return None;
        }

        let volume_ratio = self.indicators.volume_ratio(symbol).await?;
        if volume_ratio < VOLUME_RATIO_FLOOR {
            return None;
        }

        let rsi = self.indicators.rsi(symbol).await?;
        if rsi > RSI_CEILING {
            debug!("{} dropped: RSI {:.1} overbought", symbol, rsi);
            return None;
        }

        let entry_price = self.indicators.data().current_price(symbol).await?;

        let atr = self.indicators.atr_pct(symbol).await.unwrap_or(DEFAULT_ATR);
        let profit_target = (atr * dec!(1.5) / Decimal::from(100)).min(MAX_PROFIT_TARGET);

        let sector = self.analyzer.sector_of(symbol, top_sectors).cloned();
        let score = score_signal(momentum, volume_ratio, rsi, sector.is_some());

        debug!(
            "{}: momentum={:.2}% vr={:.2} rsi={:.1} score={:.1}",
            symbol, momentum, volume_ratio, rsi, score
        );

        Some(Signal {
            symbol: symbol.clone(),
            momentum,
            volume_ratio,
            rsi,
            entry_price,
            atr,
            profit_target,
            sector,
            score,
            market_state,
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_components() {
        // momentum 6% -> 24, volume 2.0 -> 12.5, sector -> 15, RSI 55 -> 10
        assert_eq!(score_signal(dec!(6), dec!(2.0), dec!(55), true), dec!(61.5));
    }

    #[test]
    fn test_score_caps() {
        // momentum and volume contributions are capped at 40 and 25
        assert_eq!(score_signal(dec!(50), dec!(10), dec!(50), false), dec!(75));
    }

    #[test]
    fn test_rsi_bands() {
        assert_eq!(score_signal(dec!(0), dec!(1), dec!(50), false), dec!(10));
        assert_eq!(score_signal(dec!(0), dec!(1), dec!(35), false), dec!(5));
        assert_eq!(score_signal(dec!(0), dec!(1), dec!(65), false), dec!(5));
        assert_eq!(score_signal(dec!(0), dec!(1), dec!(80), false), Decimal::ZERO);
        assert_eq!(score_signal(dec!(0), dec!(1), dec!(20), false), Decimal::ZERO);
    }
}
