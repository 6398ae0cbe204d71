use rust_decimal::Decimal;

use crate::types::Candle;

/// Guard against division by a zero average loss.
const EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 10);

/// Percent change of the close over `bars_back` bars. `None` when the series
/// is too short to reach back that far.
pub fn momentum_pct(candles: &[Candle], bars_back: usize) -> Option<Decimal> {
    if bars_back == 0 || candles.len() < bars_back + 1 {
        return None;
    }
    let current = candles.last()?.close;
    let historical = candles[candles.len() - 1 - bars_back].close;
    if historical <= Decimal::ZERO {
        return None;
    }
    Some((current / historical - Decimal::ONE) * Decimal::from(100))
}

/// Latest volume divided by the mean of the preceding volumes. Undefined when
/// fewer than `days / 2` bars of history exist or the mean is zero.
pub fn volume_ratio(candles: &[Candle], days: usize) -> Option<Decimal> {
    if candles.len() < days / 2 || candles.len() < 2 {
        return None;
    }
    let current = candles.last()?.volume;
    let history = &candles[..candles.len() - 1];
    let sum: Decimal = history.iter().map(|c| c.volume).sum();
    let mean = sum / Decimal::from(history.len() as u64);
    if mean.is_zero() {
        return None;
    }
    Some(current / mean)
}

/// Mean true range over the last `period` bars as a percentage of the latest
/// close. True range = max(high-low, |high-prev_close|, |low-prev_close|).
pub fn atr_pct(candles: &[Candle], period: usize) -> Option<Decimal> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let start = candles.len() - period;
    let mut sum = Decimal::ZERO;
    for i in start..candles.len() {
        let c = &candles[i];
        let prev_close = candles[i - 1].close;
        let hl = c.high - c.low;
        let hc = (c.high - prev_close).abs();
        let lc = (c.low - prev_close).abs();
        sum += hl.max(hc).max(lc);
    }
    let atr = sum / Decimal::from(period as u64);
    let latest_close = candles.last()?.close;
    if latest_close.is_zero() {
        return None;
    }
    Some((atr / latest_close) * Decimal::from(100))
}

/// RSI over the last `period` bars: 100 - 100 / (1 + avg_gain / avg_loss).
pub fn rsi(candles: &[Candle], period: usize) -> Option<Decimal> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let start = candles.len() - period;
    let mut gains = Decimal::ZERO;
    let mut losses = Decimal::ZERO;
    for i in start..candles.len() {
        let change = candles[i].close - candles[i - 1].close;
        if change > Decimal::ZERO {
            gains += change;
        } else {
            losses += change.abs();
        }
    }
    let period_dec = Decimal::from(period as u64);
    let avg_gain = gains / period_dec;
    let avg_loss = (losses / period_dec).max(EPSILON);
    let rs = avg_gain / avg_loss;
    Some(Decimal::from(100) - Decimal::from(100) / (Decimal::ONE + rs))
}

/// Largest peak-to-close decline over the window, in percent.
pub fn max_drawdown_pct(candles: &[Candle]) -> Option<Decimal> {
    if candles.is_empty() {
        return None;
    }
    let mut peak = Decimal::ZERO;
    let mut worst = Decimal::ZERO;
    for c in candles {
        if c.close > peak {
            peak = c.close;
        }
        if peak > Decimal::ZERO {
            let drawdown = (peak - c.close) / peak * Decimal::from(100);
            if drawdown > worst {
                worst = drawdown;
            }
        }
    }
    Some(worst)
}

/// Sum of close * volume over the window, a dollar-volume estimate.
pub fn trading_volume_usd(candles: &[Candle]) -> Option<Decimal> {
    if candles.is_empty() {
        return None;
    }
    Some(candles.iter().map(|c| c.close * c.volume).sum())
}

pub fn previous_high(candles: &[Candle]) -> Option<Decimal> {
    candles.iter().map(|c| c.high).max()
}

/// Simple moving average over the trailing `period` values.
pub fn sma(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period {
        return None;
    }
    let sum: Decimal = values.iter().rev().take(period).sum();
    Some(sum / Decimal::from(period as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    fn candles_from_closes(closes: &[Decimal]) -> Vec<Candle> {
        let start = Utc::now() - Duration::days(closes.len() as i64);
        closes
            .iter()
            .enumerate()
            .map(|(i, close)| Candle {
                timestamp: start + Duration::days(i as i64),
                open: *close,
                high: *close + dec!(1),
                low: *close - dec!(1),
                close: *close,
                volume: dec!(100),
            })
            .collect()
    }

    #[test]
    fn test_momentum_pct() {
        let candles = candles_from_closes(&[dec!(100), dec!(101), dec!(102), dec!(106)]);
        // 106 vs 100, three bars back
        assert_eq!(momentum_pct(&candles, 3), Some(dec!(6.00)));
        assert!(momentum_pct(&candles, 4).is_none());
        assert!(momentum_pct(&candles, 0).is_none());
    }

    #[test]
    fn test_volume_ratio() {
        let mut candles = candles_from_closes(&[dec!(1); 21]);
        for c in candles.iter_mut().take(20) {
            c.volume = dec!(100);
        }
        candles.last_mut().unwrap().volume = dec!(200);
        assert_eq!(volume_ratio(&candles, 20), Some(dec!(2)));
    }

    #[test]
    fn test_volume_ratio_insufficient_history() {
        let candles = candles_from_closes(&[dec!(1); 5]);
        assert!(volume_ratio(&candles, 20).is_none());
    }

    #[test]
    fn test_volume_ratio_zero_mean() {
        let mut candles = candles_from_closes(&[dec!(1); 21]);
        for c in candles.iter_mut() {
            c.volume = Decimal::ZERO;
        }
        assert!(volume_ratio(&candles, 20).is_none());
    }

    #[test]
    fn test_atr_pct_flat_series() {
        // Constant closes with a fixed 2-point range: TR = 2 on every bar,
        // so ATR% = 2 / 100 * 100 = 2.
        let candles = candles_from_closes(&[dec!(100); 20]);
        assert_eq!(atr_pct(&candles, 14), Some(dec!(2)));
        assert!(atr_pct(&candles[..10], 14).is_none());
    }

    #[test]
    fn test_rsi_all_gains_and_all_losses() {
        let rising: Vec<Decimal> = (0..20).map(|i| Decimal::from(100 + i)).collect();
        let value = rsi(&candles_from_closes(&rising), 14).unwrap();
        assert!(value > dec!(99));

        let falling: Vec<Decimal> = (0..20).map(|i| Decimal::from(200 - i)).collect();
        let value = rsi(&candles_from_closes(&falling), 14).unwrap();
        assert!(value < dec!(1));
    }

    #[test]
    fn test_rsi_balanced() {
        // Alternating +1/-1 moves give equal gains and losses: RSI = 50.
        let closes: Vec<Decimal> = (0..21)
            .map(|i| if i % 2 == 0 { dec!(100) } else { dec!(101) })
            .collect();
        let value = rsi(&candles_from_closes(&closes), 14).unwrap();
        assert!((value - dec!(50)).abs() < dec!(0.5));
    }

    #[test]
    fn test_max_drawdown() {
        let candles = candles_from_closes(&[dec!(100), dec!(120), dec!(90), dec!(110)]);
        // Peak 120 down to 90 = 25%
        assert_eq!(max_drawdown_pct(&candles), Some(dec!(25)));
        assert!(max_drawdown_pct(&[]).is_none());
    }

    #[test]
    fn test_trading_volume_and_previous_high() {
        let candles = candles_from_closes(&[dec!(10), dec!(20)]);
        assert_eq!(trading_volume_usd(&candles), Some(dec!(3000)));
        assert_eq!(previous_high(&candles), Some(dec!(21)));
    }

    #[test]
    fn test_sma() {
        let values = [dec!(1), dec!(2), dec!(3), dec!(4)];
        assert_eq!(sma(&values, 2), Some(dec!(3.5)));
        assert!(sma(&values, 5).is_none());
    }
}
