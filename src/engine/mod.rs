#![allow(dead_code)]
use anyhow::Result;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::analyzer::MarketAnalyzer;
use crate::config::Config;
use crate::data::MarketDataCache;
use crate::executor::OrderExecutor;
use crate::indicators::IndicatorService;
use crate::risk::{PositionAction, RiskManager};
use crate::signals::SignalGenerator;
use crate::tracker::PerformanceTracker;
use crate::types::{
    ExecutedFill, Position, SecondStageEntry, Signal, Symbol, TriggerCondition, TriggerKind,
};

const MONITOR_INTERVAL: Duration = Duration::from_secs(10);
const JOB_WARN_THRESHOLD: Duration = Duration::from_secs(30);
const SECTOR_REFRESH_INTERVAL: Duration = Duration::from_secs(3600);
const BLACKLIST_REFRESH_INTERVAL: Duration = Duration::from_secs(86400);

const FIRST_STAGE_FRACTION: Decimal = dec!(0.5);
const INITIAL_STOP_FACTOR: Decimal = dec!(0.98);
const SECOND_STAGE_PRICE_MARKUP: Decimal = dec!(1.005);
const SECOND_STAGE_RSI_CAP: Decimal = dec!(70);
const PREVIOUS_HIGH_DAYS: u32 = 7;

const TRAILING_ACTIVATION: Decimal = dec!(1.03);
const TRAILING_STOP_STEP: Decimal = dec!(1.01);
const TP1_FRACTION: Decimal = dec!(0.3);
const TP2_FRACTION: Decimal = dec!(0.4);
const TP3_FRACTION: Decimal = dec!(0.3);
const TIME_STOP_HOURS: i64 = 4;
const TIME_STOP_MIN_PROFIT_PCT: Decimal = dec!(1);

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    /// No-op the daily blacklist rebuild.
    pub skip_blacklist: bool,
    /// No-op the hourly sector refresh.
    pub skip_sectors: bool,
}

/// Owns the active positions and the schedule: periodic market scans, sector
/// and blacklist refreshes, the daily report, and the ~10 s position monitor
/// that drives the two-stage entry, scaled take-profit ladder, trailing stop
/// and time stop.
pub struct TradingEngine {
    config: Arc<Config>,
    data: Arc<MarketDataCache>,
    indicators: Arc<IndicatorService>,
    analyzer: Arc<MarketAnalyzer>,
    signals: Arc<SignalGenerator>,
    risk: Arc<RiskManager>,
    executor: Arc<OrderExecutor>,
    tracker: Arc<PerformanceTracker>,
    positions: RwLock<HashMap<Symbol, Position>>,
    options: EngineOptions,
}

impl TradingEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        data: Arc<MarketDataCache>,
        indicators: Arc<IndicatorService>,
        analyzer: Arc<MarketAnalyzer>,
        signals: Arc<SignalGenerator>,
        risk: Arc<RiskManager>,
        executor: Arc<OrderExecutor>,
        tracker: Arc<PerformanceTracker>,
        options: EngineOptions,
    ) -> Self {
        Self {
            config,
            data,
            indicators,
            analyzer,
            signals,
            risk,
            executor,
            tracker,
            positions: RwLock::new(HashMap::new()),
            options,
        }
    }

    /// Runs until ctrl-c. Periodic jobs go to background tasks; the monitor
    /// loop runs here so shutdown stops it first.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!("Trading engine starting...");
        self.data.init().await;

        self.spawn_scan_job();
        if self.options.skip_sectors {
            info!("Sector refresh disabled (--skip-sectors)");
        } else {
            self.spawn_sector_job();
        }
        if self.options.skip_blacklist {
            info!("Blacklist refresh disabled (--skip-blacklist)");
        } else {
            self.spawn_blacklist_job();
        }
        self.spawn_daily_report_job();

        let mut monitor = interval(MONITOR_INTERVAL);
        monitor.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested, stopping engine");
                    break;
                }
                _ = monitor.tick() => {
                    let started = Instant::now();
                    self.monitor_positions().await;
                    if started.elapsed() > JOB_WARN_THRESHOLD {
                        warn!(
                            "Position monitor pass took {:.1}s",
                            started.elapsed().as_secs_f64()
                        );
                    }
                }
            }
        }

        Ok(())
    }

    fn spawn_scan_job(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(engine.config.scan_interval * 60));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let started = Instant::now();
                match engine.scan_market().await {
                    Ok(executed) => {
                        info!(
                            "Scan finished: {} entries in {:.1}s",
                            executed,
                            started.elapsed().as_secs_f64()
                        );
                    }
                    Err(e) => {
                        error!("Market scan failed: {:#}", e);
                        let backoff = {
                            let mut rng = rand::thread_rng();
                            rng.gen_range(30..60)
                        };
                        sleep(Duration::from_secs(backoff)).await;
                    }
                }
                if started.elapsed() > JOB_WARN_THRESHOLD {
                    warn!("Scan job took {:.1}s", started.elapsed().as_secs_f64());
                }
            }
        });
    }

    fn spawn_sector_job(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(SECTOR_REFRESH_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let started = Instant::now();
                let ranking = engine.analyzer.rank_sectors().await;
                info!(
                    "Sector refresh done: top {:?} in {:.1}s",
                    ranking.iter().take(3).map(|s| s.name.as_str()).collect::<Vec<_>>(),
                    started.elapsed().as_secs_f64()
                );
                if started.elapsed() > JOB_WARN_THRESHOLD {
                    warn!("Sector refresh took {:.1}s", started.elapsed().as_secs_f64());
                }
            }
        });
    }

    fn spawn_blacklist_job(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(BLACKLIST_REFRESH_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let started = Instant::now();
                let count = engine.risk.update_blacklist().await;
                info!(
                    "Blacklist refresh done: {} symbols in {:.1}s",
                    count,
                    started.elapsed().as_secs_f64()
                );
                if started.elapsed() > JOB_WARN_THRESHOLD {
                    warn!(
                        "Blacklist refresh took {:.1}s",
                        started.elapsed().as_secs_f64()
                    );
                }
            }
        });
    }

    fn spawn_daily_report_job(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let now = chrono::Utc::now();
                let next_midnight = (now + chrono::Duration::days(1))
                    .date_naive()
                    .and_hms_opt(0, 0, 0)
                    .expect("midnight exists")
                    .and_utc();
                let wait = (next_midnight - now).to_std().unwrap_or(Duration::from_secs(60));
                sleep(wait).await;

                if let Err(e) = engine.tracker.daily_report().await {
                    error!("Daily report failed: {:#}", e);
                }
            }
        });
    }

    /// One scan pass: universe, regime, risk gate, signal funnel, then up to
    /// `max_new_positions` approved entries. Returns how many were opened.
    pub async fn scan_market(&self) -> Result<usize> {
        info!("Scanning market...");
        let symbols = self.data.tradable_symbols(None).await;
        if symbols.is_empty() {
            warn!("No tradable symbols yet, skipping scan");
            return Ok(0);
        }
        info!("{} tradable symbols", symbols.len());

        let market_state = self.analyzer.assess_market_state().await;
        info!("Market state: {}", market_state);

        if !self.risk.check_market_risk().await {
            warn!("Market risk too high, no new entries this scan");
            return Ok(0);
        }

        let signals = self.signals.generate_signals(&symbols).await;
        if signals.is_empty() {
            info!("No qualifying signals this scan");
            return Ok(0);
        }

        let filtered = self.risk.filter_signals(signals).await;
        let ranked = self.risk.rank_signals(filtered);

        let mut executed = 0;
        for signal in ranked.iter().take(self.config.max_new_positions) {
            if !self.risk.can_open_position(signal).await {
                continue;
            }
            match self.execute_entry(signal).await {
                Ok(true) => executed += 1,
                Ok(false) => {}
                Err(e) => error!("Entry for {} failed: {:#}", signal.symbol, e),
            }
        }

        Ok(executed)
    }

    /// Two-stage entry: half the size now, the other half armed behind a
    /// break of the recent high, plus the initial stop.
    pub async fn execute_entry(&self, signal: &Signal) -> Result<bool> {
        let symbol = &signal.symbol;
        info!("Entering {} (score {:.1})", symbol, signal.score);

        let total_size = self.risk.calculate_position_size(signal).await;
        if total_size <= Decimal::ZERO {
            self.risk.update_position(symbol, PositionAction::Close).await;
            return Ok(false);
        }

        let first_stage = total_size * FIRST_STAGE_FRACTION;
        let fill = match self
            .executor
            .execute_entry(symbol, first_stage, signal.entry_price, "first_stage", None)
            .await
        {
            Ok(fill) => fill,
            Err(e) => {
                error!("First stage for {} failed: {}", symbol, e);
                // Release the risk reserved during sizing.
                self.risk.update_position(symbol, PositionAction::Close).await;
                return Ok(false);
            }
        };

        let stop_loss = fill.avg_price * INITIAL_STOP_FACTOR;
        let target_profit = fill.avg_price * (Decimal::ONE + signal.profit_target);
        let mut position = Position::new(
            symbol.clone(),
            fill.avg_price,
            fill.size,
            stop_loss,
            target_profit,
            signal.sector.clone(),
        );
        position.orders.push(ExecutedFill {
            order_id: fill.order_id.clone(),
            size: fill.size,
            avg_price: fill.avg_price,
            stage: fill.stage.clone(),
            timestamp: fill.timestamp,
        });

        self.setup_second_stage(&mut position, total_size * FIRST_STAGE_FRACTION)
            .await;

        match self
            .executor
            .set_stop_loss(symbol, stop_loss, fill.size, None)
            .await
        {
            Ok(stop) => {
                position.soft_stop = stop.soft;
                position.stop_order_id = stop.order_id;
            }
            Err(e) => {
                warn!("Stop for {} not placed ({}), enforcing in monitor", symbol, e);
                position.soft_stop = true;
            }
        }

        self.risk
            .update_position(symbol, PositionAction::Open { size: total_size })
            .await;

        info!(
            "{} first stage filled: size={} avg={} stop={} target={}",
            symbol, fill.size, fill.avg_price, stop_loss, target_profit
        );
        self.positions.write().await.insert(symbol.clone(), position);
        Ok(true)
    }

    /// Arms the second half of the position behind `previous_high * 1.005`
    /// with an RSI sanity cap.
    async fn setup_second_stage(&self, position: &mut Position, size: Decimal) {
        let symbol = &position.symbol;
        let previous_high = match self
            .indicators
            .previous_high(symbol, PREVIOUS_HIGH_DAYS)
            .await
        {
            Some(high) => high,
            None => {
                warn!("No previous high for {}, skipping second stage", symbol);
                return;
            }
        };

        let condition = TriggerCondition {
            kind: TriggerKind::PriceAbove,
            price: previous_high,
        };
        let limit_price = previous_high * SECOND_STAGE_PRICE_MARKUP;

        match self
            .executor
            .set_conditional_order(symbol, size, limit_price, "second_stage", condition, None)
            .await
        {
            Ok(conditional) => {
                info!(
                    "{} second stage armed at {} (soft={})",
                    symbol, previous_high, conditional.soft
                );
                position.second_stage = Some(SecondStageEntry {
                    order_id: conditional.order_id,
                    trigger: condition,
                    limit_price: conditional.limit_price,
                    size: conditional.size,
                    rsi_below: SECOND_STAGE_RSI_CAP,
                });
            }
            Err(e) => warn!("Second stage for {} not armed: {}", symbol, e),
        }
    }

    /// One monitor pass over every open position. A failure on one symbol
    /// never reaches its siblings.
    pub async fn monitor_positions(&self) {
        let symbols: Vec<Symbol> = self.positions.read().await.keys().cloned().collect();
        for symbol in symbols {
            if let Err(e) = self.monitor_position(&symbol).await {
                error!("Monitoring {} failed: {:#}", symbol, e);
            }
        }
    }

    async fn monitor_position(&self, symbol: &Symbol) -> Result<()> {
        let price = match self.data.current_price(symbol).await {
            Some(price) => price,
            None => return Ok(()),
        };

        let mut position = match self.positions.read().await.get(symbol) {
            Some(position) => position.clone(),
            None => return Ok(()),
        };

        if position.stage == 1 {
            self.check_second_stage(&mut position, price).await;
        }

        // Soft stop is enforced here when the venue holds no native stop.
        if position.soft_stop && price <= position.stop_loss {
            info!(
                "{} soft stop hit at {} (stop {})",
                symbol, price, position.stop_loss
            );
            self.close_position(position, price, "stop_loss").await;
            return Ok(());
        }

        self.check_trailing_stop(&mut position, price).await;

        let profit_pct = position.profit_pct(price);
        let target_pct = position.target_pct();

        if profit_pct >= target_pct * dec!(0.8) && !position.tp1_done {
            if self
                .execute_take_profit(&mut position, TP1_FRACTION, price)
                .await
            {
                position.tp1_done = true;
                info!("{} take-profit 1 done (30% at {})", symbol, price);
            }
        } else if profit_pct >= target_pct && !position.tp2_done {
            if self
                .execute_take_profit(&mut position, TP2_FRACTION, price)
                .await
            {
                position.tp2_done = true;
                info!("{} take-profit 2 done (40% at {})", symbol, price);
            }
        } else if profit_pct >= target_pct * dec!(1.2) && !position.tp3_done {
            if self
                .execute_take_profit(&mut position, TP3_FRACTION, price)
                .await
            {
                position.tp3_done = true;
                info!("{} take-profit 3 done (30% at {}), ladder complete", symbol, price);
                self.drop_position(position).await;
                return Ok(());
            }
        }

        // Time stop: stale positions that never went anywhere are cut.
        if position.age() > chrono::Duration::hours(TIME_STOP_HOURS)
            && profit_pct < TIME_STOP_MIN_PROFIT_PCT
        {
            info!(
                "{} time stop: {:.2}% after {}h",
                symbol,
                profit_pct,
                position.age().num_hours()
            );
            self.close_position(position, price, "time_stop").await;
            return Ok(());
        }

        self.positions
            .write()
            .await
            .insert(symbol.clone(), position);
        Ok(())
    }

    /// Fires the armed second stage once price breaks the trigger while RSI
    /// stays under the cap. The conditional is consumed either way once it
    /// has fired.
    async fn check_second_stage(&self, position: &mut Position, price: Decimal) {
        let second_stage = match &position.second_stage {
            Some(second_stage) => second_stage.clone(),
            None => return,
        };

        let triggered = match second_stage.trigger.kind {
            TriggerKind::PriceAbove => price >= second_stage.trigger.price,
            TriggerKind::PriceBelow => price <= second_stage.trigger.price,
        };
        if !triggered {
            return;
        }

        let rsi_ok = self
            .indicators
            .rsi(&position.symbol)
            .await
            .map(|rsi| rsi < second_stage.rsi_below)
            .unwrap_or(false);
        if !rsi_ok {
            return;
        }

        match self
            .executor
            .execute_entry(
                &position.symbol,
                second_stage.size,
                second_stage.limit_price,
                "second_stage",
                None,
            )
            .await
        {
            Ok(fill) => {
                let total = position.position_size + fill.size;
                if total > Decimal::ZERO {
                    position.entry_price = (position.entry_price * position.position_size
                        + fill.avg_price * fill.size)
                        / total;
                }
                position.position_size = total;
                position.stage = 2;
                position.orders.push(ExecutedFill {
                    order_id: fill.order_id,
                    size: fill.size,
                    avg_price: fill.avg_price,
                    stage: fill.stage,
                    timestamp: fill.timestamp,
                });
                position.second_stage = None;
                info!(
                    "{} second stage filled: size now {}, entry {}",
                    position.symbol, position.position_size, position.entry_price
                );
            }
            Err(e) => {
                warn!(
                    "{} second stage entry failed ({}), disarming",
                    position.symbol, e
                );
                position.second_stage = None;
            }
        }
    }

    /// Once up 3% on entry, the stop chases price: never below entry, one
    /// step up at a time, and never downward.
    async fn check_trailing_stop(&self, position: &mut Position, price: Decimal) {
        if position.entry_price.is_zero()
            || price / position.entry_price <= TRAILING_ACTIVATION
        {
            return;
        }

        let candidate = position
            .entry_price
            .max(position.stop_loss * TRAILING_STOP_STEP);
        if !position.raise_stop(candidate) {
            return;
        }

        info!("{} trailing stop raised to {}", position.symbol, candidate);
        if !position.soft_stop {
            match self
                .executor
                .update_stop_loss(&position.symbol, candidate, position.position_size, None)
                .await
            {
                Ok(stop) => {
                    position.stop_order_id = stop.order_id;
                    position.soft_stop = stop.soft;
                }
                Err(e) => warn!(
                    "{} stop update failed ({}), keeping previous order",
                    position.symbol, e
                ),
            }
        }
    }

    /// Sells a fraction of the remaining size. Returns whether the exit
    /// executed; on success the position and risk counters are reduced.
    async fn execute_take_profit(
        &self,
        position: &mut Position,
        fraction: Decimal,
        price: Decimal,
    ) -> bool {
        let size = position.position_size * fraction;
        match self
            .executor
            .execute_exit(&position.symbol, size, price, "take_profit", None)
            .await
        {
            Ok(fill) => {
                position.reduce(fill.size);
                self.risk
                    .update_position(
                        &position.symbol,
                        PositionAction::PartialClose { size: fill.size },
                    )
                    .await;
                self.tracker
                    .record_trade(
                        &position.symbol,
                        "take_profit",
                        position.entry_price,
                        fill.avg_price,
                        fill.size,
                        Decimal::ZERO,
                    )
                    .await;
                true
            }
            Err(e) => {
                error!("Take profit for {} failed: {}", position.symbol, e);
                false
            }
        }
    }

    /// Sells the whole remaining position and forgets it.
    async fn close_position(&self, position: Position, price: Decimal, reason: &str) {
        match self
            .executor
            .execute_exit(&position.symbol, position.position_size, price, reason, None)
            .await
        {
            Ok(fill) => {
                self.tracker
                    .record_trade(
                        &position.symbol,
                        reason,
                        position.entry_price,
                        fill.avg_price,
                        fill.size,
                        Decimal::ZERO,
                    )
                    .await;
                self.drop_position(position).await;
            }
            Err(e) => {
                error!("Closing {} failed: {}", position.symbol, e);
                // Keep the position so the next monitor pass retries.
                self.positions
                    .write()
                    .await
                    .insert(position.symbol.clone(), position);
            }
        }
    }

    /// Removes all engine state for a finished position, cancelling any
    /// resting exchange orders it still owns.
    async fn drop_position(&self, position: Position) {
        if let Some(order_id) = &position.stop_order_id {
            if let Err(e) = self
                .executor
                .cancel_order(&position.symbol, order_id, None)
                .await
            {
                warn!("Cancelling stop for {} failed: {}", position.symbol, e);
            }
        }
        if let Some(second_stage) = &position.second_stage {
            if let Some(order_id) = &second_stage.order_id {
                if let Err(e) = self
                    .executor
                    .cancel_order(&position.symbol, order_id, None)
                    .await
                {
                    warn!("Cancelling conditional for {} failed: {}", position.symbol, e);
                }
            }
        }

        self.risk
            .update_position(&position.symbol, PositionAction::Close)
            .await;
        self.positions.write().await.remove(&position.symbol);
        info!("{} position closed out", position.symbol);
    }

    pub async fn position(&self, symbol: &Symbol) -> Option<Position> {
        self.positions.read().await.get(symbol).cloned()
    }

    pub async fn open_position_count(&self) -> usize {
        self.positions.read().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn inject_position(&self, position: Position) {
        self.positions
            .write()
            .await
            .insert(position.symbol.clone(), position);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::testutil::StubExchange;
    use crate::exchange::Exchange;
    use chrono::{Duration as ChronoDuration, Utc};
    use crate::types::{Candle, MarketState, TimeFrame};

    struct Harness {
        stub: Arc<StubExchange>,
        engine: Arc<TradingEngine>,
        _dir: tempfile::TempDir,
    }

    fn daily_candles(n: usize, close: Decimal, high: Decimal) -> Vec<Candle> {
        let start = Utc::now() - ChronoDuration::days(n as i64);
        (0..n)
            .map(|i| Candle {
                timestamp: start + ChronoDuration::days(i as i64),
                open: close,
                high,
                low: close,
                close,
                volume: dec!(1000),
            })
            .collect()
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubExchange::new());
        stub.add_market("SOL/USDT");
        stub.set_book("SOL/USDT", dec!(99.99), dec!(100.01));
        stub.set_price("SOL/USDT", dec!(100));
        stub.set_candles("SOL/USDT", TimeFrame::D1, daily_candles(10, dec!(100), dec!(110)));

        let mut exchanges: HashMap<String, Arc<dyn Exchange>> = HashMap::new();
        exchanges.insert("stub".to_string(), Arc::clone(&stub) as Arc<dyn Exchange>);

        let mut cache = MarketDataCache::new(
            exchanges.clone(),
            "stub".to_string(),
            vec!["USDT".to_string()],
            Duration::from_secs(60),
        );
        cache.set_ticker_ttl(Duration::ZERO);
        let data = Arc::new(cache);

        let indicators = Arc::new(IndicatorService::new(
            Arc::clone(&data),
            Duration::from_secs(60),
        ));
        let config = Arc::new(Config::default());
        let analyzer = Arc::new(MarketAnalyzer::new(
            Arc::clone(&data),
            Arc::clone(&indicators),
            config.sectors.clone(),
            Duration::from_secs(300),
            None,
            false,
        ));
        let signals = Arc::new(SignalGenerator::new(
            Arc::clone(&indicators),
            Arc::clone(&analyzer),
        ));
        let risk = Arc::new(RiskManager::new(
            crate::risk::RiskParams {
                max_risk_per_trade: dec!(2),
                max_total_risk: dec!(10),
                max_sector_allocation: dec!(0.5),
                account_balance: dec!(10000),
            },
            Arc::clone(&indicators),
            Arc::clone(&data),
        ));
        let executor = Arc::new(
            OrderExecutor::new(
                exchanges,
                "stub".to_string(),
                true,
                dec!(100000),
                dec!(10),
                dir.path().join("logs"),
            )
            .unwrap(),
        );
        let tracker = Arc::new(
            PerformanceTracker::new(dir.path().join("data"), dec!(10000)).unwrap(),
        );

        let engine = Arc::new(TradingEngine::new(
            config,
            data,
            indicators,
            analyzer,
            signals,
            risk,
            executor,
            tracker,
            EngineOptions::default(),
        ));

        Harness {
            stub,
            engine,
            _dir: dir,
        }
    }

    fn signal() -> Signal {
        Signal {
            symbol: Symbol::from("SOL/USDT"),
            momentum: dec!(6),
            volume_ratio: dec!(2),
            rsi: dec!(55),
            entry_price: dec!(100),
            atr: dec!(4),
            profit_target: dec!(0.06),
            sector: None,
            score: dec!(61.5),
            market_state: MarketState::Bull,
            timestamp: Utc::now(),
        }
    }

    fn set_price(h: &Harness, price: Decimal) {
        h.stub.set_price("SOL/USDT", price);
        h.stub
            .set_book("SOL/USDT", price - dec!(0.01), price + dec!(0.01));
    }

    #[tokio::test]
    async fn test_entry_builds_two_stage_position() {
        let h = harness().await;
        assert!(h.engine.execute_entry(&signal()).await.unwrap());

        let position = h.engine.position(&Symbol::from("SOL/USDT")).await.unwrap();
        // Half the sized position entered at the ask.
        assert_eq!(position.stage, 1);
        assert_eq!(position.entry_price, dec!(100.01));
        assert_eq!(position.stop_loss, position.entry_price * dec!(0.98));
        assert_eq!(
            position.target_profit,
            position.entry_price * dec!(1.06)
        );
        // Second stage armed behind the 7-day high, soft on this venue.
        let second_stage = position.second_stage.as_ref().unwrap();
        assert_eq!(second_stage.trigger.price, dec!(110));
        assert!(second_stage.order_id.is_none());
        assert!(!position.tp1_done && !position.tp2_done && !position.tp3_done);
    }

    #[tokio::test]
    async fn test_take_profit_ladder_and_removal() {
        let h = harness().await;
        let symbol = Symbol::from("SOL/USDT");
        let mut position = Position::new(
            symbol.clone(),
            dec!(100),
            dec!(10),
            dec!(98),
            dec!(120),
            None,
        );
        position.stage = 2;
        h.engine.inject_position(position).await;

        // 17% of a 20% target: first rung sells 30%.
        set_price(&h, dec!(117));
        h.engine.monitor_positions().await;
        let p = h.engine.position(&symbol).await.unwrap();
        assert!(p.tp1_done && !p.tp2_done);
        assert_eq!(p.position_size, dec!(7.00));

        // At the target: second rung sells 40% of the remainder.
        set_price(&h, dec!(120));
        h.engine.monitor_positions().await;
        let p = h.engine.position(&symbol).await.unwrap();
        assert!(p.tp2_done);
        assert_eq!(p.position_size, dec!(4.20));

        // 1.2x the target: last rung fires and the record is removed.
        set_price(&h, dec!(124));
        h.engine.monitor_positions().await;
        assert!(h.engine.position(&symbol).await.is_none());
    }

    #[tokio::test]
    async fn test_trailing_stop_monotone() {
        let h = harness().await;
        let symbol = Symbol::from("SOL/USDT");
        let mut position = Position::new(
            symbol.clone(),
            dec!(100),
            dec!(10),
            dec!(98),
            dec!(200),
            None,
        );
        position.stage = 2;
        position.soft_stop = true;
        h.engine.inject_position(position).await;

        set_price(&h, dec!(104));
        h.engine.monitor_positions().await;
        let p = h.engine.position(&symbol).await.unwrap();
        // max(entry, 98 * 1.01) = entry
        assert_eq!(p.stop_loss, dec!(100));

        set_price(&h, dec!(105));
        h.engine.monitor_positions().await;
        let p = h.engine.position(&symbol).await.unwrap();
        assert_eq!(p.stop_loss, dec!(101.00));

        // Price falling back below the activation leaves the stop alone.
        set_price(&h, dec!(102));
        h.engine.monitor_positions().await;
        let p = h.engine.position(&symbol).await.unwrap();
        assert_eq!(p.stop_loss, dec!(101.00));
    }

    #[tokio::test]
    async fn test_time_stop_exits_stale_position() {
        let h = harness().await;
        let symbol = Symbol::from("SOL/USDT");
        let mut position = Position::new(
            symbol.clone(),
            dec!(100),
            dec!(10),
            dec!(98),
            dec!(120),
            None,
        );
        position.stage = 2;
        position.entry_time = Utc::now() - ChronoDuration::hours(5);
        h.engine.inject_position(position).await;

        // Up only 0.5% after five hours: cut it.
        set_price(&h, dec!(100.5));
        h.engine.monitor_positions().await;
        assert!(h.engine.position(&symbol).await.is_none());
    }

    #[tokio::test]
    async fn test_fresh_position_not_time_stopped() {
        let h = harness().await;
        let symbol = Symbol::from("SOL/USDT");
        let mut position = Position::new(
            symbol.clone(),
            dec!(100),
            dec!(10),
            dec!(98),
            dec!(120),
            None,
        );
        position.stage = 2;
        h.engine.inject_position(position).await;

        set_price(&h, dec!(100.5));
        h.engine.monitor_positions().await;
        assert!(h.engine.position(&symbol).await.is_some());
    }

    #[tokio::test]
    async fn test_soft_stop_enforced_by_monitor() {
        let h = harness().await;
        let symbol = Symbol::from("SOL/USDT");
        let mut position = Position::new(
            symbol.clone(),
            dec!(100),
            dec!(10),
            dec!(98),
            dec!(120),
            None,
        );
        position.stage = 2;
        position.soft_stop = true;
        h.engine.inject_position(position).await;

        set_price(&h, dec!(97.5));
        h.engine.monitor_positions().await;
        assert!(h.engine.position(&symbol).await.is_none());
    }

    #[tokio::test]
    async fn test_second_stage_fires_on_breakout() {
        let h = harness().await;
        let symbol = Symbol::from("SOL/USDT");

        // Flat hourly candles keep RSI near zero, under the cap.
        let start = Utc::now() - ChronoDuration::hours(50);
        let hourly: Vec<Candle> = (0..50)
            .map(|i| Candle {
                timestamp: start + ChronoDuration::hours(i),
                open: dec!(100),
                high: dec!(100),
                low: dec!(100),
                close: dec!(100),
                volume: dec!(10),
            })
            .collect();
        h.stub.set_candles("SOL/USDT", TimeFrame::H1, hourly);

        let mut position = Position::new(
            symbol.clone(),
            dec!(100),
            dec!(5),
            dec!(98),
            dec!(150),
            None,
        );
        position.second_stage = Some(SecondStageEntry {
            order_id: None,
            trigger: TriggerCondition {
                kind: TriggerKind::PriceAbove,
                price: dec!(110),
            },
            limit_price: dec!(110.55),
            size: dec!(5),
            rsi_below: dec!(70),
        });
        h.engine.inject_position(position).await;

        // Below the trigger nothing happens.
        set_price(&h, dec!(109));
        h.engine.monitor_positions().await;
        let p = h.engine.position(&symbol).await.unwrap();
        assert_eq!(p.stage, 1);
        assert!(p.second_stage.is_some());

        // Breakout: the reserved half fills and the stage advances.
        set_price(&h, dec!(111));
        h.engine.monitor_positions().await;
        let p = h.engine.position(&symbol).await.unwrap();
        assert_eq!(p.stage, 2);
        assert!(p.second_stage.is_none());
        assert_eq!(p.position_size, dec!(10));
        assert!(p.entry_price > dec!(100));
    }
}
