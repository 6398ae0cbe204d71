#![allow(dead_code)]
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::exchange::Exchange;
use crate::types::{Candle, OrderBookSnapshot, Symbol, Ticker, TimeFrame};

const MAX_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_secs(2);
const CALL_TIMEOUT: Duration = Duration::from_secs(10);
const TICKER_TTL: Duration = Duration::from_secs(10);
const ORDER_BOOK_TTL: Duration = Duration::from_secs(5);

struct TimedEntry<T> {
    value: T,
    fetched_at: Instant,
}

impl<T: Clone> TimedEntry<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
        }
    }

    fn get(&self, ttl: Duration) -> Option<T> {
        if self.fetched_at.elapsed() < ttl {
            Some(self.value.clone())
        } else {
            None
        }
    }
}

/// Shared market-data layer: pulls candles, tickers and order books through
/// the exchange adapters and memoizes each with its own TTL. A failed fetch
/// after all retries surfaces as `None` and callers skip the symbol for the
/// current scan; nothing here is fatal.
///
/// Each cache family has one internal mutex held only around map access,
/// never across network I/O, so callers on different symbols proceed in
/// parallel.
pub struct MarketDataCache {
    exchanges: HashMap<String, Arc<dyn Exchange>>,
    default_exchange: String,
    quote_currencies: Vec<String>,
    candle_ttl: Duration,
    ticker_ttl: Duration,
    candles: Mutex<HashMap<(Symbol, TimeFrame), TimedEntry<Vec<Candle>>>>,
    tickers: Mutex<HashMap<Symbol, TimedEntry<Ticker>>>,
    books: Mutex<HashMap<(Symbol, u32), TimedEntry<OrderBookSnapshot>>>,
    symbols: RwLock<HashMap<String, Vec<Symbol>>>,
}

impl MarketDataCache {
    pub fn new(
        exchanges: HashMap<String, Arc<dyn Exchange>>,
        default_exchange: String,
        quote_currencies: Vec<String>,
        candle_ttl: Duration,
    ) -> Self {
        Self {
            exchanges,
            default_exchange,
            quote_currencies,
            candle_ttl,
            ticker_ttl: TICKER_TTL,
            candles: Mutex::new(HashMap::new()),
            tickers: Mutex::new(HashMap::new()),
            books: Mutex::new(HashMap::new()),
            symbols: RwLock::new(HashMap::new()),
        }
    }

    pub fn default_exchange(&self) -> &str {
        &self.default_exchange
    }

    #[cfg(test)]
    pub(crate) fn set_ticker_ttl(&mut self, ttl: Duration) {
        self.ticker_ttl = ttl;
    }

    fn exchange(&self, exchange_id: Option<&str>) -> Option<Arc<dyn Exchange>> {
        let id = exchange_id.unwrap_or(&self.default_exchange);
        let found = self.exchanges.get(id).cloned();
        if found.is_none() {
            warn!("Exchange {} is not configured", id);
        }
        found
    }

    /// Loads markets on every configured exchange and caches the valid spot
    /// symbol universe per exchange.
    pub async fn init(&self) {
        for (id, exchange) in &self.exchanges {
            match timeout(Duration::from_secs(30), exchange.load_markets()).await {
                Ok(Ok(markets)) => {
                    let valid: Vec<Symbol> = markets
                        .into_iter()
                        .map(|m| m.symbol)
                        .filter(|s| s.is_valid_market(&self.quote_currencies))
                        .collect();
                    info!("{}: {} tradable symbols", id, valid.len());
                    self.symbols.write().await.insert(id.clone(), valid);
                }
                Ok(Err(e)) => warn!("Loading markets on {} failed: {}", id, e),
                Err(_) => warn!("Loading markets on {} timed out", id),
            }
        }
    }

    pub async fn tradable_symbols(&self, exchange_id: Option<&str>) -> Vec<Symbol> {
        let symbols = self.symbols.read().await;
        match exchange_id {
            Some(id) => symbols.get(id).cloned().unwrap_or_default(),
            None => {
                let mut all: Vec<Symbol> = symbols.values().flatten().cloned().collect();
                all.sort();
                all.dedup();
                all
            }
        }
    }

    async fn fetch_with_retry<T, F, Fut>(&self, what: &str, symbol: &Symbol, fetch: F) -> Option<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        for attempt in 1..=MAX_RETRIES {
            match timeout(CALL_TIMEOUT, fetch()).await {
                Ok(Ok(value)) => return Some(value),
                Ok(Err(e)) => {
                    warn!(
                        "Fetching {} for {} failed (attempt {}/{}): {}",
                        what, symbol, attempt, MAX_RETRIES, e
                    );
                }
                Err(_) => {
                    warn!(
                        "Fetching {} for {} timed out (attempt {}/{})",
                        what, symbol, attempt, MAX_RETRIES
                    );
                }
            }
            if attempt < MAX_RETRIES {
                sleep(RETRY_BACKOFF).await;
            }
        }
        None
    }

    /// Candles in ascending time order, most recent bar last. Served from
    /// cache while fresh and long enough for `limit`.
    pub async fn get_candles(
        &self,
        symbol: &Symbol,
        timeframe: TimeFrame,
        limit: u32,
    ) -> Option<Vec<Candle>> {
        let key = (symbol.clone(), timeframe);
        {
            let cache = self.candles.lock().await;
            if let Some(candles) = cache.get(&key).and_then(|e| e.get(self.candle_ttl)) {
                if candles.len() >= limit as usize {
                    let skip = candles.len() - limit as usize;
                    return Some(candles[skip..].to_vec());
                }
            }
        }

        let exchange = self.exchange(None)?;
        let candles = self
            .fetch_with_retry("candles", symbol, || {
                let exchange = Arc::clone(&exchange);
                let symbol = symbol.clone();
                async move { exchange.fetch_ohlcv(&symbol, timeframe, limit).await }
            })
            .await?;

        if candles.is_empty() {
            // An empty reply is not an error, but it is not worth caching.
            debug!("Empty candle reply for {} {}", symbol, timeframe);
            return None;
        }

        self.candles
            .lock()
            .await
            .insert(key, TimedEntry::new(candles.clone()));
        Some(candles)
    }

    pub async fn get_ticker(&self, symbol: &Symbol) -> Option<Ticker> {
        {
            let cache = self.tickers.lock().await;
            if let Some(ticker) = cache.get(symbol).and_then(|e| e.get(self.ticker_ttl)) {
                return Some(ticker);
            }
        }

        let exchange = self.exchange(None)?;
        let ticker = self
            .fetch_with_retry("ticker", symbol, || {
                let exchange = Arc::clone(&exchange);
                let symbol = symbol.clone();
                async move { exchange.fetch_ticker(&symbol).await }
            })
            .await?;

        self.tickers
            .lock()
            .await
            .insert(symbol.clone(), TimedEntry::new(ticker.clone()));
        Some(ticker)
    }

    pub async fn current_price(&self, symbol: &Symbol) -> Option<Decimal> {
        self.get_ticker(symbol).await.map(|t| t.last)
    }

    pub async fn get_order_book(&self, symbol: &Symbol, depth: u32) -> Option<OrderBookSnapshot> {
        let key = (symbol.clone(), depth);
        {
            let cache = self.books.lock().await;
            if let Some(book) = cache.get(&key).and_then(|e| e.get(ORDER_BOOK_TTL)) {
                return Some(book);
            }
        }

        let exchange = self.exchange(None)?;
        let book = self
            .fetch_with_retry("order book", symbol, || {
                let exchange = Arc::clone(&exchange);
                let symbol = symbol.clone();
                async move { exchange.fetch_order_book(&symbol, depth).await }
            })
            .await?;

        if book.bids.is_empty() && book.asks.is_empty() {
            return None;
        }

        self.books
            .lock()
            .await
            .insert(key, TimedEntry::new(book.clone()));
        Some(book)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::testutil::StubExchange;
    use chrono::{Duration as ChronoDuration, Utc};
    use rust_decimal_macros::dec;
    use std::sync::atomic::Ordering;

    fn daily_candles(n: usize) -> Vec<Candle> {
        let start = Utc::now() - ChronoDuration::days(n as i64);
        (0..n)
            .map(|i| Candle {
                timestamp: start + ChronoDuration::days(i as i64),
                open: dec!(100),
                high: dec!(110),
                low: dec!(95),
                close: dec!(105),
                volume: dec!(1000),
            })
            .collect()
    }

    fn cache_with(stub: Arc<StubExchange>) -> MarketDataCache {
        let mut exchanges: HashMap<String, Arc<dyn Exchange>> = HashMap::new();
        exchanges.insert("stub".to_string(), stub);
        MarketDataCache::new(
            exchanges,
            "stub".to_string(),
            vec!["USDT".to_string()],
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_candles_served_from_cache_within_ttl() {
        let stub = Arc::new(StubExchange::new());
        stub.set_candles("SOL/USDT", TimeFrame::D1, daily_candles(30));
        let cache = cache_with(Arc::clone(&stub));
        let symbol = Symbol::from("SOL/USDT");

        let first = cache.get_candles(&symbol, TimeFrame::D1, 20).await.unwrap();
        let second = cache.get_candles(&symbol, TimeFrame::D1, 20).await.unwrap();

        assert_eq!(first.len(), 20);
        assert_eq!(first.len(), second.len());
        assert_eq!(
            first.last().unwrap().timestamp,
            second.last().unwrap().timestamp
        );
        assert_eq!(stub.ohlcv_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_reply_is_not_cached() {
        let stub = Arc::new(StubExchange::new());
        let cache = cache_with(Arc::clone(&stub));
        let symbol = Symbol::from("SOL/USDT");

        assert!(cache.get_candles(&symbol, TimeFrame::D1, 20).await.is_none());
        assert!(cache.get_candles(&symbol, TimeFrame::D1, 20).await.is_none());
        // Both misses went to the adapter because nothing was cached.
        assert_eq!(stub.ohlcv_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ticker_cache_and_current_price() {
        let stub = Arc::new(StubExchange::new());
        stub.set_price("SOL/USDT", dec!(145.5));
        let cache = cache_with(Arc::clone(&stub));
        let symbol = Symbol::from("SOL/USDT");

        assert_eq!(cache.current_price(&symbol).await, Some(dec!(145.5)));
        assert_eq!(cache.current_price(&symbol).await, Some(dec!(145.5)));
        assert_eq!(stub.ticker_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_universe_filtering() {
        let stub = Arc::new(StubExchange::new());
        stub.add_market("SOL/USDT");
        stub.add_market("USDC/USDT");
        stub.add_market("ETH/USDT");
        let cache = cache_with(Arc::clone(&stub));

        cache.init().await;
        let symbols = cache.tradable_symbols(None).await;
        assert_eq!(
            symbols,
            vec![Symbol::from("ETH/USDT"), Symbol::from("SOL/USDT")]
        );
    }
}
