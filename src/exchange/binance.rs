#![allow(dead_code)]
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::str::FromStr;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::types::{
    Candle, MarketInfo, OrderBookSnapshot, Precision, Symbol, Ticker, TimeFrame, TriggerCondition,
};

use super::{Capability, Exchange, ExchangeOrder, ExchangeOrderKind, ExchangeOrderStatus};

const BINANCE_API: &str = "https://api.binance.com";
const BINANCE_TESTNET: &str = "https://testnet.binance.vision";
const REQUESTS_PER_SECOND: u32 = 10;

type HmacSha256 = Hmac<Sha256>;
type DirectLimiter = governor::DefaultDirectRateLimiter;

/// Binance spot adapter. Markets are loaded once and cached; all requests go
/// through a direct rate limiter to stay inside the venue's weight budget.
pub struct BinanceExchange {
    client: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
    limiter: DirectLimiter,
    markets: RwLock<HashMap<Symbol, MarketInfo>>,
}

impl BinanceExchange {
    pub fn new(api_key: String, secret_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            secret_key,
            base_url: BINANCE_API.to_string(),
            limiter: RateLimiter::direct(Quota::per_second(
                NonZeroU32::new(REQUESTS_PER_SECOND).expect("nonzero quota"),
            )),
            markets: RwLock::new(HashMap::new()),
        }
    }

    pub fn public_only() -> Self {
        Self::new(String::new(), String::new())
    }

    /// `BTC/USDT` -> `BTCUSDT`
    fn rest_symbol(symbol: &Symbol) -> String {
        symbol.as_str().replace('/', "")
    }

    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn build_signed_query(&self, params: &[(&str, String)]) -> String {
        let timestamp = Utc::now().timestamp_millis();
        let mut parts: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        parts.push(format!("timestamp={}", timestamp));
        parts.push("recvWindow=5000".to_string());
        let query = parts.join("&");
        let signature = self.sign(&query);
        format!("{}&signature={}", query, signature)
    }

    async fn place_order(&self, symbol: &Symbol, params: Vec<(&str, String)>) -> Result<ExchangeOrder> {
        self.limiter.until_ready().await;

        let query = self.build_signed_query(&params);
        let url = format!("{}/api/v3/order?{}", self.base_url, query);

        debug!("Placing order on {}: {:?}", symbol, params);

        let resp = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("order placement failed: {}", error_text));
        }

        let order: OrderResponse = resp.json().await?;
        convert_order(order, symbol)
    }

    fn parse_market(&self, info: &SymbolInfo) -> Option<MarketInfo> {
        if info.status != "TRADING" || !info.is_spot_trading_allowed {
            return None;
        }
        let symbol = Symbol::new(format!("{}/{}", info.base_asset, info.quote_asset));

        let mut amount_precision = Precision::Digits(info.base_asset_precision);
        let mut price_precision = Precision::Digits(8);
        let mut min_cost = None;

        for filter in &info.filters {
            match filter.filter_type.as_str() {
                "LOT_SIZE" => {
                    if let Some(step) = filter
                        .step_size
                        .as_deref()
                        .and_then(|s| Decimal::from_str(s).ok())
                    {
                        amount_precision = Precision::Step(step.normalize());
                    }
                }
                "PRICE_FILTER" => {
                    if let Some(tick) = filter
                        .tick_size
                        .as_deref()
                        .and_then(|s| Decimal::from_str(s).ok())
                    {
                        price_precision = Precision::Step(tick.normalize());
                    }
                }
                "NOTIONAL" | "MIN_NOTIONAL" => {
                    min_cost = filter
                        .min_notional
                        .as_deref()
                        .and_then(|s| Decimal::from_str(s).ok());
                }
                _ => {}
            }
        }

        Some(MarketInfo {
            symbol,
            amount_precision,
            price_precision,
            min_cost,
        })
    }
}

#[async_trait]
impl Exchange for BinanceExchange {
    fn id(&self) -> &str {
        "binance"
    }

    fn supports(&self, capability: Capability) -> bool {
        // Spot Binance hosts stop-loss-limit orders; buy-side trigger orders
        // have no spot equivalent, so conditionals fall back to soft markers.
        matches!(capability, Capability::StopLossOrder)
    }

    fn set_sandbox_mode(&mut self, enabled: bool) {
        self.base_url = if enabled {
            BINANCE_TESTNET.to_string()
        } else {
            BINANCE_API.to_string()
        };
        info!("Binance sandbox mode: {}", enabled);
    }

    async fn load_markets(&self) -> Result<Vec<MarketInfo>> {
        self.limiter.until_ready().await;

        let url = format!("{}/api/v3/exchangeInfo", self.base_url);
        let resp: ExchangeInfoResponse = self.client.get(&url).send().await?.json().await?;

        let mut markets = HashMap::new();
        for info in &resp.symbols {
            if let Some(market) = self.parse_market(info) {
                markets.insert(market.symbol.clone(), market);
            }
        }

        info!("Loaded {} Binance spot markets", markets.len());
        let list: Vec<MarketInfo> = markets.values().cloned().collect();
        *self.markets.write().await = markets;
        Ok(list)
    }

    async fn symbols(&self) -> Result<Vec<Symbol>> {
        let markets = self.markets.read().await;
        if markets.is_empty() {
            return Err(anyhow!("markets not loaded"));
        }
        let mut symbols: Vec<Symbol> = markets.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }

    async fn market(&self, symbol: &Symbol) -> Result<MarketInfo> {
        self.markets
            .read()
            .await
            .get(symbol)
            .cloned()
            .ok_or_else(|| anyhow!("unknown market {}", symbol))
    }

    async fn fetch_ticker(&self, symbol: &Symbol) -> Result<Ticker> {
        self.limiter.until_ready().await;

        let url = format!(
            "{}/api/v3/ticker/24hr?symbol={}",
            self.base_url,
            Self::rest_symbol(symbol)
        );
        let resp: TickerResponse = self.client.get(&url).send().await?.json().await?;

        Ok(Ticker {
            symbol: symbol.clone(),
            last: Decimal::from_str(&resp.last_price)?,
            quote_volume_24h: Decimal::from_str(&resp.quote_volume)?,
            percentage_24h: Decimal::from_str(&resp.price_change_percent)?,
            bid: Decimal::from_str(&resp.bid_price).ok(),
            ask: Decimal::from_str(&resp.ask_price).ok(),
            timestamp: Utc::now(),
        })
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &Symbol,
        timeframe: TimeFrame,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        self.limiter.until_ready().await;

        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            Self::rest_symbol(symbol),
            timeframe.as_str(),
            limit
        );

        let rows: Vec<Vec<serde_json::Value>> = self.client.get(&url).send().await?.json().await?;

        rows.into_iter()
            .map(|k| {
                let open_time = k.first().and_then(|v| v.as_i64()).unwrap_or(0);
                let open = k.get(1).and_then(|v| v.as_str()).unwrap_or("0");
                let high = k.get(2).and_then(|v| v.as_str()).unwrap_or("0");
                let low = k.get(3).and_then(|v| v.as_str()).unwrap_or("0");
                let close = k.get(4).and_then(|v| v.as_str()).unwrap_or("0");
                let volume = k.get(5).and_then(|v| v.as_str()).unwrap_or("0");

                Ok(Candle {
                    timestamp: Utc
                        .timestamp_millis_opt(open_time)
                        .single()
                        .unwrap_or_else(Utc::now),
                    open: Decimal::from_str(open)?,
                    high: Decimal::from_str(high)?,
                    low: Decimal::from_str(low)?,
                    close: Decimal::from_str(close)?,
                    volume: Decimal::from_str(volume)?,
                })
            })
            .collect()
    }

    async fn fetch_order_book(&self, symbol: &Symbol, depth: u32) -> Result<OrderBookSnapshot> {
        self.limiter.until_ready().await;

        let url = format!(
            "{}/api/v3/depth?symbol={}&limit={}",
            self.base_url,
            Self::rest_symbol(symbol),
            depth
        );
        let resp: OrderBookResponse = self.client.get(&url).send().await?.json().await?;

        let parse_side = |levels: Vec<(String, String)>| -> Result<Vec<(Decimal, Decimal)>> {
            levels
                .into_iter()
                .map(|(p, q)| Ok((Decimal::from_str(&p)?, Decimal::from_str(&q)?)))
                .collect()
        };

        Ok(OrderBookSnapshot {
            symbol: symbol.clone(),
            bids: parse_side(resp.bids)?,
            asks: parse_side(resp.asks)?,
        })
    }

    async fn create_limit_buy_order(
        &self,
        symbol: &Symbol,
        amount: Decimal,
        price: Decimal,
    ) -> Result<ExchangeOrder> {
        self.place_order(
            symbol,
            vec![
                ("symbol", Self::rest_symbol(symbol)),
                ("side", "BUY".to_string()),
                ("type", "LIMIT".to_string()),
                ("timeInForce", "GTC".to_string()),
                ("quantity", amount.to_string()),
                ("price", price.to_string()),
            ],
        )
        .await
    }

    async fn create_limit_sell_order(
        &self,
        symbol: &Symbol,
        amount: Decimal,
        price: Decimal,
    ) -> Result<ExchangeOrder> {
        self.place_order(
            symbol,
            vec![
                ("symbol", Self::rest_symbol(symbol)),
                ("side", "SELL".to_string()),
                ("type", "LIMIT".to_string()),
                ("timeInForce", "GTC".to_string()),
                ("quantity", amount.to_string()),
                ("price", price.to_string()),
            ],
        )
        .await
    }

    async fn create_market_buy_order(
        &self,
        symbol: &Symbol,
        amount: Decimal,
    ) -> Result<ExchangeOrder> {
        self.place_order(
            symbol,
            vec![
                ("symbol", Self::rest_symbol(symbol)),
                ("side", "BUY".to_string()),
                ("type", "MARKET".to_string()),
                ("quantity", amount.to_string()),
            ],
        )
        .await
    }

    async fn create_market_sell_order(
        &self,
        symbol: &Symbol,
        amount: Decimal,
    ) -> Result<ExchangeOrder> {
        self.place_order(
            symbol,
            vec![
                ("symbol", Self::rest_symbol(symbol)),
                ("side", "SELL".to_string()),
                ("type", "MARKET".to_string()),
                ("quantity", amount.to_string()),
            ],
        )
        .await
    }

    async fn create_stop_loss_order(
        &self,
        symbol: &Symbol,
        amount: Decimal,
        stop_price: Decimal,
    ) -> Result<ExchangeOrder> {
        // Limit leg 0.5% under the trigger so the order fills through a gap.
        let limit_price = stop_price * Decimal::from_str("0.995")?;
        self.place_order(
            symbol,
            vec![
                ("symbol", Self::rest_symbol(symbol)),
                ("side", "SELL".to_string()),
                ("type", "STOP_LOSS_LIMIT".to_string()),
                ("timeInForce", "GTC".to_string()),
                ("quantity", amount.to_string()),
                ("stopPrice", stop_price.to_string()),
                ("price", limit_price.to_string()),
            ],
        )
        .await
    }

    async fn create_trigger_order(
        &self,
        _symbol: &Symbol,
        _amount: Decimal,
        _price: Decimal,
        _trigger: TriggerCondition,
    ) -> Result<ExchangeOrder> {
        Err(anyhow!("binance spot does not host buy-side trigger orders"))
    }

    async fn fetch_order(&self, order_id: &str, symbol: &Symbol) -> Result<ExchangeOrder> {
        self.limiter.until_ready().await;

        let query = self.build_signed_query(&[
            ("symbol", Self::rest_symbol(symbol)),
            ("orderId", order_id.to_string()),
        ]);
        let url = format!("{}/api/v3/order?{}", self.base_url, query);

        let resp = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("get order failed: {}", error_text));
        }

        let order: OrderResponse = resp.json().await?;
        convert_order(order, symbol)
    }

    async fn cancel_order(&self, order_id: &str, symbol: &Symbol) -> Result<()> {
        self.limiter.until_ready().await;

        let query = self.build_signed_query(&[
            ("symbol", Self::rest_symbol(symbol)),
            ("orderId", order_id.to_string()),
        ]);
        let url = format!("{}/api/v3/order?{}", self.base_url, query);

        let resp = self
            .client
            .delete(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("order cancellation failed: {}", error_text));
        }

        info!("Order {} cancelled", order_id);
        Ok(())
    }

    async fn fetch_open_orders(&self, symbol: &Symbol) -> Result<Vec<ExchangeOrder>> {
        self.limiter.until_ready().await;

        let query = self.build_signed_query(&[("symbol", Self::rest_symbol(symbol))]);
        let url = format!("{}/api/v3/openOrders?{}", self.base_url, query);

        let resp = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("fetch open orders failed: {}", error_text));
        }

        let orders: Vec<OrderResponse> = resp.json().await?;
        orders.into_iter().map(|o| convert_order(o, symbol)).collect()
    }
}

fn convert_order(resp: OrderResponse, symbol: &Symbol) -> Result<ExchangeOrder> {
    let status = match resp.status.as_str() {
        "FILLED" => ExchangeOrderStatus::Closed,
        "CANCELED" | "REJECTED" | "EXPIRED" => ExchangeOrderStatus::Canceled,
        _ => ExchangeOrderStatus::Open,
    };

    let kind = match resp.order_type.as_str() {
        "MARKET" => ExchangeOrderKind::Market,
        "STOP_LOSS" | "STOP_LOSS_LIMIT" => ExchangeOrderKind::StopLoss,
        _ => ExchangeOrderKind::Limit,
    };

    let amount = Decimal::from_str(&resp.orig_qty)?;
    let filled = Decimal::from_str(&resp.executed_qty)?;

    let average = resp
        .cummulative_quote_qty
        .as_deref()
        .and_then(|q| Decimal::from_str(q).ok())
        .and_then(|quote| {
            if filled.is_zero() {
                None
            } else {
                Some(quote / filled)
            }
        });

    Ok(ExchangeOrder {
        id: resp.order_id.to_string(),
        symbol: symbol.clone(),
        status,
        kind,
        amount,
        filled,
        remaining: amount - filled,
        price: resp.price.as_deref().and_then(|p| Decimal::from_str(p).ok()),
        average,
    })
}

// API response types

#[derive(Debug, Deserialize)]
struct ExchangeInfoResponse {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    status: String,
    #[serde(rename = "baseAsset")]
    base_asset: String,
    #[serde(rename = "quoteAsset")]
    quote_asset: String,
    #[serde(rename = "baseAssetPrecision")]
    base_asset_precision: u32,
    #[serde(rename = "isSpotTradingAllowed", default)]
    is_spot_trading_allowed: bool,
    #[serde(default)]
    filters: Vec<SymbolFilter>,
}

#[derive(Debug, Deserialize)]
struct SymbolFilter {
    #[serde(rename = "filterType")]
    filter_type: String,
    #[serde(rename = "stepSize")]
    step_size: Option<String>,
    #[serde(rename = "tickSize")]
    tick_size: Option<String>,
    #[serde(rename = "minNotional")]
    min_notional: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TickerResponse {
    #[serde(rename = "lastPrice")]
    last_price: String,
    #[serde(rename = "bidPrice")]
    bid_price: String,
    #[serde(rename = "askPrice")]
    ask_price: String,
    #[serde(rename = "quoteVolume")]
    quote_volume: String,
    #[serde(rename = "priceChangePercent")]
    price_change_percent: String,
}

#[derive(Debug, Deserialize)]
struct OrderBookResponse {
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(rename = "orderId")]
    order_id: u64,
    status: String,
    #[serde(rename = "type")]
    order_type: String,
    #[serde(rename = "origQty")]
    orig_qty: String,
    #[serde(rename = "executedQty")]
    executed_qty: String,
    price: Option<String>,
    #[serde(rename = "cummulativeQuoteQty")]
    cummulative_quote_qty: Option<String>,
}
