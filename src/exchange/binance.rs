//! Binance market-data adapter (spot and USD-M futures REST).
//!
//! Klines arrive as positional JSON arrays
//! `[openTimeMs, open, high, low, close, volume, closeTimeMs, ..., trades, ...]`
//! with numbers quoted as strings. Fields a payload omits are zero-filled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::cache::TtlCache;
use crate::exchange::{
    MarketDataProvider, ProviderCredentials, ProviderError, RequestGuard, REQUEST_TIMEOUT,
};
use crate::resilience::RateLimiter;
use crate::timeutil::{floor_to_interval, Interval};
use crate::types::{Candle, MarketSnapshot, Ticker24h};

/// Which Binance market the adapter talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinanceMarket {
    Spot,
    UsdFutures,
}

impl BinanceMarket {
    fn base_url(self) -> &'static str {
        match self {
            BinanceMarket::Spot => "https://api.binance.com",
            BinanceMarket::UsdFutures => "https://fapi.binance.com",
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            BinanceMarket::Spot => "/api/v3",
            BinanceMarket::UsdFutures => "/fapi/v1",
        }
    }
}

pub struct BinanceProvider {
    http: reqwest::Client,
    market: BinanceMarket,
    guard: RequestGuard,
    candle_cache: Option<TtlCache<Vec<Candle>>>,
    initialized: AtomicBool,
}

impl BinanceProvider {
    pub fn new(
        credentials: ProviderCredentials,
        market: BinanceMarket,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let mut headers = reqwest::header::HeaderMap::new();
        if !credentials.api_key.is_empty() {
            if let Ok(value) = reqwest::header::HeaderValue::from_str(&credentials.api_key) {
                headers.insert("X-MBX-APIKEY", value);
            }
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()
            .expect("reqwest client construction cannot fail with static options");

        Self {
            http,
            market,
            guard: RequestGuard::new(limiter),
            candle_cache: None,
            initialized: AtomicBool::new(false),
        }
    }

    /// Enables TTL caching of candle responses.
    pub fn with_cache(mut self, cache: TtlCache<Vec<Candle>>) -> Self {
        self.candle_cache = Some(cache);
        self
    }

    fn url(&self, endpoint: &str) -> String {
        format!(
            "{}{}{}",
            self.market.base_url(),
            self.market.prefix(),
            endpoint
        )
    }

    async fn get_json(&self, label: &str, url: String) -> Result<Value, ProviderError> {
        self.guard
            .run(label, || {
                let http = self.http.clone();
                let url = url.clone();
                async move {
                    let response = http.get(&url).send().await?;
                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(ProviderError::Http {
                            status: status.as_u16(),
                            body,
                        });
                    }
                    response.json::<Value>().await.map_err(ProviderError::from)
                }
            })
            .await
    }

    async fn ensure_initialized(&self) -> Result<(), ProviderError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        self.initialize().await
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<RawTicker, ProviderError> {
        self.ensure_initialized().await?;
        let url = self.url(&format!("/ticker/24hr?symbol={}", symbol));
        let value = self.get_json("ticker_24h", url).await?;
        serde_json::from_value(value)
            .map_err(|e| ProviderError::Payload(format!("ticker decode: {}", e)))
    }
}

#[async_trait]
impl MarketDataProvider for BinanceProvider {
    fn name(&self) -> &'static str {
        match self.market {
            BinanceMarket::Spot => "binance",
            BinanceMarket::UsdFutures => "binance-futures",
        }
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        let url = self.url("/ping");
        self.get_json("ping", url).await?;
        self.initialized.store(true, Ordering::Release);
        info!(provider = self.name(), "Connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ProviderError> {
        // Plain REST: nothing to tear down beyond forgetting the state.
        self.initialized.store(false, Ordering::Release);
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        if !self.initialized.load(Ordering::Acquire) {
            return false;
        }
        let url = self.url("/ping");
        self.get_json("health_ping", url).await.is_ok()
    }

    async fn get_market_snapshot(&self, symbol: &str) -> Result<MarketSnapshot, ProviderError> {
        let ticker = self.fetch_ticker(symbol).await?;
        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            price: parse_decimal(&ticker.last_price),
            volume: parse_decimal(&ticker.volume),
            timestamp: ticker
                .close_time
                .and_then(DateTime::from_timestamp_millis)
                .unwrap_or_else(Utc::now),
            change_24h: Some(parse_decimal(&ticker.price_change)),
            change_percent_24h: Some(parse_decimal(&ticker.price_change_percent)),
        })
    }

    async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, ProviderError> {
        self.ensure_initialized().await?;

        let cache_key = format!("{}:{}:{}:{}", self.name(), symbol, interval, limit);
        if let Some(cache) = &self.candle_cache {
            if let Some(hit) = cache.get(&cache_key).await {
                debug!(symbol, %interval, "Candle cache hit");
                return Ok(hit);
            }
        }

        let url = self.url(&format!(
            "/klines?symbol={}&interval={}&limit={}",
            symbol,
            interval.as_str(),
            limit
        ));
        let value = self.get_json("klines", url).await?;
        let rows = value
            .as_array()
            .ok_or_else(|| ProviderError::Payload("klines payload is not an array".into()))?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            candles.push(parse_kline(symbol, interval, row)?);
        }

        if let Some(cache) = &self.candle_cache {
            cache.set(&cache_key, candles.clone()).await;
        }
        Ok(candles)
    }

    async fn get_ticker_24h(&self, symbol: &str) -> Result<Ticker24h, ProviderError> {
        let raw = self.fetch_ticker(symbol).await?;
        let last = parse_decimal(&raw.last_price);
        Ok(Ticker24h {
            symbol: symbol.to_string(),
            last,
            open: parse_decimal(&raw.open_price),
            high: parse_decimal(&raw.high_price),
            low: parse_decimal(&raw.low_price),
            close: last,
            bid: parse_decimal(&raw.bid_price),
            ask: parse_decimal(&raw.ask_price),
            vwap: parse_decimal(&raw.weighted_avg_price),
            base_volume: parse_decimal(&raw.volume),
            quote_volume: parse_decimal(&raw.quote_volume),
            change: parse_decimal(&raw.price_change),
            percentage: parse_decimal(&raw.price_change_percent),
            timestamp: raw.close_time.and_then(DateTime::from_timestamp_millis),
        })
    }
}

/// 24h ticker payload; every price arrives as a quoted string and absent
/// fields (futures tickers omit bid/ask) fall back to empty.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawTicker {
    last_price: String,
    price_change: String,
    price_change_percent: String,
    weighted_avg_price: String,
    open_price: String,
    high_price: String,
    low_price: String,
    volume: String,
    quote_volume: String,
    bid_price: String,
    ask_price: String,
    close_time: Option<i64>,
}

fn parse_decimal(s: &str) -> Decimal {
    s.parse().unwrap_or_default()
}

fn parse_f64(row: &Value, index: usize) -> f64 {
    row.get(index)
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0)
}

/// Decodes one kline row, aligning the bar to the requested interval:
/// open floored to the boundary, close = open + interval - 1ms.
fn parse_kline(symbol: &str, interval: Interval, row: &Value) -> Result<Candle, ProviderError> {
    let open_ms = row
        .get(0)
        .and_then(Value::as_i64)
        .ok_or_else(|| ProviderError::Payload("kline row missing open time".into()))?;
    let raw_open = DateTime::from_timestamp_millis(open_ms)
        .ok_or_else(|| ProviderError::Payload(format!("kline open time {} out of range", open_ms)))?;

    let open_time = floor_to_interval(raw_open, interval);
    let close_time = open_time + chrono::Duration::milliseconds(interval.duration_ms() - 1);

    Ok(Candle {
        symbol: symbol.to_string(),
        open_time,
        close_time,
        open: parse_f64(row, 1),
        high: parse_f64(row, 2),
        low: parse_f64(row, 3),
        close: parse_f64(row, 4),
        volume: parse_f64(row, 5),
        trades: row.get(8).and_then(Value::as_u64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parse_kline_row() {
        let row = json!([
            1_700_003_700_000_i64,
            "1.1000",
            "1.1050",
            "1.0990",
            "1.1020",
            "532.8",
            1_700_003_759_999_i64,
            "586.1",
            412,
            "250.0",
            "275.3",
            "0"
        ]);
        let candle = parse_kline("EURUSDT", Interval::OneMinute, &row).unwrap();
        assert_eq!(candle.open, 1.1);
        assert_eq!(candle.high, 1.105);
        assert_eq!(candle.close, 1.102);
        assert_eq!(candle.trades, Some(412));
        assert_eq!(candle.open_time.timestamp_millis(), 1_700_003_700_000);
        assert_eq!(candle.close_time.timestamp_millis(), 1_700_003_759_999);
        assert!(candle.is_well_formed());
    }

    #[test]
    fn test_parse_kline_aligns_to_interval() {
        // Open time 23s into the minute gets floored to the boundary.
        let row = json!([1_700_003_723_000_i64, "1.0", "1.0", "1.0", "1.0", "0"]);
        let candle = parse_kline("X", Interval::OneMinute, &row).unwrap();
        assert_eq!(candle.open_time.timestamp_millis(), 1_700_003_700_000);
        assert_eq!(
            candle.close_time.timestamp_millis() - candle.open_time.timestamp_millis(),
            59_999
        );
    }

    #[test]
    fn test_parse_kline_zero_fills_missing_fields() {
        let row = json!([1_700_003_700_000_i64]);
        let candle = parse_kline("X", Interval::OneMinute, &row).unwrap();
        assert_eq!(candle.open, 0.0);
        assert_eq!(candle.volume, 0.0);
        assert_eq!(candle.trades, None);
    }

    #[test]
    fn test_parse_kline_requires_open_time() {
        let row = json!(["not-a-timestamp", "1.0"]);
        assert!(parse_kline("X", Interval::OneMinute, &row).is_err());
    }

    #[test]
    fn test_ticker_decode_zero_fills() {
        // Futures tickers omit bid/ask entirely.
        let raw: RawTicker = serde_json::from_value(json!({
            "lastPrice": "42000.5",
            "volume": "1234.5",
            "priceChange": "-120.0",
            "priceChangePercent": "-0.28"
        }))
        .unwrap();
        assert_eq!(parse_decimal(&raw.bid_price), Decimal::ZERO);
        assert_eq!(parse_decimal(&raw.last_price), dec!(42000.5));
        assert_eq!(parse_decimal(&raw.price_change), dec!(-120.0));
    }

    #[test]
    fn test_market_urls() {
        assert_eq!(BinanceMarket::Spot.base_url(), "https://api.binance.com");
        assert_eq!(BinanceMarket::UsdFutures.prefix(), "/fapi/v1");
    }
}
