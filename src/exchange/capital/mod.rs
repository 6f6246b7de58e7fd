//! CFD broker adapter (Capital-style REST API).
//!
//! Unlike the crypto venues this broker is stateful: a session handshake
//! fetches the encryption key, then a credentialed session-create returns
//! two tokens (`CST`, `X-SECURITY-TOKEN`) that ride along on every request.
//! A keep-alive streaming channel pings every nine minutes so the session
//! survives idle stretches; disconnect closes the session explicitly.
//!
//! Prices arrive as bid/ask pairs; candles use the mid price.

pub mod session;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::cache::TtlCache;
use crate::exchange::{
    MarketDataProvider, ProviderCredentials, ProviderError, RequestGuard, REQUEST_TIMEOUT,
};
use crate::resilience::RateLimiter;
use crate::timeutil::{floor_to_interval, Interval};
use crate::types::{Candle, MarketSnapshot, Ticker24h};

use session::{spawn_keepalive, KeepAlive, SessionTokens};

const LIVE_BASE: &str = "https://api-capital.backend-capital.com";
const DEMO_BASE: &str = "https://demo-api-capital.backend-capital.com";
const STREAMING_URL: &str = "wss://api-streaming-capital.backend-capital.com/connect";

pub struct CapitalProvider {
    http: reqwest::Client,
    credentials: ProviderCredentials,
    guard: RequestGuard,
    base_url: &'static str,
    tokens: RwLock<Option<SessionTokens>>,
    keepalive: Mutex<Option<KeepAlive>>,
    candle_cache: Option<TtlCache<Vec<Candle>>>,
}

impl CapitalProvider {
    pub fn new(credentials: ProviderCredentials, limiter: Arc<RateLimiter>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        let base_url = if credentials.demo { DEMO_BASE } else { LIVE_BASE };

        Self {
            http,
            credentials,
            guard: RequestGuard::new(limiter),
            base_url,
            tokens: RwLock::new(None),
            keepalive: Mutex::new(None),
            candle_cache: None,
        }
    }

    pub fn with_cache(mut self, cache: TtlCache<Vec<Candle>>) -> Self {
        self.candle_cache = Some(cache);
        self
    }

    async fn ensure_session(&self) -> Result<SessionTokens, ProviderError> {
        if let Some(tokens) = self.tokens.read().await.clone() {
            return Ok(tokens);
        }
        self.initialize().await?;
        self.tokens
            .read()
            .await
            .clone()
            .ok_or_else(|| ProviderError::Session("session handshake left no tokens".into()))
    }

    /// GET with the session token pair attached, decoded as `T`.
    async fn authed_get<T: serde::de::DeserializeOwned>(
        &self,
        label: &str,
        path: String,
    ) -> Result<T, ProviderError> {
        let tokens = self.ensure_session().await?;
        let url = format!("{}{}", self.base_url, path);
        self.guard
            .run(label, || {
                let http = self.http.clone();
                let url = url.clone();
                let tokens = tokens.clone();
                async move {
                    let response = http
                        .get(&url)
                        .header("CST", &tokens.cst)
                        .header("X-SECURITY-TOKEN", &tokens.security_token)
                        .send()
                        .await?;
                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(ProviderError::Http {
                            status: status.as_u16(),
                            body,
                        });
                    }
                    response.json::<T>().await.map_err(ProviderError::from)
                }
            })
            .await
    }

    async fn fetch_market(&self, symbol: &str) -> Result<MarketDetails, ProviderError> {
        self.authed_get("market_details", format!("/api/v1/markets/{}", symbol))
            .await
    }
}

#[async_trait]
impl MarketDataProvider for CapitalProvider {
    fn name(&self) -> &'static str {
        "capital"
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        let identifier = self
            .credentials
            .identifier
            .clone()
            .ok_or_else(|| ProviderError::Credentials("broker identifier missing".into()))?;

        // Step 1: encryption key. The venue requires the fetch before a
        // session create even for plaintext credentials.
        let key_url = format!("{}/api/v1/session/encryptionKey", self.base_url);
        let _key: EncryptionKeyResponse = self
            .guard
            .run("encryption_key", || {
                let http = self.http.clone();
                let url = key_url.clone();
                let api_key = self.credentials.api_key.clone();
                async move {
                    let response = http.get(&url).header("X-CAP-API-KEY", &api_key).send().await?;
                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(ProviderError::Http {
                            status: status.as_u16(),
                            body,
                        });
                    }
                    response
                        .json::<EncryptionKeyResponse>()
                        .await
                        .map_err(ProviderError::from)
                }
            })
            .await?;

        // Step 2: session create; the token pair comes back in headers.
        let session_url = format!("{}/api/v1/session", self.base_url);
        let body = serde_json::json!({
            "identifier": identifier,
            "password": self.credentials.api_secret,
            "encryptedPassword": false,
        });
        let tokens = self
            .guard
            .run("create_session", || {
                let http = self.http.clone();
                let url = session_url.clone();
                let api_key = self.credentials.api_key.clone();
                let body = body.clone();
                async move {
                    let response = http
                        .post(&url)
                        .header("X-CAP-API-KEY", &api_key)
                        .json(&body)
                        .send()
                        .await?;
                    let status = response.status();
                    if !status.is_success() {
                        let text = response.text().await.unwrap_or_default();
                        return Err(ProviderError::Http {
                            status: status.as_u16(),
                            body: text,
                        });
                    }
                    let header = |name: &str| {
                        response
                            .headers()
                            .get(name)
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string)
                            .ok_or_else(|| {
                                ProviderError::Session(format!(
                                    "session response missing {} header",
                                    name
                                ))
                            })
                    };
                    Ok(SessionTokens {
                        cst: header("CST")?,
                        security_token: header("X-SECURITY-TOKEN")?,
                    })
                }
            })
            .await?;

        *self.tokens.write().await = Some(tokens.clone());

        // Step 3: keep the session warm, independent of request handlers.
        let mut keepalive = self.keepalive.lock().await;
        if keepalive.is_none() {
            *keepalive = Some(spawn_keepalive(STREAMING_URL.to_string(), tokens));
        }
        info!(provider = self.name(), "Broker session established");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ProviderError> {
        if let Some(keepalive) = self.keepalive.lock().await.take() {
            keepalive.shutdown().await;
        }

        let Some(tokens) = self.tokens.write().await.take() else {
            return Ok(());
        };

        // The broker session is closed explicitly rather than left to idle out.
        let url = format!("{}/api/v1/session", self.base_url);
        self.guard
            .run("close_session", || {
                let http = self.http.clone();
                let url = url.clone();
                let tokens = tokens.clone();
                async move {
                    let response = http
                        .delete(&url)
                        .header("CST", &tokens.cst)
                        .header("X-SECURITY-TOKEN", &tokens.security_token)
                        .send()
                        .await?;
                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(ProviderError::Http {
                            status: status.as_u16(),
                            body,
                        });
                    }
                    Ok(())
                }
            })
            .await?;
        info!(provider = self.name(), "Broker session closed");
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        if self.tokens.read().await.is_none() {
            return false;
        }
        self.authed_get::<serde_json::Value>("ping", "/api/v1/ping".to_string())
            .await
            .is_ok()
    }

    async fn get_market_snapshot(&self, symbol: &str) -> Result<MarketSnapshot, ProviderError> {
        let details = self.fetch_market(symbol).await?;
        let snap = details.snapshot;
        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            price: to_decimal(mid(snap.bid, snap.offer)),
            volume: Decimal::ZERO,
            timestamp: parse_venue_time(snap.update_time_utc.as_deref()).unwrap_or_else(Utc::now),
            change_24h: Some(to_decimal(snap.net_change.unwrap_or(0.0))),
            change_percent_24h: Some(to_decimal(snap.percentage_change.unwrap_or(0.0))),
        })
    }

    async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, ProviderError> {
        let cache_key = format!("{}:{}:{}:{}", self.name(), symbol, interval, limit);
        if let Some(cache) = &self.candle_cache {
            if let Some(hit) = cache.get(&cache_key).await {
                debug!(symbol, %interval, "Candle cache hit");
                return Ok(hit);
            }
        }

        let path = format!(
            "/api/v1/prices/{}?resolution={}&max={}",
            symbol,
            resolution(interval),
            limit
        );
        let history: PriceHistory = self.authed_get("prices", path).await?;

        let mut candles = Vec::with_capacity(history.prices.len());
        for point in &history.prices {
            candles.push(point.to_candle(symbol, interval)?);
        }

        if let Some(cache) = &self.candle_cache {
            cache.set(&cache_key, candles.clone()).await;
        }
        Ok(candles)
    }

    async fn get_ticker_24h(&self, symbol: &str) -> Result<Ticker24h, ProviderError> {
        let details = self.fetch_market(symbol).await?;
        let snap = details.snapshot;
        let bid = to_decimal(snap.bid.unwrap_or(0.0));
        let ask = to_decimal(snap.offer.unwrap_or(0.0));
        let last = to_decimal(mid(snap.bid, snap.offer));
        // The broker has no 24h volume statistics; those stay zero-filled.
        Ok(Ticker24h {
            symbol: symbol.to_string(),
            last,
            open: Decimal::ZERO,
            high: to_decimal(snap.high.unwrap_or(0.0)),
            low: to_decimal(snap.low.unwrap_or(0.0)),
            close: last,
            bid,
            ask,
            vwap: Decimal::ZERO,
            base_volume: Decimal::ZERO,
            quote_volume: Decimal::ZERO,
            change: to_decimal(snap.net_change.unwrap_or(0.0)),
            percentage: to_decimal(snap.percentage_change.unwrap_or(0.0)),
            timestamp: parse_venue_time(snap.update_time_utc.as_deref()),
        })
    }
}

/// Maps an interval to the broker's resolution label; granularities the
/// venue lacks snap to the closest supported one.
fn resolution(interval: Interval) -> &'static str {
    const SUPPORTED: [(Interval, &str); 8] = [
        (Interval::OneMinute, "MINUTE"),
        (Interval::FiveMinutes, "MINUTE_5"),
        (Interval::FifteenMinutes, "MINUTE_15"),
        (Interval::ThirtyMinutes, "MINUTE_30"),
        (Interval::OneHour, "HOUR"),
        (Interval::FourHours, "HOUR_4"),
        (Interval::OneDay, "DAY"),
        (Interval::OneWeek, "WEEK"),
    ];
    SUPPORTED
        .iter()
        .min_by_key(|(i, _)| (i.duration_ms() - interval.duration_ms()).abs())
        .map(|(_, label)| *label)
        .unwrap_or("MINUTE")
}

fn mid(bid: Option<f64>, ask: Option<f64>) -> f64 {
    match (bid, ask) {
        (Some(b), Some(a)) => (b + a) / 2.0,
        (Some(b), None) => b,
        (None, Some(a)) => a,
        (None, None) => 0.0,
    }
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::try_from(value).unwrap_or_default()
}

fn parse_venue_time(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EncryptionKeyResponse {
    #[serde(default)]
    #[allow(dead_code)]
    encryption_key: String,
    #[serde(default)]
    #[allow(dead_code)]
    time_stamp: i64,
}

#[derive(Debug, Deserialize)]
struct MarketDetails {
    snapshot: MarketSnapshotRaw,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct MarketSnapshotRaw {
    bid: Option<f64>,
    offer: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    net_change: Option<f64>,
    percentage_change: Option<f64>,
    #[serde(rename = "updateTimeUTC")]
    update_time_utc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PriceHistory {
    #[serde(default)]
    prices: Vec<PricePoint>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PricePoint {
    #[serde(rename = "snapshotTimeUTC")]
    snapshot_time_utc: Option<String>,
    snapshot_time: Option<String>,
    open_price: Option<BidAsk>,
    high_price: Option<BidAsk>,
    low_price: Option<BidAsk>,
    close_price: Option<BidAsk>,
    last_traded_volume: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct BidAsk {
    bid: Option<f64>,
    ask: Option<f64>,
}

impl PricePoint {
    fn to_candle(&self, symbol: &str, interval: Interval) -> Result<Candle, ProviderError> {
        let raw_time = self
            .snapshot_time_utc
            .as_deref()
            .or(self.snapshot_time.as_deref());
        let open_raw = parse_venue_time(raw_time).ok_or_else(|| {
            ProviderError::Payload(format!("price point has unusable time: {:?}", raw_time))
        })?;

        let open_time = floor_to_interval(open_raw, interval);
        let close_time = open_time + chrono::Duration::milliseconds(interval.duration_ms() - 1);
        let price = |side: &Option<BidAsk>| {
            side.as_ref()
                .map(|p| mid(p.bid, p.ask))
                .unwrap_or(0.0)
        };

        Ok(Candle {
            symbol: symbol.to_string(),
            open_time,
            close_time,
            open: price(&self.open_price),
            high: price(&self.high_price),
            low: price(&self.low_price),
            close: price(&self.close_price),
            volume: self.last_traded_volume.unwrap_or(0.0),
            trades: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolution_mapping() {
        assert_eq!(resolution(Interval::OneMinute), "MINUTE");
        assert_eq!(resolution(Interval::FourHours), "HOUR_4");
        // Unsupported granularities snap to the nearest label (ties go to
        // the shorter one).
        assert_eq!(resolution(Interval::ThreeMinutes), "MINUTE");
        assert_eq!(resolution(Interval::TwelveHours), "HOUR_4");
        assert_eq!(resolution(Interval::OneMonth), "WEEK");
    }

    #[test]
    fn test_price_point_to_candle_uses_mid() {
        let point: PricePoint = serde_json::from_value(json!({
            "snapshotTimeUTC": "2023-11-14T22:13:20",
            "openPrice": { "bid": 1.1000, "ask": 1.1002 },
            "highPrice": { "bid": 1.1010, "ask": 1.1012 },
            "lowPrice": { "bid": 1.0990, "ask": 1.0992 },
            "closePrice": { "bid": 1.1004, "ask": 1.1006 },
            "lastTradedVolume": 321.0
        }))
        .unwrap();

        let candle = point.to_candle("EURUSD", Interval::OneMinute).unwrap();
        assert!((candle.open - 1.1001).abs() < 1e-9);
        assert!((candle.high - 1.1011).abs() < 1e-9);
        assert!((candle.low - 1.0991).abs() < 1e-9);
        assert!((candle.close - 1.1005).abs() < 1e-9);
        assert_eq!(candle.volume, 321.0);
        // 22:13:20 floors to the minute boundary.
        assert_eq!(candle.open_time.timestamp_millis() % 60_000, 0);
        assert!(candle.is_well_formed());
    }

    #[test]
    fn test_price_point_without_time_is_rejected() {
        let point = PricePoint::default();
        assert!(point.to_candle("EURUSD", Interval::OneMinute).is_err());
    }

    #[test]
    fn test_missing_sides_zero_fill() {
        let point: PricePoint = serde_json::from_value(json!({
            "snapshotTime": "2023-11-14T22:13:00",
            "closePrice": { "bid": 1.25 }
        }))
        .unwrap();
        let candle = point.to_candle("GBPUSD", Interval::OneMinute).unwrap();
        assert_eq!(candle.open, 0.0);
        assert_eq!(candle.close, 1.25);
        assert_eq!(candle.volume, 0.0);
    }
}
