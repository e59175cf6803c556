#![allow(dead_code)]
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use super::DataFeed;
use crate::types::{Candle, Direction, OrderKind, TimeFrame, TradingPair};

const BINANCE_FUTURES_API: &str = "https://fapi.binance.com";
const MAX_CANDLES_PER_CALL: u32 = 1000;
const REQUEST_TIMEOUT_SECS: u64 = 10;
const MAX_ATTEMPTS: u32 = 3;

type HmacSha256 = Hmac<Sha256>;

/// USDⓈ-M futures REST client. Market data flows through the `DataFeed`
/// impl; the signed order endpoints exist for live execution gateways and
/// are never touched by the backtest simulator.
#[derive(Debug, Clone)]
pub struct BinanceFuturesClient {
    client: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
}

impl BinanceFuturesClient {
    pub fn new(api_key: String, secret_key: String) -> Self {
        Self {
            client: Self::http_client(),
            api_key,
            secret_key,
            base_url: BINANCE_FUTURES_API.to_string(),
        }
    }

    pub fn public_only() -> Self {
        Self {
            client: Self::http_client(),
            api_key: String::new(),
            secret_key: String::new(),
            base_url: BINANCE_FUTURES_API.to_string(),
        }
    }

    /// Credentials from BINANCE_API_KEY / BINANCE_SECRET_KEY, public-only
    /// when unset.
    pub fn from_env() -> Self {
        match (
            std::env::var("BINANCE_API_KEY"),
            std::env::var("BINANCE_SECRET_KEY"),
        ) {
            (Ok(key), Ok(secret)) => Self::new(key, secret),
            _ => Self::public_only(),
        }
    }

    fn http_client() -> Client {
        Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default()
    }

    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// GET with exponential back-off: 3 attempts, sleeping 1s/2s/3s between
    /// them. Network errors, non-2xx statuses and malformed payloads all
    /// count as failures.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut last_error = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.try_get_json::<T>(url).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!("Request failed (attempt {}/{}): {}", attempt, MAX_ATTEMPTS, err);
                    last_error = Some(err);
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow!("request failed")))
    }

    async fn try_get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("HTTP {} from {}", response.status(), url));
        }
        Ok(response.json::<T>().await?)
    }

    async fn send_signed(&self, method: reqwest::Method, path: &str, query: String) -> Result<serde_json::Value> {
        let timestamp = Utc::now().timestamp_millis();
        let query = if query.is_empty() {
            format!("timestamp={}&recvWindow=5000", timestamp)
        } else {
            format!("{}&timestamp={}&recvWindow=5000", query, timestamp)
        };
        let signature = self.sign(&query);
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("HTTP {} from {}: {}", status, path, body));
        }
        Ok(response.json().await?)
    }

    // ---- live execution-gateway surface ----

    pub async fn place_order(
        &self,
        pair: TradingPair,
        direction: Direction,
        kind: OrderKind,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Result<String> {
        let side = match direction {
            Direction::Long => "BUY",
            Direction::Short => "SELL",
        };
        let mut query = format!(
            "symbol={}&side={}&quantity={}",
            pair.as_str(),
            side,
            quantity
        );
        match kind {
            OrderKind::Market => query.push_str("&type=MARKET"),
            OrderKind::Limit => {
                let price = price.ok_or_else(|| anyhow!("limit order requires a price"))?;
                query.push_str(&format!("&type=LIMIT&timeInForce=GTC&price={}", price));
            }
        }

        let value = self
            .send_signed(reqwest::Method::POST, "/fapi/v1/order", query)
            .await?;
        value
            .get("orderId")
            .map(|id| id.to_string())
            .ok_or_else(|| anyhow!("order response missing orderId"))
    }

    pub async fn cancel_order(&self, pair: TradingPair, order_id: &str) -> Result<()> {
        let query = format!("symbol={}&orderId={}", pair.as_str(), order_id);
        self.send_signed(reqwest::Method::DELETE, "/fapi/v1/order", query)
            .await?;
        Ok(())
    }

    /// Open position amount and entry price; None when flat.
    pub async fn get_position(&self, pair: TradingPair) -> Result<Option<(Decimal, Decimal)>> {
        let query = format!("symbol={}", pair.as_str());
        let value = self
            .send_signed(reqwest::Method::GET, "/fapi/v2/positionRisk", query)
            .await?;
        let rows: Vec<PositionRiskResponse> = serde_json::from_value(value)?;
        for row in rows {
            let amount = Decimal::from_str(&row.position_amt)?;
            if !amount.is_zero() {
                let entry = Decimal::from_str(&row.entry_price)?;
                return Ok(Some((amount, entry)));
            }
        }
        Ok(None)
    }

    pub async fn close_position(&self, pair: TradingPair, quantity: Decimal, direction: Direction) -> Result<String> {
        // Closing crosses to the other side of the book.
        self.place_order(pair, direction.opposite(), OrderKind::Market, quantity, None)
            .await
    }
}

#[async_trait]
impl DataFeed for BinanceFuturesClient {
    async fn fetch_candles(
        &self,
        pair: TradingPair,
        timeframe: TimeFrame,
        limit: u32,
        start_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>> {
        let limit = limit.min(MAX_CANDLES_PER_CALL);
        let mut url = format!(
            "{}/fapi/v1/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            pair.as_str(),
            timeframe.as_str(),
            limit
        );
        if let Some(start) = start_time {
            url.push_str(&format!("&startTime={}", start.timestamp_millis()));
        }

        let raw: Vec<Vec<serde_json::Value>> = self.get_json(&url).await?;
        debug!("Fetched {} {} klines for {}", raw.len(), timeframe, pair);
        parse_klines(pair, timeframe, raw)
    }

    async fn current_price(&self, pair: TradingPair) -> Result<Decimal> {
        let url = format!(
            "{}/fapi/v1/ticker/price?symbol={}",
            self.base_url,
            pair.as_str()
        );
        let resp: PriceResponse = self.get_json(&url).await?;
        Ok(Decimal::from_str(&resp.price)?)
    }
}

/// Futures klines come as positional arrays; index 9 carries the taker-buy
/// base volume used for the buy/sell split.
fn parse_klines(
    pair: TradingPair,
    timeframe: TimeFrame,
    raw: Vec<Vec<serde_json::Value>>,
) -> Result<Vec<Candle>> {
    raw.into_iter()
        .map(|k| {
            let open_time = k.first().and_then(|v| v.as_i64()).unwrap_or(0);
            let open = k.get(1).and_then(|v| v.as_str()).unwrap_or("0");
            let high = k.get(2).and_then(|v| v.as_str()).unwrap_or("0");
            let low = k.get(3).and_then(|v| v.as_str()).unwrap_or("0");
            let close = k.get(4).and_then(|v| v.as_str()).unwrap_or("0");
            let volume = k.get(5).and_then(|v| v.as_str()).unwrap_or("0");
            let close_time = k.get(6).and_then(|v| v.as_i64()).unwrap_or(0);
            let taker_buy = k.get(9).and_then(|v| v.as_str());

            Ok(Candle {
                pair,
                timeframe,
                open_time: Utc
                    .timestamp_millis_opt(open_time)
                    .single()
                    .ok_or_else(|| anyhow!("bad open time {}", open_time))?,
                // Binance stamps the close one millisecond short of the next bar.
                close_time: Utc
                    .timestamp_millis_opt(close_time + 1)
                    .single()
                    .ok_or_else(|| anyhow!("bad close time {}", close_time))?,
                open: Decimal::from_str(open)?,
                high: Decimal::from_str(high)?,
                low: Decimal::from_str(low)?,
                close: Decimal::from_str(close)?,
                volume: Decimal::from_str(volume)?,
                taker_buy_volume: taker_buy.and_then(|s| Decimal::from_str(s).ok()),
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: String,
}

#[derive(Debug, Deserialize)]
struct PositionRiskResponse {
    #[serde(rename = "positionAmt")]
    position_amt: String,
    #[serde(rename = "entryPrice")]
    entry_price: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn klines_parse_with_taker_split() {
        let raw: Vec<Vec<serde_json::Value>> = vec![vec![
            json!(1709251200000i64),
            json!("100.5"),
            json!("101.2"),
            json!("99.8"),
            json!("100.9"),
            json!("350.25"),
            json!(1709251259999i64),
            json!("35280.1"),
            json!(420),
            json!("210.5"),
            json!("21200.7"),
            json!("0"),
        ]];

        let candles = parse_klines(TradingPair::BTCUSDT, TimeFrame::M1, raw).unwrap();
        assert_eq!(candles.len(), 1);
        let c = &candles[0];
        assert_eq!(c.open, dec!(100.5));
        assert_eq!(c.close, dec!(100.9));
        assert_eq!(c.volume, dec!(350.25));
        assert_eq!(c.taker_buy_volume, Some(dec!(210.5)));
        assert_eq!(c.open_time.timestamp_millis(), 1709251200000);
        assert_eq!(c.close_time.timestamp_millis(), 1709251260000);
        assert_eq!(c.sell_volume(), dec!(350.25) - dec!(210.5));
    }

    #[test]
    fn klines_without_taker_volume_still_parse() {
        let raw: Vec<Vec<serde_json::Value>> = vec![vec![
            json!(1709251200000i64),
            json!("100"),
            json!("101"),
            json!("99"),
            json!("100"),
            json!("10"),
            json!(1709251259999i64),
        ]];
        let candles = parse_klines(TradingPair::ETHUSDT, TimeFrame::M5, raw).unwrap();
        assert_eq!(candles[0].taker_buy_volume, None);
        assert_eq!(candles[0].delta(), Decimal::ZERO);
    }
}
