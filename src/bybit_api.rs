use crate::config::{BYBIT_PUBLIC_URL, BYBIT_REST_URL};
use crate::types::{Candle, Side};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW: &str = "5000";

// ── Error types ───────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExchangeError {
    /// retCode=10006 or HTTP 429. retry_after in seconds.
    #[error("rate limited (retry after {retry_after}s)")]
    RateLimit { retry_after: u64 },

    /// The request never reached the exchange; safe to resend even for orders.
    #[error("connect error: {0}")]
    Connect(String),

    /// Timeouts, 5xx, unreadable responses. The request may or may not have executed.
    #[error("transient error: {0}")]
    Transient(String),

    /// Invalid params, auth, insufficient balance, HTTP 4xx.
    #[error("permanent error: {0}")]
    Permanent(String),
}

/// Classify a Bybit retCode + HTTP status into an ExchangeError.
pub fn classify_error(ret_code: i64, http_status: u16, msg: &str) -> ExchangeError {
    match (ret_code, http_status) {
        (10006, _) | (_, 429) => ExchangeError::RateLimit { retry_after: 10 },
        (10016, _) | (_, 500..=599) => ExchangeError::Transient(msg.to_string()),
        _ => ExchangeError::Permanent(format!("retCode={} msg={}", ret_code, msg)),
    }
}

fn transport_error(e: reqwest::Error) -> ExchangeError {
    if e.is_connect() {
        ExchangeError::Connect(e.to_string())
    } else {
        ExchangeError::Transient(format!("HTTP error: {}", e))
    }
}

// ── Retry ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Retry `Transient` errors. Off for orders: a timed-out order may have filled.
    pub retry_transient: bool,
}

impl RetryPolicy {
    pub const READS: RetryPolicy = RetryPolicy {
        max_retries: 5,
        base_delay: Duration::from_secs(1),
        retry_transient: true,
    };

    pub const ORDERS: RetryPolicy = RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_secs(1),
        retry_transient: false,
    };
}

/// Generic retry wrapper with exponential backoff.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, operation: F) -> Result<T, ExchangeError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ExchangeError>>,
{
    let mut retries = 0;
    let mut delay = policy.base_delay;
    loop {
        let err = match operation().await {
            Ok(r) => return Ok(r),
            Err(e) => e,
        };
        if retries >= policy.max_retries {
            return Err(err);
        }
        let wait = match &err {
            ExchangeError::RateLimit { retry_after } => Duration::from_secs(*retry_after),
            ExchangeError::Connect(_) => delay,
            ExchangeError::Transient(_) if policy.retry_transient => delay,
            _ => return Err(err),
        };
        log::warn!("{} — retry in {:?} ({}/{})", err, wait, retries + 1, policy.max_retries);
        tokio::time::sleep(wait).await;
        if !matches!(err, ExchangeError::RateLimit { .. }) {
            delay = (delay * 2).min(Duration::from_secs(60));
        }
        retries += 1;
    }
}

// ── Exchange seam ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct ExchangePosition {
    pub side: Side,
    pub size: f64,
    pub entry_price: f64,
}

/// Remote calls the live trader depends on. Every call is fallible and nothing is
/// atomic across calls.
#[allow(async_fn_in_trait)]
pub trait Exchange {
    /// Oldest-first candles; the last one may still be forming.
    async fn get_klines(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>, ExchangeError>;

    async fn get_position(&self, symbol: &str) -> Result<Option<ExchangePosition>, ExchangeError>;

    async fn open_market_order(&self, symbol: &str, side: Side, qty: f64) -> Result<String, ExchangeError>;

    /// Reduce-only market order against a position of `side`.
    async fn close_position(&self, symbol: &str, qty: f64, side: Side) -> Result<String, ExchangeError>;

    async fn get_current_price(&self, symbol: &str) -> Result<f64, ExchangeError>;
}

// ── Response parsing ──────────────────────────────────────────────────────────

fn check_ret_code(json: &Value, http_status: u16) -> Result<(), ExchangeError> {
    let ret_code = json["retCode"].as_i64().unwrap_or(-1);
    if ret_code == 0 {
        Ok(())
    } else {
        let msg = json["retMsg"].as_str().unwrap_or("unknown");
        Err(classify_error(ret_code, http_status, msg))
    }
}

fn str_f64(v: &Value) -> Option<f64> {
    v.as_str()?.parse().ok()
}

/// `result.list` of a kline response. Bybit returns newest-first; output is oldest-first.
pub fn parse_klines(json: &Value) -> Result<Vec<Candle>, ExchangeError> {
    let list = json["result"]["list"]
        .as_array()
        .ok_or_else(|| ExchangeError::Transient("missing result.list".into()))?;

    let mut candles: Vec<Candle> = list
        .iter()
        .filter_map(|row| {
            let arr = row.as_array()?;
            Some(Candle {
                time: arr.first()?.as_str()?.parse().ok()?,
                open: str_f64(arr.get(1)?)?,
                high: str_f64(arr.get(2)?)?,
                low: str_f64(arr.get(3)?)?,
                close: str_f64(arr.get(4)?)?,
                volume: arr.get(5).and_then(str_f64).unwrap_or(0.0),
            })
        })
        .collect();
    candles.reverse();
    Ok(candles)
}

/// First entry of a position-list response, or None when flat (size 0).
pub fn parse_position(json: &Value) -> Option<ExchangePosition> {
    let entry = json["result"]["list"].as_array()?.first()?;
    let size = str_f64(&entry["size"]).unwrap_or(0.0);
    if size == 0.0 {
        return None;
    }
    Some(ExchangePosition {
        side: Side::from_order_side(entry["side"].as_str()?)?,
        size,
        entry_price: str_f64(&entry["avgPrice"]).unwrap_or(0.0),
    })
}

pub fn parse_last_price(json: &Value) -> Result<f64, ExchangeError> {
    json["result"]["list"]
        .as_array()
        .and_then(|l| l.first())
        .and_then(|t| str_f64(&t["lastPrice"]))
        .ok_or_else(|| ExchangeError::Transient("missing lastPrice".into()))
}

pub fn sign(secret: &str, payload: &str) -> Result<String, ExchangeError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Permanent(format!("HMAC init failed: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

// ── Client ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct BybitClient {
    client: reqwest::Client,
    base_url: String,
    public_url: String,
    api_key: String,
    api_secret: String,
    qty_decimals: usize,
}

impl BybitClient {
    pub fn new(api_key: String, api_secret: String) -> Result<Self, ExchangeError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ExchangeError::Permanent(format!("HTTP client build failed: {}", e)))?;

        Ok(BybitClient {
            client,
            base_url: BYBIT_REST_URL.to_string(),
            public_url: BYBIT_PUBLIC_URL.to_string(),
            api_key,
            api_secret,
            qty_decimals: 3,
        })
    }

    /// Credentials from BYBIT_API_KEY / BYBIT_SECRET.
    pub fn from_env() -> Result<Self, ExchangeError> {
        let api_key = std::env::var("BYBIT_API_KEY")
            .map_err(|_| ExchangeError::Permanent("BYBIT_API_KEY env var not set".into()))?;
        let api_secret = std::env::var("BYBIT_SECRET")
            .map_err(|_| ExchangeError::Permanent("BYBIT_SECRET env var not set".into()))?;
        Self::new(api_key, api_secret)
    }

    pub fn with_qty_decimals(mut self, decimals: usize) -> Self {
        self.qty_decimals = decimals;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn signed_headers(&self, payload_tail: &str) -> Result<reqwest::header::HeaderMap, ExchangeError> {
        let ts = chrono::Utc::now().timestamp_millis().to_string();
        let payload = format!("{}{}{}{}", ts, self.api_key, RECV_WINDOW, payload_tail);
        let signature = sign(&self.api_secret, &payload)?;

        let bad = |e: reqwest::header::InvalidHeaderValue| ExchangeError::Permanent(format!("bad header: {}", e));
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("X-BAPI-API-KEY", self.api_key.parse().map_err(bad)?);
        headers.insert("X-BAPI-TIMESTAMP", ts.parse().map_err(bad)?);
        headers.insert("X-BAPI-SIGN", signature.parse().map_err(bad)?);
        headers.insert("X-BAPI-RECV-WINDOW", RECV_WINDOW.parse().map_err(bad)?);
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        Ok(headers)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Value, ExchangeError> {
        let resp = req.send().await.map_err(transport_error)?;
        let http_status = resp.status().as_u16();
        let json: Value = resp
            .json()
            .await
            .map_err(|e| ExchangeError::Transient(format!("Parse error: {}", e)))?;
        check_ret_code(&json, http_status)?;
        Ok(json)
    }

    // ── Internal raw methods (no retry) ──────────────────────────────────────

    async fn klines_raw(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>, ExchangeError> {
        let url = format!(
            "{}/v5/market/kline?category=linear&symbol={}&interval={}&limit={}",
            self.public_url, symbol, interval, limit
        );
        parse_klines(&self.send(self.client.get(&url)).await?)
    }

    async fn position_raw(&self, symbol: &str) -> Result<Option<ExchangePosition>, ExchangeError> {
        let query = format!("category=linear&symbol={}", symbol);
        let headers = self.signed_headers(&query)?;
        let url = format!("{}/v5/position/list?{}", self.base_url, query);
        Ok(parse_position(&self.send(self.client.get(&url).headers(headers)).await?))
    }

    async fn price_raw(&self, symbol: &str) -> Result<f64, ExchangeError> {
        let url = format!("{}/v5/market/tickers?category=linear&symbol={}", self.public_url, symbol);
        parse_last_price(&self.send(self.client.get(&url)).await?)
    }

    async fn order_raw(&self, symbol: &str, side: &str, qty: f64, reduce_only: bool) -> Result<String, ExchangeError> {
        let body = serde_json::json!({
            "category":    "linear",
            "symbol":      symbol,
            "side":        side,
            "orderType":   "Market",
            "qty":         format!("{:.*}", self.qty_decimals, qty),
            "reduceOnly":  reduce_only,
            "timeInForce": "GTC"
        })
        .to_string();

        let headers = self.signed_headers(&body)?;
        let url = format!("{}/v5/order/create", self.base_url);
        let json = self.send(self.client.post(&url).headers(headers).body(body)).await?;
        let order_id = json["result"]["orderId"].as_str().unwrap_or("unknown").to_string();
        log::info!(
            "[{}] order {} {} qty={:.*} reduceOnly={} id={}",
            symbol, side, "Market", self.qty_decimals, qty, reduce_only, order_id
        );
        Ok(order_id)
    }
}

impl Exchange for BybitClient {
    async fn get_klines(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>, ExchangeError> {
        with_retry(&RetryPolicy::READS, || self.klines_raw(symbol, interval, limit)).await
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<ExchangePosition>, ExchangeError> {
        with_retry(&RetryPolicy::READS, || self.position_raw(symbol)).await
    }

    async fn open_market_order(&self, symbol: &str, side: Side, qty: f64) -> Result<String, ExchangeError> {
        with_retry(&RetryPolicy::ORDERS, || self.order_raw(symbol, side.order_side(), qty, false)).await
    }

    async fn close_position(&self, symbol: &str, qty: f64, side: Side) -> Result<String, ExchangeError> {
        let close_side = side.opposite_order_side();
        with_retry(&RetryPolicy::ORDERS, || self.order_raw(symbol, close_side, qty, true)).await
    }

    async fn get_current_price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        with_retry(&RetryPolicy::READS, || self.price_raw(symbol)).await
    }
}
