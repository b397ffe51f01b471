//! CLOB HTTP client: public market data plus authenticated order flow.
//!
//! The authenticated path uses L2 header auth: an HMAC-SHA256 signature over
//! `timestamp + method + path + body` with a base64 secret, sent alongside
//! the api key, passphrase and wallet address. Credentials come from the
//! environment; without them the client stays read-only.
//!
//! Upstream schema variance is absorbed here: orderbook sides arrive as
//! `bids`/`asks` or `buy`/`sell`, levels as objects or `[price, size]`
//! pairs, and numbers as strings. Everything is normalized before it leaves
//! this module.

use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::{BookLevel, FillTrade, OrderAck, OrderBook, OrderRequest, OrderState};

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

type HmacSha256 = Hmac<Sha256>;

/// Global token bucket: enforces a minimum interval between outbound calls
/// across every client that shares it.
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(calls_per_second: f64) -> Self {
        let min_interval = if calls_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / calls_per_second)
        } else {
            Duration::ZERO
        };
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Blocks until enough time has passed since the previous call.
    pub async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// CLOB builder credentials for L2 header auth.
#[derive(Clone)]
pub struct ClobCredentials {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

impl std::fmt::Debug for ClobCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClobCredentials")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl ClobCredentials {
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("POLYMARKET_CLOB_API_KEY").ok()?;
        let secret = std::env::var("POLYMARKET_CLOB_SECRET").ok()?;
        let passphrase = std::env::var("POLYMARKET_CLOB_PASSPHRASE").ok()?;
        if api_key.is_empty() || secret.is_empty() || passphrase.is_empty() {
            return None;
        }
        Some(Self {
            api_key,
            secret,
            passphrase,
        })
    }
}

struct AuthContext {
    creds: ClobCredentials,
    address: String,
}

/// HTTP client for one CLOB host. Cheap per-call; the rate limiter is shared.
pub struct ClobClient {
    http: Client,
    host: String,
    limiter: Arc<RateLimiter>,
    auth: Option<AuthContext>,
}

impl ClobClient {
    pub fn read_only(host: &str, limiter: Arc<RateLimiter>) -> Self {
        Self {
            http: build_http(),
            host: host.trim_end_matches('/').to_string(),
            limiter,
            auth: None,
        }
    }

    pub fn authenticated(
        host: &str,
        limiter: Arc<RateLimiter>,
        creds: ClobCredentials,
        address: &str,
    ) -> Self {
        Self {
            http: build_http(),
            host: host.trim_end_matches('/').to_string(),
            limiter,
            auth: Some(AuthContext {
                creds,
                address: address.to_string(),
            }),
        }
    }

    // ── Public data ───────────────────────────────────────────

    pub async fn get_order_book(&self, token_id: &str) -> Option<OrderBook> {
        let value = self
            .get_json("/book", &[("token_id", token_id)])
            .await?;
        let book = parse_order_book(&value);
        if book.is_none() {
            debug!(token_id, "orderbook response had no parseable levels");
        }
        book
    }

    pub async fn get_midpoint(&self, token_id: &str) -> Option<f64> {
        let value = self
            .get_json("/midpoint", &[("token_id", token_id)])
            .await?;
        value.get("mid").and_then(json_f64)
    }

    pub async fn get_last_trade_price(&self, token_id: &str) -> Option<f64> {
        let value = self
            .get_json("/last-trade-price", &[("token_id", token_id)])
            .await?;
        value.get("price").and_then(json_f64)
    }

    // ── Authenticated order flow ──────────────────────────────

    pub async fn post_order(&self, req: &OrderRequest) -> OrderAck {
        let Some(auth) = &self.auth else {
            return OrderAck::rejected("no authenticated client");
        };

        let payload = serde_json::json!({
            "tokenID": req.token_id,
            "price": format!("{:.4}", req.price),
            "size": format!("{:.6}", req.size),
            "side": req.side.as_str(),
            "orderType": "GTC",
        });
        let body = payload.to_string();
        let path = "/order";

        self.limiter.acquire().await;
        let mut request = self
            .http
            .post(format!("{}{}", self.host, path))
            .header("Content-Type", "application/json");
        for (key, value) in auth_headers(auth, "POST", path, &body) {
            request = request.header(&key, &value);
        }

        let response = match request.body(body).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("post_order transport error: {e}");
                return OrderAck::rejected(format!("transport error: {e}"));
            }
        };

        let status = response.status();
        let value: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!("post_order bad response body: {e}");
                return OrderAck::rejected(format!("bad response: {e}"));
            }
        };

        let success = value
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let order_id = value
            .get("orderID")
            .or_else(|| value.get("orderId"))
            .or_else(|| value.get("order_id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        if status.is_success() && success {
            match order_id {
                Some(id) => OrderAck::accepted(id),
                None => OrderAck::rejected("accepted without an order id"),
            }
        } else {
            let error = value
                .get("errorMsg")
                .or_else(|| value.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("order rejected (http {status})"));
            warn!("post_order rejected: {error}");
            OrderAck::rejected(error)
        }
    }

    pub async fn get_order(&self, order_id: &str) -> Option<OrderState> {
        let auth = self.auth.as_ref()?;
        let path = format!("/data/order/{order_id}");

        self.limiter.acquire().await;
        let mut request = self.http.get(format!("{}{}", self.host, path));
        for (key, value) in auth_headers(auth, "GET", &path, "") {
            request = request.header(&key, &value);
        }

        let response = match request.send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                warn!(order_id, status = %resp.status(), "get_order non-success");
                return None;
            }
            Err(e) => {
                warn!(order_id, "get_order transport error: {e}");
                return None;
            }
        };

        let value: Value = response.json().await.ok()?;
        Some(parse_order_state(&value))
    }

    pub async fn cancel(&self, order_id: &str) -> bool {
        let Some(auth) = &self.auth else {
            return false;
        };
        let path = "/order";
        let body = serde_json::json!({ "orderID": order_id }).to_string();

        self.limiter.acquire().await;
        let mut request = self
            .http
            .delete(format!("{}{}", self.host, path))
            .header("Content-Type", "application/json");
        for (key, value) in auth_headers(auth, "DELETE", path, &body) {
            request = request.header(&key, &value);
        }

        match request.body(body).send().await {
            Ok(resp) if resp.status().is_success() => {
                let value: Value = resp.json().await.unwrap_or(Value::Null);
                value
                    .get("success")
                    .and_then(Value::as_bool)
                    .unwrap_or(true)
            }
            Ok(resp) => {
                warn!(order_id, status = %resp.status(), "cancel non-success");
                false
            }
            Err(e) => {
                warn!(order_id, "cancel transport error: {e}");
                false
            }
        }
    }

    pub async fn cancel_all(&self) -> u32 {
        let Some(auth) = &self.auth else {
            return 0;
        };
        let path = "/cancel-all";

        self.limiter.acquire().await;
        let mut request = self.http.delete(format!("{}{}", self.host, path));
        for (key, value) in auth_headers(auth, "DELETE", path, "") {
            request = request.header(&key, &value);
        }

        match request.send().await {
            Ok(resp) if resp.status().is_success() => {
                let value: Value = resp.json().await.unwrap_or(Value::Null);
                value
                    .get("canceled")
                    .or_else(|| value.get("cancelled"))
                    .and_then(json_f64)
                    .unwrap_or(0.0) as u32
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "cancel_all non-success");
                0
            }
            Err(e) => {
                warn!("cancel_all transport error: {e}");
                0
            }
        }
    }

    pub async fn open_orders(&self) -> Vec<Value> {
        let Some(auth) = &self.auth else {
            return Vec::new();
        };
        let path = "/data/orders";

        self.limiter.acquire().await;
        let mut request = self.http.get(format!("{}{}", self.host, path));
        for (key, value) in auth_headers(auth, "GET", path, "") {
            request = request.header(&key, &value);
        }

        match request.send().await {
            Ok(resp) if resp.status().is_success() => resp
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| v.as_array().cloned())
                .unwrap_or_default(),
            Ok(resp) => {
                warn!(status = %resp.status(), "open_orders non-success");
                Vec::new()
            }
            Err(e) => {
                warn!("open_orders transport error: {e}");
                Vec::new()
            }
        }
    }

    // ── Internals ─────────────────────────────────────────────

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Option<Value> {
        self.limiter.acquire().await;
        let url = format!("{}{}", self.host, path);
        match self.http.get(&url).query(query).send().await {
            Ok(resp) if resp.status().is_success() => resp.json().await.ok(),
            Ok(resp) => {
                warn!(%url, status = %resp.status(), "request non-success");
                None
            }
            Err(e) => {
                warn!(%url, "request failed: {e}");
                None
            }
        }
    }
}

fn build_http() -> Client {
    Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent("polybot/0.1")
        .build()
        .expect("reqwest client")
}

fn auth_headers(auth: &AuthContext, method: &str, path: &str, body: &str) -> Vec<(String, String)> {
    // Timestamp in seconds, not milliseconds.
    let timestamp = Utc::now().timestamp();
    let signature = sign_request(&auth.creds.secret, method, path, body, timestamp);
    vec![
        ("POLY_ADDRESS".to_string(), auth.address.clone()),
        ("POLY_API_KEY".to_string(), auth.creds.api_key.clone()),
        ("POLY_SIGNATURE".to_string(), signature),
        ("POLY_TIMESTAMP".to_string(), timestamp.to_string()),
        ("POLY_PASSPHRASE".to_string(), auth.creds.passphrase.clone()),
    ]
}

/// HMAC-SHA256 over `timestamp + method + path + body`, URL-safe base64.
fn sign_request(secret: &str, method: &str, path: &str, body: &str, timestamp: i64) -> String {
    let message = format!("{timestamp}{method}{path}{body}");
    let secret_bytes = URL_SAFE
        .decode(secret)
        .or_else(|_| URL_SAFE_NO_PAD.decode(secret))
        .or_else(|_| BASE64.decode(secret))
        .unwrap_or_else(|_| secret.as_bytes().to_vec());
    let mut mac = HmacSha256::new_from_slice(&secret_bytes).expect("hmac accepts any key length");
    mac.update(message.as_bytes());
    URL_SAFE.encode(mac.finalize().into_bytes())
}

/// Accepts numbers encoded as JSON numbers or strings.
pub(crate) fn json_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn parse_level(value: &Value) -> Option<BookLevel> {
    if let Some(obj) = value.as_object() {
        let price = obj.get("price").and_then(json_f64)?;
        let size = obj.get("size").and_then(json_f64).unwrap_or(0.0);
        return Some(BookLevel { price, size });
    }
    if let Some(arr) = value.as_array() {
        let price = arr.first().and_then(json_f64)?;
        let size = arr.get(1).and_then(json_f64).unwrap_or(0.0);
        return Some(BookLevel { price, size });
    }
    None
}

fn parse_side(value: Option<&Value>) -> Vec<BookLevel> {
    value
        .and_then(Value::as_array)
        .map(|levels| levels.iter().filter_map(parse_level).collect())
        .unwrap_or_default()
}

/// Normalize an orderbook payload. Sides may be keyed `bids`/`asks` or
/// `buy`/`sell`; sorting to best-first is enforced locally.
pub(crate) fn parse_order_book(value: &Value) -> Option<OrderBook> {
    let mut bids = parse_side(value.get("bids").or_else(|| value.get("buy")));
    let mut asks = parse_side(value.get("asks").or_else(|| value.get("sell")));
    if bids.is_empty() && asks.is_empty() {
        return None;
    }
    bids.sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap_or(std::cmp::Ordering::Equal));
    asks.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));
    Some(OrderBook { bids, asks })
}

/// Normalize an order-status payload over upstream field variants.
pub(crate) fn parse_order_state(value: &Value) -> OrderState {
    let status = value
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_uppercase();
    let size_matched = value
        .get("size_matched")
        .or_else(|| value.get("sizeMatched"))
        .and_then(json_f64)
        .unwrap_or(0.0);
    let price = value.get("price").and_then(json_f64);
    let original_size = value
        .get("original_size")
        .or_else(|| value.get("originalSize"))
        .and_then(json_f64);
    let trades = value
        .get("associate_trades")
        .or_else(|| value.get("associateTrades"))
        .and_then(Value::as_array)
        .map(|trades| {
            trades
                .iter()
                .filter_map(|t| {
                    Some(FillTrade {
                        size: t.get("size").and_then(json_f64)?,
                        price: t.get("price").and_then(json_f64)?,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    OrderState {
        status,
        size_matched,
        price,
        original_size,
        trades,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_order_book_object_levels() {
        let value = serde_json::json!({
            "bids": [
                {"price": "0.48", "size": "100"},
                {"price": "0.49", "size": "50"}
            ],
            "asks": [
                {"price": "0.53", "size": "20"},
                {"price": "0.51", "size": "40"}
            ]
        });
        let book = parse_order_book(&value).unwrap();
        // Best-first regardless of upstream ordering.
        assert_eq!(book.best_bid(), Some(0.49));
        assert_eq!(book.best_ask(), Some(0.51));
    }

    #[test]
    fn test_parse_order_book_buy_sell_keys_and_pairs() {
        let value = serde_json::json!({
            "buy": [[0.44, 10.0]],
            "sell": [[0.47, 5.0]]
        });
        let book = parse_order_book(&value).unwrap();
        assert_eq!(book.best_bid(), Some(0.44));
        assert_eq!(book.best_ask(), Some(0.47));

        assert!(parse_order_book(&serde_json::json!({})).is_none());
    }

    #[test]
    fn test_parse_order_state_variants() {
        let value = serde_json::json!({
            "status": "matched",
            "sizeMatched": "40",
            "price": "0.50",
            "original_size": 100,
            "associate_trades": [
                {"size": "40", "price": "0.50"}
            ]
        });
        let state = parse_order_state(&value);
        assert_eq!(state.status, "MATCHED");
        assert_eq!(state.size_matched, 40.0);
        assert_eq!(state.price, Some(0.50));
        assert_eq!(state.original_size, Some(100.0));
        assert_eq!(state.trades.len(), 1);
        assert_eq!(state.trades[0].size, 40.0);
    }

    #[test]
    fn test_sign_request_deterministic() {
        let sig_a = sign_request("c2VjcmV0", "POST", "/order", "{}", 1_700_000_000);
        let sig_b = sign_request("c2VjcmV0", "POST", "/order", "{}", 1_700_000_000);
        let sig_c = sign_request("c2VjcmV0", "POST", "/order", "{}", 1_700_000_001);
        assert_eq!(sig_a, sig_b);
        assert_ne!(sig_a, sig_c);
    }

    #[tokio::test]
    async fn test_rate_limiter_spacing() {
        let limiter = RateLimiter::new(100.0);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        // Three calls at 100/s need at least ~20ms of spacing.
        assert!(start.elapsed() >= Duration::from_millis(15));
    }
}
