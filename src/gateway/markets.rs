//! Market-listing fetcher for the Gamma API.
//!
//! Events arrive with nested markets whose `clobTokenIds` and
//! `outcomePrices` fields are often JSON arrays encoded *as strings*; both
//! encodings are accepted. Markets without two token ids are dropped: every
//! signal downstream relies on non-empty token identifiers.

use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::clob::{json_f64, RateLimiter};
use crate::models::Market;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const CRYPTO_TAG_ID: u32 = 21;
const MAX_SPORTS_SERIES: usize = 12;

pub struct MarketFetcher {
    http: Client,
    host: String,
    limiter: Arc<RateLimiter>,
}

impl MarketFetcher {
    pub fn new(host: &str, limiter: Arc<RateLimiter>) -> Self {
        Self {
            http: Client::builder()
                .timeout(HTTP_TIMEOUT)
                .user_agent("polybot/0.1")
                .build()
                .expect("reqwest client"),
            host: host.trim_end_matches('/').to_string(),
            limiter,
        }
    }

    /// Crypto category, ordered by volume descending.
    pub async fn crypto_markets(&self, limit: u32) -> Vec<Market> {
        let query = [
            ("tag_id", CRYPTO_TAG_ID.to_string()),
            ("limit", limit.to_string()),
            ("order", "volume".to_string()),
            ("ascending", "false".to_string()),
            ("active", "true".to_string()),
            ("closed", "false".to_string()),
        ];
        let Some(events) = self.get_json("/events", &query).await else {
            return Vec::new();
        };
        let markets = parse_events(&events, "crypto");
        info!("fetched {} crypto markets", markets.len());
        markets
    }

    /// Sports markets across the leagues listed by the sports-metadata
    /// endpoint, soonest start first.
    pub async fn sports_markets(&self, limit: u32) -> Vec<Market> {
        let Some(meta) = self.get_json("/sports", &[]).await else {
            return Vec::new();
        };
        let mut markets = Vec::new();
        let mut series_seen = 0usize;

        for sport in meta.as_array().map(Vec::as_slice).unwrap_or_default() {
            let label = sport
                .get("label")
                .and_then(Value::as_str)
                .unwrap_or("sports");
            for series in sport
                .get("series")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default()
            {
                if series_seen >= MAX_SPORTS_SERIES {
                    break;
                }
                let Some(series_id) = series
                    .get("id")
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .filter(|s| !s.is_empty())
                else {
                    continue;
                };
                series_seen += 1;

                let query = [
                    ("series_id", series_id.clone()),
                    ("limit", limit.to_string()),
                    ("order", "startTime".to_string()),
                    ("ascending", "true".to_string()),
                    ("active", "true".to_string()),
                    ("closed", "false".to_string()),
                ];
                match self.get_json("/events", &query).await {
                    Some(events) => {
                        markets.extend(parse_events(&events, &format!("sports:{label}")))
                    }
                    None => debug!(series_id, "series fetch failed, skipping"),
                }
            }
        }

        info!("fetched {} sports markets", markets.len());
        markets
    }

    /// Fetch the configured categories and apply a liquidity floor.
    pub async fn all_target_markets(
        &self,
        categories: &[String],
        limit: u32,
        min_liquidity: Option<f64>,
    ) -> Vec<Market> {
        let mut markets = Vec::new();
        for category in categories {
            match category.as_str() {
                "crypto" => markets.extend(self.crypto_markets(limit).await),
                "sports" => markets.extend(self.sports_markets(limit).await),
                other => warn!("unknown market category: {other}"),
            }
        }
        if let Some(floor) = min_liquidity {
            markets.retain(|m| m.liquidity >= floor);
        }
        markets
    }

    pub async fn search(&self, query: &str, limit: u32) -> Vec<Market> {
        let params = [("q", query.to_string()), ("limit", limit.to_string())];
        let Some(results) = self.get_json("/search", &params).await else {
            return Vec::new();
        };
        results
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter(|item| {
                item.get("type").and_then(Value::as_str).unwrap_or("market") == "market"
            })
            .filter_map(|item| parse_market(item, "search"))
            .collect()
    }

    pub async fn market_by_slug(&self, slug: &str) -> Option<Market> {
        let value = self.get_json(&format!("/markets/{slug}"), &[]).await?;
        parse_market(&value, "lookup")
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Option<Value> {
        self.limiter.acquire().await;
        let url = format!("{}{}", self.host, path);
        match self.http.get(&url).query(query).send().await {
            Ok(resp) if resp.status().is_success() => resp.json().await.ok(),
            Ok(resp) => {
                warn!(%url, status = %resp.status(), "listing request non-success");
                None
            }
            Err(e) => {
                warn!(%url, "listing request failed: {e}");
                None
            }
        }
    }
}

fn parse_events(events: &Value, category: &str) -> Vec<Market> {
    events
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .flat_map(|event| {
            event
                .get("markets")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .filter_map(|m| parse_market(m, category))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Fields that are sometimes a JSON array and sometimes that array encoded
/// as a string.
fn nested_array(value: Option<&Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::String(raw)) => serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

pub(crate) fn parse_market(value: &Value, category: &str) -> Option<Market> {
    let token_ids = nested_array(value.get("clobTokenIds"));
    if token_ids.len() < 2 {
        return None;
    }
    let token_id_yes = token_ids[0].as_str()?.to_string();
    let token_id_no = token_ids[1].as_str()?.to_string();
    if token_id_yes.is_empty() || token_id_no.is_empty() {
        return None;
    }

    let prices = nested_array(value.get("outcomePrices"));
    let price_yes = prices.first().and_then(json_f64).unwrap_or(0.5);
    let price_no = prices.get(1).and_then(json_f64).unwrap_or(1.0 - price_yes);

    Some(Market {
        id: value
            .get("id")
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default(),
        question: value
            .get("question")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        slug: value
            .get("slug")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        condition_id: value
            .get("conditionId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        token_id_yes,
        token_id_no,
        price_yes,
        price_no,
        volume: value.get("volume").and_then(json_f64).unwrap_or(0.0),
        liquidity: value.get("liquidity").and_then(json_f64).unwrap_or(0.0),
        category: category.to_string(),
        end_date: value
            .get("endDate")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_market_string_encoded_fields() {
        let value = serde_json::json!({
            "id": 12345,
            "question": "Will BTC hit 100k?",
            "slug": "btc-100k",
            "conditionId": "0xabc",
            "clobTokenIds": "[\"tok_yes\", \"tok_no\"]",
            "outcomePrices": "[\"0.42\", \"0.58\"]",
            "volume": "250000",
            "liquidity": "12000.5",
            "endDate": "2026-12-31T00:00:00Z"
        });
        let market = parse_market(&value, "crypto").unwrap();
        assert_eq!(market.id, "12345");
        assert_eq!(market.token_id_yes, "tok_yes");
        assert_eq!(market.token_id_no, "tok_no");
        assert_eq!(market.price_yes, 0.42);
        assert_eq!(market.price_no, 0.58);
        assert_eq!(market.volume, 250000.0);
        assert_eq!(market.category, "crypto");
    }

    #[test]
    fn test_parse_market_requires_both_tokens() {
        let value = serde_json::json!({
            "question": "q",
            "clobTokenIds": ["only_one"],
            "outcomePrices": [0.5, 0.5]
        });
        assert!(parse_market(&value, "crypto").is_none());
    }

    #[test]
    fn test_parse_events_flattens_nested_markets() {
        let events = serde_json::json!([
            {
                "title": "Event A",
                "markets": [
                    {
                        "id": "m1",
                        "question": "q1",
                        "clobTokenIds": ["y1", "n1"],
                        "outcomePrices": [0.4, 0.6]
                    },
                    {
                        "id": "m2",
                        "question": "q2",
                        "clobTokenIds": ["y2", "n2"],
                        "outcomePrices": ["0.7", "0.3"]
                    }
                ]
            }
        ]);
        let markets = parse_events(&events, "sports:NBA");
        assert_eq!(markets.len(), 2);
        assert_eq!(markets[1].price_yes, 0.7);
        assert_eq!(markets[0].category, "sports:NBA");
    }
}
