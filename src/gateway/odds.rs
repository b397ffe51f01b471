//! External sports-odds client (the-odds-api.com compatible).
//!
//! Converts per-bookmaker decimal odds into consensus implied probabilities:
//! average `1/odds` across books per team, then normalize across teams so
//! they sum to 1, which removes the bookmaker overround. Per-sport responses
//! are cached for a short TTL and fetches between sport keys are politely
//! spaced. A 401 disables the key for the rest of the process.

use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use super::clob::json_f64;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const INTER_SPORT_DELAY: Duration = Duration::from_millis(300);
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// The major US sports plus top soccer leagues.
const SPORT_KEYS: &[&str] = &[
    "basketball_nba",
    "americanfootball_nfl",
    "baseball_mlb",
    "icehockey_nhl",
    "mma_mixed_martial_arts",
    "soccer_epl",
    "soccer_usa_mls",
];

/// One upcoming event with consensus win probabilities per team.
#[derive(Debug, Clone)]
pub struct OddsEvent {
    pub sport: String,
    pub teams: [String; 2],
    pub commence_time: String,
    pub probabilities: HashMap<String, f64>,
    pub books: usize,
}

pub struct OddsClient {
    http: Client,
    host: String,
    api_key: RwLock<Option<String>>,
    cache: Mutex<HashMap<String, (Instant, Vec<OddsEvent>)>>,
    cache_ttl: Duration,
}

impl OddsClient {
    pub fn new(host: &str, api_key: Option<String>) -> Self {
        Self {
            http: Client::builder()
                .timeout(HTTP_TIMEOUT)
                .user_agent("polybot/0.1")
                .build()
                .expect("reqwest client"),
            host: host.trim_end_matches('/').to_string(),
            api_key: RwLock::new(api_key.filter(|k| !k.is_empty())),
            cache: Mutex::new(HashMap::new()),
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    pub fn available(&self) -> bool {
        self.api_key.read().is_some()
    }

    /// All cached-or-fetched events across the configured sport keys.
    pub async fn fetch_all(&self) -> Vec<OddsEvent> {
        if !self.available() {
            return Vec::new();
        }
        let mut events = Vec::new();
        let mut fetched_any = false;
        for sport in SPORT_KEYS {
            if !self.available() {
                break;
            }
            if let Some(cached) = self.cached(sport).await {
                events.extend(cached);
                continue;
            }
            if fetched_any {
                sleep(INTER_SPORT_DELAY).await;
            }
            fetched_any = true;
            if let Some(fresh) = self.fetch_sport(sport).await {
                self.cache
                    .lock()
                    .await
                    .insert(sport.to_string(), (Instant::now(), fresh.clone()));
                events.extend(fresh);
            }
        }
        events
    }

    async fn cached(&self, sport: &str) -> Option<Vec<OddsEvent>> {
        let cache = self.cache.lock().await;
        cache.get(sport).and_then(|(at, events)| {
            (at.elapsed() < self.cache_ttl).then(|| events.clone())
        })
    }

    async fn fetch_sport(&self, sport: &str) -> Option<Vec<OddsEvent>> {
        let api_key = self.api_key.read().clone()?;
        let url = format!("{}/v4/sports/{}/odds", self.host, sport);
        let query = [
            ("apiKey", api_key.as_str()),
            ("regions", "us"),
            ("markets", "h2h"),
            ("oddsFormat", "decimal"),
        ];

        let response = match self.http.get(&url).query(&query).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(sport, "odds fetch failed: {e}");
                return None;
            }
        };

        if response.status() == StatusCode::UNAUTHORIZED {
            error!("odds API key rejected (401) - disabling external odds for this run");
            *self.api_key.write() = None;
            return None;
        }
        if !response.status().is_success() {
            warn!(sport, status = %response.status(), "odds fetch non-success");
            return None;
        }

        let payload: Value = response.json().await.ok()?;
        let events = payload
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter_map(|e| parse_event(e, sport))
            .collect::<Vec<_>>();
        debug!(sport, count = events.len(), "odds events fetched");
        Some(events)
    }
}

fn parse_event(event: &Value, sport: &str) -> Option<OddsEvent> {
    let home = event.get("home_team")?.as_str()?.to_string();
    let away = event.get("away_team")?.as_str()?.to_string();
    let teams = [home, away];
    let bookmakers = event
        .get("bookmakers")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let probabilities = average_bookmaker_probs(bookmakers, &teams)?;

    Some(OddsEvent {
        sport: sport.to_string(),
        commence_time: event
            .get("commence_time")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        probabilities,
        books: bookmakers.len(),
        teams,
    })
}

/// Average implied probability (`1/decimal_odds`) per team across books,
/// then normalize across teams so they sum to 1.
pub(crate) fn average_bookmaker_probs(
    bookmakers: &[Value],
    teams: &[String; 2],
) -> Option<HashMap<String, f64>> {
    let mut totals: HashMap<&str, Vec<f64>> =
        teams.iter().map(|t| (t.as_str(), Vec::new())).collect();

    for book in bookmakers {
        for market in book
            .get("markets")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
        {
            if market.get("key").and_then(Value::as_str) != Some("h2h") {
                continue;
            }
            for outcome in market
                .get("outcomes")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default()
            {
                let Some(name) = outcome.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let Some(odds) = outcome.get("price").and_then(json_f64) else {
                    continue;
                };
                if odds > 1.0 {
                    if let Some(bucket) = totals.get_mut(name) {
                        bucket.push(1.0 / odds);
                    }
                }
            }
        }
    }

    let mut averaged: HashMap<String, f64> = totals
        .into_iter()
        .filter(|(_, probs)| !probs.is_empty())
        .map(|(team, probs)| {
            let avg = probs.iter().sum::<f64>() / probs.len() as f64;
            (team.to_string(), avg)
        })
        .collect();
    if averaged.is_empty() {
        return None;
    }

    let total: f64 = averaged.values().sum();
    if total > 0.0 {
        for prob in averaged.values_mut() {
            *prob /= total;
        }
    }
    Some(averaged)
}
