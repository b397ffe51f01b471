//! Value (sports): compare market prices to external bookmaker consensus.
//!
//! Requires an odds API key; without one the strategy returns empty
//! silently. Matching markets to external events is a string heuristic:
//! both team names must appear in the question, and the YES side is
//! assigned to the team named before the win/beat/defeat verb (with a
//! single-mention fallback). Rare markets will be misclassified; the low
//! strategy confidence prices that in.

use async_trait::async_trait;

use super::{Signal, Strategy, StrategyContext};
use crate::gateway::odds::OddsEvent;
use crate::models::{Market, SignalSide};

#[derive(Debug, Clone)]
pub struct ValueSportsParams {
    /// Minimum disagreement with the external consensus, in percent.
    pub min_edge_pct: f64,
}

impl Default for ValueSportsParams {
    fn default() -> Self {
        Self { min_edge_pct: 8.0 }
    }
}

#[derive(Debug, Default)]
pub struct ValueSports {
    pub params: ValueSportsParams,
}

impl ValueSports {
    pub fn new(params: ValueSportsParams) -> Self {
        Self { params }
    }
}

#[async_trait]
impl Strategy for ValueSports {
    fn name(&self) -> &'static str {
        "value_sports"
    }

    async fn scan(&self, ctx: &StrategyContext, markets: &[Market]) -> anyhow::Result<Vec<Signal>> {
        let Some(odds) = &ctx.odds else {
            return Ok(Vec::new());
        };
        if !odds.available() {
            return Ok(Vec::new());
        }
        let events = odds.fetch_all().await;
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut signals = Vec::new();
        for market in markets.iter().filter(|m| is_sports_market(m)) {
            let Some((ext_prob, books, source)) = match_to_external(market, &events) else {
                continue;
            };

            let edge = ext_prob - market.price_yes;
            if edge.abs() * 100.0 < self.params.min_edge_pct {
                continue;
            }
            let confidence = (books as f64 / 8.0).min(1.0);

            let (side, entry_price, reason) = if edge > 0.0 {
                (
                    SignalSide::Yes,
                    market.price_yes,
                    format!(
                        "external odds ({source}): {:.0}% vs market {:.0}% - YES \
                         underpriced by {:.1}%",
                        ext_prob * 100.0,
                        market.price_yes * 100.0,
                        edge * 100.0
                    ),
                )
            } else {
                (
                    SignalSide::No,
                    market.price_no,
                    format!(
                        "external odds ({source}): {:.0}% vs market {:.0}% - NO \
                         underpriced by {:.1}%",
                        ext_prob * 100.0,
                        market.price_yes * 100.0,
                        edge.abs() * 100.0
                    ),
                )
            };

            signals.push(Signal {
                market: market.clone(),
                side,
                strategy: self.name().to_string(),
                edge_pct: edge.abs() * 100.0,
                confidence,
                entry_price,
                reason,
            });
        }

        signals.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(signals)
    }
}

pub(crate) fn is_sports_market(market: &Market) -> bool {
    const KEYWORDS: &[&str] = &[
        "win",
        "championship",
        "super bowl",
        "nba",
        "nfl",
        "mlb",
        "nhl",
        "playoffs",
        "finals",
        "game",
        "match",
        "vs",
        "premier league",
        "ufc",
        "mma",
        "tennis",
    ];
    let question = market.question.to_lowercase();
    market.category.to_lowercase().contains("sports")
        || KEYWORDS.iter().any(|kw| question.contains(kw))
}

/// Match a market to an external event. Returns the consensus probability
/// for the YES side, the number of books behind it, and a source label.
pub(crate) fn match_to_external(
    market: &Market,
    events: &[OddsEvent],
) -> Option<(f64, usize, String)> {
    let question = market.question.to_lowercase();

    for event in events {
        let team_lower: Vec<String> = event.teams.iter().map(|t| t.to_lowercase()).collect();
        if !team_lower.iter().all(|t| question.contains(t.as_str())) {
            continue;
        }
        let source = format!("consensus ({} books)", event.books);

        // The subject of "Will <team> win/beat/defeat ...?" is the YES side.
        let action_pos = ["win", "beat", "defeat"]
            .iter()
            .filter_map(|verb| question.find(verb))
            .min()
            .unwrap_or(question.len());
        for (team, lower) in event.teams.iter().zip(&team_lower) {
            let Some(team_pos) = question.find(lower.as_str()) else {
                continue;
            };
            if team_pos < action_pos {
                if let Some(prob) = event.probabilities.get(team) {
                    return Some((*prob, event.books, source));
                }
            }
        }

        // Fallback: a single mentioned team is the YES side.
        let mentioned: Vec<&String> = event
            .teams
            .iter()
            .zip(&team_lower)
            .filter(|(_, lower)| question.contains(lower.as_str()))
            .map(|(team, _)| team)
            .collect();
        if mentioned.len() == 1 {
            if let Some(prob) = event.probabilities.get(mentioned[0]) {
                return Some((*prob, event.books, source));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::testutil::market;
    use std::collections::HashMap;

    fn event(team_a: &str, prob_a: f64, team_b: &str, books: usize) -> OddsEvent {
        let mut probabilities = HashMap::new();
        probabilities.insert(team_a.to_string(), prob_a);
        probabilities.insert(team_b.to_string(), 1.0 - prob_a);
        OddsEvent {
            sport: "basketball_nba".to_string(),
            teams: [team_a.to_string(), team_b.to_string()],
            commence_time: String::new(),
            probabilities,
            books,
        }
    }

    fn sports_market(question: &str, price_yes: f64) -> Market {
        let mut m = market("s1", price_yes, 200_000.0);
        m.question = question.to_string();
        m.category = "sports:NBA".to_string();
        m
    }

    #[test]
    fn test_subject_team_before_verb_is_yes() {
        let events = vec![event("Lakers", 0.62, "Celtics", 5)];
        let m = sports_market("Will the Lakers beat the Celtics?", 0.50);
        let (prob, books, _) = match_to_external(&m, &events).unwrap();
        assert!((prob - 0.62).abs() < 1e-9);
        assert_eq!(books, 5);

        // Reversed subject picks the other team.
        let m = sports_market("Will the Celtics beat the Lakers?", 0.50);
        let (prob, _, _) = match_to_external(&m, &events).unwrap();
        assert!((prob - 0.38).abs() < 1e-9);
    }

    #[test]
    fn test_requires_both_team_names() {
        let events = vec![event("Lakers", 0.62, "Celtics", 5)];
        let m = sports_market("Will the Lakers win the championship?", 0.50);
        assert!(match_to_external(&m, &events).is_none());
    }

    #[test]
    fn test_is_sports_market() {
        assert!(is_sports_market(&sports_market("Any question", 0.5)));
        let mut m = market("c1", 0.5, 0.0);
        m.question = "Will BTC close above 100k?".to_string();
        m.category = "crypto".to_string();
        assert!(!is_sports_market(&m));
        m.question = "Will the Knicks win tonight's game?".to_string();
        assert!(is_sports_market(&m));
    }
}
