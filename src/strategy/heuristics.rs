//! Favorites and underdogs: liquidity-gated probability filters.
//!
//! Neither detects real edge; a 70 cent contract pays $1 about 70% of the
//! time in an efficient market. Both carry deliberately low confidence so
//! they only surface when nothing better is available, or as confirmation
//! alongside a genuine model.

use async_trait::async_trait;

use super::{Signal, Strategy, StrategyContext};
use crate::models::{Market, SignalSide};

#[derive(Debug, Clone)]
pub struct BandParams {
    pub min_prob: f64,
    pub max_prob: f64,
    pub min_volume: f64,
}

/// High-probability outcomes in liquid markets.
#[derive(Debug)]
pub struct Favorites {
    pub params: BandParams,
}

impl Default for Favorites {
    fn default() -> Self {
        Self {
            params: BandParams {
                min_prob: 0.65,
                max_prob: 0.85,
                min_volume: 100_000.0,
            },
        }
    }
}

#[async_trait]
impl Strategy for Favorites {
    fn name(&self) -> &'static str {
        "favorites"
    }

    async fn scan(&self, _ctx: &StrategyContext, markets: &[Market]) -> anyhow::Result<Vec<Signal>> {
        let p = &self.params;
        let mut signals = Vec::new();

        for market in markets {
            if market.volume < p.min_volume {
                continue;
            }
            for (side, price) in [
                (SignalSide::Yes, market.price_yes),
                (SignalSide::No, market.price_no),
            ] {
                if price < p.min_prob || price > p.max_prob {
                    continue;
                }
                let edge = (price - 0.50) * 100.0;
                let vol_factor = (market.volume / 500_000.0).min(1.0);
                let confidence = 0.35 + 0.15 * vol_factor;

                signals.push(Signal {
                    market: market.clone(),
                    side,
                    strategy: self.name().to_string(),
                    edge_pct: edge,
                    confidence,
                    entry_price: price,
                    reason: format!(
                        "{} at {:.0}% (vol ${:.0}) - crowd favorite, weak signal",
                        side.as_str(),
                        price * 100.0,
                        market.volume
                    ),
                });
            }
        }

        signals.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(signals)
    }
}

/// Low-probability, high-payout outcomes in liquid markets.
#[derive(Debug)]
pub struct Underdogs {
    pub params: BandParams,
}

impl Default for Underdogs {
    fn default() -> Self {
        Self {
            params: BandParams {
                min_prob: 0.20,
                max_prob: 0.40,
                min_volume: 100_000.0,
            },
        }
    }
}

#[async_trait]
impl Strategy for Underdogs {
    fn name(&self) -> &'static str {
        "underdogs"
    }

    async fn scan(&self, _ctx: &StrategyContext, markets: &[Market]) -> anyhow::Result<Vec<Signal>> {
        let p = &self.params;
        let mut signals = Vec::new();

        for market in markets {
            if market.volume < p.min_volume {
                continue;
            }
            for (side, price) in [
                (SignalSide::Yes, market.price_yes),
                (SignalSide::No, market.price_no),
            ] {
                if price < p.min_prob || price > p.max_prob {
                    continue;
                }
                let edge = (0.50 - price) * 100.0;
                let vol_factor = (market.volume / 500_000.0).min(1.0);
                let confidence = 0.30 + 0.10 * vol_factor;

                signals.push(Signal {
                    market: market.clone(),
                    side,
                    strategy: self.name().to_string(),
                    edge_pct: edge,
                    confidence,
                    entry_price: price,
                    reason: format!(
                        "{} underdog at {:.0}% (vol ${:.0}) - risk-seeking filter",
                        side.as_str(),
                        price * 100.0,
                        market.volume
                    ),
                });
            }
        }

        signals.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(signals)
    }
}
