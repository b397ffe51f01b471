//! Momentum: markets whose YES price has moved consistently one way.
//!
//! Snapshots are stored under the YES token, so the YES history decides
//! whether to buy YES (trending up) or NO (trending down). The edge decays
//! for very large moves, which are mostly already played out.

use async_trait::async_trait;

use super::{Signal, Strategy, StrategyContext};
use crate::models::{Market, SignalSide};

#[derive(Debug, Clone)]
pub struct MomentumParams {
    pub lookback_hours: i64,
    pub min_snapshots: usize,
    pub min_move_pct: f64,
    pub consistency_threshold: f64,
}

impl Default for MomentumParams {
    fn default() -> Self {
        Self {
            lookback_hours: 4,
            min_snapshots: 3,
            min_move_pct: 5.0,
            consistency_threshold: 0.65,
        }
    }
}

#[derive(Debug, Default)]
pub struct Momentum {
    pub params: MomentumParams,
}

impl Momentum {
    pub fn new(params: MomentumParams) -> Self {
        Self { params }
    }
}

#[async_trait]
impl Strategy for Momentum {
    fn name(&self) -> &'static str {
        "momentum"
    }

    async fn scan(&self, ctx: &StrategyContext, markets: &[Market]) -> anyhow::Result<Vec<Signal>> {
        let p = &self.params;
        let mut signals = Vec::new();

        for market in markets {
            if market.price_yes < 0.10 || market.price_yes > 0.90 {
                continue;
            }

            let snapshots = ctx
                .store
                .price_history(&market.token_id_yes, p.lookback_hours, 1000)
                .await?;
            if snapshots.len() < p.min_snapshots {
                continue;
            }

            let prices: Vec<f64> = snapshots.iter().map(|s| s.price_yes).collect();
            let oldest = prices[0];
            let newest = prices[prices.len() - 1];
            if oldest <= 0.0 {
                continue;
            }

            let total_move = newest - oldest;
            let total_move_pct = (total_move / oldest).abs() * 100.0;
            if total_move_pct < p.min_move_pct {
                continue;
            }

            // What fraction of intervals agree with the net direction?
            let direction = if total_move > 0.0 { 1.0 } else { -1.0 };
            let intervals = prices.len() - 1;
            let agreeing = prices
                .windows(2)
                .filter(|w| (w[1] - w[0]) * direction > 0.0)
                .count();
            let consistency = agreeing as f64 / intervals as f64;
            if consistency < p.consistency_threshold {
                continue;
            }

            let decay = (1.0 - total_move_pct / 50.0).max(0.3);
            let edge = total_move_pct * consistency * decay;
            let confidence = consistency.min(0.95);

            let (side, entry_price, reason) = if total_move > 0.0 {
                (
                    SignalSide::Yes,
                    market.price_yes,
                    format!(
                        "YES moved {total_move_pct:+.1}% over {}h \
                         ({agreeing}/{intervals} intervals consistent)",
                        p.lookback_hours
                    ),
                )
            } else {
                (
                    SignalSide::No,
                    market.price_no,
                    format!(
                        "YES fell {total_move_pct:.1}% over {}h, NO rising \
                         ({agreeing}/{intervals} intervals consistent)",
                        p.lookback_hours
                    ),
                )
            };

            signals.push(Signal {
                market: market.clone(),
                side,
                strategy: self.name().to_string(),
                edge_pct: edge,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriceSnapshot;
    use crate::strategy::testutil::{context_with, market, FixtureExchange};
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    async fn seed(ctx: &StrategyContext, token: &str, prices: &[f64], gap_hours: f64) {
        let now = Utc::now();
        let n = prices.len();
        for (i, price) in prices.iter().enumerate() {
            let back = gap_hours * (n - 1 - i) as f64;
            ctx.store
                .save_price_snapshot(&PriceSnapshot {
                    token_id: token.to_string(),
                    timestamp: now - Duration::seconds((back * 3600.0) as i64),
                    price_yes: *price,
                    price_no: 1.0 - *price,
                    best_bid: None,
                    best_ask: None,
                })
                .await
                .unwrap();
        }
    }

    fn strategy(lookback_hours: i64) -> Momentum {
        Momentum::new(MomentumParams {
            lookback_hours,
            min_snapshots: 3,
            min_move_pct: 5.0,
            consistency_threshold: 0.65,
        })
    }

    #[tokio::test]
    async fn test_clear_uptrend_emits_yes() {
        let ctx = context_with(Arc::new(FixtureExchange::default()));
        let m = market("m1", 0.55, 100_000.0);
        seed(
            &ctx,
            "m1_yes",
            &[0.42, 0.44, 0.46, 0.48, 0.50, 0.52, 0.54, 0.55],
            4.0 / 7.0,
        )
        .await;

        let signals = strategy(5).scan(&ctx, &[m]).await.unwrap();
        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.side, SignalSide::Yes);
        assert!(signal.edge_pct > 0.0);
        assert!(signal.confidence > 0.5);
        assert!(signal.confidence <= 0.95);
        assert_eq!(signal.entry_price, 0.55);
    }

    #[tokio::test]
    async fn test_choppy_history_is_silent() {
        let ctx = context_with(Arc::new(FixtureExchange::default()));
        let m = market("m1", 0.50, 100_000.0);
        seed(
            &ctx,
            "m1_yes",
            &[0.50, 0.53, 0.47, 0.53, 0.47, 0.53, 0.47, 0.50],
            4.0 / 7.0,
        )
        .await;

        let signals = strategy(5).scan(&ctx, &[m]).await.unwrap();
        assert!(signals.is_empty());
    }

    #[tokio::test]
    async fn test_downtrend_emits_no() {
        let ctx = context_with(Arc::new(FixtureExchange::default()));
        let m = market("m1", 0.40, 100_000.0);
        seed(&ctx, "m1_yes", &[0.52, 0.48, 0.44, 0.40], 0.5).await;

        let signals = strategy(4).scan(&ctx, &[m]).await.unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].side, SignalSide::No);
        assert_eq!(signals[0].entry_price, 0.60);
    }

    #[tokio::test]
    async fn test_two_snapshots_below_minimum() {
        let ctx = context_with(Arc::new(FixtureExchange::default()));
        let m = market("m1", 0.55, 100_000.0);
        seed(&ctx, "m1_yes", &[0.42, 0.55], 1.0).await;
        assert!(strategy(4).scan(&ctx, &[m.clone()]).await.unwrap().is_empty());

        // Exactly the minimum of 3 activates.
        let ctx3 = context_with(Arc::new(FixtureExchange::default()));
        seed(&ctx3, "m1_yes", &[0.42, 0.50, 0.55], 0.5).await;
        assert_eq!(strategy(4).scan(&ctx3, &[m]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_extreme_prices_skipped() {
        let ctx = context_with(Arc::new(FixtureExchange::default()));
        let m = market("m1", 0.95, 100_000.0);
        seed(&ctx, "m1_yes", &[0.80, 0.88, 0.95], 0.5).await;
        assert!(strategy(4).scan(&ctx, &[m]).await.unwrap().is_empty());
    }
}
