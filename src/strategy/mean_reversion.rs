//! Mean reversion: bet against sudden spikes that are likely overreactions.
//!
//! The deviation is measured against the average over a long lookback, but
//! only *recent* spikes qualify: most of the move must have happened inside
//! the reversion window. Slow sustained moves belong to momentum, not here.

use async_trait::async_trait;
use chrono::{Duration, Utc};

use super::{Signal, Strategy, StrategyContext};
use crate::models::{Market, Outcome, SignalSide};

#[derive(Debug, Clone)]
pub struct MeanReversionParams {
    pub lookback_hours: i64,
    pub min_snapshots: usize,
    pub min_spike_pct: f64,
    pub reversion_window_hours: i64,
}

impl Default for MeanReversionParams {
    fn default() -> Self {
        Self {
            lookback_hours: 12,
            min_snapshots: 5,
            min_spike_pct: 10.0,
            reversion_window_hours: 2,
        }
    }
}

#[derive(Debug, Default)]
pub struct MeanReversion {
    pub params: MeanReversionParams,
}

impl MeanReversion {
    pub fn new(params: MeanReversionParams) -> Self {
        Self { params }
    }
}

#[async_trait]
impl Strategy for MeanReversion {
    fn name(&self) -> &'static str {
        "mean_reversion"
    }

    async fn scan(&self, ctx: &StrategyContext, markets: &[Market]) -> anyhow::Result<Vec<Signal>> {
        let p = &self.params;
        let mut signals = Vec::new();

        for market in markets {
            for (side, token_id, current_price) in [
                (Outcome::Yes, &market.token_id_yes, market.price_yes),
                (Outcome::No, &market.token_id_no, market.price_no),
            ] {
                if !(0.10..=0.90).contains(&current_price) {
                    continue;
                }

                let snapshots = ctx
                    .store
                    .price_history(token_id, p.lookback_hours, 1000)
                    .await?;
                if snapshots.len() < p.min_snapshots {
                    continue;
                }

                let prices: Vec<f64> = snapshots.iter().map(|s| s.price_yes).collect();
                let avg = prices.iter().sum::<f64>() / prices.len() as f64;
                if avg <= 0.0 {
                    continue;
                }

                let deviation = current_price - avg;
                let deviation_pct = deviation / avg * 100.0;
                if deviation_pct.abs() < p.min_spike_pct {
                    continue;
                }

                // Recency check: the move inside the reversion window must
                // account for most of the spike.
                let cutoff = Utc::now() - Duration::hours(p.reversion_window_hours);
                let recent: Vec<f64> = snapshots
                    .iter()
                    .filter(|s| s.timestamp >= cutoff)
                    .map(|s| s.price_yes)
                    .collect();
                if recent.len() < 2 || recent[0] <= 0.0 {
                    continue;
                }
                let recent_move_pct =
                    ((recent[recent.len() - 1] - recent[0]) / recent[0]).abs() * 100.0;
                if recent_move_pct < p.min_spike_pct * 0.6 {
                    continue;
                }

                // Expect roughly half the spike to revert.
                let edge = deviation_pct.abs() * 0.5;
                let (bet_side, entry_price) = if deviation > 0.0 {
                    // Spiked up: bet the other side.
                    match side {
                        Outcome::Yes => (SignalSide::No, market.price_no),
                        Outcome::No => (SignalSide::Yes, market.price_yes),
                    }
                } else {
                    // Dropped: bet on recovery.
                    match side {
                        Outcome::Yes => (SignalSide::Yes, market.price_yes),
                        Outcome::No => (SignalSide::No, market.price_no),
                    }
                };

                signals.push(Signal {
                    market: market.clone(),
                    side: bet_side,
                    strategy: self.name().to_string(),
                    edge_pct: edge,
                    confidence: 0.55,
                    entry_price,
                    reason: format!(
                        "{} {} {deviation_pct:+.1}% vs {}h avg ({avg:.3} -> \
                         {current_price:.3}), expecting partial reversion",
                        side.as_str(),
                        if deviation > 0.0 { "spiked" } else { "dropped" },
                        p.lookback_hours
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
