//! Arbitrage: YES + NO purchasable for less than $1.00.
//!
//! Listing prices can be minutes stale and produce phantom opportunities,
//! so they are only a cheap pre-screen. Survivors are verified against the
//! live orderbook asks for *both* tokens before anything is reported.

use async_trait::async_trait;

use super::{Signal, Strategy, StrategyContext};
use crate::models::{Market, SignalSide};

#[derive(Debug, Clone)]
pub struct ArbitrageParams {
    /// Minimum net profit after fees, in percent.
    pub min_profit_pct: f64,
    /// Estimated fee per side as a fraction.
    pub fee_estimate: f64,
}

impl Default for ArbitrageParams {
    fn default() -> Self {
        Self {
            min_profit_pct: 1.5,
            fee_estimate: 0.002,
        }
    }
}

#[derive(Debug, Default)]
pub struct Arbitrage {
    pub params: ArbitrageParams,
}

impl Arbitrage {
    pub fn new(params: ArbitrageParams) -> Self {
        Self { params }
    }
}

/// Listing-price sum at or above this can't be an arb regardless of books.
const PRESCREEN_COMBINED: f64 = 0.995;

#[async_trait]
impl Strategy for Arbitrage {
    fn name(&self) -> &'static str {
        "arbitrage"
    }

    async fn scan(&self, ctx: &StrategyContext, markets: &[Market]) -> anyhow::Result<Vec<Signal>> {
        let p = &self.params;
        let mut signals = Vec::new();

        for market in markets {
            if market.price_yes + market.price_no >= PRESCREEN_COMBINED {
                continue;
            }

            // Verify against the live book on both legs.
            let yes_ask = match ctx.exchange.get_order_book(&market.token_id_yes).await {
                Some(book) => book.best_ask(),
                None => None,
            };
            let no_ask = match ctx.exchange.get_order_book(&market.token_id_no).await {
                Some(book) => book.best_ask(),
                None => None,
            };
            let (Some(yes_ask), Some(no_ask)) = (yes_ask, no_ask) else {
                continue;
            };

            let live_combined = yes_ask + no_ask;
            let total_fees = (yes_ask + no_ask) * p.fee_estimate * 2.0;
            let net_profit = 1.0 - live_combined - total_fees;
            let net_profit_pct = net_profit * 100.0;
            if net_profit_pct < p.min_profit_pct {
                continue;
            }

            signals.push(Signal {
                market: market.clone(),
                side: SignalSide::Arb,
                strategy: self.name().to_string(),
                edge_pct: net_profit_pct,
                confidence: 0.95,
                entry_price: live_combined,
                reason: format!(
                    "buy YES@{yes_ask:.3} + NO@{no_ask:.3} = {live_combined:.3}, \
                     net profit {net_profit_pct:.2}% after fees"
                ),
            });
        }

        signals.sort_by(|a, b| {
            b.edge_pct
                .partial_cmp(&a.edge_pct)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{BookLevel, OrderBook};
    use crate::strategy::testutil::{context_with, FixtureExchange};
    use crate::models::Market;
    use std::sync::Arc;

    fn ask_book(price: f64) -> OrderBook {
        OrderBook {
            bids: vec![BookLevel {
                price: price - 0.02,
                size: 500.0,
            }],
            asks: vec![BookLevel { price, size: 500.0 }],
        }
    }

    fn market(price_yes: f64, price_no: f64) -> Market {
        Market {
            id: "m1".to_string(),
            question: "Arb?".to_string(),
            slug: "arb".to_string(),
            condition_id: "0x1".to_string(),
            token_id_yes: "yes_tok".to_string(),
            token_id_no: "no_tok".to_string(),
            price_yes,
            price_no,
            volume: 100_000.0,
            liquidity: 50_000.0,
            category: "crypto".to_string(),
            end_date: None,
        }
    }

    #[tokio::test]
    async fn test_verified_arbitrage() {
        let exchange = Arc::new(FixtureExchange::default());
        exchange.set_book("yes_tok", ask_book(0.45)).await;
        exchange.set_book("no_tok", ask_book(0.52)).await;
        let ctx = context_with(exchange);

        let strategy = Arbitrage::new(ArbitrageParams {
            min_profit_pct: 1.0,
            fee_estimate: 0.002,
        });
        let signals = strategy
            .scan(&ctx, &[market(0.44, 0.51)])
            .await
            .unwrap();
        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.side, SignalSide::Arb);
        assert_eq!(signal.confidence, 0.95);
        // 1 - 0.97 - 0.97*0.004 = 0.02612 -> ~2.61%
        assert!((signal.edge_pct - 2.612).abs() < 0.01);
        assert!((signal.entry_price - 0.97).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_prescreen_cutoff_skips_book_fetch() {
        let exchange = Arc::new(FixtureExchange::default());
        // Even with a profitable live book, a listed sum at the cutoff is
        // never checked.
        exchange.set_book("yes_tok", ask_book(0.40)).await;
        exchange.set_book("no_tok", ask_book(0.40)).await;
        let ctx = context_with(exchange);

        let signals = Arbitrage::default()
            .scan(&ctx, &[market(0.50, 0.495)])
            .await
            .unwrap();
        assert!(signals.is_empty());
    }

    #[tokio::test]
    async fn test_missing_book_skips() {
        let exchange = Arc::new(FixtureExchange::default());
        exchange.set_book("yes_tok", ask_book(0.45)).await;
        // No book for the NO leg.
        let ctx = context_with(exchange);

        let signals = Arbitrage::default()
            .scan(&ctx, &[market(0.44, 0.51)])
            .await
            .unwrap();
        assert!(signals.is_empty());
    }

    #[tokio::test]
    async fn test_fees_eat_thin_edge() {
        let exchange = Arc::new(FixtureExchange::default());
        exchange.set_book("yes_tok", ask_book(0.49)).await;
        exchange.set_book("no_tok", ask_book(0.50)).await;
        let ctx = context_with(exchange);

        // Gross 1%, fees ~0.4%: below the 1.5% default floor.
        let signals = Arbitrage::default()
            .scan(&ctx, &[market(0.48, 0.49)])
            .await
            .unwrap();
        assert!(signals.is_empty());
    }
}
