//! Strategy engine: pluggable signal producers plus the dispatcher.
//!
//! A strategy maps a market universe to concrete [`Signal`]s. The dispatcher
//! runs a chosen subset by name, merges their output, filters by a minimum
//! edge, deduplicates by `(market, side)` keeping the higher-scoring signal,
//! and returns the top N by score. A strategy that errors is logged and
//! skipped; it never aborts the dispatch.

pub mod arbitrage;
pub mod heuristics;
pub mod mean_reversion;
pub mod momentum;
pub mod value_sports;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::gateway::{Exchange, OddsClient};
use crate::models::{Market, SignalSide};
use crate::store::Store;

pub use arbitrage::Arbitrage;
pub use heuristics::{Favorites, Underdogs};
pub use mean_reversion::MeanReversion;
pub use momentum::Momentum;
pub use value_sports::ValueSports;

/// A concrete trading opportunity produced by a strategy.
#[derive(Debug, Clone)]
pub struct Signal {
    pub market: Market,
    pub side: SignalSide,
    pub strategy: String,
    /// Estimated edge in percent. Higher is better.
    pub edge_pct: f64,
    /// How sure the strategy is, 0.0 - 1.0.
    pub confidence: f64,
    pub entry_price: f64,
    pub reason: String,
}

impl Signal {
    /// Composite ranking score.
    pub fn score(&self) -> f64 {
        self.edge_pct * self.confidence
    }
}

/// Shared read-only dependencies for strategies: stored price history and
/// live exchange data. Strategies keep no cross-call state of their own.
pub struct StrategyContext {
    pub store: Store,
    pub exchange: Arc<dyn Exchange>,
    pub odds: Option<Arc<OddsClient>>,
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn scan(&self, ctx: &StrategyContext, markets: &[Market]) -> anyhow::Result<Vec<Signal>>;
}

/// Name-keyed strategy table plus the dispatch logic.
pub struct StrategyEngine {
    ctx: StrategyContext,
    registry: HashMap<String, Arc<dyn Strategy>>,
}

impl StrategyEngine {
    pub fn new(ctx: StrategyContext) -> Self {
        Self {
            ctx,
            registry: HashMap::new(),
        }
    }

    /// Registry with every built-in strategy, including the `value` alias
    /// used by the mixed preset.
    pub fn with_defaults(ctx: StrategyContext) -> Self {
        let mut engine = Self::new(ctx);
        engine.register(Arc::new(Momentum::default()));
        engine.register(Arc::new(Arbitrage::default()));
        let value: Arc<dyn Strategy> = Arc::new(ValueSports::default());
        engine.register_as("value", Arc::clone(&value));
        engine.register(value);
        engine.register(Arc::new(MeanReversion::default()));
        engine.register(Arc::new(Favorites::default()));
        engine.register(Arc::new(Underdogs::default()));
        engine
    }

    pub fn register(&mut self, strategy: Arc<dyn Strategy>) {
        self.registry.insert(strategy.name().to_string(), strategy);
    }

    pub fn register_as(&mut self, name: &str, strategy: Arc<dyn Strategy>) {
        self.registry.insert(name.to_string(), strategy);
    }

    pub fn known_strategies(&self) -> Vec<String> {
        let mut names: Vec<_> = self.registry.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run the named strategies and return ranked, deduplicated signals.
    pub async fn find_signals(
        &self,
        markets: &[Market],
        strategies: &[String],
        min_edge_pct: f64,
        max_results: usize,
    ) -> Vec<Signal> {
        let mut all_signals = Vec::new();

        for name in strategies {
            let Some(strategy) = self.registry.get(name) else {
                warn!("unknown strategy: {name}");
                continue;
            };
            match strategy.scan(&self.ctx, markets).await {
                Ok(signals) => all_signals.extend(signals),
                Err(e) => warn!("strategy '{name}' failed: {e}"),
            }
        }

        rank_signals(all_signals, min_edge_pct, max_results)
    }
}

/// Filter, dedup by `(market, side)` keeping the higher score, sort by
/// score descending, truncate.
pub(crate) fn rank_signals(
    signals: Vec<Signal>,
    min_edge_pct: f64,
    max_results: usize,
) -> Vec<Signal> {
    let mut best: HashMap<(String, SignalSide), Signal> = HashMap::new();
    for signal in signals {
        if signal.edge_pct < min_edge_pct {
            continue;
        }
        let key = (signal.market.id.clone(), signal.side);
        match best.get(&key) {
            Some(existing) if existing.score() >= signal.score() => {}
            _ => {
                best.insert(key, signal);
            }
        }
    }

    let mut ranked: Vec<_> = best.into_values().collect();
    ranked.sort_by(|a, b| {
        b.score()
            .partial_cmp(&a.score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(max_results);
    ranked
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::gateway::{OrderAck, OrderBook, OrderRequest, OrderState};
    use std::collections::HashMap;
    use tokio::sync::Mutex as AsyncMutex;

    /// Minimal exchange stub serving fixed orderbooks and midpoints.
    #[derive(Default)]
    pub struct FixtureExchange {
        pub books: AsyncMutex<HashMap<String, OrderBook>>,
        pub midpoints: AsyncMutex<HashMap<String, f64>>,
    }

    impl FixtureExchange {
        pub async fn set_book(&self, token: &str, book: OrderBook) {
            self.books.lock().await.insert(token.to_string(), book);
        }
    }

    #[async_trait]
    impl Exchange for FixtureExchange {
        fn has_auth(&self) -> bool {
            false
        }

        async fn get_order_book(&self, token_id: &str) -> Option<OrderBook> {
            self.books.lock().await.get(token_id).cloned()
        }

        async fn get_midpoint(&self, token_id: &str) -> Option<f64> {
            self.midpoints.lock().await.get(token_id).copied()
        }

        async fn post_order(&self, _req: &OrderRequest) -> OrderAck {
            OrderAck::rejected("read-only fixture")
        }

        async fn get_order(&self, _order_id: &str) -> Option<OrderState> {
            None
        }

        async fn cancel(&self, _order_id: &str) -> bool {
            false
        }

        async fn cancel_all(&self) -> u32 {
            0
        }
    }

    pub fn market(id: &str, price_yes: f64, volume: f64) -> Market {
        Market {
            id: id.to_string(),
            question: format!("Market {id}?"),
            slug: id.to_string(),
            condition_id: format!("0x{id}"),
            token_id_yes: format!("{id}_yes"),
            token_id_no: format!("{id}_no"),
            price_yes,
            price_no: 1.0 - price_yes,
            volume,
            liquidity: 50_000.0,
            category: "crypto".to_string(),
            end_date: None,
        }
    }

    pub fn context_with(exchange: Arc<dyn Exchange>) -> StrategyContext {
        StrategyContext {
            store: Store::open_in_memory().unwrap(),
            exchange,
            odds: None,
        }
    }
}
