//! Order tracker: bridges "order acknowledged" and "position in portfolio".
//!
//! Submission success only means the order is LIVE on the book. This poller
//! walks every non-terminal order through LIVE → MATCHED / CANCELLED /
//! EXPIRED, detects new fills by the growth of `size_matched`, and fires the
//! fill callback with the volume-weighted fill price. Positions are mutated
//! nowhere else on the buy path.
//!
//! `filled_size` is monotone by contract. A decrease means the exchange and
//! our accounting have diverged and the process aborts rather than corrupt
//! the portfolio.
//!
//! State persists to the pending_orders table after every observation, so a
//! restart resumes polling exactly where it stopped. A crash inside the
//! window between a fill callback and its persist can re-deliver that fill;
//! the portfolio's averaging-in keeps the damage to double-counting, which
//! is the accepted residual risk.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::gateway::{Exchange, OrderState};
use crate::models::{OrderSide, OrderStatus, Outcome, TrackedOrder};
use crate::store::Store;

/// Fills smaller than this are noise.
const FILL_EPSILON: f64 = 0.001;

/// Receives confirmed fills and cancels. Handlers must be idempotent with
/// respect to re-delivered fills.
#[async_trait]
pub trait FillHandler: Send + Sync {
    async fn on_fill(&self, order: &TrackedOrder, new_fill: f64, fill_price: f64);
    async fn on_cancel(&self, order: &TrackedOrder);
}

pub struct OrderTracker {
    orders: Mutex<HashMap<String, TrackedOrder>>,
    exchange: Arc<dyn Exchange>,
    store: Store,
    handler: Arc<dyn FillHandler>,
    poll_interval: Duration,
    stale_after: ChronoDuration,
    running: AtomicBool,
}

impl OrderTracker {
    /// Loads non-terminal orders from the store so tracking survives
    /// restarts.
    pub async fn new(
        exchange: Arc<dyn Exchange>,
        store: Store,
        handler: Arc<dyn FillHandler>,
        poll_interval_secs: u64,
        stale_timeout_secs: u64,
    ) -> anyhow::Result<Arc<Self>> {
        let stale_after = ChronoDuration::seconds(stale_timeout_secs as i64);
        let recovered = store.pending_orders(None, stale_after).await?;
        if !recovered.is_empty() {
            info!("recovered {} pending orders from store", recovered.len());
        }
        let orders = recovered
            .into_iter()
            .map(|o| (o.order_id.clone(), o))
            .collect();

        Ok(Arc::new(Self {
            orders: Mutex::new(orders),
            exchange,
            store,
            handler,
            poll_interval: Duration::from_secs(poll_interval_secs),
            stale_after,
            running: AtomicBool::new(false),
        }))
    }

    // ── Public API ────────────────────────────────────────────

    /// Register a freshly acknowledged order. Call right after a successful
    /// submission; the portfolio is only touched once fills confirm.
    #[allow(clippy::too_many_arguments)]
    pub async fn track_order(
        &self,
        order_id: &str,
        token_id: &str,
        market_question: &str,
        side: Outcome,
        order_side: OrderSide,
        size: f64,
        limit_price: f64,
        strategy: Option<&str>,
    ) -> anyhow::Result<()> {
        let order = TrackedOrder {
            order_id: order_id.to_string(),
            token_id: token_id.to_string(),
            market_question: market_question.to_string(),
            side,
            order_side,
            size,
            limit_price,
            filled_size: 0.0,
            avg_fill_price: 0.0,
            status: OrderStatus::Live,
            created_at: Utc::now(),
            last_checked: None,
            stale_after: self.stale_after,
            strategy: strategy.map(str::to_string),
        };

        self.orders
            .lock()
            .insert(order_id.to_string(), order.clone());
        self.store.save_pending_order(&order).await?;
        info!(
            "tracking order {order_id}: {} {size:.1} {} @ {limit_price:.4}",
            order_side.as_str(),
            side.as_str()
        );
        Ok(())
    }

    pub fn tracked_orders(&self) -> Vec<TrackedOrder> {
        self.orders.lock().values().cloned().collect()
    }

    pub fn order(&self, order_id: &str) -> Option<TrackedOrder> {
        self.orders.lock().get(order_id).cloned()
    }

    pub fn pending_count(&self) -> usize {
        self.orders
            .lock()
            .values()
            .filter(|o| !o.is_terminal())
            .count()
    }

    /// Stop tracking locally. Does NOT cancel the order on the exchange.
    pub async fn cancel_tracking(&self, order_id: &str) -> anyhow::Result<()> {
        let updated = {
            let mut orders = self.orders.lock();
            match orders.get_mut(order_id) {
                Some(order) => {
                    order.status = OrderStatus::Cancelled;
                    Some((order.filled_size, order.avg_fill_price))
                }
                None => None,
            }
        };
        if let Some((filled, avg)) = updated {
            self.store
                .update_pending_order(order_id, OrderStatus::Cancelled, filled, avg)
                .await?;
        }
        Ok(())
    }

    // ── Lifecycle ─────────────────────────────────────────────

    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            info!(
                "order tracker started (polling every {}s)",
                tracker.poll_interval.as_secs()
            );
            while tracker.running.load(Ordering::SeqCst) {
                tracker.poll_once().await;
                sleep(tracker.poll_interval).await;
            }
            info!("order tracker stopped");
        });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// One poll cycle over every non-terminal order. Public so tests and
    /// manual tools can drive the tracker without the background task.
    pub async fn poll_once(&self) {
        let active: Vec<String> = {
            let orders = self.orders.lock();
            orders
                .values()
                .filter(|o| !o.is_terminal())
                .map(|o| o.order_id.clone())
                .collect()
        };
        if active.is_empty() || !self.exchange.has_auth() {
            return;
        }

        for order_id in active {
            if let Err(e) = self.check_order(&order_id).await {
                warn!("failed to check order {order_id}: {e}");
            }
        }
    }

    // ── Internals ─────────────────────────────────────────────

    async fn check_order(&self, order_id: &str) -> anyhow::Result<()> {
        let Some(snapshot) = self.order(order_id) else {
            return Ok(());
        };
        if snapshot.is_terminal() {
            return Ok(());
        }

        let now = Utc::now();
        if snapshot.is_stale(now) {
            return self.expire_stale(order_id).await;
        }

        let Some(api) = self.exchange.get_order(order_id).await else {
            // API error: skip this cycle, state unchanged.
            return Ok(());
        };
        self.apply_update(order_id, &api).await
    }

    /// Stale LIVE order: best-effort cancel on the exchange, then stop
    /// tracking. Fires `on_cancel` exactly once.
    async fn expire_stale(&self, order_id: &str) -> anyhow::Result<()> {
        info!("order {order_id} stale after {}s - attempting cancel", self.stale_after.num_seconds());
        let cancelled = self.exchange.cancel(order_id).await;
        let status = if cancelled {
            OrderStatus::Cancelled
        } else {
            OrderStatus::Expired
        };

        let final_order = {
            let mut orders = self.orders.lock();
            match orders.get_mut(order_id) {
                Some(order) => {
                    order.status = status;
                    order.clone()
                }
                None => return Ok(()),
            }
        };

        self.store
            .update_pending_order(
                order_id,
                status,
                final_order.filled_size,
                final_order.avg_fill_price,
            )
            .await?;
        self.handler.on_cancel(&final_order).await;
        Ok(())
    }

    /// Apply one observed order state: detect new fills, fire callbacks,
    /// transition status, persist.
    pub async fn apply_update(&self, order_id: &str, api: &OrderState) -> anyhow::Result<()> {
        // Fill info from individual trades when present, headline fields
        // otherwise.
        let trade_size: f64 = api.trades.iter().map(|t| t.size).sum();
        let trade_value: f64 = api.trades.iter().map(|t| t.size * t.price).sum();

        let (fill_event, cancel_event, final_order) = {
            let mut orders = self.orders.lock();
            let Some(order) = orders.get_mut(order_id) else {
                return Ok(());
            };
            order.last_checked = Some(Utc::now());

            let observed_avg = if trade_size > 0.0 {
                trade_value / trade_size
            } else {
                api.price.unwrap_or(order.limit_price)
            };
            let size_matched = api.size_matched.max(trade_size);

            let prev_filled = order.filled_size;
            if size_matched + FILL_EPSILON < prev_filled {
                error!(
                    "filled_size regression on {order_id}: {prev_filled} -> {size_matched}; \
                     aborting"
                );
                panic!("filled_size decreased for order {order_id}");
            }

            let new_fill = size_matched - prev_filled;
            let mut fill_event = None;
            if new_fill > FILL_EPSILON {
                // Price of just the new shares, backed out of the running
                // totals when individual trades are reported.
                let mut fill_price = if trade_size > 0.0 && prev_filled > 0.0 {
                    (trade_value - prev_filled * order.avg_fill_price) / new_fill
                } else {
                    observed_avg
                };
                if !fill_price.is_finite() || fill_price <= 0.0 {
                    fill_price = observed_avg;
                }
                order.filled_size = size_matched;
                order.avg_fill_price = if order.avg_fill_price > 0.0 && prev_filled > 0.0 {
                    (prev_filled * order.avg_fill_price + new_fill * fill_price) / size_matched
                } else {
                    fill_price
                };
                info!(
                    "fill detected: {order_id} - {new_fill:.2} @ {fill_price:.4} \
                     (total: {size_matched:.2}/{:.2})",
                    order.size
                );
                fill_event = Some((order.clone(), new_fill, fill_price));
            }

            let api_status = OrderStatus::parse(&api.status);
            let mut cancel_event = None;
            if api_status == Some(OrderStatus::Matched) || order.is_fully_filled() {
                order.status = OrderStatus::Matched;
                info!(
                    "order {order_id} fully filled at avg {:.4}",
                    order.avg_fill_price
                );
            } else if api_status == Some(OrderStatus::Cancelled) {
                order.status = OrderStatus::Cancelled;
                if order.filled_size > 0.0 {
                    warn!(
                        "order {order_id} cancelled with partial fill: {:.2}/{:.2}",
                        order.filled_size, order.size
                    );
                } else {
                    warn!("order {order_id} cancelled (unfilled)");
                }
                cancel_event = Some(order.clone());
            } else if order.filled_size > 0.0 {
                order.status = OrderStatus::PartiallyFilled;
            } else {
                order.status = OrderStatus::Live;
            }

            (fill_event, cancel_event, order.clone())
        };

        // Callbacks run before the status persist so a crash re-delivers
        // rather than drops a fill.
        if let Some((order, new_fill, fill_price)) = fill_event {
            self.handler.on_fill(&order, new_fill, fill_price).await;
        }
        if let Some(order) = cancel_event {
            self.handler.on_cancel(&order).await;
        }

        self.store
            .update_pending_order(
                order_id,
                final_order.status,
                final_order.filled_size,
                final_order.avg_fill_price,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{FillTrade, OrderAck, OrderBook, OrderRequest};
    use tokio::sync::Mutex as AsyncMutex;

    /// Scripted exchange: serves queued order states, records cancels.
    struct ScriptedExchange {
        states: AsyncMutex<HashMap<String, Vec<OrderState>>>,
        cancels: AsyncMutex<Vec<String>>,
    }

    impl ScriptedExchange {
        fn new() -> Self {
            Self {
                states: AsyncMutex::new(HashMap::new()),
                cancels: AsyncMutex::new(Vec::new()),
            }
        }

        async fn push_state(&self, order_id: &str, state: OrderState) {
            self.states
                .lock()
                .await
                .entry(order_id.to_string())
                .or_default()
                .push(state);
        }
    }

    #[async_trait]
    impl Exchange for ScriptedExchange {
        fn has_auth(&self) -> bool {
            true
        }

        async fn get_order_book(&self, _token_id: &str) -> Option<OrderBook> {
            None
        }

        async fn get_midpoint(&self, _token_id: &str) -> Option<f64> {
            None
        }

        async fn post_order(&self, _req: &OrderRequest) -> OrderAck {
            OrderAck::accepted("scripted".to_string())
        }

        async fn get_order(&self, order_id: &str) -> Option<OrderState> {
            let mut states = self.states.lock().await;
            let queue = states.get_mut(order_id)?;
            if queue.is_empty() {
                None
            } else {
                Some(queue.remove(0))
            }
        }

        async fn cancel(&self, order_id: &str) -> bool {
            self.cancels.lock().await.push(order_id.to_string());
            true
        }

        async fn cancel_all(&self) -> u32 {
            0
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        fills: Mutex<Vec<(String, f64, f64)>>,
        cancels: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl FillHandler for RecordingHandler {
        async fn on_fill(&self, order: &TrackedOrder, new_fill: f64, fill_price: f64) {
            self.fills
                .lock()
                .push((order.order_id.clone(), new_fill, fill_price));
        }

        async fn on_cancel(&self, order: &TrackedOrder) {
            self.cancels.lock().push(order.order_id.clone());
        }
    }

    async fn tracker_with(
        exchange: Arc<ScriptedExchange>,
        handler: Arc<RecordingHandler>,
        store: Store,
    ) -> Arc<OrderTracker> {
        OrderTracker::new(exchange, store, handler, 5, 1800)
            .await
            .unwrap()
    }

    fn state(status: &str, size_matched: f64, trades: Vec<(f64, f64)>) -> OrderState {
        OrderState {
            status: status.to_string(),
            size_matched,
            price: None,
            original_size: Some(100.0),
            trades: trades
                .into_iter()
                .map(|(size, price)| FillTrade { size, price })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_partial_then_full_fill() {
        let exchange = Arc::new(ScriptedExchange::new());
        let handler = Arc::new(RecordingHandler::default());
        let store = Store::open_in_memory().unwrap();
        let tracker = tracker_with(exchange.clone(), handler.clone(), store.clone()).await;

        tracker
            .track_order("o1", "tok", "q", Outcome::Yes, OrderSide::Buy, 100.0, 0.50, None)
            .await
            .unwrap();

        exchange
            .push_state("o1", state("LIVE", 40.0, vec![(40.0, 0.50)]))
            .await;
        tracker.poll_once().await;

        {
            let order = tracker.order("o1").unwrap();
            assert_eq!(order.status, OrderStatus::PartiallyFilled);
            assert_eq!(order.filled_size, 40.0);
            assert!((order.avg_fill_price - 0.50).abs() < 1e-9);
        }

        exchange
            .push_state(
                "o1",
                state("MATCHED", 100.0, vec![(40.0, 0.50), (60.0, 0.48)]),
            )
            .await;
        tracker.poll_once().await;

        let order = tracker.order("o1").unwrap();
        assert_eq!(order.status, OrderStatus::Matched);
        assert_eq!(order.filled_size, 100.0);
        assert!((order.avg_fill_price - 0.488).abs() < 1e-9);

        let fills = handler.fills.lock().clone();
        assert_eq!(fills.len(), 2);
        assert!((fills[0].1 - 40.0).abs() < 1e-9);
        assert!((fills[0].2 - 0.50).abs() < 1e-9);
        assert!((fills[1].1 - 60.0).abs() < 1e-9);
        // The delta is priced at the new shares only, not the running
        // average: (48.8 - 40*0.50) / 60 = 0.48.
        assert!((fills[1].2 - 0.48).abs() < 1e-9);

        // Persisted state matches.
        let (status, filled, avg) = store.pending_order("o1").await.unwrap().unwrap();
        assert_eq!(status, OrderStatus::Matched);
        assert_eq!(filled, 100.0);
        assert!((avg - 0.488).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_fill_sum_equals_tracked_total_when_matched() {
        let exchange = Arc::new(ScriptedExchange::new());
        let handler = Arc::new(RecordingHandler::default());
        let store = Store::open_in_memory().unwrap();
        let tracker = tracker_with(exchange.clone(), handler.clone(), store).await;

        tracker
            .track_order("o1", "tok", "q", Outcome::Yes, OrderSide::Buy, 60.0, 0.40, None)
            .await
            .unwrap();
        for matched in [15.0, 35.0, 60.0] {
            exchange
                .push_state("o1", state("LIVE", matched, vec![]))
                .await;
            tracker.poll_once().await;
        }

        let order = tracker.order("o1").unwrap();
        assert_eq!(order.status, OrderStatus::Matched);
        let delivered: f64 = handler.fills.lock().iter().map(|f| f.1).sum();
        assert!((delivered - order.filled_size).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_tiny_fill_ignored() {
        let exchange = Arc::new(ScriptedExchange::new());
        let handler = Arc::new(RecordingHandler::default());
        let store = Store::open_in_memory().unwrap();
        let tracker = tracker_with(exchange.clone(), handler.clone(), store).await;

        tracker
            .track_order("o1", "tok", "q", Outcome::Yes, OrderSide::Buy, 100.0, 0.50, None)
            .await
            .unwrap();
        exchange
            .push_state("o1", state("LIVE", 0.0005, vec![]))
            .await;
        tracker.poll_once().await;

        assert!(handler.fills.lock().is_empty());
        assert_eq!(tracker.order("o1").unwrap().status, OrderStatus::Live);
    }

    #[tokio::test]
    async fn test_stale_order_cancelled_once() {
        let exchange = Arc::new(ScriptedExchange::new());
        let handler = Arc::new(RecordingHandler::default());
        let store = Store::open_in_memory().unwrap();
        // Zero stale timeout: everything is immediately stale.
        let tracker = OrderTracker::new(exchange.clone(), store, handler.clone(), 5, 0)
            .await
            .unwrap();

        tracker
            .track_order("o1", "tok", "q", Outcome::Yes, OrderSide::Buy, 10.0, 0.50, None)
            .await
            .unwrap();
        tracker.poll_once().await;
        tracker.poll_once().await;

        assert_eq!(exchange.cancels.lock().await.len(), 1);
        assert_eq!(handler.cancels.lock().len(), 1);
        assert_eq!(tracker.order("o1").unwrap().status, OrderStatus::Cancelled);
        assert_eq!(tracker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_api_cancel_keeps_partial_fill() {
        let exchange = Arc::new(ScriptedExchange::new());
        let handler = Arc::new(RecordingHandler::default());
        let store = Store::open_in_memory().unwrap();
        let tracker = tracker_with(exchange.clone(), handler.clone(), store).await;

        tracker
            .track_order("o1", "tok", "q", Outcome::Yes, OrderSide::Buy, 100.0, 0.50, None)
            .await
            .unwrap();
        exchange
            .push_state("o1", state("LIVE", 25.0, vec![(25.0, 0.49)]))
            .await;
        tracker.poll_once().await;
        exchange
            .push_state("o1", state("CANCELLED", 25.0, vec![(25.0, 0.49)]))
            .await;
        tracker.poll_once().await;

        let order = tracker.order("o1").unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.filled_size, 25.0);
        assert_eq!(handler.cancels.lock().len(), 1);
        assert_eq!(handler.fills.lock().len(), 1);

        // Terminal: further polls never re-fire.
        tracker.poll_once().await;
        assert_eq!(handler.cancels.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_crash_recovery_resumes_tracking() {
        let exchange = Arc::new(ScriptedExchange::new());
        let handler = Arc::new(RecordingHandler::default());
        let store = Store::open_in_memory().unwrap();

        {
            let tracker =
                tracker_with(exchange.clone(), handler.clone(), store.clone()).await;
            tracker
                .track_order("o1", "tok", "q", Outcome::Yes, OrderSide::Buy, 100.0, 0.50, None)
                .await
                .unwrap();
            exchange
                .push_state("o1", state("LIVE", 40.0, vec![(40.0, 0.50)]))
                .await;
            tracker.poll_once().await;
            // Tracker dropped here: simulated crash.
        }

        let revived = tracker_with(exchange.clone(), handler.clone(), store).await;
        let order = revived.order("o1").expect("order recovered");
        assert_eq!(order.filled_size, 40.0);
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(revived.pending_count(), 1);

        // Remaining fill still lands after the restart.
        exchange
            .push_state(
                "o1",
                state("MATCHED", 100.0, vec![(40.0, 0.50), (60.0, 0.48)]),
            )
            .await;
        revived.poll_once().await;
        assert_eq!(revived.order("o1").unwrap().status, OrderStatus::Matched);
        let delivered: f64 = handler.fills.lock().iter().map(|f| f.1).sum();
        assert!((delivered - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    #[should_panic(expected = "filled_size decreased")]
    async fn test_filled_size_regression_aborts() {
        let exchange = Arc::new(ScriptedExchange::new());
        let handler = Arc::new(RecordingHandler::default());
        let store = Store::open_in_memory().unwrap();
        let tracker = tracker_with(exchange.clone(), handler, store).await;

        tracker
            .track_order("o1", "tok", "q", Outcome::Yes, OrderSide::Buy, 100.0, 0.50, None)
            .await
            .unwrap();
        exchange
            .push_state("o1", state("LIVE", 50.0, vec![]))
            .await;
        tracker.poll_once().await;

        tracker
            .apply_update("o1", &state("LIVE", 10.0, vec![]))
            .await
            .unwrap();
    }
}
