//! Trigger-order engine: take profit, stop loss, trailing stops, OCO.
//!
//! The engine owns every order it submits end to end. Buys go through the
//! exchange, get registered with the fill tracker, and only the tracker's
//! confirmed-fill callback creates positions. Exit triggers are evaluated
//! against midpoint prices each monitor tick; firing one submits a market
//! sell (an aggressive limit at the best bid) and cancels its linked OCO
//! partner in the same tick.
//!
//! Trigger state changes are atomic under the order-map lock, so the
//! in-cycle tick and the background monitor can overlap without
//! double-firing.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::{SafetyConfig, TradingConfig};
use crate::gateway::{Exchange, OrderAck, OrderRequest};
use crate::models::{
    AutoOrder, AutoOrderState, AutoOrderType, OrderSide, Outcome, TrackedOrder,
};
use crate::portfolio::{truncate, Portfolio};
use crate::risk::intent_fingerprint;
use crate::store::Store;
use crate::tracker::{FillHandler, OrderTracker};

use async_trait::async_trait;

/// A position as seen by the exit rules, registered from confirmed fills.
#[derive(Debug, Clone)]
pub struct EnginePosition {
    pub token_id: String,
    pub market_question: String,
    pub side: Outcome,
    pub size: f64,
    pub entry_price: f64,
}

pub type PositionBook = Arc<RwLock<HashMap<String, EnginePosition>>>;

/// Routes confirmed fills into the portfolio and the engine's position
/// book. BUY fills open or grow positions; SELL fills reduce them and
/// realize P&L. Cancels only log; partial fills stay recorded.
pub struct FillRouter {
    portfolio: Arc<Portfolio>,
    positions: PositionBook,
}

#[async_trait]
impl FillHandler for FillRouter {
    async fn on_fill(&self, order: &TrackedOrder, new_fill: f64, fill_price: f64) {
        match order.order_side {
            OrderSide::Sell => {
                match self
                    .portfolio
                    .close_position(
                        &order.token_id,
                        order.side,
                        new_fill,
                        fill_price,
                        Some(&order.order_id),
                        order.strategy.as_deref(),
                    )
                    .await
                {
                    Ok(realized) => {
                        info!(
                            "sell fill confirmed: -{new_fill:.2} {} @ {fill_price:.4} | \
                             realized ${realized:+.2}",
                            order.side.as_str()
                        );
                        let mut positions = self.positions.write();
                        if let Some(pos) = positions.get_mut(&order.token_id) {
                            pos.size -= new_fill;
                            if pos.size <= 1e-9 {
                                positions.remove(&order.token_id);
                            }
                        }
                    }
                    Err(e) => error!("failed to apply sell fill for {}: {e}", order.order_id),
                }
            }
            OrderSide::Buy => {
                if let Err(e) = self
                    .portfolio
                    .add_position(
                        &order.token_id,
                        &order.market_question,
                        order.side,
                        new_fill,
                        fill_price,
                        Some(&order.order_id),
                        order.strategy.as_deref(),
                    )
                    .await
                {
                    error!("failed to apply buy fill for {}: {e}", order.order_id);
                    return;
                }
                // Exit rules only ever see confirmed positions.
                let mut positions = self.positions.write();
                let entry = positions
                    .entry(order.token_id.clone())
                    .or_insert_with(|| EnginePosition {
                        token_id: order.token_id.clone(),
                        market_question: order.market_question.clone(),
                        side: order.side,
                        size: 0.0,
                        entry_price: fill_price,
                    });
                entry.size += new_fill;
                entry.entry_price = fill_price;
                info!(
                    "position updated: +{new_fill:.2} {} @ {fill_price:.4} ({})",
                    order.side.as_str(),
                    truncate(&order.market_question, 35)
                );
            }
        }
    }

    async fn on_cancel(&self, order: &TrackedOrder) {
        if order.filled_size > 0.0 {
            info!(
                "order {} cancelled with partial fill ({:.2}/{:.2})",
                order.order_id, order.filled_size, order.size
            );
        } else {
            info!("order {} cancelled/expired - no position created", order.order_id);
        }
    }
}

/// Result of `buy_with_tp_sl`.
#[derive(Debug, Clone)]
pub struct EntryWithExits {
    pub buy: OrderAck,
    pub take_profit_id: Option<String>,
    pub stop_loss_id: Option<String>,
    pub trailing_stop_id: Option<String>,
}

pub struct OrderEngine {
    exchange: Arc<dyn Exchange>,
    store: Store,
    portfolio: Arc<Portfolio>,
    tracker: Arc<OrderTracker>,
    positions: PositionBook,
    orders: RwLock<HashMap<String, AutoOrder>>,
    trading: TradingConfig,
    safety: SafetyConfig,
    order_counter: AtomicU64,
    monitoring: AtomicBool,
}

impl OrderEngine {
    /// Wires the fill router and tracker. The tracker recovers any pending
    /// orders from the store before the first poll.
    pub async fn new(
        exchange: Arc<dyn Exchange>,
        store: Store,
        portfolio: Arc<Portfolio>,
        trading: TradingConfig,
        safety: SafetyConfig,
        poll_interval_secs: u64,
    ) -> anyhow::Result<Arc<Self>> {
        let positions: PositionBook = Arc::new(RwLock::new(HashMap::new()));
        let router = Arc::new(FillRouter {
            portfolio: Arc::clone(&portfolio),
            positions: Arc::clone(&positions),
        });
        let tracker = OrderTracker::new(
            Arc::clone(&exchange),
            store.clone(),
            router,
            poll_interval_secs,
            safety.order_ttl_seconds,
        )
        .await?;

        Ok(Arc::new(Self {
            exchange,
            store,
            portfolio,
            tracker,
            positions,
            orders: RwLock::new(HashMap::new()),
            trading,
            safety,
            order_counter: AtomicU64::new(0),
            monitoring: AtomicBool::new(false),
        }))
    }

    pub fn tracker(&self) -> &Arc<OrderTracker> {
        &self.tracker
    }

    pub fn positions(&self) -> Vec<EnginePosition> {
        self.positions.read().values().cloned().collect()
    }

    fn next_order_id(&self) -> String {
        let n = self.order_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("AUTO_{}_{n}", Utc::now().format("%Y%m%d%H%M%S"))
    }

    // ── Entries ───────────────────────────────────────────────

    fn validate_buy(&self, size: f64, price: f64, exposure: f64) -> Option<String> {
        if size <= 0.0 {
            return Some("size must be positive".to_string());
        }
        if price <= 0.0 || price >= 1.0 {
            return Some("price must be between 0 and 1".to_string());
        }
        let notional = size * price;
        if notional > self.trading.max_trade_size {
            return Some(format!(
                "trade value (${notional:.2}) exceeds max (${:.2})",
                self.trading.max_trade_size
            ));
        }
        if exposure + notional > self.trading.max_total_exposure {
            return Some(format!(
                "would exceed max exposure (${:.2})",
                self.trading.max_total_exposure
            ));
        }
        None
    }

    /// Submit a limit BUY and track it for fills. The position is created by
    /// the fill callback, never here.
    pub async fn buy(
        &self,
        token_id: &str,
        market_question: &str,
        side: Outcome,
        size: f64,
        price: f64,
        strategy: Option<&str>,
    ) -> OrderAck {
        let exposure = self.portfolio.get_total_exposure().await;
        if let Some(error) = self.validate_buy(size, price, exposure) {
            return OrderAck::rejected(error);
        }
        if let Err(ack) = self
            .guard_intent(token_id, side.as_str(), OrderSide::Buy, price, size, strategy)
            .await
        {
            return ack;
        }

        let ack = self
            .exchange
            .post_order(&OrderRequest {
                token_id: token_id.to_string(),
                side: OrderSide::Buy,
                price,
                size,
            })
            .await;

        if ack.success {
            if let Some(order_id) = &ack.order_id {
                if let Err(e) = self
                    .tracker
                    .track_order(
                        order_id,
                        token_id,
                        market_question,
                        side,
                        OrderSide::Buy,
                        size,
                        price,
                        strategy,
                    )
                    .await
                {
                    error!("failed to persist tracking for {order_id}: {e}");
                }
                info!("order {order_id} placed - awaiting fill confirmation");
            }
        }
        ack
    }

    /// Submit a limit SELL and track it; the portfolio shrinks only on
    /// confirmed sell fills.
    pub async fn sell(
        &self,
        token_id: &str,
        market_question: &str,
        side: Outcome,
        size: f64,
        price: f64,
        strategy: Option<&str>,
    ) -> OrderAck {
        if size <= 0.0 || price <= 0.0 || price >= 1.0 {
            return OrderAck::rejected("invalid sell parameters");
        }
        // Sells are never blocked by the kill switch, but they are still
        // idempotency-guarded.
        if let Err(ack) = self
            .guard_intent(token_id, side.as_str(), OrderSide::Sell, price, size, strategy)
            .await
        {
            return ack;
        }

        let ack = self
            .exchange
            .post_order(&OrderRequest {
                token_id: token_id.to_string(),
                side: OrderSide::Sell,
                price,
                size,
            })
            .await;

        if ack.success {
            if let Some(order_id) = &ack.order_id {
                if let Err(e) = self
                    .tracker
                    .track_order(
                        order_id,
                        token_id,
                        market_question,
                        side,
                        OrderSide::Sell,
                        size,
                        price,
                        strategy,
                    )
                    .await
                {
                    error!("failed to persist tracking for {order_id}: {e}");
                }
                info!("sell order {order_id} placed - awaiting fill confirmation");
            }
        }
        ack
    }

    /// Market sell: an aggressive limit at the best bid minus slippage.
    pub async fn market_sell(
        &self,
        token_id: &str,
        market_question: &str,
        side: Outcome,
        size: f64,
        strategy: Option<&str>,
    ) -> OrderAck {
        let Some(book) = self.exchange.get_order_book(token_id).await else {
            return OrderAck::rejected("no orderbook available");
        };
        let Some(best_bid) = book.best_bid() else {
            return OrderAck::rejected("no liquidity");
        };
        let price = (best_bid * (1.0 - self.trading.default_slippage)).clamp(0.01, 0.99);
        self.sell(token_id, market_question, side, size, price, strategy)
            .await
    }

    /// BUY plus the requested exit triggers. TP and SL on the same
    /// position are automatically linked one-cancels-other.
    #[allow(clippy::too_many_arguments)]
    pub async fn buy_with_tp_sl(
        &self,
        token_id: &str,
        market_question: &str,
        side: Outcome,
        size: f64,
        entry_price: f64,
        take_profit: Option<f64>,
        stop_loss: Option<f64>,
        trailing_stop_percent: Option<f64>,
        strategy: Option<&str>,
    ) -> EntryWithExits {
        let buy = self
            .buy(token_id, market_question, side, size, entry_price, strategy)
            .await;
        if !buy.success {
            return EntryWithExits {
                buy,
                take_profit_id: None,
                stop_loss_id: None,
                trailing_stop_id: None,
            };
        }

        let take_profit_id = match take_profit {
            Some(price) => Some(
                self.set_take_profit(token_id, market_question, side, size, price)
                    .await,
            ),
            None => None,
        };
        let stop_loss_id = match stop_loss {
            Some(price) => Some(
                self.set_stop_loss(token_id, market_question, side, size, price)
                    .await,
            ),
            None => None,
        };
        if let (Some(tp), Some(sl)) = (&take_profit_id, &stop_loss_id) {
            self.link_oco(tp, sl);
        }
        let trailing_stop_id = match trailing_stop_percent {
            Some(trail) => Some(
                self.set_trailing_stop(token_id, market_question, side, size, trail, entry_price)
                    .await,
            ),
            None => None,
        };

        EntryWithExits {
            buy,
            take_profit_id,
            stop_loss_id,
            trailing_stop_id,
        }
    }

    async fn guard_intent(
        &self,
        token_id: &str,
        side: &str,
        order_side: OrderSide,
        price: f64,
        size: f64,
        strategy: Option<&str>,
    ) -> Result<(), OrderAck> {
        let intent_id = intent_fingerprint(
            token_id,
            side,
            order_side,
            price,
            size,
            strategy,
            self.safety.intent_ttl_seconds,
        );
        match self
            .store
            .create_intent_if_absent(
                &intent_id,
                token_id,
                side,
                order_side,
                Some(price),
                Some(size),
                strategy,
            )
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!("duplicate order intent refused for {token_id} ({})", order_side.as_str());
                Err(OrderAck::rejected("duplicate order intent (idempotency guard)"))
            }
            Err(e) => Err(OrderAck::rejected(format!("intent store error: {e}"))),
        }
    }

    // ── Trigger registration ──────────────────────────────────

    /// Sell automatically when the price reaches the target.
    pub async fn set_take_profit(
        &self,
        token_id: &str,
        market_question: &str,
        side: Outcome,
        size: f64,
        price: f64,
    ) -> String {
        let order = self.make_order(
            token_id,
            market_question,
            AutoOrderType::TakeProfit,
            side,
            size,
            price,
            None,
            0.0,
        );
        info!("take profit set: sell {size:.1} {} @ {price:.4} [{}]", side.as_str(), order.id);
        self.insert_order(order).await
    }

    /// Sell automatically when the price drops to the stop.
    pub async fn set_stop_loss(
        &self,
        token_id: &str,
        market_question: &str,
        side: Outcome,
        size: f64,
        price: f64,
    ) -> String {
        let order = self.make_order(
            token_id,
            market_question,
            AutoOrderType::StopLoss,
            side,
            size,
            price,
            None,
            0.0,
        );
        info!("stop loss set: sell {size:.1} {} if price <= {price:.4} [{}]", side.as_str(), order.id);
        self.insert_order(order).await
    }

    /// Stop that ratchets upward as the price makes new highs.
    pub async fn set_trailing_stop(
        &self,
        token_id: &str,
        market_question: &str,
        side: Outcome,
        size: f64,
        trail_percent: f64,
        current_price: f64,
    ) -> String {
        let stop_price = current_price * (1.0 - trail_percent);
        let order = self.make_order(
            token_id,
            market_question,
            AutoOrderType::TrailingStop,
            side,
            size,
            stop_price,
            Some(trail_percent),
            current_price,
        );
        info!(
            "trailing stop set: {:.1}% trail, {current_price:.4} -> stop {stop_price:.4} [{}]",
            trail_percent * 100.0,
            order.id
        );
        self.insert_order(order).await
    }

    /// Linked TP/SL pair: when one fires the other cancels.
    pub async fn set_oco(
        &self,
        token_id: &str,
        market_question: &str,
        side: Outcome,
        size: f64,
        take_profit_price: f64,
        stop_loss_price: f64,
    ) -> (String, String) {
        let tp = self
            .set_take_profit(token_id, market_question, side, size, take_profit_price)
            .await;
        let sl = self
            .set_stop_loss(token_id, market_question, side, size, stop_loss_price)
            .await;
        self.link_oco(&tp, &sl);
        info!("OCO pair created: TP {tp} <-> SL {sl}");
        (tp, sl)
    }

    fn link_oco(&self, a: &str, b: &str) {
        let mut orders = self.orders.write();
        if let Some(order) = orders.get_mut(a) {
            order.linked_order_id = Some(b.to_string());
        }
        if let Some(order) = orders.get_mut(b) {
            order.linked_order_id = Some(a.to_string());
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn make_order(
        &self,
        token_id: &str,
        market_question: &str,
        order_type: AutoOrderType,
        side: Outcome,
        size: f64,
        trigger_price: f64,
        trailing_percent: Option<f64>,
        highest_price: f64,
    ) -> AutoOrder {
        AutoOrder {
            id: self.next_order_id(),
            token_id: token_id.to_string(),
            market_question: market_question.to_string(),
            order_type,
            side,
            size,
            trigger_price,
            limit_price: None,
            trailing_percent,
            highest_price,
            state: AutoOrderState::Active,
            created_at: Utc::now(),
            triggered_at: None,
            executed_at: None,
            execution_price: None,
            linked_order_id: None,
        }
    }

    async fn insert_order(&self, order: AutoOrder) -> String {
        let id = order.id.clone();
        if let Err(e) = self.store.save_auto_order(&order).await {
            warn!("failed to persist auto order {id}: {e}");
        }
        self.orders.write().insert(id.clone(), order);
        id
    }

    // ── Order management ──────────────────────────────────────

    pub async fn cancel_order(&self, order_id: &str) -> bool {
        let cancelled = {
            let mut orders = self.orders.write();
            match orders.get_mut(order_id) {
                Some(order)
                    if !matches!(
                        order.state,
                        AutoOrderState::Executed | AutoOrderState::Cancelled
                    ) =>
                {
                    order.state = AutoOrderState::Cancelled;
                    true
                }
                Some(order) => {
                    warn!("order {order_id} already {}", order.state.as_str());
                    false
                }
                None => {
                    warn!("order {order_id} not found");
                    false
                }
            }
        };
        if cancelled {
            if let Err(e) = self
                .store
                .update_auto_order_state(order_id, AutoOrderState::Cancelled)
                .await
            {
                warn!("failed to persist cancel of {order_id}: {e}");
            }
            info!("cancelled order {order_id}");
        }
        cancelled
    }

    pub async fn cancel_all_orders(&self, token_id: Option<&str>) -> usize {
        let cancelled: Vec<String> = {
            let mut orders = self.orders.write();
            orders
                .values_mut()
                .filter(|o| token_id.map(|t| o.token_id == t).unwrap_or(true))
                .filter(|o| o.state == AutoOrderState::Active)
                .map(|o| {
                    o.state = AutoOrderState::Cancelled;
                    o.id.clone()
                })
                .collect()
        };
        for id in &cancelled {
            if let Err(e) = self
                .store
                .update_auto_order_state(id, AutoOrderState::Cancelled)
                .await
            {
                warn!("failed to persist cancel of {id}: {e}");
            }
        }
        info!("cancelled {} orders", cancelled.len());
        cancelled.len()
    }

    pub fn active_orders(&self, token_id: Option<&str>) -> Vec<AutoOrder> {
        self.orders
            .read()
            .values()
            .filter(|o| o.state == AutoOrderState::Active)
            .filter(|o| token_id.map(|t| o.token_id == t).unwrap_or(true))
            .cloned()
            .collect()
    }

    pub fn order(&self, order_id: &str) -> Option<AutoOrder> {
        self.orders.read().get(order_id).cloned()
    }

    // ── Monitoring ────────────────────────────────────────────

    pub fn start_monitor(self: &Arc<Self>, interval_secs: u64) {
        if self.monitoring.swap(true, Ordering::SeqCst) {
            return;
        }
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            info!("order monitor started (checking every {interval_secs}s)");
            while engine.monitoring.load(Ordering::SeqCst) {
                engine.monitor_tick().await;
                sleep(Duration::from_secs(interval_secs)).await;
            }
            info!("order monitor stopped");
        });
    }

    pub fn stop_monitor(&self) {
        self.monitoring.store(false, Ordering::SeqCst);
    }

    /// One evaluation pass: a single midpoint fetch per distinct token,
    /// then every ACTIVE order on that token.
    pub async fn monitor_tick(&self) {
        let active = self.active_orders(None);
        if active.is_empty() {
            return;
        }
        let tokens: HashSet<String> = active.iter().map(|o| o.token_id.clone()).collect();

        for token_id in tokens {
            let Some(price) = self.exchange.get_midpoint(&token_id).await else {
                continue;
            };
            let order_ids: Vec<String> = active
                .iter()
                .filter(|o| o.token_id == token_id)
                .map(|o| o.id.clone())
                .collect();

            for order_id in order_ids {
                let outcome = self.evaluate_and_mark(&order_id, price);
                if let Some(highest) = outcome.trailing_moved {
                    if let Err(e) = self.store.update_trailing_high(&order_id, highest).await {
                        warn!("failed to persist trailing high for {order_id}: {e}");
                    }
                }
                if let Some(order) = outcome.triggered {
                    self.execute_trigger(order, price).await;
                }
            }
        }
    }

    /// Check-and-transition under the map lock. A triggered order moves to
    /// TRIGGERED here, so concurrent ticks cannot fire it twice.
    fn evaluate_and_mark(&self, order_id: &str, price: f64) -> TriggerOutcome {
        let mut orders = self.orders.write();
        let Some(order) = orders.get_mut(order_id) else {
            return TriggerOutcome::default();
        };
        if order.state != AutoOrderState::Active {
            return TriggerOutcome::default();
        }

        let (triggered, trailing_moved) = evaluate_trigger(order, price);
        if triggered {
            order.state = AutoOrderState::Triggered;
            order.triggered_at = Some(Utc::now());
            TriggerOutcome {
                triggered: Some(order.clone()),
                trailing_moved,
            }
        } else {
            TriggerOutcome {
                triggered: None,
                trailing_moved,
            }
        }
    }

    /// Fire a triggered order: market-sell the full size, then resolve the
    /// state machine and the OCO partner.
    async fn execute_trigger(&self, order: AutoOrder, price: f64) {
        info!(
            "{} TRIGGERED @ {price:.4} [{}] - executing",
            order.order_type.as_str(),
            order.id
        );
        if let Err(e) = self
            .store
            .update_auto_order_state(&order.id, AutoOrderState::Triggered)
            .await
        {
            warn!("failed to persist trigger of {}: {e}", order.id);
        }

        let ack = self
            .market_sell(
                &order.token_id,
                &order.market_question,
                order.side,
                order.size,
                Some("auto_exit"),
            )
            .await;

        if ack.success {
            let linked = {
                let mut orders = self.orders.write();
                if let Some(entry) = orders.get_mut(&order.id) {
                    entry.state = AutoOrderState::Executed;
                    entry.executed_at = Some(Utc::now());
                    entry.execution_price = Some(price);
                }
                // Cancel a still-active OCO partner in the same tick.
                order.linked_order_id.as_ref().and_then(|partner_id| {
                    orders.get_mut(partner_id).and_then(|partner| {
                        (partner.state == AutoOrderState::Active).then(|| {
                            partner.state = AutoOrderState::Cancelled;
                            partner.id.clone()
                        })
                    })
                })
            };

            if let Err(e) = self
                .store
                .update_auto_order_state(&order.id, AutoOrderState::Executed)
                .await
            {
                warn!("failed to persist execution of {}: {e}", order.id);
            }
            if let Some(partner_id) = linked {
                if let Err(e) = self
                    .store
                    .update_auto_order_state(&partner_id, AutoOrderState::Cancelled)
                    .await
                {
                    warn!("failed to persist OCO cancel of {partner_id}: {e}");
                }
                info!("cancelled linked order {partner_id}");
            }
            info!("order executed: sold {:.1} @ ~{price:.4}", order.size);
        } else {
            {
                let mut orders = self.orders.write();
                if let Some(entry) = orders.get_mut(&order.id) {
                    entry.state = AutoOrderState::Failed;
                }
            }
            if let Err(e) = self
                .store
                .update_auto_order_state(&order.id, AutoOrderState::Failed)
                .await
            {
                warn!("failed to persist failure of {}: {e}", order.id);
            }
            error!(
                "exit order failed for {}: {}",
                order.id,
                ack.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

#[derive(Default)]
struct TriggerOutcome {
    triggered: Option<AutoOrder>,
    trailing_moved: Option<f64>,
}

/// Pure trigger evaluation. Mutates trailing state; returns whether the
/// order fires at this price and the new high-water mark if it moved.
/// Trailing trigger prices ratchet up and never decrease.
pub(crate) fn evaluate_trigger(order: &mut AutoOrder, price: f64) -> (bool, Option<f64>) {
    match order.order_type {
        AutoOrderType::TakeProfit => (price >= order.trigger_price, None),
        AutoOrderType::StopLoss => (price <= order.trigger_price, None),
        AutoOrderType::TrailingStop => {
            let mut moved = None;
            if price > order.highest_price {
                order.highest_price = price;
                moved = Some(price);
                let trail = order.trailing_percent.unwrap_or(0.0);
                let new_stop = price * (1.0 - trail);
                if new_stop > order.trigger_price {
                    order.trigger_price = new_stop;
                }
            }
            (price <= order.trigger_price, moved)
        }
        // Limit entries are registered for bookkeeping but are not fired by
        // the midpoint monitor.
        AutoOrderType::LimitBuy | AutoOrderType::LimitSell => (false, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn auto_order(order_type: AutoOrderType, trigger: f64) -> AutoOrder {
        AutoOrder {
            id: "a1".to_string(),
            token_id: "tok".to_string(),
            market_question: "q".to_string(),
            order_type,
            side: Outcome::Yes,
            size: 10.0,
            trigger_price: trigger,
            limit_price: None,
            trailing_percent: None,
            highest_price: 0.0,
            state: AutoOrderState::Active,
            created_at: Utc::now(),
            triggered_at: None,
            executed_at: None,
            execution_price: None,
            linked_order_id: None,
        }
    }

    #[test]
    fn test_take_profit_fires_at_or_above() {
        let mut order = auto_order(AutoOrderType::TakeProfit, 0.70);
        assert!(!evaluate_trigger(&mut order, 0.69).0);
        assert!(evaluate_trigger(&mut order, 0.70).0);
        assert!(evaluate_trigger(&mut order, 0.75).0);
    }

    #[test]
    fn test_stop_loss_fires_at_or_below() {
        let mut order = auto_order(AutoOrderType::StopLoss, 0.30);
        assert!(!evaluate_trigger(&mut order, 0.31).0);
        assert!(evaluate_trigger(&mut order, 0.30).0);
        assert!(evaluate_trigger(&mut order, 0.10).0);
    }

    #[test]
    fn test_trailing_stop_ratchets_up_never_down() {
        let mut order = auto_order(AutoOrderType::TrailingStop, 0.45);
        order.trailing_percent = Some(0.10);
        order.highest_price = 0.50;

        // New high moves both the high-water mark and the stop.
        let (fired, moved) = evaluate_trigger(&mut order, 0.60);
        assert!(!fired);
        assert_eq!(moved, Some(0.60));
        assert!((order.trigger_price - 0.54).abs() < 1e-9);

        // A dip never lowers either.
        let (fired, moved) = evaluate_trigger(&mut order, 0.56);
        assert!(!fired);
        assert_eq!(moved, None);
        assert_eq!(order.highest_price, 0.60);
        assert!((order.trigger_price - 0.54).abs() < 1e-9);

        // Falling through the stop fires.
        let (fired, _) = evaluate_trigger(&mut order, 0.54);
        assert!(fired);
    }

    #[test]
    fn test_trailing_stop_small_high_does_not_lower_stop() {
        let mut order = auto_order(AutoOrderType::TrailingStop, 0.80);
        order.trailing_percent = Some(0.30);
        order.highest_price = 0.90;

        // New high whose trailed stop (0.637) is below the current trigger:
        // the trigger holds.
        let (fired, moved) = evaluate_trigger(&mut order, 0.91);
        assert!(!fired);
        assert_eq!(moved, Some(0.91));
        assert!((order.trigger_price - 0.80).abs() < 1e-9);
    }

    #[test]
    fn test_limit_orders_do_not_fire_from_monitor() {
        let mut order = auto_order(AutoOrderType::LimitBuy, 0.40);
        assert!(!evaluate_trigger(&mut order, 0.10).0);
        assert!(!evaluate_trigger(&mut order, 0.90).0);
    }
}
