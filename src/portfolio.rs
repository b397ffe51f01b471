//! Portfolio: in-memory positions plus realized P&L, mirrored to the store.
//!
//! Positions are only ever mutated through confirmed fills (the tracker's
//! callbacks) and scan-time closures, all serialized behind one mutex.
//! Averaging-in is additive, which keeps fill delivery idempotent as long as
//! fills arrive in monotonic order.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::TradingConfig;
use crate::gateway::Exchange;
use crate::models::{OrderSide, Outcome, Position, TradeRecord};
use crate::store::Store;

const REALIZED_PNL_KEY: &str = "realized_pnl";

#[derive(Debug, Default)]
struct PortfolioState {
    positions: HashMap<String, Position>,
    realized_pnl: f64,
}

/// Snapshot statistics for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioStats {
    pub total_positions: usize,
    pub total_value: f64,
    pub total_cost_basis: f64,
    pub total_unrealized_pnl: f64,
    pub total_realized_pnl: f64,
    pub win_rate: f64,
    pub largest_position: Option<String>,
    pub exposure_by_category: HashMap<String, f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PortfolioExport {
    exported_at: String,
    positions: Vec<Position>,
    realized_pnl: f64,
}

pub struct Portfolio {
    state: Mutex<PortfolioState>,
    store: Store,
}

impl Portfolio {
    /// Load saved positions and realized P&L from the store.
    pub async fn load(store: Store) -> Result<Self> {
        let positions = store.load_positions().await?;
        let realized_pnl = store.get_state_f64(REALIZED_PNL_KEY, 0.0).await?;
        if !positions.is_empty() {
            info!("loaded {} positions from store", positions.len());
        }
        let map = positions
            .into_iter()
            .map(|p| (Position::key(&p.token_id, p.side), p))
            .collect();
        Ok(Self {
            state: Mutex::new(PortfolioState {
                positions: map,
                realized_pnl,
            }),
            store,
        })
    }

    /// Add (or average into) a position and record the BUY in the ledger.
    pub async fn add_position(
        &self,
        token_id: &str,
        market_question: &str,
        side: Outcome,
        size: f64,
        entry_price: f64,
        order_id: Option<&str>,
        strategy: Option<&str>,
    ) -> Result<()> {
        let key = Position::key(token_id, side);
        let now = Utc::now();

        let snapshot = {
            let mut state = self.state.lock().await;
            let entry = state.positions.entry(key).or_insert_with(|| Position {
                token_id: token_id.to_string(),
                market_question: market_question.to_string(),
                side,
                size: 0.0,
                avg_entry_price: 0.0,
                current_price: 0.0,
                opened_at: now,
                updated_at: now,
            });

            let total_size = entry.size + size;
            if total_size > 0.0 {
                let total_cost = entry.size * entry.avg_entry_price + size * entry_price;
                entry.avg_entry_price = total_cost / total_size;
            }
            entry.size = total_size;
            entry.updated_at = now;
            entry.clone()
        };

        self.store.save_position(&snapshot).await?;
        self.store
            .record_trade(&TradeRecord {
                timestamp: now,
                token_id: token_id.to_string(),
                market_question: market_question.to_string(),
                side,
                action: OrderSide::Buy,
                size,
                price: entry_price,
                fee: 0.0,
                order_id: order_id.map(str::to_string),
                strategy: strategy.map(str::to_string),
            })
            .await?;
        Ok(())
    }

    /// Close part or all of a position. Returns the realized P&L from the
    /// close (0 if there was no position).
    pub async fn close_position(
        &self,
        token_id: &str,
        side: Outcome,
        size: f64,
        exit_price: f64,
        order_id: Option<&str>,
        strategy: Option<&str>,
    ) -> Result<f64> {
        let key = Position::key(token_id, side);
        let now = Utc::now();

        let (closed_size, realized, question, remaining) = {
            let mut state = self.state.lock().await;
            let Some(position) = state.positions.get_mut(&key) else {
                warn!("no position found for {key}");
                return Ok(0.0);
            };
            let closed = size.min(position.size);
            let realized = closed * (exit_price - position.avg_entry_price);
            position.size -= closed;
            position.updated_at = now;
            let question = position.market_question.clone();
            let remaining = if position.size <= 1e-9 {
                state.positions.remove(&key);
                None
            } else {
                Some(position.clone())
            };
            state.realized_pnl += realized;
            (closed, realized, question, remaining)
        };

        match remaining {
            Some(position) => self.store.save_position(&position).await?,
            None => self.store.remove_position(token_id, side).await?,
        }
        let realized_total = self.realized_pnl().await;
        self.store
            .set_state(REALIZED_PNL_KEY, &realized_total.to_string())
            .await?;
        self.store
            .record_trade(&TradeRecord {
                timestamp: now,
                token_id: token_id.to_string(),
                market_question: question,
                side,
                action: OrderSide::Sell,
                size: closed_size,
                price: exit_price,
                fee: 0.0,
                order_id: order_id.map(str::to_string),
                strategy: strategy.map(str::to_string),
            })
            .await?;
        Ok(realized)
    }

    /// Refresh `current_price` for every position from the exchange.
    pub async fn update_prices(&self, exchange: &dyn Exchange) -> Result<()> {
        let tokens: Vec<(String, Outcome)> = {
            let state = self.state.lock().await;
            state
                .positions
                .values()
                .map(|p| (p.token_id.clone(), p.side))
                .collect()
        };

        for (token_id, side) in tokens {
            let Some(price) = exchange.get_midpoint(&token_id).await else {
                continue;
            };
            {
                let mut state = self.state.lock().await;
                if let Some(pos) = state.positions.get_mut(&Position::key(&token_id, side)) {
                    pos.current_price = price;
                    pos.updated_at = Utc::now();
                }
            }
            self.store
                .update_position_price(&token_id, side, price)
                .await?;
        }
        Ok(())
    }

    pub async fn positions(&self) -> Vec<Position> {
        let state = self.state.lock().await;
        let mut positions: Vec<_> = state.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));
        positions
    }

    pub async fn position(&self, token_id: &str, side: Outcome) -> Option<Position> {
        let state = self.state.lock().await;
        state.positions.get(&Position::key(token_id, side)).cloned()
    }

    pub async fn open_positions_count(&self) -> usize {
        self.state.lock().await.positions.len()
    }

    pub async fn realized_pnl(&self) -> f64 {
        self.state.lock().await.realized_pnl
    }

    pub async fn get_total_value(&self) -> f64 {
        let state = self.state.lock().await;
        state.positions.values().map(Position::current_value).sum()
    }

    pub async fn get_total_exposure(&self) -> f64 {
        let state = self.state.lock().await;
        state.positions.values().map(Position::cost_basis).sum()
    }

    pub async fn get_total_unrealized_pnl(&self) -> f64 {
        let state = self.state.lock().await;
        state.positions.values().map(Position::unrealized_pnl).sum()
    }

    /// Warnings when exposure or any single cost basis exceeds the
    /// configured limits.
    pub async fn check_risk_limits(&self, trading: &TradingConfig) -> Vec<String> {
        let state = self.state.lock().await;
        let mut warnings = Vec::new();

        let exposure: f64 = state.positions.values().map(Position::cost_basis).sum();
        if exposure > trading.max_total_exposure {
            warnings.push(format!(
                "total exposure (${exposure:.2}) exceeds limit (${:.2})",
                trading.max_total_exposure
            ));
        }
        for pos in state.positions.values() {
            if pos.cost_basis() > trading.max_trade_size * 2.0 {
                warnings.push(format!(
                    "large position in {} (${:.2})",
                    truncate(&pos.market_question, 30),
                    pos.cost_basis()
                ));
            }
        }
        warnings
    }

    pub async fn stats(&self) -> Result<PortfolioStats> {
        let trade_stats = self.store.trade_stats().await?;
        let state = self.state.lock().await;

        let mut exposure_by_category: HashMap<String, f64> = HashMap::new();
        let mut largest: Option<(&Position, f64)> = None;
        for pos in state.positions.values() {
            let question = pos.market_question.to_lowercase();
            let category = if question.contains("btc")
                || question.contains("bitcoin")
                || question.contains("eth")
                || question.contains("crypto")
            {
                "crypto"
            } else {
                "sports"
            };
            *exposure_by_category.entry(category.to_string()).or_default() +=
                pos.current_value();
            if largest.map(|(_, v)| pos.current_value() > v).unwrap_or(true) {
                largest = Some((pos, pos.current_value()));
            }
        }

        Ok(PortfolioStats {
            total_positions: state.positions.len(),
            total_value: state.positions.values().map(Position::current_value).sum(),
            total_cost_basis: state.positions.values().map(Position::cost_basis).sum(),
            total_unrealized_pnl: state.positions.values().map(Position::unrealized_pnl).sum(),
            total_realized_pnl: state.realized_pnl,
            win_rate: trade_stats.win_rate,
            largest_position: largest.map(|(p, _)| p.market_question.clone()),
            exposure_by_category,
        })
    }

    pub async fn log_summary(&self, trading: &TradingConfig) {
        let stats = match self.stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("portfolio stats unavailable: {e}");
                return;
            }
        };
        info!("portfolio: {} positions", stats.total_positions);
        info!(
            "  value ${:.2} | cost ${:.2} | unrealized ${:+.2} | realized ${:+.2}",
            stats.total_value,
            stats.total_cost_basis,
            stats.total_unrealized_pnl,
            stats.total_realized_pnl
        );
        if stats.win_rate > 0.0 {
            info!("  win rate {:.1}%", stats.win_rate);
        }
        for pos in self.positions().await {
            info!(
                "  {} {:.2} {} @ {:.4} -> {:.4} ({:+.1}%)",
                truncate(&pos.market_question, 45),
                pos.size,
                pos.side.as_str(),
                pos.avg_entry_price,
                pos.current_price,
                pos.unrealized_pnl_pct()
            );
        }
        for warning in self.check_risk_limits(trading).await {
            warn!("risk: {warning}");
        }
    }

    // ── JSON export / import ──────────────────────────────────

    pub async fn export_json(&self, path: &Path) -> Result<()> {
        let state = self.state.lock().await;
        let export = PortfolioExport {
            exported_at: Utc::now().to_rfc3339(),
            positions: state.positions.values().cloned().collect(),
            realized_pnl: state.realized_pnl,
        };
        let json = serde_json::to_string_pretty(&export)?;
        std::fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
        info!("portfolio exported to {}", path.display());
        Ok(())
    }

    /// Replace the in-memory positions with the exported set and persist.
    pub async fn import_json(&self, path: &Path) -> Result<usize> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let export: PortfolioExport = serde_json::from_str(&raw).context("parse export")?;

        let count = export.positions.len();
        {
            let mut state = self.state.lock().await;
            state.positions = export
                .positions
                .iter()
                .map(|p| (Position::key(&p.token_id, p.side), p.clone()))
                .collect();
            state.realized_pnl = export.realized_pnl;
        }
        for pos in &export.positions {
            self.store.save_position(pos).await?;
        }
        self.store
            .set_state(REALIZED_PNL_KEY, &export.realized_pnl.to_string())
            .await?;
        info!("portfolio imported from {} ({count} positions)", path.display());
        Ok(count)
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn portfolio() -> Portfolio {
        let store = Store::open_in_memory().unwrap();
        Portfolio::load(store).await.unwrap()
    }

    #[tokio::test]
    async fn test_averaging_in() {
        let p = portfolio().await;
        p.add_position("tok", "q", Outcome::Yes, 40.0, 0.50, None, None)
            .await
            .unwrap();
        p.add_position("tok", "q", Outcome::Yes, 60.0, 0.48, None, None)
            .await
            .unwrap();

        let pos = p.position("tok", Outcome::Yes).await.unwrap();
        assert_eq!(pos.size, 100.0);
        assert!((pos.avg_entry_price - 0.488).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_close_accumulates_realized_and_deletes_at_zero() {
        let p = portfolio().await;
        p.add_position("tok", "q", Outcome::Yes, 100.0, 0.40, None, None)
            .await
            .unwrap();

        let realized = p
            .close_position("tok", Outcome::Yes, 40.0, 0.50, None, None)
            .await
            .unwrap();
        assert!((realized - 4.0).abs() < 1e-9);
        assert_eq!(p.position("tok", Outcome::Yes).await.unwrap().size, 60.0);

        // Oversized close clamps to held size.
        let realized = p
            .close_position("tok", Outcome::Yes, 500.0, 0.50, None, None)
            .await
            .unwrap();
        assert!((realized - 6.0).abs() < 1e-9);
        assert!(p.position("tok", Outcome::Yes).await.is_none());
        assert!((p.realized_pnl().await - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_ledger_matches_position_flow() {
        let store = Store::open_in_memory().unwrap();
        let p = Portfolio::load(store.clone()).await.unwrap();
        p.add_position("tok", "q", Outcome::Yes, 100.0, 0.40, None, None)
            .await
            .unwrap();
        p.close_position("tok", Outcome::Yes, 30.0, 0.50, None, None)
            .await
            .unwrap();

        let trades = store.trade_history(Some("tok"), None, 10).await.unwrap();
        let bought: f64 = trades
            .iter()
            .filter(|t| t.action == OrderSide::Buy)
            .map(|t| t.size)
            .sum();
        let sold: f64 = trades
            .iter()
            .filter(|t| t.action == OrderSide::Sell)
            .map(|t| t.size)
            .sum();
        let live = p.position("tok", Outcome::Yes).await.unwrap().size;
        assert!((bought - sold - live).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_persistence_reload_is_identical() {
        let store = Store::open_in_memory().unwrap();
        let p = Portfolio::load(store.clone()).await.unwrap();
        p.add_position("tok", "Will it rain?", Outcome::No, 55.5, 0.37, None, None)
            .await
            .unwrap();

        let before = p.position("tok", Outcome::No).await.unwrap();
        let reloaded = Portfolio::load(store).await.unwrap();
        let after = reloaded.position("tok", Outcome::No).await.unwrap();
        assert_eq!(before.size, after.size);
        assert_eq!(before.avg_entry_price, after.avg_entry_price);
        assert_eq!(before.market_question, after.market_question);
        assert_eq!(
            before.opened_at.timestamp_millis(),
            after.opened_at.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portfolio.json");

        let p = portfolio().await;
        p.add_position("a", "q1", Outcome::Yes, 10.0, 0.20, None, None)
            .await
            .unwrap();
        p.add_position("b", "q2", Outcome::No, 5.0, 0.80, None, None)
            .await
            .unwrap();
        p.export_json(&path).await.unwrap();

        let fresh = portfolio().await;
        let count = fresh.import_json(&path).await.unwrap();
        assert_eq!(count, 2);
        let a = fresh.position("a", Outcome::Yes).await.unwrap();
        assert_eq!(a.size, 10.0);
        assert_eq!(a.avg_entry_price, 0.20);
        assert!(fresh.position("b", Outcome::No).await.is_some());
    }

    #[tokio::test]
    async fn test_risk_limit_warnings() {
        let p = portfolio().await;
        let trading = TradingConfig {
            max_trade_size: 10.0,
            max_total_exposure: 50.0,
            min_market_liquidity: 0.0,
            default_slippage: 0.01,
        };
        p.add_position("tok", "q", Outcome::Yes, 200.0, 0.40, None, None)
            .await
            .unwrap();

        let warnings = p.check_risk_limits(&trading).await;
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("exposure") || warnings[1].contains("exposure"));
    }
}
