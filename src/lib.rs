//! Automated trading bot for binary-outcome prediction markets.
//!
//! Scans listed markets, evaluates them with pluggable probability
//! strategies, sizes and places orders under strict risk limits, tracks
//! each order through its live -> fill -> position lifecycle, and exits via
//! take-profit / stop-loss / trailing-stop / timeout rules. Everything
//! persists to SQLite so a restart resumes cleanly.

pub mod config;
pub mod gateway;
pub mod models;
pub mod orders;
pub mod portfolio;
pub mod risk;
pub mod store;
pub mod strategy;
pub mod tracker;
pub mod trader;

pub use config::Config;
pub use gateway::{Exchange, ExchangeGateway};
pub use orders::OrderEngine;
pub use portfolio::Portfolio;
pub use risk::RiskManager;
pub use store::Store;
pub use strategy::{StrategyContext, StrategyEngine};
pub use tracker::OrderTracker;
pub use trader::{AutoTradeConfig, AutoTrader};
