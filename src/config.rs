use std::sync::Arc;

use anyhow::{bail, Result};

use crate::seeded::{seeded_value, SeriesParams, DEFAULT_LENGTH, DEFAULT_VOLATILITY};
use crate::stages::{normalize_symbol, Page};
use crate::store::{MemoryStore, SharedStore, SqliteStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub symbol: String,
    pub page: Page,
    pub store: StoreKind,
    pub sqlite_path: String,
    /// Multiplier on every stage duration; 0.1 runs ten times faster.
    pub time_scale: f64,
    pub series_len: usize,
    pub volatility: f64,
    pub base_price: Option<f64>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source; `from_env` passes the
    /// process environment.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let page = match var("PAGE") {
            Some(v) => v.parse()?,
            None => Page::Ai,
        };
        let store = match var("STORE").as_deref() {
            Some("memory") => StoreKind::Memory,
            Some("sqlite") | None => StoreKind::Sqlite,
            Some(other) => bail!("unknown STORE '{}', expected memory or sqlite", other),
        };
        Ok(Self {
            symbol: normalize_symbol(&var("SYMBOL").unwrap_or_else(|| "AAPL".to_string())),
            page,
            store,
            sqlite_path: var("SQLITE_PATH").unwrap_or_else(|| "./tradedeck.sqlite".to_string()),
            time_scale: var("TIME_SCALE").and_then(|v| v.parse().ok()).unwrap_or(1.0),
            series_len: var("SERIES_LEN").and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_LENGTH),
            volatility: var("VOLATILITY").and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_VOLATILITY),
            base_price: var("BASE_PRICE").and_then(|v| v.parse().ok()),
        })
    }

    pub fn series_params(&self) -> SeriesParams {
        SeriesParams {
            volatility: self.volatility,
            length: self.series_len,
        }
    }

    /// Explicit base price, or a stable one picked from the symbol.
    pub fn base_price(&self) -> f64 {
        self.base_price
            .unwrap_or_else(|| (seeded_value(&self.symbol, 20.0, 500.0) * 100.0).round() / 100.0)
    }

    pub fn open_store(&self) -> Result<SharedStore> {
        Ok(match self.store {
            StoreKind::Memory => Arc::new(MemoryStore::new()),
            StoreKind::Sqlite => Arc::new(SqliteStore::new(&self.sqlite_path)?),
        })
    }
}
