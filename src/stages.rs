//! Stage catalogs for each dashboard page.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Error};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisStage {
    pub id: u32,
    pub name: String,
    pub duration_ms: u64,
}

impl AnalysisStage {
    pub fn new(id: u32, name: &str, duration_ms: u64) -> Self {
        Self {
            id,
            name: name.to_string(),
            duration_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Page {
    Ai,
    Quant,
    Sentiment,
    Technical,
    Fundamental,
    Institutional,
}

impl Page {
    pub const ALL: [Page; 6] = [
        Page::Ai,
        Page::Quant,
        Page::Sentiment,
        Page::Technical,
        Page::Fundamental,
        Page::Institutional,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Page::Ai => "ai",
            Page::Quant => "quant",
            Page::Sentiment => "sentiment",
            Page::Technical => "technical",
            Page::Fundamental => "fundamental",
            Page::Institutional => "institutional",
        }
    }

    /// Completion marker key, e.g. `ai_analysis_AAPL`.
    pub fn persistence_key(&self, symbol: &str) -> String {
        format!("{}_analysis_{}", self.as_str(), normalize_symbol(symbol))
    }

    pub fn stages(&self) -> Vec<AnalysisStage> {
        let table: &[(&str, u64)] = match self {
            Page::Ai => &[
                ("Collecting market data", 800),
                ("Running neural sentiment model", 1200),
                ("Evaluating technical patterns", 1000),
                ("Synthesizing AI insights", 900),
                ("Generating recommendations", 600),
            ],
            Page::Quant => &[
                ("Loading price history", 700),
                ("Estimating factor exposures", 1100),
                ("Running Monte Carlo paths", 1500),
                ("Computing risk metrics", 900),
            ],
            Page::Sentiment => &[
                ("Scanning news headlines", 900),
                ("Analyzing social media", 1200),
                ("Scoring analyst ratings", 800),
                ("Aggregating sentiment", 600),
            ],
            Page::Technical => &[
                ("Fetching OHLC candles", 600),
                ("Computing indicators", 1000),
                ("Detecting chart patterns", 1200),
                ("Mapping support and resistance", 800),
            ],
            Page::Fundamental => &[
                ("Parsing financial statements", 1000),
                ("Calculating valuation ratios", 900),
                ("Comparing sector peers", 800),
                ("Estimating fair value", 700),
            ],
            Page::Institutional => &[
                ("Reading 13F filings", 1100),
                ("Tracking fund flows", 900),
                ("Ranking top holders", 700),
            ],
        };
        table
            .iter()
            .enumerate()
            .map(|(i, (name, ms))| AnalysisStage::new(i as u32 + 1, name, *ms))
            .collect()
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Page {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Page::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| {
                let valid: Vec<&str> = Page::ALL.iter().map(|p| p.as_str()).collect();
                anyhow!("unknown page '{}', expected one of: {}", s, valid.join(", "))
            })
    }
}

/// Trimmed, upper-case ticker. Seeds and marker keys both go through here.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// Saturates at `u64::MAX` instead of overflowing.
pub fn total_duration_ms(stages: &[AnalysisStage]) -> u64 {
    stages.iter().map(|s| s.duration_ms).fold(0, u64::saturating_add)
}
