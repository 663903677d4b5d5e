//! Deterministic mock-data generation from string seeds.
//!
//! A ticker symbol is folded into a 32-bit accumulator, then each draw steps a
//! linear-congruential recurrence. Same seed, same numbers, on every run.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Accumulator used when the seed is empty or folds to zero.
pub const DEFAULT_ACCUMULATOR: u32 = 0x9E37_79B9;

const FOLD_FACTOR: u32 = 31;
const LCG_A: u32 = 1_664_525;
const LCG_C: u32 = 1_013_904_223;
const TWO_POW_32: f64 = 4_294_967_296.0;

pub const DEFAULT_VOLATILITY: f64 = 0.08;
pub const DEFAULT_LENGTH: usize = 20;

/// Fold a seed string into the initial accumulator.
pub fn fold_seed(seed: &str) -> u32 {
    let acc = seed
        .chars()
        .fold(0u32, |acc, ch| acc.wrapping_mul(FOLD_FACTOR).wrapping_add(ch as u32));
    if acc == 0 {
        DEFAULT_ACCUMULATOR
    } else {
        acc
    }
}

/// LCG draw state. Lives for one generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedState(u32);

impl SeedState {
    pub fn from_seed(seed: &str) -> Self {
        Self(fold_seed(seed))
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    pub fn next_u32(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(LCG_A).wrapping_add(LCG_C);
        self.0
    }

    /// Returns `f64` in `[0, 1)`.
    pub fn next_unit(&mut self) -> f64 {
        self.next_u32() as f64 / TWO_POW_32
    }
}

/// `SeedState` behind the `rand` traits so `gen_range` and friends stay
/// deterministic per seed.
#[derive(Debug, Clone)]
pub struct SeededRng {
    state: SeedState,
}

impl SeededRng {
    pub fn new(seed: &str) -> Self {
        Self { state: SeedState::from_seed(seed) }
    }
}

impl RngCore for SeededRng {
    fn next_u32(&mut self) -> u32 {
        self.state.next_u32()
    }

    /// Low word first, then high word.
    fn next_u64(&mut self) -> u64 {
        let lo = u64::from(self.next_u32());
        let hi = u64::from(self.next_u32());
        (hi << 32) | lo
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let word = self.next_u32().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesParams {
    pub volatility: f64,
    pub length: usize,
}

impl Default for SeriesParams {
    fn default() -> Self {
        Self {
            volatility: DEFAULT_VOLATILITY,
            length: DEFAULT_LENGTH,
        }
    }
}

impl SeriesParams {
    fn effective_volatility(&self) -> f64 {
        if self.volatility.is_finite() {
            self.volatility.abs()
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockSeries {
    pub points: Vec<f64>,
}

impl MockSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<f64> {
        self.points.last().copied()
    }

    /// SHA-256 over the little-endian bit patterns of every point.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for p in &self.points {
            hasher.update(p.to_bits().to_le_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Random-walk series around `base`, clamped at zero and rounded to cents.
pub fn mock_series(seed: &str, base: f64, params: SeriesParams) -> MockSeries {
    let base = if base.is_finite() && base > 0.0 { base } else { 0.0 };
    let amplitude = base * params.effective_volatility();
    let mut state = SeedState::from_seed(seed);
    let mut current = base;
    let mut points = Vec::with_capacity(params.length);
    for _ in 0..params.length {
        let bump = (state.next_unit() - 0.5) * 2.0 * amplitude;
        current = (current + bump).max(0.0);
        points.push(round2(current));
    }
    MockSeries { points }
}

/// One deterministic value in `[min, max)`.
pub fn seeded_value(seed: &str, min: f64, max: f64) -> f64 {
    if !(max > min) {
        return min;
    }
    let mut state = SeedState::from_seed(seed);
    min + (max - min) * state.next_unit()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockQuote {
    pub symbol: String,
    pub price: f64,
    pub change_pct: f64,
    pub sparkline: MockSeries,
}

/// Card data for a symbol: sparkline, last price, and a daily change.
pub fn mock_quote(symbol: &str, base: f64, params: SeriesParams) -> MockQuote {
    let sparkline = mock_series(symbol, base, params);
    let price = sparkline.last().unwrap_or(0.0);
    let mut rng = SeededRng::new(&format!("{symbol}:change"));
    let change_pct = round2(rng.gen_range(-5.0..5.0));
    MockQuote {
        symbol: symbol.to_string(),
        price,
        change_pct,
        sparkline,
    }
}
