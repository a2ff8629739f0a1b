//! Token and currency counters attributed to one collaborator invocation or stage.
//!
//! Currency is held as integer micro-dollars so that totals are exact sums of
//! their parts. Persisted records carry the decimal USD value.

use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Micro-dollars per US dollar.
pub const MICROS_PER_USD: u64 = 1_000_000;

/// Token and cost counters reported by a single invocation or stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostRecord {
    /// Uncached input tokens.
    pub input_tokens: u64,
    /// Input tokens written to the prompt cache.
    pub cache_creation_tokens: u64,
    /// Input tokens served from the prompt cache.
    pub cache_read_tokens: u64,
    /// Output tokens.
    pub output_tokens: u64,
    /// Total cost as reported by the collaborator.
    #[serde(rename = "total_cost_usd", with = "usd_micros")]
    pub cost_micros: u64,
}

impl CostRecord {
    pub const fn zero() -> Self {
        Self {
            input_tokens: 0,
            cache_creation_tokens: 0,
            cache_read_tokens: 0,
            output_tokens: 0,
            cost_micros: 0,
        }
    }

    /// All input tokens, cached or not.
    pub const fn total_input_tokens(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.cache_creation_tokens)
            .saturating_add(self.cache_read_tokens)
    }

    pub const fn total_tokens(&self) -> u64 {
        self.total_input_tokens().saturating_add(self.output_tokens)
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.cost_micros as f64 / MICROS_PER_USD as f64
    }

    pub const fn is_zero(&self) -> bool {
        self.total_tokens() == 0 && self.cost_micros == 0
    }

    /// Format as a human-readable summary.
    pub fn format_summary(&self) -> String {
        format!(
            "${:.4} ({}K input, {}K output, {}K cache_read, {}K cache_write)",
            self.total_cost_usd(),
            self.input_tokens / 1000,
            self.output_tokens / 1000,
            self.cache_read_tokens / 1000,
            self.cache_creation_tokens / 1000,
        )
    }
}

impl Add for CostRecord {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self::Output {
        self += rhs;
        self
    }
}

/// Counters saturate at `u64::MAX` rather than wrap.
impl AddAssign for CostRecord {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens = self.input_tokens.saturating_add(rhs.input_tokens);
        self.cache_creation_tokens = self
            .cache_creation_tokens
            .saturating_add(rhs.cache_creation_tokens);
        self.cache_read_tokens = self.cache_read_tokens.saturating_add(rhs.cache_read_tokens);
        self.output_tokens = self.output_tokens.saturating_add(rhs.output_tokens);
        self.cost_micros = self.cost_micros.saturating_add(rhs.cost_micros);
    }
}

impl Sum for CostRecord {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), Add::add)
    }
}

/// Parse a decimal USD string (e.g. `"0.123456"`) into micro-dollars.
///
/// Digits beyond the sixth decimal place are rounded half-up. Returns `None`
/// for anything that is not a non-negative decimal number, or that does not
/// fit in `u64` micro-dollars.
pub fn parse_usd_micros(text: &str) -> Option<u64> {
    let text = text.trim();
    let (whole, frac) = match text.split_once('.') {
        Some((w, f)) => (w, f),
        None => (text, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut micros = whole.checked_mul(MICROS_PER_USD)?;

    let mut digits = frac.bytes().map(|b| u64::from(b - b'0'));
    let mut scale = MICROS_PER_USD / 10;
    for _ in 0..6 {
        let digit = digits.next().unwrap_or(0);
        micros = micros.checked_add(digit * scale)?;
        scale /= 10;
    }
    if digits.next().is_some_and(|d| d >= 5) {
        micros = micros.checked_add(1)?;
    }
    Some(micros)
}

mod usd_micros {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::MICROS_PER_USD;

    pub fn serialize<S: Serializer>(micros: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(*micros as f64 / MICROS_PER_USD as f64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let usd = f64::deserialize(deserializer)?;
        if !usd.is_finite() || usd < 0.0 {
            return Err(serde::de::Error::custom("cost must be a non-negative number"));
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Ok((usd * MICROS_PER_USD as f64).round() as u64)
    }
}
