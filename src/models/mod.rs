pub mod leftover;
pub mod run;
pub mod trade;

pub use leftover::{CarryoverProfit, Draw, Leftover, LotDraw};
pub use run::{
    Diagnostic, DiagnosticKind, MatchEvent, Participant, RateSpread, RunResult, Scope,
    TradeOutcome, Unresolved,
};
pub use trade::{NewAdjustment, NewTrade, Trade, TradeUpdate};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// TradeKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeKind {
    Buy,
    Sell,
    Adjustment,
}

impl TradeKind {
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BUY" => Some(TradeKind::Buy),
            "SELL" => Some(TradeKind::Sell),
            "ADJUSTMENT" | "OTHER" => Some(TradeKind::Adjustment),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeKind::Buy => "BUY",
            TradeKind::Sell => "SELL",
            TradeKind::Adjustment => "ADJUSTMENT",
        }
    }

    /// Inventory the business still holds while a trade of this kind is open.
    pub fn held_currency(&self) -> Option<Currency> {
        match self {
            TradeKind::Buy => Some(Currency::Mmk),
            TradeKind::Sell => Some(Currency::Thb),
            TradeKind::Adjustment => None,
        }
    }
}

impl fmt::Display for TradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Currency / CurrencyPair
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Thb,
    Mmk,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Thb => "THB",
            Currency::Mmk => "MMK",
        }
    }

    /// Side of the book whose open remainders are held in this currency.
    pub fn open_kind(&self) -> TradeKind {
        match self {
            Currency::Mmk => TradeKind::Buy,
            Currency::Thb => TradeKind::Sell,
        }
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "THB" => Ok(Currency::Thb),
            "MMK" => Ok(Currency::Mmk),
            other => Err(format!("unknown currency: {other}")),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Currency pair a trade is quoted in: `base/quote`, e.g. `THB/MMK`
/// (rate = quote units per one base unit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub base: Currency,
    pub quote: Currency,
}

impl Default for CurrencyPair {
    fn default() -> Self {
        Self {
            base: Currency::Thb,
            quote: Currency::Mmk,
        }
    }
}

impl CurrencyPair {
    pub fn matches(&self, code: &str) -> bool {
        code.parse::<CurrencyPair>().map(|p| p == *self).unwrap_or(false)
    }
}

impl FromStr for CurrencyPair {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .split_once('/')
            .ok_or_else(|| format!("currency pair must look like BASE/QUOTE: {s}"))?;
        let pair = CurrencyPair {
            base: base.parse()?,
            quote: quote.parse()?,
        };
        if pair.base == pair.quote {
            return Err(format!("currency pair needs two distinct currencies: {s}"));
        }
        Ok(pair)
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}
