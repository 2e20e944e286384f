use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{Currency, LotDraw, TradeKind};

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Set of trades a matching run re-derives. Range dates are business-local
/// and inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Scope {
    All,
    Range { start: NaiveDate, end: NaiveDate },
}

impl Scope {
    pub fn range(start: NaiveDate, end: NaiveDate) -> Result<Self, String> {
        if start > end {
            return Err(format!("scope start {start} is after end {end}"));
        }
        Ok(Scope::Range { start, end })
    }

    pub fn day(date: NaiveDate) -> Self {
        Scope::Range {
            start: date,
            end: date,
        }
    }

    pub fn overlaps(&self, other: &Scope) -> bool {
        match (self, other) {
            (Scope::All, _) | (_, Scope::All) => true,
            (Scope::Range { start: a0, end: a1 }, Scope::Range { start: b0, end: b1 }) => {
                a0 <= b1 && b0 <= a1
            }
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        match self {
            Scope::All => true,
            Scope::Range { start, end } => *start <= date && date <= *end,
        }
    }

    /// Half-open UTC interval `[from, to)` covering the local dates of the range.
    pub fn utc_bounds(&self, offset: FixedOffset) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match self {
            Scope::All => None,
            Scope::Range { start, end } => {
                let from = local_midnight_utc(*start, offset);
                let to = local_midnight_utc(*end, offset) + Duration::days(1);
                Some((from, to))
            }
        }
    }

    /// Every date in a range scope, `None` for `All`.
    pub fn days(&self) -> Option<Vec<NaiveDate>> {
        match self {
            Scope::All => None,
            Scope::Range { start, end } => Some(
                start
                    .iter_days()
                    .take_while(|d| d <= end)
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::All => write!(f, "all trades"),
            Scope::Range { start, end } if start == end => write!(f, "{start}"),
            Scope::Range { start, end } => write!(f, "{start}..{end}"),
        }
    }
}

fn local_midnight_utc(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let local = date.and_time(NaiveTime::MIN);
    let utc = local - Duration::seconds(i64::from(offset.local_minus_utc()));
    DateTime::from_naive_utc_and_offset(utc, Utc)
}

// ---------------------------------------------------------------------------
// Run output
// ---------------------------------------------------------------------------

/// One side of a match: a ledger trade or a lot carried from an earlier run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Participant {
    Trade(Uuid),
    Lot(i64),
}

/// Audit record of a single match step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchEvent {
    pub buy: Participant,
    pub sell: Participant,
    /// Matched principal in MMK.
    pub matched_amount: Decimal,
    pub buy_rate: Decimal,
    pub sell_rate: Decimal,
    pub thb_buy: Decimal,
    pub thb_sell: Decimal,
    pub profit: Decimal,
    pub attributed_to: Participant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub id: Uuid,
    pub kind: TradeKind,
    pub profit: Decimal,
    pub remaining_amount: Decimal,
    pub match_link: Option<Uuid>,
}

/// A trade still open at the end of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unresolved {
    pub id: Uuid,
    pub kind: TradeKind,
    pub remaining_amount: Decimal,
    pub rate: Decimal,
    pub currency: Currency,
    pub thb_equivalent: Decimal,
    pub local_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    InvalidRate,
    MalformedTrade,
    UnsupportedPair,
    InvalidLeftover,
}

/// A record excluded from the run, reported instead of raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub trade_id: Option<Uuid>,
    pub leftover_id: Option<i64>,
    pub message: String,
}

/// Rate spread (`buy_rate - sell_rate`) statistics over the run's matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSpread {
    pub samples: usize,
    pub average: Decimal,
    pub minimum: Decimal,
    pub maximum: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub scope: Scope,
    pub total_profit: Decimal,
    pub matched_profit: Decimal,
    pub carryover_profit: Decimal,
    pub adjustment_profit: Decimal,
    pub per_trade: Vec<TradeOutcome>,
    pub unresolved: Vec<Unresolved>,
    pub matches: Vec<MatchEvent>,
    pub lots_drawn: Vec<LotDraw>,
    pub spread: Option<RateSpread>,
    pub diagnostics: Vec<Diagnostic>,
}
