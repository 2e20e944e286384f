use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::Currency;

/// An unmatched remainder that survived past the end of a date-scoped run.
///
/// `amount` is always expressed in MMK, the unit the engine matches in;
/// `currency` names the inventory it represents (MMK for open BUYs, THB for
/// open SELLs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leftover {
    pub id: i64,
    pub currency: Currency,
    pub amount: Decimal,
    pub original_amount: Decimal,
    pub rate: Decimal,
    pub created_on: NaiveDate,
    pub processed: bool,
    /// Scope of the run that recorded it.
    pub scope_start: NaiveDate,
    pub scope_end: NaiveDate,
}

/// One lot touched by a `consume` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LotDraw {
    pub leftover_id: i64,
    pub amount: Decimal,
    pub rate: Decimal,
}

/// Result of drawing from the leftover pool of one currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draw {
    pub currency: Currency,
    pub requested: Decimal,
    pub obtained: Decimal,
    /// Amount-weighted mean rate of the lots drawn; `None` when nothing was obtained.
    pub weighted_rate: Option<Decimal>,
    pub lots: Vec<LotDraw>,
}

impl Draw {
    pub fn from_lots(currency: Currency, requested: Decimal, lots: Vec<LotDraw>) -> Self {
        let obtained: Decimal = lots.iter().map(|l| l.amount).sum();
        let weighted_rate = if obtained.is_zero() {
            None
        } else {
            Some(lots.iter().map(|l| l.amount * l.rate).sum::<Decimal>() / obtained)
        };
        Self {
            currency,
            requested,
            obtained,
            weighted_rate,
            lots,
        }
    }

    pub fn shortfall(&self) -> Decimal {
        (self.requested - self.obtained).max(Decimal::ZERO)
    }
}

/// Profit realised when a carried lot was closed by a trade of a later run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CarryoverProfit {
    pub leftover_id: i64,
    pub trade_id: Uuid,
    pub recognized_on: NaiveDate,
    pub matched_amount: Decimal,
    pub profit: Decimal,
    pub scope_start: NaiveDate,
    pub scope_end: NaiveDate,
}
