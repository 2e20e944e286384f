use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{CurrencyPair, TradeKind};
use crate::errors::LedgerError;

/// Decimal places kept when a rate is derived from the two amounts.
pub const RATE_DP: u32 = 6;

/// Database row for the trades table.
///
/// Amount, rate and timestamp columns are nullable so that rows written by
/// other collaborators with missing data can still be loaded and reported
/// instead of failing the whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Trade {
    pub id: Uuid,
    pub seq: i64,
    pub kind: String,
    pub pair: String,
    pub thb_amount: Option<Decimal>,
    pub mmk_amount: Option<Decimal>,
    pub rate: Option<Decimal>,
    pub traded_at: Option<DateTime<Utc>>,
    pub customer: Option<String>,
    pub notes: Option<String>,
    pub remaining_amount: Option<Decimal>,
    pub profit: Option<Decimal>,
    pub match_link: Option<Uuid>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Trade {
    pub fn kind(&self) -> Option<TradeKind> {
        TradeKind::from_db_str(&self.kind)
    }

    /// THB per 100,000 MMK, the quoting convention used on the counter.
    pub fn hundred_k_rate(&self) -> Option<Decimal> {
        let rate = self.rate.filter(|r| *r > Decimal::ZERO)?;
        Some(
            (Decimal::from(100_000) / rate)
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// Business-local calendar date of the trade.
    pub fn local_date(&self, offset: FixedOffset) -> Option<NaiveDate> {
        self.traded_at.map(|ts| ts.with_timezone(&offset).date_naive())
    }
}

/// A BUY or SELL as entered at the counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTrade {
    pub kind: TradeKind,
    pub thb_amount: Decimal,
    pub mmk_amount: Decimal,
    /// MMK per THB; derived from the amounts when absent.
    pub rate: Option<Decimal>,
    pub traded_at: DateTime<Utc>,
    pub customer: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub pair: CurrencyPair,
}

impl NewTrade {
    pub fn buy(thb_amount: Decimal, mmk_amount: Decimal, traded_at: DateTime<Utc>) -> Self {
        Self::new(TradeKind::Buy, thb_amount, mmk_amount, traded_at)
    }

    pub fn sell(thb_amount: Decimal, mmk_amount: Decimal, traded_at: DateTime<Utc>) -> Self {
        Self::new(TradeKind::Sell, thb_amount, mmk_amount, traded_at)
    }

    fn new(
        kind: TradeKind,
        thb_amount: Decimal,
        mmk_amount: Decimal,
        traded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            thb_amount,
            mmk_amount,
            rate: None,
            traded_at,
            customer: None,
            notes: None,
            pair: CurrencyPair::default(),
        }
    }

    pub fn with_rate(mut self, rate: Decimal) -> Self {
        self.rate = Some(rate);
        self
    }

    pub fn with_customer(mut self, customer: impl Into<String>) -> Self {
        self.customer = Some(customer.into());
        self
    }

    /// Validate the entry and return the rate to store.
    pub fn resolved_rate(&self) -> Result<Decimal, LedgerError> {
        if self.kind == TradeKind::Adjustment {
            return Err(LedgerError::InvalidInput(
                "adjustments are recorded with NewAdjustment".into(),
            ));
        }
        if self.thb_amount < Decimal::ZERO || self.mmk_amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidInput(format!(
                "amounts must be positive: thb={} mmk={}",
                self.thb_amount, self.mmk_amount
            )));
        }

        let rate = match self.rate {
            Some(rate) => rate,
            None if self.thb_amount.is_zero() => {
                return Err(LedgerError::InvalidInput(
                    "cannot derive a rate from a zero THB amount".into(),
                ))
            }
            None => (self.mmk_amount / self.thb_amount)
                .round_dp_with_strategy(RATE_DP, RoundingStrategy::MidpointAwayFromZero),
        };

        if rate <= Decimal::ZERO {
            return Err(LedgerError::InvalidInput(format!("rate must be positive: {rate}")));
        }
        Ok(rate)
    }
}

/// A manual profit (or loss, when negative) entry. Never matched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAdjustment {
    pub amount: Decimal,
    pub traded_at: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Field-level write-back of a matching run for one trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeUpdate {
    pub id: Uuid,
    pub remaining_amount: Option<Decimal>,
    pub profit: Option<Decimal>,
    pub match_link: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_rate_derived_from_amounts() {
        let trade = NewTrade::buy(dec!(7620), dec!(1000000), Utc::now());
        assert_eq!(trade.resolved_rate().unwrap(), dec!(131.233596));
    }

    #[test]
    fn test_explicit_rate_wins() {
        let trade = NewTrade::sell(dec!(7936.51), dec!(1000000), Utc::now()).with_rate(dec!(126));
        assert_eq!(trade.resolved_rate().unwrap(), dec!(126));
    }

    #[test]
    fn test_rejects_unusable_entries() {
        let zero_mmk = NewTrade::buy(dec!(100), dec!(0), Utc::now());
        assert!(matches!(zero_mmk.resolved_rate(), Err(LedgerError::InvalidInput(_))));

        let zero_thb = NewTrade::buy(dec!(0), dec!(13000), Utc::now());
        assert!(zero_thb.resolved_rate().is_err());

        let negative_rate = NewTrade::buy(dec!(100), dec!(13000), Utc::now()).with_rate(dec!(-1));
        assert!(negative_rate.resolved_rate().is_err());
    }

    #[test]
    fn test_hundred_k_rate() {
        let trade = Trade {
            id: Uuid::new_v4(),
            seq: 1,
            kind: "BUY".into(),
            pair: "THB/MMK".into(),
            thb_amount: Some(dec!(7692.31)),
            mmk_amount: Some(dec!(1000000)),
            rate: Some(dec!(130)),
            traded_at: None,
            customer: None,
            notes: None,
            remaining_amount: None,
            profit: None,
            match_link: None,
            created_at: None,
        };
        assert_eq!(trade.hundred_k_rate(), Some(dec!(769.23)));
        assert_eq!(trade.kind(), Some(TradeKind::Buy));
    }
}
