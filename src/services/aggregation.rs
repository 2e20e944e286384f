use std::collections::BTreeMap;

use chrono::{FixedOffset, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{LedgerError, LedgerResult};
use crate::models::{CarryoverProfit, Scope, Trade, TradeKind};
use crate::store::LedgerStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitSummary {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub buy_sell: Decimal,
    pub adjustments: Decimal,
    pub carryover: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyProfit {
    pub date: NaiveDate,
    pub buy_sell_profit: Decimal,
    pub other_profit: Decimal,
    pub carryover_profit: Decimal,
    pub total_profit: Decimal,
}

#[derive(Default)]
struct Buckets {
    buy_sell: Decimal,
    other: Decimal,
    carryover: Decimal,
}

impl Buckets {
    fn add_trade(&mut self, trade: &Trade) {
        let profit = trade.profit.unwrap_or(Decimal::ZERO);
        match trade.kind() {
            Some(TradeKind::Buy | TradeKind::Sell) => self.buy_sell += profit,
            Some(TradeKind::Adjustment) => self.other += profit,
            None => {}
        }
    }

    fn total(&self) -> Decimal {
        self.buy_sell + self.other + self.carryover
    }
}

/// Sum of stored profit over `rows` plus carryover profit recognized in
/// `start..=end`. Null profits count as zero.
pub fn summarize(
    rows: &[Trade],
    carryover: &[CarryoverProfit],
    start: NaiveDate,
    end: NaiveDate,
) -> ProfitSummary {
    let mut buckets = Buckets::default();
    rows.iter().for_each(|t| buckets.add_trade(t));
    buckets.carryover = carryover
        .iter()
        .filter(|c| c.recognized_on >= start && c.recognized_on <= end)
        .map(|c| c.profit)
        .sum();

    ProfitSummary {
        start,
        end,
        buy_sell: buckets.buy_sell,
        adjustments: buckets.other,
        carryover: buckets.carryover,
        total: buckets.total(),
    }
}

/// One entry per local day in `start..=end`, days without activity included.
pub fn daily_breakdown(
    rows: &[Trade],
    carryover: &[CarryoverProfit],
    start: NaiveDate,
    end: NaiveDate,
    offset: FixedOffset,
) -> Vec<DailyProfit> {
    let mut days: BTreeMap<NaiveDate, Buckets> = start
        .iter_days()
        .take_while(|d| *d <= end)
        .map(|d| (d, Buckets::default()))
        .collect();

    for trade in rows {
        if let Some(bucket) = trade.local_date(offset).and_then(|d| days.get_mut(&d)) {
            bucket.add_trade(trade);
        }
    }
    for profit in carryover {
        if let Some(bucket) = days.get_mut(&profit.recognized_on) {
            bucket.carryover += profit.profit;
        }
    }

    days.into_iter()
        .map(|(date, b)| DailyProfit {
            date,
            buy_sell_profit: b.buy_sell,
            other_profit: b.other,
            carryover_profit: b.carryover,
            total_profit: b.total(),
        })
        .collect()
}

/// Read-side profit reporting over whatever the last runs committed.
pub struct ProfitAggregator<'a, S: LedgerStore> {
    store: &'a S,
}

impl<'a, S: LedgerStore> ProfitAggregator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn total(&self, start: NaiveDate, end: NaiveDate) -> LedgerResult<ProfitSummary> {
        let (rows, carryover) = self.load(start, end).await?;
        Ok(summarize(&rows, &carryover, start, end))
    }

    pub async fn daily(&self, start: NaiveDate, end: NaiveDate) -> LedgerResult<Vec<DailyProfit>> {
        let (rows, carryover) = self.load(start, end).await?;
        Ok(daily_breakdown(
            &rows,
            &carryover,
            start,
            end,
            self.store.utc_offset(),
        ))
    }

    async fn load(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> LedgerResult<(Vec<Trade>, Vec<CarryoverProfit>)> {
        let scope = Scope::range(start, end).map_err(LedgerError::InvalidInput)?;
        let rows = self.store.list_trades(scope).await?;
        let carryover = self.store.carryover_profits(start, end).await?;
        Ok((rows, carryover))
    }
}
