//! Storage seams for the ledger.
//!
//! A matching run works inside one [`LedgerTx`]: everything it loads and
//! writes goes through the transaction, and nothing becomes visible to
//! readers until [`LedgerTx::commit`]. Dropping a transaction discards it.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{FixedOffset, NaiveDate};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::errors::LedgerResult;
use crate::models::{
    CarryoverProfit, Currency, Draw, Leftover, LotDraw, NewAdjustment, NewTrade, Scope, Trade,
    TradeUpdate,
};

/// Durable pool of unmatched remainders, one FIFO pool per currency.
#[async_trait]
pub trait LeftoverStore: Send {
    /// Add `amount` to the open leftover with the same currency, rate and
    /// date, or create one. The leftover is tagged with the scope claimed by
    /// `LedgerTx::lock_scope`, or with `as_of` alone outside a run.
    async fn record(
        &mut self,
        currency: Currency,
        amount: Decimal,
        rate: Decimal,
        as_of: NaiveDate,
    ) -> LedgerResult<Leftover>;

    /// Draw up to `requested` from the oldest open leftovers of `currency`.
    /// Obtaining less than requested is not an error.
    async fn consume(&mut self, currency: Currency, requested: Decimal) -> LedgerResult<Draw>;
}

#[async_trait]
pub trait LedgerTx: LeftoverStore {
    /// Claim `scope` for a matching run. Fails fast with
    /// `ConcurrentRunConflict` when another run holds an overlapping scope.
    async fn lock_scope(&mut self, scope: Scope) -> LedgerResult<()>;

    /// All rows of the scope, including malformed ones and adjustments.
    async fn load_trades(&mut self, scope: Scope) -> LedgerResult<Vec<Trade>>;

    /// Undo the carryover effects of earlier runs inside `scope`: restore the
    /// lots they drew, forget the carryover profit they booked and drop the
    /// leftovers they recorded.
    ///
    /// Fails with `StaleCarryover` when a run that overlaps `scope` without
    /// lying inside it left state behind, or when a later run drew from a
    /// leftover about to be dropped. `Scope::All` clears all carryover state.
    async fn rewind_carryover(&mut self, scope: Scope) -> LedgerResult<()>;

    /// Open leftovers created strictly before `before`, oldest first.
    async fn open_lots(&mut self, before: NaiveDate) -> LedgerResult<Vec<Leftover>>;

    /// Field-level write of `remaining_amount`, `profit` and `match_link`.
    async fn apply_updates(&mut self, updates: &[TradeUpdate]) -> LedgerResult<()>;

    /// Remember which lots a run over `scope` drew so it can be rewound.
    async fn record_draws(&mut self, scope: Scope, lots: &[LotDraw]) -> LedgerResult<()>;

    async fn record_carryover_profits(&mut self, profits: &[CarryoverProfit]) -> LedgerResult<()>;

    async fn commit(self) -> LedgerResult<()>;
}

/// Scope a leftover recorded under `claimed` belongs to.
pub(crate) fn recording_scope(claimed: Option<Scope>, as_of: NaiveDate) -> (NaiveDate, NaiveDate) {
    match claimed {
        Some(Scope::Range { start, end }) => (start, end),
        _ => (as_of, as_of),
    }
}

/// Whether a run over `start..=end` overlaps `scope` without lying inside it.
pub(crate) fn straddles(scope: Scope, start: NaiveDate, end: NaiveDate) -> bool {
    match scope {
        Scope::All => false,
        Scope::Range { start: s, end: e } => start <= e && end >= s && !(start >= s && end <= e),
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    type Tx: LedgerTx;

    async fn begin(&self) -> LedgerResult<Self::Tx>;

    /// Offset used to turn timestamps into business dates.
    fn utc_offset(&self) -> FixedOffset;

    async fn record_trade(&self, trade: NewTrade) -> LedgerResult<Trade>;

    async fn record_adjustment(&self, adjustment: NewAdjustment) -> LedgerResult<Trade>;

    async fn get_trade(&self, id: Uuid) -> LedgerResult<Trade>;

    /// Committed rows of a scope ordered by `(traded_at, seq)`.
    async fn list_trades(&self, scope: Scope) -> LedgerResult<Vec<Trade>>;

    async fn open_leftovers(&self) -> LedgerResult<Vec<Leftover>>;

    async fn carryover_profits(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> LedgerResult<Vec<CarryoverProfit>>;
}
