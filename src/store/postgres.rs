use async_trait::async_trait;
use chrono::{Datelike, FixedOffset, NaiveDate};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{recording_scope, LedgerStore, LedgerTx, LeftoverStore};
use crate::db::{carryover_repo, leftover_repo, trade_repo};
use crate::errors::{LedgerError, LedgerResult};
use crate::models::{
    CarryoverProfit, Currency, Draw, Leftover, LotDraw, NewAdjustment, NewTrade, Scope, Trade,
    TradeUpdate,
};

/// Advisory lock key held exclusively by whole-ledger runs and shared by
/// every date-range run.
const LEDGER_LOCK_KEY: i64 = 0x6678_6c65_6467_6572;
/// Class of the per-day advisory locks (two-key form).
const DAY_LOCK_CLASS: i32 = 0x6678_6401;
/// Class of the per-currency leftover pool locks.
const POOL_LOCK_CLASS: i32 = 0x6678_7001;

fn pool_key(currency: Currency) -> i32 {
    match currency {
        Currency::Thb => 1,
        Currency::Mmk => 2,
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    offset: FixedOffset,
}

impl PgStore {
    pub fn new(pool: PgPool, offset: FixedOffset) -> Self {
        Self { pool, offset }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// One matching run's database transaction. Dropping it rolls back.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
    offset: FixedOffset,
    scope: Option<Scope>,
}

impl PgTx {
    async fn try_lock_ledger(&mut self, shared: bool) -> LedgerResult<bool> {
        let sql = if shared {
            "SELECT pg_try_advisory_xact_lock_shared($1)"
        } else {
            "SELECT pg_try_advisory_xact_lock($1)"
        };
        let acquired = sqlx::query_scalar::<_, bool>(sql)
            .bind(LEDGER_LOCK_KEY)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(acquired)
    }

    async fn lock_pool(&mut self, currency: Currency) -> LedgerResult<()> {
        sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
            .bind(POOL_LOCK_CLASS)
            .bind(pool_key(currency))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    fn conflict(&self, requested: Scope) -> LedgerError {
        LedgerError::ConcurrentRunConflict {
            requested,
            active: None,
        }
    }
}

#[async_trait]
impl LeftoverStore for PgTx {
    async fn record(
        &mut self,
        currency: Currency,
        amount: Decimal,
        rate: Decimal,
        as_of: NaiveDate,
    ) -> LedgerResult<Leftover> {
        if amount <= Decimal::ZERO || rate <= Decimal::ZERO {
            return Err(LedgerError::InvalidInput(format!(
                "leftover needs positive amount and rate, got {amount} at {rate}"
            )));
        }
        self.lock_pool(currency).await?;

        let origin = recording_scope(self.scope, as_of);
        match leftover_repo::find_mergeable(&mut self.tx, currency, rate, as_of, origin).await? {
            Some(existing) => leftover_repo::add_to_leftover(&mut self.tx, existing.id, amount).await,
            None => {
                leftover_repo::insert_leftover(&mut self.tx, currency, amount, rate, as_of, origin)
                    .await
            }
        }
    }

    async fn consume(&mut self, currency: Currency, requested: Decimal) -> LedgerResult<Draw> {
        self.lock_pool(currency).await?;

        let open = leftover_repo::lock_open_lots(&mut self.tx, currency).await?;
        let mut wanted = requested.max(Decimal::ZERO);
        let mut lots = Vec::new();
        for leftover in open {
            if wanted.is_zero() {
                break;
            }
            let take = leftover.amount.min(wanted);
            let remaining = leftover.amount - take;
            leftover_repo::set_remaining(&mut self.tx, leftover.id, remaining, remaining.is_zero())
                .await?;
            wanted -= take;
            lots.push(LotDraw {
                leftover_id: leftover.id,
                amount: take,
                rate: leftover.rate,
            });
        }

        Ok(Draw::from_lots(currency, requested, lots))
    }
}

#[async_trait]
impl LedgerTx for PgTx {
    async fn lock_scope(&mut self, scope: Scope) -> LedgerResult<()> {
        match scope {
            Scope::All => {
                if !self.try_lock_ledger(false).await? {
                    return Err(self.conflict(scope));
                }
            }
            Scope::Range { .. } => {
                if !self.try_lock_ledger(true).await? {
                    return Err(self.conflict(scope));
                }
                for day in scope.days().unwrap_or_default() {
                    let acquired = sqlx::query_scalar::<_, bool>(
                        "SELECT pg_try_advisory_xact_lock($1, $2)",
                    )
                    .bind(DAY_LOCK_CLASS)
                    .bind(day.num_days_from_ce())
                    .fetch_one(&mut *self.tx)
                    .await?;
                    if !acquired {
                        return Err(self.conflict(scope));
                    }
                }
            }
        }
        self.scope = Some(scope);
        Ok(())
    }

    async fn load_trades(&mut self, scope: Scope) -> LedgerResult<Vec<Trade>> {
        match scope.utc_bounds(self.offset) {
            None => trade_repo::lock_all_trades(&mut self.tx).await,
            Some((from, to)) => trade_repo::lock_trades_between(&mut self.tx, from, to).await,
        }
    }

    async fn rewind_carryover(&mut self, scope: Scope) -> LedgerResult<()> {
        self.lock_pool(Currency::Thb).await?;
        self.lock_pool(Currency::Mmk).await?;

        let Scope::Range { start, end } = scope else {
            let dropped = carryover_repo::delete_all(&mut self.tx).await?;
            let deleted = leftover_repo::delete_all(&mut self.tx).await?;
            tracing::debug!(%scope, dropped, deleted, "Cleared carryover state");
            return Ok(());
        };

        if let Some(leftover_id) = leftover_repo::find_straddling_run(&mut self.tx, start, end).await?
        {
            return Err(LedgerError::StaleCarryover { leftover_id, scope });
        }

        let restored = leftover_repo::restore_draws_within(&mut self.tx, start, end).await?;
        let dropped = carryover_repo::delete_within(&mut self.tx, start, end).await?;

        if let Some(leftover_id) =
            leftover_repo::find_drawn_recorded_within(&mut self.tx, start, end).await?
        {
            return Err(LedgerError::StaleCarryover { leftover_id, scope });
        }

        let deleted = leftover_repo::delete_recorded_within(&mut self.tx, start, end).await?;
        tracing::debug!(%scope, restored, dropped, deleted, "Rewound carryover state");
        Ok(())
    }

    async fn open_lots(&mut self, before: NaiveDate) -> LedgerResult<Vec<Leftover>> {
        leftover_repo::get_open_before(&mut self.tx, before).await
    }

    async fn apply_updates(&mut self, updates: &[TradeUpdate]) -> LedgerResult<()> {
        for update in updates {
            if !trade_repo::apply_update(&mut self.tx, update).await? {
                return Err(LedgerError::NotFound(format!("trade {}", update.id)));
            }
        }
        Ok(())
    }

    async fn record_draws(&mut self, scope: Scope, lots: &[LotDraw]) -> LedgerResult<()> {
        let Scope::Range { start, end } = scope else {
            return Err(LedgerError::InvalidInput(
                "carryover draws belong to a date range".into(),
            ));
        };
        for lot in lots {
            leftover_repo::insert_draw(&mut self.tx, lot.leftover_id, start, end, lot.amount)
                .await?;
        }
        Ok(())
    }

    async fn record_carryover_profits(&mut self, profits: &[CarryoverProfit]) -> LedgerResult<()> {
        for profit in profits {
            carryover_repo::insert_profit(&mut self.tx, profit).await?;
        }
        Ok(())
    }

    async fn commit(self) -> LedgerResult<()> {
        let scope = self.scope;
        self.tx.commit().await?;
        if let Some(scope) = scope {
            tracing::debug!(%scope, "Committed matching transaction");
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> LedgerResult<PgTx> {
        Ok(PgTx {
            tx: self.pool.begin().await?,
            offset: self.offset,
            scope: None,
        })
    }

    fn utc_offset(&self) -> FixedOffset {
        self.offset
    }

    async fn record_trade(&self, trade: NewTrade) -> LedgerResult<Trade> {
        let rate = trade.resolved_rate()?;
        let mut conn = self.pool.acquire().await?;
        trade_repo::insert_trade(&mut conn, &trade, rate).await
    }

    async fn record_adjustment(&self, adjustment: NewAdjustment) -> LedgerResult<Trade> {
        let mut conn = self.pool.acquire().await?;
        trade_repo::insert_adjustment(&mut conn, &adjustment).await
    }

    async fn get_trade(&self, id: Uuid) -> LedgerResult<Trade> {
        let mut conn = self.pool.acquire().await?;
        trade_repo::get_trade(&mut conn, id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("trade {id}")))
    }

    async fn list_trades(&self, scope: Scope) -> LedgerResult<Vec<Trade>> {
        let mut conn = self.pool.acquire().await?;
        match scope.utc_bounds(self.offset) {
            None => trade_repo::get_all_trades(&mut conn).await,
            Some((from, to)) => trade_repo::get_trades_between(&mut conn, from, to).await,
        }
    }

    async fn open_leftovers(&self) -> LedgerResult<Vec<Leftover>> {
        let mut conn = self.pool.acquire().await?;
        leftover_repo::get_open(&mut conn).await
    }

    async fn carryover_profits(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> LedgerResult<Vec<CarryoverProfit>> {
        let mut conn = self.pool.acquire().await?;
        carryover_repo::get_recognized_between(&mut conn, start, end).await
    }
}
