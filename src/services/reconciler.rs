use std::collections::HashMap;
use std::time::Instant;

use chrono::FixedOffset;
use metrics::{counter, histogram};
use rust_decimal::Decimal;

use crate::errors::{LedgerError, LedgerResult};
use crate::matching::{rederive, LotClose, MatchOutcome};
use crate::metrics::{MATCHES_TOTAL, RUNS_REJECTED, RUNS_TOTAL, RUN_SECONDS, TRADES_EXCLUDED};
use crate::models::{
    CarryoverProfit, Currency, CurrencyPair, Leftover, LotDraw, RunResult, Scope, Trade,
    TradeKind, TradeUpdate,
};
use crate::services::run_lock::RunLocks;
use crate::store::{LedgerStore, LedgerTx, LeftoverStore};

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub pair: CurrencyPair,
    pub offset: FixedOffset,
    /// Carry unmatched remainders of date-range runs into later runs.
    pub carryover_enabled: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            pair: CurrencyPair::default(),
            offset: crate::config::default_offset(),
            carryover_enabled: true,
        }
    }
}

/// Re-derives remaining amounts, profit and match links for a scope and
/// persists them in one atomic unit.
pub struct Reconciler<S: LedgerStore> {
    store: S,
    locks: RunLocks,
    config: ReconcilerConfig,
}

impl<S: LedgerStore> Reconciler<S> {
    pub fn new(store: S, config: ReconcilerConfig) -> Self {
        Self {
            store,
            locks: RunLocks::new(),
            config,
        }
    }

    /// Share the run registry with other reconcilers over the same ledger.
    pub fn with_locks(mut self, locks: RunLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Run FIFO matching over `scope`.
    ///
    /// Either every derived field, leftover and carryover record of the run is
    /// committed or none is. A run overlapping one already in progress fails
    /// with `ConcurrentRunConflict` without waiting.
    pub async fn run_matching(&self, scope: Scope) -> LedgerResult<RunResult> {
        let started = Instant::now();

        let guard = match self.locks.try_acquire(scope) {
            Ok(guard) => guard,
            Err(e) => {
                counter!(RUNS_REJECTED).increment(1);
                tracing::warn!(%scope, error = %e, "Matching run rejected");
                return Err(e);
            }
        };

        let result = self.execute(scope).await;
        drop(guard);

        match &result {
            Ok(run) => {
                counter!(RUNS_TOTAL).increment(1);
                histogram!(RUN_SECONDS).record(started.elapsed().as_secs_f64());
                tracing::info!(
                    %scope,
                    total_profit = %run.total_profit,
                    matches = run.matches.len(),
                    unresolved = run.unresolved.len(),
                    diagnostics = run.diagnostics.len(),
                    "Matching run committed"
                );
            }
            Err(e @ LedgerError::ConcurrentRunConflict { .. }) => {
                counter!(RUNS_REJECTED).increment(1);
                tracing::warn!(%scope, error = %e, "Matching run rejected");
            }
            Err(e) => {
                tracing::error!(%scope, error = %e, "Matching run failed, nothing persisted");
            }
        }
        result
    }

    async fn execute(&self, scope: Scope) -> LedgerResult<RunResult> {
        let mut tx = self.store.begin().await?;
        tx.lock_scope(scope).await?;

        let carry = match scope {
            Scope::Range { start, end } if self.config.carryover_enabled => Some((start, end)),
            _ => None,
        };

        // A whole-ledger run supersedes every carried lot.
        if carry.is_some() || scope == Scope::All {
            tx.rewind_carryover(scope).await?;
        }

        let rows = tx.load_trades(scope).await?;
        let leftovers = match carry {
            Some((start, _)) => tx.open_lots(start).await?,
            None => Vec::new(),
        };

        let (outcome, validated) = rederive(&rows, &leftovers, self.config.pair, self.config.offset);

        let mut updates: Vec<TradeUpdate> = outcome
            .per_trade
            .iter()
            .map(|t| TradeUpdate {
                id: t.id,
                remaining_amount: Some(t.remaining_amount),
                profit: Some(t.profit),
                match_link: t.match_link,
            })
            .collect();
        updates.extend(validated.excluded.iter().map(|id| TradeUpdate {
            id: *id,
            remaining_amount: None,
            profit: None,
            match_link: None,
        }));
        tx.apply_updates(&updates).await?;

        let mut lots_drawn = Vec::new();
        if let Some((start, end)) = carry {
            lots_drawn = draw_carried(&mut tx, scope, &leftovers, &outcome.lot_draws).await?;

            let profits = carryover_profits(&outcome.lot_closes, start, end);
            tx.record_carryover_profits(&profits).await?;

            for open in &outcome.unresolved {
                tx.record(open.currency, open.remaining_amount, open.rate, open.local_date)
                    .await?;
            }
        }

        tx.commit().await?;

        counter!(MATCHES_TOTAL).increment(outcome.matches.len() as u64);
        counter!(TRADES_EXCLUDED).increment(validated.excluded.len() as u64);

        Ok(build_result(scope, &rows, outcome, lots_drawn))
    }
}

/// Take what the engine matched against carried lots out of the leftover
/// pool and record the draws against `scope`.
async fn draw_carried<T: LedgerTx>(
    tx: &mut T,
    scope: Scope,
    leftovers: &[Leftover],
    engine_draws: &[LotDraw],
) -> LedgerResult<Vec<LotDraw>> {
    let currency_of: HashMap<i64, Currency> =
        leftovers.iter().map(|l| (l.id, l.currency)).collect();

    let mut drawn = Vec::new();
    for currency in [Currency::Mmk, Currency::Thb] {
        let expected: Vec<&LotDraw> = engine_draws
            .iter()
            .filter(|d| currency_of.get(&d.leftover_id) == Some(&currency))
            .collect();
        if expected.is_empty() {
            continue;
        }

        let requested: Decimal = expected.iter().map(|d| d.amount).sum();
        let draw = tx.consume(currency, requested).await?;

        let diverged = draw.lots.len() != expected.len()
            || draw
                .lots
                .iter()
                .zip(&expected)
                .any(|(got, want)| got.leftover_id != want.leftover_id || got.amount != want.amount);
        if diverged {
            tracing::warn!(%currency, %scope, "Leftover pool changed under the run");
            return Err(LedgerError::ConcurrentRunConflict {
                requested: scope,
                active: None,
            });
        }

        tracing::debug!(
            %currency,
            obtained = %draw.obtained,
            weighted_rate = ?draw.weighted_rate,
            "Drew carried lots"
        );
        tx.record_draws(scope, &draw.lots).await?;
        drawn.extend(draw.lots);
    }
    Ok(drawn)
}

fn carryover_profits(
    closes: &[LotClose],
    scope_start: chrono::NaiveDate,
    scope_end: chrono::NaiveDate,
) -> Vec<CarryoverProfit> {
    closes
        .iter()
        .map(|c| CarryoverProfit {
            leftover_id: c.leftover_id,
            trade_id: c.closed_by,
            recognized_on: c.recognized_on,
            matched_amount: c.matched_amount,
            profit: c.profit,
            scope_start,
            scope_end,
        })
        .collect()
}

fn build_result(
    scope: Scope,
    rows: &[Trade],
    outcome: MatchOutcome,
    lots_drawn: Vec<LotDraw>,
) -> RunResult {
    let matched_profit = outcome.trade_profit();
    let carryover_profit = outcome.lot_profit();
    let adjustment_profit: Decimal = rows
        .iter()
        .filter(|t| t.kind() == Some(TradeKind::Adjustment))
        .filter_map(|t| t.profit)
        .sum();

    RunResult {
        scope,
        total_profit: matched_profit + carryover_profit + adjustment_profit,
        matched_profit,
        carryover_profit,
        adjustment_profit,
        per_trade: outcome.per_trade,
        unresolved: outcome.unresolved,
        matches: outcome.matches,
        lots_drawn,
        spread: outcome.spread,
        diagnostics: outcome.diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_pool_drift_is_reported_as_conflict() {
        let store = MemoryStore::new(crate::config::default_offset());
        let on = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
        let scope = Scope::day(NaiveDate::from_ymd_opt(2025, 5, 2).unwrap());

        let mut tx = store.begin().await.unwrap();
        let lot = tx.record(Currency::Mmk, dec!(100), dec!(130), on).await.unwrap();
        let planned = [LotDraw { leftover_id: lot.id, amount: dec!(150), rate: dec!(130) }];

        let err = draw_carried(&mut tx, scope, &[lot], &planned).await.unwrap_err();
        assert!(matches!(err, LedgerError::ConcurrentRunConflict { active: None, .. }));
        assert!(err.is_retryable());
    }
}
