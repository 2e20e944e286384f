use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{FixedOffset, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use super::{recording_scope, straddles, LedgerStore, LedgerTx, LeftoverStore};
use crate::errors::{LedgerError, LedgerResult};
use crate::models::{
    CarryoverProfit, Currency, Draw, Leftover, LotDraw, NewAdjustment, NewTrade, Scope, Trade,
    TradeKind, TradeUpdate,
};

#[derive(Debug, Clone)]
struct DrawRow {
    leftover_id: i64,
    scope_start: NaiveDate,
    scope_end: NaiveDate,
    amount: Decimal,
}

#[derive(Debug, Clone, Default)]
struct State {
    trades: Vec<Trade>,
    leftovers: Vec<Leftover>,
    draws: Vec<DrawRow>,
    carryover: Vec<CarryoverProfit>,
    next_seq: i64,
    next_leftover_id: i64,
}

/// Process-local ledger.
///
/// Writers are serialized by a single lock. A transaction works on a copy
/// of the committed state and swaps it in on commit, so readers only ever
/// see fully committed runs.
#[derive(Clone)]
pub struct MemoryStore {
    offset: FixedOffset,
    committed: Arc<RwLock<State>>,
    writer: Arc<Mutex<()>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new(offset: FixedOffset) -> Self {
        Self {
            offset,
            committed: Arc::new(RwLock::new(State::default())),
            writer: Arc::new(Mutex::new(())),
            fail_next_commit: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make the next commit fail as if the database had rejected the write.
    pub fn inject_commit_failure(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Insert a raw row as another collaborator might have written it.
    pub async fn insert_raw(&self, mut trade: Trade) -> Trade {
        let _writer = self.writer.lock().await;
        let mut state = self.committed.write().await;
        state.next_seq += 1;
        trade.seq = state.next_seq;
        state.trades.push(trade.clone());
        trade
    }

    async fn insert(&self, build: impl FnOnce(i64) -> Trade) -> Trade {
        let _writer = self.writer.lock().await;
        let mut state = self.committed.write().await;
        state.next_seq += 1;
        let trade = build(state.next_seq);
        state.trades.push(trade.clone());
        trade
    }
}

fn in_scope(trade: &Trade, scope: Scope, offset: FixedOffset) -> bool {
    match scope.utc_bounds(offset) {
        None => true,
        Some((from, to)) => trade.traded_at.is_some_and(|ts| ts >= from && ts < to),
    }
}

fn scoped_trades(trades: &[Trade], scope: Scope, offset: FixedOffset) -> Vec<Trade> {
    let mut rows: Vec<Trade> = trades
        .iter()
        .filter(|t| in_scope(t, scope, offset))
        .cloned()
        .collect();
    rows.sort_by(|a, b| match (a.traded_at, b.traded_at) {
        (Some(x), Some(y)) => x.cmp(&y).then(a.seq.cmp(&b.seq)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.seq.cmp(&b.seq),
    });
    rows
}

fn fifo_order(a: &Leftover, b: &Leftover) -> std::cmp::Ordering {
    a.created_on.cmp(&b.created_on).then(a.id.cmp(&b.id))
}

fn record_into(
    state: &mut State,
    currency: Currency,
    amount: Decimal,
    rate: Decimal,
    as_of: NaiveDate,
    (scope_start, scope_end): (NaiveDate, NaiveDate),
) -> LedgerResult<Leftover> {
    if amount <= Decimal::ZERO || rate <= Decimal::ZERO {
        return Err(LedgerError::InvalidInput(format!(
            "leftover needs positive amount and rate, got {amount} at {rate}"
        )));
    }

    if let Some(existing) = state
        .leftovers
        .iter_mut()
        .find(|l| {
            !l.processed
                && l.currency == currency
                && l.rate == rate
                && l.created_on == as_of
                && (l.scope_start, l.scope_end) == (scope_start, scope_end)
        })
    {
        existing.amount += amount;
        existing.original_amount += amount;
        return Ok(existing.clone());
    }

    state.next_leftover_id += 1;
    let leftover = Leftover {
        id: state.next_leftover_id,
        currency,
        amount,
        original_amount: amount,
        rate,
        created_on: as_of,
        processed: false,
        scope_start,
        scope_end,
    };
    state.leftovers.push(leftover.clone());
    Ok(leftover)
}

fn consume_from(state: &mut State, currency: Currency, requested: Decimal) -> Draw {
    let mut open: Vec<&mut Leftover> = state
        .leftovers
        .iter_mut()
        .filter(|l| {
            l.currency == currency && !l.processed && l.amount > Decimal::ZERO && l.rate > Decimal::ZERO
        })
        .collect();
    open.sort_by(|a, b| fifo_order(a, b));

    let mut wanted = requested.max(Decimal::ZERO);
    let mut lots = Vec::new();
    for leftover in open {
        if wanted.is_zero() {
            break;
        }
        let take = leftover.amount.min(wanted);
        leftover.amount -= take;
        if leftover.amount.is_zero() {
            leftover.processed = true;
        }
        wanted -= take;
        lots.push(LotDraw {
            leftover_id: leftover.id,
            amount: take,
            rate: leftover.rate,
        });
    }

    Draw::from_lots(currency, requested, lots)
}

pub struct MemoryTx {
    offset: FixedOffset,
    shadow: State,
    committed: Arc<RwLock<State>>,
    fail_commit: Arc<AtomicBool>,
    scope: Option<Scope>,
    _writer: OwnedMutexGuard<()>,
}

#[async_trait]
impl LeftoverStore for MemoryTx {
    async fn record(
        &mut self,
        currency: Currency,
        amount: Decimal,
        rate: Decimal,
        as_of: NaiveDate,
    ) -> LedgerResult<Leftover> {
        let origin = recording_scope(self.scope, as_of);
        record_into(&mut self.shadow, currency, amount, rate, as_of, origin)
    }

    async fn consume(&mut self, currency: Currency, requested: Decimal) -> LedgerResult<Draw> {
        Ok(consume_from(&mut self.shadow, currency, requested))
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn lock_scope(&mut self, scope: Scope) -> LedgerResult<()> {
        // The writer guard already excludes every other transaction.
        self.scope = Some(scope);
        Ok(())
    }

    async fn load_trades(&mut self, scope: Scope) -> LedgerResult<Vec<Trade>> {
        Ok(scoped_trades(&self.shadow.trades, scope, self.offset))
    }

    async fn rewind_carryover(&mut self, scope: Scope) -> LedgerResult<()> {
        let state = &mut self.shadow;
        let Scope::Range { start, end } = scope else {
            state.leftovers.clear();
            state.draws.clear();
            state.carryover.clear();
            return Ok(());
        };
        let contained = |s: NaiveDate, e: NaiveDate| s >= start && e <= end;

        let straddling = state
            .draws
            .iter()
            .map(|d| (d.leftover_id, d.scope_start, d.scope_end))
            .chain(state.carryover.iter().map(|c| (c.leftover_id, c.scope_start, c.scope_end)))
            .chain(state.leftovers.iter().map(|l| (l.id, l.scope_start, l.scope_end)))
            .filter(|(_, s, e)| straddles(scope, *s, *e))
            .map(|(id, _, _)| id)
            .min();
        if let Some(leftover_id) = straddling {
            return Err(LedgerError::StaleCarryover { leftover_id, scope });
        }

        let (undo, keep): (Vec<DrawRow>, Vec<DrawRow>) = std::mem::take(&mut state.draws)
            .into_iter()
            .partition(|d| contained(d.scope_start, d.scope_end));
        state.draws = keep;
        for draw in undo {
            if let Some(leftover) = state.leftovers.iter_mut().find(|l| l.id == draw.leftover_id) {
                leftover.amount += draw.amount;
                leftover.processed = false;
            }
        }
        state
            .carryover
            .retain(|c| !contained(c.scope_start, c.scope_end));

        if let Some(stale) = state
            .leftovers
            .iter()
            .find(|l| {
                contained(l.scope_start, l.scope_end) && (l.processed || l.amount < l.original_amount)
            })
        {
            return Err(LedgerError::StaleCarryover {
                leftover_id: stale.id,
                scope,
            });
        }

        state.leftovers.retain(|l| !contained(l.scope_start, l.scope_end));
        let live: Vec<i64> = state.leftovers.iter().map(|l| l.id).collect();
        state.draws.retain(|d| live.contains(&d.leftover_id));
        Ok(())
    }

    async fn open_lots(&mut self, before: NaiveDate) -> LedgerResult<Vec<Leftover>> {
        let mut lots: Vec<Leftover> = self
            .shadow
            .leftovers
            .iter()
            .filter(|l| !l.processed && l.created_on < before)
            .cloned()
            .collect();
        lots.sort_by(fifo_order);
        Ok(lots)
    }

    async fn apply_updates(&mut self, updates: &[TradeUpdate]) -> LedgerResult<()> {
        for update in updates {
            let trade = self
                .shadow
                .trades
                .iter_mut()
                .find(|t| t.id == update.id)
                .ok_or_else(|| LedgerError::NotFound(format!("trade {}", update.id)))?;
            trade.remaining_amount = update.remaining_amount;
            trade.profit = update.profit;
            trade.match_link = update.match_link;
        }
        Ok(())
    }

    async fn record_draws(&mut self, scope: Scope, lots: &[LotDraw]) -> LedgerResult<()> {
        let Scope::Range { start, end } = scope else {
            return Err(LedgerError::InvalidInput(
                "carryover draws belong to a date range".into(),
            ));
        };
        self.shadow.draws.extend(lots.iter().map(|lot| DrawRow {
            leftover_id: lot.leftover_id,
            scope_start: start,
            scope_end: end,
            amount: lot.amount,
        }));
        Ok(())
    }

    async fn record_carryover_profits(&mut self, profits: &[CarryoverProfit]) -> LedgerResult<()> {
        self.shadow.carryover.extend_from_slice(profits);
        Ok(())
    }

    async fn commit(self) -> LedgerResult<()> {
        if self.fail_commit.swap(false, Ordering::SeqCst) {
            return Err(LedgerError::Persistence(sqlx::Error::Protocol(
                "injected commit failure".into(),
            )));
        }
        *self.committed.write().await = self.shadow;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> LedgerResult<MemoryTx> {
        let writer = self.writer.clone().lock_owned().await;
        let shadow = self.committed.read().await.clone();
        Ok(MemoryTx {
            offset: self.offset,
            shadow,
            committed: self.committed.clone(),
            fail_commit: self.fail_next_commit.clone(),
            scope: None,
            _writer: writer,
        })
    }

    fn utc_offset(&self) -> FixedOffset {
        self.offset
    }

    async fn record_trade(&self, trade: NewTrade) -> LedgerResult<Trade> {
        let rate = trade.resolved_rate()?;
        Ok(self
            .insert(|seq| Trade {
                id: Uuid::new_v4(),
                seq,
                kind: trade.kind.as_str().into(),
                pair: trade.pair.to_string(),
                thb_amount: Some(trade.thb_amount),
                mmk_amount: Some(trade.mmk_amount),
                rate: Some(rate),
                traded_at: Some(trade.traded_at),
                customer: trade.customer,
                notes: trade.notes,
                remaining_amount: None,
                profit: None,
                match_link: None,
                created_at: Some(Utc::now()),
            })
            .await)
    }

    async fn record_adjustment(&self, adjustment: NewAdjustment) -> LedgerResult<Trade> {
        Ok(self
            .insert(|seq| Trade {
                id: Uuid::new_v4(),
                seq,
                kind: TradeKind::Adjustment.as_str().into(),
                pair: crate::models::CurrencyPair::default().to_string(),
                thb_amount: Some(adjustment.amount),
                mmk_amount: None,
                rate: None,
                traded_at: Some(adjustment.traded_at),
                customer: None,
                notes: adjustment.notes,
                remaining_amount: None,
                profit: Some(adjustment.amount),
                match_link: None,
                created_at: Some(Utc::now()),
            })
            .await)
    }

    async fn get_trade(&self, id: Uuid) -> LedgerResult<Trade> {
        self.committed
            .read()
            .await
            .trades
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("trade {id}")))
    }

    async fn list_trades(&self, scope: Scope) -> LedgerResult<Vec<Trade>> {
        Ok(scoped_trades(&self.committed.read().await.trades, scope, self.offset))
    }

    async fn open_leftovers(&self) -> LedgerResult<Vec<Leftover>> {
        let mut open: Vec<Leftover> = self
            .committed
            .read()
            .await
            .leftovers
            .iter()
            .filter(|l| !l.processed)
            .cloned()
            .collect();
        open.sort_by(fifo_order);
        Ok(open)
    }

    async fn carryover_profits(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> LedgerResult<Vec<CarryoverProfit>> {
        Ok(self
            .committed
            .read()
            .await
            .carryover
            .iter()
            .filter(|c| c.recognized_on >= start && c.recognized_on <= end)
            .cloned()
            .collect())
    }
}
