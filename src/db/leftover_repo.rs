use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection};

use crate::errors::{LedgerError, LedgerResult};
use crate::models::{Currency, Leftover};

#[derive(Debug, FromRow)]
struct LeftoverRow {
    id: i64,
    currency: String,
    amount: Decimal,
    original_amount: Decimal,
    rate: Decimal,
    created_on: NaiveDate,
    processed: bool,
    scope_start: NaiveDate,
    scope_end: NaiveDate,
}

impl TryFrom<LeftoverRow> for Leftover {
    type Error = LedgerError;

    fn try_from(row: LeftoverRow) -> Result<Self, Self::Error> {
        let currency = row.currency.parse::<Currency>().map_err(|e| {
            LedgerError::Internal(anyhow::anyhow!("leftover {} has bad currency: {e}", row.id))
        })?;
        Ok(Leftover {
            id: row.id,
            currency,
            amount: row.amount,
            original_amount: row.original_amount,
            rate: row.rate,
            created_on: row.created_on,
            processed: row.processed,
            scope_start: row.scope_start,
            scope_end: row.scope_end,
        })
    }
}

fn convert(rows: Vec<LeftoverRow>) -> LedgerResult<Vec<Leftover>> {
    rows.into_iter().map(Leftover::try_from).collect()
}

pub async fn insert_leftover(
    conn: &mut PgConnection,
    currency: Currency,
    amount: Decimal,
    rate: Decimal,
    created_on: NaiveDate,
    (scope_start, scope_end): (NaiveDate, NaiveDate),
) -> LedgerResult<Leftover> {
    let row = sqlx::query_as::<_, LeftoverRow>(
        r#"
        INSERT INTO leftovers
            (currency, amount, original_amount, rate, created_on, scope_start, scope_end)
        VALUES ($1, $2, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(currency.as_str())
    .bind(amount)
    .bind(rate)
    .bind(created_on)
    .bind(scope_start)
    .bind(scope_end)
    .fetch_one(conn)
    .await?;

    row.try_into()
}

/// Open leftover with the same currency, rate, day and recording scope, if any.
pub async fn find_mergeable(
    conn: &mut PgConnection,
    currency: Currency,
    rate: Decimal,
    created_on: NaiveDate,
    (scope_start, scope_end): (NaiveDate, NaiveDate),
) -> LedgerResult<Option<Leftover>> {
    let row = sqlx::query_as::<_, LeftoverRow>(
        r#"
        SELECT * FROM leftovers
        WHERE currency = $1 AND rate = $2 AND created_on = $3
          AND scope_start = $4 AND scope_end = $5 AND NOT processed
        ORDER BY id ASC
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(currency.as_str())
    .bind(rate)
    .bind(created_on)
    .bind(scope_start)
    .bind(scope_end)
    .fetch_optional(conn)
    .await?;

    row.map(Leftover::try_from).transpose()
}

pub async fn add_to_leftover(
    conn: &mut PgConnection,
    id: i64,
    amount: Decimal,
) -> LedgerResult<Leftover> {
    let row = sqlx::query_as::<_, LeftoverRow>(
        r#"
        UPDATE leftovers
        SET amount = amount + $2, original_amount = original_amount + $2
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(amount)
    .fetch_one(conn)
    .await?;

    row.try_into()
}

/// Drawable lots of one currency in FIFO order, locked for update.
pub async fn lock_open_lots(
    conn: &mut PgConnection,
    currency: Currency,
) -> LedgerResult<Vec<Leftover>> {
    let rows = sqlx::query_as::<_, LeftoverRow>(
        r#"
        SELECT * FROM leftovers
        WHERE currency = $1 AND NOT processed AND amount > 0 AND rate > 0
        ORDER BY created_on ASC, id ASC
        FOR UPDATE
        "#,
    )
    .bind(currency.as_str())
    .fetch_all(conn)
    .await?;

    convert(rows)
}

pub async fn set_remaining(
    conn: &mut PgConnection,
    id: i64,
    amount: Decimal,
    processed: bool,
) -> LedgerResult<()> {
    sqlx::query("UPDATE leftovers SET amount = $2, processed = $3 WHERE id = $1")
        .bind(id)
        .bind(amount)
        .bind(processed)
        .execute(conn)
        .await?;

    Ok(())
}

/// Unprocessed leftovers created strictly before `before`, FIFO order.
pub async fn get_open_before(
    conn: &mut PgConnection,
    before: NaiveDate,
) -> LedgerResult<Vec<Leftover>> {
    let rows = sqlx::query_as::<_, LeftoverRow>(
        r#"
        SELECT * FROM leftovers
        WHERE NOT processed AND created_on < $1
        ORDER BY created_on ASC, id ASC
        "#,
    )
    .bind(before)
    .fetch_all(conn)
    .await?;

    convert(rows)
}

pub async fn get_open(conn: &mut PgConnection) -> LedgerResult<Vec<Leftover>> {
    let rows = sqlx::query_as::<_, LeftoverRow>(
        "SELECT * FROM leftovers WHERE NOT processed ORDER BY created_on ASC, id ASC",
    )
    .fetch_all(conn)
    .await?;

    convert(rows)
}

pub async fn insert_draw(
    conn: &mut PgConnection,
    leftover_id: i64,
    scope_start: NaiveDate,
    scope_end: NaiveDate,
    amount: Decimal,
) -> LedgerResult<()> {
    sqlx::query(
        r#"
        INSERT INTO leftover_draws (leftover_id, scope_start, scope_end, amount)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(leftover_id)
    .bind(scope_start)
    .bind(scope_end)
    .bind(amount)
    .execute(conn)
    .await?;

    Ok(())
}

/// Give back everything drawn by runs whose scope lies inside `start..=end`
/// and forget those draws.
pub async fn restore_draws_within(
    conn: &mut PgConnection,
    start: NaiveDate,
    end: NaiveDate,
) -> LedgerResult<u64> {
    let restored = sqlx::query(
        r#"
        UPDATE leftovers l
        SET amount = l.amount + d.total, processed = FALSE
        FROM (
            SELECT leftover_id, SUM(amount) AS total
            FROM leftover_draws
            WHERE scope_start >= $1 AND scope_end <= $2
            GROUP BY leftover_id
        ) d
        WHERE l.id = d.leftover_id
        "#,
    )
    .bind(start)
    .bind(end)
    .execute(&mut *conn)
    .await?;

    sqlx::query("DELETE FROM leftover_draws WHERE scope_start >= $1 AND scope_end <= $2")
        .bind(start)
        .bind(end)
        .execute(conn)
        .await?;

    Ok(restored.rows_affected())
}

/// Lowest leftover id whose draws, carryover profits or recording run
/// overlap `start..=end` without lying inside it.
pub async fn find_straddling_run(
    conn: &mut PgConnection,
    start: NaiveDate,
    end: NaiveDate,
) -> LedgerResult<Option<i64>> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT leftover_id FROM (
            SELECT leftover_id, scope_start, scope_end FROM leftover_draws
            UNION ALL
            SELECT leftover_id, scope_start, scope_end FROM carryover_profits
            UNION ALL
            SELECT id AS leftover_id, scope_start, scope_end FROM leftovers
        ) runs
        WHERE scope_start <= $2 AND scope_end >= $1
          AND NOT (scope_start >= $1 AND scope_end <= $2)
        ORDER BY leftover_id ASC
        LIMIT 1
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_optional(conn)
    .await?;

    Ok(id)
}

/// First leftover recorded by a run inside `start..=end` that a later run
/// has already drawn from.
pub async fn find_drawn_recorded_within(
    conn: &mut PgConnection,
    start: NaiveDate,
    end: NaiveDate,
) -> LedgerResult<Option<i64>> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT id FROM leftovers
        WHERE scope_start >= $1 AND scope_end <= $2
          AND (processed OR amount < original_amount)
        ORDER BY created_on ASC, id ASC
        LIMIT 1
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_optional(conn)
    .await?;

    Ok(id)
}

pub async fn delete_recorded_within(
    conn: &mut PgConnection,
    start: NaiveDate,
    end: NaiveDate,
) -> LedgerResult<u64> {
    let result =
        sqlx::query("DELETE FROM leftovers WHERE scope_start >= $1 AND scope_end <= $2")
            .bind(start)
            .bind(end)
            .execute(conn)
            .await?;

    Ok(result.rows_affected())
}

/// Forget every leftover together with its draws.
pub async fn delete_all(conn: &mut PgConnection) -> LedgerResult<u64> {
    sqlx::query("DELETE FROM leftover_draws").execute(&mut *conn).await?;
    let result = sqlx::query("DELETE FROM leftovers").execute(conn).await?;

    Ok(result.rows_affected())
}
