use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::errors::LedgerResult;
use crate::models::{NewAdjustment, NewTrade, Trade, TradeKind, TradeUpdate};

/// Insert a BUY or SELL with its already validated rate.
pub async fn insert_trade(
    conn: &mut PgConnection,
    trade: &NewTrade,
    rate: Decimal,
) -> LedgerResult<Trade> {
    let row = sqlx::query_as::<_, Trade>(
        r#"
        INSERT INTO trades (kind, pair, thb_amount, mmk_amount, rate, traded_at, customer, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(trade.kind.as_str())
    .bind(trade.pair.to_string())
    .bind(trade.thb_amount)
    .bind(trade.mmk_amount)
    .bind(rate)
    .bind(trade.traded_at)
    .bind(&trade.customer)
    .bind(&trade.notes)
    .fetch_one(conn)
    .await?;

    Ok(row)
}

/// Insert a manual adjustment. Its profit is the stated amount and is never
/// rewritten by matching.
pub async fn insert_adjustment(
    conn: &mut PgConnection,
    adjustment: &NewAdjustment,
) -> LedgerResult<Trade> {
    let row = sqlx::query_as::<_, Trade>(
        r#"
        INSERT INTO trades (kind, thb_amount, traded_at, notes, profit)
        VALUES ($1, $2, $3, $4, $2)
        RETURNING *
        "#,
    )
    .bind(TradeKind::Adjustment.as_str())
    .bind(adjustment.amount)
    .bind(adjustment.traded_at)
    .bind(&adjustment.notes)
    .fetch_one(conn)
    .await?;

    Ok(row)
}

pub async fn get_trade(conn: &mut PgConnection, id: Uuid) -> LedgerResult<Option<Trade>> {
    let row = sqlx::query_as::<_, Trade>("SELECT * FROM trades WHERE id = $1")
        .bind(id)
        .fetch_optional(conn)
        .await?;

    Ok(row)
}

/// Every trade, rows without a timestamp last.
pub async fn get_all_trades(conn: &mut PgConnection) -> LedgerResult<Vec<Trade>> {
    let rows = sqlx::query_as::<_, Trade>(
        "SELECT * FROM trades ORDER BY traded_at ASC NULLS LAST, seq ASC",
    )
    .fetch_all(conn)
    .await?;

    Ok(rows)
}

/// Trades with `from <= traded_at < to`.
pub async fn get_trades_between(
    conn: &mut PgConnection,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> LedgerResult<Vec<Trade>> {
    let rows = sqlx::query_as::<_, Trade>(
        r#"
        SELECT * FROM trades
        WHERE traded_at >= $1 AND traded_at < $2
        ORDER BY traded_at ASC, seq ASC
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_all(conn)
    .await?;

    Ok(rows)
}

/// Same as `get_trades_between`, locking the rows for the rest of the transaction.
pub async fn lock_trades_between(
    conn: &mut PgConnection,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> LedgerResult<Vec<Trade>> {
    let rows = sqlx::query_as::<_, Trade>(
        r#"
        SELECT * FROM trades
        WHERE traded_at >= $1 AND traded_at < $2
        ORDER BY traded_at ASC, seq ASC
        FOR UPDATE
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_all(conn)
    .await?;

    Ok(rows)
}

pub async fn lock_all_trades(conn: &mut PgConnection) -> LedgerResult<Vec<Trade>> {
    let rows = sqlx::query_as::<_, Trade>(
        "SELECT * FROM trades ORDER BY traded_at ASC NULLS LAST, seq ASC FOR UPDATE",
    )
    .fetch_all(conn)
    .await?;

    Ok(rows)
}

/// Write back the derived fields of one trade. Returns false if the row is gone.
pub async fn apply_update(conn: &mut PgConnection, update: &TradeUpdate) -> LedgerResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE trades
        SET remaining_amount = $2, profit = $3, match_link = $4
        WHERE id = $1 AND kind <> 'ADJUSTMENT'
        "#,
    )
    .bind(update.id)
    .bind(update.remaining_amount)
    .bind(update.profit)
    .bind(update.match_link)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}
