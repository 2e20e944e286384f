use chrono::NaiveDate;
use sqlx::PgConnection;

use crate::errors::LedgerResult;
use crate::models::CarryoverProfit;

pub async fn insert_profit(conn: &mut PgConnection, profit: &CarryoverProfit) -> LedgerResult<()> {
    sqlx::query(
        r#"
        INSERT INTO carryover_profits
            (leftover_id, trade_id, recognized_on, matched_amount, profit, scope_start, scope_end)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(profit.leftover_id)
    .bind(profit.trade_id)
    .bind(profit.recognized_on)
    .bind(profit.matched_amount)
    .bind(profit.profit)
    .bind(profit.scope_start)
    .bind(profit.scope_end)
    .execute(conn)
    .await?;

    Ok(())
}

/// Drop the profits recorded by runs whose scope lies inside `start..=end`.
pub async fn delete_within(
    conn: &mut PgConnection,
    start: NaiveDate,
    end: NaiveDate,
) -> LedgerResult<u64> {
    let result = sqlx::query(
        "DELETE FROM carryover_profits WHERE scope_start >= $1 AND scope_end <= $2",
    )
    .bind(start)
    .bind(end)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

pub async fn delete_all(conn: &mut PgConnection) -> LedgerResult<u64> {
    let result = sqlx::query("DELETE FROM carryover_profits").execute(conn).await?;

    Ok(result.rows_affected())
}

pub async fn get_recognized_between(
    conn: &mut PgConnection,
    start: NaiveDate,
    end: NaiveDate,
) -> LedgerResult<Vec<CarryoverProfit>> {
    let rows = sqlx::query_as::<_, CarryoverProfit>(
        r#"
        SELECT leftover_id, trade_id, recognized_on, matched_amount, profit, scope_start, scope_end
        FROM carryover_profits
        WHERE recognized_on >= $1 AND recognized_on <= $2
        ORDER BY recognized_on ASC, id ASC
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_all(conn)
    .await?;

    Ok(rows)
}
