use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{Currency, CurrencyPair, Diagnostic, DiagnosticKind, Leftover, Trade, TradeKind};

/// A BUY or SELL that passed validation and can enter the queues.
#[derive(Debug, Clone, PartialEq)]
pub struct Matchable {
    pub id: Uuid,
    pub seq: i64,
    pub kind: TradeKind,
    /// Principal in MMK.
    pub amount: Decimal,
    pub rate: Decimal,
    pub traded_at: DateTime<Utc>,
    pub local_date: NaiveDate,
}

/// An open leftover fed back into a later run.
#[derive(Debug, Clone, PartialEq)]
pub struct Lot {
    pub leftover_id: i64,
    pub currency: Currency,
    pub amount: Decimal,
    pub rate: Decimal,
    pub created_on: NaiveDate,
}

#[derive(Debug, Default)]
pub struct Validated {
    /// Sorted by `(traded_at, seq)`.
    pub trades: Vec<Matchable>,
    /// BUY/SELL rows left out of matching.
    pub excluded: Vec<Uuid>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Split loaded rows into matchable trades and diagnostics. Adjustments are
/// neither matched nor reported.
pub fn validate_trades(rows: &[Trade], pair: CurrencyPair, offset: FixedOffset) -> Validated {
    let mut out = Validated::default();

    for row in rows {
        match check_trade(row, pair, offset) {
            Ok(Some(trade)) => out.trades.push(trade),
            Ok(None) => {}
            Err(diagnostic) => {
                tracing::warn!(
                    trade_id = %row.id,
                    kind = ?diagnostic.kind,
                    "Trade excluded from matching: {}",
                    diagnostic.message
                );
                out.excluded.push(row.id);
                out.diagnostics.push(diagnostic);
            }
        }
    }

    out.trades.sort_by(|a, b| a.traded_at.cmp(&b.traded_at).then(a.seq.cmp(&b.seq)));
    out
}

fn check_trade(
    row: &Trade,
    pair: CurrencyPair,
    offset: FixedOffset,
) -> Result<Option<Matchable>, Diagnostic> {
    let malformed = |reason: String| Diagnostic {
        kind: DiagnosticKind::MalformedTrade,
        trade_id: Some(row.id),
        leftover_id: None,
        message: reason,
    };

    let kind = match row.kind() {
        Some(TradeKind::Adjustment) => return Ok(None),
        Some(kind) => kind,
        None => return Err(malformed(format!("unknown trade kind {:?}", row.kind))),
    };

    if !pair.matches(&row.pair) {
        return Err(Diagnostic {
            kind: DiagnosticKind::UnsupportedPair,
            trade_id: Some(row.id),
            leftover_id: None,
            message: format!("pair {} is not {pair}", row.pair),
        });
    }

    let amount = row
        .mmk_amount
        .ok_or_else(|| malformed("missing MMK amount".into()))?;
    if amount <= Decimal::ZERO {
        return Err(malformed(format!("MMK amount must be positive, got {amount}")));
    }
    let rate = row.rate.ok_or_else(|| malformed("missing rate".into()))?;
    let traded_at = row
        .traded_at
        .ok_or_else(|| malformed("missing timestamp".into()))?;

    if rate <= Decimal::ZERO {
        return Err(Diagnostic {
            kind: DiagnosticKind::InvalidRate,
            trade_id: Some(row.id),
            leftover_id: None,
            message: format!("rate must be positive, got {rate}"),
        });
    }

    Ok(Some(Matchable {
        id: row.id,
        seq: row.seq,
        kind,
        amount,
        rate,
        traded_at,
        local_date: traded_at.with_timezone(&offset).date_naive(),
    }))
}

/// Turn open leftovers into lots, oldest first; unusable ones become diagnostics.
pub fn validate_lots(leftovers: &[Leftover]) -> (Vec<Lot>, Vec<Diagnostic>) {
    let mut lots = Vec::new();
    let mut diagnostics = Vec::new();

    for leftover in leftovers.iter().filter(|l| !l.processed) {
        if leftover.rate <= Decimal::ZERO || leftover.amount <= Decimal::ZERO {
            tracing::warn!(
                leftover_id = leftover.id,
                rate = %leftover.rate,
                amount = %leftover.amount,
                "Leftover excluded from carryover"
            );
            diagnostics.push(Diagnostic {
                kind: DiagnosticKind::InvalidLeftover,
                trade_id: None,
                leftover_id: Some(leftover.id),
                message: format!(
                    "leftover needs positive amount and rate, got {} at {}",
                    leftover.amount, leftover.rate
                ),
            });
            continue;
        }
        lots.push(Lot {
            leftover_id: leftover.id,
            currency: leftover.currency,
            amount: leftover.amount,
            rate: leftover.rate,
            created_on: leftover.created_on,
        });
    }

    lots.sort_by(|a, b| a.created_on.cmp(&b.created_on).then(a.leftover_id.cmp(&b.leftover_id)));
    (lots, diagnostics)
}
