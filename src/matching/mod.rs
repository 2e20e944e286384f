//! FIFO matching of BUY/SELL trades and profit attribution.
//!
//! Everything in here is pure computation over already loaded rows; loading
//! and persisting happen in `services::reconciler`.

pub mod engine;
pub mod profit;
pub mod validate;

pub use engine::{run, LotClose, MatchOutcome};
pub use profit::{match_profit, round_money};
pub use validate::{validate_lots, validate_trades, Lot, Matchable, Validated};

use chrono::FixedOffset;

use crate::models::{CurrencyPair, Leftover, Trade};

/// Validate `rows` and `leftovers`, then run the engine. Diagnostics from
/// validation come first in the outcome.
pub fn rederive(
    rows: &[Trade],
    leftovers: &[Leftover],
    pair: CurrencyPair,
    offset: FixedOffset,
) -> (MatchOutcome, Validated) {
    let validated = validate_trades(rows, pair, offset);
    let (lots, lot_diagnostics) = validate_lots(leftovers);

    let mut outcome = run(&validated.trades, &lots);

    let mut diagnostics = validated.diagnostics.clone();
    diagnostics.extend(lot_diagnostics);
    diagnostics.append(&mut outcome.diagnostics);
    outcome.diagnostics = diagnostics;

    (outcome, validated)
}
