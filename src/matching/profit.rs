use rust_decimal::{Decimal, RoundingStrategy};

use crate::models::{MatchEvent, RateSpread};

/// Round a THB amount to satang, half away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// THB value of an MMK amount at a MMK-per-THB rate.
pub fn thb_value(mmk: Decimal, rate: Decimal) -> Option<Decimal> {
    if rate <= Decimal::ZERO {
        return None;
    }
    mmk.checked_div(rate)
}

/// Profit in THB realised by matching `matched` MMK bought at `buy_rate`
/// against the same MMK sold at `sell_rate`:
/// `matched / sell_rate - matched / buy_rate`, rounded once.
///
/// Returns `None` when either rate is not positive.
pub fn match_profit(matched: Decimal, buy_rate: Decimal, sell_rate: Decimal) -> Option<Decimal> {
    let thb_sell = thb_value(matched, sell_rate)?;
    let thb_buy = thb_value(matched, buy_rate)?;
    thb_sell.checked_sub(thb_buy).map(round_money)
}

/// Spread statistics over a run's match events; `None` when nothing matched.
pub fn spread_stats(events: &[MatchEvent]) -> Option<RateSpread> {
    if events.is_empty() {
        return None;
    }

    let spreads: Vec<Decimal> = events.iter().map(|e| e.buy_rate - e.sell_rate).collect();
    let n = Decimal::from(spreads.len() as i64);
    let average = (spreads.iter().copied().sum::<Decimal>() / n)
        .round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero);

    Some(RateSpread {
        samples: spreads.len(),
        average,
        minimum: spreads.iter().copied().min().unwrap_or_default(),
        maximum: spreads.iter().copied().max().unwrap_or_default(),
    })
}
