use std::collections::VecDeque;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::profit::{match_profit, round_money, spread_stats, thb_value};
use super::validate::{Lot, Matchable};
use crate::models::{
    Currency, Diagnostic, DiagnosticKind, LotDraw, MatchEvent, Participant, RateSpread, TradeKind,
    TradeOutcome, Unresolved,
};

/// Profit booked on a carried lot because it was closed in this run.
#[derive(Debug, Clone, PartialEq)]
pub struct LotClose {
    pub leftover_id: i64,
    pub closed_by: Uuid,
    pub recognized_on: NaiveDate,
    pub matched_amount: Decimal,
    pub profit: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    /// One entry per input trade, in matching order.
    pub per_trade: Vec<TradeOutcome>,
    pub unresolved: Vec<Unresolved>,
    pub matches: Vec<MatchEvent>,
    pub lot_draws: Vec<LotDraw>,
    pub lot_closes: Vec<LotClose>,
    pub spread: Option<RateSpread>,
    pub diagnostics: Vec<Diagnostic>,
}

impl MatchOutcome {
    /// Profit attributed to trades of this run.
    pub fn trade_profit(&self) -> Decimal {
        self.per_trade.iter().map(|t| t.profit).sum()
    }

    /// Profit attributed to carried lots closed in this run.
    pub fn lot_profit(&self) -> Decimal {
        self.lot_closes.iter().map(|c| c.profit).sum()
    }
}

/// Queue a trade waits in. Only BUY and SELL have one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Buy,
    Sell,
}

impl Side {
    fn of(kind: TradeKind) -> Option<Side> {
        match kind {
            TradeKind::Buy => Some(Side::Buy),
            TradeKind::Sell => Some(Side::Sell),
            TradeKind::Adjustment => None,
        }
    }

    fn holding(currency: Currency) -> Side {
        match currency {
            Currency::Mmk => Side::Buy,
            Currency::Thb => Side::Sell,
        }
    }

    fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Trade(usize),
    Lot(usize),
}

struct TradeState {
    remaining: Decimal,
    profit: Decimal,
    link: Option<Uuid>,
}

/// Working state of one matching pass. Rebuilt from scratch on every run.
struct Book<'a> {
    trades: &'a [Matchable],
    lots: &'a [Lot],
    state: Vec<TradeState>,
    lot_remaining: Vec<Decimal>,
    pending_buy: VecDeque<Slot>,
    pending_sell: VecDeque<Slot>,
    out: MatchOutcome,
}

impl<'a> Book<'a> {
    fn new(trades: &'a [Matchable], lots: &'a [Lot]) -> Self {
        let state = trades
            .iter()
            .map(|t| TradeState {
                remaining: t.amount,
                profit: Decimal::ZERO,
                link: None,
            })
            .collect();

        let mut book = Self {
            trades,
            lots,
            state,
            lot_remaining: lots.iter().map(|l| l.amount).collect(),
            pending_buy: VecDeque::new(),
            pending_sell: VecDeque::new(),
            out: MatchOutcome::default(),
        };

        // Lots predate every trade in the run, so they sit at the head.
        for (i, lot) in lots.iter().enumerate() {
            book.queue_mut(Side::holding(lot.currency)).push_back(Slot::Lot(i));
        }
        book
    }

    fn queue_mut(&mut self, side: Side) -> &mut VecDeque<Slot> {
        match side {
            Side::Buy => &mut self.pending_buy,
            Side::Sell => &mut self.pending_sell,
        }
    }

    fn remaining(&self, slot: Slot) -> Decimal {
        match slot {
            Slot::Trade(i) => self.state[i].remaining,
            Slot::Lot(i) => self.lot_remaining[i],
        }
    }

    fn rate(&self, slot: Slot) -> Decimal {
        match slot {
            Slot::Trade(i) => self.trades[i].rate,
            Slot::Lot(i) => self.lots[i].rate,
        }
    }

    fn participant(&self, slot: Slot) -> Participant {
        match slot {
            Slot::Trade(i) => Participant::Trade(self.trades[i].id),
            Slot::Lot(i) => Participant::Lot(self.lots[i].leftover_id),
        }
    }

    fn consume(&mut self, slot: Slot, amount: Decimal) {
        match slot {
            Slot::Trade(i) => self.state[i].remaining -= amount,
            Slot::Lot(i) => self.lot_remaining[i] -= amount,
        }
    }

    fn process(&mut self, i: usize) {
        // Validation keeps adjustments out; anything without a side stays unmatched.
        let Some(side) = Side::of(self.trades[i].kind) else {
            return;
        };
        let opposite = side.opposite();

        while self.state[i].remaining > Decimal::ZERO {
            let Some(&head) = self.queue_mut(opposite).front() else {
                break;
            };
            self.match_step(i, head, side);
        }

        if self.state[i].remaining > Decimal::ZERO {
            self.queue_mut(side).push_back(Slot::Trade(i));
        }
    }

    fn match_step(&mut self, i: usize, head: Slot, side: Side) {
        let head_side = side.opposite();
        let trades = self.trades;
        let incoming = &trades[i];
        let head_remaining = self.remaining(head);
        let incoming_remaining = self.state[i].remaining;
        let matched = head_remaining.min(incoming_remaining);

        let (buy, sell, buy_rate, sell_rate) = match side {
            Side::Buy => (
                Participant::Trade(incoming.id),
                self.participant(head),
                incoming.rate,
                self.rate(head),
            ),
            Side::Sell => (
                self.participant(head),
                Participant::Trade(incoming.id),
                self.rate(head),
                incoming.rate,
            ),
        };

        let Some(profit) = match_profit(matched, buy_rate, sell_rate) else {
            // Rates are validated before the run; a bad one here is dropped
            // from the queue so the rest of the run can complete.
            let head_participant = self.participant(head);
            tracing::warn!(
                incoming = %incoming.id,
                head = ?head_participant,
                "Skipping match with unusable rate"
            );
            self.out.diagnostics.push(Diagnostic {
                kind: DiagnosticKind::InvalidRate,
                trade_id: match head_participant {
                    Participant::Trade(id) => Some(id),
                    Participant::Lot(_) => Some(incoming.id),
                },
                leftover_id: match head_participant {
                    Participant::Lot(id) => Some(id),
                    Participant::Trade(_) => None,
                },
                message: format!("cannot match at rates {buy_rate}/{sell_rate}"),
            });
            self.queue_mut(head_side).pop_front();
            return;
        };

        let incoming_closes = matched == incoming_remaining;
        let head_closes = matched == head_remaining;

        self.consume(Slot::Trade(i), matched);
        self.consume(head, matched);

        // At most one side closes without the other; a simultaneous close
        // credits the incoming trade.
        let attributed_to = if incoming_closes {
            let link = match head {
                Slot::Trade(j) => Some(trades[j].id),
                Slot::Lot(_) => None,
            };
            let state = &mut self.state[i];
            state.profit = profit;
            state.link = link;
            Participant::Trade(incoming.id)
        } else {
            match head {
                Slot::Trade(j) => {
                    let state = &mut self.state[j];
                    state.profit = profit;
                    state.link = Some(incoming.id);
                }
                Slot::Lot(k) => self.out.lot_closes.push(LotClose {
                    leftover_id: self.lots[k].leftover_id,
                    closed_by: incoming.id,
                    recognized_on: incoming.local_date,
                    matched_amount: matched,
                    profit,
                }),
            }
            self.participant(head)
        };

        if head_closes {
            self.queue_mut(head_side).pop_front();
        }

        tracing::debug!(
            buy = ?buy,
            sell = ?sell,
            matched = %matched,
            profit = %profit,
            "Matched"
        );

        self.out.matches.push(MatchEvent {
            buy,
            sell,
            matched_amount: matched,
            buy_rate,
            sell_rate,
            thb_buy: thb_value(matched, buy_rate).map(round_money).unwrap_or_default(),
            thb_sell: thb_value(matched, sell_rate).map(round_money).unwrap_or_default(),
            profit,
            attributed_to,
        });
    }

    fn finish(mut self) -> MatchOutcome {
        for (trade, state) in self.trades.iter().zip(&self.state) {
            self.out.per_trade.push(TradeOutcome {
                id: trade.id,
                kind: trade.kind,
                profit: state.profit,
                remaining_amount: state.remaining,
                match_link: state.link,
            });

            if state.remaining > Decimal::ZERO {
                let Some(currency) = trade.kind.held_currency() else {
                    continue;
                };
                self.out.unresolved.push(Unresolved {
                    id: trade.id,
                    kind: trade.kind,
                    remaining_amount: state.remaining,
                    rate: trade.rate,
                    currency,
                    thb_equivalent: thb_value(state.remaining, trade.rate)
                        .map(round_money)
                        .unwrap_or_default(),
                    local_date: trade.local_date,
                });
            }
        }

        for (lot, remaining) in self.lots.iter().zip(&self.lot_remaining) {
            let drawn = lot.amount - *remaining;
            if drawn > Decimal::ZERO {
                self.out.lot_draws.push(LotDraw {
                    leftover_id: lot.leftover_id,
                    amount: drawn,
                    rate: lot.rate,
                });
            }
        }

        self.out.spread = spread_stats(&self.out.matches);
        self.out
    }
}

/// Re-derive remaining amounts, profit and match links for `trades`
/// (already validated and sorted) with FIFO two-queue matching.
///
/// `lots` are open leftovers of earlier runs, oldest first; they are matched
/// before any trade of the same side and never act as the incoming side.
/// The function is pure: the same input always yields the same outcome.
pub fn run(trades: &[Matchable], lots: &[Lot]) -> MatchOutcome {
    let mut book = Book::new(trades, lots);
    for i in 0..trades.len() {
        book.process(i);
    }
    book.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn trade(kind: TradeKind, mmk: Decimal, rate: Decimal, minute: i64) -> Matchable {
        let traded_at = Utc.with_ymd_and_hms(2025, 4, 1, 3, 0, 0).unwrap() + Duration::minutes(minute);
        Matchable {
            id: Uuid::new_v4(),
            seq: minute,
            kind,
            amount: mmk,
            rate,
            traded_at,
            local_date: traded_at.date_naive(),
        }
    }

    fn outcome_of(out: &MatchOutcome, id: Uuid) -> &TradeOutcome {
        out.per_trade.iter().find(|t| t.id == id).unwrap()
    }

    #[test]
    fn test_single_match_profit_to_incoming_on_simultaneous_close() {
        let buy = trade(TradeKind::Buy, dec!(1000000), dec!(130), 0);
        let sell = trade(TradeKind::Sell, dec!(1000000), dec!(126), 1);
        let out = run(&[buy.clone(), sell.clone()], &[]);

        assert_eq!(out.matches.len(), 1);
        assert_eq!(out.matches[0].profit, dec!(244.20));
        assert_eq!(out.matches[0].thb_buy, dec!(7692.31));
        assert_eq!(out.matches[0].thb_sell, dec!(7936.51));

        let sell_out = outcome_of(&out, sell.id);
        assert_eq!(sell_out.profit, dec!(244.20));
        assert_eq!(sell_out.match_link, Some(buy.id));
        let buy_out = outcome_of(&out, buy.id);
        assert_eq!(buy_out.profit, Decimal::ZERO);
        assert_eq!(buy_out.remaining_amount, Decimal::ZERO);
        assert_eq!(buy_out.match_link, None);
        assert!(out.unresolved.is_empty());
    }

    #[test]
    fn test_partial_fill_then_close() {
        let buy = trade(TradeKind::Buy, dec!(2000000), dec!(128), 0);
        let sell1 = trade(TradeKind::Sell, dec!(1000000), dec!(130), 1);
        let sell2 = trade(TradeKind::Sell, dec!(1000000), dec!(132), 2);
        let out = run(&[buy.clone(), sell1.clone(), sell2.clone()], &[]);

        assert_eq!(outcome_of(&out, sell1.id).profit, dec!(-120.19));
        assert_eq!(outcome_of(&out, sell2.id).profit, dec!(-236.74));
        let buy_out = outcome_of(&out, buy.id);
        assert_eq!(buy_out.remaining_amount, Decimal::ZERO);
        assert_eq!(buy_out.profit, Decimal::ZERO);
        assert_eq!(out.trade_profit(), dec!(-356.93));
        assert_eq!(out.matches.iter().map(|m| m.profit).sum::<Decimal>(), dec!(-356.93));
    }

    #[test]
    fn test_head_closing_takes_profit_and_links_forward() {
        let sell = trade(TradeKind::Sell, dec!(500000), dec!(126), 0);
        let buy = trade(TradeKind::Buy, dec!(800000), dec!(130), 1);
        let out = run(&[sell.clone(), buy.clone()], &[]);

        let sell_out = outcome_of(&out, sell.id);
        assert_eq!(sell_out.profit, match_profit(dec!(500000), dec!(130), dec!(126)).unwrap());
        assert_eq!(sell_out.match_link, Some(buy.id));

        let buy_out = outcome_of(&out, buy.id);
        assert_eq!(buy_out.profit, Decimal::ZERO);
        assert_eq!(buy_out.remaining_amount, dec!(300000));
        assert_eq!(out.unresolved.len(), 1);
        assert_eq!(out.unresolved[0].id, buy.id);
        assert_eq!(out.unresolved[0].currency, Currency::Mmk);
        assert_eq!(out.unresolved[0].thb_equivalent, dec!(2307.69));
    }

    #[test]
    fn test_fifo_order_across_queue() {
        let buy = trade(TradeKind::Buy, dec!(3000000), dec!(130), 0);
        let b = trade(TradeKind::Sell, dec!(1000000), dec!(126), 1);
        let c = trade(TradeKind::Sell, dec!(1000000), dec!(127), 2);
        let out = run(&[buy.clone(), b.clone(), c.clone()], &[]);

        assert_eq!(out.matches[0].sell, Participant::Trade(b.id));
        assert_eq!(out.matches[1].sell, Participant::Trade(c.id));
        assert_eq!(outcome_of(&out, buy.id).remaining_amount, dec!(1000000));
    }

    #[test]
    fn test_incoming_drains_several_heads() {
        let s1 = trade(TradeKind::Sell, dec!(100000), dec!(126), 0);
        let s2 = trade(TradeKind::Sell, dec!(200000), dec!(127), 1);
        let buy = trade(TradeKind::Buy, dec!(250000), dec!(130), 2);
        let out = run(&[s1.clone(), s2.clone(), buy.clone()], &[]);

        // s1 closes as head, buy closes against the partly used s2
        assert_eq!(outcome_of(&out, s1.id).match_link, Some(buy.id));
        assert_eq!(outcome_of(&out, buy.id).match_link, Some(s2.id));
        assert_eq!(outcome_of(&out, s2.id).remaining_amount, dec!(50000));
        assert_eq!(outcome_of(&out, s2.id).profit, Decimal::ZERO);
        assert_eq!(out.trade_profit(), out.matches.iter().map(|m| m.profit).sum::<Decimal>());
    }

    #[test]
    fn test_same_side_trades_queue_up() {
        let b1 = trade(TradeKind::Buy, dec!(100), dec!(130), 0);
        let b2 = trade(TradeKind::Buy, dec!(100), dec!(131), 1);
        let out = run(&[b1, b2], &[]);
        assert!(out.matches.is_empty());
        assert_eq!(out.unresolved.len(), 2);
        assert!(out.spread.is_none());
    }

    #[test]
    fn test_rerun_is_identical() {
        let trades = vec![
            trade(TradeKind::Sell, dec!(1560000), dec!(128.53), 0),
            trade(TradeKind::Buy, dec!(1000000), dec!(131.23), 1),
            trade(TradeKind::Buy, dec!(500000), dec!(131.41), 2),
            trade(TradeKind::Sell, dec!(2000000), dec!(129.03), 3),
            trade(TradeKind::Buy, dec!(2628200), dec!(131.41), 4),
        ];
        let first = run(&trades, &[]);
        let second = run(&trades, &[]);
        assert_eq!(first.per_trade, second.per_trade);
        assert_eq!(first.matches, second.matches);
        assert_eq!(first.unresolved, second.unresolved);
    }

    #[test]
    fn test_lot_closed_by_incoming_matches_same_day_result() {
        let buy = trade(TradeKind::Buy, dec!(500000), dec!(130), 0);
        let sell = trade(TradeKind::Sell, dec!(500000), dec!(126), 60 * 24);

        let same_run = run(&[buy.clone(), sell.clone()], &[]);

        let lot = Lot {
            leftover_id: 7,
            currency: Currency::Mmk,
            amount: dec!(500000),
            rate: dec!(130),
            created_on: buy.local_date,
        };
        let carried = run(&[sell.clone()], &[lot]);

        assert_eq!(
            outcome_of(&carried, sell.id).profit,
            outcome_of(&same_run, sell.id).profit
        );
        assert_eq!(carried.lot_draws, vec![LotDraw { leftover_id: 7, amount: dec!(500000), rate: dec!(130) }]);
        assert!(carried.lot_closes.is_empty());
        assert_eq!(outcome_of(&carried, sell.id).match_link, None);
    }

    #[test]
    fn test_lot_closing_as_head_books_carryover_profit() {
        let lot = Lot {
            leftover_id: 3,
            currency: Currency::Thb,
            amount: dec!(200000),
            rate: dec!(126),
            created_on: NaiveDate::from_ymd_opt(2025, 3, 31).unwrap(),
        };
        let buy = trade(TradeKind::Buy, dec!(300000), dec!(130), 0);
        let out = run(&[buy.clone()], &[lot]);

        assert_eq!(out.lot_closes.len(), 1);
        assert_eq!(out.lot_closes[0].closed_by, buy.id);
        assert_eq!(out.lot_closes[0].profit, match_profit(dec!(200000), dec!(130), dec!(126)).unwrap());
        assert_eq!(out.lot_profit() + out.trade_profit(), out.matches.iter().map(|m| m.profit).sum::<Decimal>());
        assert_eq!(outcome_of(&out, buy.id).remaining_amount, dec!(100000));
    }

    #[test]
    fn test_adjustment_never_enters_a_queue() {
        let buy = trade(TradeKind::Buy, dec!(100000), dec!(130), 0);
        let stray = trade(TradeKind::Adjustment, dec!(100000), dec!(126), 1);
        let sell = trade(TradeKind::Sell, dec!(100000), dec!(126), 2);
        let out = run(&[buy.clone(), stray.clone(), sell.clone()], &[]);

        assert_eq!(out.matches.len(), 1);
        assert_eq!(out.matches[0].buy, Participant::Trade(buy.id));
        assert_eq!(out.matches[0].sell, Participant::Trade(sell.id));
        let stray_out = outcome_of(&out, stray.id);
        assert_eq!(stray_out.profit, Decimal::ZERO);
        assert_eq!(stray_out.remaining_amount, dec!(100000));
        assert!(out.unresolved.is_empty());
    }

    #[test]
    fn test_remaining_never_negative() {
        let trades = vec![
            trade(TradeKind::Buy, dec!(333333.33), dec!(130), 0),
            trade(TradeKind::Sell, dec!(100000.01), dec!(127), 1),
            trade(TradeKind::Sell, dec!(250000), dec!(128), 2),
            trade(TradeKind::Buy, dec!(10), dec!(131), 3),
            trade(TradeKind::Sell, dec!(0.02), dec!(129), 4),
        ];
        let out = run(&trades, &[]);
        for t in &out.per_trade {
            assert!(t.remaining_amount >= Decimal::ZERO);
            let original = trades.iter().find(|m| m.id == t.id).unwrap().amount;
            assert!(t.remaining_amount <= original);
        }
    }
}
