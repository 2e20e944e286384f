mod common;

use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use common::{at, buy, day, memory_store, raw_row, reconciler, sell};
use fxledger::errors::LedgerError;
use fxledger::matching::round_money;
use fxledger::models::{DiagnosticKind, NewAdjustment, Participant, Scope};
use fxledger::services::run_lock::RunLocks;
use fxledger::store::LedgerStore;

// ---------------------------------------------------------------------------
// Worked examples
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_single_buy_sell_pair() {
    let store = memory_store();
    let b = buy(&store, dec!(1000000), dec!(130), at(10, 9, 0)).await;
    let s = sell(&store, dec!(1000000), dec!(126), at(10, 11, 0)).await;

    let run = reconciler(store.clone()).run_matching(Scope::All).await.unwrap();
    assert_eq!(run.total_profit, dec!(244.20));

    let b = store.get_trade(b.id).await.unwrap();
    let s = store.get_trade(s.id).await.unwrap();
    // Both close at once; the incoming SELL is credited.
    assert_eq!(s.profit, Some(dec!(244.20)));
    assert_eq!(s.match_link, Some(b.id));
    assert_eq!(s.remaining_amount, Some(Decimal::ZERO));
    assert_eq!(b.profit, Some(Decimal::ZERO));
    assert_eq!(b.remaining_amount, Some(Decimal::ZERO));
    assert_eq!(b.match_link, None);
}

#[tokio::test]
async fn test_buy_split_across_two_sells() {
    let store = memory_store();
    let b = buy(&store, dec!(2000000), dec!(128), at(10, 9, 0)).await;
    let s1 = sell(&store, dec!(1000000), dec!(130), at(10, 10, 0)).await;
    let s2 = sell(&store, dec!(1000000), dec!(132), at(10, 11, 0)).await;

    let run = reconciler(store.clone()).run_matching(Scope::All).await.unwrap();

    let s1 = store.get_trade(s1.id).await.unwrap();
    let s2 = store.get_trade(s2.id).await.unwrap();
    let b = store.get_trade(b.id).await.unwrap();

    assert_eq!(s1.profit, Some(dec!(-120.19)));
    assert_eq!(s2.profit, Some(dec!(-236.74)));
    assert_eq!(run.total_profit, dec!(-356.93));
    assert_eq!(b.remaining_amount, Some(Decimal::ZERO));
    assert_eq!(run.matches.len(), 2);
    assert!(run.unresolved.is_empty());
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let store = memory_store();
    buy(&store, dec!(3000000), dec!(128.5), at(10, 9, 0)).await;
    sell(&store, dec!(1200000), dec!(130), at(10, 9, 30)).await;
    buy(&store, dec!(500000), dec!(129), at(10, 10, 0)).await;
    sell(&store, dec!(2500000), dec!(127.25), at(10, 12, 0)).await;

    let reconciler = reconciler(store.clone());
    let first = reconciler.run_matching(Scope::All).await.unwrap();
    let rows_first = store.list_trades(Scope::All).await.unwrap();
    let second = reconciler.run_matching(Scope::All).await.unwrap();
    let rows_second = store.list_trades(Scope::All).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(rows_first, rows_second);
}

#[tokio::test]
async fn test_profit_is_conserved() {
    let store = memory_store();
    buy(&store, dec!(1500000), dec!(131.2), at(11, 8, 0)).await;
    sell(&store, dec!(400000), dec!(129.9), at(11, 9, 0)).await;
    sell(&store, dec!(700000), dec!(130.4), at(11, 9, 5)).await;
    buy(&store, dec!(250000), dec!(128), at(11, 10, 0)).await;
    sell(&store, dec!(900000), dec!(127), at(11, 11, 0)).await;

    let run = reconciler(store.clone()).run_matching(Scope::All).await.unwrap();

    for m in &run.matches {
        let expected = round_money(m.matched_amount / m.sell_rate - m.matched_amount / m.buy_rate);
        assert_eq!(m.profit, expected);
    }
    let from_matches: Decimal = run.matches.iter().map(|m| m.profit).sum();
    let from_trades: Decimal = store
        .list_trades(Scope::All)
        .await
        .unwrap()
        .iter()
        .filter_map(|t| t.profit)
        .sum();
    assert_eq!(from_matches, from_trades);
    assert_eq!(run.matched_profit, from_trades);
    assert!(run.per_trade.iter().all(|t| t.remaining_amount >= Decimal::ZERO));
}

#[tokio::test]
async fn test_earlier_sell_matched_first() {
    let store = memory_store();
    let a = buy(&store, dec!(3000000), dec!(128), at(12, 9, 0)).await;
    let b = sell(&store, dec!(1000000), dec!(130), at(12, 10, 0)).await;
    let c = sell(&store, dec!(1000000), dec!(131), at(12, 11, 0)).await;

    let run = reconciler(store.clone()).run_matching(Scope::All).await.unwrap();

    assert_eq!(run.matches[0].sell, Participant::Trade(b.id));
    assert_eq!(run.matches[1].sell, Participant::Trade(c.id));
    let a = store.get_trade(a.id).await.unwrap();
    assert_eq!(a.remaining_amount, Some(dec!(1000000)));
    assert_eq!(run.unresolved.len(), 1);
    assert_eq!(run.unresolved[0].id, a.id);
}

#[tokio::test]
async fn test_range_scope_leaves_other_days_alone() {
    let store = memory_store();
    let outside = buy(&store, dec!(100000), dec!(130), at(9, 9, 0)).await;
    buy(&store, dec!(100000), dec!(130), at(10, 9, 0)).await;
    sell(&store, dec!(100000), dec!(126), at(10, 10, 0)).await;

    let run = reconciler(store.clone())
        .run_matching(Scope::day(day(10)))
        .await
        .unwrap();

    assert_eq!(run.per_trade.len(), 2);
    let outside = store.get_trade(outside.id).await.unwrap();
    assert_eq!(outside.profit, None);
    assert_eq!(outside.remaining_amount, None);
}

#[tokio::test]
async fn test_rerun_after_new_trade_recomputes_from_scratch() {
    let store = memory_store();
    let b = buy(&store, dec!(1000000), dec!(130), at(10, 9, 0)).await;
    let s1 = sell(&store, dec!(400000), dec!(126), at(10, 10, 0)).await;

    let reconciler = reconciler(store.clone());
    reconciler.run_matching(Scope::All).await.unwrap();
    assert_eq!(
        store.get_trade(b.id).await.unwrap().remaining_amount,
        Some(dec!(600000))
    );

    let s2 = sell(&store, dec!(600000), dec!(126), at(10, 11, 0)).await;
    let run = reconciler.run_matching(Scope::All).await.unwrap();

    let s1 = store.get_trade(s1.id).await.unwrap();
    let s2 = store.get_trade(s2.id).await.unwrap();
    assert_eq!(s1.profit, Some(dec!(97.68)));
    assert_eq!(s2.profit, Some(dec!(146.52)));
    assert_eq!(store.get_trade(b.id).await.unwrap().remaining_amount, Some(Decimal::ZERO));
    assert!(run.unresolved.is_empty());
}

// ---------------------------------------------------------------------------
// Adjustments and bad rows
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_adjustments_keep_their_profit() {
    let store = memory_store();
    buy(&store, dec!(1000000), dec!(130), at(10, 9, 0)).await;
    sell(&store, dec!(1000000), dec!(126), at(10, 11, 0)).await;
    let adj = store
        .record_adjustment(NewAdjustment {
            amount: dec!(-15.50),
            traded_at: at(10, 12, 0),
            notes: Some("counter shortfall".into()),
        })
        .await
        .unwrap();

    let run = reconciler(store.clone()).run_matching(Scope::All).await.unwrap();

    assert_eq!(run.adjustment_profit, dec!(-15.50));
    assert_eq!(run.total_profit, dec!(228.70));
    assert!(run.per_trade.iter().all(|t| t.id != adj.id));
    assert_eq!(store.get_trade(adj.id).await.unwrap().profit, Some(dec!(-15.50)));
}

#[tokio::test]
async fn test_bad_rows_are_excluded_not_fatal() {
    let store = memory_store();
    let b = buy(&store, dec!(1000000), dec!(130), at(10, 9, 0)).await;
    let no_rate = store
        .insert_raw(raw_row("SELL", Some(dec!(500000)), None, at(10, 9, 30)))
        .await;
    let zero_rate = store
        .insert_raw(raw_row("SELL", Some(dec!(500000)), Some(Decimal::ZERO), at(10, 9, 40)))
        .await;
    let mut foreign = raw_row("SELL", Some(dec!(500000)), Some(dec!(30)), at(10, 9, 50));
    foreign.pair = "USD/MMK".into();
    let foreign = store.insert_raw(foreign).await;
    let s = sell(&store, dec!(1000000), dec!(126), at(10, 11, 0)).await;

    let run = reconciler(store.clone()).run_matching(Scope::All).await.unwrap();

    assert_eq!(run.total_profit, dec!(244.20));
    assert_eq!(store.get_trade(s.id).await.unwrap().match_link, Some(b.id));

    let kinds: Vec<DiagnosticKind> = run.diagnostics.iter().map(|d| d.kind).collect();
    assert_eq!(
        kinds,
        vec![
            DiagnosticKind::MalformedTrade,
            DiagnosticKind::InvalidRate,
            DiagnosticKind::UnsupportedPair,
        ]
    );
    for id in [no_rate.id, zero_rate.id, foreign.id] {
        let row = store.get_trade(id).await.unwrap();
        assert_eq!(row.profit, None);
        assert_eq!(row.remaining_amount, None);
        assert_eq!(row.match_link, None);
    }
}

// ---------------------------------------------------------------------------
// Atomicity and concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_overlapping_run_rejected_without_changes() {
    let store = memory_store();
    let b = buy(&store, dec!(1000000), dec!(130), at(10, 9, 0)).await;
    sell(&store, dec!(1000000), dec!(126), at(10, 11, 0)).await;

    let locks = RunLocks::new();
    let _active = locks.try_acquire(Scope::day(day(10))).unwrap();
    let reconciler = reconciler(store.clone()).with_locks(locks.clone());

    let err = reconciler.run_matching(Scope::All).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::ConcurrentRunConflict { active: Some(_), .. }
    ));
    assert!(err.is_retryable());
    assert_eq!(store.get_trade(b.id).await.unwrap().profit, None);

    // A disjoint day still runs.
    reconciler.run_matching(Scope::day(day(11))).await.unwrap();
}

#[tokio::test]
async fn test_failed_commit_persists_nothing() {
    let store = memory_store();
    let b = buy(&store, dec!(1000000), dec!(130), at(10, 9, 0)).await;
    let s = sell(&store, dec!(400000), dec!(126), at(10, 11, 0)).await;

    let reconciler = reconciler(store.clone());
    store.inject_commit_failure();
    let err = reconciler.run_matching(Scope::day(day(10))).await.unwrap_err();
    assert!(matches!(err, LedgerError::Persistence(_)));

    assert_eq!(store.get_trade(b.id).await.unwrap().remaining_amount, None);
    assert_eq!(store.get_trade(s.id).await.unwrap().profit, None);
    assert!(store.open_leftovers().await.unwrap().is_empty());

    // Retrying succeeds once the store recovers.
    reconciler.run_matching(Scope::day(day(10))).await.unwrap();
    assert_eq!(store.open_leftovers().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancelled_run_releases_scope() {
    let store = memory_store();
    let b = buy(&store, dec!(1000000), dec!(130), at(10, 9, 0)).await;
    sell(&store, dec!(1000000), dec!(126), at(10, 11, 0)).await;

    let reconciler = reconciler(store.clone());

    // An open transaction keeps the run waiting until the timeout drops it.
    let blocker = store.begin().await.unwrap();
    let cancelled =
        tokio::time::timeout(Duration::from_millis(50), reconciler.run_matching(Scope::All)).await;
    assert!(cancelled.is_err());
    drop(blocker);

    assert_eq!(store.get_trade(b.id).await.unwrap().profit, None);
    let run = reconciler.run_matching(Scope::All).await.unwrap();
    assert_eq!(run.total_profit, dec!(244.20));
}
