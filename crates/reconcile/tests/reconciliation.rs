//! End-to-end reconciliation scenarios against the in-memory store.

mod common;

use common::*;
use racing_ledger_core::{LedgerConfig, PlConfig, RaceResult, SystemProfile};
use racing_ledger_reconcile::{
    BatchStage, FeedBatch, ReconcileError, ResultEdit, UnmatchedReason,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn each_way_config() -> LedgerConfig {
    LedgerConfig::default().with_system("each-way", SystemProfile::with_place_market(PlConfig::default()))
}

#[tokio::test]
async fn test_settle_then_delete_first_row() {
    let engine = memory_engine(LedgerConfig::default());
    let a = add(&engine, "alpha", "13:00", "Alpha Star").await;
    add(&engine, "alpha", "13:30", "Bravo Boy").await;
    add(&engine, "alpha", "14:00", "Charlie Girl").await;

    let report = engine
        .reconcile(&feed(vec![
            win_line("13:00", "Alpha Star", "2.0", "-1.0"),
            win_line("13:30", "Bravo Boy", "5.5", "0.98"),
            win_line("14:00", "Charlie Girl", "7.0", "0.98"),
        ]))
        .await
        .unwrap();

    assert_eq!(report.matched_count, 3);
    assert!(report.is_clean());
    assert_eq!(
        running_win(engine.store(), "alpha"),
        vec![dec!(-1.0), dec!(-0.02), dec!(0.96)]
    );

    let outcome = engine.delete_selection(a.id).await.unwrap();
    assert!(outcome.had_result);
    assert_eq!(outcome.rows_recomputed, 2);
    assert_eq!(running_win(engine.store(), "alpha"), vec![dec!(0.98), dec!(1.96)]);
    assert!(engine.verify_system("alpha").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_same_feed_twice_is_idempotent() {
    let engine = memory_engine(LedgerConfig::default());
    add(&engine, "alpha", "13:00", "Alpha Star").await;
    add(&engine, "alpha", "13:30", "Bravo Boy").await;
    add(&engine, "beta", "13:00", "Alpha Star").await;

    let batch = feed(vec![
        win_line("13:00", "Alpha Star", "3.0", "-2.0"),
        win_line("13:30", "Bravo Boy", "5.5", "0.98"),
    ]);

    let first = engine.reconcile(&batch).await.unwrap();
    assert_eq!(first.matched_count, 3);
    let alpha = engine.store().snapshot("alpha");
    let beta = engine.store().snapshot("beta");

    let second = engine.reconcile(&batch).await.unwrap();
    assert_eq!(second.matched_count, 0);
    assert!(second.systems.is_empty());
    assert_eq!(engine.store().snapshot("alpha"), alpha);
    assert_eq!(engine.store().snapshot("beta"), beta);
}

#[tokio::test]
async fn test_deleting_a_resulted_row_equals_never_inserting_it() {
    let with_row = memory_engine(LedgerConfig::default());
    let without_row = memory_engine(LedgerConfig::default());

    let doomed = add(&with_row, "alpha", "13:00", "Doomed").await;
    for (time, horse) in [("13:30", "Keeper One"), ("14:00", "Keeper Two")] {
        add(&with_row, "alpha", time, horse).await;
        add(&without_row, "alpha", time, horse).await;
    }

    let batch = feed(vec![
        win_line("13:00", "Doomed", "4.0", "-3.0"),
        win_line("13:30", "Keeper One", "2.5", "0.98"),
        win_line("14:00", "Keeper Two", "3.5", "-2.5"),
    ]);
    with_row.reconcile(&batch).await.unwrap();
    without_row.reconcile(&batch).await.unwrap();

    with_row.delete_selection(doomed.id).await.unwrap();

    assert_eq!(
        running_win(with_row.store(), "alpha"),
        running_win(without_row.store(), "alpha")
    );

    let next = add(&with_row, "alpha", "15:00", "Latecomer").await;
    assert_eq!(next.row_order, 4);
}

#[tokio::test]
async fn test_place_total_stays_null_until_first_place_row() {
    let engine = memory_engine(each_way_config());
    add(&engine, "each-way", "13:00", "Open One").await;
    add(&engine, "each-way", "13:30", "Placer").await;
    add(&engine, "each-way", "14:00", "Loser").await;

    let report = engine
        .reconcile(&feed(vec![
            line("13:30", "Placer", "6.0", "0.98", "2.0", "-1.0", ""),
            line("14:00", "Loser", "9.0", "0.98", "3.0", "0.98", ""),
        ]))
        .await
        .unwrap();
    assert_eq!(report.matched_count, 2);

    let rows = engine.store().snapshot("each-way");
    assert_eq!(rows[1].result, Some(RaceResult::Placed));
    assert_eq!(rows[1].place_pl, Some(dec!(-1.0)));
    assert_eq!(
        running_place(engine.store(), "each-way"),
        vec![None, Some(dec!(-1.0)), Some(dec!(-0.02))]
    );

    // A later open row inherits a non-null place total.
    add(&engine, "each-way", "15:00", "Tomorrow").await;
    assert_eq!(
        running_place(engine.store(), "each-way").last().copied().flatten(),
        Some(dec!(-0.02))
    );
}

#[tokio::test]
async fn test_placed_without_place_price_books_the_stake() {
    let engine = memory_engine(each_way_config());
    add(&engine, "each-way", "13:00", "Voided Place").await;

    engine
        .reconcile(&feed(vec![line("13:00", "Voided Place", "6.0", "0.98", "", "-1.0", "")]))
        .await
        .unwrap();

    let row = &engine.store().snapshot("each-way")[0];
    assert_eq!(row.result, Some(RaceResult::Placed));
    assert_eq!(row.place_pl, Some(Decimal::ONE));
    assert_eq!(row.win_pl, Some(dec!(0.98)));
}

#[tokio::test]
async fn test_unknown_horse_is_reported_and_nothing_changes() {
    let engine = memory_engine(LedgerConfig::default());
    add(&engine, "alpha", "13:00", "Alpha Star").await;
    let before = engine.store().snapshot("alpha");

    let report = engine
        .reconcile(&feed(vec![win_line("13:00", "Not Selected", "3.0", "-2.0")]))
        .await
        .unwrap();

    assert_eq!(report.matched_count, 0);
    assert_eq!(report.unmatched_feed_rows.len(), 1);
    assert_eq!(report.unmatched_feed_rows[0].reason, UnmatchedReason::NoCandidate);
    assert_eq!(report.unmatched_selections.len(), 1);
    assert_eq!(engine.store().snapshot("alpha"), before);
}

#[tokio::test]
async fn test_absent_or_zero_price_leaves_selection_open() {
    let engine = memory_engine(LedgerConfig::default());
    add(&engine, "alpha", "13:00", "No Price").await;
    add(&engine, "alpha", "13:30", "Zero Price").await;

    let report = engine
        .reconcile(&feed(vec![
            win_line("13:00", "No Price", "", "0.98"),
            win_line("13:30", "Zero Price", "0", "0.98"),
        ]))
        .await
        .unwrap();

    assert_eq!(report.matched_count, 0);
    assert_eq!(report.not_yet_settled.len(), 2);
    assert!(report.unmatched_selections.is_empty());
    assert!(report.unmatched_feed_rows.is_empty());
    assert!(engine.store().snapshot("alpha").iter().all(|r| r.is_open()));

    // Once priced, a later run settles them.
    let report = engine
        .reconcile(&feed(vec![
            win_line("13:00", "No Price", "3.2", "0.98"),
            win_line("13:30", "Zero Price", "4.0", "0.98"),
        ]))
        .await
        .unwrap();
    assert_eq!(report.matched_count, 2);
}

#[tokio::test]
async fn test_implausible_price_is_a_row_error_not_a_settlement() {
    let engine = memory_engine(LedgerConfig::default());
    add(&engine, "alpha", "13:00", "Long Shot").await;
    add(&engine, "alpha", "13:30", "Steady").await;

    let report = engine
        .reconcile(&feed(vec![
            win_line("13:00", "Long Shot", "79228162514264337593543950335", "-1"),
            win_line("13:30", "Steady", "3.0", "0.98"),
        ]))
        .await
        .unwrap();

    assert_eq!(report.matched_count, 1);
    assert!(report.failed_systems.is_empty());
    assert_eq!(report.row_errors.len(), 1);
    assert_eq!(report.row_errors[0].line, 2);
    assert!(report.row_errors[0].message.contains("invalid win price"));

    let rows = engine.store().snapshot("alpha");
    assert!(rows[0].is_open());
    assert_eq!(rows[1].running_win_pl, dec!(0.98));
    assert!(engine.verify_system("alpha").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_void_status_settles_without_a_price() {
    let engine = memory_engine(LedgerConfig::default());
    add(&engine, "alpha", "13:00", "Withdrawn").await;

    let report = engine
        .reconcile(&feed(vec![line("13:00", "Withdrawn", "", "", "", "", "NR")]))
        .await
        .unwrap();

    assert_eq!(report.matched_count, 1);
    let row = &engine.store().snapshot("alpha")[0];
    assert_eq!(row.result, Some(RaceResult::NonRunner));
    assert_eq!(row.win_pl, Some(Decimal::ZERO));
}

#[tokio::test]
async fn test_schema_error_aborts_before_any_mutation() {
    let engine = memory_engine(LedgerConfig::default());
    add(&engine, "alpha", "13:00", "Alpha Star").await;
    let before = engine.store().snapshot("alpha");

    let batch = FeedBatch::from_records(
        &["date", "time", "horse"],
        vec![vec!["2025-03-01", "13:00", "Alpha Star"]],
    );
    let err = engine.reconcile(&batch).await.unwrap_err();

    assert!(matches!(err, ReconcileError::Schema(_)));
    assert!(err.to_string().contains("win_bsp"));
    assert_eq!(engine.store().snapshot("alpha"), before);
}

#[tokio::test]
async fn test_row_parse_error_is_reported_and_others_settle() {
    let engine = memory_engine(LedgerConfig::default());
    add(&engine, "alpha", "13:00", "Good Row").await;
    add(&engine, "alpha", "13:30", "Bad Row").await;

    let report = engine
        .reconcile(&feed(vec![
            win_line("13:00", "Good Row", "3.0", "0.98"),
            win_line("13:30", "Bad Row", "three", "0.98"),
        ]))
        .await
        .unwrap();

    assert_eq!(report.matched_count, 1);
    assert_eq!(report.row_errors.len(), 1);
    assert_eq!(report.row_errors[0].line, 3);
    assert_eq!(report.row_errors[0].column.as_deref(), Some("win_bsp"));
    assert_eq!(report.stage, BatchStage::Reported);
    assert!(!report.is_clean());
}

#[tokio::test]
async fn test_duplicate_feed_row_never_overwrites_first() {
    let engine = memory_engine(LedgerConfig::default());
    add(&engine, "alpha", "13:00", "Alpha Star").await;

    let report = engine
        .reconcile(&feed(vec![
            win_line("13:00", "Alpha Star", "3.0", "-2.0"),
            win_line("1.00:00", "ALPHA  STAR", "8.0", "0.98"),
        ]))
        .await
        .unwrap();

    // "1.00:00" normalizes to 01:00, so it is a different key.
    assert_eq!(report.unmatched_feed_rows[0].reason, UnmatchedReason::NoCandidate);

    let report = engine
        .reconcile(&feed(vec![
            win_line("13:00:00", "alpha star", "9.0", "0.98"),
            win_line("13.00", "Alpha Star", "9.0", "0.98"),
        ]))
        .await
        .unwrap();
    // Already settled by the first batch: nothing left to claim.
    assert_eq!(report.matched_count, 0);

    let row = &engine.store().snapshot("alpha")[0];
    assert_eq!(row.win_pl, Some(dec!(-2.0)));
}

#[tokio::test]
async fn test_duplicate_rows_in_one_batch_report_the_first_line() {
    let engine = memory_engine(LedgerConfig::default());
    add(&engine, "alpha", "13:00", "Alpha Star").await;

    let report = engine
        .reconcile(&feed(vec![
            win_line("13:00", "Alpha Star", "3.0", "-2.0"),
            win_line("13:00:00", " alpha star ", "8.0", "0.98"),
        ]))
        .await
        .unwrap();

    assert_eq!(report.matched_count, 1);
    assert_eq!(
        report.unmatched_feed_rows[0].reason,
        UnmatchedReason::Duplicate { first_line: 2 }
    );
    assert_eq!(engine.store().snapshot("alpha")[0].win_pl, Some(dec!(-2.0)));
}

#[tokio::test]
async fn test_admin_edit_after_settlement_keeps_totals_consistent() {
    let engine = memory_engine(LedgerConfig::default());
    let a = add(&engine, "alpha", "13:00", "Alpha Star").await;
    add(&engine, "alpha", "13:30", "Bravo Boy").await;

    engine
        .reconcile(&feed(vec![
            win_line("13:00", "Alpha Star", "3.0", "0.98"),
            win_line("13:30", "Bravo Boy", "5.0", "0.98"),
        ]))
        .await
        .unwrap();
    assert_eq!(running_win(engine.store(), "alpha"), vec![dec!(0.98), dec!(1.96)]);

    // Steward's inquiry: the first horse is awarded the race.
    engine
        .edit_result(a.id, ResultEdit::new(RaceResult::Won))
        .await
        .unwrap();
    assert_eq!(running_win(engine.store(), "alpha"), vec![dec!(-2.0), dec!(-1.02)]);

    engine.reset_result(a.id).await.unwrap();
    assert_eq!(running_win(engine.store(), "alpha"), vec![dec!(0), dec!(0.98)]);
    assert!(engine.verify_system("alpha").await.unwrap().is_empty());
}
