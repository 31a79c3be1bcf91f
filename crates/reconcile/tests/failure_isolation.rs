//! A store failure in one system must not leak into another.

mod common;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::*;
use racing_ledger_core::LedgerConfig;
use racing_ledger_data::{
    InMemoryLedgerStore, LedgerChanges, LedgerStore, Selection, StoreError, SystemLease,
};
use racing_ledger_reconcile::{BatchStage, LedgerEngine, LedgerError, ResultEdit};
use rust_decimal_macros::dec;
use uuid::Uuid;

/// Delegates to an in-memory store but refuses commits for one system while
/// armed.
struct FaultyStore {
    inner: InMemoryLedgerStore,
    failing_system: String,
    armed: AtomicBool,
}

impl FaultyStore {
    fn new(failing_system: &str) -> Self {
        Self {
            inner: InMemoryLedgerStore::new(),
            failing_system: failing_system.to_string(),
            armed: AtomicBool::new(false),
        }
    }

    fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerStore for FaultyStore {
    async fn next_row_order(&self, system_id: &str) -> Result<i64, StoreError> {
        self.inner.next_row_order(system_id).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Selection>, StoreError> {
        self.inner.get(id).await
    }

    async fn find_by_system_ordered_from(
        &self,
        system_id: &str,
        from_row_order: i64,
    ) -> Result<Vec<Selection>, StoreError> {
        self.inner.find_by_system_ordered_from(system_id, from_row_order).await
    }

    async fn find_preceding(
        &self,
        system_id: &str,
        row_order: i64,
    ) -> Result<Option<Selection>, StoreError> {
        self.inner.find_preceding(system_id, row_order).await
    }

    async fn find_unresulted(
        &self,
        system_id: Option<&str>,
        dates: &BTreeSet<NaiveDate>,
    ) -> Result<Vec<Selection>, StoreError> {
        self.inner.find_unresulted(system_id, dates).await
    }

    async fn system_ids(&self) -> Result<Vec<String>, StoreError> {
        self.inner.system_ids().await
    }

    async fn upsert(&self, selection: &Selection) -> Result<(), StoreError> {
        self.inner.upsert(selection).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete(id).await
    }

    async fn commit(&self, changes: &LedgerChanges) -> Result<(), StoreError> {
        if self.armed.load(Ordering::SeqCst) && changes.system_id == self.failing_system {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inner.commit(changes).await
    }

    async fn lock_system(&self, system_id: &str) -> Result<SystemLease, StoreError> {
        self.inner.lock_system(system_id).await
    }
}

#[tokio::test]
async fn test_failed_system_is_untouched_while_others_settle() {
    let store = Arc::new(FaultyStore::new("broken"));
    let engine = LedgerEngine::new(Arc::clone(&store), LedgerConfig::default());

    let broken = add(&engine, "broken", "13:00", "Shared Horse").await;
    add(&engine, "healthy", "13:00", "Shared Horse").await;
    add(&engine, "healthy", "13:30", "Second Horse").await;
    let broken_before = store.inner.snapshot("broken");

    store.arm();
    let report = engine
        .reconcile(&feed(vec![
            win_line("13:00", "Shared Horse", "3.0", "0.98"),
            win_line("13:30", "Second Horse", "6.0", "-5.0"),
        ]))
        .await
        .unwrap();

    assert_eq!(report.matched_count, 2);
    assert_eq!(report.systems.len(), 1);
    assert_eq!(report.systems[0].system_id, "healthy");
    assert_eq!(report.systems[0].closing_win_pl, dec!(-4.02));

    assert_eq!(report.failed_systems.len(), 1);
    let failure = &report.failed_systems[0];
    assert_eq!(failure.system_id, "broken");
    assert_eq!(failure.stage, BatchStage::Recomputed);
    assert!(failure.error.contains("connection reset"));
    assert_eq!(failure.pending, vec![broken.id]);

    assert_eq!(store.inner.snapshot("broken"), broken_before);
    assert_eq!(
        running_win(&store.inner, "healthy"),
        vec![dec!(0.98), dec!(-4.02)]
    );
}

#[tokio::test]
async fn test_failed_system_settles_on_the_next_run() {
    let store = Arc::new(FaultyStore::new("broken"));
    let engine = LedgerEngine::new(Arc::clone(&store), LedgerConfig::default());
    add(&engine, "broken", "13:00", "Shared Horse").await;

    let batch = feed(vec![win_line("13:00", "Shared Horse", "3.0", "0.98")]);
    store.arm();
    let report = engine.reconcile(&batch).await.unwrap();
    assert_eq!(report.failed_systems.len(), 1);

    store.armed.store(false, Ordering::SeqCst);
    let report = engine.reconcile(&batch).await.unwrap();
    assert_eq!(report.matched_count, 1);
    assert!(report.failed_systems.is_empty());
}

#[tokio::test]
async fn test_failed_admin_edit_leaves_ledger_unchanged() {
    let store = Arc::new(FaultyStore::new("broken"));
    let engine = LedgerEngine::new(Arc::clone(&store), LedgerConfig::default());
    let a = add(&engine, "broken", "13:00", "Edited").await;
    add(&engine, "broken", "13:30", "Later").await;
    let before = store.inner.snapshot("broken");

    store.arm();
    let err = engine
        .edit_result(a.id, ResultEdit::new(racing_ledger_core::RaceResult::Lost))
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::Store(StoreError::Unavailable(_))));
    assert_eq!(store.inner.snapshot("broken"), before);
}
