//! Per-batch reconciliation report.

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::feed::RowError;
use crate::matcher::{NotYetSettled, SelectionRef, UnmatchedFeedRow};

/// Batch lifecycle: `Parsed -> Matched -> Settled -> Recomputed -> Reported`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStage {
    /// Feed validated and rows parsed.
    #[default]
    Parsed,
    /// Feed rows paired with open selections.
    Matched,
    /// Results attached to the matched selections.
    Settled,
    /// Running totals rebuilt and committed.
    Recomputed,
    /// Report assembled.
    Reported,
}

impl BatchStage {
    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parsed => "parsed",
            Self::Matched => "matched",
            Self::Settled => "settled",
            Self::Recomputed => "recomputed",
            Self::Reported => "reported",
        }
    }
}

impl std::fmt::Display for BatchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one system's settlement pass did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSettlement {
    /// System identifier.
    pub system_id: String,
    /// Selections settled by this batch.
    pub settled: usize,
    /// Matched selections found already settled (or gone) under the lock.
    pub already_settled: usize,
    /// Rows whose running totals changed.
    pub rows_recomputed: usize,
    /// Running win total after the last row.
    pub closing_win_pl: Decimal,
    /// Running place total after the last row.
    pub closing_place_pl: Option<Decimal>,
}

/// A system whose settlement pass failed. Its ledger is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemFailure {
    /// System identifier.
    pub system_id: String,
    /// Stage the failure occurred in.
    pub stage: BatchStage,
    /// Error message.
    pub error: String,
    /// Selections that would have been settled; still open.
    pub pending: Vec<Uuid>,
}

/// Structured outcome of one reconciliation batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    /// Batch identifier, also attached to every log line of the batch.
    pub batch_id: Uuid,
    /// Data rows in the feed.
    pub feed_rows: usize,
    /// Selections settled across all systems.
    pub matched_count: usize,
    /// Open selections no feed row matched.
    pub unmatched_selections: Vec<SelectionRef>,
    /// Feed rows that settled nothing.
    pub unmatched_feed_rows: Vec<UnmatchedFeedRow>,
    /// Row-level parse and pricing errors.
    pub row_errors: Vec<RowError>,
    /// Matched selections still waiting for a settlement price.
    pub not_yet_settled: Vec<NotYetSettled>,
    /// Systems that committed.
    pub systems: Vec<SystemSettlement>,
    /// Systems that failed and were left untouched.
    pub failed_systems: Vec<SystemFailure>,
    /// Last stage reached.
    pub stage: BatchStage,
}

impl ReconciliationReport {
    /// Empty report for a new batch.
    #[must_use]
    pub fn new(batch_id: Uuid, feed_rows: usize) -> Self {
        Self {
            batch_id,
            feed_rows,
            ..Self::default()
        }
    }

    /// Returns true if every feed row settled something and nothing failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.unmatched_feed_rows.is_empty()
            && self.row_errors.is_empty()
            && self.failed_systems.is_empty()
    }

    /// Settlement count for one system, if it committed.
    #[must_use]
    pub fn system(&self, system_id: &str) -> Option<&SystemSettlement> {
        self.systems.iter().find(|s| s.system_id == system_id)
    }

    /// One-line summary for logs and terminal output.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "batch {}: {} feed rows, {} settled, {} unmatched feed rows, {} unmatched selections, \
             {} not yet settled, {} row errors, {} systems committed, {} systems failed",
            self.batch_id,
            self.feed_rows,
            self.matched_count,
            self.unmatched_feed_rows.len(),
            self.unmatched_selections.len(),
            self.not_yet_settled.len(),
            self.row_errors.len(),
            self.systems.len(),
            self.failed_systems.len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stages_are_ordered() {
        assert!(BatchStage::Parsed < BatchStage::Matched);
        assert!(BatchStage::Settled < BatchStage::Recomputed);
        assert!(BatchStage::Recomputed < BatchStage::Reported);
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let mut report = ReconciliationReport::new(Uuid::nil(), 3);
        report.failed_systems.push(SystemFailure {
            system_id: "alpha".into(),
            stage: BatchStage::Recomputed,
            error: "store unavailable".into(),
            pending: vec![],
        });

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["feedRows"], 3);
        assert_eq!(json["matchedCount"], 0);
        assert_eq!(json["failedSystems"][0]["stage"], "recomputed");
        assert!(json.get("notYetSettled").is_some());
        assert!(!report.is_clean());
    }

    #[test]
    fn test_summary_mentions_counts() {
        let report = ReconciliationReport::new(Uuid::nil(), 5);
        assert!(report.summary().contains("5 feed rows"));
        assert!(report.is_clean());
    }
}
