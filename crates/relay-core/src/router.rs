//! Change-feed router.
//!
//! The router turns row-level change records into partition notifications
//! and hands them to the deliverer, one record at a time in feed order.

use crate::deliverer::{BroadcastReport, Deliverer};
use crate::diff::diff;
use relay_protocol::{
    ChangeBatch, ChangeNotification, ChangeRecord, EventKind, FeedEntry, OutboundMessage,
    Partition,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why a record produced no notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The record's table is not mapped to a partition.
    UnknownSourceTable,
    /// The record has no after-image. Removals are never notified.
    NoAfterImage,
    /// The record could not be read, or carries no entity id.
    Malformed,
}

/// Static mapping from watched table names to partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMap {
    tables: HashMap<String, Partition>,
}

impl TableMap {
    /// Create an empty mapping.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    /// Map a table to a partition, replacing any previous mapping.
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>, partition: Partition) -> Self {
        self.tables.insert(table.into(), partition);
        self
    }

    /// Resolve a table name.
    #[must_use]
    pub fn resolve(&self, table: &str) -> Option<Partition> {
        self.tables.get(table).copied()
    }

    /// Number of mapped tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether no table is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl Default for TableMap {
    /// Every partition's wire name maps to itself.
    fn default() -> Self {
        Partition::ALL
            .iter()
            .fold(Self::empty(), |map, p| map.with_table(p.as_str(), *p))
    }
}

impl FromIterator<(String, Partition)> for TableMap {
    fn from_iter<I: IntoIterator<Item = (String, Partition)>>(iter: I) -> Self {
        Self {
            tables: iter.into_iter().collect(),
        }
    }
}

/// What happened to a single record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// A notification was broadcast.
    Broadcast {
        /// Partition the notification went to.
        partition: Partition,
        /// Per-connection results.
        report: BroadcastReport,
    },
    /// The record was skipped.
    Skipped(SkipReason),
    /// The broadcast could not be attempted.
    Failed,
}

/// Outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Records in the batch.
    pub records: usize,
    /// Records that were broadcast.
    pub broadcast: usize,
    /// Records skipped because the table is unmapped.
    pub skipped_unknown_table: usize,
    /// Records skipped because they carry no after-image.
    pub skipped_no_after_image: usize,
    /// Records skipped because they could not be read.
    pub skipped_malformed: usize,
    /// Records whose broadcast could not be attempted.
    pub failed: usize,
    /// Per-connection results summed over the batch.
    pub deliveries: BroadcastReport,
}

impl BatchReport {
    fn record(&mut self, outcome: &RecordOutcome) {
        self.records += 1;
        match outcome {
            RecordOutcome::Broadcast { report, .. } => {
                self.broadcast += 1;
                self.deliveries.merge(report);
            }
            RecordOutcome::Skipped(SkipReason::UnknownSourceTable) => {
                self.skipped_unknown_table += 1;
            }
            RecordOutcome::Skipped(SkipReason::NoAfterImage) => {
                self.skipped_no_after_image += 1;
            }
            RecordOutcome::Skipped(SkipReason::Malformed) => {
                self.skipped_malformed += 1;
            }
            RecordOutcome::Failed => self.failed += 1,
        }
    }
}

/// Routes change records to partition broadcasts.
pub struct ChangeEventRouter {
    tables: TableMap,
    deliverer: Arc<Deliverer>,
}

impl ChangeEventRouter {
    /// Create a router over the given table mapping.
    #[must_use]
    pub fn new(tables: TableMap, deliverer: Arc<Deliverer>) -> Self {
        info!(tables = tables.len(), "Creating change event router");
        Self { tables, deliverer }
    }

    /// Build the notification for a record without delivering it.
    ///
    /// # Errors
    ///
    /// Returns the reason the record produces no notification.
    pub fn route(&self, record: &ChangeRecord) -> Result<(Partition, OutboundMessage), SkipReason> {
        let partition = record
            .table_name()
            .and_then(|t| self.tables.resolve(t))
            .ok_or(SkipReason::UnknownSourceTable)?;

        let after = match (&record.event_kind, &record.new_image) {
            (EventKind::Remove, _) | (_, None) => return Err(SkipReason::NoAfterImage),
            (_, Some(after)) => after,
        };

        let id = record.entity_id().ok_or(SkipReason::Malformed)?;

        let notification = ChangeNotification {
            id,
            event_name: record.event_kind,
            new_image: diff(record.old_image.as_ref(), after),
        };

        Ok((partition, OutboundMessage::update(partition, notification)))
    }

    /// Route and broadcast a single record.
    pub async fn process_record(&self, record: &ChangeRecord) -> RecordOutcome {
        let (partition, message) = match self.route(record) {
            Ok(routed) => routed,
            Err(reason) => {
                debug!(
                    table = record.table_name().unwrap_or("<none>"),
                    event = %record.event_kind,
                    reason = ?reason,
                    "Skipping change record"
                );
                return RecordOutcome::Skipped(reason);
            }
        };

        match self.deliverer.broadcast(partition, &message).await {
            Ok(report) => RecordOutcome::Broadcast { partition, report },
            Err(e) => {
                warn!(
                    partition = %partition,
                    entity = %record.entity_id().unwrap_or_default(),
                    error = %e,
                    "Change broadcast failed"
                );
                RecordOutcome::Failed
            }
        }
    }

    /// Process a batch in feed order.
    ///
    /// A failed or unreadable record never stops the records after it.
    pub async fn process_batch(&self, batch: &ChangeBatch) -> BatchReport {
        let mut report = BatchReport::default();

        for entry in &batch.records {
            let outcome = match entry {
                FeedEntry::Record(record) => self.process_record(record).await,
                FeedEntry::Malformed(reason) => {
                    warn!(error = %reason, "Skipping unreadable change record");
                    RecordOutcome::Skipped(SkipReason::Malformed)
                }
            };
            report.record(&outcome);
        }

        debug!(
            records = report.records,
            broadcast = report.broadcast,
            malformed = report.skipped_malformed,
            failed = report.failed,
            "Processed change batch"
        );

        report
    }
}
