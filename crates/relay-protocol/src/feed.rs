//! Upstream change-feed records.
//!
//! The change feed delivers ordered, at-least-once batches of row-level
//! mutations on watched tables. Records are read one by one, so a record
//! this relay cannot understand never takes the rest of its batch down.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Kind of row-level mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    /// A new row.
    Insert,
    /// An updated row.
    Modify,
    /// A deleted row.
    Remove,
}

impl EventKind {
    /// The wire name of the event kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventKind::Insert => "INSERT",
            EventKind::Modify => "MODIFY",
            EventKind::Remove => "REMOVE",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primary key of the mutated row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordKeys {
    /// Entity id. Usually a string, numbers are accepted. Tables keyed by
    /// something else leave it empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

/// A single row-level mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Kind of mutation.
    #[serde(rename = "eventName")]
    pub event_kind: EventKind,
    /// Name of the table the mutation happened on.
    #[serde(
        default,
        rename = "sourceTable",
        skip_serializing_if = "Option::is_none"
    )]
    pub source_table: Option<String>,
    /// Stream ARN, used to derive the table when `sourceTable` is absent.
    #[serde(
        default,
        rename = "eventSourceARN",
        skip_serializing_if = "Option::is_none"
    )]
    pub event_source_arn: Option<String>,
    /// Primary key of the row.
    #[serde(default)]
    pub keys: RecordKeys,
    /// Row image before the mutation.
    #[serde(default, rename = "oldImage", skip_serializing_if = "Option::is_none")]
    pub old_image: Option<Value>,
    /// Row image after the mutation. Absent for removals.
    #[serde(default, rename = "newImage", skip_serializing_if = "Option::is_none")]
    pub new_image: Option<Value>,
}

impl ChangeRecord {
    /// Create a record for the given table and entity id.
    #[must_use]
    pub fn new(event_kind: EventKind, table: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            event_kind,
            source_table: Some(table.into()),
            event_source_arn: None,
            keys: RecordKeys {
                id: Some(Value::String(id.into())),
            },
            old_image: None,
            new_image: None,
        }
    }

    /// Set the before image.
    #[must_use]
    pub fn with_old_image(mut self, image: Value) -> Self {
        self.old_image = Some(image);
        self
    }

    /// Set the after image.
    #[must_use]
    pub fn with_new_image(mut self, image: Value) -> Self {
        self.new_image = Some(image);
        self
    }

    /// The source table name.
    ///
    /// Falls back to the `table/<name>` segment of the stream ARN.
    #[must_use]
    pub fn table_name(&self) -> Option<&str> {
        if let Some(table) = self.source_table.as_deref() {
            return Some(table);
        }
        self.event_source_arn.as_deref().and_then(table_from_arn)
    }

    /// The entity id as a string, if the record carries one.
    #[must_use]
    pub fn entity_id(&self) -> Option<String> {
        match self.keys.id.as_ref()? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Extract the table name from `arn:aws:dynamodb:<region>:<account>:table/<name>/stream/<label>`.
fn table_from_arn(arn: &str) -> Option<&str> {
    let resource = arn.splitn(6, ':').nth(5)?;
    let rest = resource.strip_prefix("table/")?;
    let name = rest.split('/').next()?;
    (!name.is_empty()).then_some(name)
}

/// One entry of a batch: a record, or why it could not be read.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEntry {
    /// A readable record.
    Record(ChangeRecord),
    /// An entry that is not a valid record (unknown event name, wrong types).
    Malformed(String),
}

impl FeedEntry {
    /// The record, if this entry is readable.
    #[must_use]
    pub fn record(&self) -> Option<&ChangeRecord> {
        match self {
            FeedEntry::Record(record) => Some(record),
            FeedEntry::Malformed(_) => None,
        }
    }
}

impl From<ChangeRecord> for FeedEntry {
    fn from(record: ChangeRecord) -> Self {
        FeedEntry::Record(record)
    }
}

impl<'de> Deserialize<'de> for FeedEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(match serde_json::from_value::<ChangeRecord>(value) {
            Ok(record) => FeedEntry::Record(record),
            Err(e) => FeedEntry::Malformed(e.to_string()),
        })
    }
}

/// An ordered batch of change records.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChangeBatch {
    /// Entries in feed order.
    #[serde(rename = "Records", default)]
    pub records: Vec<FeedEntry>,
}

impl ChangeBatch {
    /// Create a batch from records in feed order.
    #[must_use]
    pub fn new(records: Vec<ChangeRecord>) -> Self {
        Self {
            records: records.into_iter().map(FeedEntry::from).collect(),
        }
    }

    /// Number of records in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_from_feed_json() {
        let record: ChangeRecord = serde_json::from_value(json!({
            "eventName": "MODIFY",
            "sourceTable": "work-orders",
            "keys": {"id": "wo-1"},
            "oldImage": {"status": "open"},
            "newImage": {"status": "closed"}
        }))
        .unwrap();

        assert_eq!(record.event_kind, EventKind::Modify);
        assert_eq!(record.table_name(), Some("work-orders"));
        assert_eq!(record.entity_id().as_deref(), Some("wo-1"));
        assert!(record.old_image.is_some());
    }

    #[test]
    fn test_remove_record_has_no_new_image() {
        let record: ChangeRecord = serde_json::from_value(json!({
            "eventName": "REMOVE",
            "sourceTable": "students",
            "keys": {"id": "s-1"},
            "oldImage": {"name": "Ada"}
        }))
        .unwrap();

        assert_eq!(record.event_kind, EventKind::Remove);
        assert!(record.new_image.is_none());
    }

    #[test]
    fn test_table_name_from_arn() {
        let record: ChangeRecord = serde_json::from_value(json!({
            "eventName": "INSERT",
            "eventSourceARN": "arn:aws:dynamodb:us-east-1:123456789012:table/students/stream/2024-01-01T00:00:00.000",
            "keys": {"id": 7},
            "newImage": {}
        }))
        .unwrap();

        assert_eq!(record.table_name(), Some("students"));
        assert_eq!(record.entity_id().as_deref(), Some("7"));
    }

    #[test]
    fn test_table_name_missing() {
        let mut record = ChangeRecord::new(EventKind::Insert, "x", "1");
        record.source_table = None;
        assert_eq!(record.table_name(), None);

        record.event_source_arn = Some("arn:aws:sqs:us-east-1:1:queue".into());
        assert_eq!(record.table_name(), None);
    }

    #[test]
    fn test_batch_envelope() {
        let batch: ChangeBatch = serde_json::from_value(json!({
            "Records": [
                {"eventName": "INSERT", "sourceTable": "students", "keys": {"id": "a"}, "newImage": {}},
                {"eventName": "REMOVE", "sourceTable": "students", "keys": {"id": "b"}}
            ]
        }))
        .unwrap();

        assert_eq!(batch.len(), 2);
        let second = batch.records[1].record().unwrap();
        assert_eq!(second.entity_id().as_deref(), Some("b"));
    }

    #[test]
    fn test_unreadable_entry_keeps_its_neighbours() {
        let batch: ChangeBatch = serde_json::from_value(json!({
            "Records": [
                {"eventName": "INSERT", "sourceTable": "students", "keys": {"id": "s-1"}, "newImage": {}},
                {"eventName": "TTL_EXPIRE", "sourceTable": "students", "keys": {"id": "s-2"}},
                {"eventName": "INSERT", "sourceTable": "students", "keys": {"id": "s-3"}, "newImage": {}}
            ]
        }))
        .unwrap();

        assert_eq!(batch.len(), 3);
        assert!(batch.records[0].record().is_some());
        assert!(matches!(batch.records[1], FeedEntry::Malformed(_)));
        assert!(batch.records[2].record().is_some());
    }

    #[test]
    fn test_record_keyed_by_other_column() {
        let record: ChangeRecord = serde_json::from_value(json!({
            "eventName": "INSERT",
            "sourceTable": "invoices",
            "keys": {"invoiceNo": "i-1"},
            "newImage": {}
        }))
        .unwrap();

        assert_eq!(record.table_name(), Some("invoices"));
        assert_eq!(record.entity_id(), None);

        let no_keys: ChangeRecord = serde_json::from_value(json!({
            "eventName": "MODIFY",
            "sourceTable": "students"
        }))
        .unwrap();
        assert_eq!(no_keys.entity_id(), None);
    }
}
