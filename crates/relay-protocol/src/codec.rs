//! JSON codec for relay messages.
//!
//! Outbound messages are encoded once into `Bytes` so a single encoding can
//! be shared by every recipient of a broadcast.

use bytes::Bytes;
use thiserror::Error;

use crate::feed::ChangeBatch;
use crate::messages::{InboundMessage, OutboundMessage};

/// Maximum encoded message size (128 KiB).
pub const MAX_MESSAGE_SIZE: usize = 128 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds maximum size.
    #[error("Message size {0} exceeds maximum {MAX_MESSAGE_SIZE}")]
    MessageTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode an outbound message.
///
/// # Errors
///
/// Returns an error if the message is too large or encoding fails.
pub fn encode(message: &OutboundMessage) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(message)?;

    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(payload.len()));
    }

    Ok(Bytes::from(payload))
}

/// Decode an inbound client message.
///
/// # Errors
///
/// Returns an error if the data is too large or not a valid envelope.
pub fn decode_inbound(data: &[u8]) -> Result<InboundMessage, ProtocolError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(data.len()));
    }

    Ok(serde_json::from_slice(data)?)
}

/// Decode a change-feed batch.
///
/// Batches are not subject to the client message size limit. Unreadable
/// records come back as [`FeedEntry::Malformed`](crate::FeedEntry) entries.
///
/// # Errors
///
/// Returns an error if the data is not a JSON object with a `Records` array.
pub fn decode_batch(data: &[u8]) -> Result<ChangeBatch, ProtocolError> {
    Ok(serde_json::from_slice(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChangeNotification, EventKind, Partition};
    use serde_json::json;

    #[test]
    fn test_encode_connection_id() {
        let encoded = encode(&OutboundMessage::connection_id("conn_1")).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(value, json!({"type": "connectionId", "connectionId": "conn_1"}));
    }

    #[test]
    fn test_encode_too_large() {
        let message = OutboundMessage::update(
            Partition::WorkOrders,
            ChangeNotification {
                id: "wo-1".into(),
                event_name: EventKind::Insert,
                new_image: json!({"blob": "x".repeat(MAX_MESSAGE_SIZE)}),
            },
        );

        match encode(&message) {
            Err(ProtocolError::MessageTooLarge(_)) => {}
            other => panic!("Expected MessageTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_inbound_rejects_garbage() {
        assert!(matches!(
            decode_inbound(b"not json"),
            Err(ProtocolError::Json(_))
        ));
        assert!(decode_inbound(br#"{"token":"no type"}"#).is_err());
    }

    #[test]
    fn test_decode_inbound_rejects_unknown_partition() {
        let data = br#"{"type":"refresh","token":"t","resourcePartition":"invoices"}"#;
        assert!(decode_inbound(data).is_err());
    }

    #[test]
    fn test_decode_batch() {
        let data = br#"{"Records":[{"eventName":"INSERT","sourceTable":"students","keys":{"id":"s"},"newImage":{"a":1}}]}"#;
        let batch = decode_batch(data).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.records[0].record().unwrap().event_kind, EventKind::Insert);
    }

    #[test]
    fn test_decode_batch_tolerates_unreadable_records() {
        let data = br#"{"Records":[
            {"eventName":"INSERT","sourceTable":"students","keys":{"id":"s-1"},"newImage":{"a":1}},
            {"eventName":"INSERT","sourceTable":"invoices","keys":{"invoiceNo":"i-1"}},
            {"eventName":"TTL_EXPIRE","sourceTable":"students","keys":{"id":"s-2"}},
            {"eventName":"MODIFY","sourceTable":"students","keys":{"id":"s-3"},"newImage":{"a":2}}
        ]}"#;

        let batch = decode_batch(data).unwrap();
        assert_eq!(batch.len(), 4);
        let readable: Vec<_> = batch.records.iter().filter_map(|e| e.record()).collect();
        assert_eq!(readable.len(), 3);
        assert_eq!(readable[1].table_name(), Some("invoices"));
        assert!(batch.records[2].record().is_none());
    }

    #[test]
    fn test_decode_batch_rejects_bad_envelope() {
        assert!(decode_batch(b"not json").is_err());
        assert!(decode_batch(br#"{"Records":{}}"#).is_err());
    }
}
