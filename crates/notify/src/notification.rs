//! Commit notification wire format
//!
//! ```json
//! {"StreamId": "order-42", "StreamType": "Order", "StreamRevision": 2}
//! ```
//!
//! Notifications carry no event payload. Subscribers read the new events
//! through the read path. Decoding also accepts `StreamRevision` as a JSON
//! string and the `{"Message": "<notification json>"}` fan-out envelope.

use evstore_core::{Error, Result, StreamId, StreamType};
use serde::{Deserialize, Deserializer, Serialize};

/// Announcement that a stream advanced to a new revision
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitNotification {
    /// Stream that advanced
    #[serde(rename = "StreamId")]
    pub stream_id: StreamId,
    /// Category of the stream
    #[serde(rename = "StreamType")]
    pub stream_type: StreamType,
    /// Revision the stream advanced to
    #[serde(rename = "StreamRevision", deserialize_with = "revision_from_number_or_string")]
    pub stream_revision: u64,
}

impl CommitNotification {
    /// Idempotency key: a redelivery carries the same pair
    pub fn key(&self) -> (&StreamId, u64) {
        (&self.stream_id, self.stream_revision)
    }

    /// Encode as canonical JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Decode a bare notification
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Serialization(format!("invalid commit notification: {}", e)))
    }

    /// Decode a notification wrapped in a `{"Message": ...}` envelope
    pub fn from_envelope(body: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(body)
            .map_err(|e| Error::Serialization(format!("invalid notification envelope: {}", e)))?;
        Self::from_json(&envelope.message)
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "Message")]
    message: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RevisionRepr {
    Number(u64),
    Text(String),
}

fn revision_from_number_or_string<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match RevisionRepr::deserialize(deserializer)? {
        RevisionRepr::Number(n) => Ok(n),
        RevisionRepr::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification() -> CommitNotification {
        CommitNotification {
            stream_id: StreamId::new("order-42").unwrap(),
            stream_type: StreamType::new("Order").unwrap(),
            stream_revision: 2,
        }
    }

    #[test]
    fn test_canonical_json() {
        assert_eq!(
            notification().to_json().unwrap(),
            r#"{"StreamId":"order-42","StreamType":"Order","StreamRevision":2}"#
        );
    }

    #[test]
    fn test_decode_string_revision() {
        let decoded = CommitNotification::from_json(
            r#"{"StreamId":"order-42","StreamType":"Order","StreamRevision":"2"}"#,
        )
        .unwrap();
        assert_eq!(decoded, notification());
    }

    #[test]
    fn test_decode_envelope() {
        let inner = notification().to_json().unwrap();
        let body = serde_json::json!({ "Type": "Notification", "Message": inner }).to_string();
        assert_eq!(CommitNotification::from_envelope(&body).unwrap(), notification());
    }

    #[test]
    fn test_decode_rejects_bad_revision() {
        for bad in [
            r#"{"StreamId":"a","StreamType":"Order","StreamRevision":"two"}"#,
            r#"{"StreamId":"a","StreamType":"Order","StreamRevision":-1}"#,
            r#"{"StreamId":"a","StreamType":"Order"}"#,
        ] {
            assert!(matches!(
                CommitNotification::from_json(bad),
                Err(Error::Serialization(_))
            ));
        }
    }

    #[test]
    fn test_envelope_without_message() {
        assert!(CommitNotification::from_envelope(r#"{"Type":"Notification"}"#).is_err());
    }
}
