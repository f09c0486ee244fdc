use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Total order within a conversation: creation instant, then lexical
    /// id for identical timestamps.
    pub fn sort_key(&self) -> (DateTime<Utc>, &str) {
        (self.created_at, self.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_deserializes_wire_format() {
        let json = r#"{
            "id": "m1",
            "conversationId": "c1",
            "senderId": "u2",
            "body": "hello",
            "createdAt": "2026-08-01T12:00:00Z"
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id, "m1");
        assert_eq!(msg.conversation_id, "c1");
        assert_eq!(msg.sender_id, "u2");
        assert_eq!(
            msg.created_at,
            Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_sort_key_breaks_timestamp_ties_by_id() {
        let at = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let a = Message {
            id: "ma".into(),
            conversation_id: "c1".into(),
            sender_id: "u1".into(),
            body: String::new(),
            created_at: at,
        };
        let b = Message { id: "mb".into(), ..a.clone() };
        assert!(a.sort_key() < b.sort_key());
    }
}
