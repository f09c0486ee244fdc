use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Message;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Compact summary of the most recent message, kept on the conversation
/// for list rendering without loading the full message list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSummary {
    pub id: String,
    pub sender_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Message> for MessageSummary {
    fn from(msg: &Message) -> Self {
        Self {
            id: msg.id.clone(),
            sender_id: msg.sender_id.clone(),
            body: msg.body.clone(),
            created_at: msg.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub participants: Vec<Participant>,
    /// Group display name; direct conversations have none
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub last_message: Option<MessageSummary>,
    /// Most recent activity, the conversation list ordering key
    pub last_activity: DateTime<Utc>,
}

impl Conversation {
    /// Name shown to the local user: the group name, or the other
    /// participant's name for a direct conversation.
    pub fn display_name(&self, local_user_id: Option<&str>) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.participants
            .iter()
            .find(|p| Some(p.id.as_str()) != local_user_id)
            .map(|p| p.display_name.clone().unwrap_or_else(|| p.id.clone()))
            .unwrap_or_else(|| self.id.clone())
    }

    /// Fold a newly arrived message into the summary and ordering key.
    ///
    /// Both updates only move forward: an out-of-order or replayed
    /// message never regresses the summary, so the result is the same
    /// whichever order messages arrive in.
    pub fn touch(&mut self, msg: &Message) {
        let newer = match &self.last_message {
            Some(summary) => msg.sort_key() >= (summary.created_at, summary.id.as_str()),
            None => true,
        };
        if newer {
            self.last_message = Some(MessageSummary::from(msg));
        }
        if msg.created_at > self.last_activity {
            self.last_activity = msg.created_at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn direct() -> Conversation {
        Conversation {
            id: "c1".into(),
            participants: vec![
                Participant { id: "u1".into(), display_name: Some("Ada".into()) },
                Participant { id: "u2".into(), display_name: Some("Grace".into()) },
            ],
            name: None,
            last_message: None,
            last_activity: Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_direct_display_name_uses_other_participant() {
        let conv = direct();
        assert_eq!(conv.display_name(Some("u1")), "Grace");
        assert_eq!(conv.display_name(Some("u2")), "Ada");
    }

    #[test]
    fn test_group_display_name_uses_group_name() {
        let mut conv = direct();
        conv.name = Some("ops".into());
        assert_eq!(conv.display_name(Some("u1")), "ops");
    }

    #[test]
    fn test_touch_updates_summary_and_activity() {
        let mut conv = direct();
        let msg = Message {
            id: "m1".into(),
            conversation_id: "c1".into(),
            sender_id: "u2".into(),
            body: "hey".into(),
            created_at: Utc.with_ymd_and_hms(2026, 8, 2, 0, 0, 0).unwrap(),
        };
        conv.touch(&msg);
        assert_eq!(conv.last_message.as_ref().unwrap().id, "m1");
        assert_eq!(conv.last_activity, msg.created_at);
    }

    #[test]
    fn test_touch_never_moves_activity_backwards() {
        let mut conv = direct();
        let old = Message {
            id: "m0".into(),
            conversation_id: "c1".into(),
            sender_id: "u2".into(),
            body: "old".into(),
            created_at: Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap(),
        };
        let before = conv.last_activity;
        conv.touch(&old);
        assert_eq!(conv.last_activity, before);
    }

    #[test]
    fn test_touch_never_regresses_summary() {
        let make = |id: &str, ts: DateTime<Utc>| Message {
            id: id.into(),
            conversation_id: "c1".into(),
            sender_id: "u2".into(),
            body: id.into(),
            created_at: ts,
        };
        let older = make("m1", Utc.with_ymd_and_hms(2026, 8, 2, 0, 0, 0).unwrap());
        let newer = make("m2", Utc.with_ymd_and_hms(2026, 8, 3, 0, 0, 0).unwrap());

        let mut forward = direct();
        forward.touch(&older);
        forward.touch(&newer);

        let mut reversed = direct();
        reversed.touch(&newer);
        reversed.touch(&older);

        assert_eq!(forward.last_message.as_ref().unwrap().id, "m2");
        assert_eq!(forward.last_message, reversed.last_message);
        assert_eq!(forward.last_activity, reversed.last_activity);
    }
}
