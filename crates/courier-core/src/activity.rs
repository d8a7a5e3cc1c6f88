//! Activity data model
//!
//! An [`Activity`] is the unit of conversational content exchanged with the
//! service. Inbound items arrive as loosely typed [`RawActivity`] values and
//! are validated into activities at the ingestion boundary; outgoing items are
//! built from a [`DraftActivity`] and transmitted as an [`OutboundPayload`].

use crate::errors::IngestError;
use crate::types::{ActivityId, ClientId, Participant, Role, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ----------------------------------------------------------------------------
// Activity Body
// ----------------------------------------------------------------------------

/// Kind of an activity, used for logging and filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityKind {
    Message,
    Typing,
    Event,
    Other,
}

/// Kind-specific payload of an activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ActivityBody {
    /// A text message
    Message { text: String },
    /// A typing indicator
    Typing,
    /// A named application event with an optional value
    Event { name: String, value: Option<Value> },
    /// Any other kind, kept verbatim
    Other { kind: String, value: Option<Value> },
}

impl ActivityBody {
    pub fn kind(&self) -> ActivityKind {
        match self {
            ActivityBody::Message { .. } => ActivityKind::Message,
            ActivityBody::Typing => ActivityKind::Typing,
            ActivityBody::Event { .. } => ActivityKind::Event,
            ActivityBody::Other { .. } => ActivityKind::Other,
        }
    }

    /// Wire name of this kind
    pub fn type_name(&self) -> &str {
        match self {
            ActivityBody::Message { .. } => "message",
            ActivityBody::Typing => "typing",
            ActivityBody::Event { .. } => "event",
            ActivityBody::Other { kind, .. } => kind,
        }
    }

    /// Message text, if this is a message
    pub fn text(&self) -> Option<&str> {
        match self {
            ActivityBody::Message { text } => Some(text),
            _ => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Activity
// ----------------------------------------------------------------------------

/// Delivery status of an outgoing activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Confirmed,
    Failed,
}

impl DeliveryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Confirmed | DeliveryStatus::Failed)
    }
}

/// A unit of conversational content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Server-assigned id; absent on outgoing activities until confirmed
    pub id: Option<ActivityId>,
    /// Correlation identity; always present on outgoing activities
    pub client_id: Option<ClientId>,
    pub body: ActivityBody,
    pub sender: Participant,
    /// Client clock for outgoing activities, server clock for inbound ones
    pub created_at: Timestamp,
    pub reply_to_id: Option<ActivityId>,
    /// Only tracked for outgoing activities
    pub delivery_status: Option<DeliveryStatus>,
}

impl Activity {
    pub fn kind(&self) -> ActivityKind {
        self.body.kind()
    }

    /// Id used in log output
    pub fn log_id(&self) -> String {
        match (&self.id, &self.client_id) {
            (Some(id), _) => id.to_string(),
            (None, Some(client_id)) => format!("client:{client_id}"),
            (None, None) => "<unidentified>".to_string(),
        }
    }

    /// Whether this activity was authored locally
    pub fn is_outgoing(&self) -> bool {
        self.delivery_status.is_some()
    }
}

// ----------------------------------------------------------------------------
// Drafts
// ----------------------------------------------------------------------------

/// Consumer-authored content awaiting submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftActivity {
    pub body: ActivityBody,
    pub reply_to_id: Option<ActivityId>,
}

impl DraftActivity {
    pub fn new(body: ActivityBody) -> Self {
        Self {
            body,
            reply_to_id: None,
        }
    }

    pub fn message(text: impl Into<String>) -> Self {
        Self::new(ActivityBody::Message { text: text.into() })
    }

    pub fn typing() -> Self {
        Self::new(ActivityBody::Typing)
    }

    pub fn event(name: impl Into<String>, value: Option<Value>) -> Self {
        Self::new(ActivityBody::Event {
            name: name.into(),
            value,
        })
    }

    pub fn in_reply_to(mut self, id: ActivityId) -> Self {
        self.reply_to_id = Some(id);
        self
    }

    /// Stamp this draft into a pending outgoing activity
    pub fn stamp(self, client_id: ClientId, sender: Participant, now: Timestamp) -> Activity {
        Activity {
            id: None,
            client_id: Some(client_id),
            body: self.body,
            sender,
            created_at: now,
            reply_to_id: self.reply_to_id,
            delivery_status: Some(DeliveryStatus::Pending),
        }
    }
}

// ----------------------------------------------------------------------------
// Wire Shapes
// ----------------------------------------------------------------------------

/// Loosely typed participant as received from the service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawParticipant {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Transport metadata carried alongside an activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

/// Activity as it appears on the wire, before validation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawActivity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<RawParticipant>,
    /// Milliseconds since Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<ChannelData>,
}

impl RawActivity {
    /// Parse a raw activity from JSON text
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Correlation identity echoed back by the service, if any
    pub fn client_id(&self) -> Option<&str> {
        self.channel_data.as_ref()?.client_id.as_deref()
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, IngestError> {
    match value {
        None => Err(IngestError::MissingField { field }),
        Some(v) if v.trim().is_empty() => Err(IngestError::EmptyField { field }),
        Some(v) => Ok(v),
    }
}

fn parse_role(role: Option<String>) -> Result<Role, IngestError> {
    match role.as_deref() {
        // Service-originated content rarely names a role
        None => Ok(Role::Bot),
        Some("user") => Ok(Role::User),
        Some("bot") => Ok(Role::Bot),
        Some("channel") => Ok(Role::Channel),
        Some(other) => Err(IngestError::UnknownRole {
            role: other.to_string(),
        }),
    }
}

impl TryFrom<RawActivity> for Activity {
    type Error = IngestError;

    fn try_from(raw: RawActivity) -> Result<Self, Self::Error> {
        let id = ActivityId::new(required(raw.id, "id")?);
        let from = raw.from.ok_or(IngestError::MissingField { field: "from" })?;
        let created_at = raw
            .timestamp
            .map(Timestamp::new)
            .ok_or(IngestError::MissingField { field: "timestamp" })?;

        let body = match raw.kind.as_str() {
            "" => return Err(IngestError::MissingField { field: "type" }),
            "message" => ActivityBody::Message {
                text: raw.text.ok_or(IngestError::MissingField { field: "text" })?,
            },
            "typing" => ActivityBody::Typing,
            "event" => ActivityBody::Event {
                name: required(raw.name, "name")?,
                value: raw.value,
            },
            other => ActivityBody::Other {
                kind: other.to_string(),
                value: raw.value,
            },
        };

        let sender = Participant {
            id: required(Some(from.id), "from.id")?,
            name: from.name,
            role: parse_role(from.role)?,
        };

        let client_id = raw
            .channel_data
            .and_then(|data| data.client_id)
            .filter(|id| !id.is_empty())
            .map(ClientId::new);

        Ok(Activity {
            id: Some(id),
            client_id,
            body,
            sender,
            created_at,
            reply_to_id: raw
                .reply_to_id
                .filter(|id| !id.is_empty())
                .map(ActivityId::new),
            delivery_status: None,
        })
    }
}

/// Outgoing activity as handed to the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundPayload {
    pub client_id: ClientId,
    pub body: ActivityBody,
    pub sender: Participant,
    pub created_at: Timestamp,
    pub reply_to_id: Option<ActivityId>,
}

impl OutboundPayload {
    /// Build the payload for a stamped outgoing activity
    pub fn from_activity(client_id: ClientId, activity: &Activity) -> Self {
        Self {
            client_id,
            body: activity.body.clone(),
            sender: activity.sender.clone(),
            created_at: activity.created_at,
            reply_to_id: activity.reply_to_id.clone(),
        }
    }

    /// Wire representation, with the correlation identity in `channelData`
    pub fn to_raw(&self) -> RawActivity {
        let (text, name, value) = match &self.body {
            ActivityBody::Message { text } => (Some(text.clone()), None, None),
            ActivityBody::Typing => (None, None, None),
            ActivityBody::Event { name, value } => (None, Some(name.clone()), value.clone()),
            ActivityBody::Other { value, .. } => (None, None, value.clone()),
        };
        RawActivity {
            id: None,
            kind: self.body.type_name().to_string(),
            text,
            name,
            value,
            from: Some(RawParticipant {
                id: self.sender.id.clone(),
                name: self.sender.name.clone(),
                role: Some(self.sender.role.as_str().to_string()),
            }),
            timestamp: Some(self.created_at.as_millis()),
            reply_to_id: self.reply_to_id.as_ref().map(|id| id.as_str().to_string()),
            channel_data: Some(ChannelData {
                client_id: Some(self.client_id.as_str().to_string()),
            }),
        }
    }

    /// Serialize the wire representation to JSON
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(&self.to_raw())?)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_message(id: &str) -> RawActivity {
        RawActivity {
            id: Some(id.to_string()),
            kind: "message".to_string(),
            text: Some("hello".to_string()),
            from: Some(RawParticipant {
                id: "bot-1".to_string(),
                name: Some("Helper".to_string()),
                role: None,
            }),
            timestamp: Some(42),
            ..Default::default()
        }
    }

    #[test]
    fn parses_service_json() {
        let json = r#"{
            "id": "a-1",
            "type": "message",
            "text": "hi there",
            "from": { "id": "bot-1", "role": "bot" },
            "timestamp": 1700000000000,
            "replyToId": "a-0",
            "channelData": { "clientId": "c-9" }
        }"#;
        let raw = RawActivity::from_json(json).unwrap();
        assert_eq!(raw.client_id(), Some("c-9"));

        let activity = Activity::try_from(raw).unwrap();
        assert_eq!(activity.id, Some(ActivityId::new("a-1")));
        assert_eq!(activity.reply_to_id, Some(ActivityId::new("a-0")));
        assert_eq!(activity.client_id, Some(ClientId::new("c-9")));
        assert_eq!(activity.body.text(), Some("hi there"));
        assert_eq!(activity.delivery_status, None);
    }

    #[test]
    fn rejects_missing_required_fields() {
        let mut raw = raw_message("a-1");
        raw.id = None;
        assert_eq!(
            Activity::try_from(raw).unwrap_err(),
            IngestError::MissingField { field: "id" }
        );

        let mut raw = raw_message("a-1");
        raw.timestamp = None;
        assert_eq!(
            Activity::try_from(raw).unwrap_err(),
            IngestError::MissingField { field: "timestamp" }
        );

        let mut raw = raw_message("a-1");
        raw.text = None;
        assert_eq!(
            Activity::try_from(raw).unwrap_err(),
            IngestError::MissingField { field: "text" }
        );
    }

    #[test]
    fn rejects_unknown_roles_and_blank_ids() {
        let mut raw = raw_message("a-1");
        raw.from = Some(RawParticipant {
            id: "x".into(),
            name: None,
            role: Some("robot".into()),
        });
        assert!(matches!(
            Activity::try_from(raw),
            Err(IngestError::UnknownRole { .. })
        ));

        let raw = raw_message("   ");
        assert_eq!(
            Activity::try_from(raw).unwrap_err(),
            IngestError::EmptyField { field: "id" }
        );
    }

    #[test]
    fn unknown_kinds_are_preserved() {
        let mut raw = raw_message("a-2");
        raw.kind = "conversationUpdate".into();
        let activity = Activity::try_from(raw).unwrap();
        assert_eq!(activity.kind(), ActivityKind::Other);
        assert_eq!(activity.body.type_name(), "conversationUpdate");
    }

    #[test]
    fn outbound_payload_carries_client_id() {
        let draft = DraftActivity::message("ping").in_reply_to(ActivityId::new("a-0"));
        let activity = draft.stamp(
            ClientId::new("c-1"),
            Participant::user("me"),
            Timestamp::new(7),
        );
        assert_eq!(activity.delivery_status, Some(DeliveryStatus::Pending));

        let payload = OutboundPayload::from_activity(ClientId::new("c-1"), &activity);
        let raw = payload.to_raw();
        assert_eq!(raw.client_id(), Some("c-1"));
        assert_eq!(raw.kind, "message");
        assert_eq!(raw.reply_to_id.as_deref(), Some("a-0"));

        let json = payload.to_json().unwrap();
        assert!(json.contains("\"channelData\":{\"clientId\":\"c-1\"}"));
    }
}
