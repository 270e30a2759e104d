//! Wire and domain types for the conversation engine.

use core::fmt;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::error::{ConversationError, ConversationResult};

/// Display format for message timestamps: month-abbrev day, hour:minute.
pub const TIMESTAMP_DISPLAY_FORMAT: &str = "%b %-d, %H:%M";

/// Who authored a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person drafting posts.
    User,
    /// The posting assistant.
    #[serde(alias = "assistant")]
    Agent,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Agent => f.write_str("agent"),
        }
    }
}

/// Wire discriminator for the message payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// Plain text body.
    Text,
    /// Image reference.
    Image,
}

/// Message payload: exactly one of a text body or an image reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageBody {
    /// Text content.
    Text(String),
    /// Image reference (usually a data URI).
    Image(String),
}

impl MessageBody {
    /// Wire discriminator for this payload.
    #[must_use]
    pub const fn content_type(&self) -> ContentType {
        match self {
            Self::Text(_) => ContentType::Text,
            Self::Image(_) => ContentType::Image,
        }
    }
}

/// A single immutable conversation entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MessageRecord", into = "MessageRecord")]
pub struct Message {
    /// Server-assigned identifier.
    pub id: String,
    /// Author.
    pub role: Role,
    /// Creation instant (UTC).
    pub timestamp: DateTime<Utc>,
    /// Text or image payload.
    pub body: MessageBody,
}

impl Message {
    /// Build a text message.
    #[must_use]
    pub fn text(id: impl Into<String>, role: Role, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            role,
            timestamp,
            body: MessageBody::Text(text.into()),
        }
    }

    /// Build an image message.
    #[must_use]
    pub fn image(id: impl Into<String>, role: Role, uri: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            role,
            timestamp,
            body: MessageBody::Image(uri.into()),
        }
    }

    /// Text content, if this is a text message.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text(text) => Some(text),
            MessageBody::Image(_) => None,
        }
    }

    /// Image reference, if this is an image message.
    #[must_use]
    pub fn image_uri(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Image(uri) => Some(uri),
            MessageBody::Text(_) => None,
        }
    }

    /// Timestamp rendered in the viewer's local time zone.
    #[must_use]
    pub fn display_time(&self) -> String {
        format_timestamp(self.timestamp, &Local)
    }
}

/// Render a timestamp in `tz` using [`TIMESTAMP_DISPLAY_FORMAT`].
#[must_use]
pub fn format_timestamp<Tz>(timestamp: DateTime<Utc>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    timestamp
        .with_timezone(tz)
        .format(TIMESTAMP_DISPLAY_FORMAT)
        .to_string()
}

/// Parse an ISO-8601-like timestamp.
///
/// Offset-less values are taken as UTC.
///
/// # Errors
/// Returns an error if the value matches neither RFC 3339 nor a naive ISO-8601 layout.
pub fn parse_timestamp(raw: &str) -> ConversationResult<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|err| ConversationError::MalformedRecord(format!("invalid timestamp {raw:?}: {err}")))
}

/// Message as it travels on the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRecord {
    #[serde(alias = "_id")]
    id: String,
    role: Role,
    #[serde(alias = "content_type")]
    content_type: ContentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, alias = "imageuri", skip_serializing_if = "Option::is_none")]
    image_uri: Option<String>,
    timestamp: String,
}

impl TryFrom<MessageRecord> for Message {
    type Error = ConversationError;

    fn try_from(record: MessageRecord) -> Result<Self, Self::Error> {
        let body = match record.content_type {
            ContentType::Text => MessageBody::Text(record.content.ok_or_else(|| {
                ConversationError::MalformedRecord(format!("text message {} has no content", record.id))
            })?),
            ContentType::Image => MessageBody::Image(record.image_uri.ok_or_else(|| {
                ConversationError::MalformedRecord(format!("image message {} has no imageUri", record.id))
            })?),
        };
        Ok(Self {
            timestamp: parse_timestamp(&record.timestamp)?,
            id: record.id,
            role: record.role,
            body,
        })
    }
}

impl From<Message> for MessageRecord {
    fn from(message: Message) -> Self {
        let content_type = message.body.content_type();
        let (content, image_uri) = match message.body {
            MessageBody::Text(text) => (Some(text), None),
            MessageBody::Image(uri) => (None, Some(uri)),
        };
        Self {
            id: message.id,
            role: message.role,
            content_type,
            content,
            image_uri,
            timestamp: message.timestamp.to_rfc3339(),
        }
    }
}

/// One decoded line of a send response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamRecord {
    /// Ephemeral progress text; replaces the current status.
    Status(String),
    /// A finished message to append to history.
    Message(Message),
}

impl StreamRecord {
    /// Decode one JSON line.
    ///
    /// A record is a status when it carries a truthy `status` field
    /// (`true` or a non-zero number); anything else must be a message.
    ///
    /// # Errors
    /// Returns an error if the line is not valid JSON or not a valid record.
    pub fn from_json(line: &[u8]) -> ConversationResult<Self> {
        let value: serde_json::Value = serde_json::from_slice(line)
            .map_err(|err| ConversationError::MalformedRecord(err.to_string()))?;

        let is_status = match value.get("status") {
            Some(serde_json::Value::Bool(flag)) => *flag,
            Some(serde_json::Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
            _ => false,
        };

        if is_status {
            let message = value
                .get("message")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Ok(Self::Status(message));
        }

        serde_json::from_value(value)
            .map(Self::Message)
            .map_err(|err| ConversationError::MalformedRecord(err.to_string()))
    }

    /// Encode as a single NDJSON line, including the trailing newline.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_line(&self) -> ConversationResult<String> {
        let mut line = match self {
            Self::Status(message) => serde_json::to_string(&serde_json::json!({
                "status": true,
                "message": message,
            }))?,
            Self::Message(message) => serde_json::to_string(message)?,
        };
        line.push('\n');
        Ok(line)
    }
}

/// Body of a send request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    /// Draft text (may be empty when only an image is sent).
    #[serde(default)]
    pub text: String,
    /// Encoded attachment.
    #[serde(default, alias = "imageuri", skip_serializing_if = "Option::is_none")]
    pub image_uri: Option<String>,
}

#[cfg(test)]
mod tests {
    use chrono::FixedOffset;

    use super::*;

    #[test]
    fn test_decode_snake_case_backend_message() {
        let line = br#"{"_id":"65f0a1","user_id":"u1","role":"user","content_type":"text","content":"hello","timestamp":"2024-03-12T18:04:05.123456"}"#;
        let record = StreamRecord::from_json(line).unwrap();
        let StreamRecord::Message(message) = record else {
            panic!("expected message");
        };
        assert_eq!(message.id, "65f0a1");
        assert_eq!(message.role, Role::User);
        assert_eq!(message.content(), Some("hello"));
        assert_eq!(message.timestamp.to_rfc3339(), "2024-03-12T18:04:05.123456+00:00");
    }

    #[test]
    fn test_decode_image_message() {
        let line = br#"{"id":"2","role":"agent","contentType":"image","imageUri":"data:image/png;base64,AAAA","timestamp":"2024-03-12T18:04:05Z"}"#;
        let StreamRecord::Message(message) = StreamRecord::from_json(line).unwrap() else {
            panic!("expected message");
        };
        assert_eq!(message.image_uri(), Some("data:image/png;base64,AAAA"));
        assert_eq!(message.content(), None);
    }

    #[test]
    fn test_status_discriminator() {
        let a = StreamRecord::from_json(br#"{"status":true,"message":"Drafting"}"#).unwrap();
        let b = StreamRecord::from_json(br#"{"status":1,"message":"Processing input..."}"#).unwrap();
        assert_eq!(a, StreamRecord::Status("Drafting".to_string()));
        assert_eq!(b, StreamRecord::Status("Processing input...".to_string()));
    }

    #[test]
    fn test_rejects_text_message_without_content() {
        let line = br#"{"id":"3","role":"agent","contentType":"text","timestamp":"2024-03-12T18:04:05Z"}"#;
        assert!(matches!(
            StreamRecord::from_json(line),
            Err(ConversationError::MalformedRecord(_))
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(StreamRecord::from_json(b"{\"id\":").is_err());
    }

    #[test]
    fn test_message_serializes_camel_case() {
        let ts = parse_timestamp("2024-01-02T03:04:05Z").unwrap();
        let message = Message::image("9", Role::User, "data:x", ts);
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["contentType"], "image");
        assert_eq!(json["imageUri"], "data:x");
        assert!(json.get("content").is_none());
    }

    #[test]
    fn test_format_timestamp() {
        let ts = parse_timestamp("2024-03-05T18:04:05Z").unwrap();
        assert_eq!(format_timestamp(ts, &Utc), "Mar 5, 18:04");
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        assert_eq!(format_timestamp(ts, &plus_two), "Mar 5, 20:04");
    }

    #[test]
    fn test_send_request_omits_missing_image() {
        let request = SendRequest {
            text: "hi".to_string(),
            image_uri: None,
        };
        assert_eq!(serde_json::to_string(&request).unwrap(), r#"{"text":"hi"}"#);
    }
}
