//! Image attachments: local encoding to data URIs and the single pending slot.
//!
//! Encoding is a pure local transform run off the caller's path; results are
//! tagged with the [`AttachmentId`] they were requested for so a completion
//! that arrives after the slot was cleared or replaced is dropped.

use core::fmt;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ConversationResult;

/// Opaque, locally generated attachment identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentId(Uuid);

impl AttachmentId {
    /// Create a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AttachmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where attachment bytes come from.
#[derive(Clone, Debug)]
pub enum AttachmentSource {
    /// A file on disk, read asynchronously.
    Path(PathBuf),
    /// Bytes already in memory (e.g. pasted from a clipboard).
    Bytes {
        /// Display name, also used for media type fallback.
        name: String,
        /// Raw file contents.
        bytes: Vec<u8>,
    },
}

impl AttachmentSource {
    /// Human-readable name of the source.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Path(path) => path
                .file_name()
                .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned()),
            Self::Bytes { name, .. } => name.clone(),
        }
    }
}

/// Encoding progress of the pending attachment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttachmentState {
    /// Source still being read and encoded.
    Encoding,
    /// Encoded and ready to send.
    Ready {
        /// Self-contained data URI.
        encoded_url: String,
    },
}

/// The attachment currently held by a conversation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    /// Identity used to match encode completions.
    pub id: AttachmentId,
    /// Name of the selected source.
    pub source_name: String,
    /// Encoding progress.
    pub state: AttachmentState,
}

impl Attachment {
    /// Whether encoding is still running.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self.state, AttachmentState::Encoding)
    }

    /// Encoded data URI, once available.
    #[must_use]
    pub fn encoded_url(&self) -> Option<&str> {
        match &self.state {
            AttachmentState::Ready { encoded_url } => Some(encoded_url),
            AttachmentState::Encoding => None,
        }
    }
}

/// Single-attachment slot with last-wins replacement.
#[derive(Debug, Default)]
pub struct AttachmentSlot {
    current: Option<Attachment>,
}

impl AttachmentSlot {
    /// Start tracking a new attachment, abandoning any previous one.
    pub fn begin(&mut self, source_name: String) -> Attachment {
        let attachment = Attachment {
            id: AttachmentId::new(),
            source_name,
            state: AttachmentState::Encoding,
        };
        if let Some(previous) = self.current.replace(attachment.clone()) {
            tracing::debug!("Attachment {} replaced before send", previous.id);
        }
        attachment
    }

    /// Apply an encode result. Returns `false` if `id` is no longer current.
    pub fn complete(&mut self, id: AttachmentId, encoded_url: String) -> bool {
        match &mut self.current {
            Some(attachment) if attachment.id == id && attachment.is_loading() => {
                attachment.state = AttachmentState::Ready { encoded_url };
                true
            }
            _ => {
                tracing::debug!("Discarding stale encode result for attachment {id}");
                false
            }
        }
    }

    /// Drop the attachment if it is still the one identified by `id`.
    pub fn fail(&mut self, id: AttachmentId) -> bool {
        if self.current.as_ref().is_some_and(|a| a.id == id) {
            self.current = None;
            true
        } else {
            false
        }
    }

    /// Clear the slot, returning what it held.
    pub fn remove(&mut self) -> Option<Attachment> {
        self.current.take()
    }

    /// Borrow the current attachment.
    #[must_use]
    pub const fn current(&self) -> Option<&Attachment> {
        self.current.as_ref()
    }

    /// Whether the current attachment is still encoding.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.current.as_ref().is_some_and(Attachment::is_loading)
    }

    /// Whether an encoded attachment is ready to send.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.current.as_ref().is_some_and(|a| a.encoded_url().is_some())
    }
}

/// Read and encode an attachment source into a data URI.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub async fn encode(source: AttachmentSource) -> ConversationResult<String> {
    let (name, bytes) = match source {
        AttachmentSource::Path(path) => {
            let bytes = tokio::fs::read(&path).await?;
            (path.display().to_string(), bytes)
        }
        AttachmentSource::Bytes { name, bytes } => (name, bytes),
    };
    let media_type = media_type(&bytes, Path::new(&name));
    tracing::debug!("Encoded {} bytes from {name} as {media_type}", bytes.len());
    Ok(data_uri(media_type, &bytes))
}

/// Build a base64 data URI.
#[must_use]
pub fn data_uri(media_type: &str, bytes: &[u8]) -> String {
    format!("data:{media_type};base64,{}", STANDARD.encode(bytes))
}

/// Infer an image media type from magic bytes, then the file extension.
#[must_use]
pub fn media_type(bytes: &[u8], path: &Path) -> &'static str {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        return "image/png";
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return "image/jpeg";
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return "image/gif";
    }
    if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return "image/webp";
    }

    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_completion_is_discarded() {
        let mut slot = AttachmentSlot::default();
        let first = slot.begin("a.png".to_string());
        let second = slot.begin("b.png".to_string());

        assert!(!slot.complete(first.id, "data:stale".to_string()));
        assert!(slot.is_loading());

        assert!(slot.complete(second.id, "data:fresh".to_string()));
        assert!(!slot.is_loading());
        assert_eq!(slot.current().and_then(Attachment::encoded_url), Some("data:fresh"));
    }

    #[test]
    fn test_completion_after_removal_is_discarded() {
        let mut slot = AttachmentSlot::default();
        let pending = slot.begin("a.png".to_string());
        assert!(slot.remove().is_some());
        assert!(!slot.complete(pending.id, "data:x".to_string()));
        assert!(slot.current().is_none());
    }

    #[test]
    fn test_fail_only_clears_matching_attachment() {
        let mut slot = AttachmentSlot::default();
        let old = slot.begin("a.png".to_string());
        let _new = slot.begin("b.png".to_string());
        assert!(!slot.fail(old.id));
        assert!(slot.current().is_some());
    }

    #[test]
    fn test_media_type_sniffing() {
        let png = b"\x89PNG\r\n\x1a\n....";
        assert_eq!(media_type(png, Path::new("x.bin")), "image/png");
        assert_eq!(media_type(&[0xFF, 0xD8, 0xFF, 0xE0], Path::new("x")), "image/jpeg");
        assert_eq!(media_type(b"RIFF\0\0\0\0WEBPVP8 ", Path::new("x")), "image/webp");
        assert_eq!(media_type(b"????", Path::new("photo.JPG")), "image/jpeg");
        assert_eq!(media_type(b"????", Path::new("notes")), "application/octet-stream");
    }

    #[test]
    fn test_data_uri() {
        assert_eq!(data_uri("image/png", b"hi"), "data:image/png;base64,aGk=");
    }

    #[tokio::test]
    async fn test_encode_in_memory_bytes() {
        let uri = encode(AttachmentSource::Bytes {
            name: "pic.gif".to_string(),
            bytes: b"GIF89a".to_vec(),
        })
        .await
        .unwrap();
        assert_eq!(uri, "data:image/gif;base64,R0lGODlh");
    }

    #[tokio::test]
    async fn test_encode_missing_file_fails() {
        let path = std::env::temp_dir().join(format!("postpilot-missing-{}.png", Uuid::new_v4()));
        assert!(encode(AttachmentSource::Path(path)).await.is_err());
    }
}
