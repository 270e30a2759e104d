//! In-memory conversation shared across all request handlers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::RwLock;

use crate::conversation::{Message, Role};

/// Page size used when the client does not ask for one.
pub const DEFAULT_PAGE_LIMIT: usize = 50;

/// Shared application state.
pub struct AppState {
    messages: RwLock<Vec<Message>>,
    next_id: AtomicU64,
    /// Largest page a client may request.
    pub max_page_limit: usize,
}

impl AppState {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            messages: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            max_page_limit: 200,
        })
    }

    /// Fixed-width hex ids, so string order matches creation order.
    fn mint_id(&self) -> String {
        format!("{:024x}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Store a text message.
    pub async fn push_text(&self, role: Role, text: &str) -> Message {
        let message = Message::text(self.mint_id(), role, text, Utc::now());
        self.messages.write().await.push(message.clone());
        message
    }

    /// Store an image message.
    pub async fn push_image(&self, role: Role, uri: &str) -> Message {
        let message = Message::image(self.mint_id(), role, uri, Utc::now());
        self.messages.write().await.push(message.clone());
        message
    }

    /// Up to `limit` messages strictly older than `before`, oldest first.
    pub async fn page(&self, before: Option<&str>, limit: usize) -> Vec<Message> {
        let messages = self.messages.read().await;
        let end = before.map_or(messages.len(), |cursor| {
            messages.partition_point(|m| m.id.as_str() < cursor)
        });
        let start = end.saturating_sub(limit);
        messages[start..end].to_vec()
    }

    /// Remove every message.
    pub async fn clear(&self) {
        self.messages.write().await.clear();
    }

    /// Number of stored messages.
    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }
}

/// Agent reply for a submission.
#[must_use]
pub fn draft_reply(text: &str, has_image: bool) -> String {
    let text = text.trim();
    match (text.is_empty(), has_image) {
        (true, _) => "Here's a draft post for your image. Want me to publish it?".to_string(),
        (false, true) => format!("Here's a draft post with your image:\n\n{text}\n\nWant me to publish it?"),
        (false, false) => format!("Here's a draft post:\n\n{text}\n\nWant me to publish it?"),
    }
}
