//! Configuration for the conversation engine and its remote store.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use super::error::{ConversationError, ConversationResult};
use super::scroll::ScrollPolicy;

/// Environment variable overriding the store base URL.
pub const BASE_URL_ENV: &str = "POSTPILOT_BASE_URL";
/// Environment variable overriding the history page size.
pub const PAGE_SIZE_ENV: &str = "POSTPILOT_PAGE_SIZE";
/// Environment variable enabling a request timeout, in seconds.
pub const TIMEOUT_ENV: &str = "POSTPILOT_TIMEOUT_SECS";

/// Configuration for a conversation engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base URL of the remote message store.
    pub base_url: String,
    /// Path of the history endpoint.
    pub history_path: String,
    /// Path of the send endpoint.
    pub send_path: String,
    /// Path of the clear endpoint.
    pub clear_path: String,
    /// Messages requested per history page.
    pub page_size: usize,
    /// Whole-request timeout. `None` waits indefinitely.
    #[serde(default, with = "option_duration_serde")]
    pub request_timeout: Option<Duration>,
    /// Connection timeout. `None` waits indefinitely.
    #[serde(default, with = "option_duration_serde")]
    pub connect_timeout: Option<Duration>,
    /// Buffered engine events per subscriber before lagging.
    pub event_capacity: usize,
    /// Autoload and auto-scroll thresholds.
    pub scroll: ScrollPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            history_path: "/api/chat/messages".to_string(),
            send_path: "/api/chat/send".to_string(),
            clear_path: "/api/chat/clear".to_string(),
            page_size: 50,
            request_timeout: None,
            connect_timeout: None,
            event_capacity: 256,
            scroll: ScrollPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Create a new config with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `POSTPILOT_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            config.base_url = url;
        }
        if let Some(size) = std::env::var(PAGE_SIZE_ENV).ok().and_then(|v| v.parse().ok()) {
            config.page_size = size;
        }
        if let Some(secs) = std::env::var(TIMEOUT_ENV).ok().and_then(|v| v.parse().ok()) {
            config.request_timeout = Some(Duration::from_secs(secs));
        }
        config
    }

    /// Set the base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the history page size.
    #[must_use]
    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set a request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the scroll thresholds.
    #[must_use]
    pub const fn with_scroll_policy(mut self, policy: ScrollPolicy) -> Self {
        self.scroll = policy;
        self
    }

    /// Resolve an endpoint path below the base URL, keeping any base path prefix.
    ///
    /// # Errors
    /// Returns an error if the base URL or the path is invalid.
    pub fn endpoint(&self, path: &str) -> ConversationResult<Url> {
        let mut base = Url::parse(&self.base_url)?;
        if !base.path().ends_with('/') {
            let prefix = format!("{}/", base.path());
            base.set_path(&prefix);
        }
        Ok(base.join(path.trim_start_matches('/'))?)
    }

    /// Check values that would make the engine misbehave.
    ///
    /// # Errors
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> ConversationResult<()> {
        if self.page_size == 0 {
            return Err(ConversationError::Config("page_size must be positive".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(ConversationError::Config("event_capacity must be positive".to_string()));
        }
        if self.scroll.near_top_factor < 0.0 || self.scroll.scroll_lock_factor < 0.0 {
            return Err(ConversationError::Config("scroll factors must not be negative".to_string()));
        }
        Url::parse(&self.base_url)?;
        Ok(())
    }
}

/// Serde module for optional durations, stored as whole seconds.
mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_secs()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
