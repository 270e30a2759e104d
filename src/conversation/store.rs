//! Remote message store access.

use std::future::Future;
use std::pin::Pin;

use futures::stream::{Stream, StreamExt};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use url::Url;

use super::config::EngineConfig;
use super::decoder::transport_error;
use super::error::{ConversationError, ConversationResult};
use super::types::{Message, SendRequest};

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Raw response body of a send, as byte chunks in arrival order.
pub type ByteStream = Pin<Box<dyn Stream<Item = ConversationResult<Vec<u8>>> + Send>>;

/// Remote store holding the authoritative conversation.
pub trait MessageStore: Send + Sync {
    /// Fetch one page of history strictly older than `before`, oldest first.
    ///
    /// `None` requests the most recent page.
    ///
    /// # Errors
    /// Returns an error on transport failure or a non-success status.
    fn fetch_history(&self, before: Option<String>) -> StoreFuture<'_, ConversationResult<Vec<Message>>>;

    /// Post a message and return the streamed reply body.
    ///
    /// # Errors
    /// Returns an error if the request fails before streaming starts.
    fn send(&self, request: SendRequest) -> StoreFuture<'_, ConversationResult<ByteStream>>;

    /// Delete the whole conversation.
    ///
    /// # Errors
    /// Returns an error on transport failure or a non-success status.
    fn clear(&self) -> StoreFuture<'_, ConversationResult<()>>;
}

/// [`MessageStore`] over HTTP with a bearer credential.
pub struct HttpMessageStore {
    client: reqwest::Client,
    token: String,
    history_url: Url,
    send_url: Url,
    clear_url: Url,
    page_size: usize,
}

impl HttpMessageStore {
    /// Create a store client.
    ///
    /// The bearer token is owned by the caller's session and only forwarded.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the HTTP client cannot be created.
    pub fn new(config: &EngineConfig, token: impl Into<String>) -> ConversationResult<Self> {
        config.validate()?;
        Ok(Self {
            client: Self::build_client(config)?,
            token: token.into(),
            history_url: config.endpoint(&config.history_path)?,
            send_url: config.endpoint(&config.send_path)?,
            clear_url: config.endpoint(&config.clear_path)?,
            page_size: config.page_size,
        })
    }

    fn build_client(config: &EngineConfig) -> ConversationResult<reqwest::Client> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, application/x-ndjson"));

        let mut builder = reqwest::Client::builder().default_headers(headers).gzip(true);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        builder
            .build()
            .map_err(|e| ConversationError::HttpClient(e.to_string()))
    }

    fn check_status(status: StatusCode) -> ConversationResult<()> {
        if status == StatusCode::OK {
            Ok(())
        } else {
            Err(ConversationError::HttpStatus(status.as_u16()))
        }
    }
}

impl MessageStore for HttpMessageStore {
    fn fetch_history(&self, before: Option<String>) -> StoreFuture<'_, ConversationResult<Vec<Message>>> {
        Box::pin(async move {
            let mut query = vec![("limit", self.page_size.to_string())];
            if let Some(before) = before {
                query.push(("before", before));
            }
            let response = self
                .client
                .get(self.history_url.clone())
                .bearer_auth(&self.token)
                .query(&query)
                .send()
                .await?;
            Self::check_status(response.status())?;
            let page = response.json::<Vec<Message>>().await?;
            tracing::debug!("Fetched history page of {} messages", page.len());
            Ok(page)
        })
    }

    fn send(&self, request: SendRequest) -> StoreFuture<'_, ConversationResult<ByteStream>> {
        Box::pin(async move {
            let response = self
                .client
                .post(self.send_url.clone())
                .bearer_auth(&self.token)
                .json(&request)
                .send()
                .await?;
            Self::check_status(response.status())?;
            let body = response
                .bytes_stream()
                .map(|chunk| chunk.map(|b| b.to_vec()).map_err(transport_error));
            Ok(Box::pin(body) as ByteStream)
        })
    }

    fn clear(&self) -> StoreFuture<'_, ConversationResult<()>> {
        Box::pin(async move {
            let response = self
                .client
                .post(self.clear_url.clone())
                .bearer_auth(&self.token)
                .send()
                .await?;
            Self::check_status(response.status())
        })
    }
}
