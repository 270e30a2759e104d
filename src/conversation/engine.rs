//! The conversation engine: single owner of history, locks, draft and attachment.
//!
//! All state sits behind one mutex that is never held across an await. Each
//! operation checks and flips its lock in one critical section, awaits the
//! store, then applies the result in another. Locks are released by drop
//! guards so every exit path, including cancellation, frees them.
//!
//! Observers subscribe to [`EngineEvent`]s; `send_ready` is recomputed after
//! every mutation and published only when it changes.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

use super::attachment::{self, Attachment, AttachmentId, AttachmentSlot, AttachmentSource};
use super::config::EngineConfig;
use super::decoder::records;
use super::error::{ConversationError, ConversationResult, ErrorKind};
use super::history::{History, LoadOutcome};
use super::scroll::{ScrollCoordinator, ScrollMetrics, ViewportState};
use super::store::{HttpMessageStore, MessageStore};
use super::streamer::{self, ReplySink, SendPhase};
use super::types::Message;

/// User-visible, dismissible notice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    /// Class of failure.
    pub kind: ErrorKind,
    /// Text to show.
    pub message: String,
}

impl Notice {
    fn from_error(err: &ConversationError) -> Self {
        let message = if err.is_retryable() {
            format!("Could not reach the server: {err}. Please try again.")
        } else {
            err.to_string()
        };
        Self {
            kind: err.kind(),
            message,
        }
    }
}

/// Change notifications published by the engine.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// An older page was merged at the front.
    HistoryPrepended {
        /// Messages added.
        count: usize,
    },
    /// A streamed message was appended.
    MessageAppended(Message),
    /// History is complete; no further loads will be issued.
    FullyLoaded,
    /// History was cleared on the store and locally.
    Cleared,
    /// Transient status replaced or cleared.
    StatusChanged(Option<String>),
    /// The submission gate flipped.
    SendReadyChanged(bool),
    /// A send started or finished.
    SendingChanged(bool),
    /// The pending attachment changed.
    AttachmentChanged(Option<Attachment>),
    /// The draft was replaced.
    DraftChanged(String),
    /// A notice was raised.
    Notice(Notice),
}

/// What an Enter key press should do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnterAction {
    /// Submit the draft.
    Submit,
    /// Insert a line break into the draft.
    InsertNewline,
    /// Nothing; the draft is not ready to send.
    Ignore,
}

/// Result of an accepted send.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SendReport {
    /// Status records seen.
    pub statuses: usize,
    /// Messages appended.
    pub messages: usize,
}

#[derive(Debug)]
struct EngineState {
    history: History,
    send: SendPhase,
    status: Option<String>,
    draft: String,
    attachment: AttachmentSlot,
    scroll: ScrollCoordinator,
    notice: Option<Notice>,
    /// Bumped whenever a load or send starts.
    generation: u64,
}

impl EngineState {
    fn send_ready(&self) -> bool {
        streamer::send_ready(&self.draft, &self.attachment, self.send)
    }

    fn set_status(&mut self, status: Option<String>, events: &mut Vec<EngineEvent>) {
        if self.status != status {
            self.status.clone_from(&status);
            events.push(EngineEvent::StatusChanged(status));
        }
    }
}

struct Inner {
    store: Arc<dyn MessageStore>,
    state: Mutex<EngineState>,
    events: broadcast::Sender<EngineEvent>,
}

/// Cheaply cloneable handle to one conversation.
#[derive(Clone)]
pub struct ConversationEngine {
    inner: Arc<Inner>,
}

impl ConversationEngine {
    /// Create an engine over any store.
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, config: &EngineConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let state = EngineState {
            history: History::default(),
            send: SendPhase::Idle,
            status: None,
            draft: String::new(),
            attachment: AttachmentSlot::default(),
            scroll: ScrollCoordinator::new(config.scroll),
            notice: None,
            generation: 0,
        };
        Self {
            inner: Arc::new(Inner {
                store,
                state: Mutex::new(state),
                events,
            }),
        }
    }

    /// Create an engine talking to the HTTP store described by `config`.
    ///
    /// # Errors
    /// Returns an error if the store client cannot be built.
    pub fn connect(config: &EngineConfig, token: impl Into<String>) -> ConversationResult<Self> {
        let store = HttpMessageStore::new(config, token)?;
        Ok(Self::new(Arc::new(store), config))
    }

    /// Subscribe to change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one atomic mutation and publish its events before unlocking.
    ///
    /// Event order matches state order across threads.
    fn update<R>(&self, f: impl FnOnce(&mut EngineState, &mut Vec<EngineEvent>) -> R) -> R {
        let mut events = Vec::new();
        let mut state = self.lock();
        let was_ready = state.send_ready();
        let result = f(&mut *state, &mut events);
        let ready = state.send_ready();
        if ready != was_ready {
            events.push(EngineEvent::SendReadyChanged(ready));
        }
        for event in events {
            // no subscribers is fine
            let _ = self.inner.events.send(event);
        }
        drop(state);
        result
    }

    fn raise(&self, err: &ConversationError) {
        let notice = Notice::from_error(err);
        tracing::warn!("{}", notice.message);
        self.update(|state, events| {
            state.notice = Some(notice.clone());
            events.push(EngineEvent::Notice(notice));
        });
    }

    // ----- draft and readiness -----

    /// Replace the draft text.
    pub fn set_draft(&self, text: impl Into<String>) {
        let text = text.into();
        self.update(|state, events| {
            if state.draft != text {
                state.draft.clone_from(&text);
                events.push(EngineEvent::DraftChanged(text));
            }
        });
    }

    /// Current draft text.
    #[must_use]
    pub fn draft(&self) -> String {
        self.lock().draft.clone()
    }

    /// Whether submission is currently allowed.
    #[must_use]
    pub fn send_ready(&self) -> bool {
        self.lock().send_ready()
    }

    /// Decide what Enter does; Shift+Enter always breaks the line.
    #[must_use]
    pub fn enter_action(&self, shift: bool) -> EnterAction {
        if shift {
            EnterAction::InsertNewline
        } else if self.send_ready() {
            EnterAction::Submit
        } else {
            EnterAction::Ignore
        }
    }

    // ----- read-only views -----

    /// Snapshot of the history in arrival order.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.lock().history.iter().cloned().collect()
    }

    /// Identifier of the oldest held message.
    #[must_use]
    pub fn cursor(&self) -> Option<String> {
        self.lock().history.cursor().map(str::to_string)
    }

    /// Whether an empty history page has been seen.
    #[must_use]
    pub fn is_fully_loaded(&self) -> bool {
        self.lock().history.is_fully_loaded()
    }

    /// Whether a history fetch is outstanding.
    #[must_use]
    pub fn is_loading_history(&self) -> bool {
        self.lock().history.is_loading()
    }

    /// Whether a reply is streaming.
    #[must_use]
    pub fn is_sending(&self) -> bool {
        self.lock().send == SendPhase::InFlight
    }

    /// Current transient status.
    #[must_use]
    pub fn status(&self) -> Option<String> {
        self.lock().status.clone()
    }

    /// Pending attachment.
    #[must_use]
    pub fn attachment(&self) -> Option<Attachment> {
        self.lock().attachment.current().cloned()
    }

    /// Latest notice, until dismissed.
    #[must_use]
    pub fn notice(&self) -> Option<Notice> {
        self.lock().notice.clone()
    }

    /// Dismiss the current notice.
    pub fn dismiss_notice(&self) {
        self.update(|state, _| state.notice = None);
    }

    // ----- attachment -----

    /// Select an attachment and start encoding it in the background.
    ///
    /// Returns immediately with the loading handle. Replaces any previous
    /// attachment; a late result for the replaced one is dropped.
    /// Outside a Tokio runtime the attachment is dropped again and a
    /// configuration notice is raised.
    pub fn select_attachment(&self, source: AttachmentSource) -> Attachment {
        let handle = self.update(|state, events| {
            let handle = state.attachment.begin(source.name());
            events.push(EngineEvent::AttachmentChanged(Some(handle.clone())));
            handle
        });

        let id = handle.id;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.finish_encoding(
                id,
                Err(ConversationError::Config(
                    "attachment encoding needs a Tokio runtime".to_string(),
                )),
            );
            return handle;
        };
        let engine = self.clone();
        runtime.spawn(async move {
            let result = attachment::encode(source).await;
            engine.finish_encoding(id, result);
        });
        handle
    }

    fn finish_encoding(&self, id: AttachmentId, result: ConversationResult<String>) {
        match result {
            Ok(encoded_url) => self.update(|state, events| {
                if state.attachment.complete(id, encoded_url) {
                    events.push(EngineEvent::AttachmentChanged(state.attachment.current().cloned()));
                }
            }),
            Err(err) => {
                let applied = self.update(|state, events| {
                    let applied = state.attachment.fail(id);
                    if applied {
                        events.push(EngineEvent::AttachmentChanged(None));
                    }
                    applied
                });
                if applied {
                    self.raise(&err);
                }
            }
        }
    }

    /// Discard the pending attachment.
    pub fn remove_attachment(&self) {
        self.update(|state, events| {
            if state.attachment.remove().is_some() {
                events.push(EngineEvent::AttachmentChanged(None));
            }
        });
    }

    // ----- history -----

    /// Fetch the page before the cursor and prepend it.
    ///
    /// Skips silently while a load is outstanding or once history is complete.
    ///
    /// # Errors
    /// Returns a connectivity error (also raised as a notice); cursor and
    /// history are left as they were.
    pub async fn load_older(&self) -> ConversationResult<LoadOutcome> {
        let ticket = self.update(|state, _| {
            let ticket = state.history.begin_load();
            if ticket.is_some() {
                state.generation = state.generation.wrapping_add(1);
            }
            ticket
        });
        let Some(ticket) = ticket else {
            return Ok(LoadOutcome::Skipped);
        };
        let _lock = HistoryLoadGuard { engine: self };

        match self.inner.store.fetch_history(ticket.before).await {
            Ok(page) => Ok(self.update(|state, events| {
                let outcome = state.history.apply_page(page);
                match outcome {
                    LoadOutcome::Loaded { added } => {
                        events.push(EngineEvent::HistoryPrepended { count: added });
                    }
                    LoadOutcome::FullyLoaded => events.push(EngineEvent::FullyLoaded),
                    LoadOutcome::Skipped => {}
                }
                outcome
            })),
            Err(err) => {
                self.raise(&err);
                Err(err)
            }
        }
    }

    // ----- send -----

    /// Send the draft and attachment, streaming the reply into history.
    ///
    /// # Errors
    /// Validation errors when the send is not admitted (raised as a notice,
    /// except `SendInFlight` which is a silent no-op), or a connectivity error
    /// if the request or the stream fails.
    pub async fn send(&self) -> ConversationResult<SendReport> {
        let admitted = self.update(|state, events| {
            let had_attachment = state.attachment.current().is_some();
            let request =
                streamer::admit(&mut state.draft, &mut state.attachment, &mut state.send)?;
            state.generation = state.generation.wrapping_add(1);
            events.push(EngineEvent::DraftChanged(String::new()));
            if had_attachment {
                events.push(EngineEvent::AttachmentChanged(None));
            }
            events.push(EngineEvent::SendingChanged(true));
            state.set_status(None, events);
            Ok(request)
        });
        let request = match admitted {
            Ok(request) => request,
            Err(ConversationError::SendInFlight) => return Err(ConversationError::SendInFlight),
            Err(err) => {
                self.raise(&err);
                return Err(err);
            }
        };
        let _lock = SendGuard { engine: self };
        tracing::debug!(
            "Sending {} chars, image: {}",
            request.text.len(),
            request.image_uri.is_some()
        );

        let body = match self.inner.store.send(request).await {
            Ok(body) => body,
            Err(err) => {
                self.raise(&err);
                return Err(err);
            }
        };

        let summary = streamer::consume(records(body), self).await;
        if let Some(err) = summary.error {
            self.raise(&err);
            return Err(err);
        }
        Ok(SendReport {
            statuses: summary.statuses,
            messages: summary.messages,
        })
    }

    // ----- clear -----

    /// Delete the conversation on the store and reset local history.
    ///
    /// # Errors
    /// `Busy` while a load or send is outstanding; otherwise a connectivity
    /// error, in which case local history is untouched.
    pub async fn clear(&self) -> ConversationResult<()> {
        let started = {
            let state = self.lock();
            (!state.history.is_loading() && state.send == SendPhase::Idle).then_some(state.generation)
        };
        let Some(started) = started else {
            return Err(ConversationError::Busy("a load or send is in flight"));
        };
        if let Err(err) = self.inner.store.clear().await {
            self.raise(&err);
            return Err(err);
        }
        self.update(|state, events| {
            if state.generation != started {
                // a load or send started during the request; its messages stay
                tracing::warn!("Conversation cleared remotely while busy; keeping local history");
                return;
            }
            state.history.reset();
            events.push(EngineEvent::Cleared);
        });
        Ok(())
    }

    // ----- viewport -----

    /// Record new scroll metrics without loading.
    pub fn observe_viewport(&self, metrics: ScrollMetrics) -> ViewportState {
        self.lock().scroll.observe(metrics)
    }

    /// Record new scroll metrics and load older history when near the top.
    ///
    /// # Errors
    /// Returns the error of the triggered load, if any.
    pub async fn on_viewport_changed(&self, metrics: ScrollMetrics) -> ConversationResult<LoadOutcome> {
        if self.observe_viewport(metrics).near_top {
            self.load_older().await
        } else {
            Ok(LoadOutcome::Skipped)
        }
    }

    /// Where to scroll after history or the draft's height changed.
    #[must_use]
    pub fn follow(&self, metrics: ScrollMetrics) -> Option<f64> {
        self.lock().scroll.follow(metrics)
    }
}

impl ReplySink for ConversationEngine {
    fn on_status(&self, status: String) {
        self.update(|state, events| state.set_status(Some(status), events));
    }

    fn on_message(&self, message: Message) {
        self.update(|state, events| {
            if state.history.append(message.clone()) {
                events.push(EngineEvent::MessageAppended(message));
            }
        });
    }
}

/// Releases the history load lock on drop.
struct HistoryLoadGuard<'a> {
    engine: &'a ConversationEngine,
}

impl Drop for HistoryLoadGuard<'_> {
    fn drop(&mut self) {
        self.engine.update(|state, _| state.history.release_load());
    }
}

/// Ends the send on drop: status cleared, lock released.
struct SendGuard<'a> {
    engine: &'a ConversationEngine,
}

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        self.engine.update(|state, events| {
            state.set_status(None, events);
            if state.send == SendPhase::InFlight {
                state.send = SendPhase::Idle;
                events.push(EngineEvent::SendingChanged(false));
            }
        });
    }
}
