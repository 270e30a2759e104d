//! Ordered message history with a backward pagination cursor.

use std::collections::{HashSet, VecDeque};

use super::types::Message;

/// Pagination state of the history.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HistoryPhase {
    /// No fetch outstanding; older pages may exist.
    #[default]
    Idle,
    /// One fetch is outstanding.
    Loading,
    /// A fetch returned an empty page; nothing older exists.
    FullyLoaded,
}

/// Permission to issue one history fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadTicket {
    /// Identifier of the oldest held message, or `None` for the most recent page.
    pub before: Option<String>,
}

/// Result of a `load_older` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Not issued: a load was already in flight or history is complete.
    Skipped,
    /// A page was merged; `added` excludes entries already held.
    Loaded {
        /// Messages prepended.
        added: usize,
    },
    /// The store returned an empty page.
    FullyLoaded,
}

/// Arrival-ordered messages plus the backward cursor.
#[derive(Debug, Default)]
pub struct History {
    messages: VecDeque<Message>,
    known_ids: HashSet<String>,
    cursor: Option<String>,
    phase: HistoryPhase,
}

impl History {
    /// Acquire the load lock if a fetch is allowed.
    pub fn begin_load(&mut self) -> Option<LoadTicket> {
        if self.phase != HistoryPhase::Idle {
            tracing::debug!("History load skipped ({:?})", self.phase);
            return None;
        }
        self.phase = HistoryPhase::Loading;
        Some(LoadTicket {
            before: self.cursor.clone(),
        })
    }

    /// Merge a fetched page (oldest first) in front of the held messages.
    ///
    /// The cursor moves to the first, oldest entry of the page. An empty page
    /// marks the history complete for good.
    pub fn apply_page(&mut self, page: Vec<Message>) -> LoadOutcome {
        let Some(oldest) = page.first() else {
            self.phase = HistoryPhase::FullyLoaded;
            tracing::debug!("History fully loaded");
            return LoadOutcome::FullyLoaded;
        };
        self.cursor = Some(oldest.id.clone());
        self.phase = HistoryPhase::Idle;

        let mut added = 0;
        for message in page.into_iter().rev() {
            if self.known_ids.insert(message.id.clone()) {
                self.messages.push_front(message);
                added += 1;
            }
        }
        tracing::debug!("Prepended {added} messages, cursor {:?}", self.cursor);
        LoadOutcome::Loaded { added }
    }

    /// Release the load lock without touching cursor or messages.
    pub fn release_load(&mut self) {
        if self.phase == HistoryPhase::Loading {
            self.phase = HistoryPhase::Idle;
        }
    }

    /// Append a streamed message. Returns `false` if it was already held.
    pub fn append(&mut self, message: Message) -> bool {
        if !self.known_ids.insert(message.id.clone()) {
            tracing::debug!("Ignoring duplicate message {}", message.id);
            return false;
        }
        self.messages.push_back(message);
        true
    }

    /// Forget everything, including the cursor and completion flag.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Messages in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Number of held messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether no messages are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Current cursor.
    #[must_use]
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> HistoryPhase {
        self.phase
    }

    /// Whether a fetch is outstanding.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.phase == HistoryPhase::Loading
    }

    /// Whether an empty page has been seen.
    #[must_use]
    pub fn is_fully_loaded(&self) -> bool {
        self.phase == HistoryPhase::FullyLoaded
    }
}
