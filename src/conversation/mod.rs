//! Conversation synchronization engine for the posting assistant.
//!
//! Reconciles a locally held, arrival-ordered message history with a remote
//! store while three things may be happening at once:
//! - backward pagination as the user scrolls up
//! - a single in-flight send whose reply streams in as NDJSON records
//! - encoding of an image attachment that must finish before sending
//!
//! [`ConversationEngine`] owns all of that state; the submodules hold the
//! pieces it composes.

pub mod attachment;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod history;
pub mod scroll;
pub mod store;
pub mod streamer;
pub mod types;

pub use attachment::{Attachment, AttachmentId, AttachmentSource, AttachmentState};
pub use config::EngineConfig;
pub use decoder::{RecordDecoder, records};
pub use engine::{ConversationEngine, EngineEvent, EnterAction, Notice, SendReport};
pub use error::{ConversationError, ConversationResult, ErrorKind};
pub use history::LoadOutcome;
pub use scroll::{ScrollCoordinator, ScrollMetrics, ScrollPolicy, ViewportState};
pub use store::{ByteStream, HttpMessageStore, MessageStore, StoreFuture};
pub use types::{ContentType, Message, MessageBody, Role, SendRequest, StreamRecord};
