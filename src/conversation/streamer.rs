//! Send admission and consumption of the streamed reply.

use futures::stream::{Stream, StreamExt};

use super::attachment::AttachmentSlot;
use super::error::{ConversationError, ConversationResult};
use super::types::{Message, SendRequest, StreamRecord};

/// Whether a send is outstanding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SendPhase {
    /// Ready to accept a send.
    #[default]
    Idle,
    /// A reply is streaming.
    InFlight,
}

/// The gate on submission.
///
/// Text is present or an encoded attachment is attached, no send is
/// outstanding, and no attachment is still encoding.
#[must_use]
pub fn send_ready(draft: &str, slot: &AttachmentSlot, phase: SendPhase) -> bool {
    (!draft.trim().is_empty() || slot.is_ready()) && phase == SendPhase::Idle && !slot.is_loading()
}

/// Validate a submission and, if accepted, capture and clear the draft and attachment.
///
/// On success the phase is `InFlight`.
///
/// # Errors
/// `SendInFlight`, `AttachmentEncoding` or `EmptySubmission`; nothing is
/// modified in those cases.
pub fn admit(draft: &mut String, slot: &mut AttachmentSlot, phase: &mut SendPhase) -> ConversationResult<SendRequest> {
    if *phase == SendPhase::InFlight {
        return Err(ConversationError::SendInFlight);
    }
    if slot.is_loading() {
        return Err(ConversationError::AttachmentEncoding);
    }
    if draft.trim().is_empty() && !slot.is_ready() {
        return Err(ConversationError::EmptySubmission);
    }

    let image_uri = slot
        .remove()
        .and_then(|attachment| attachment.encoded_url().map(str::to_string));
    *phase = SendPhase::InFlight;
    Ok(SendRequest {
        text: std::mem::take(draft),
        image_uri,
    })
}

/// Receives decoded records as they arrive.
pub trait ReplySink {
    /// Replace the transient status.
    fn on_status(&self, status: String);
    /// Append a finished message.
    fn on_message(&self, message: Message);
}

/// What a consumed reply stream delivered.
#[derive(Debug, Default)]
pub struct StreamSummary {
    /// Status records seen.
    pub statuses: usize,
    /// Message records seen.
    pub messages: usize,
    /// Failure that ended the stream early.
    pub error: Option<ConversationError>,
}

/// Drain a record stream into `sink`, in arrival order.
///
/// Stops at the first error, which is kept in the summary; records already
/// delivered stay delivered.
pub async fn consume<S, K>(records: S, sink: &K) -> StreamSummary
where
    S: Stream<Item = ConversationResult<StreamRecord>>,
    K: ReplySink + ?Sized,
{
    let mut summary = StreamSummary::default();
    let mut records = std::pin::pin!(records);
    while let Some(record) = records.next().await {
        match record {
            Ok(StreamRecord::Status(status)) => {
                summary.statuses += 1;
                sink.on_status(status);
            }
            Ok(StreamRecord::Message(message)) => {
                summary.messages += 1;
                sink.on_message(message);
            }
            Err(err) => {
                tracing::warn!("Reply stream aborted: {err}");
                summary.error = Some(err);
                break;
            }
        }
    }
    summary
}
