//! Receive loops behind the destructive operations.
//!
//! The broker has no "settle by id" primitive, so a single message is found by
//! receiving batches under a lock until it shows up. Every message received
//! before the target keeps its incremented delivery count; it is not
//! abandoned explicitly and becomes available again once the scoped receiver
//! is disposed.

use crate::broker::{DeadLetterOptions, MessageReceiver, MessageSender, OutgoingMessage, ReceivedMessage};
use crate::common::ServiceBusResult;
use std::fmt;
use std::time::Duration;

/// Text the presentation layer shows before a delete or dead-letter.
pub const SCAN_WARNING: &str = "Deleting requires receiving all the messages up to the selected message to perform this action and this increases the DeliveryCount of the messages";

/// Identifies the message a scan is looking for. Every part that is set
/// must match.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageMatcher {
    message_id: Option<String>,
    sequence_number: Option<i64>,
}

impl MessageMatcher {
    pub fn by_id(message_id: impl Into<String>) -> Self {
        Self {
            message_id: Some(message_id.into()),
            sequence_number: None,
        }
    }

    pub fn by_sequence(sequence_number: i64) -> Self {
        Self {
            message_id: None,
            sequence_number: Some(sequence_number),
        }
    }

    /// Matches on both when the id is known, on the sequence number alone
    /// otherwise.
    pub fn by_id_and_sequence(message_id: Option<String>, sequence_number: i64) -> Self {
        Self {
            message_id,
            sequence_number: Some(sequence_number),
        }
    }

    pub fn matches(&self, message: &ReceivedMessage) -> bool {
        let id_matches = self
            .message_id
            .as_deref()
            .is_none_or(|id| message.message_id.as_deref() == Some(id));
        id_matches
            && self
                .sequence_number
                .is_none_or(|seq| seq == message.sequence_number)
    }
}

impl fmt::Display for MessageMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.message_id, self.sequence_number) {
            (Some(id), Some(seq)) => write!(f, "{id} (sequence {seq})"),
            (Some(id), None) => write!(f, "{id}"),
            (None, Some(seq)) => write!(f, "sequence {seq}"),
            (None, None) => write!(f, "<any>"),
        }
    }
}

/// What to do with the target once it is found.
#[derive(Debug, Clone)]
pub enum Settlement {
    Complete,
    DeadLetter(DeadLetterOptions),
}

/// Receives batches of `fetch_count` until `matcher` hits, settles that one
/// message and stops. Returns the number of messages settled (0 or 1).
///
/// An empty batch ends the scan without action.
pub async fn scan_and_settle(
    receiver: &mut dyn MessageReceiver,
    fetch_count: u32,
    max_wait: Duration,
    matcher: &MessageMatcher,
    settlement: Settlement,
) -> ServiceBusResult<u64> {
    let mut batches = 0usize;
    let mut skipped = 0usize;

    loop {
        let batch = receiver.receive_messages(fetch_count, Some(max_wait)).await?;
        if batch.is_empty() {
            log::info!(
                "Message {matcher} not found after scanning {batches} batch(es); {skipped} message(s) were redelivered"
            );
            return Ok(0);
        }
        batches += 1;

        match batch.iter().position(|m| matcher.matches(m)) {
            Some(index) => {
                let target = &batch[index];
                match settlement {
                    Settlement::Complete => receiver.complete_message(target).await?,
                    Settlement::DeadLetter(options) => {
                        receiver.dead_letter_message(target, options).await?
                    }
                }
                skipped += batch.len() - 1;
                if skipped > 0 {
                    log::warn!(
                        "Scan for {matcher} received {skipped} other message(s) in {batches} batch(es); their delivery count increased"
                    );
                }
                return Ok(1);
            }
            None => skipped += batch.len(),
        }
    }
}

/// Receives batches until one comes back empty (or the wait elapses),
/// forwarding clones of each batch to `forward_to` when given. Meant for
/// receive-and-delete receivers. Returns the number of messages drained.
pub async fn drain(
    receiver: &mut dyn MessageReceiver,
    mut forward_to: Option<&mut dyn MessageSender>,
    fetch_count: u32,
    max_wait: Duration,
) -> ServiceBusResult<u64> {
    let mut total = 0u64;
    loop {
        let batch = receiver.receive_messages(fetch_count, Some(max_wait)).await?;
        if batch.is_empty() {
            return Ok(total);
        }
        total += batch.len() as u64;

        if let Some(sender) = forward_to.as_deref_mut() {
            let clones: Vec<OutgoingMessage> =
                batch.iter().map(OutgoingMessage::clone_from_received).collect();
            sender.send_messages(clones).await?;
        }
        log::debug!("Drained batch of {} message(s), {total} so far", batch.len());
    }
}

/// Disposes a scoped handle and hands back the operation's result. A dispose
/// failure is logged and does not mask the outcome.
pub async fn release_receiver<T>(
    mut receiver: Box<dyn MessageReceiver>,
    path: &str,
    result: ServiceBusResult<T>,
) -> ServiceBusResult<T> {
    if let Err(e) = receiver.dispose().await {
        log::warn!("Failed to dispose receiver for {path}: {e}");
    }
    result
}

pub async fn release_sender<T>(
    mut sender: Box<dyn MessageSender>,
    path: &str,
    result: ServiceBusResult<T>,
) -> ServiceBusResult<T> {
    if let Err(e) = sender.dispose().await {
        log::warn!("Failed to dispose sender for {path}: {e}");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, seq: i64) -> ReceivedMessage {
        ReceivedMessage {
            message_id: Some(id.to_string()),
            sequence_number: seq,
            ..Default::default()
        }
    }

    #[test]
    fn id_matcher_ignores_sequence() {
        let matcher = MessageMatcher::by_id("a");
        assert!(matcher.matches(&message("a", 1)));
        assert!(matcher.matches(&message("a", 2)));
        assert!(!matcher.matches(&message("b", 1)));
    }

    #[test]
    fn id_and_sequence_matcher_requires_both() {
        let matcher = MessageMatcher::by_id_and_sequence(Some("a".into()), 2);
        assert!(!matcher.matches(&message("a", 1)));
        assert!(!matcher.matches(&message("b", 2)));
        assert!(matcher.matches(&message("a", 2)));
    }

    #[test]
    fn missing_id_falls_back_to_sequence() {
        let matcher = MessageMatcher::by_id_and_sequence(None, 7);
        let anonymous = ReceivedMessage {
            sequence_number: 7,
            ..Default::default()
        };
        assert!(matcher.matches(&anonymous));
        assert!(!matcher.matches(&message("a", 8)));
        assert_eq!(matcher, MessageMatcher::by_sequence(7));
        assert_eq!(matcher.to_string(), "sequence 7");
    }

    #[test]
    fn message_without_id_never_matches() {
        let matcher = MessageMatcher::by_id("");
        assert!(!matcher.matches(&ReceivedMessage::default()));
    }
}
