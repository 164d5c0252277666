use serde::{Deserialize, Serialize};

/// Suffix that addresses the dead-letter sub-queue of a queue or subscription.
pub const DEAD_LETTER_SUFFIX: &str = "/$DeadLetterQueue";

const SUBSCRIPTIONS_SEGMENT: &str = "/Subscriptions/";

/// Whether a path addresses the main entity or its dead-letter sub-queue.
///
/// ```no_run
/// use server::model::QueueType;
///
/// assert_eq!(QueueType::from_path("orders"), QueueType::Main);
/// assert_eq!(QueueType::from_path("orders/$DeadLetterQueue"), QueueType::DeadLetter);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueType {
    Main,
    DeadLetter,
}

impl QueueType {
    pub fn from_path(path: &str) -> Self {
        if split_dead_letter(path).1 {
            QueueType::DeadLetter
        } else {
            QueueType::Main
        }
    }

    pub fn from_dlq_flag(is_dlq: bool) -> Self {
        if is_dlq {
            QueueType::DeadLetter
        } else {
            QueueType::Main
        }
    }

    pub fn is_dead_letter(self) -> bool {
        self == QueueType::DeadLetter
    }
}

/// Splits a path into its owning entity path and whether it addresses the
/// dead-letter sub-queue. The suffix is matched case-insensitively.
pub fn split_dead_letter(path: &str) -> (&str, bool) {
    let Some(split) = path.len().checked_sub(DEAD_LETTER_SUFFIX.len()) else {
        return (path, false);
    };
    match path.split_at_checked(split) {
        Some((head, tail)) if tail.eq_ignore_ascii_case(DEAD_LETTER_SUFFIX) => (head, true),
        _ => (path, false),
    }
}

/// A message-holding entity: a queue, or a subscription owned by a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityPath {
    Queue { name: String },
    Subscription { topic: String, name: String },
}

impl EntityPath {
    pub fn queue(name: impl Into<String>) -> Self {
        EntityPath::Queue { name: name.into() }
    }

    pub fn subscription(topic: impl Into<String>, name: impl Into<String>) -> Self {
        EntityPath::Subscription {
            topic: topic.into(),
            name: name.into(),
        }
    }

    /// Path receivers use for the main entity.
    pub fn receive_path(&self) -> String {
        match self {
            EntityPath::Queue { name } => name.clone(),
            EntityPath::Subscription { topic, name } => {
                format!("{topic}{SUBSCRIPTIONS_SEGMENT}{name}")
            }
        }
    }

    pub fn dead_letter_path(&self) -> String {
        format!("{}{DEAD_LETTER_SUFFIX}", self.receive_path())
    }

    pub fn path_for(&self, queue_type: QueueType) -> String {
        match queue_type {
            QueueType::Main => self.receive_path(),
            QueueType::DeadLetter => self.dead_letter_path(),
        }
    }

    /// Path senders use: the queue itself, or the owning topic.
    pub fn send_path(&self) -> &str {
        match self {
            EntityPath::Queue { name } => name,
            EntityPath::Subscription { topic, .. } => topic,
        }
    }

    /// Parses a receive path (without the dead-letter suffix).
    pub fn parse(path: &str) -> Self {
        match find_ignore_case(path, SUBSCRIPTIONS_SEGMENT) {
            Some(idx) => EntityPath::Subscription {
                topic: path[..idx].to_string(),
                name: path[idx + SUBSCRIPTIONS_SEGMENT.len()..].to_string(),
            },
            None => EntityPath::Queue {
                name: path.to_string(),
            },
        }
    }
}

impl std::fmt::Display for EntityPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.receive_path())
    }
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .to_ascii_lowercase()
        .find(&needle.to_ascii_lowercase())
}
