//! Domain model: connections, the entity arena, entity paths and the
//! display projection of broker messages.

pub mod connection;
pub mod entities;
pub mod message;
pub mod path;
pub mod topology;

pub use connection::{ConnectionDescriptor, ConnectionString, CredentialMode};
pub use entities::{
    EntityTree, MessageCollection, Queue, QueueId, Resource, ResourceId, Subscription,
    SubscriptionId, Topic, TopicId,
};
pub use message::{BodyData, Message};
pub use path::{DEAD_LETTER_SUFFIX, EntityPath, QueueType, split_dead_letter};
pub use topology::{QueueNode, ResourceSnapshot, SubscriptionNode, TopicNode};
