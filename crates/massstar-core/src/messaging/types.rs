use crate::domain::{ChannelId, MessageId, MessageRef, UserId};

/// Cross-backend inbound event model.
///
/// Backend-specific payloads are parsed into this shape by the adapter; anything
/// the adapter cannot resolve (missing actor, unknown channel) never gets here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundEvent {
    MessageCreated(MessageCreated),
    Reaction(ReactionEvent),
}

impl InboundEvent {
    pub fn message(&self) -> MessageRef {
        match self {
            InboundEvent::MessageCreated(m) => m.message(),
            InboundEvent::Reaction(r) => r.message(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageCreated {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

impl MessageCreated {
    pub fn message(&self) -> MessageRef {
        MessageRef {
            channel_id: self.channel_id,
            message_id: self.message_id,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReactionKind {
    Added,
    Removed,
}

impl ReactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReactionKind::Added => "added",
            ReactionKind::Removed => "removed",
        }
    }
}

/// A reaction being added to or removed from a message. Transient, one per callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactionEvent {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub emoji: String,
    pub actor_id: UserId,
    pub kind: ReactionKind,
}

impl ReactionEvent {
    pub fn message(&self) -> MessageRef {
        MessageRef {
            channel_id: self.channel_id,
            message_id: self.message_id,
        }
    }
}
