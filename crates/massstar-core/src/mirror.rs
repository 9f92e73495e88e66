//! Trigger → mirror reaction transition.
//!
//! The mirror emoji's presence is derived from the latest trigger event alone. Adding an
//! already-present reaction or removing an absent one is a no-op at the backend, so no
//! per-message state is kept here.

use crate::{
    messaging::{
        port::SessionPort,
        types::{InboundEvent, ReactionEvent, ReactionKind},
    },
    Error, Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MirrorAction {
    Added,
    Removed,
}

#[derive(Clone, Debug)]
pub struct ReactionMirror {
    trigger: String,
    mirror: String,
}

impl ReactionMirror {
    pub fn new(trigger: impl Into<String>, mirror: impl Into<String>) -> Result<Self> {
        let trigger = trigger.into();
        let mirror = mirror.into();
        if normalize_emoji(&trigger).is_empty() || normalize_emoji(&mirror).is_empty() {
            return Err(Error::Config(
                "trigger and mirror emoji must not be empty".to_string(),
            ));
        }
        if normalize_emoji(&trigger) == normalize_emoji(&mirror) {
            return Err(Error::Config(format!(
                "trigger and mirror emoji must differ (both are {trigger:?})"
            )));
        }
        Ok(Self {
            trigger: trigger.trim().to_string(),
            mirror: mirror.trim().to_string(),
        })
    }

    pub fn trigger(&self) -> &str {
        &self.trigger
    }

    pub fn mirror(&self) -> &str {
        &self.mirror
    }

    pub fn is_trigger(&self, emoji: &str) -> bool {
        normalize_emoji(emoji) == normalize_emoji(&self.trigger)
    }

    /// Apply one novel event. Returns the action taken, or `None` when the event
    /// needs no outbound call.
    ///
    /// Outbound failures are returned to the caller, which drops them: retrying a toggle
    /// against a possibly stale message risks oscillation.
    pub async fn apply(
        &self,
        session: &dyn SessionPort,
        event: &InboundEvent,
    ) -> Result<Option<MirrorAction>> {
        match event {
            InboundEvent::MessageCreated(_) => Ok(None),
            InboundEvent::Reaction(r) if self.is_trigger(&r.emoji) => {
                self.mirror_reaction(session, r).await.map(Some)
            }
            InboundEvent::Reaction(_) => Ok(None),
        }
    }

    async fn mirror_reaction(
        &self,
        session: &dyn SessionPort,
        r: &ReactionEvent,
    ) -> Result<MirrorAction> {
        match r.kind {
            ReactionKind::Added => {
                session.add_reaction(r.message(), &self.mirror).await?;
                Ok(MirrorAction::Added)
            }
            ReactionKind::Removed => {
                let me = session.self_identity().await?;
                session
                    .remove_reaction(r.message(), &self.mirror, me)
                    .await?;
                Ok(MirrorAction::Removed)
            }
        }
    }
}

/// Compare emoji ignoring surrounding whitespace and the U+FE0F variation selector,
/// which backends add or strip inconsistently ("⭐" vs "⭐️").
fn normalize_emoji(s: &str) -> String {
    s.trim().chars().filter(|c| *c != '\u{fe0f}').collect()
}
