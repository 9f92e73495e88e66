//! Process-wide record of event occurrences already handled.
//!
//! The filter is shared by every session router in the fleet. Its check-and-set is the
//! only shared mutable state in the engine and runs under a single lock that is never
//! held across an await point.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use crate::{
    domain::{MessageId, UserId},
    messaging::types::{InboundEvent, ReactionKind},
    Error, Result,
};

/// Whether an occurrence is deduplicated per session or once for the whole fleet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DedupScope {
    /// Every session acts on its own copy of an event (each bot account mirrors).
    #[default]
    PerSession,
    /// The first session to observe an event acts; the rest see a duplicate.
    Fleet,
}

impl DedupScope {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "session" | "per-session" | "per_session" => Ok(Self::PerSession),
            "fleet" | "global" => Ok(Self::Fleet),
            other => Err(Error::Config(format!(
                "unknown dedup scope {other:?} (expected \"session\" or \"fleet\")"
            ))),
        }
    }
}

/// What happened, independent of which session saw it.
///
/// Message and reaction occurrences use separate key schemes and never collide.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Occurrence {
    Message(MessageId),
    Reaction {
        message_id: MessageId,
        emoji: String,
        actor_id: UserId,
        kind: ReactionKind,
    },
}

impl From<&InboundEvent> for Occurrence {
    fn from(event: &InboundEvent) -> Self {
        match event {
            InboundEvent::MessageCreated(m) => Occurrence::Message(m.message_id),
            InboundEvent::Reaction(r) => Occurrence::Reaction {
                message_id: r.message_id,
                emoji: r.emoji.clone(),
                actor_id: r.actor_id,
                kind: r.kind,
            },
        }
    }
}

/// Unique identifier of one logical event occurrence.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EventKey {
    /// Session name when the occurrence is deduplicated per session.
    pub scope: Option<Arc<str>>,
    pub occurrence: Occurrence,
}

/// The (message, emoji, actor) a reaction add/remove toggles.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct Toggle {
    message_id: MessageId,
    emoji: String,
    actor_id: UserId,
}

impl EventKey {
    fn toggle(&self) -> Option<(Toggle, ReactionKind)> {
        match &self.occurrence {
            Occurrence::Message(_) => None,
            Occurrence::Reaction {
                message_id,
                emoji,
                actor_id,
                kind,
            } => Some((
                Toggle {
                    message_id: *message_id,
                    emoji: emoji.clone(),
                    actor_id: *actor_id,
                },
                *kind,
            )),
        }
    }
}

#[derive(Default)]
struct SeenSet {
    /// Retained keys with the sequence number of their insertion.
    keys: HashMap<EventKey, u64>,
    /// Retained reaction keys per toggle, so a novel add/remove can forget its opposite.
    toggles: HashMap<Toggle, Vec<EventKey>>,
    /// Insertion order for the recency window. Entries whose sequence no longer matches
    /// `keys` were forgotten early and are skipped.
    order: VecDeque<(Instant, u64, EventKey)>,
    next_seq: u64,
}

impl SeenSet {
    fn evict_older_than(&mut self, window: Duration, now: Instant) {
        while let Some((at, _, _)) = self.order.front() {
            if now.saturating_duration_since(*at) < window {
                break;
            }
            if let Some((_, seq, key)) = self.order.pop_front() {
                if self.keys.get(&key) == Some(&seq) {
                    self.forget(&key);
                }
            }
        }
    }

    fn forget(&mut self, key: &EventKey) {
        self.keys.remove(key);
        if let Some((toggle, _)) = key.toggle() {
            if let Some(keys) = self.toggles.get_mut(&toggle) {
                keys.retain(|k| k != key);
                if keys.is_empty() {
                    self.toggles.remove(&toggle);
                }
            }
        }
    }

    /// Forget opposite-kind keys for the toggle `key` belongs to, so the next real
    /// add (or remove) after this one is novel again. `any_scope` also forgets keys
    /// recorded under other scopes.
    fn forget_opposite(&mut self, key: &EventKey, any_scope: bool) {
        let Some((toggle, kind)) = key.toggle() else {
            return;
        };
        let Some(keys) = self.toggles.get(&toggle) else {
            return;
        };
        let opposite: Vec<EventKey> = keys
            .iter()
            .filter(|k| k.toggle().is_some_and(|(_, k_kind)| k_kind != kind))
            .filter(|k| any_scope || k.scope == key.scope)
            .cloned()
            .collect();
        for k in &opposite {
            self.forget(k);
        }
    }

    fn insert(&mut self, key: &EventKey, now: Instant, track_order: bool) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.keys.insert(key.clone(), seq);
        if let Some((toggle, _)) = key.toggle() {
            self.toggles.entry(toggle).or_default().push(key.clone());
        }
        if track_order {
            self.order.push_back((now, seq, key.clone()));
        }
    }
}

pub struct DedupFilter {
    scope: DedupScope,
    window: Option<Duration>,
    seen: Mutex<SeenSet>,
}

impl DedupFilter {
    /// `window: None` keeps every key for the process lifetime.
    pub fn new(scope: DedupScope, window: Option<Duration>) -> Self {
        Self {
            scope,
            window,
            seen: Mutex::new(SeenSet::default()),
        }
    }

    pub fn scope(&self) -> DedupScope {
        self.scope
    }

    /// Build the key for `event` as observed by `session`.
    ///
    /// Removals are always keyed per session: each session can only remove its own
    /// mirror reaction, so under fleet scope every session must see the removal.
    pub fn key_for(&self, session: &Arc<str>, event: &InboundEvent) -> EventKey {
        let per_session = match (self.scope, event) {
            (DedupScope::PerSession, _) => true,
            (DedupScope::Fleet, InboundEvent::Reaction(r)) => r.kind == ReactionKind::Removed,
            (DedupScope::Fleet, InboundEvent::MessageCreated(_)) => false,
        };
        EventKey {
            scope: per_session.then(|| session.clone()),
            occurrence: Occurrence::from(event),
        }
    }

    /// Atomic check-and-set: `false` the first time `key` is presented, `true` on a
    /// redelivery.
    ///
    /// A novel reaction key forgets the opposite-kind key for the same message, emoji
    /// and actor, so add → remove → add yields three novel occurrences.
    pub fn seen_before(&self, key: &EventKey) -> bool {
        let mut seen = self.lock();
        let now = Instant::now();
        self.check_and_set(&mut seen, key, now)
    }

    #[cfg(test)]
    fn seen_before_at(&self, key: &EventKey, now: Instant) -> bool {
        let mut seen = self.lock();
        self.check_and_set(&mut seen, key, now)
    }

    fn check_and_set(&self, seen: &mut SeenSet, key: &EventKey, now: Instant) -> bool {
        if let Some(window) = self.window {
            seen.evict_older_than(window, now);
        }
        if seen.keys.contains_key(key) {
            return true;
        }
        seen.forget_opposite(key, self.scope == DedupScope::Fleet);
        seen.insert(key, now, self.window.is_some());
        false
    }

    /// Number of keys currently retained.
    pub fn len(&self) -> usize {
        self.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, SeenSet> {
        // The set is consistent after every statement, so a poisoned lock is still usable.
        self.seen.lock().unwrap_or_else(|e| e.into_inner())
    }
}
