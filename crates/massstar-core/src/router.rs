//! Per-session event dispatch: compute the key, consult the dedup filter, forward novel
//! events to the mirror.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    dedup::DedupFilter,
    messaging::{
        port::{InboundHandler, SessionPort},
        timed::TimedSession,
        types::InboundEvent,
    },
    mirror::{MirrorAction, ReactionMirror},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The router was closed; the event arrived after shutdown began.
    Closed,
    Duplicate,
    /// Novel, but nothing to mirror.
    Ignored,
    Mirrored(MirrorAction),
    /// The outbound call failed or timed out. Logged, not retried.
    Dropped,
}

pub struct EventRouter {
    session_name: Arc<str>,
    dedup: Arc<DedupFilter>,
    mirror: Arc<ReactionMirror>,
    outbound_timeout: Duration,
    /// Callbacks hold this shared for their whole run; `close` takes it exclusively.
    open: RwLock<bool>,
}

impl EventRouter {
    pub fn new(
        session_name: &str,
        dedup: Arc<DedupFilter>,
        mirror: Arc<ReactionMirror>,
        outbound_timeout: Duration,
    ) -> Self {
        Self {
            session_name: Arc::from(session_name),
            dedup,
            mirror,
            outbound_timeout,
            open: RwLock::new(true),
        }
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    pub async fn route(&self, session: Arc<dyn SessionPort>, event: InboundEvent) -> RouteOutcome {
        let open = self.open.read().await;
        if !*open {
            debug!(session = %self.session_name, "event after close; dropping");
            return RouteOutcome::Closed;
        }

        let msg = event.message();
        let key = self.dedup.key_for(&self.session_name, &event);
        if self.dedup.seen_before(&key) {
            debug!(
                session = %self.session_name,
                channel_id = %msg.channel_id,
                message_id = %msg.message_id,
                "duplicate delivery suppressed"
            );
            return RouteOutcome::Duplicate;
        }

        let session = TimedSession::new(session, self.outbound_timeout);
        match self.mirror.apply(&session, &event).await {
            Ok(Some(action)) => {
                info!(
                    session = %self.session_name,
                    channel_id = %msg.channel_id,
                    message_id = %msg.message_id,
                    emoji = %self.mirror.mirror(),
                    ?action,
                    "mirrored reaction"
                );
                RouteOutcome::Mirrored(action)
            }
            Ok(None) => RouteOutcome::Ignored,
            Err(e) => {
                warn!(
                    session = %self.session_name,
                    channel_id = %msg.channel_id,
                    message_id = %msg.message_id,
                    emoji = %self.mirror.mirror(),
                    error = %e,
                    "mirror call failed; dropping occurrence"
                );
                RouteOutcome::Dropped
            }
        }
    }

    /// Stop accepting events. Returns once no callback is running against this router.
    pub async fn close(&self) {
        let mut open = self.open.write().await;
        *open = false;
    }

    pub async fn is_closed(&self) -> bool {
        !*self.open.read().await
    }
}

#[async_trait]
impl InboundHandler for EventRouter {
    async fn handle(&self, session: Arc<dyn SessionPort>, event: InboundEvent) {
        self.route(session, event).await;
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::Notify;

    use super::*;
    use crate::{
        dedup::DedupScope,
        domain::{MessageRef, UserId},
        messaging::types::ReactionKind,
        mirror::tests::{msg42, reaction, Call, FakeSession},
        Result,
    };

    fn router(dedup: Arc<DedupFilter>, name: &str) -> EventRouter {
        EventRouter::new(
            name,
            dedup,
            Arc::new(ReactionMirror::new("🔺", "⭐").unwrap()),
            Duration::from_secs(10),
        )
    }

    fn fleet_dedup() -> Arc<DedupFilter> {
        Arc::new(DedupFilter::new(DedupScope::Fleet, None))
    }

    #[tokio::test]
    async fn duplicate_delivery_issues_no_second_call() {
        let s = Arc::new(FakeSession::new("a"));
        let r = router(fleet_dedup(), "a");
        let ev = reaction("🔺", UserId(1), ReactionKind::Added);

        assert_eq!(
            r.route(s.clone(), ev.clone()).await,
            RouteOutcome::Mirrored(MirrorAction::Added)
        );
        assert_eq!(r.route(s.clone(), ev).await, RouteOutcome::Duplicate);
        assert_eq!(s.calls(), vec![Call::Add(msg42(), "⭐".to_string())]);
    }

    #[tokio::test]
    async fn add_then_self_remove_mirrors_both() {
        let s = Arc::new(FakeSession::new("a"));
        let r = router(fleet_dedup(), "a");

        r.route(s.clone(), reaction("🔺", UserId(1), ReactionKind::Added))
            .await;
        let out = r
            .route(s.clone(), reaction("🔺", s.me, ReactionKind::Removed))
            .await;

        assert_eq!(out, RouteOutcome::Mirrored(MirrorAction::Removed));
        assert_eq!(
            s.calls(),
            vec![
                Call::Add(msg42(), "⭐".to_string()),
                Call::Remove(msg42(), "⭐".to_string(), s.me),
            ]
        );
    }

    #[tokio::test]
    async fn failed_call_is_not_retried_and_stays_seen() {
        let s = Arc::new(FakeSession::new("a"));
        s.set_failing(true);
        let r = router(fleet_dedup(), "a");
        let ev = reaction("🔺", UserId(1), ReactionKind::Added);

        assert_eq!(r.route(s.clone(), ev.clone()).await, RouteOutcome::Dropped);

        s.set_failing(false);
        assert_eq!(r.route(s.clone(), ev).await, RouteOutcome::Duplicate);
        assert_eq!(s.calls().len(), 1);
    }

    #[tokio::test]
    async fn non_trigger_events_are_ignored() {
        let s = Arc::new(FakeSession::new("a"));
        let r = router(fleet_dedup(), "a");

        let out = r
            .route(s.clone(), reaction("👍", UserId(1), ReactionKind::Added))
            .await;
        assert_eq!(out, RouteOutcome::Ignored);
        assert!(s.calls().is_empty());
    }

    #[tokio::test]
    async fn session_scoped_routers_each_mirror_once() {
        let dedup = Arc::new(DedupFilter::new(DedupScope::PerSession, None));
        let a = Arc::new(FakeSession::new("a"));
        let b = Arc::new(FakeSession::new("b"));
        let ra = router(dedup.clone(), "a");
        let rb = router(dedup, "b");
        let ev = reaction("🔺", UserId(1), ReactionKind::Added);

        for _ in 0..2 {
            ra.route(a.clone(), ev.clone()).await;
            rb.route(b.clone(), ev.clone()).await;
        }
        assert_eq!(a.calls().len(), 1);
        assert_eq!(b.calls().len(), 1);
    }

    #[tokio::test]
    async fn fleet_scoped_routers_mirror_once_in_total() {
        let dedup = fleet_dedup();
        let a = Arc::new(FakeSession::new("a"));
        let b = Arc::new(FakeSession::new("b"));
        let ra = router(dedup.clone(), "a");
        let rb = router(dedup, "b");
        let ev = reaction("🔺", UserId(1), ReactionKind::Added);

        ra.route(a.clone(), ev.clone()).await;
        assert_eq!(rb.route(b.clone(), ev).await, RouteOutcome::Duplicate);
        assert_eq!(a.calls().len() + b.calls().len(), 1);
    }

    #[tokio::test]
    async fn toggled_trigger_mirrors_every_transition() {
        let s = Arc::new(FakeSession::new("a"));
        let r = router(
            Arc::new(DedupFilter::new(
                DedupScope::PerSession,
                Some(Duration::from_secs(900)),
            )),
            "a",
        );

        let mut outcomes = Vec::new();
        for kind in [ReactionKind::Added, ReactionKind::Removed, ReactionKind::Added] {
            outcomes.push(r.route(s.clone(), reaction("🔺", UserId(1), kind)).await);
        }

        assert_eq!(
            outcomes,
            vec![
                RouteOutcome::Mirrored(MirrorAction::Added),
                RouteOutcome::Mirrored(MirrorAction::Removed),
                RouteOutcome::Mirrored(MirrorAction::Added),
            ]
        );
        assert!(s.has_reaction(msg42(), "⭐", s.me));
    }

    /// Holds `add_reaction` until released so a callback can be caught in flight.
    struct HeldSession {
        inner: FakeSession,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl SessionPort for HeldSession {
        fn name(&self) -> &str {
            self.inner.name()
        }

        async fn self_identity(&self) -> Result<UserId> {
            self.inner.self_identity().await
        }

        async fn add_reaction(&self, msg: MessageRef, emoji: &str) -> Result<()> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.add_reaction(msg, emoji).await
        }

        async fn remove_reaction(&self, msg: MessageRef, emoji: &str, actor: UserId) -> Result<()> {
            self.inner.remove_reaction(msg, emoji, actor).await
        }

        async fn close(&self) -> Result<()> {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn close_waits_for_in_flight_callbacks_then_rejects() {
        let held = Arc::new(HeldSession {
            inner: FakeSession::new("a"),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let r = Arc::new(router(fleet_dedup(), "a"));

        let in_flight = {
            let r = r.clone();
            let s: Arc<dyn SessionPort> = held.clone();
            tokio::spawn(async move {
                r.route(s, reaction("🔺", UserId(1), ReactionKind::Added))
                    .await
            })
        };
        held.entered.notified().await;

        let closing = {
            let r = r.clone();
            tokio::spawn(async move { r.close().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!closing.is_finished());

        held.release.notify_one();
        assert_eq!(
            in_flight.await.unwrap(),
            RouteOutcome::Mirrored(MirrorAction::Added)
        );
        closing.await.unwrap();
        assert!(r.is_closed().await);

        let late = r
            .route(held.clone(), reaction("🔺", UserId(2), ReactionKind::Added))
            .await;
        assert_eq!(late, RouteOutcome::Closed);
        assert_eq!(held.inner.calls().len(), 1);
    }
}
