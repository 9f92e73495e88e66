use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    domain::{MessageRef, UserId},
    messaging::port::SessionPort,
    Error, Result,
};

/// SessionPort decorator that puts a bounded timeout on every outbound call.
///
/// An expired call surfaces as `Error::Timeout`; callers drop it like any other
/// outbound failure. `close` is not bounded here, the adapter owns that budget.
#[derive(Clone)]
pub struct TimedSession {
    inner: Arc<dyn SessionPort>,
    timeout: Duration,
}

impl TimedSession {
    pub fn new(inner: Arc<dyn SessionPort>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(&self, op: &'static str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(Error::Timeout {
                op,
                millis: self.timeout.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl SessionPort for TimedSession {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn self_identity(&self) -> Result<UserId> {
        self.bounded("self_identity", self.inner.self_identity()).await
    }

    async fn add_reaction(&self, msg: MessageRef, emoji: &str) -> Result<()> {
        self.bounded("add_reaction", self.inner.add_reaction(msg, emoji)).await
    }

    async fn remove_reaction(&self, msg: MessageRef, emoji: &str, actor: UserId) -> Result<()> {
        self.bounded(
            "remove_reaction",
            self.inner.remove_reaction(msg, emoji, actor),
        )
        .await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
