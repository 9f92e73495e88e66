use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    domain::{Credential, MessageRef, UserId},
    messaging::types::InboundEvent,
    Result,
};

/// One live, authenticated connection to the chat backend.
///
/// Discord is the first implementation; the shape keeps backend types out of the
/// core so the router and mirror can be driven by fakes in tests.
#[async_trait]
pub trait SessionPort: Send + Sync {
    /// Name of the credential this session was opened with.
    fn name(&self) -> &str;

    /// The bot's own user id. Resolved on first use, then stable.
    async fn self_identity(&self) -> Result<UserId>;

    async fn add_reaction(&self, msg: MessageRef, emoji: &str) -> Result<()>;

    /// Remove `actor`'s `emoji` reaction from `msg`.
    async fn remove_reaction(&self, msg: MessageRef, emoji: &str, actor: UserId) -> Result<()>;

    /// Close the connection. Once this returns the backend delivers no more events.
    async fn close(&self) -> Result<()>;
}

/// Callback entry point registered on every session.
///
/// Backends may invoke this concurrently, for different sessions and for the same one.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, session: Arc<dyn SessionPort>, event: InboundEvent);
}

/// Opens sessions against a backend.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a session for `credential` with `handler` registered for all inbound events.
    async fn open(
        &self,
        credential: &Credential,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<Arc<dyn SessionPort>>;
}
