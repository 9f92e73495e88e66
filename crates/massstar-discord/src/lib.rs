//! Discord adapter (serenity).
//!
//! This crate implements the `massstar-core` Connector and SessionPort over the Discord
//! gateway + REST API. One serenity `Client` runs per credential.

use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use async_trait::async_trait;
use serenity::all::{
    ChannelId as DiscordChannelId, GatewayIntents, Message, MessageId as DiscordMessageId,
    Reaction, ReactionType, Ready, UserId as DiscordUserId,
};
use serenity::gateway::ShardManager;
use serenity::http::Http;
use serenity::prelude::{Client, Context, EventHandler};
use tokio::{sync::OnceCell, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use massstar_core::{
    config::Config,
    domain::{ChannelId, Credential, MessageId, MessageRef, UserId},
    errors::Error,
    messaging::{
        port::{Connector, InboundHandler, SessionPort},
        types::{InboundEvent, MessageCreated, ReactionEvent, ReactionKind},
    },
    Result,
};

fn intents() -> GatewayIntents {
    GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::GUILD_MESSAGE_REACTIONS
        | GatewayIntents::DIRECT_MESSAGE_REACTIONS
}

fn map_err(e: serenity::Error) -> Error {
    Error::External(format!("discord error: {e}"))
}

// ============================================================================
// Connector
// ============================================================================

#[derive(Clone, Debug)]
pub struct DiscordConnector {
    close_timeout: Duration,
}

impl DiscordConnector {
    pub fn new(close_timeout: Duration) -> Self {
        Self { close_timeout }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.close_timeout)
    }
}

#[async_trait]
impl Connector for DiscordConnector {
    async fn open(
        &self,
        credential: &Credential,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<Arc<dyn SessionPort>> {
        let slot = Arc::new(OnceLock::new());
        let events = Handler {
            name: credential.name.clone(),
            session: slot.clone(),
            inbound: handler,
        };

        let mut client = Client::builder(&credential.secret, intents())
            .event_handler(events)
            .await
            .map_err(map_err)?;

        let session = Arc::new(DiscordSession {
            name: credential.name.clone(),
            http: client.http.clone(),
            shard_manager: client.shard_manager.clone(),
            identity: OnceCell::new(),
            cancel: CancellationToken::new(),
            runner: tokio::sync::Mutex::new(None),
            close_timeout: self.close_timeout,
        });

        // A bad token fails here, before the gateway connects.
        let me = session.self_identity().await?;
        attach_session(&slot, session.clone())?;

        let name = credential.name.clone();
        let cancel = session.cancel.clone();
        let runner = tokio::spawn(async move {
            tokio::select! {
                res = client.start() => {
                    if let Err(e) = res {
                        error!(session = %name, error = %e, "discord client stopped with error");
                    }
                }
                _ = cancel.cancelled() => {}
            }
            debug!(session = %name, "discord runner exited");
        });
        *session.runner.lock().await = Some(runner);

        info!(session = %credential.name, user_id = %me, "discord session connecting");
        Ok(session)
    }
}

// ============================================================================
// Session
// ============================================================================

pub struct DiscordSession {
    name: String,
    http: Arc<Http>,
    shard_manager: Arc<ShardManager>,
    identity: OnceCell<UserId>,
    cancel: CancellationToken,
    runner: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    close_timeout: Duration,
}

#[async_trait]
impl SessionPort for DiscordSession {
    fn name(&self) -> &str {
        &self.name
    }

    async fn self_identity(&self) -> Result<UserId> {
        let id = self
            .identity
            .get_or_try_init(|| async {
                let me = self.http.get_current_user().await.map_err(map_err)?;
                Ok::<_, Error>(UserId(me.id.get()))
            })
            .await?;
        Ok(*id)
    }

    async fn add_reaction(&self, msg: MessageRef, emoji: &str) -> Result<()> {
        let (channel, message) = discord_message(msg)?;
        self.http
            .create_reaction(channel, message, &reaction_type(emoji))
            .await
            .map_err(map_err)
    }

    async fn remove_reaction(&self, msg: MessageRef, emoji: &str, actor: UserId) -> Result<()> {
        let (channel, message) = discord_message(msg)?;
        let rt = reaction_type(emoji);
        if self.identity.get() == Some(&actor) {
            return self
                .http
                .delete_reaction_me(channel, message, &rt)
                .await
                .map_err(map_err);
        }
        let user = DiscordUserId::new(non_zero(actor.0, "user")?);
        self.http
            .delete_reaction(channel, message, user, &rt)
            .await
            .map_err(map_err)
    }

    async fn close(&self) -> Result<()> {
        let Some(mut runner) = self.runner.lock().await.take() else {
            return Ok(()); // already closed
        };

        if timeout(self.close_timeout, self.shard_manager.shutdown_all())
            .await
            .is_err()
        {
            warn!(session = %self.name, "shard shutdown timed out; cancelling runner");
        }
        self.cancel.cancel();

        match timeout(self.close_timeout, &mut runner).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::External(format!("discord runner failed: {e}"))),
            Err(_) => {
                runner.abort();
                Err(Error::Timeout {
                    op: "close",
                    millis: self.close_timeout.as_millis() as u64,
                })
            }
        }
    }
}

/// Bind the handler's slot to its session. The slot is fresh per open, so a second
/// set means events would reach the wrong session.
fn attach_session(
    slot: &OnceLock<Arc<dyn SessionPort>>,
    session: Arc<dyn SessionPort>,
) -> Result<()> {
    let name = session.name().to_string();
    slot.set(session).map_err(|_| {
        error!(session = %name, "event handler already bound to a session");
        Error::External(format!("event handler for {name} already bound"))
    })
}

fn discord_message(msg: MessageRef) -> Result<(DiscordChannelId, DiscordMessageId)> {
    Ok((
        DiscordChannelId::new(non_zero(msg.channel_id.0, "channel")?),
        DiscordMessageId::new(non_zero(msg.message_id.0, "message")?),
    ))
}

/// Discord snowflakes are never 0; serenity panics on one.
fn non_zero(id: u64, what: &str) -> Result<u64> {
    if id == 0 {
        return Err(Error::External(format!("invalid {what} id 0")));
    }
    Ok(id)
}

fn reaction_type(emoji: &str) -> ReactionType {
    ReactionType::Unicode(emoji.to_string())
}

// ============================================================================
// Event Handler
// ============================================================================

struct Handler {
    name: String,
    /// Set once the session exists, before the gateway starts delivering.
    session: Arc<OnceLock<Arc<dyn SessionPort>>>,
    inbound: Arc<dyn InboundHandler>,
}

impl Handler {
    async fn dispatch(&self, event: InboundEvent) {
        let Some(session) = self.session.get() else {
            warn!(session = %self.name, "event before session was ready; dropping");
            return;
        };
        self.inbound.handle(session.clone(), event).await;
    }

    async fn dispatch_reaction(&self, r: &Reaction, kind: ReactionKind) {
        match reaction_event(
            r.channel_id.get(),
            r.message_id.get(),
            r.user_id.map(|u| u.get()),
            &r.emoji,
            kind,
        ) {
            Ok(event) => self.dispatch(InboundEvent::Reaction(event)).await,
            Err(reason) => warn!(
                session = %self.name,
                channel_id = %r.channel_id,
                message_id = %r.message_id,
                kind = kind.as_str(),
                reason = %reason,
                "undeliverable reaction event; dropping"
            ),
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn message(&self, _ctx: Context, msg: Message) {
        self.dispatch(InboundEvent::MessageCreated(MessageCreated {
            channel_id: ChannelId(msg.channel_id.get()),
            message_id: MessageId(msg.id.get()),
        }))
        .await;
    }

    async fn reaction_add(&self, _ctx: Context, reaction: Reaction) {
        self.dispatch_reaction(&reaction, ReactionKind::Added).await;
    }

    async fn reaction_remove(&self, _ctx: Context, reaction: Reaction) {
        self.dispatch_reaction(&reaction, ReactionKind::Removed).await;
    }

    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(
            session = %self.name,
            user = %ready.user.name,
            user_id = %ready.user.id,
            guilds = ready.guilds.len(),
            "discord bot connected"
        );
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn reaction_event(
    channel_id: u64,
    message_id: u64,
    user_id: Option<u64>,
    emoji: &ReactionType,
    kind: ReactionKind,
) -> std::result::Result<ReactionEvent, String> {
    let actor = user_id.ok_or_else(|| "reaction has no user id".to_string())?;
    let emoji = match emoji {
        ReactionType::Unicode(s) => s.clone(),
        ReactionType::Custom { name: Some(n), .. } => n.clone(),
        ReactionType::Custom { id, .. } => {
            return Err(format!("custom emoji {id} has no name"));
        }
        _ => return Err("unsupported emoji type".to_string()),
    };

    Ok(ReactionEvent {
        channel_id: ChannelId(channel_id),
        message_id: MessageId(message_id),
        emoji,
        actor_id: UserId(actor),
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unicode_reaction_is_parsed() {
        let ev = reaction_event(
            7,
            42,
            Some(1),
            &ReactionType::Unicode("🔺".to_string()),
            ReactionKind::Added,
        )
        .unwrap();

        assert_eq!(
            ev,
            ReactionEvent {
                channel_id: ChannelId(7),
                message_id: MessageId(42),
                emoji: "🔺".to_string(),
                actor_id: UserId(1),
                kind: ReactionKind::Added,
            }
        );
    }

    #[test]
    fn reaction_without_actor_is_undeliverable() {
        let err = reaction_event(
            7,
            42,
            None,
            &ReactionType::Unicode("🔺".to_string()),
            ReactionKind::Removed,
        )
        .unwrap_err();
        assert!(err.contains("no user id"));
    }

    #[test]
    fn zero_ids_are_rejected_instead_of_panicking() {
        let msg = MessageRef {
            channel_id: ChannelId(0),
            message_id: MessageId(42),
        };
        assert!(matches!(discord_message(msg), Err(Error::External(_))));
        assert_eq!(non_zero(5, "user").unwrap(), 5);
    }

    struct NamedSession(&'static str);

    #[async_trait]
    impl SessionPort for NamedSession {
        fn name(&self) -> &str {
            self.0
        }

        async fn self_identity(&self) -> Result<UserId> {
            Ok(UserId(1))
        }

        async fn add_reaction(&self, _msg: MessageRef, _emoji: &str) -> Result<()> {
            Ok(())
        }

        async fn remove_reaction(
            &self,
            _msg: MessageRef,
            _emoji: &str,
            _actor: UserId,
        ) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn handler_slot_binds_exactly_one_session() {
        let slot = OnceLock::new();
        attach_session(&slot, Arc::new(NamedSession("a"))).unwrap();

        let err = attach_session(&slot, Arc::new(NamedSession("b"))).unwrap_err();
        assert!(matches!(err, Error::External(_)));
        assert_eq!(slot.get().map(|s| s.name()), Some("a"));
    }

    #[test]
    fn mirror_emoji_maps_to_unicode_reaction() {
        assert_eq!(
            reaction_type("⭐"),
            ReactionType::Unicode("⭐".to_string())
        );
    }
}
