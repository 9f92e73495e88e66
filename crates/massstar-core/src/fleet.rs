//! Fleet supervisor: opens one session per credential, wires each to its own router over
//! the shared dedup filter, and closes everything on shutdown.

use std::{sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::{
    config::Config,
    dedup::{DedupFilter, DedupScope},
    domain::Credential,
    messaging::port::{Connector, SessionPort},
    mirror::ReactionMirror,
    router::EventRouter,
    Error, Result,
};

#[derive(Clone, Debug)]
pub struct FleetSettings {
    pub trigger_emoji: String,
    pub mirror_emoji: String,
    pub dedup_scope: DedupScope,
    pub dedup_window: Option<Duration>,
    pub outbound_timeout: Duration,
}

impl From<&Config> for FleetSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            trigger_emoji: cfg.trigger_emoji.clone(),
            mirror_emoji: cfg.mirror_emoji.clone(),
            dedup_scope: cfg.dedup_scope,
            dedup_window: cfg.dedup_window,
            outbound_timeout: cfg.outbound_timeout,
        }
    }
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

struct ManagedSession {
    name: String,
    session: Arc<dyn SessionPort>,
    router: Arc<EventRouter>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub closed: usize,
    /// Names of sessions whose close failed. They are still considered gone.
    pub failed: Vec<String>,
}

pub struct Fleet {
    sessions: Mutex<Vec<ManagedSession>>,
    dedup: Arc<DedupFilter>,
}

impl Fleet {
    /// Open a session for every credential, in order.
    ///
    /// Any failed open aborts the whole start: sessions already opened are closed again
    /// and `Error::Startup` names the credential that failed.
    pub async fn start(
        credentials: &[Credential],
        connector: &dyn Connector,
        settings: FleetSettings,
    ) -> Result<Self> {
        if credentials.is_empty() {
            return Err(Error::Config("no credentials to start".to_string()));
        }

        let mirror = Arc::new(ReactionMirror::new(
            settings.trigger_emoji.as_str(),
            settings.mirror_emoji.as_str(),
        )?);
        let dedup = Arc::new(DedupFilter::new(settings.dedup_scope, settings.dedup_window));

        let mut sessions = Vec::with_capacity(credentials.len());
        for cred in credentials {
            let router = Arc::new(EventRouter::new(
                &cred.name,
                dedup.clone(),
                mirror.clone(),
                settings.outbound_timeout,
            ));

            match connector.open(cred, router.clone()).await {
                Ok(session) => {
                    info!(session = %cred.name, "session opened");
                    sessions.push(ManagedSession {
                        name: cred.name.clone(),
                        session,
                        router,
                    });
                }
                Err(e) => {
                    error!(session = %cred.name, error = %e, "session failed to open; aborting start");
                    close_all(sessions).await;
                    return Err(Error::Startup {
                        session: cred.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            sessions = sessions.len(),
            trigger = %mirror.trigger(),
            mirror = %mirror.mirror(),
            scope = ?settings.dedup_scope,
            "fleet started"
        );

        Ok(Self {
            sessions: Mutex::new(sessions),
            dedup,
        })
    }

    pub async fn open_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn session_names(&self) -> Vec<String> {
        self.sessions
            .lock()
            .await
            .iter()
            .map(|s| s.name.clone())
            .collect()
    }

    /// Close every session. Once this returns no callback is running and none will start.
    ///
    /// A session that fails to close is logged and skipped; the rest are still closed.
    /// The session list stays locked until every close finished, so a concurrent caller
    /// waits for the first shutdown and then returns an empty report.
    pub async fn shutdown(&self) -> ShutdownReport {
        let mut sessions = self.sessions.lock().await;
        let report = close_all(std::mem::take(&mut *sessions)).await;
        info!(
            closed = report.closed,
            failed = report.failed.len(),
            dedup_keys = self.dedup.len(),
            "fleet shut down"
        );
        report
    }
}

async fn close_all(sessions: Vec<ManagedSession>) -> ShutdownReport {
    let mut report = ShutdownReport::default();
    for s in sessions {
        // Drain callbacks first so none observes a closed connection.
        s.router.close().await;
        match s.session.close().await {
            Ok(()) => {
                info!(session = %s.name, "session closed");
                report.closed += 1;
            }
            Err(e) => {
                warn!(session = %s.name, error = %e, "session failed to close cleanly");
                report.failed.push(s.name);
            }
        }
    }
    report
}
