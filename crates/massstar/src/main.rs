use anyhow::Context;
use tracing::info;

use massstar_core::{
    config::Config,
    fleet::{Fleet, FleetSettings},
};
use massstar_discord::DiscordConnector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    massstar_core::logging::init("massstar")?;

    let cfg = Config::load().context("invalid configuration")?;
    let credentials = cfg.load_credentials().context("failed to load credentials")?;
    info!(
        tokens_file = %cfg.tokens_file.display(),
        credentials = credentials.len(),
        "starting massstar"
    );

    let connector = DiscordConnector::from_config(&cfg);
    let fleet = Fleet::start(&credentials, &connector, FleetSettings::from(&cfg))
        .await
        .context("fleet failed to start")?;
    info!(sessions = ?fleet.session_names().await, "fleet running");

    let signal = shutdown_signal().await?;
    info!(signal, "shutdown requested");

    let report = fleet.shutdown().await;
    info!(
        closed = report.closed,
        failed = ?report.failed,
        "massstar stopped"
    );
    Ok(())
}

/// Wait for SIGINT (ctrl-c) or, on unix, SIGTERM.
async fn shutdown_signal() -> anyhow::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("failed to listen for ctrl-c")?;
                Ok("SIGINT")
            }
            _ = term.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for ctrl-c")?;
        Ok("ctrl-c")
    }
}
