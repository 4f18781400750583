use crate::adapter::WebDriverClient;
use crate::cli::JoinArgs;
use crate::config::Config;
use crate::finalizer::Finalizer;
use crate::join::{JoinFlow, JoinLocators, JoinTimings};
use crate::monitor::{LifecycleMonitor, MeetingSignals};
use crate::orchestrator::{Orchestrator, SessionOutcome};
use crate::recorder::FfmpegRecorder;
use crate::session::{EndReason, Session, SessionControl};
use crate::store::PresignedUrlStore;
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{error, info, warn};

/// Per-probe bound for the lifecycle monitor.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn run_session(args: JoinArgs) -> Result<SessionOutcome> {
    info!("Starting meetbot {}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);

    let policy = config.session_policy();
    let targets = args.upload_targets();
    if targets.bundle.is_none() && targets.audio.is_none() {
        warn!("No upload URLs given, artifacts will only be kept in {:?}", config.output.dir);
    }

    let store =
        PresignedUrlStore::new(config.upload_timeout()).context("Failed to build upload client")?;

    let session = Session::new(
        args.meeting_link.clone(),
        config.session.bot_name.clone(),
        policy.clone(),
    );
    info!("Session id: {}", session.id());

    let control = SessionControl::default();
    spawn_shutdown_listener(control.clone());

    let client = match WebDriverClient::connect(&config.webdriver_options()).await {
        Ok(client) => client,
        Err(e) => {
            error!("Session {}: failed to start browser: {}", session.id(), e);
            return Ok(SessionOutcome::without_client(session, EndReason::AdapterUnavailable));
        }
    };

    let orchestrator = Orchestrator::new(
        session,
        Box::new(client),
        Box::new(FfmpegRecorder::new(config.capture_settings())),
        LifecycleMonitor::new(MeetingSignals::teams(), PROBE_TIMEOUT),
        JoinFlow::new(JoinLocators::teams(), JoinTimings::default()),
        Finalizer::new(config.output.dir.clone(), policy.settle_delay, targets, Box::new(store)),
        control,
    );

    Ok(orchestrator.run().await)
}

/// Raise the stop flag on Ctrl-C or, on Unix, SIGTERM. The orchestrator
/// then finalizes as for any other ending.
fn spawn_shutdown_listener(control: SessionControl) {
    let mut shutdown = match ShutdownSignal::install() {
        Ok(shutdown) => shutdown,
        Err(e) => {
            warn!("Failed to listen for shutdown signals: {}", e);
            return;
        }
    };
    tokio::spawn(async move {
        match shutdown.recv().await {
            Ok(name) => {
                info!("{} received, finishing up...", name);
                control.stop();
            }
            Err(e) => warn!("Failed to listen for shutdown signals: {}", e),
        }
    });
}

/// Process shutdown signals. Handlers are registered on `install`, so a
/// signal delivered before the first `recv` is not lost.
struct ShutdownSignal {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    fn install() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            Ok(Self {
                terminate: signal(SignalKind::terminate())?,
            })
        }
        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Wait for the first signal and name it.
    async fn recv(&mut self) -> std::io::Result<&'static str> {
        #[cfg(unix)]
        {
            tokio::select! {
                res = tokio::signal::ctrl_c() => res.map(|()| "Interrupt"),
                _ = self.terminate.recv() => Ok("Terminate signal"),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.map(|()| "Interrupt")
        }
    }
}
