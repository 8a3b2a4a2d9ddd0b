//! gcad server - composed state and lifecycle
//!
//! Startup loads the server keys (generating them on first boot), loads the
//! temporary and real GCA keys, replays the persisted authorization, report,
//! migration, and history files into memory, then opens the UDP, TCP, and
//! HTTP listeners and starts the background tasks. Shutdown is cooperative:
//! listeners close first, in-flight handlers get a bounded drain, background
//! tasks observe the stop signal at each sleep or accept boundary.

use crate::config::Config;
use crate::lock::{DebugMutex, DebugMutexGuard};
use crate::migrate;
use crate::moer::{self, WattTimeClient};
use crate::state::CollectorState;
use crate::storage::{Storage, StorageError};
use crate::tcp;
use crate::udp;
use gca_core::crypto::Keypair;
use gca_core::eventlog::{EventLog, EventLogConfig};
use gca_core::ratelimit::RateLimiter;
use gca_core::timeslot::Clock;
use gca_core::types::*;
use parking_lot::{Mutex, MutexGuard};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// How long in-flight HTTP handlers get to finish after shutdown
const HTTP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] gca_core::Error),
}

/// Composed server state shared by every listener and task
pub struct Server {
    config: Config,
    keypair: Keypair,
    clock: Clock,
    /// Primary lock: registry, rings, recents, history, migrations
    state: DebugMutex<CollectorState>,
    /// Underclass lock: may be taken while the primary lock is held, never
    /// across external I/O
    gca_servers: Mutex<Vec<AuthorizedServer>>,
    storage: Storage,
    events: EventLog,
    archive_limiter: RateLimiter,
    http_client: reqwest::Client,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Create a server that follows the system clock
    pub fn new(config: Config) -> Result<Self, ServerError> {
        Self::with_clock(config, Clock::system())
    }

    /// Create a server with an injected clock (tests pin it)
    pub fn with_clock(config: Config, clock: Clock) -> Result<Self, ServerError> {
        let storage = Storage::open(&config.data_dir)?;
        let keypair = storage.load_or_create_server_keys()?;
        let gca_temp_key = storage.load_temp_gca_key()?;

        let mut state = CollectorState::new(
            gca_temp_key,
            config.recent_reports_max,
            config.recent_auths_max,
        );
        state.gca_key = storage.load_gca_key()?;

        // History first: its length fixes the ring offset, which the report
        // replay below depends on.
        let history = storage.load_stats_history()?;
        state.set_offset(history.len() as Timeslot * TIMESLOTS_PER_WEEK);
        state.history = history;

        // Authorizations replay through the same registry rules as live
        // traffic, so conflict bans come back exactly as they happened.
        let mut replayed_auths = 0usize;
        for auth in storage.load_authorizations()? {
            let _ = state.integrate_authorization(&auth);
            replayed_auths += 1;
        }

        for migration in storage.load_migrations()? {
            state.migrations.insert(migration.equipment_key, migration);
        }

        // Reports likewise replay through the ring rules; anything outside
        // the restored window is dropped just as live intake would.
        let mut replayed_reports = 0usize;
        for report in storage.load_reports()? {
            let _ = state.integrate_report(&report);
            replayed_reports += 1;
        }

        info!(
            devices = state.device_count(),
            auths = replayed_auths,
            reports = replayed_reports,
            offset = state.offset(),
            "state restored from disk"
        );

        let events = EventLog::new(EventLogConfig {
            expiry: Duration::from_secs(config.event_log_expiry_secs),
            limit_bytes: config.event_log_limit_bytes,
        });
        let archive_limiter =
            RateLimiter::new(config.api_archive_limit, config.archive_rate_window());
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            keypair,
            clock,
            state: DebugMutex::new(state),
            gca_servers: Mutex::new(Vec::new()),
            storage,
            events,
            archive_limiter,
            http_client: reqwest::Client::new(),
            shutdown_tx,
        })
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Take the primary lock
    pub fn state(&self) -> DebugMutexGuard<'_, CollectorState> {
        self.state.lock()
    }

    /// Take the peer-server list lock
    pub fn gca_servers(&self) -> MutexGuard<'_, Vec<AuthorizedServer>> {
        self.gca_servers.lock()
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn archive_limiter(&self) -> &RateLimiter {
        &self.archive_limiter
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signal cooperative stop to every listener and background task
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    // -------------------------------------------------------------------------
    // Run loop
    // -------------------------------------------------------------------------

    /// Bind the listeners, start the background tasks, and serve until
    /// shutdown
    pub async fn run(self: Arc<Self>) -> Result<(), ServerError> {
        let bind = self.config.bind;
        let udp_addr = SocketAddr::new(bind, self.config.udp_port);
        let tcp_addr = SocketAddr::new(bind, self.config.tcp_port);
        let http_addr = SocketAddr::new(bind, self.config.http_port);

        let udp_socket = UdpSocket::bind(udp_addr).await?;
        let tcp_listener = TcpListener::bind(tcp_addr).await?;
        info!(%udp_addr, %tcp_addr, %http_addr, "listeners bound");

        let udp_handle = tokio::spawn(udp::run(self.clone(), udp_socket, self.subscribe_shutdown()));
        let tcp_handle = tokio::spawn(tcp::run(
            self.clone(),
            tcp_listener,
            self.subscribe_shutdown(),
        ));

        let impact_source = WattTimeClient::from_credentials_dir(&self.config.watttime_dir());
        let migrate_handle = tokio::spawn(migrate::run(
            self.clone(),
            impact_source.clone(),
            self.subscribe_shutdown(),
        ));
        let moer_handle = impact_source.map(|client| {
            info!("impact-rate poller enabled");
            tokio::spawn(moer::run(self.clone(), client, self.subscribe_shutdown()))
        });

        // HTTP goes up last; shutdown closes it first with a bounded drain.
        let http_listener = TcpListener::bind(http_addr).await?;
        let app = crate::http::router(self.clone());
        let mut graceful_rx = self.subscribe_shutdown();
        let serve = axum::serve(http_listener, app).with_graceful_shutdown(async move {
            let _ = graceful_rx.recv().await;
        });

        let mut drain_rx = self.subscribe_shutdown();
        tokio::select! {
            result = serve => {
                if let Err(e) = result {
                    warn!("http server error: {e}");
                }
            }
            _ = async {
                let _ = drain_rx.recv().await;
                tokio::time::sleep(HTTP_DRAIN_TIMEOUT).await;
            } => {
                warn!("http drain timeout; aborting in-flight handlers");
            }
        }

        for handle in [Some(udp_handle), Some(tcp_handle), Some(migrate_handle), moer_handle]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }

        info!("shutdown complete");
        Ok(())
    }
}
