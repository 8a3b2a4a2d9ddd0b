//! Impact-rate poller
//!
//! Periodically consults the external grid-impact source for each device's
//! marginal operating emission rate and writes it into the device's ring at
//! the sample's timeslot. Per-device failures are logged and skipped; the
//! poller never takes the ingestion path down.

use crate::server::Server;
use gca_core::timeslot::{GENESIS_UNIX, TIMESLOT_SECS};
use gca_core::types::*;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Impact-rate source errors
#[derive(Debug, Error)]
pub enum MoerError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("sample predates genesis")]
    SampleBeforeGenesis,
}

/// External impact-rate source: authenticate once per cycle, then fetch a
/// `(moer, sample_unix_time)` pair per device location
#[allow(async_fn_in_trait)]
pub trait ImpactRateSource: Send + Sync {
    async fn authenticate(&self) -> Result<String, MoerError>;
    async fn get_index(
        &self,
        token: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<(f64, u64), MoerError>;
}

// =============================================================================
// WATTTIME CLIENT
// =============================================================================

/// HTTP client for the production impact-rate service
#[derive(Clone)]
pub struct WattTimeClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexResponse {
    moer: f64,
    sample_unix_time: u64,
}

impl WattTimeClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.watttime.org";

    pub fn new(base_url: impl Into<String>, username: String, password: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            username,
            password,
        }
    }

    /// Build a client from the credentials directory, or `None` when the
    /// `username`/`password` files are absent (poller disabled)
    pub fn from_credentials_dir(dir: &Path) -> Option<Self> {
        let username = std::fs::read_to_string(dir.join("username")).ok()?;
        let password = std::fs::read_to_string(dir.join("password")).ok()?;
        Some(Self::new(
            Self::DEFAULT_BASE_URL,
            username.trim().to_string(),
            password.trim().to_string(),
        ))
    }
}

impl ImpactRateSource for WattTimeClient {
    async fn authenticate(&self) -> Result<String, MoerError> {
        let response = self
            .http
            .get(format!("{}/login", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MoerError::Auth(response.status().to_string()));
        }
        let login: LoginResponse = response.json().await?;
        Ok(login.token)
    }

    async fn get_index(
        &self,
        token: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<(f64, u64), MoerError> {
        let index: IndexResponse = self
            .http
            .get(format!("{}/v3/signal-index", self.base_url))
            .bearer_auth(token)
            .query(&[("latitude", latitude), ("longitude", longitude)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok((index.moer, index.sample_unix_time))
    }
}

// =============================================================================
// POLLER
// =============================================================================

/// Timer loop; exits when the shutdown signal fires
pub async fn run<S: ImpactRateSource>(
    server: Arc<Server>,
    source: S,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(server.config().watt_time_period());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = poll_once(&server, &source).await {
                    warn!("impact-rate cycle failed: {e}");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

/// One polling cycle: refresh the token, snapshot the device list, fetch and
/// store each device's rate. The primary lock is never held across a fetch.
pub async fn poll_once<S: ImpactRateSource>(server: &Server, source: &S) -> Result<(), MoerError> {
    let token = source.authenticate().await?;

    let devices: Vec<(ShortId, f64, f64)> = {
        let state = server.state();
        state
            .devices()
            .map(|(id, device)| (*id, device.auth.latitude, device.auth.longitude))
            .collect()
    };

    for (short_id, latitude, longitude) in devices {
        match source.get_index(&token, latitude, longitude).await {
            Ok((moer, sample_unix)) => {
                if let Err(e) = store_rate(server, short_id, moer, sample_unix) {
                    debug!(short_id, "impact rate not stored: {e}");
                }
            }
            Err(e) => debug!(short_id, "impact rate fetch failed: {e}"),
        }
    }
    Ok(())
}

fn store_rate(
    server: &Server,
    short_id: ShortId,
    moer: f64,
    sample_unix: u64,
) -> Result<(), MoerError> {
    if sample_unix < GENESIS_UNIX {
        return Err(MoerError::SampleBeforeGenesis);
    }
    let timeslot = ((sample_unix - GENESIS_UNIX) / TIMESLOT_SECS) as Timeslot;

    let mut state = server.state();
    let offset = state.offset();
    if timeslot < offset {
        return Ok(());
    }
    let index = (timeslot - offset) as usize;
    if index >= RING_SLOTS {
        return Ok(());
    }
    if let Some(device) = state.device_mut(short_id) {
        if device.impact_rates[index] != moer {
            device.impact_rates[index] = moer;
        }
    }
    Ok(())
}
