//! Configuration for gcad

use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// gcad - GCA Regional Collection Daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "gcad")]
#[command(about = "GCA regional collection server for signed solar telemetry")]
pub struct Config {
    /// Base directory for persistent server files
    #[arg(short, long, default_value = "./data/gcad", env = "GCAD_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Address the listeners bind to
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// HTTP API port
    #[arg(long, default_value = "35015")]
    pub http_port: u16,

    /// TCP sync port
    #[arg(long, default_value = "35030")]
    pub tcp_port: u16,

    /// UDP report intake port
    #[arg(long, default_value = "35045")]
    pub udp_port: u16,

    /// Seconds between week-boundary migration checks
    #[arg(long, default_value = "3600")]
    pub report_migration_frequency_secs: u64,

    /// Seconds between impact-rate polling cycles
    #[arg(long, default_value = "120")]
    pub watt_time_frequency_secs: u64,

    /// Archive requests admitted per rate window
    #[arg(long, default_value = "6")]
    pub api_archive_limit: usize,

    /// Archive rate window in seconds
    #[arg(long, default_value = "3600")]
    pub api_archive_rate_secs: u64,

    /// Bound on the recent-reports list (halved on overflow)
    #[arg(long, default_value = "10000")]
    pub recent_reports_max: usize,

    /// Bound on the recent-equipment-authorizations list
    #[arg(long, default_value = "1000")]
    pub recent_auths_max: usize,

    /// Event log expiry in seconds (0 = never expire)
    #[arg(long, default_value = "86400")]
    pub event_log_expiry_secs: u64,

    /// Event log byte budget (0 = do not store)
    #[arg(long, default_value = "1048576")]
    pub event_log_limit_bytes: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.http_port == self.tcp_port {
            anyhow::bail!("HTTP and TCP ports must differ");
        }
        if self.report_migration_frequency_secs == 0 {
            anyhow::bail!("report migration frequency must be nonzero");
        }
        if self.watt_time_frequency_secs == 0 {
            anyhow::bail!("impact-rate polling frequency must be nonzero");
        }
        Ok(())
    }

    pub fn migration_period(&self) -> Duration {
        Duration::from_secs(self.report_migration_frequency_secs)
    }

    pub fn watt_time_period(&self) -> Duration {
        Duration::from_secs(self.watt_time_frequency_secs)
    }

    pub fn archive_rate_window(&self) -> Duration {
        Duration::from_secs(self.api_archive_rate_secs)
    }

    /// Directory holding impact-rate source credentials; the poller runs
    /// only when `username` and `password` files exist under it
    pub fn watttime_dir(&self) -> PathBuf {
        self.data_dir.join("watttime_data")
    }
}
