//! Week-boundary migrator
//!
//! A background task wakes on a timer and, once the clock runs far enough
//! past the ring offset, freezes the closing week into a signed
//! AllDeviceStats record, persists it, and rotates every device's ring.
//! The whole freeze-and-rotate happens under the primary lock in one pass;
//! the disk append follows outside the lock.

use crate::moer::{self, WattTimeClient};
use crate::server::Server;
use crate::storage::StorageError;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Rotate once the clock is this many slots past the offset (≈ 11 days),
/// well past the last reportable timeslot of the closing week
pub const ROTATION_THRESHOLD: u32 = 3200;

/// Past this lag the server is catastrophically behind and must abort
pub const CATASTROPHIC_LAG: u32 = 4000;

/// Migration errors
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("core error: {0}")]
    Core(#[from] gca_core::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Timer loop; exits when the shutdown signal fires.
///
/// When an impact-rate source is available it is consulted once more before
/// each freeze, so the closing week carries the freshest rates.
pub async fn run(
    server: Arc<Server>,
    source: Option<WattTimeClient>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(server.config().migration_period());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if rotation_due(&server) {
                    if let Some(source) = &source {
                        if let Err(e) = moer::poll_once(&server, source).await {
                            warn!("pre-freeze impact-rate refresh failed: {e}");
                        }
                    }
                }
                match check_rotation(&server) {
                    Ok(true) => {}
                    Ok(false) => debug!("rotation not due"),
                    Err(e) => error!("rotation failed: {e}"),
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

fn rotation_due(server: &Server) -> bool {
    let Ok(now) = server.clock().current_timeslot() else {
        return false;
    };
    now.saturating_sub(server.state().offset()) > ROTATION_THRESHOLD
}

/// Freeze and rotate if the threshold has been crossed.
///
/// Aborts the process when the lag exceeds [`CATASTROPHIC_LAG`]: partial
/// recovery would publish a week with silently missing tail slots.
pub fn check_rotation(server: &Server) -> Result<bool, MigrateError> {
    let now = server.clock().current_timeslot()?;

    let frozen = {
        let mut state = server.state();
        let lag = now.saturating_sub(state.offset());
        if lag > CATASTROPHIC_LAG {
            error!(
                now,
                offset = state.offset(),
                "migration is catastrophically late; aborting"
            );
            server
                .events()
                .append(format!("fatal: migration lag {lag} slots"));
            std::process::exit(1);
        }
        if lag <= ROTATION_THRESHOLD {
            return Ok(false);
        }

        let stats = state.freeze_week(server.keypair())?;
        state.history.push(stats.clone());
        state.rotate();
        stats
    };

    server.storage().append_stats(&frozen)?;
    server.events().append(format!(
        "week frozen at offset {}, {} devices",
        frozen.timeslot_offset,
        frozen.devices.len()
    ));
    info!(
        offset = frozen.timeslot_offset,
        devices = frozen.devices.len(),
        "week rotated"
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::testutil::*;
    use crate::tcp::build_sync_response;
    use gca_core::crypto::Keypair;
    use gca_core::types::*;

    struct Rig {
        harness: TestHarness,
        device: Keypair,
    }

    fn rig() -> Rig {
        let harness = harness();
        let gca = Keypair::generate();
        let mut reg = GcaRegistration {
            new_gca_key: gca.public_key(),
            signature: Signature::zero(),
        };
        reg.signature = harness.gca_temp.sign(&reg.signing_bytes()).unwrap();
        harness.server.register_gca(&reg).unwrap();

        let device = Keypair::generate();
        let mut auth = EquipmentAuthorization {
            short_id: 0,
            public_key: device.public_key(),
            latitude: 34.0,
            longitude: -118.0,
            capacity: 100_000_000,
            debt: 0,
            expiration: 100_000,
            initialization: 0,
            protocol_fee: 0,
            signature: Signature::zero(),
        };
        auth.signature = gca.sign(&auth.signing_bytes()).unwrap();
        harness.server.save_equipment(&auth).unwrap();
        Rig { harness, device }
    }

    fn submit_report(rig: &Rig, timeslot: Timeslot, power: u64) {
        let mut report = EquipmentReport {
            short_id: 0,
            timeslot,
            power_output: power,
            signature: Signature::zero(),
        };
        report.signature = rig.device.sign(&report.signing_bytes()).unwrap();
        crate::udp::handle_datagram(&rig.harness.server, &report.encode()).unwrap();
    }

    #[test]
    fn test_rotation_not_due_early() {
        let rig = rig();
        rig.harness.server.clock().set_timeslot(3200);
        assert!(!check_rotation(&rig.harness.server).unwrap());
        assert_eq!(rig.harness.server.state().offset(), 0);
    }

    #[test]
    fn test_week_migration_scenario() {
        let rig = rig();
        let server = &rig.harness.server;
        for slot in [0u32, 2, 4] {
            submit_report(&rig, slot, 50);
        }

        server.clock().set_timeslot(4000);
        assert!(check_rotation(server).unwrap());

        for slot in [4028u32, 4030, 4031] {
            submit_report(&rig, slot, 50);
        }

        let frame = build_sync_response(server, 0).unwrap().unwrap();
        let payload = &frame[2..];
        assert_eq!(&payload[32..36], &2016u32.to_le_bytes());

        let bitfield = &payload[36..36 + 504];
        assert_eq!(bitfield[503 - 252], 128 + 64 + 16);
        for (i, &byte) in bitfield.iter().enumerate() {
            if i != 503 - 252 {
                assert_eq!(byte, 0, "unexpected bit in byte {i}");
            }
        }
    }

    #[test]
    fn test_frozen_week_contents_and_persistence() {
        let rig = rig();
        let server = &rig.harness.server;
        for slot in [0u32, 2, 4] {
            submit_report(&rig, slot, 50);
        }
        server.clock().set_timeslot(4000);
        check_rotation(server).unwrap();

        {
            let state = server.state();
            assert_eq!(state.offset(), 2016);
            assert_eq!(state.history.len(), 1);
            let stats = &state.history[0];
            assert_eq!(stats.timeslot_offset, 0);
            assert_eq!(stats.devices.len(), 1);
            assert_eq!(stats.devices[0].power_outputs[0], 50);
            assert_eq!(stats.devices[0].power_outputs[1], 0);
            assert_eq!(stats.devices[0].power_outputs[4], 50);
        }

        // the frozen record is on disk, and a restart restores the offset
        assert_eq!(server.storage().load_stats_history().unwrap().len(), 1);
        let reopened = reopen(&rig.harness, 4000);
        let state = reopened.state();
        assert_eq!(state.offset(), 2016);
        assert_eq!(state.history.len(), 1);
    }

    #[test]
    fn test_second_rotation_advances_again() {
        let rig = rig();
        let server = &rig.harness.server;
        server.clock().set_timeslot(4000);
        check_rotation(server).unwrap();
        server.clock().set_timeslot(2016 + 4000);
        assert!(check_rotation(server).unwrap());
        assert_eq!(server.state().offset(), 4032);
        assert_eq!(server.state().history.len(), 2);
    }
}
