//! Five-minute timeslot clock
//!
//! Maps wall-clock time to timeslot indices since the fixed genesis instant.
//! The clock is an injected collaborator rather than an ambient global; the
//! override slot exists so tests (and only tests) can move time.

use crate::error::{Error, Result};
use crate::types::Timeslot;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Genesis instant: 2023-11-19T00:00:00Z
pub const GENESIS_UNIX: u64 = 1_700_352_000;

/// Seconds per timeslot
pub const TIMESLOT_SECS: u64 = 300;

/// Timeslot clock with an atomic test override
///
/// A negative override means "follow the system clock".
#[derive(Debug)]
pub struct Clock {
    override_slot: AtomicI64,
}

impl Clock {
    /// Clock that follows the system wall clock
    pub fn system() -> Self {
        Self {
            override_slot: AtomicI64::new(-1),
        }
    }

    /// Clock pinned to a fixed timeslot; move it with [`Clock::set_timeslot`]
    pub fn fixed(slot: Timeslot) -> Self {
        Self {
            override_slot: AtomicI64::new(i64::from(slot)),
        }
    }

    /// Current timeslot index
    pub fn current_timeslot(&self) -> Result<Timeslot> {
        let overridden = self.override_slot.load(Ordering::Relaxed);
        if overridden >= 0 {
            return Ok(overridden as Timeslot);
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| Error::ClockSkew)?
            .as_secs();
        if now < GENESIS_UNIX {
            return Err(Error::ClockSkew);
        }
        Ok(((now - GENESIS_UNIX) / TIMESLOT_SECS) as Timeslot)
    }

    /// Override the current timeslot (test hook)
    pub fn set_timeslot(&self, slot: Timeslot) {
        self.override_slot.store(i64::from(slot), Ordering::Relaxed);
    }

    /// Drop the override and follow the system clock again
    pub fn clear_override(&self) {
        self.override_slot.store(-1, Ordering::Relaxed);
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}
