//! In-memory collector state: equipment registry and per-device report rings
//!
//! All mutation happens under the server's primary lock; methods here assume
//! the caller holds it. Disk appends happen before state mutation, so a
//! restart that replays the persistent files through the same integration
//! rules reconstructs identical in-memory state.

use gca_core::crypto::Keypair;
use gca_core::types::*;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Reports further than this many timeslots from "now" are rejected (36 h)
pub const REPORT_WINDOW_SLOTS: u32 = 432;

/// A report claiming more than capacity × 135 / 100 bans its slot
const OVER_CAPACITY_NUM: u128 = 135;
const OVER_CAPACITY_DEN: u128 = 100;

/// Values at or above 2^63 are device-encoded negatives, exempt from the
/// over-capacity rule
const NEGATIVE_SENTINEL_FLOOR: u64 = 1 << 63;

// =============================================================================
// RING SLOTS AND DEVICES
// =============================================================================

/// One ring slot: the report's power output plus the device signature.
///
/// ShortID and timeslot are implied by the owning device and slot index.
/// `power_output == 0` means no report; `power_output == 1` means the slot
/// was invalidated by conflicting evidence (the original signature is kept
/// for provability).
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub power_output: u64,
    pub signature: Signature,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            power_output: NO_REPORT,
            signature: Signature::zero(),
        }
    }
}

impl Slot {
    pub fn is_empty(&self) -> bool {
        self.power_output == NO_REPORT
    }

    pub fn is_banned(&self) -> bool {
        self.power_output == SLOT_BANNED
    }

    /// Present or banned; what the sync bitfield advertises
    pub fn is_set(&self) -> bool {
        self.power_output > NO_REPORT
    }

    /// Byte-for-byte equality with a received report
    fn matches(&self, report: &EquipmentReport) -> bool {
        self.power_output == report.power_output && self.signature == report.signature
    }
}

/// Registered device: its authorization and the two parallel 4032-slot rings
pub struct Device {
    pub auth: EquipmentAuthorization,
    pub reports: Box<[Slot]>,
    pub impact_rates: Box<[f64]>,
}

impl Device {
    fn new(auth: EquipmentAuthorization) -> Self {
        Self {
            auth,
            reports: vec![Slot::default(); RING_SLOTS].into_boxed_slice(),
            impact_rates: vec![0.0; RING_SLOTS].into_boxed_slice(),
        }
    }
}

// =============================================================================
// INTEGRATION OUTCOMES
// =============================================================================

/// Result of integrating an equipment authorization
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthOutcome {
    /// ShortID is in the ban set; nothing changed
    Rejected,
    /// Byte-identical record already installed; nothing changed
    Unchanged,
    /// New ShortID installed with fresh rings
    Installed,
    /// Same ShortID, different content: entry removed and ShortID banned
    ConflictBanned,
}

/// Result of integrating a report into the ring
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Report written at the slot; `over_capacity` means the slot was then
    /// banned for exceeding capacity × 135 / 100
    Installed { index: usize, over_capacity: bool },
    /// A different report already occupied the slot; slot banned, received
    /// report retained as evidence
    SlotBanned { index: usize },
    /// Dropped without mutating state
    Ignored(ReportDrop),
}

/// Why a report was dropped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportDrop {
    UnknownDevice,
    SentinelPower,
    TooOld,
    TooNew,
    SlotAlreadyBanned,
    Duplicate,
}

impl ReportOutcome {
    /// Whether this outcome mutated state (and therefore belongs on disk)
    pub fn mutated(&self) -> bool {
        matches!(self, Self::Installed { .. } | Self::SlotBanned { .. })
    }
}

// =============================================================================
// COLLECTOR STATE
// =============================================================================

/// Everything guarded by the primary lock
pub struct CollectorState {
    /// Pre-provisioned temporary GCA key
    pub gca_temp_key: PublicKey,
    /// Real GCA key, present once registration has happened
    pub gca_key: Option<PublicKey>,
    devices: HashMap<ShortId, Device>,
    short_id_by_key: HashMap<PublicKey, ShortId>,
    banned: HashSet<ShortId>,
    recent_reports: Vec<EquipmentReport>,
    recent_auths: Vec<EquipmentAuthorization>,
    /// Pending authority-handoff orders keyed by equipment public key
    pub migrations: HashMap<PublicKey, EquipmentMigration>,
    /// Frozen weekly snapshots, oldest first
    pub history: Vec<AllDeviceStats>,
    offset: Timeslot,
    recent_reports_max: usize,
    recent_auths_max: usize,
}

impl CollectorState {
    pub fn new(gca_temp_key: PublicKey, recent_reports_max: usize, recent_auths_max: usize) -> Self {
        Self {
            gca_temp_key,
            gca_key: None,
            devices: HashMap::new(),
            short_id_by_key: HashMap::new(),
            banned: HashSet::new(),
            recent_reports: Vec::new(),
            recent_auths: Vec::new(),
            migrations: HashMap::new(),
            history: Vec::new(),
            offset: 0,
            recent_reports_max,
            recent_auths_max,
        }
    }

    /// Timeslot corresponding to ring index 0; always a multiple of 2016
    pub fn offset(&self) -> Timeslot {
        self.offset
    }

    /// Restore the offset from persisted history at load time
    pub(crate) fn set_offset(&mut self, offset: Timeslot) {
        debug_assert_eq!(offset % TIMESLOTS_PER_WEEK, 0);
        self.offset = offset;
    }

    pub fn device(&self, short_id: ShortId) -> Option<&Device> {
        self.devices.get(&short_id)
    }

    pub fn device_mut(&mut self, short_id: ShortId) -> Option<&mut Device> {
        self.devices.get_mut(&short_id)
    }

    pub fn devices(&self) -> impl Iterator<Item = (&ShortId, &Device)> {
        self.devices.iter()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn short_id_for_key(&self, key: &PublicKey) -> Option<ShortId> {
        self.short_id_by_key.get(key).copied()
    }

    pub fn is_banned(&self, short_id: ShortId) -> bool {
        self.banned.contains(&short_id)
    }

    pub fn recent_reports(&self) -> &[EquipmentReport] {
        &self.recent_reports
    }

    pub fn recent_auths(&self) -> &[EquipmentAuthorization] {
        &self.recent_auths
    }

    // -------------------------------------------------------------------------
    // Equipment authorizations
    // -------------------------------------------------------------------------

    /// Whether integrating this authorization would mutate state (and so
    /// must first be appended to disk)
    pub fn authorization_mutates(&self, auth: &EquipmentAuthorization) -> bool {
        if self.banned.contains(&auth.short_id) {
            return false;
        }
        match self.devices.get(&auth.short_id) {
            Some(existing) => existing.auth != *auth,
            None => true,
        }
    }

    /// Apply the registry rules for one authorization.
    ///
    /// The caller persists the record before calling when
    /// [`Self::authorization_mutates`] said it would change state.
    pub fn integrate_authorization(&mut self, auth: &EquipmentAuthorization) -> AuthOutcome {
        if self.banned.contains(&auth.short_id) {
            return AuthOutcome::Rejected;
        }
        match self.devices.get(&auth.short_id) {
            Some(existing) if existing.auth == *auth => AuthOutcome::Unchanged,
            Some(_) => {
                // Same ShortID, different content: conflicting
                // re-authorization. The entry goes away and the ShortID is
                // banned; the record already sits on disk as evidence.
                self.push_recent_auth(auth.clone());
                if let Some(removed) = self.devices.remove(&auth.short_id) {
                    self.short_id_by_key.remove(&removed.auth.public_key);
                }
                self.banned.insert(auth.short_id);
                AuthOutcome::ConflictBanned
            }
            None => {
                self.push_recent_auth(auth.clone());
                self.short_id_by_key.insert(auth.public_key, auth.short_id);
                self.devices.insert(auth.short_id, Device::new(auth.clone()));
                AuthOutcome::Installed
            }
        }
    }

    fn push_recent_auth(&mut self, auth: EquipmentAuthorization) {
        if self.recent_auths.len() >= self.recent_auths_max {
            let half = self.recent_auths.len() / 2;
            self.recent_auths.drain(..half);
        }
        self.recent_auths.push(auth);
    }

    // -------------------------------------------------------------------------
    // Report integration
    // -------------------------------------------------------------------------

    /// Whether integrating this report would mutate the ring
    pub fn report_mutates(&self, report: &EquipmentReport) -> bool {
        matches!(
            self.classify_report(report),
            Ok(ReportClass::Install(_)) | Ok(ReportClass::Conflict(_))
        )
    }

    /// Apply the ring rules for one report.
    ///
    /// Ring-relative rules only: datagram size, signature, and the ±36 h
    /// wall-clock window are the intake's responsibility, so the startup
    /// replay reaches the same state from the on-disk report file.
    pub fn integrate_report(&mut self, report: &EquipmentReport) -> ReportOutcome {
        let class = match self.classify_report(report) {
            Ok(class) => class,
            Err(drop) => return ReportOutcome::Ignored(drop),
        };
        let Some(device) = self.devices.get_mut(&report.short_id) else {
            return ReportOutcome::Ignored(ReportDrop::UnknownDevice);
        };
        match class {
            ReportClass::Install(index) => {
                let over_capacity =
                    exceeds_capacity(report.power_output, device.auth.capacity);
                device.reports[index] = Slot {
                    power_output: if over_capacity {
                        SLOT_BANNED
                    } else {
                        report.power_output
                    },
                    signature: report.signature,
                };
                self.push_recent_report(*report);
                ReportOutcome::Installed {
                    index,
                    over_capacity,
                }
            }
            ReportClass::Conflict(index) => {
                // Keep the original slot's signature; only the power output
                // becomes the ban sentinel. The received report is retained
                // so the ban is provable to peers.
                device.reports[index].power_output = SLOT_BANNED;
                self.push_recent_report(*report);
                ReportOutcome::SlotBanned { index }
            }
        }
    }

    fn classify_report(&self, report: &EquipmentReport) -> Result<ReportClass, ReportDrop> {
        if report.power_output == NO_REPORT || report.power_output == SLOT_BANNED {
            return Err(ReportDrop::SentinelPower);
        }
        let device = self
            .devices
            .get(&report.short_id)
            .ok_or(ReportDrop::UnknownDevice)?;
        if report.timeslot < self.offset {
            return Err(ReportDrop::TooOld);
        }
        let index = (report.timeslot - self.offset) as usize;
        if index >= RING_SLOTS {
            return Err(ReportDrop::TooNew);
        }
        let slot = &device.reports[index];
        if slot.is_banned() {
            return Err(ReportDrop::SlotAlreadyBanned);
        }
        if slot.matches(report) {
            return Err(ReportDrop::Duplicate);
        }
        if slot.is_empty() {
            Ok(ReportClass::Install(index))
        } else {
            Ok(ReportClass::Conflict(index))
        }
    }

    fn push_recent_report(&mut self, report: EquipmentReport) {
        if self.recent_reports.len() >= self.recent_reports_max {
            let half = self.recent_reports.len() / 2;
            self.recent_reports.drain(..half);
        }
        self.recent_reports.push(report);
    }

    // -------------------------------------------------------------------------
    // Sync bitfield
    // -------------------------------------------------------------------------

    /// 504-byte presence bitfield: bit `(i mod 8)` of byte `(i div 8)` is 1
    /// iff slot `i` holds a report or a ban
    pub fn bitfield(&self, short_id: ShortId) -> Option<[u8; RING_SLOTS / 8]> {
        let device = self.devices.get(&short_id)?;
        let mut field = [0u8; RING_SLOTS / 8];
        for (i, slot) in device.reports.iter().enumerate() {
            if slot.is_set() {
                field[i / 8] |= 1 << (i % 8);
            }
        }
        Some(field)
    }

    // -------------------------------------------------------------------------
    // Week freeze and rotation
    // -------------------------------------------------------------------------

    /// Freeze the closing week (ring indices 0..2016) into a signed record.
    ///
    /// Devices are ordered by ascending ShortID so the record is
    /// deterministic for a given state.
    pub fn freeze_week(&self, keypair: &Keypair) -> gca_core::Result<AllDeviceStats> {
        let mut ids: Vec<ShortId> = self.devices.keys().copied().collect();
        ids.sort_unstable();

        let week = TIMESLOTS_PER_WEEK as usize;
        let devices = ids
            .iter()
            .map(|id| {
                let device = &self.devices[id];
                DeviceStats {
                    public_key: device.auth.public_key,
                    power_outputs: device.reports[..week].iter().map(|s| s.power_output).collect(),
                    impact_rates: device.impact_rates[..week].to_vec(),
                }
            })
            .collect();

        let mut stats = AllDeviceStats {
            devices,
            timeslot_offset: self.offset,
            signature: Signature::zero(),
        };
        stats.signature = keypair.sign(&stats.signing_bytes()?)?;
        Ok(stats)
    }

    /// Shift the second week into the first, zero the second, advance the
    /// offset by one week
    pub fn rotate(&mut self) {
        let week = TIMESLOTS_PER_WEEK as usize;
        for device in self.devices.values_mut() {
            device.reports.copy_within(week.., 0);
            device.reports[week..].fill(Slot::default());
            device.impact_rates.copy_within(week.., 0);
            device.impact_rates[week..].fill(0.0);
        }
        self.offset += TIMESLOTS_PER_WEEK;
    }

    /// Registry consistency; exercised by the invariant tests
    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        for (short_id, device) in &self.devices {
            assert_eq!(
                self.short_id_by_key.get(&device.auth.public_key),
                Some(short_id),
                "reverse map must point back at {short_id}"
            );
            assert!(
                !self.banned.contains(short_id),
                "{short_id} is both registered and banned"
            );
            assert_eq!(device.reports.len(), RING_SLOTS);
            assert_eq!(device.impact_rates.len(), RING_SLOTS);
        }
        assert_eq!(self.short_id_by_key.len(), self.devices.len());
        assert_eq!(self.offset % TIMESLOTS_PER_WEEK, 0);
    }
}

enum ReportClass {
    Install(usize),
    Conflict(usize),
}

fn exceeds_capacity(power_output: u64, capacity: u64) -> bool {
    if power_output >= NEGATIVE_SENTINEL_FLOOR {
        return false;
    }
    u128::from(power_output) > u128::from(capacity) * OVER_CAPACITY_NUM / OVER_CAPACITY_DEN
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_auth(short_id: ShortId, key_byte: u8) -> EquipmentAuthorization {
        EquipmentAuthorization {
            short_id,
            public_key: PublicKey([key_byte; 32]),
            latitude: 34.05,
            longitude: -118.24,
            capacity: 100_000_000,
            debt: 2_000_000,
            expiration: 100_000,
            initialization: 0,
            protocol_fee: 0,
            signature: Signature([key_byte; 64]),
        }
    }

    fn test_report(short_id: ShortId, timeslot: Timeslot, power: u64, sig_byte: u8) -> EquipmentReport {
        EquipmentReport {
            short_id,
            timeslot,
            power_output: power,
            signature: Signature([sig_byte; 64]),
        }
    }

    fn fresh_state() -> CollectorState {
        CollectorState::new(PublicKey([0xfe; 32]), 10_000, 1_000)
    }

    #[test]
    fn test_install_and_reverse_map() {
        let mut state = fresh_state();
        let auth = test_auth(1, 0x10);
        assert!(state.authorization_mutates(&auth));
        assert_eq!(state.integrate_authorization(&auth), AuthOutcome::Installed);
        assert_eq!(state.short_id_for_key(&auth.public_key), Some(1));
        state.assert_invariants();
    }

    #[test]
    fn test_identical_reauthorization_is_noop() {
        let mut state = fresh_state();
        let auth = test_auth(1, 0x10);
        state.integrate_authorization(&auth);
        assert!(!state.authorization_mutates(&auth));
        assert_eq!(state.integrate_authorization(&auth), AuthOutcome::Unchanged);
        state.assert_invariants();
    }

    #[test]
    fn test_conflicting_reauthorization_bans() {
        let mut state = fresh_state();
        let first = test_auth(12345, 0x10);
        state.integrate_authorization(&first);

        let mut second = first.clone();
        second.debt = 2_400_000;
        assert_eq!(
            state.integrate_authorization(&second),
            AuthOutcome::ConflictBanned
        );
        assert!(state.device(12345).is_none());
        assert!(state.is_banned(12345));
        assert!(state.short_id_for_key(&first.public_key).is_none());

        // further authorizations for the banned ShortID bounce
        assert!(!state.authorization_mutates(&first));
        assert_eq!(state.integrate_authorization(&first), AuthOutcome::Rejected);

        // a different ShortID still registers
        assert_eq!(
            state.integrate_authorization(&test_auth(12346, 0x11)),
            AuthOutcome::Installed
        );
        state.assert_invariants();
    }

    #[test]
    fn test_invariants_over_auth_sequences() {
        let mut state = fresh_state();
        for i in 0..50u32 {
            let auth = test_auth(i % 10, (i % 7) as u8);
            let _ = state.integrate_authorization(&auth);
            state.assert_invariants();
        }
    }

    #[test]
    fn test_report_install_and_duplicate() {
        let mut state = fresh_state();
        state.integrate_authorization(&test_auth(0, 0x10));

        let report = test_report(0, 5, 50, 0xaa);
        assert!(state.report_mutates(&report));
        assert_eq!(
            state.integrate_report(&report),
            ReportOutcome::Installed {
                index: 5,
                over_capacity: false
            }
        );
        // byte-identical resubmission is dropped: integration is idempotent
        assert!(!state.report_mutates(&report));
        assert_eq!(
            state.integrate_report(&report),
            ReportOutcome::Ignored(ReportDrop::Duplicate)
        );
        assert_eq!(state.device(0).unwrap().reports[5].power_output, 50);
        assert_eq!(state.recent_reports().len(), 1);
    }

    #[test]
    fn test_conflicting_report_bans_slot() {
        let mut state = fresh_state();
        state.integrate_authorization(&test_auth(0, 0x10));

        let first = test_report(0, 5, 50, 0xaa);
        state.integrate_report(&first);
        let second = test_report(0, 5, 60, 0xbb);
        assert_eq!(
            state.integrate_report(&second),
            ReportOutcome::SlotBanned { index: 5 }
        );

        let slot = &state.device(0).unwrap().reports[5];
        assert_eq!(slot.power_output, SLOT_BANNED);
        // original evidence stays in memory
        assert_eq!(slot.signature, first.signature);
        // both reports are in the recent list for provability
        assert_eq!(state.recent_reports().len(), 2);

        // the slot stays banned no matter what arrives next
        assert_eq!(
            state.integrate_report(&test_report(0, 5, 70, 0xcc)),
            ReportOutcome::Ignored(ReportDrop::SlotAlreadyBanned)
        );
    }

    #[test]
    fn test_over_capacity_report_bans_slot() {
        let mut state = fresh_state();
        state.integrate_authorization(&test_auth(0, 0x10));

        let report = test_report(0, 5, 200_000_000, 0xaa);
        assert_eq!(
            state.integrate_report(&report),
            ReportOutcome::Installed {
                index: 5,
                over_capacity: true
            }
        );
        assert_eq!(state.device(0).unwrap().reports[5].power_output, SLOT_BANNED);
    }

    #[test]
    fn test_device_encoded_negative_exempt_from_capacity_rule() {
        let mut state = fresh_state();
        state.integrate_authorization(&test_auth(0, 0x10));

        let negative = u64::MAX - 3;
        let report = test_report(0, 6, negative, 0xaa);
        assert_eq!(
            state.integrate_report(&report),
            ReportOutcome::Installed {
                index: 6,
                over_capacity: false
            }
        );
        assert_eq!(state.device(0).unwrap().reports[6].power_output, negative);
    }

    #[test]
    fn test_capacity_boundary() {
        // exactly 135% is allowed; one more milliwatt-hour is not
        assert!(!exceeds_capacity(135, 100));
        assert!(exceeds_capacity(136, 100));
        assert!(!exceeds_capacity(u64::MAX, 100));
    }

    #[test]
    fn test_ring_bounds() {
        let mut state = fresh_state();
        state.integrate_authorization(&test_auth(0, 0x10));
        state.set_offset(2016);

        assert_eq!(
            state.integrate_report(&test_report(0, 2015, 50, 0xaa)),
            ReportOutcome::Ignored(ReportDrop::TooOld)
        );
        assert_eq!(
            state.integrate_report(&test_report(0, 2016 + RING_SLOTS as u32, 50, 0xaa)),
            ReportOutcome::Ignored(ReportDrop::TooNew)
        );
        assert_eq!(
            state.integrate_report(&test_report(0, 2016, 50, 0xaa)),
            ReportOutcome::Installed {
                index: 0,
                over_capacity: false
            }
        );
    }

    #[test]
    fn test_sentinel_power_rejected() {
        let mut state = fresh_state();
        state.integrate_authorization(&test_auth(0, 0x10));
        for power in [NO_REPORT, SLOT_BANNED] {
            assert_eq!(
                state.integrate_report(&test_report(0, 5, power, 0xaa)),
                ReportOutcome::Ignored(ReportDrop::SentinelPower)
            );
        }
    }

    #[test]
    fn test_unknown_device_rejected() {
        let mut state = fresh_state();
        assert_eq!(
            state.integrate_report(&test_report(9, 5, 50, 0xaa)),
            ReportOutcome::Ignored(ReportDrop::UnknownDevice)
        );
    }

    #[test]
    fn test_recent_reports_halve_on_overflow() {
        let mut state = CollectorState::new(PublicKey([0xfe; 32]), 8, 1_000);
        state.integrate_authorization(&test_auth(0, 0x10));
        for i in 0..9u32 {
            state.integrate_report(&test_report(0, i, 50 + u64::from(i), 0xaa));
        }
        // ninth push halves the list first: 8 -> 4, then appends
        assert_eq!(state.recent_reports().len(), 5);
        assert_eq!(state.recent_reports().last().unwrap().timeslot, 8);
    }

    #[test]
    fn test_bitfield_layout() {
        let mut state = fresh_state();
        state.integrate_authorization(&test_auth(0, 0x10));
        state.integrate_report(&test_report(0, 0, 50, 0xaa));
        state.integrate_report(&test_report(0, 9, 50, 0xaa));

        let field = state.bitfield(0).unwrap();
        assert_eq!(field[0], 0b0000_0001);
        assert_eq!(field[1], 0b0000_0010);
        assert!(field[2..].iter().all(|&b| b == 0));
        assert!(state.bitfield(99).is_none());
    }

    #[test]
    fn test_bitfield_counts_banned_slots() {
        let mut state = fresh_state();
        state.integrate_authorization(&test_auth(0, 0x10));
        state.integrate_report(&test_report(0, 3, 50, 0xaa));
        state.integrate_report(&test_report(0, 3, 60, 0xbb));
        let field = state.bitfield(0).unwrap();
        assert_eq!(field[0], 0b0000_1000);
    }

    #[test]
    fn test_rotation_shifts_and_zeroes() {
        let mut state = fresh_state();
        state.integrate_authorization(&test_auth(0, 0x10));
        state.integrate_report(&test_report(0, 5, 50, 0xaa));
        state.integrate_report(&test_report(0, 2016 + 7, 60, 0xbb));
        state.device_mut(0).unwrap().impact_rates[2016 + 7] = 3.25;

        let before: Vec<Slot> = state.device(0).unwrap().reports[2016..].to_vec();
        state.rotate();

        assert_eq!(state.offset(), 2016);
        let device = state.device(0).unwrap();
        assert_eq!(&device.reports[..2016], &before[..]);
        assert_eq!(device.reports[7].power_output, 60);
        assert!(device.reports[2016..].iter().all(Slot::is_empty));
        assert_eq!(device.impact_rates[7], 3.25);
        assert!(device.impact_rates[2016..].iter().all(|&r| r == 0.0));
        state.assert_invariants();
    }

    #[test]
    fn test_freeze_week_sorted_and_signed() {
        let keypair = Keypair::generate();
        let mut state = fresh_state();
        state.integrate_authorization(&test_auth(7, 0x11));
        state.integrate_authorization(&test_auth(2, 0x12));
        state.integrate_report(&test_report(2, 5, 50, 0xaa));

        let stats = state.freeze_week(&keypair).unwrap();
        assert_eq!(stats.devices.len(), 2);
        // ascending ShortID order
        assert_eq!(stats.devices[0].public_key, PublicKey([0x12; 32]));
        assert_eq!(stats.devices[1].public_key, PublicKey([0x11; 32]));
        assert_eq!(stats.devices[0].power_outputs[5], 50);
        assert_eq!(stats.timeslot_offset, 0);
        assert!(gca_core::crypto::verify(
            &keypair.public_key(),
            &stats.signing_bytes().unwrap(),
            &stats.signature
        ));
    }
}
