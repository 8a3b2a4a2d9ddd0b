//! Wire record types for the GCA collection protocol
//!
//! Every fixed-size record here is bit-exact on the wire; field order and
//! endianness are frozen for compatibility with deployed IoT devices and
//! must not be changed without a protocol version bump. JSON representations
//! (HTTP bodies) use camelCase names with byte arrays as lowercase hex.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Compact 4-byte device identifier used on the wire in lieu of the key
pub type ShortId = u32;

/// Index of a 5-minute interval since the genesis instant
pub type Timeslot = u32;

/// Timeslots in one week
pub const TIMESLOTS_PER_WEEK: u32 = 2016;

/// Slots in the two-week per-device report ring
pub const RING_SLOTS: usize = 4032;

/// Sentinel power output: no report received for the slot
pub const NO_REPORT: u64 = 0;

/// Sentinel power output: slot invalidated by conflicting evidence
pub const SLOT_BANNED: u64 = 1;

// =============================================================================
// KEY AND SIGNATURE NEWTYPES
// =============================================================================

/// Compressed secp256k1 public key with the leading 0x02 prefix stripped
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; 32]);

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(de::Error::custom)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| de::Error::custom("public key must be 32 hex-encoded bytes"))?;
        Ok(PublicKey(arr))
    }
}

/// 64-byte secp256k1 signature (r ‖ s)
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    /// The all-zero signature, used as the historical placeholder slot in
    /// TCP sync responses
    pub fn zero() -> Self {
        Signature([0u8; 64])
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(de::Error::custom)?;
        if bytes.len() != 64 {
            return Err(de::Error::custom("signature must be 64 hex-encoded bytes"));
        }
        let mut arr = [0u8; 64];
        arr.copy_from_slice(&bytes);
        Ok(Signature(arr))
    }
}

// =============================================================================
// EQUIPMENT RECORDS
// =============================================================================

/// GCA-signed authorization installing a device under a ShortID.
///
/// 148 bytes on the wire, little-endian throughout. Signed with domain
/// "EquipmentAuthorization" by the GCA key.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentAuthorization {
    pub short_id: ShortId,
    pub public_key: PublicKey,
    pub latitude: f64,
    pub longitude: f64,
    /// Rated capacity in milliwatt-hours per timeslot
    pub capacity: u64,
    pub debt: u64,
    pub expiration: Timeslot,
    pub initialization: Timeslot,
    pub protocol_fee: u64,
    pub signature: Signature,
}

/// One device report for one timeslot.
///
/// 80 bytes on the wire, little-endian. Signed with domain "EquipmentReport"
/// by the device key. Exactly one fits a UDP datagram.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentReport {
    pub short_id: ShortId,
    pub timeslot: Timeslot,
    pub power_output: u64,
    pub signature: Signature,
}

// =============================================================================
// SERVER AND MIGRATION RECORDS
// =============================================================================

/// Peer record describing another collection server in the fleet.
///
/// Variable length (u8-prefixed location string). Signed with domain
/// "AuthorizedServer"; `gca_authorization` is the GCA's signature.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizedServer {
    pub public_key: PublicKey,
    pub banned: bool,
    pub location: String,
    pub http_port: u16,
    pub tcp_port: u16,
    pub udp_port: u16,
    pub gca_authorization: Signature,
}

/// Order handing a device to a new authority.
///
/// Signed with domain "EquipmentMigration" by the current GCA; each entry in
/// `new_servers` must verify under `new_gca_key`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentMigration {
    pub equipment_key: PublicKey,
    pub new_gca_key: PublicKey,
    pub new_short_id: ShortId,
    pub new_servers: Vec<AuthorizedServer>,
    pub signature: Signature,
}

/// One-shot registration of the real GCA key, signed by the pre-provisioned
/// temporary key with domain "GCARegistration"
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GcaRegistration {
    pub new_gca_key: PublicKey,
    pub signature: Signature,
}

// =============================================================================
// FROZEN WEEKLY STATS
// =============================================================================

/// Per-device slice of a frozen week: 2016 power outputs and impact rates
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStats {
    pub public_key: PublicKey,
    /// Exactly [`TIMESLOTS_PER_WEEK`] entries
    pub power_outputs: Vec<u64>,
    /// Exactly [`TIMESLOTS_PER_WEEK`] entries
    pub impact_rates: Vec<f64>,
}

/// Immutable weekly snapshot of every device, signed by the collection
/// server's static key with domain "AllDeviceStats".
///
/// Big-endian on the wire; devices are ordered by ascending ShortID at build
/// time so the record is deterministic.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AllDeviceStats {
    pub devices: Vec<DeviceStats>,
    pub timeslot_offset: Timeslot,
    pub signature: Signature,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_json_round_trip() {
        let key = PublicKey([0xab; 32]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_signature_rejects_wrong_length() {
        let short = format!("\"{}\"", "ab".repeat(10));
        assert!(serde_json::from_str::<Signature>(&short).is_err());
    }

    #[test]
    fn test_report_json_uses_camel_case() {
        let report = EquipmentReport {
            short_id: 7,
            timeslot: 42,
            power_output: 900,
            signature: Signature::zero(),
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"shortId\":7"));
        assert!(json.contains("\"powerOutput\":900"));
    }
}
