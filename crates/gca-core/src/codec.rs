//! Fixed-width encoders/decoders and signing-byte producers
//!
//! One encoder and one decoder per record kind. Endianness is fixed per
//! field: IoT-facing records (authorizations, reports, registrations,
//! migrations) are little-endian, the frozen weekly stats are big-endian.
//! The mix is a compatibility constraint with deployed devices; do not
//! normalize it.
//!
//! Signing operates on `SigningBytes(x) = domain(x) ‖ encode_unsigned(x)`,
//! where `encode_unsigned` is the record serialization with its own trailing
//! signature omitted.

use crate::error::{Error, Result};
use crate::types::*;

// =============================================================================
// DOMAIN SEPARATORS
// =============================================================================

/// Domain separator for equipment authorizations
pub const DOMAIN_EQUIPMENT_AUTHORIZATION: &[u8] = b"EquipmentAuthorization";
/// Domain separator for equipment reports
pub const DOMAIN_EQUIPMENT_REPORT: &[u8] = b"EquipmentReport";
/// Domain separator for peer server records
pub const DOMAIN_AUTHORIZED_SERVER: &[u8] = b"AuthorizedServer";
/// Domain separator for equipment migration orders
pub const DOMAIN_EQUIPMENT_MIGRATION: &[u8] = b"EquipmentMigration";
/// Domain separator for frozen weekly stats
pub const DOMAIN_ALL_DEVICE_STATS: &[u8] = b"AllDeviceStats";
/// Domain separator for GCA key registration
pub const DOMAIN_GCA_REGISTRATION: &[u8] = b"GCARegistration";

// =============================================================================
// RECORD SIZES
// =============================================================================

/// Encoded size of an [`EquipmentAuthorization`]
pub const EQUIPMENT_AUTHORIZATION_LEN: usize = 148;
/// Encoded size of an [`EquipmentReport`]
pub const EQUIPMENT_REPORT_LEN: usize = 80;
/// Encoded size of a [`GcaRegistration`]
pub const GCA_REGISTRATION_LEN: usize = 96;
/// Encoded size of one device inside an [`AllDeviceStats`]
pub const DEVICE_STATS_LEN: usize = 32 + TIMESLOTS_PER_WEEK as usize * 16;

// =============================================================================
// DECODE HELPER
// =============================================================================

/// Cursor over a byte slice with checked reads
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(Error::Truncated(self.buf.len()));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u32_be(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64_le(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn u64_be(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f64_le(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f64_be(&mut self) -> Result<f64> {
        Ok(f64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn pubkey(&mut self) -> Result<PublicKey> {
        Ok(PublicKey(self.take(32)?.try_into().unwrap()))
    }

    fn signature(&mut self) -> Result<Signature> {
        let mut arr = [0u8; 64];
        arr.copy_from_slice(self.take(64)?);
        Ok(Signature(arr))
    }

    /// Every decoder must consume its input exactly
    fn finish(self) -> Result<()> {
        let rest = self.buf.len() - self.pos;
        if rest != 0 {
            return Err(Error::TrailingBytes(rest));
        }
        Ok(())
    }
}

fn check_len(buf: &[u8], want: usize) -> Result<()> {
    if buf.len() != want {
        return Err(Error::WrongLength {
            got: buf.len(),
            want,
        });
    }
    Ok(())
}

// =============================================================================
// EQUIPMENT AUTHORIZATION
// =============================================================================

impl EquipmentAuthorization {
    /// Serialize without the trailing signature (84 bytes)
    fn encode_unsigned(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.short_id.to_le_bytes());
        out.extend_from_slice(&self.public_key.0);
        out.extend_from_slice(&self.latitude.to_le_bytes());
        out.extend_from_slice(&self.longitude.to_le_bytes());
        out.extend_from_slice(&self.capacity.to_le_bytes());
        out.extend_from_slice(&self.debt.to_le_bytes());
        out.extend_from_slice(&self.expiration.to_le_bytes());
        out.extend_from_slice(&self.initialization.to_le_bytes());
        out.extend_from_slice(&self.protocol_fee.to_le_bytes());
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(EQUIPMENT_AUTHORIZATION_LEN);
        self.encode_unsigned(&mut out);
        out.extend_from_slice(&self.signature.0);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len(buf, EQUIPMENT_AUTHORIZATION_LEN)?;
        let mut r = Reader::new(buf);
        let auth = Self {
            short_id: r.u32_le()?,
            public_key: r.pubkey()?,
            latitude: r.f64_le()?,
            longitude: r.f64_le()?,
            capacity: r.u64_le()?,
            debt: r.u64_le()?,
            expiration: r.u32_le()?,
            initialization: r.u32_le()?,
            protocol_fee: r.u64_le()?,
            signature: r.signature()?,
        };
        r.finish()?;
        Ok(auth)
    }

    /// Bytes the GCA signs: domain separator ‖ unsigned serialization
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            DOMAIN_EQUIPMENT_AUTHORIZATION.len() + EQUIPMENT_AUTHORIZATION_LEN - 64,
        );
        out.extend_from_slice(DOMAIN_EQUIPMENT_AUTHORIZATION);
        self.encode_unsigned(&mut out);
        out
    }
}

// =============================================================================
// EQUIPMENT REPORT
// =============================================================================

impl EquipmentReport {
    fn encode_unsigned(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.short_id.to_le_bytes());
        out.extend_from_slice(&self.timeslot.to_le_bytes());
        out.extend_from_slice(&self.power_output.to_le_bytes());
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(EQUIPMENT_REPORT_LEN);
        self.encode_unsigned(&mut out);
        out.extend_from_slice(&self.signature.0);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len(buf, EQUIPMENT_REPORT_LEN)?;
        let mut r = Reader::new(buf);
        let report = Self {
            short_id: r.u32_le()?,
            timeslot: r.u32_le()?,
            power_output: r.u64_le()?,
            signature: r.signature()?,
        };
        r.finish()?;
        Ok(report)
    }

    /// Bytes the device signs: domain separator ‖ unsigned serialization
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(DOMAIN_EQUIPMENT_REPORT.len() + EQUIPMENT_REPORT_LEN - 64);
        out.extend_from_slice(DOMAIN_EQUIPMENT_REPORT);
        self.encode_unsigned(&mut out);
        out
    }
}

// =============================================================================
// AUTHORIZED SERVER
// =============================================================================

impl AuthorizedServer {
    fn encode_unsigned(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.location.len() > u8::MAX as usize {
            return Err(Error::InvalidField {
                field: "location",
                reason: format!("{} bytes exceeds the u8 length prefix", self.location.len()),
            });
        }
        out.extend_from_slice(&self.public_key.0);
        out.push(self.banned as u8);
        out.push(self.location.len() as u8);
        out.extend_from_slice(self.location.as_bytes());
        out.extend_from_slice(&self.http_port.to_le_bytes());
        out.extend_from_slice(&self.tcp_port.to_le_bytes());
        out.extend_from_slice(&self.udp_port.to_le_bytes());
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(104 + self.location.len());
        self.encode_unsigned(&mut out)?;
        out.extend_from_slice(&self.gca_authorization.0);
        Ok(out)
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = Reader::new(buf);
        let server = Self::decode_from(&mut r)?;
        r.finish()?;
        Ok(server)
    }

    /// Decode one record from a cursor; used for concatenated server lists
    fn decode_from(r: &mut Reader<'_>) -> Result<Self> {
        let public_key = r.pubkey()?;
        let banned = match r.u8()? {
            0 => false,
            1 => true,
            other => {
                return Err(Error::InvalidField {
                    field: "banned",
                    reason: format!("flag byte {other}"),
                })
            }
        };
        let loc_len = r.u8()? as usize;
        let location = String::from_utf8(r.take(loc_len)?.to_vec()).map_err(|e| {
            Error::InvalidField {
                field: "location",
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            public_key,
            banned,
            location,
            http_port: r.u16_le()?,
            tcp_port: r.u16_le()?,
            udp_port: r.u16_le()?,
            gca_authorization: r.signature()?,
        })
    }

    /// Bytes the GCA signs: domain separator ‖ unsigned serialization
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(DOMAIN_AUTHORIZED_SERVER.len() + 40 + self.location.len());
        out.extend_from_slice(DOMAIN_AUTHORIZED_SERVER);
        self.encode_unsigned(&mut out)?;
        Ok(out)
    }
}

// =============================================================================
// EQUIPMENT MIGRATION
// =============================================================================

impl EquipmentMigration {
    fn encode_unsigned(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&self.equipment_key.0);
        out.extend_from_slice(&self.new_gca_key.0);
        out.extend_from_slice(&self.new_short_id.to_le_bytes());
        out.extend_from_slice(&(self.new_servers.len() as u32).to_le_bytes());
        for server in &self.new_servers {
            out.extend_from_slice(&server.encode()?);
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(136 + self.new_servers.len() * 128);
        self.encode_unsigned(&mut out)?;
        out.extend_from_slice(&self.signature.0);
        Ok(out)
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = Reader::new(buf);
        let equipment_key = r.pubkey()?;
        let new_gca_key = r.pubkey()?;
        let new_short_id = r.u32_le()?;
        let count = r.u32_le()? as usize;
        let mut new_servers = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            new_servers.push(AuthorizedServer::decode_from(&mut r)?);
        }
        let signature = r.signature()?;
        r.finish()?;
        Ok(Self {
            equipment_key,
            new_gca_key,
            new_short_id,
            new_servers,
            signature,
        })
    }

    /// Bytes the current GCA signs: domain separator ‖ unsigned serialization
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(DOMAIN_EQUIPMENT_MIGRATION);
        self.encode_unsigned(&mut out)?;
        Ok(out)
    }
}

// =============================================================================
// GCA REGISTRATION
// =============================================================================

impl GcaRegistration {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(GCA_REGISTRATION_LEN);
        out.extend_from_slice(&self.new_gca_key.0);
        out.extend_from_slice(&self.signature.0);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len(buf, GCA_REGISTRATION_LEN)?;
        let mut r = Reader::new(buf);
        let reg = Self {
            new_gca_key: r.pubkey()?,
            signature: r.signature()?,
        };
        r.finish()?;
        Ok(reg)
    }

    /// Bytes the temporary GCA key signs: domain separator ‖ new key
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(DOMAIN_GCA_REGISTRATION.len() + 32);
        out.extend_from_slice(DOMAIN_GCA_REGISTRATION);
        out.extend_from_slice(&self.new_gca_key.0);
        out
    }
}

// =============================================================================
// ALL DEVICE STATS
// =============================================================================

impl AllDeviceStats {
    fn encode_unsigned(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&(self.devices.len() as u32).to_be_bytes());
        for device in &self.devices {
            if device.power_outputs.len() != TIMESLOTS_PER_WEEK as usize {
                return Err(Error::InvalidField {
                    field: "power_outputs",
                    reason: format!("{} entries, want {TIMESLOTS_PER_WEEK}", device.power_outputs.len()),
                });
            }
            if device.impact_rates.len() != TIMESLOTS_PER_WEEK as usize {
                return Err(Error::InvalidField {
                    field: "impact_rates",
                    reason: format!("{} entries, want {TIMESLOTS_PER_WEEK}", device.impact_rates.len()),
                });
            }
            out.extend_from_slice(&device.public_key.0);
            for power in &device.power_outputs {
                out.extend_from_slice(&power.to_be_bytes());
            }
            for rate in &device.impact_rates {
                out.extend_from_slice(&rate.to_be_bytes());
            }
        }
        out.extend_from_slice(&self.timeslot_offset.to_be_bytes());
        Ok(())
    }

    pub fn encoded_len(&self) -> usize {
        4 + self.devices.len() * DEVICE_STATS_LEN + 4 + 64
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_unsigned(&mut out)?;
        out.extend_from_slice(&self.signature.0);
        Ok(out)
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = Reader::new(buf);
        let stats = Self::decode_from(&mut r)?;
        r.finish()?;
        Ok(stats)
    }

    /// Decode one record from a cursor; the history file concatenates them
    fn decode_from(r: &mut Reader<'_>) -> Result<Self> {
        let count = r.u32_be()? as usize;
        let mut devices = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let public_key = r.pubkey()?;
            let mut power_outputs = Vec::with_capacity(TIMESLOTS_PER_WEEK as usize);
            for _ in 0..TIMESLOTS_PER_WEEK {
                power_outputs.push(r.u64_be()?);
            }
            let mut impact_rates = Vec::with_capacity(TIMESLOTS_PER_WEEK as usize);
            for _ in 0..TIMESLOTS_PER_WEEK {
                impact_rates.push(r.f64_be()?);
            }
            devices.push(DeviceStats {
                public_key,
                power_outputs,
                impact_rates,
            });
        }
        let timeslot_offset = r.u32_be()?;
        let signature = r.signature()?;
        Ok(Self {
            devices,
            timeslot_offset,
            signature,
        })
    }

    /// Bytes the server signs: domain separator ‖ unsigned serialization
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(DOMAIN_ALL_DEVICE_STATS.len() + self.encoded_len() - 64);
        out.extend_from_slice(DOMAIN_ALL_DEVICE_STATS);
        self.encode_unsigned(&mut out)?;
        Ok(out)
    }

    /// Split a history file (concatenated records) into individual records
    pub fn decode_history(buf: &[u8]) -> Result<Vec<Self>> {
        let mut r = Reader::new(buf);
        let mut out = Vec::new();
        while r.pos < r.buf.len() {
            out.push(Self::decode_from(&mut r)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_auth() -> EquipmentAuthorization {
        EquipmentAuthorization {
            short_id: 12345,
            public_key: PublicKey([0x11; 32]),
            latitude: 40.7128,
            longitude: -74.0060,
            capacity: 100_000_000,
            debt: 2_000_000,
            expiration: 10_000,
            initialization: 100,
            protocol_fee: 500,
            signature: Signature([0x22; 64]),
        }
    }

    fn sample_server() -> AuthorizedServer {
        AuthorizedServer {
            public_key: PublicKey([0x33; 32]),
            banned: false,
            location: "us-east".to_string(),
            http_port: 35015,
            tcp_port: 35030,
            udp_port: 35045,
            gca_authorization: Signature([0x44; 64]),
        }
    }

    #[test]
    fn test_authorization_round_trip() {
        let auth = sample_auth();
        let bytes = auth.encode();
        assert_eq!(bytes.len(), EQUIPMENT_AUTHORIZATION_LEN);
        assert_eq!(EquipmentAuthorization::decode(&bytes).unwrap(), auth);
    }

    #[test]
    fn test_authorization_rejects_wrong_length() {
        let auth = sample_auth();
        let mut bytes = auth.encode();
        bytes.push(0);
        assert!(matches!(
            EquipmentAuthorization::decode(&bytes),
            Err(Error::WrongLength { got: 149, want: 148 })
        ));
        bytes.truncate(100);
        assert!(EquipmentAuthorization::decode(&bytes).is_err());
    }

    #[test]
    fn test_report_round_trip() {
        let report = EquipmentReport {
            short_id: 7,
            timeslot: 4031,
            power_output: 55_000,
            signature: Signature([0x99; 64]),
        };
        let bytes = report.encode();
        assert_eq!(bytes.len(), EQUIPMENT_REPORT_LEN);
        assert_eq!(EquipmentReport::decode(&bytes).unwrap(), report);
    }

    #[test]
    fn test_report_little_endian_layout() {
        let report = EquipmentReport {
            short_id: 0x0102_0304,
            timeslot: 0x0506_0708,
            power_output: 0x1122_3344_5566_7788,
            signature: Signature::zero(),
        };
        let bytes = report.encode();
        assert_eq!(&bytes[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[4..8], &[0x08, 0x07, 0x06, 0x05]);
        assert_eq!(&bytes[8..16], &[0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]);
    }

    #[test]
    fn test_server_round_trip() {
        let server = sample_server();
        let bytes = server.encode().unwrap();
        assert_eq!(bytes.len(), 104 + server.location.len());
        assert_eq!(AuthorizedServer::decode(&bytes).unwrap(), server);
    }

    #[test]
    fn test_server_rejects_bad_ban_flag() {
        let server = sample_server();
        let mut bytes = server.encode().unwrap();
        bytes[32] = 7;
        assert!(AuthorizedServer::decode(&bytes).is_err());
    }

    #[test]
    fn test_migration_round_trip() {
        let migration = EquipmentMigration {
            equipment_key: PublicKey([0x55; 32]),
            new_gca_key: PublicKey([0x66; 32]),
            new_short_id: 42,
            new_servers: vec![sample_server(), {
                let mut s = sample_server();
                s.location = "eu-west".to_string();
                s.banned = true;
                s
            }],
            signature: Signature([0x77; 64]),
        };
        let bytes = migration.encode().unwrap();
        assert_eq!(EquipmentMigration::decode(&bytes).unwrap(), migration);
    }

    #[test]
    fn test_migration_rejects_trailing_bytes() {
        let migration = EquipmentMigration {
            equipment_key: PublicKey([0x55; 32]),
            new_gca_key: PublicKey([0x66; 32]),
            new_short_id: 42,
            new_servers: vec![],
            signature: Signature([0x77; 64]),
        };
        let mut bytes = migration.encode().unwrap();
        bytes.extend_from_slice(&[0, 0]);
        assert!(matches!(
            EquipmentMigration::decode(&bytes),
            Err(Error::TrailingBytes(2))
        ));
    }

    #[test]
    fn test_registration_round_trip() {
        let reg = GcaRegistration {
            new_gca_key: PublicKey([0xaa; 32]),
            signature: Signature([0xbb; 64]),
        };
        let bytes = reg.encode();
        assert_eq!(bytes.len(), GCA_REGISTRATION_LEN);
        assert_eq!(GcaRegistration::decode(&bytes).unwrap(), reg);
    }

    #[test]
    fn test_stats_round_trip_and_big_endian() {
        let stats = AllDeviceStats {
            devices: vec![DeviceStats {
                public_key: PublicKey([0xcc; 32]),
                power_outputs: (0..TIMESLOTS_PER_WEEK as u64).collect(),
                impact_rates: vec![1.5; TIMESLOTS_PER_WEEK as usize],
            }],
            timeslot_offset: 2016,
            signature: Signature([0xdd; 64]),
        };
        let bytes = stats.encode().unwrap();
        assert_eq!(bytes.len(), 4 + DEVICE_STATS_LEN + 4 + 64);
        // count and offset are big-endian
        assert_eq!(&bytes[0..4], &[0, 0, 0, 1]);
        let off = bytes.len() - 64 - 4;
        assert_eq!(&bytes[off..off + 4], &[0, 0, 0x07, 0xe0]);
        assert_eq!(AllDeviceStats::decode(&bytes).unwrap(), stats);
    }

    #[test]
    fn test_stats_rejects_short_week() {
        let stats = AllDeviceStats {
            devices: vec![DeviceStats {
                public_key: PublicKey([0xcc; 32]),
                power_outputs: vec![0; 100],
                impact_rates: vec![0.0; TIMESLOTS_PER_WEEK as usize],
            }],
            timeslot_offset: 0,
            signature: Signature::zero(),
        };
        assert!(stats.encode().is_err());
    }

    #[test]
    fn test_history_decode_splits_records() {
        let record = AllDeviceStats {
            devices: vec![],
            timeslot_offset: 0,
            signature: Signature([0x01; 64]),
        };
        let mut file = record.encode().unwrap();
        let second = AllDeviceStats {
            devices: vec![],
            timeslot_offset: 2016,
            signature: Signature([0x02; 64]),
        };
        file.extend_from_slice(&second.encode().unwrap());
        let history = AllDeviceStats::decode_history(&file).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].timeslot_offset, 2016);
    }

    #[test]
    fn test_signing_bytes_carry_domain_prefix() {
        let auth = sample_auth();
        assert!(auth.signing_bytes().starts_with(DOMAIN_EQUIPMENT_AUTHORIZATION));
        let server = sample_server();
        assert!(server
            .signing_bytes()
            .unwrap()
            .starts_with(DOMAIN_AUTHORIZED_SERVER));
        // unsigned serialization excludes the trailing signature
        let signed = auth.encode();
        let unsigned = &auth.signing_bytes()[DOMAIN_EQUIPMENT_AUTHORIZATION.len()..];
        assert_eq!(unsigned, &signed[..signed.len() - 64]);
    }
}
