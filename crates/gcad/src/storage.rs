//! Append-only persistence for the collector
//!
//! One file per record kind under the server base directory. Every append is
//! a single OS write of one whole record, so readers of the files (the
//! archive producer in particular) always observe a consistent prefix
//! without taking the server's primary lock. Loaders reject files whose
//! length is not an exact multiple of the record size.

use gca_core::codec::{EQUIPMENT_AUTHORIZATION_LEN, EQUIPMENT_REPORT_LEN};
use gca_core::crypto::Keypair;
use gca_core::types::*;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// This server's public and private key (96 bytes, zero padded)
pub const SERVER_KEYS_FILE: &str = "server.keys";
/// Pre-provisioned temporary GCA public key
pub const GCA_TEMP_KEY_FILE: &str = "gcaTempPubKey.dat";
/// Real GCA public key, written after the one-shot registration
pub const GCA_KEY_FILE: &str = "gcaPubKey.dat";
/// Concatenated 148-byte equipment authorizations
pub const EQUIPMENT_AUTHS_FILE: &str = "equipment-authorizations.dat";
/// Concatenated 80-byte equipment reports
pub const EQUIPMENT_REPORTS_FILE: &str = "equipment-reports.dat";
/// Concatenated frozen weekly stats records
pub const ALL_DEVICE_STATS_FILE: &str = "allDeviceStats.dat";
/// Length-prefixed equipment migration orders
pub const EQUIPMENT_MIGRATIONS_FILE: &str = "equipment-migrations.dat";

/// server.keys layout: pubkey ‖ privkey ‖ zero padding
const SERVER_KEYS_LEN: usize = 96;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error on {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{file} is corrupt: {reason}")]
    Corrupt { file: String, reason: String },

    #[error("codec error in {file}: {source}")]
    Codec {
        file: String,
        #[source]
        source: gca_core::Error,
    },

    #[error("missing temporary GCA key file {0}; it must be provisioned before first boot")]
    MissingTempKey(String),
}

impl StorageError {
    fn io(file: &str, source: std::io::Error) -> Self {
        Self::Io {
            file: file.to_string(),
            source,
        }
    }

    fn corrupt(file: &str, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            file: file.to_string(),
            reason: reason.into(),
        }
    }
}

/// Append handles for the per-kind record files
pub struct Storage {
    base: PathBuf,
    auth_file: Mutex<File>,
    report_file: Mutex<File>,
    stats_file: Mutex<File>,
    migration_file: Mutex<File>,
}

impl Storage {
    /// Open (creating as needed) the base directory and the append handles
    pub fn open(base: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base).map_err(|e| StorageError::io("base directory", e))?;
        Ok(Self {
            auth_file: Mutex::new(open_append(&base, EQUIPMENT_AUTHS_FILE)?),
            report_file: Mutex::new(open_append(&base, EQUIPMENT_REPORTS_FILE)?),
            stats_file: Mutex::new(open_append(&base, ALL_DEVICE_STATS_FILE)?),
            migration_file: Mutex::new(open_append(&base, EQUIPMENT_MIGRATIONS_FILE)?),
            base,
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Files included in the public archive snapshot, in reverse dependency
    /// order (leaves last)
    pub fn public_files() -> [&'static str; 6] {
        [
            ALL_DEVICE_STATS_FILE,
            EQUIPMENT_REPORTS_FILE,
            EQUIPMENT_AUTHS_FILE,
            EQUIPMENT_MIGRATIONS_FILE,
            GCA_KEY_FILE,
            GCA_TEMP_KEY_FILE,
        ]
    }

    fn append(file: &Mutex<File>, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let mut file = file.lock();
        file.write_all(bytes).map_err(|e| StorageError::io(name, e))
    }

    // -------------------------------------------------------------------------
    // Appends (one OS write per record)
    // -------------------------------------------------------------------------

    pub fn append_authorization(&self, auth: &EquipmentAuthorization) -> Result<(), StorageError> {
        Self::append(&self.auth_file, EQUIPMENT_AUTHS_FILE, &auth.encode())
    }

    pub fn append_report(&self, report: &EquipmentReport) -> Result<(), StorageError> {
        Self::append(&self.report_file, EQUIPMENT_REPORTS_FILE, &report.encode())
    }

    pub fn append_stats(&self, stats: &AllDeviceStats) -> Result<(), StorageError> {
        let bytes = stats.encode().map_err(|e| StorageError::Codec {
            file: ALL_DEVICE_STATS_FILE.to_string(),
            source: e,
        })?;
        Self::append(&self.stats_file, ALL_DEVICE_STATS_FILE, &bytes)
    }

    pub fn append_migration(&self, migration: &EquipmentMigration) -> Result<(), StorageError> {
        let record = migration.encode().map_err(|e| StorageError::Codec {
            file: EQUIPMENT_MIGRATIONS_FILE.to_string(),
            source: e,
        })?;
        let mut bytes = Vec::with_capacity(4 + record.len());
        bytes.extend_from_slice(&(record.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&record);
        Self::append(&self.migration_file, EQUIPMENT_MIGRATIONS_FILE, &bytes)
    }

    // -------------------------------------------------------------------------
    // Loads (replayed in order at startup)
    // -------------------------------------------------------------------------

    pub fn load_authorizations(&self) -> Result<Vec<EquipmentAuthorization>, StorageError> {
        let bytes = read_or_empty(&self.base, EQUIPMENT_AUTHS_FILE)?;
        if bytes.len() % EQUIPMENT_AUTHORIZATION_LEN != 0 {
            return Err(StorageError::corrupt(
                EQUIPMENT_AUTHS_FILE,
                format!("{} bytes is not a whole number of records", bytes.len()),
            ));
        }
        bytes
            .chunks_exact(EQUIPMENT_AUTHORIZATION_LEN)
            .map(|chunk| {
                EquipmentAuthorization::decode(chunk).map_err(|e| StorageError::Codec {
                    file: EQUIPMENT_AUTHS_FILE.to_string(),
                    source: e,
                })
            })
            .collect()
    }

    pub fn load_reports(&self) -> Result<Vec<EquipmentReport>, StorageError> {
        let bytes = read_or_empty(&self.base, EQUIPMENT_REPORTS_FILE)?;
        if bytes.len() % EQUIPMENT_REPORT_LEN != 0 {
            return Err(StorageError::corrupt(
                EQUIPMENT_REPORTS_FILE,
                format!("{} bytes is not a whole number of records", bytes.len()),
            ));
        }
        bytes
            .chunks_exact(EQUIPMENT_REPORT_LEN)
            .map(|chunk| {
                EquipmentReport::decode(chunk).map_err(|e| StorageError::Codec {
                    file: EQUIPMENT_REPORTS_FILE.to_string(),
                    source: e,
                })
            })
            .collect()
    }

    pub fn load_stats_history(&self) -> Result<Vec<AllDeviceStats>, StorageError> {
        let bytes = read_or_empty(&self.base, ALL_DEVICE_STATS_FILE)?;
        AllDeviceStats::decode_history(&bytes).map_err(|e| StorageError::Codec {
            file: ALL_DEVICE_STATS_FILE.to_string(),
            source: e,
        })
    }

    pub fn load_migrations(&self) -> Result<Vec<EquipmentMigration>, StorageError> {
        let bytes = read_or_empty(&self.base, EQUIPMENT_MIGRATIONS_FILE)?;
        let mut out = Vec::new();
        let mut pos = 0usize;
        while pos < bytes.len() {
            if pos + 4 > bytes.len() {
                return Err(StorageError::corrupt(
                    EQUIPMENT_MIGRATIONS_FILE,
                    "truncated length prefix",
                ));
            }
            let len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4;
            if pos + len > bytes.len() {
                return Err(StorageError::corrupt(
                    EQUIPMENT_MIGRATIONS_FILE,
                    "record truncated mid-body",
                ));
            }
            let migration =
                EquipmentMigration::decode(&bytes[pos..pos + len]).map_err(|e| {
                    StorageError::Codec {
                        file: EQUIPMENT_MIGRATIONS_FILE.to_string(),
                        source: e,
                    }
                })?;
            out.push(migration);
            pos += len;
        }
        Ok(out)
    }

    // -------------------------------------------------------------------------
    // Key material
    // -------------------------------------------------------------------------

    /// Load the server keypair, generating and persisting one on first boot
    pub fn load_or_create_server_keys(&self) -> Result<Keypair, StorageError> {
        let path = self.base.join(SERVER_KEYS_FILE);
        if !path.exists() {
            let keypair = Keypair::generate();
            let mut bytes = Vec::with_capacity(SERVER_KEYS_LEN);
            bytes.extend_from_slice(&keypair.public_key().0);
            bytes.extend_from_slice(&keypair.secret_bytes());
            bytes.resize(SERVER_KEYS_LEN, 0);
            fs::write(&path, &bytes).map_err(|e| StorageError::io(SERVER_KEYS_FILE, e))?;
            return Ok(keypair);
        }
        let bytes = fs::read(&path).map_err(|e| StorageError::io(SERVER_KEYS_FILE, e))?;
        if bytes.len() != SERVER_KEYS_LEN {
            return Err(StorageError::corrupt(
                SERVER_KEYS_FILE,
                format!("{} bytes, want {SERVER_KEYS_LEN}", bytes.len()),
            ));
        }
        let public: [u8; 32] = bytes[0..32].try_into().unwrap();
        let secret: [u8; 32] = bytes[32..64].try_into().unwrap();
        Keypair::from_bytes(&public, &secret).map_err(|_| {
            StorageError::corrupt(SERVER_KEYS_FILE, "key material does not verify")
        })
    }

    /// The pre-provisioned temporary GCA key must exist before first boot
    pub fn load_temp_gca_key(&self) -> Result<PublicKey, StorageError> {
        let path = self.base.join(GCA_TEMP_KEY_FILE);
        if !path.exists() {
            return Err(StorageError::MissingTempKey(path.display().to_string()));
        }
        read_pubkey(&path, GCA_TEMP_KEY_FILE)
    }

    /// The real GCA key exists only after registration
    pub fn load_gca_key(&self) -> Result<Option<PublicKey>, StorageError> {
        let path = self.base.join(GCA_KEY_FILE);
        if !path.exists() {
            return Ok(None);
        }
        read_pubkey(&path, GCA_KEY_FILE).map(Some)
    }

    pub fn save_gca_key(&self, key: &PublicKey) -> Result<(), StorageError> {
        fs::write(self.base.join(GCA_KEY_FILE), key.0)
            .map_err(|e| StorageError::io(GCA_KEY_FILE, e))
    }
}

fn open_append(base: &Path, name: &str) -> Result<File, StorageError> {
    OpenOptions::new()
        .append(true)
        .create(true)
        .open(base.join(name))
        .map_err(|e| StorageError::io(name, e))
}

fn read_or_empty(base: &Path, name: &str) -> Result<Vec<u8>, StorageError> {
    let path = base.join(name);
    if !path.exists() {
        return Ok(Vec::new());
    }
    fs::read(&path).map_err(|e| StorageError::io(name, e))
}

fn read_pubkey(path: &Path, name: &str) -> Result<PublicKey, StorageError> {
    let bytes = fs::read(path).map_err(|e| StorageError::io(name, e))?;
    let arr: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| StorageError::corrupt(name, format!("{} bytes, want 32", bytes.len())))?;
    Ok(PublicKey(arr))
}
