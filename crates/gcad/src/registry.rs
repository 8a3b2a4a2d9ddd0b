//! Registry operations: GCA bootstrap, equipment onboarding, migrations,
//! and the peer-server list
//!
//! Every operation verifies its signature before touching state, appends the
//! record to disk before mutating (so replay reconstructs identical state),
//! and holds the primary lock only around the mutation itself.

use crate::server::Server;
use crate::state::AuthOutcome;
use crate::storage::StorageError;
use gca_core::crypto;
use gca_core::types::*;
use thiserror::Error;

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("a GCA key is already registered")]
    GcaKeyAlreadyRegistered,

    #[error("no GCA key has been registered yet")]
    NoGcaKey,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("equipment {0} is banned")]
    Banned(ShortId),

    #[error("duplicate authorization received, banning equipment")]
    DuplicateAuthorization,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] gca_core::Error),
}

/// What `add_authorized_server` did with the record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerAddOutcome {
    /// The pubkey is already banned; nothing changed
    AlreadyBanned,
    /// The record (or an equivalent unbanned one) is already present
    Unchanged,
    /// An existing record was flipped to banned
    BanApplied,
    /// A new peer was appended; the caller gossips it onward
    Added,
}

impl Server {
    /// One-shot registration of the real GCA key.
    ///
    /// Verifies the signature under the pre-provisioned temporary key and
    /// refuses once a real key has been saved.
    pub fn register_gca(&self, registration: &GcaRegistration) -> Result<(), RegistryError> {
        {
            let mut state = self.state();
            if state.gca_key.is_some() {
                return Err(RegistryError::GcaKeyAlreadyRegistered);
            }
            if !crypto::verify(
                &state.gca_temp_key,
                &registration.signing_bytes(),
                &registration.signature,
            ) {
                return Err(RegistryError::InvalidSignature);
            }
            state.gca_key = Some(registration.new_gca_key);
        }
        // the key is reserved in memory; persist it outside the lock
        if let Err(e) = self.storage().save_gca_key(&registration.new_gca_key) {
            self.state().gca_key = None;
            return Err(e.into());
        }
        self.events().append(format!(
            "GCA key registered: {}",
            hex::encode(registration.new_gca_key.0)
        ));
        Ok(())
    }

    /// Install, ignore, or conflict-ban an equipment authorization.
    ///
    /// Returns `true` when the authorization installed a new device. The
    /// record lands on disk before state changes, and a conflicting
    /// re-authorization stays on disk as evidence of the ban.
    pub fn save_equipment(&self, auth: &EquipmentAuthorization) -> Result<bool, RegistryError> {
        {
            let state = self.state();
            let gca_key = state.gca_key.ok_or(RegistryError::NoGcaKey)?;
            if !crypto::verify(&gca_key, &auth.signing_bytes(), &auth.signature) {
                return Err(RegistryError::InvalidSignature);
            }
            if state.is_banned(auth.short_id) {
                return Err(RegistryError::Banned(auth.short_id));
            }
            if !state.authorization_mutates(auth) {
                return Ok(false);
            }
        }

        self.storage().append_authorization(auth)?;

        match self.state().integrate_authorization(auth) {
            AuthOutcome::Installed => {
                self.events()
                    .append(format!("equipment {} authorized", auth.short_id));
                Ok(true)
            }
            AuthOutcome::Unchanged => Ok(false),
            AuthOutcome::Rejected => Err(RegistryError::Banned(auth.short_id)),
            AuthOutcome::ConflictBanned => {
                self.events().append(format!(
                    "conflicting re-authorization for {}; equipment banned",
                    auth.short_id
                ));
                Err(RegistryError::DuplicateAuthorization)
            }
        }
    }

    /// Validate and store an equipment migration order.
    ///
    /// The outer signature must verify under the current GCA key and every
    /// listed server under the new GCA key.
    pub fn store_migration(&self, migration: &EquipmentMigration) -> Result<(), RegistryError> {
        {
            let state = self.state();
            let gca_key = state.gca_key.ok_or(RegistryError::NoGcaKey)?;
            if !crypto::verify(&gca_key, &migration.signing_bytes()?, &migration.signature) {
                return Err(RegistryError::InvalidSignature);
            }
            for server in &migration.new_servers {
                if !crypto::verify(
                    &migration.new_gca_key,
                    &server.signing_bytes()?,
                    &server.gca_authorization,
                ) {
                    return Err(RegistryError::InvalidSignature);
                }
            }
        }

        self.storage().append_migration(migration)?;
        self.state()
            .migrations
            .insert(migration.equipment_key, migration.clone());
        self.events().append(format!(
            "migration stored for equipment {}",
            hex::encode(migration.equipment_key.0)
        ));
        Ok(())
    }

    /// Apply the dedup rules for a gossiped peer-server record.
    ///
    /// Recipients must be idempotent: gossip is best-effort and unordered.
    pub fn add_authorized_server(
        &self,
        record: &AuthorizedServer,
    ) -> Result<ServerAddOutcome, RegistryError> {
        {
            let state = self.state();
            let gca_key = state.gca_key.ok_or(RegistryError::NoGcaKey)?;
            if !crypto::verify(&gca_key, &record.signing_bytes()?, &record.gca_authorization) {
                return Err(RegistryError::InvalidSignature);
            }
        }

        let mut servers = self.gca_servers();
        match servers
            .iter_mut()
            .find(|s| s.public_key == record.public_key)
        {
            Some(existing) if existing.banned => Ok(ServerAddOutcome::AlreadyBanned),
            Some(existing) if record.banned => {
                *existing = record.clone();
                self.events().append(format!(
                    "peer server {} banned",
                    hex::encode(record.public_key.0)
                ));
                Ok(ServerAddOutcome::BanApplied)
            }
            Some(_) => Ok(ServerAddOutcome::Unchanged),
            None => {
                servers.push(record.clone());
                Ok(ServerAddOutcome::Added)
            }
        }
    }
}
