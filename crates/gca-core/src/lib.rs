//! GCA Collection Core Library
//!
//! This crate provides the protocol types, the fixed-width wire codec, and
//! the cryptographic primitives shared by the GCA collection daemon and its
//! tooling.
//!
//! # Modules
//!
//! - [`types`]: Wire record types (EquipmentAuthorization, EquipmentReport, etc.)
//! - [`codec`]: Fixed-width encoders/decoders and signing-byte producers
//! - [`crypto`]: secp256k1 keypairs, deterministic signing, verification
//! - [`timeslot`]: Five-minute timeslot clock with a test override
//! - [`eventlog`]: Bounded in-memory event log
//! - [`ratelimit`]: Sliding-window rate limiter
//! - [`error`]: Error types

pub mod codec;
pub mod crypto;
pub mod error;
pub mod eventlog;
pub mod ratelimit;
pub mod timeslot;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
