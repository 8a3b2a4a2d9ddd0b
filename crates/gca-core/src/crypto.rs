//! secp256k1 signing and verification
//!
//! All identity and authorization uses compressed secp256k1 public keys with
//! the leading 0x02 prefix byte stripped, so a key is exactly 32 stored
//! bytes. Key generation retries until the compressed prefix is 0x02, which
//! keeps the stored form unambiguous. Signing is deterministic ECDSA
//! (RFC 6979) over the Keccak-256 digest of the payload; signatures are the
//! 64-byte r ‖ s form.

use crate::error::{Error, Result};
use crate::types::{PublicKey, Signature};
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha3::{Digest, Keccak256};

/// Compressed-point prefix every stored key must carry
const EVEN_Y_PREFIX: u8 = 0x02;

/// Keccak-256 digest of a byte string
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// secp256k1 keypair with the 32-byte stored public form
#[derive(Clone)]
pub struct Keypair {
    public: PublicKey,
    secret: SigningKey,
}

impl Keypair {
    /// Generate a new keypair, retrying until the compressed public key has
    /// the 0x02 prefix
    pub fn generate() -> Self {
        loop {
            let secret = SigningKey::random(&mut OsRng);
            let point = secret.verifying_key().to_encoded_point(true);
            if point.as_bytes()[0] == EVEN_Y_PREFIX {
                let mut public = [0u8; 32];
                public.copy_from_slice(&point.as_bytes()[1..33]);
                return Self {
                    public: PublicKey(public),
                    secret,
                };
            }
        }
    }

    /// Rebuild a keypair from stored key material, checking that the secret
    /// actually derives the stored public key
    pub fn from_bytes(public: &[u8; 32], secret: &[u8; 32]) -> Result<Self> {
        let secret = SigningKey::from_bytes(secret.into()).map_err(|_| Error::InvalidPrivateKey)?;
        let point = secret.verifying_key().to_encoded_point(true);
        if point.as_bytes()[0] != EVEN_Y_PREFIX || &point.as_bytes()[1..33] != public {
            return Err(Error::InvalidPrivateKey);
        }
        Self::from_signing_key(secret)
    }

    fn from_signing_key(secret: SigningKey) -> Result<Self> {
        let point = secret.verifying_key().to_encoded_point(true);
        if point.as_bytes()[0] != EVEN_Y_PREFIX {
            return Err(Error::InvalidPrivateKey);
        }
        let mut public = [0u8; 32];
        public.copy_from_slice(&point.as_bytes()[1..33]);
        Ok(Self {
            public: PublicKey(public),
            secret,
        })
    }

    /// The 32-byte stored public key
    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    /// The 32-byte secret scalar, for the on-disk key file
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes().into()
    }

    /// Sign the Keccak-256 digest of `payload`
    pub fn sign(&self, payload: &[u8]) -> Result<Signature> {
        let digest = keccak256(payload);
        let sig: EcdsaSignature = self
            .secret
            .sign_prehash(&digest)
            .map_err(|e| Error::SigningFailed(e.to_string()))?;
        let mut out = [0u8; 64];
        out.copy_from_slice(&sig.to_bytes());
        Ok(Signature(out))
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print the secret half
        write!(f, "Keypair({})", hex::encode(self.public.0))
    }
}

fn verifying_key(public: &PublicKey) -> Result<VerifyingKey> {
    let mut sec1 = [0u8; 33];
    sec1[0] = EVEN_Y_PREFIX;
    sec1[1..].copy_from_slice(&public.0);
    VerifyingKey::from_sec1_bytes(&sec1).map_err(|e| Error::InvalidPublicKey(e.to_string()))
}

/// Verify a 64-byte signature over the Keccak-256 digest of `payload`
pub fn verify(public: &PublicKey, payload: &[u8], signature: &Signature) -> bool {
    let Ok(key) = verifying_key(public) else {
        return false;
    };
    let Ok(sig) = EcdsaSignature::from_slice(&signature.0) else {
        return false;
    };
    key.verify_prehash(&keccak256(payload), &sig).is_ok()
}

/// Checksummed-free lowercase Ethereum address of a stored public key
pub fn pubkey_to_ethereum_address(public: &PublicKey) -> Result<String> {
    let key = verifying_key(public)?;
    let point = key.to_encoded_point(false);
    // keccak over the 64 uncompressed coordinate bytes, keep the low 20
    let digest = keccak256(&point.as_bytes()[1..]);
    Ok(format!("0x{}", hex::encode(&digest[12..])))
}
