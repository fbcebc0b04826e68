//! Node key handling
//!
//! Private keys are stored as hex: either the 32-byte seed, or the seed
//! followed by its 32-byte public key.

use ed25519_dalek::{SigningKey, SECRET_KEY_LENGTH};
use meshlink_core::PeerIdentity;
use rand_core::{OsRng, RngCore};

use crate::error::{CliError, Result};

/// Generate a fresh signing key from the OS RNG
pub fn generate() -> SigningKey {
    let mut seed = [0u8; SECRET_KEY_LENGTH];
    OsRng.fill_bytes(&mut seed);
    SigningKey::from_bytes(&seed)
}

/// Parse a hex private key
pub fn parse_private_key(text: &str) -> Result<SigningKey> {
    let bytes = hex::decode(text.trim())?;
    let seed: [u8; SECRET_KEY_LENGTH] = match bytes.len() {
        32 | 64 => bytes[..SECRET_KEY_LENGTH]
            .try_into()
            .map_err(|_| CliError::InvalidKey("bad seed".to_string()))?,
        n => {
            return Err(CliError::InvalidKey(format!(
                "expected 32 or 64 bytes, got {}",
                n
            )))
        }
    };

    let key = SigningKey::from_bytes(&seed);
    if bytes.len() == 64 && key.verifying_key().as_bytes()[..] != bytes[SECRET_KEY_LENGTH..] {
        return Err(CliError::InvalidKey(
            "public half does not match the seed".to_string(),
        ));
    }
    Ok(key)
}

/// Hex form written by `genkey`: seed followed by public key
pub fn encode_private_key(key: &SigningKey) -> String {
    hex::encode(key.to_keypair_bytes())
}

pub fn identity_of(key: &SigningKey) -> PeerIdentity {
    PeerIdentity::from(key.verifying_key())
}
