//! Key derivation: Argon2id password → master key
//!
//! The parameters are fixed by the container format (t=4, m=2^20 KiB, p=8)
//! and are the same whether or not paranoid mode is set. Paranoid mode adds
//! a second cipher layer; it does not change the KDF.

use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::Zeroize;

use crate::error::{EngineError, EngineResult};
use crate::KEY_SIZE;

/// Argon2id iteration count.
pub const ARGON_TIME: u32 = 4;
/// Argon2id memory cost in KiB (1 GiB).
pub const ARGON_MEMORY_KIB: u32 = 1 << 20;
/// Argon2id lane count.
pub const ARGON_LANES: u32 = 8;

/// Argon2id salt length in bytes.
pub const SALT_SIZE: usize = 16;

/// A 256-bit master key derived from the password.
///
/// Zeroized on drop so secrets don't linger in memory.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Signature of the password-hashing hook.
///
/// The engine takes this as a constructor parameter so tests can substitute
/// a cheap derivation; production code uses [`argon2id_key`].
pub type ArgonFn = fn(password: &[u8], salt: &[u8; SALT_SIZE]) -> EngineResult<MasterKey>;

/// Derive the master key with the format's fixed Argon2id parameters.
///
/// Failure (bad parameters, memory unavailable) surfaces as
/// [`EngineError::Kdf`]; the parameters are never weakened to compensate.
pub fn argon2id_key(password: &[u8], salt: &[u8; SALT_SIZE]) -> EngineResult<MasterKey> {
    let params = Params::new(ARGON_MEMORY_KIB, ARGON_TIME, ARGON_LANES, Some(KEY_SIZE))
        .map_err(|e| EngineError::Kdf(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(password, salt, &mut key)
        .map_err(|e| EngineError::Kdf(format!("Argon2id failed: {e}")))?;

    Ok(MasterKey::from_bytes(key))
}
