//! pcv-engine: byte-compatible engine for the Picocrypt (.pcv) container
//!
//! Encryption pipeline:
//!
//! ```text
//! plaintext → XChaCha20 → [Serpent-CTR] → MAC → size counter
//!           → [RS(136,128)] → [deniability XOR] → sink
//! ```
//!
//! Key hierarchy:
//!
//! ```text
//! Master Key (256-bit, Argon2id t=4 m=1GiB p=8 from password)
//!   └── HKDF-SHA3-256 stream (salted by the header's hkdf_salt)
//!         ├── cipher key, [serpent key], MAC key, [serpent MAC key]
//!         └── rotation nonces/IVs, one 24+16 byte pair per 60 GiB
//! ```
//!
//! Keyfiles blend into the header's keyfile reference (ordered or
//! commutative); the deniability mode wraps the whole container in a
//! second password-derived XChaCha20 stream so it is indistinguishable
//! from random bytes.
//!
//! The engine is synchronous and single-threaded; it only blocks on the
//! caller-supplied source and sink. Run it on a worker thread and wrap the
//! source or sink with a byte counter to observe progress.

pub mod error;

mod cipher;
mod decrypt;
mod encrypt;
mod header;
mod kdf;
mod keys;
mod mac;
mod rs;
mod stream;

pub use encrypt::prepend_header;
pub use error::{EngineError, EngineResult};
pub use header::{
    header_size, Seeds, Settings, BASE_HEADER_SIZE, DENY_SEEDS_SIZE, FORMAT_VERSION,
    MAX_COMMENTS_LEN,
};
pub use kdf::{argon2id_key, ArgonFn, MasterKey, SALT_SIZE};

/// Size of the master key and every derived sub-key (256-bit).
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20 nonce (192-bit).
pub const NONCE_SIZE: usize = 24;

/// Size of a Serpent-CTR IV (one block).
pub const SERPENT_IV_SIZE: usize = 16;

/// Size of the HKDF salt stored in the header.
pub const HKDF_SALT_SIZE: usize = 32;

/// Size of the password self-check reference in the header.
pub const KEY_REF_SIZE: usize = 64;

/// Size of the keyfile self-check reference in the header.
pub const KEYFILE_REF_SIZE: usize = 32;

/// Size of the authentication tag (512-bit).
pub const MAC_SIZE: usize = 64;

/// Input is streamed through the stage stack in chunks of this size.
pub(crate) const READ_SIZE: usize = 1 << 20;

/// The container engine.
///
/// Carries no state between operations and is `Copy`; the only knob is the
/// password-hashing hook, which exists so tests can substitute a cheap
/// derivation for the fixed Argon2id parameters.
#[derive(Clone, Copy)]
pub struct Engine {
    pub(crate) argon: ArgonFn,
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            argon: kdf::argon2id_key,
        }
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine with a custom password-hashing function in place of
    /// Argon2id. Containers produced this way are incompatible with the
    /// reference format; intended for tests.
    pub fn with_kdf(argon: ArgonFn) -> Self {
        Self { argon }
    }
}

/// `Read::read` with `Interrupted` retries; 0 means end of stream.
pub(crate) fn read_some<R: std::io::Read + ?Sized>(
    source: &mut R,
    buf: &mut [u8],
) -> EngineResult<usize> {
    loop {
        match source.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}
