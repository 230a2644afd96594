//! Container header: settings, seeds, self-check references, MAC tag.
//!
//! Physical layout (every field a single Reed-Solomon codeword at 3×
//! expansion, comments one codeword per byte):
//!
//! ```text
//! version   5 → 15     literal "v1.48" (v1.47 accepted on parse)
//! comments length 5 → 15   zero-padded ASCII decimal
//! comments  N → 3·N
//! flags     5 → 15     paranoid, reed_solomon, uses_keyfiles,
//!                      ordered_keyfiles, near_mib
//! salt           16 → 48
//! hkdf_salt      32 → 96
//! serpent_iv     16 → 48
//! nonce          24 → 72
//! key_ref        64 → 192
//! keyfile_ref    32 → 96
//! mac_tag        64 → 192
//! ```
//!
//! Base size (no comments): 789 bytes. In deniability mode the region is
//! XORed with a password-derived keystream and prefixed with the 16-byte
//! deny salt and 24-byte deny nonce, which are not themselves coded.

use rand::RngCore;

use crate::error::{EngineError, EngineResult};
use crate::kdf::SALT_SIZE;
use crate::rs::RsCode;
use crate::{
    HKDF_SALT_SIZE, KEYFILE_REF_SIZE, KEY_REF_SIZE, MAC_SIZE, NONCE_SIZE, SERPENT_IV_SIZE,
};

/// Version literal written by this implementation.
pub const FORMAT_VERSION: &str = "v1.48";

/// Versions this implementation reads.
const ACCEPTED_VERSIONS: [&str; 2] = ["v1.47", "v1.48"];

/// Header size with no comments and no deniability prefix.
pub const BASE_HEADER_SIZE: usize = 789;

/// Deniability prefix: deny salt + deny nonce, stored in the clear.
pub const DENY_SEEDS_SIZE: usize = SALT_SIZE + NONCE_SIZE;

/// Maximum comment length in bytes.
pub const MAX_COMMENTS_LEN: usize = 99_999;

const VERSION_LEN: usize = 5;
const FLAGS_LEN: usize = 5;

/// User-visible knobs, all independent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    /// Stored in plaintext. Never encrypted, by design.
    pub comments: String,
    /// Apply the outer RS(136,128) body code.
    pub reed_solomon: bool,
    /// Add Serpent-CTR as a second cipher layer and chain the MACs.
    pub paranoid: bool,
    /// Combine keyfiles positionally instead of commutatively.
    pub ordered_keyfiles: bool,
    /// Wrap the whole container in a password-derived keystream.
    pub deniability: bool,
}

/// Per-encryption random material, stored in the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seeds {
    pub salt: [u8; SALT_SIZE],
    pub hkdf_salt: [u8; HKDF_SALT_SIZE],
    pub serpent_iv: [u8; SERPENT_IV_SIZE],
    pub nonce: [u8; NONCE_SIZE],
    pub deny_salt: [u8; SALT_SIZE],
    pub deny_nonce: [u8; NONCE_SIZE],
}

impl Seeds {
    /// Fresh random seeds. Deniability fields are populated regardless and
    /// simply go unused when the mode is off.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut seeds = Self {
            salt: [0; SALT_SIZE],
            hkdf_salt: [0; HKDF_SALT_SIZE],
            serpent_iv: [0; SERPENT_IV_SIZE],
            nonce: [0; NONCE_SIZE],
            deny_salt: [0; SALT_SIZE],
            deny_nonce: [0; NONCE_SIZE],
        };
        rng.fill_bytes(&mut seeds.salt);
        rng.fill_bytes(&mut seeds.hkdf_salt);
        rng.fill_bytes(&mut seeds.serpent_iv);
        rng.fill_bytes(&mut seeds.nonce);
        rng.fill_bytes(&mut seeds.deny_salt);
        rng.fill_bytes(&mut seeds.deny_nonce);
        seeds
    }
}

/// Number of bytes a complete header occupies before any body byte.
pub fn header_size(settings: &Settings) -> usize {
    let mut size = BASE_HEADER_SIZE + 3 * settings.comments.len();
    if settings.deniability {
        size += DENY_SEEDS_SIZE;
    }
    size
}

/// The RS-coded region alone (no deniability prefix).
pub(crate) fn header_region_size(comments_len: usize) -> usize {
    BASE_HEADER_SIZE + 3 * comments_len
}

#[derive(Debug, Clone)]
pub(crate) struct Header {
    pub settings: Settings,
    pub seeds: Seeds,
    pub uses_keyfiles: bool,
    pub near_mib: bool,
    pub key_ref: [u8; KEY_REF_SIZE],
    pub keyfile_ref: [u8; KEYFILE_REF_SIZE],
    pub mac_tag: [u8; MAC_SIZE],
}

/// Reed-Solomon codes for each header field width.
pub(crate) struct HeaderCodec {
    rs1: RsCode,
    rs5: RsCode,
    rs16: RsCode,
    rs24: RsCode,
    rs32: RsCode,
    rs64: RsCode,
}

impl HeaderCodec {
    pub(crate) fn new() -> Self {
        Self {
            rs1: RsCode::new(1, 3),
            rs5: RsCode::new(5, 15),
            rs16: RsCode::new(16, 48),
            rs24: RsCode::new(24, 72),
            rs32: RsCode::new(32, 96),
            rs64: RsCode::new(64, 192),
        }
    }

    /// Serialize the RS-coded header region (no deniability prefix).
    pub(crate) fn emit(&self, header: &Header) -> Vec<u8> {
        let comments = header.settings.comments.as_bytes();
        let mut out = Vec::with_capacity(header_region_size(comments.len()));

        out.extend(self.rs5.encode(FORMAT_VERSION.as_bytes()));
        out.extend(self.rs5.encode(format!("{:05}", comments.len()).as_bytes()));
        for &b in comments {
            out.extend(self.rs1.encode(&[b]));
        }
        let flags = [
            u8::from(header.settings.paranoid),
            u8::from(header.settings.reed_solomon),
            u8::from(header.uses_keyfiles),
            u8::from(header.settings.ordered_keyfiles),
            u8::from(header.near_mib),
        ];
        out.extend(self.rs5.encode(&flags));
        out.extend(self.rs16.encode(&header.seeds.salt));
        out.extend(self.rs32.encode(&header.seeds.hkdf_salt));
        out.extend(self.rs16.encode(&header.seeds.serpent_iv));
        out.extend(self.rs24.encode(&header.seeds.nonce));
        out.extend(self.rs64.encode(&header.key_ref));
        out.extend(self.rs32.encode(&header.keyfile_ref));
        out.extend(self.rs64.encode(&header.mac_tag));
        out
    }

    /// Decode the version and comments-length fields from the first 30
    /// bytes of the region; returns the comment byte count.
    pub(crate) fn parse_prefix(&self, buf: &[u8]) -> EngineResult<usize> {
        let mut cursor = buf;
        let version = self.field(&self.rs5, &mut cursor)?;
        if !ACCEPTED_VERSIONS.iter().any(|v| v.as_bytes() == version) {
            return Err(EngineError::HeaderCorrupted);
        }
        let digits = self.field(&self.rs5, &mut cursor)?;
        let text = std::str::from_utf8(&digits).map_err(|_| EngineError::HeaderCorrupted)?;
        let len: usize = text.parse().map_err(|_| EngineError::HeaderCorrupted)?;
        if len > MAX_COMMENTS_LEN {
            return Err(EngineError::HeaderCorrupted);
        }
        Ok(len)
    }

    /// Decode a complete header region of exactly
    /// `header_region_size(comments_len)` bytes.
    pub(crate) fn parse(&self, buf: &[u8], comments_len: usize) -> EngineResult<Header> {
        debug_assert_eq!(buf.len(), header_region_size(comments_len));
        let mut cursor = buf;

        // Prefix fields were validated to find comments_len; re-walk them.
        let _ = self.field(&self.rs5, &mut cursor)?;
        let _ = self.field(&self.rs5, &mut cursor)?;

        let mut comments = Vec::with_capacity(comments_len);
        for _ in 0..comments_len {
            comments.push(self.field(&self.rs1, &mut cursor)?[0]);
        }

        let flags = self.field(&self.rs5, &mut cursor)?;
        for &f in &flags {
            if f > 1 {
                return Err(EngineError::HeaderCorrupted);
            }
        }

        let salt = self.field(&self.rs16, &mut cursor)?;
        let hkdf_salt = self.field(&self.rs32, &mut cursor)?;
        let serpent_iv = self.field(&self.rs16, &mut cursor)?;
        let nonce = self.field(&self.rs24, &mut cursor)?;
        let key_ref = self.field(&self.rs64, &mut cursor)?;
        let keyfile_ref = self.field(&self.rs32, &mut cursor)?;
        let mac_tag = self.field(&self.rs64, &mut cursor)?;

        Ok(Header {
            settings: Settings {
                comments: String::from_utf8_lossy(&comments).into_owned(),
                reed_solomon: flags[1] == 1,
                paranoid: flags[0] == 1,
                ordered_keyfiles: flags[3] == 1,
                deniability: false,
            },
            seeds: Seeds {
                salt: to_array(&salt),
                hkdf_salt: to_array(&hkdf_salt),
                serpent_iv: to_array(&serpent_iv),
                nonce: to_array(&nonce),
                deny_salt: [0; SALT_SIZE],
                deny_nonce: [0; NONCE_SIZE],
            },
            uses_keyfiles: flags[2] == 1,
            near_mib: flags[4] == 1,
            key_ref: to_array(&key_ref),
            keyfile_ref: to_array(&keyfile_ref),
            mac_tag: to_array(&mac_tag),
        })
    }

    fn field(&self, code: &RsCode, cursor: &mut &[u8]) -> EngineResult<Vec<u8>> {
        let n = code.coded_len();
        if cursor.len() < n {
            return Err(EngineError::HeaderCorrupted);
        }
        let (word, rest) = cursor.split_at(n);
        *cursor = rest;
        let decoded = code.decode(word).ok_or(EngineError::HeaderCorrupted)?;
        Ok(decoded.data)
    }
}

fn to_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}
