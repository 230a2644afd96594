//! Key schedule: master key → HKDF-SHA3-256 stream → cipher/MAC keys,
//! header self-check references, and the keyfile combiner.
//!
//! The HKDF output is consumed as a stream in a fixed order:
//!
//! ```text
//! key[32] | serpent_key[32] (paranoid) | mac_key[32] | serpent_mac_key[32] (paranoid)
//!         | nonce[24] + iv[16] pairs, one pair per rotation index
//! ```
//!
//! Nonce/IV pairs are always consumed together, whether or not paranoid
//! mode is on, so the ChaCha and Serpent layers stay in lockstep.

use hkdf::Hkdf;
use sha3::{Digest, Sha3_256, Sha3_512};
use std::io::Read;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{EngineError, EngineResult};
use crate::header::Seeds;
use crate::kdf::{ArgonFn, MasterKey};
use crate::{KEYFILE_REF_SIZE, KEY_REF_SIZE, KEY_SIZE, NONCE_SIZE, SERPENT_IV_SIZE};

/// HKDF-SHA3-256 can expand at most 255 blocks of 32 bytes.
const HKDF_MAX: usize = 255 * 32;

const KEYFILE_READ_SIZE: usize = 1 << 20;

/// A 256-bit symmetric sub-key. Zeroized on drop.
#[derive(Clone)]
pub(crate) struct SubKey {
    bytes: [u8; KEY_SIZE],
}

impl SubKey {
    pub(crate) fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SubKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SubKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubKey").field("bytes", &"[REDACTED]").finish()
    }
}

/// The HKDF output treated as a byte stream with a cursor.
///
/// The full 255-block output is expanded once and zeroized on drop; a
/// clone shares the bytes but advances its own cursor, which is how the
/// two cipher layers read their rotation material independently yet
/// identically.
#[derive(Clone)]
pub(crate) struct KeyStream {
    okm: Zeroizing<Vec<u8>>,
    pos: usize,
}

impl KeyStream {
    fn new(master: &MasterKey, hkdf_salt: &[u8]) -> EngineResult<Self> {
        let hk = Hkdf::<Sha3_256>::new(Some(hkdf_salt), master.as_bytes());
        let mut okm = Zeroizing::new(vec![0u8; HKDF_MAX]);
        hk.expand(&[], &mut okm)
            .map_err(|e| EngineError::Kdf(format!("HKDF expand failed: {e}")))?;
        Ok(Self { okm, pos: 0 })
    }

    pub(crate) fn take<const N: usize>(&mut self) -> EngineResult<[u8; N]> {
        if self.pos + N > self.okm.len() {
            return Err(EngineError::Kdf("HKDF stream exhausted".into()));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.okm[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    fn take_key(&mut self) -> EngineResult<SubKey> {
        Ok(SubKey {
            bytes: self.take::<KEY_SIZE>()?,
        })
    }
}

/// Memoized source of rotation nonces and IVs.
///
/// Index 0 is carried from the header seeds; higher indices are pulled
/// from the HKDF stream on demand, a 24-byte nonce then a 16-byte IV per
/// index.
pub(crate) struct NonceIvSource {
    stream: KeyStream,
    entries: Vec<([u8; NONCE_SIZE], [u8; SERPENT_IV_SIZE])>,
}

impl NonceIvSource {
    pub(crate) fn new(stream: KeyStream, seeds: &Seeds) -> Self {
        Self {
            stream,
            entries: vec![(seeds.nonce, seeds.serpent_iv)],
        }
    }

    fn extend_to(&mut self, i: usize) -> EngineResult<()> {
        while i >= self.entries.len() {
            let nonce = self.stream.take::<NONCE_SIZE>()?;
            let iv = self.stream.take::<SERPENT_IV_SIZE>()?;
            self.entries.push((nonce, iv));
        }
        Ok(())
    }

    pub(crate) fn nonce(&mut self, i: usize) -> EngineResult<[u8; NONCE_SIZE]> {
        self.extend_to(i)?;
        Ok(self.entries[i].0)
    }

    pub(crate) fn iv(&mut self, i: usize) -> EngineResult<[u8; SERPENT_IV_SIZE]> {
        self.extend_to(i)?;
        Ok(self.entries[i].1)
    }
}

/// Everything derived for one encryption or decryption.
pub(crate) struct Keys {
    pub key: SubKey,
    pub serpent_key: Option<SubKey>,
    pub mac_key: SubKey,
    pub serpent_mac_key: Option<SubKey>,
    pub key_ref: [u8; KEY_REF_SIZE],
    pub keyfile_ref: [u8; KEYFILE_REF_SIZE],
    /// Stream positioned past the fixed sub-keys, ready for nonce/IV pairs.
    pub rotation_stream: KeyStream,
}

impl Keys {
    /// Run the full schedule. Keyfile sources are consumed completely.
    pub(crate) fn derive(
        argon: ArgonFn,
        password: &[u8],
        seeds: &Seeds,
        keyfiles: &mut [&mut dyn Read],
        paranoid: bool,
        ordered_keyfiles: bool,
    ) -> EngineResult<Self> {
        let master = argon(password, &seeds.salt)?;
        let mut stream = KeyStream::new(&master, &seeds.hkdf_salt)?;

        let key = stream.take_key()?;
        let serpent_key = paranoid.then(|| stream.take_key()).transpose()?;
        let mac_key = stream.take_key()?;
        let serpent_mac_key = paranoid.then(|| stream.take_key()).transpose()?;

        Ok(Self {
            key,
            serpent_key,
            mac_key,
            serpent_mac_key,
            key_ref: key_ref(&master),
            keyfile_ref: combine_keyfiles(keyfiles, ordered_keyfiles)?,
            rotation_stream: stream,
        })
    }
}

/// Header self-check for the password: a double hash of the master key.
pub(crate) fn key_ref(master: &MasterKey) -> [u8; KEY_REF_SIZE] {
    let inner = Sha3_512::digest(master.as_bytes());
    let mut out = [0u8; KEY_REF_SIZE];
    out.copy_from_slice(&Sha3_512::digest(inner));
    out
}

/// Combine keyfile digests into the 32-byte header reference.
///
/// Ordered mode hashes the concatenation of the per-file digests, so the
/// reference depends on position. Unordered mode XOR-folds the digests
/// (commutative) and hashes the accumulator once; a digest equal to the
/// running accumulator would cancel out and is rejected as a duplicate.
/// No keyfiles at all yields the all-zero reference.
pub(crate) fn combine_keyfiles(
    keyfiles: &mut [&mut dyn Read],
    ordered: bool,
) -> EngineResult<[u8; KEYFILE_REF_SIZE]> {
    if keyfiles.is_empty() {
        return Ok([0u8; KEYFILE_REF_SIZE]);
    }

    let digests = keyfiles
        .iter_mut()
        .map(|kf| keyfile_digest(kf))
        .collect::<EngineResult<Vec<_>>>()?;

    let mut hasher = Sha3_256::new();
    if ordered {
        for d in &digests {
            hasher.update(d);
        }
    } else {
        let mut acc = [0u8; KEYFILE_REF_SIZE];
        for d in &digests {
            if acc == *d {
                return Err(EngineError::DuplicateKeyfiles);
            }
            for (a, b) in acc.iter_mut().zip(d) {
                *a ^= b;
            }
        }
        hasher.update(acc);
    }
    Ok(hasher.finalize().into())
}

fn keyfile_digest(kf: &mut dyn Read) -> EngineResult<[u8; KEYFILE_REF_SIZE]> {
    let mut hasher = Sha3_256::new();
    let mut buf = vec![0u8; KEYFILE_READ_SIZE];
    loop {
        let n = match kf.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;

    /// A key stream derived from fixed material, for cipher/stage tests.
    pub(crate) fn test_key_stream() -> KeyStream {
        let master = MasterKey::from_bytes([0x11; KEY_SIZE]);
        KeyStream::new(&master, &[0x22; 32]).expect("test stream")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_seeds() -> Seeds {
        Seeds {
            salt: [1u8; 16],
            hkdf_salt: [2u8; 32],
            serpent_iv: [3u8; 16],
            nonce: [4u8; 24],
            deny_salt: [5u8; 16],
            deny_nonce: [6u8; 24],
        }
    }

    #[test]
    fn stream_order_is_stable_across_paranoid() {
        let master = MasterKey::from_bytes([9u8; KEY_SIZE]);
        let mut a = KeyStream::new(&master, &[2u8; 32]).unwrap();
        let mut b = KeyStream::new(&master, &[2u8; 32]).unwrap();

        // Non-paranoid schedule: key, mac_key.
        let key_a = a.take::<32>().unwrap();
        let mac_a = a.take::<32>().unwrap();

        // Paranoid schedule: key, serpent_key, mac_key.
        let key_b = b.take::<32>().unwrap();
        let serpent_b = b.take::<32>().unwrap();
        let mac_b = b.take::<32>().unwrap();

        assert_eq!(key_a, key_b);
        assert_eq!(mac_a, serpent_b, "paranoid inserts serpent_key before mac_key");
        assert_ne!(mac_a, mac_b);
    }

    #[test]
    fn nonce_iv_pairs_are_memoized() {
        let master = MasterKey::from_bytes([9u8; KEY_SIZE]);
        let stream = KeyStream::new(&master, &[2u8; 32]).unwrap();
        let seeds = test_seeds();

        let mut src = NonceIvSource::new(stream.clone(), &seeds);
        assert_eq!(src.nonce(0).unwrap(), seeds.nonce);
        assert_eq!(src.iv(0).unwrap(), seeds.serpent_iv);

        let n2 = src.nonce(2).unwrap();
        assert_eq!(src.nonce(2).unwrap(), n2);

        // A second source over a clone of the same stream sees the same
        // rotation material.
        let mut other = NonceIvSource::new(stream, &seeds);
        assert_eq!(other.nonce(2).unwrap(), n2);
        assert_eq!(other.iv(1).unwrap(), src.iv(1).unwrap());
    }

    #[test]
    fn no_keyfiles_is_all_zero_ref() {
        let mut none: [&mut dyn Read; 0] = [];
        assert_eq!(combine_keyfiles(&mut none, false).unwrap(), [0u8; 32]);
        let mut none: [&mut dyn Read; 0] = [];
        assert_eq!(combine_keyfiles(&mut none, true).unwrap(), [0u8; 32]);
    }

    #[test]
    fn ordered_ref_depends_on_position() {
        let mut a1: &[u8] = b"first keyfile";
        let mut b1: &[u8] = b"second keyfile";
        let mut inputs: [&mut dyn Read; 2] = [&mut a1, &mut b1];
        let forward = combine_keyfiles(&mut inputs, true).unwrap();

        let mut a2: &[u8] = b"first keyfile";
        let mut b2: &[u8] = b"second keyfile";
        let mut swapped: [&mut dyn Read; 2] = [&mut b2, &mut a2];
        let backward = combine_keyfiles(&mut swapped, true).unwrap();

        assert_ne!(forward, backward);
    }

    #[test]
    fn unordered_ref_is_commutative() {
        let mut a1: &[u8] = b"first keyfile";
        let mut b1: &[u8] = b"second keyfile";
        let mut inputs: [&mut dyn Read; 2] = [&mut a1, &mut b1];
        let forward = combine_keyfiles(&mut inputs, false).unwrap();

        let mut a2: &[u8] = b"first keyfile";
        let mut b2: &[u8] = b"second keyfile";
        let mut swapped: [&mut dyn Read; 2] = [&mut b2, &mut a2];
        let backward = combine_keyfiles(&mut swapped, false).unwrap();

        assert_eq!(forward, backward);
    }

    #[test]
    fn unordered_duplicates_are_rejected() {
        let mut a: &[u8] = b"same bytes";
        let mut b: &[u8] = b"same bytes";
        let mut inputs: [&mut dyn Read; 2] = [&mut a, &mut b];
        assert!(matches!(
            combine_keyfiles(&mut inputs, false),
            Err(EngineError::DuplicateKeyfiles)
        ));
    }

    #[test]
    fn key_ref_differs_from_single_hash() {
        let master = MasterKey::from_bytes([3u8; KEY_SIZE]);
        let double = key_ref(&master);
        let mut single = [0u8; KEY_REF_SIZE];
        single.copy_from_slice(&Sha3_512::digest(master.as_bytes()));
        assert_ne!(double, single);
    }
}
