//! XOR cipher layers with nonce rotation.
//!
//! XChaCha20 and Serpent-CTR are safe only up to a bounded keystream
//! length, so every `RESET_NONCE_AT` bytes the underlying cipher is rebuilt
//! with fresh material: the body layers pull the i-th 24-byte nonce /
//! 16-byte IV pair from the HKDF stream, the deniability layer hashes its
//! previous nonce with SHA3-256. Index 0 is always the value carried in the
//! header. The rotation cadence is format-bound; do not change it.

use chacha20::XChaCha20;
use cipher::{InnerIvInit, KeyIvInit, StreamCipher, StreamCipherCoreWrapper};
use ctr::CtrCore;
use serpent::cipher::KeyInit;
use serpent::Serpent;
use sha3::{Digest, Sha3_256};

use crate::error::{EngineError, EngineResult};
use crate::kdf::MasterKey;
use crate::keys::{NonceIvSource, SubKey};
use crate::NONCE_SIZE;

/// Bytes of keystream before the underlying cipher is re-keyed: 60 GiB.
pub const RESET_NONCE_AT: u64 = 60 * (1 << 30);

/// Serpent in CTR mode with a big-endian 128-bit block counter.
type SerpentCtr = ctr::Ctr128BE<Serpent>;

fn new_serpent_ctr(key: &SubKey, iv: &[u8; 16]) -> EngineResult<SerpentCtr> {
    // Serpent takes its 256-bit key through `new_from_slice`; the CTR
    // wrapper is then built around the keyed block cipher.
    let block = Serpent::new_from_slice(key.as_bytes())
        .map_err(|_| EngineError::Kdf("invalid Serpent key length".into()))?;
    let core = CtrCore::inner_iv_init(block, &(*iv).into());
    Ok(StreamCipherCoreWrapper::from_core(core))
}

fn new_xchacha(key: &SubKey, nonce: &[u8; NONCE_SIZE]) -> XChaCha20 {
    XChaCha20::new(key.as_bytes().into(), &(*nonce).into())
}

/// Deniability nonce sequence: nonce_i = SHA3-256(nonce_{i-1})[..24].
pub(crate) struct DenyNonceChain {
    nonces: Vec<[u8; NONCE_SIZE]>,
}

impl DenyNonceChain {
    pub(crate) fn new(first: [u8; NONCE_SIZE]) -> Self {
        Self {
            nonces: vec![first],
        }
    }

    fn nonce(&mut self, i: usize) -> [u8; NONCE_SIZE] {
        while i >= self.nonces.len() {
            let digest = Sha3_256::digest(self.nonces[self.nonces.len() - 1]);
            let mut next = [0u8; NONCE_SIZE];
            next.copy_from_slice(&digest[..NONCE_SIZE]);
            self.nonces.push(next);
        }
        self.nonces[i]
    }
}

enum Backend {
    ChaCha {
        key: SubKey,
        nonces: NonceIvSource,
        cipher: Option<XChaCha20>,
    },
    SerpentCtr {
        key: SubKey,
        ivs: NonceIvSource,
        cipher: Option<SerpentCtr>,
    },
    Deny {
        key: SubKey,
        chain: DenyNonceChain,
        cipher: Option<XChaCha20>,
    },
}

impl Backend {
    fn reset(&mut self, i: usize) -> EngineResult<()> {
        match self {
            Backend::ChaCha { key, nonces, cipher } => {
                let nonce = nonces.nonce(i)?;
                *cipher = Some(new_xchacha(key, &nonce));
            }
            Backend::SerpentCtr { key, ivs, cipher } => {
                let iv = ivs.iv(i)?;
                *cipher = Some(new_serpent_ctr(key, &iv)?);
            }
            Backend::Deny { key, chain, cipher } => {
                let nonce = chain.nonce(i);
                *cipher = Some(new_xchacha(key, &nonce));
            }
        }
        Ok(())
    }

    fn xor(&mut self, buf: &mut [u8]) {
        match self {
            Backend::ChaCha { cipher, .. } | Backend::Deny { cipher, .. } => {
                if let Some(c) = cipher {
                    c.apply_keystream(buf);
                }
            }
            Backend::SerpentCtr { cipher, .. } => {
                if let Some(c) = cipher {
                    c.apply_keystream(buf);
                }
            }
        }
    }
}

/// Wraps an XOR cipher and re-keys it every `reset_at` bytes.
pub(crate) struct RotatingCipher {
    backend: Backend,
    written: u64,
    resets: usize,
    initialised: bool,
    reset_at: u64,
}

impl RotatingCipher {
    pub(crate) fn chacha(key: SubKey, nonces: NonceIvSource) -> Self {
        Self::with_backend(Backend::ChaCha {
            key,
            nonces,
            cipher: None,
        })
    }

    pub(crate) fn serpent(key: SubKey, ivs: NonceIvSource) -> Self {
        Self::with_backend(Backend::SerpentCtr {
            key,
            ivs,
            cipher: None,
        })
    }

    pub(crate) fn deniability(key: MasterKey, first_nonce: [u8; NONCE_SIZE]) -> Self {
        Self::with_backend(Backend::Deny {
            key: SubKey::from_bytes(*key.as_bytes()),
            chain: DenyNonceChain::new(first_nonce),
            cipher: None,
        })
    }

    fn with_backend(backend: Backend) -> Self {
        Self {
            backend,
            written: 0,
            resets: 0,
            initialised: false,
            reset_at: RESET_NONCE_AT,
        }
    }

    #[cfg(test)]
    pub(crate) fn set_reset_at(&mut self, reset_at: u64) {
        self.reset_at = reset_at;
    }

    /// XOR the buffer in place, re-keying at each rotation boundary.
    pub(crate) fn apply(&mut self, buf: &mut [u8]) -> EngineResult<()> {
        if !self.initialised {
            self.backend.reset(0)?;
            self.initialised = true;
        }
        let mut i = 0;
        while i < buf.len() {
            let window = usize::try_from(self.reset_at - self.written).unwrap_or(usize::MAX);
            let j = (buf.len() - i).min(window);
            self.backend.xor(&mut buf[i..i + j]);
            self.written += j as u64;
            if self.written == self.reset_at {
                self.written = 0;
                self.resets += 1;
                let next = self.resets;
                self.backend.reset(next)?;
            }
            i += j;
        }
        Ok(())
    }
}
