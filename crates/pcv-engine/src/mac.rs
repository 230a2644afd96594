//! Authenticator chain over the ciphertext.
//!
//! The MAC sits downstream of the cipher layers, so it authenticates
//! ciphertext. Default is keyed BLAKE2b-512; paranoid mode additionally
//! runs HMAC-SHA3-512 (keyed with the serpent MAC key) and the stored tag
//! is the HMAC output with the BLAKE2b output XORed in, binding both.

use blake2::Blake2bMac512;
use hmac::{Hmac, Mac};
use sha3::Sha3_512;
use subtle::ConstantTimeEq;

use crate::error::{EngineError, EngineResult};
use crate::keys::Keys;
use crate::MAC_SIZE;

type HmacSha3_512 = Hmac<Sha3_512>;

enum Chain {
    Blake(Blake2bMac512),
    Paranoid {
        blake: Blake2bMac512,
        hmac: HmacSha3_512,
    },
}

impl Chain {
    fn new(keys: &Keys) -> EngineResult<Self> {
        let blake = Blake2bMac512::new_from_slice(keys.mac_key.as_bytes())
            .map_err(|_| EngineError::Kdf("invalid MAC key length".into()))?;
        match &keys.serpent_mac_key {
            Some(serpent_mac_key) => {
                let hmac = HmacSha3_512::new_from_slice(serpent_mac_key.as_bytes())
                    .map_err(|_| EngineError::Kdf("invalid HMAC key length".into()))?;
                Ok(Chain::Paranoid { blake, hmac })
            }
            None => Ok(Chain::Blake(blake)),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Chain::Blake(blake) => blake.update(data),
            Chain::Paranoid { blake, hmac } => {
                blake.update(data);
                hmac.update(data);
            }
        }
    }

    fn finalize(self) -> [u8; MAC_SIZE] {
        let mut tag = [0u8; MAC_SIZE];
        match self {
            Chain::Blake(blake) => {
                tag.copy_from_slice(&blake.finalize().into_bytes());
            }
            Chain::Paranoid { blake, hmac } => {
                tag.copy_from_slice(&hmac.finalize().into_bytes());
                for (t, b) in tag.iter_mut().zip(blake.finalize().into_bytes()) {
                    *t ^= b;
                }
            }
        }
        tag
    }
}

/// Pass-through stage that digests ciphertext as it flows.
///
/// On encrypt the finished tag is held for the header; on decrypt it is
/// compared constant-time against the tag the header carried.
pub(crate) struct MacStage {
    chain: Option<Chain>,
    expected: Option<[u8; MAC_SIZE]>,
    tag: Option<[u8; MAC_SIZE]>,
    verified: Option<bool>,
}

impl MacStage {
    pub(crate) fn sealing(keys: &Keys) -> EngineResult<Self> {
        Ok(Self {
            chain: Some(Chain::new(keys)?),
            expected: None,
            tag: None,
            verified: None,
        })
    }

    pub(crate) fn verifying(keys: &Keys, expected: [u8; MAC_SIZE]) -> EngineResult<Self> {
        Ok(Self {
            chain: Some(Chain::new(keys)?),
            expected: Some(expected),
            tag: None,
            verified: None,
        })
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        if let Some(chain) = &mut self.chain {
            chain.update(data);
        }
    }

    /// Finish the digest. Verification failure is recorded, not returned:
    /// downstream stages still flush, and the caller decides what reaches
    /// the sink before surfacing `BodyCorrupted`.
    pub(crate) fn finish(&mut self) {
        let Some(chain) = self.chain.take() else {
            return;
        };
        let tag = chain.finalize();
        if let Some(expected) = &self.expected {
            self.verified = Some(bool::from(tag.ct_eq(expected)));
        }
        self.tag = Some(tag);
    }

    pub(crate) fn tag(&self) -> Option<[u8; MAC_SIZE]> {
        self.tag
    }

    pub(crate) fn verified(&self) -> Option<bool> {
        self.verified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Seeds;
    use crate::kdf::MasterKey;
    use crate::keys::Keys;

    fn stub_argon(password: &[u8], salt: &[u8; 16]) -> crate::error::EngineResult<MasterKey> {
        use sha3::{Digest, Sha3_256};
        let mut h = Sha3_256::new();
        h.update(password);
        h.update(salt);
        Ok(MasterKey::from_bytes(h.finalize().into()))
    }

    fn keys(paranoid: bool) -> Keys {
        let seeds = Seeds {
            salt: [1; 16],
            hkdf_salt: [2; 32],
            serpent_iv: [3; 16],
            nonce: [4; 24],
            deny_salt: [5; 16],
            deny_nonce: [6; 24],
        };
        let mut no_keyfiles: [&mut dyn std::io::Read; 0] = [];
        Keys::derive(stub_argon, b"password", &seeds, &mut no_keyfiles, paranoid, false).unwrap()
    }

    #[test]
    fn seal_then_verify_roundtrip() {
        for paranoid in [false, true] {
            let k = keys(paranoid);
            let mut sealer = MacStage::sealing(&k).unwrap();
            sealer.update(b"ciphertext bytes");
            sealer.finish();
            let tag = sealer.tag().unwrap();

            let mut verifier = MacStage::verifying(&k, tag).unwrap();
            verifier.update(b"ciphertext bytes");
            verifier.finish();
            assert_eq!(verifier.verified(), Some(true));
        }
    }

    #[test]
    fn tampered_stream_fails_verification() {
        let k = keys(false);
        let mut sealer = MacStage::sealing(&k).unwrap();
        sealer.update(b"ciphertext bytes");
        sealer.finish();
        let tag = sealer.tag().unwrap();

        let mut verifier = MacStage::verifying(&k, tag).unwrap();
        verifier.update(b"ciphertext byteS");
        verifier.finish();
        assert_eq!(verifier.verified(), Some(false));
    }

    #[test]
    fn paranoid_tag_differs_from_plain_tag() {
        let plain = keys(false);
        let paranoid = keys(true);

        let mut a = MacStage::sealing(&plain).unwrap();
        a.update(b"same input");
        a.finish();
        let mut b = MacStage::sealing(&paranoid).unwrap();
        b.update(b"same input");
        b.finish();

        assert_ne!(a.tag().unwrap(), b.tag().unwrap());
    }

    #[test]
    fn incremental_updates_match_one_shot() {
        let k = keys(true);
        let mut one = MacStage::sealing(&k).unwrap();
        one.update(b"hello ");
        one.update(b"world");
        one.finish();

        let mut two = MacStage::sealing(&k).unwrap();
        two.update(b"hello world");
        two.finish();

        assert_eq!(one.tag().unwrap(), two.tag().unwrap());
    }
}
