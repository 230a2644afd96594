//! Decrypt-side header reader and streaming loop.
//!
//! The header reader buffers input until a complete header parses. A
//! structural failure of the prefix triggers exactly one deniability
//! retry: the first 40 bytes are re-read as deny seeds, the keystream is
//! derived from the password, and the parse is repeated on the unwrapped
//! bytes. The unwrap is staged so the deniability cipher sits exactly at
//! the end of the header region when parsing succeeds — the same cipher
//! instance then continues as the body's first stage.

use std::io::{Read, Write};

use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::cipher::RotatingCipher;
use crate::error::{EngineError, EngineResult};
use crate::header::{
    header_region_size, Header, HeaderCodec, Settings, BASE_HEADER_SIZE, DENY_SEEDS_SIZE,
};
use crate::kdf::{ArgonFn, SALT_SIZE};
use crate::keys::{Keys, NonceIvSource};
use crate::mac::MacStage;
use crate::stream::{flush_stack, stream_stack, BodyStage, RsDecodeStage};
use crate::{read_some, Engine, NONCE_SIZE, READ_SIZE};

const PREFIX_SIZE: usize = 30; // version + comments length, RS-coded

pub(crate) struct ParsedHeader {
    pub header: Header,
    /// Deniability cipher positioned at the first body byte.
    pub deny: Option<RotatingCipher>,
    /// Raw bytes past the header, not yet processed by any stage.
    pub leftover: Vec<u8>,
}

struct DenyAttempt {
    cipher: RotatingCipher,
    unwrapped: Vec<u8>,
    deny_salt: [u8; SALT_SIZE],
    deny_nonce: [u8; NONCE_SIZE],
    comments_len: Option<usize>,
}

pub(crate) struct HeaderReader {
    codec: HeaderCodec,
    raw: Vec<u8>,
    comments_len: Option<usize>,
    deny: Option<DenyAttempt>,
    /// Password material for the deniability retry; `None` means the
    /// caller has no password (settings-only parse) and cannot retry.
    secret: Option<(ArgonFn, Zeroizing<Vec<u8>>)>,
}

impl HeaderReader {
    pub(crate) fn new(secret: Option<(ArgonFn, Zeroizing<Vec<u8>>)>) -> Self {
        Self {
            codec: HeaderCodec::new(),
            raw: Vec::new(),
            comments_len: None,
            deny: None,
            secret,
        }
    }

    /// Buffer more input; returns the parsed header once complete.
    pub(crate) fn feed(&mut self, data: &[u8]) -> EngineResult<Option<ParsedHeader>> {
        self.raw.extend_from_slice(data);
        if self.raw.len() < BASE_HEADER_SIZE {
            return Ok(None);
        }
        if self.deny.is_some() {
            return self.advance_deny();
        }
        self.advance_plain()
    }

    /// The error to surface when the source ends before a header parsed.
    pub(crate) fn eof_error(&self) -> EngineError {
        EngineError::FileTooShort
    }

    fn advance_plain(&mut self) -> EngineResult<Option<ParsedHeader>> {
        if self.comments_len.is_none() {
            match self.codec.parse_prefix(&self.raw[..PREFIX_SIZE]) {
                Ok(len) => self.comments_len = Some(len),
                Err(_) => return self.begin_deny(),
            }
        }
        let comments_len = self.comments_len.unwrap_or(0);
        let need = header_region_size(comments_len);
        if self.raw.len() < need {
            return Ok(None);
        }
        // A valid prefix means this is a real header; damage past byte 30
        // is plain corruption, not a deniability wrap, and must not cost a
        // second Argon2 pass.
        match self.codec.parse(&self.raw[..need], comments_len) {
            Ok(header) => Ok(Some(ParsedHeader {
                header,
                deny: None,
                leftover: self.raw[need..].to_vec(),
            })),
            Err(_) => Err(EngineError::HeaderCorrupted),
        }
    }

    fn begin_deny(&mut self) -> EngineResult<Option<ParsedHeader>> {
        let Some((argon, password)) = &self.secret else {
            return Err(EngineError::HeaderCorrupted);
        };

        let mut deny_salt = [0u8; SALT_SIZE];
        deny_salt.copy_from_slice(&self.raw[..SALT_SIZE]);
        let mut deny_nonce = [0u8; NONCE_SIZE];
        deny_nonce.copy_from_slice(&self.raw[SALT_SIZE..DENY_SEEDS_SIZE]);

        let deny_key = argon(password, &deny_salt)?;
        self.deny = Some(DenyAttempt {
            cipher: RotatingCipher::deniability(deny_key, deny_nonce),
            unwrapped: Vec::new(),
            deny_salt,
            deny_nonce,
            comments_len: None,
        });
        self.advance_deny()
    }

    fn advance_deny(&mut self) -> EngineResult<Option<ParsedHeader>> {
        // Unwrap lazily and never past the header region, so the cipher is
        // positioned at the first body byte on success.
        let Self {
            codec, raw, deny, ..
        } = self;
        let Some(attempt) = deny.as_mut() else {
            return Err(EngineError::HeaderCorrupted);
        };

        if attempt.comments_len.is_none() {
            unwrap_to(attempt, raw, PREFIX_SIZE)?;
            let len = codec
                .parse_prefix(&attempt.unwrapped[..PREFIX_SIZE])
                .map_err(|_| EngineError::HeaderCorrupted)?;
            attempt.comments_len = Some(len);
        }
        let comments_len = attempt.comments_len.unwrap_or(0);
        let region = header_region_size(comments_len);
        if raw.len() < DENY_SEEDS_SIZE + region {
            return Ok(None);
        }
        unwrap_to(attempt, raw, region)?;

        let mut header = codec
            .parse(&attempt.unwrapped[..region], comments_len)
            .map_err(|_| EngineError::HeaderCorrupted)?;
        header.settings.deniability = true;
        header.seeds.deny_salt = attempt.deny_salt;
        header.seeds.deny_nonce = attempt.deny_nonce;

        let Some(finished) = deny.take() else {
            return Err(EngineError::HeaderCorrupted);
        };
        Ok(Some(ParsedHeader {
            header,
            deny: Some(finished.cipher),
            leftover: raw[DENY_SEEDS_SIZE + region..].to_vec(),
        }))
    }
}

fn unwrap_to(attempt: &mut DenyAttempt, raw: &[u8], upto: usize) -> EngineResult<()> {
    let have = attempt.unwrapped.len();
    if upto <= have {
        return Ok(());
    }
    let mut block = raw[DENY_SEEDS_SIZE + have..DENY_SEEDS_SIZE + upto].to_vec();
    attempt.cipher.apply(&mut block)?;
    attempt.unwrapped.extend_from_slice(&block);
    Ok(())
}

impl Engine {
    /// Decrypt a container, streaming plaintext into `sink`.
    ///
    /// Returns whether the body was silently repaired from bit-rot. On
    /// `BodyCorrupted` under `keep_corrupted`, the sink holds the
    /// best-effort plaintext recovered so far.
    pub fn decrypt<R: Read + ?Sized, W: Write + ?Sized>(
        &self,
        source: &mut R,
        sink: &mut W,
        password: &SecretString,
        keyfiles: &mut [&mut dyn Read],
        keep_corrupted: bool,
    ) -> EngineResult<bool> {
        let pw = Zeroizing::new(password.expose_secret().as_bytes().to_vec());
        let mut reader = HeaderReader::new(Some((self.argon, pw.clone())));

        let mut buf = vec![0u8; READ_SIZE];
        let parsed = loop {
            let n = read_some(source, &mut buf)?;
            if n == 0 {
                return Err(reader.eof_error());
            }
            if let Some(parsed) = reader.feed(&buf[..n])? {
                break parsed;
            }
        };
        let ParsedHeader {
            header,
            deny,
            leftover,
        } = parsed;

        if header.uses_keyfiles && keyfiles.is_empty() {
            return Err(EngineError::KeyfilesRequired);
        }
        if !header.uses_keyfiles && !keyfiles.is_empty() {
            return Err(EngineError::KeyfilesNotRequired);
        }

        let keys = Keys::derive(
            self.argon,
            &pw,
            &header.seeds,
            keyfiles,
            header.settings.paranoid,
            header.settings.ordered_keyfiles,
        )?;

        if !bool::from(keys.key_ref[..].ct_eq(&header.key_ref[..])) {
            return Err(EngineError::IncorrectPassword);
        }
        if !bool::from(keys.keyfile_ref[..].ct_eq(&header.keyfile_ref[..])) {
            return Err(if header.settings.ordered_keyfiles {
                EngineError::IncorrectOrMisorderedKeyfiles
            } else {
                EngineError::IncorrectKeyfiles
            });
        }

        // Inverse stack: deniability unwrap, RS correction, MAC over the
        // ciphertext, then the XOR layers (their own inverses).
        let mut stages = Vec::with_capacity(5);
        if let Some(deny) = deny {
            stages.push(BodyStage::Cipher(deny));
        }
        if header.settings.reed_solomon {
            stages.push(BodyStage::RsDecode(RsDecodeStage::new(keep_corrupted)));
        }
        stages.push(BodyStage::Mac(MacStage::verifying(&keys, header.mac_tag)?));
        if let Some(serpent_key) = keys.serpent_key.clone() {
            stages.push(BodyStage::Cipher(RotatingCipher::serpent(
                serpent_key,
                NonceIvSource::new(keys.rotation_stream.clone(), &header.seeds),
            )));
        }
        stages.push(BodyStage::Cipher(RotatingCipher::chacha(
            keys.key.clone(),
            NonceIvSource::new(keys.rotation_stream.clone(), &header.seeds),
        )));

        let out = stream_stack(&mut stages, leftover)?;
        sink.write_all(&out)?;
        loop {
            let n = read_some(source, &mut buf)?;
            if n == 0 {
                break;
            }
            let out = stream_stack(&mut stages, buf[..n].to_vec())?;
            sink.write_all(&out)?;
        }
        let tail = flush_stack(&mut stages)?;
        sink.write_all(&tail)?;

        let damaged = stages
            .iter()
            .find_map(|s| match s {
                BodyStage::RsDecode(d) => Some(d.damaged),
                _ => None,
            })
            .unwrap_or(false);
        let verified = stages
            .iter()
            .find_map(|s| match s {
                BodyStage::Mac(m) => m.verified(),
                _ => None,
            })
            .unwrap_or(false);

        if !verified {
            return Err(EngineError::BodyCorrupted);
        }
        Ok(damaged)
    }

    /// Parse only the header and report the user-facing settings.
    ///
    /// No password is available here, so a deniability-wrapped container
    /// cannot be unwrapped: a source too short to hold a header is
    /// reported as `deniability: true, everything else unknown`, which is
    /// also how collaborators should treat it.
    pub fn read_settings<R: Read + ?Sized>(&self, source: &mut R) -> EngineResult<Settings> {
        let mut reader = HeaderReader::new(None);
        let mut buf = vec![0u8; READ_SIZE];
        loop {
            let n = read_some(source, &mut buf)?;
            if n == 0 {
                return Ok(Settings {
                    deniability: true,
                    ..Settings::default()
                });
            }
            if let Some(parsed) = reader.feed(&buf[..n])? {
                return Ok(parsed.header.settings);
            }
        }
    }
}
