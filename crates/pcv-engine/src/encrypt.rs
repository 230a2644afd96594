//! Encrypt-side stack assembly and the headless encryption loop.
//!
//! The body is streamed to the sink first; the finished header (MAC tag and
//! near-MiB flag only exist after the stream closes) is returned separately
//! so the collaborator can seek back over a blank header or prepend it to a
//! buffered body.

use std::io::{Read, Write};

use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::cipher::RotatingCipher;
use crate::error::{EngineError, EngineResult};
use crate::header::{header_region_size, Header, HeaderCodec, Seeds, Settings, MAX_COMMENTS_LEN};
use crate::keys::{Keys, NonceIvSource};
use crate::mac::MacStage;
use crate::stream::{flush_stack, stream_stack, BodyStage, RsEncodeStage, SizeStage};
use crate::{read_some, Engine, DENY_SEEDS_SIZE, MAC_SIZE, READ_SIZE};

pub(crate) struct EncryptStream {
    header: Header,
    stages: Vec<BodyStage>,
    deny_pad: Option<Vec<u8>>,
}

impl EncryptStream {
    pub(crate) fn new(
        engine: &Engine,
        settings: &Settings,
        seeds: &Seeds,
        password: &[u8],
        keyfiles: &mut [&mut dyn Read],
    ) -> EngineResult<Self> {
        if settings.comments.len() > MAX_COMMENTS_LEN {
            return Err(EngineError::CommentsTooLong);
        }

        let uses_keyfiles = !keyfiles.is_empty();
        let keys = Keys::derive(
            engine.argon,
            password,
            seeds,
            keyfiles,
            settings.paranoid,
            settings.ordered_keyfiles,
        )?;

        let header = Header {
            settings: settings.clone(),
            seeds: seeds.clone(),
            uses_keyfiles,
            near_mib: false,
            key_ref: keys.key_ref,
            keyfile_ref: keys.keyfile_ref,
            mac_tag: [0u8; MAC_SIZE],
        };

        let mut stages = Vec::with_capacity(6);
        stages.push(BodyStage::Cipher(RotatingCipher::chacha(
            keys.key.clone(),
            NonceIvSource::new(keys.rotation_stream.clone(), seeds),
        )));
        if let Some(serpent_key) = keys.serpent_key.clone() {
            stages.push(BodyStage::Cipher(RotatingCipher::serpent(
                serpent_key,
                NonceIvSource::new(keys.rotation_stream.clone(), seeds),
            )));
        }
        stages.push(BodyStage::Mac(MacStage::sealing(&keys)?));
        stages.push(BodyStage::Size(SizeStage::default()));
        if settings.reed_solomon {
            stages.push(BodyStage::RsEncode(RsEncodeStage::new()));
        }

        // The deniability keystream covers header + body; the body is
        // written first, so advance the stream across the header region now
        // and keep that prefix to wrap the header at finish time.
        let mut deny_pad = None;
        if settings.deniability {
            let deny_key = (engine.argon)(password, &seeds.deny_salt)?;
            let mut deny = RotatingCipher::deniability(deny_key, seeds.deny_nonce);
            let mut pad = vec![0u8; header_region_size(settings.comments.len())];
            deny.apply(&mut pad)?;
            deny_pad = Some(pad);
            stages.push(BodyStage::Cipher(deny));
        }

        Ok(Self {
            header,
            stages,
            deny_pad,
        })
    }

    pub(crate) fn stream(&mut self, data: Vec<u8>) -> EngineResult<Vec<u8>> {
        stream_stack(&mut self.stages, data)
    }

    /// Flush the stack, then assemble the final header bytes.
    pub(crate) fn finish(mut self) -> EngineResult<(Vec<u8>, Vec<u8>)> {
        let tail = flush_stack(&mut self.stages)?;

        for stage in &self.stages {
            match stage {
                BodyStage::Mac(m) => {
                    if let Some(tag) = m.tag() {
                        self.header.mac_tag = tag;
                    }
                }
                BodyStage::Size(s) => self.header.near_mib = s.near_mib,
                _ => {}
            }
        }

        let mut bytes = HeaderCodec::new().emit(&self.header);
        if let Some(pad) = &self.deny_pad {
            for (b, p) in bytes.iter_mut().zip(pad) {
                *b ^= p;
            }
            let mut wrapped = Vec::with_capacity(DENY_SEEDS_SIZE + bytes.len());
            wrapped.extend_from_slice(&self.header.seeds.deny_salt);
            wrapped.extend_from_slice(&self.header.seeds.deny_nonce);
            wrapped.extend_from_slice(&bytes);
            bytes = wrapped;
        }
        Ok((tail, bytes))
    }
}

impl Engine {
    /// Encrypt `source` into `sink` (headless: no header is written) and
    /// return the finished header bytes for the caller to prepend.
    pub fn encrypt<R: Read + ?Sized, W: Write + ?Sized>(
        &self,
        source: &mut R,
        sink: &mut W,
        password: &SecretString,
        keyfiles: &mut [&mut dyn Read],
        settings: &Settings,
    ) -> EngineResult<Vec<u8>> {
        let seeds = Seeds::generate();
        self.encrypt_with_seeds(source, sink, password, keyfiles, settings, &seeds)
    }

    /// [`Engine::encrypt`] with caller-supplied seeds: same inputs, same
    /// container, byte for byte. For deterministic tests and
    /// cross-implementation parity checks.
    pub fn encrypt_with_seeds<R: Read + ?Sized, W: Write + ?Sized>(
        &self,
        source: &mut R,
        sink: &mut W,
        password: &SecretString,
        keyfiles: &mut [&mut dyn Read],
        settings: &Settings,
        seeds: &Seeds,
    ) -> EngineResult<Vec<u8>> {
        let pw = Zeroizing::new(password.expose_secret().as_bytes().to_vec());
        let mut stream = EncryptStream::new(self, settings, seeds, &pw, keyfiles)?;

        let mut buf = vec![0u8; READ_SIZE];
        loop {
            let n = read_some(source, &mut buf)?;
            if n == 0 {
                break;
            }
            let out = stream.stream(buf[..n].to_vec())?;
            sink.write_all(&out)?;
        }

        let (tail, header) = stream.finish()?;
        sink.write_all(&tail)?;
        Ok(header)
    }
}

/// Copy `header` then the whole of `body` into `out`, for collaborators
/// that buffered the headless body instead of seeking back over a blank
/// header.
pub fn prepend_header<R: Read + ?Sized, W: Write + ?Sized>(
    header: &[u8],
    body: &mut R,
    out: &mut W,
) -> EngineResult<()> {
    out.write_all(header)?;
    let mut buf = vec![0u8; READ_SIZE];
    loop {
        let n = read_some(body, &mut buf)?;
        if n == 0 {
            return Ok(());
        }
        out.write_all(&buf[..n])?;
    }
}
