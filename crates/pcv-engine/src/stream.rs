//! The stage stack: every transform is a stage with `stream` (process a
//! chunk, possibly emitting more or fewer bytes) and `flush` (end-of-stream
//! tail). A pipeline is an ordered stage list; `stream_stack` threads a
//! buffer through each stage in order and `flush_stack` flushes each stage,
//! feeding its tail through the remainder of the stack.
//!
//! Encrypt order: chacha, serpent (paranoid), mac, size, rs (if on),
//! deniability (if on). Decrypt runs the reverse with inverse stages.

use crate::cipher::RotatingCipher;
use crate::error::{EngineError, EngineResult};
use crate::mac::MacStage;
use crate::rs::RsCode;

/// Body Reed-Solomon chunk: 128 data bytes per 136-byte frame.
pub(crate) const RS_DATA_SIZE: usize = 128;
pub(crate) const RS_FRAME_SIZE: usize = 136;

pub(crate) enum BodyStage {
    Cipher(RotatingCipher),
    Mac(MacStage),
    Size(SizeStage),
    RsEncode(RsEncodeStage),
    RsDecode(RsDecodeStage),
}

impl BodyStage {
    pub(crate) fn stream(&mut self, mut data: Vec<u8>) -> EngineResult<Vec<u8>> {
        match self {
            BodyStage::Cipher(c) => {
                c.apply(&mut data)?;
                Ok(data)
            }
            BodyStage::Mac(m) => {
                m.update(&data);
                Ok(data)
            }
            BodyStage::Size(s) => {
                s.count += data.len() as u64;
                Ok(data)
            }
            BodyStage::RsEncode(e) => Ok(e.stream(data)),
            BodyStage::RsDecode(d) => d.stream(data),
        }
    }

    pub(crate) fn flush(&mut self) -> EngineResult<Vec<u8>> {
        match self {
            BodyStage::Cipher(_) => Ok(Vec::new()),
            BodyStage::Mac(m) => {
                m.finish();
                Ok(Vec::new())
            }
            BodyStage::Size(s) => {
                s.near_mib = (s.count % (1 << 20)) > ((1 << 20) - RS_DATA_SIZE as u64);
                Ok(Vec::new())
            }
            BodyStage::RsEncode(e) => Ok(e.flush()),
            BodyStage::RsDecode(d) => d.flush(),
        }
    }
}

pub(crate) fn stream_stack(stages: &mut [BodyStage], data: Vec<u8>) -> EngineResult<Vec<u8>> {
    let mut data = data;
    for stage in stages {
        data = stage.stream(data)?;
    }
    Ok(data)
}

pub(crate) fn flush_stack(stages: &mut [BodyStage]) -> EngineResult<Vec<u8>> {
    let mut out = Vec::new();
    for i in 0..stages.len() {
        let mut tail = stages[i].flush()?;
        for stage in &mut stages[i + 1..] {
            tail = stage.stream(tail)?;
        }
        out.extend_from_slice(&tail);
    }
    Ok(out)
}

/// Counts plaintext-length bytes; at flush it derives the near-MiB flag
/// the header records for the RS body decoder.
#[derive(Default)]
pub(crate) struct SizeStage {
    pub count: u64,
    pub near_mib: bool,
}

/// RS(136,128) body encoder.
///
/// Full chunks are encoded as they arrive. The final chunk is always
/// padded: zero fill with the pad length (1..=128) in the last byte, so
/// the decoder can trim precisely without knowing the body length in
/// advance. A 128-aligned body gets one full pad frame; an empty body
/// emits nothing.
pub(crate) struct RsEncodeStage {
    code: RsCode,
    buf: Vec<u8>,
    total: u64,
}

impl RsEncodeStage {
    pub(crate) fn new() -> Self {
        Self {
            code: RsCode::new(RS_DATA_SIZE, RS_FRAME_SIZE),
            buf: Vec::new(),
            total: 0,
        }
    }

    fn stream(&mut self, data: Vec<u8>) -> Vec<u8> {
        self.total += data.len() as u64;
        self.buf.extend_from_slice(&data);

        let full = self.buf.len() / RS_DATA_SIZE * RS_DATA_SIZE;
        let mut out = Vec::with_capacity(full / RS_DATA_SIZE * RS_FRAME_SIZE);
        for chunk in self.buf[..full].chunks(RS_DATA_SIZE) {
            out.extend(self.code.encode(chunk));
        }
        self.buf.drain(..full);
        out
    }

    fn flush(&mut self) -> Vec<u8> {
        if self.total == 0 {
            return Vec::new();
        }
        let pad = RS_DATA_SIZE - self.buf.len();
        let mut chunk = std::mem::take(&mut self.buf);
        chunk.resize(RS_DATA_SIZE, 0);
        chunk[RS_DATA_SIZE - 1] = pad as u8;
        self.code.encode(&chunk)
    }
}

/// RS(136,128) body decoder with one frame of lookahead.
///
/// Frames are corrected as they stream; the last frame is held back until
/// flush so its padding can be trimmed. Correction sets the sticky
/// `damaged` bit. An uncorrectable frame fails fast with `BodyCorrupted`
/// unless `keep_corrupted`, in which case its raw data half passes
/// through and the MAC decides the final outcome.
pub(crate) struct RsDecodeStage {
    code: RsCode,
    buf: Vec<u8>,
    keep_corrupted: bool,
    pub damaged: bool,
}

impl RsDecodeStage {
    pub(crate) fn new(keep_corrupted: bool) -> Self {
        Self {
            code: RsCode::new(RS_DATA_SIZE, RS_FRAME_SIZE),
            buf: Vec::new(),
            keep_corrupted,
            damaged: false,
        }
    }

    fn decode_frame(&mut self, frame: &[u8]) -> EngineResult<Vec<u8>> {
        match self.code.decode(frame) {
            Some(decoded) => {
                self.damaged |= decoded.repaired;
                Ok(decoded.data)
            }
            None if self.keep_corrupted => {
                self.damaged = true;
                Ok(frame[..RS_DATA_SIZE].to_vec())
            }
            None => Err(EngineError::BodyCorrupted),
        }
    }

    fn stream(&mut self, data: Vec<u8>) -> EngineResult<Vec<u8>> {
        self.buf.extend_from_slice(&data);

        // Emit a frame only once at least one byte follows it; the final
        // frame of the stream is handled at flush.
        let take = if self.buf.len() > RS_FRAME_SIZE {
            (self.buf.len() - 1) / RS_FRAME_SIZE * RS_FRAME_SIZE
        } else {
            return Ok(Vec::new());
        };

        let mut out = Vec::with_capacity(take / RS_FRAME_SIZE * RS_DATA_SIZE);
        for i in (0..take).step_by(RS_FRAME_SIZE) {
            let frame = self.buf[i..i + RS_FRAME_SIZE].to_vec();
            out.extend(self.decode_frame(&frame)?);
        }
        self.buf.drain(..take);
        Ok(out)
    }

    fn flush(&mut self) -> EngineResult<Vec<u8>> {
        if self.buf.is_empty() {
            return Ok(Vec::new());
        }
        if self.buf.len() != RS_FRAME_SIZE {
            // Truncated or trailing garbage; not a whole frame.
            if self.keep_corrupted {
                self.damaged = true;
                let keep = self.buf.len().min(RS_DATA_SIZE);
                return Ok(self.buf[..keep].to_vec());
            }
            return Err(EngineError::BodyCorrupted);
        }

        let frame = std::mem::take(&mut self.buf);
        let mut chunk = self.decode_frame(&frame)?;
        let pad = chunk[RS_DATA_SIZE - 1] as usize;
        if pad == 0 || pad > RS_DATA_SIZE {
            if self.keep_corrupted {
                self.damaged = true;
                return Ok(chunk);
            }
            return Err(EngineError::BodyCorrupted);
        }
        chunk.truncate(RS_DATA_SIZE - pad);
        Ok(chunk)
    }
}
