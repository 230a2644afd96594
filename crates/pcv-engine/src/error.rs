use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Closed set of engine failures.
///
/// Nothing is retried internally; each kind maps to a distinct caller
/// recovery (re-prompt the password, re-select keyfiles, retry in
/// `keep_corrupted` mode, ...).
#[derive(Debug, Error)]
pub enum EngineError {
    /// Input ended before a complete header. A caller that cannot rule it
    /// out should treat the input as a deniability-wrapped container.
    #[error("file too short to hold a header")]
    FileTooShort,

    /// A Reed-Solomon codeword in the header had more byte errors than its
    /// parity can correct, or a decoded field failed validation.
    #[error("header corrupted")]
    HeaderCorrupted,

    #[error("incorrect password")]
    IncorrectPassword,

    #[error("incorrect keyfiles")]
    IncorrectKeyfiles,

    /// The keyfile digest mismatched and the container requires keyfiles in
    /// a specific order; the set may be right but the order wrong.
    #[error("incorrect or misordered keyfiles")]
    IncorrectOrMisorderedKeyfiles,

    #[error("missing required keyfiles")]
    KeyfilesRequired,

    #[error("keyfiles not required")]
    KeyfilesNotRequired,

    /// Two keyfiles hashed identically in unordered mode; their XOR would
    /// cancel out of the combined digest.
    #[error("duplicate keyfiles")]
    DuplicateKeyfiles,

    /// The body MAC mismatched after streaming, or a Reed-Solomon body
    /// frame was uncorrectable. In `keep_corrupted` mode the sink holds
    /// best-effort plaintext when this is returned.
    #[error("body corrupted")]
    BodyCorrupted,

    #[error("comments exceed maximum length")]
    CommentsTooLong,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Key derivation failed (Argon2 rejected its parameters or could not
    /// obtain memory, or the HKDF stream was exhausted). Never degraded
    /// silently.
    #[error("key derivation failed: {0}")]
    Kdf(String),
}
