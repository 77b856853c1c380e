use thiserror::Error;

/// Everything that can go wrong decoding, encoding, or routing an EVIO
/// buffer, block, record, or file.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("truncated input: expected {expected} more bytes at offset {offset}")]
    Truncated { offset: usize, expected: usize },

    #[error("magic number mismatch: expected 0x{expected:08x}, found 0x{found:08x}")]
    MagicMismatch { expected: u32, found: u32 },

    #[error("unsupported evio version: {0}")]
    VersionMismatch(u32),

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("unsupported compression type: {0}")]
    UnsupportedCompression(u8),

    #[error("child lengths ({children}) do not sum to parent length ({parent})")]
    LengthMismatch { parent: u32, children: u32 },

    #[error("closeStructure called with no open frame")]
    StackUnderflow,

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("event index {index} out of range (count = {count})")]
    EventIndexOutOfRange { index: u32, count: u32 },

    #[error("dictionary parse error: {0}")]
    DictionaryParseError(String),

    #[error("writer is closed")]
    WriterClosed,

    /// Internal-only: back-pressure signal inside the compression ring.
    /// Never returned from a public API; `writeEvent` blocks instead.
    #[error("ring full")]
    RingFull,
}

pub type Result<T> = std::result::Result<T, Error>;
