use shared::CursorError;
use thiserror::Error;

/// Everything that can go wrong while reading a GBX header block.
///
/// Any of these discards the partially decoded header.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Cursor(#[from] CursorError),

    #[error("no magic GBX header")]
    BadMagic,

    #[error("unsupported GBX version: {0}")]
    UnsupportedVersion(u16),

    #[error("main class ID {0:08X} not supported")]
    UnsupportedClass(u32),

    #[error("no GBX header block")]
    NoHeaderBlock,

    #[error("no GBX header chunks")]
    NoChunks,

    #[error("chunk list size mismatch: {declared} <> {computed}")]
    ChunkListSizeMismatch { declared: u32, computed: usize },

    #[error("chunk 0x{id:08X} at 0x{offset:06X} (+{size}) runs past the end of the data ({len} bytes)")]
    ChunkOutOfBounds {
        id: u32,
        offset: usize,
        size: usize,
        len: usize,
    },

    #[error("unknown lookback strings version: {0}")]
    LookbackVersion(i32),

    #[error("lookback index {index} out of range ({len} strings stored)")]
    LookbackIndexOutOfRange { index: u32, len: usize },

    #[error("XML chunk size mismatch: {declared} <> {computed}")]
    XmlChunkSizeMismatch { declared: usize, computed: usize },

    #[error("XML chunk parse error: {0}")]
    Xml(String),

    #[error("header size mismatch: {declared} <> {consumed}")]
    HeaderSizeMismatch { declared: u32, consumed: usize },

    #[error("unable to read GBX data: {0}")]
    Io(#[from] std::io::Error),
}
