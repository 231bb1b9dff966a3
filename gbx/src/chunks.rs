//! GBX file header and header chunk directory
//!
//! ```text
//! "GBX" . u16 version (6) . 4 bytes format flags . u32 class id
//!       . u32 header size . u32 chunk count . (u32 id, u32 size) * count
//!       . chunk data ...
//! ```
//!
//! The header size covers the chunk count, the directory and every chunk's
//! data. Chunk data follows the directory in directory order.

use crate::error::DecodeError;
use indexmap::IndexMap;
use log::debug;
use shared::ByteCursor;

pub const CHALLENGE_TMF: u32 = 0x0304_3000;
pub const AUTOSAVE_TMF: u32 = 0x0309_3000;
pub const CHALLENGE_TM: u32 = 0x2400_3000;
pub const AUTOSAVE_TM: u32 = 0x2403_F000;
pub const REPLAY_TM: u32 = 0x2407_E000;

/// Main classes of challenge/map files
pub const TRACK_CLASSES: &[u32] = &[CHALLENGE_TMF, CHALLENGE_TM];
/// Main classes of replays and autosaves
pub const REPLAY_CLASSES: &[u32] = &[AUTOSAVE_TMF, AUTOSAVE_TM, REPLAY_TM];

const GBX_MAGIC: &[u8] = b"GBX";
const GBX_VERSION: u16 = 6;
const CHUNK_SIZE_MASK: u32 = 0x7FFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkName {
    Info,
    String,
    Version,
    Xml,
    Thumbnail,
    Author,
    Unknown,
}

impl ChunkName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkName::Info => "Info",
            ChunkName::String => "String",
            ChunkName::Version => "Version",
            ChunkName::Xml => "XML",
            ChunkName::Thumbnail => "Thumbnl",
            ChunkName::Author => "Author",
            ChunkName::Unknown => "UNKNOWN",
        }
    }

    /// Header chunks of challenge and map files
    pub fn for_track_chunk(id: u32) -> Self {
        match id {
            0x0304_3002 | 0x2400_3002 => ChunkName::Info,
            0x0304_3003 | 0x2400_3003 => ChunkName::String,
            0x0304_3004 | 0x2400_3004 => ChunkName::Version,
            0x0304_3005 | 0x2400_3005 => ChunkName::Xml,
            0x0304_3007 | 0x2400_3007 => ChunkName::Thumbnail,
            0x0304_3008 => ChunkName::Author,
            _ => ChunkName::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GbxChunkDescriptor {
    pub id: u32,
    pub name: ChunkName,
    /// Absolute offset of the chunk data in the file
    pub offset: usize,
    pub size: usize,
}

#[derive(Debug, Clone)]
pub struct GbxChunkIndex {
    pub class_id: u32,
    pub header_size: u32,
    /// Position right after the header size field
    pub header_start: usize,
    /// Recognised chunks; a later chunk with the same name replaces an
    /// earlier one
    pub chunks: IndexMap<ChunkName, GbxChunkDescriptor>,
    /// Chunks the resolver had no name for
    pub others: Vec<GbxChunkDescriptor>,
}

impl GbxChunkIndex {
    /// Reads the file header and chunk directory from the start of the cursor
    pub fn parse(
        cursor: &mut ByteCursor<'_>,
        classes_allowed: &[u32],
        resolve: fn(u32) -> ChunkName,
    ) -> Result<Self, DecodeError> {
        let magic = cursor.read(3)?;
        let version = cursor.read_u16()?;
        if magic != GBX_MAGIC {
            return Err(DecodeError::BadMagic);
        }
        if version != GBX_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }

        // format, compression and an unknown byte
        cursor.skip(4)?;

        let class_id = cursor.read_u32()?;
        if !classes_allowed.contains(&class_id) {
            return Err(DecodeError::UnsupportedClass(class_id));
        }
        debug!("GBX main class ID: {:08X}", class_id);

        let header_size = cursor.read_u32()?;
        if header_size == 0 {
            return Err(DecodeError::NoHeaderBlock);
        }
        debug!(
            "GBX header block size: {} ({:.1} KB)",
            header_size,
            f64::from(header_size) / 1024.0
        );
        let header_start = cursor.position();

        let count = cursor.read_u32()?;
        if count == 0 {
            return Err(DecodeError::NoChunks);
        }

        let directory_start = cursor.position();
        let mut offset = directory_start + count as usize * 8;
        let mut directory = Vec::with_capacity(count.min(64) as usize);

        for i in 0..count {
            let id = cursor.read_u32()?;
            let size = (cursor.read_u32()? & CHUNK_SIZE_MASK) as usize;
            let name = resolve(id);
            debug!(
                "GBX chunk {:2}  {:<8}  Id  0x{:08X}  Offset  0x{:06X}  Size {:6}",
                i,
                name.as_str(),
                id,
                offset,
                size
            );
            directory.push(GbxChunkDescriptor {
                id,
                name,
                offset,
                size,
            });
            offset += size;
        }

        let computed = offset - directory_start + 4;
        if header_size as usize != computed {
            return Err(DecodeError::ChunkListSizeMismatch {
                declared: header_size,
                computed,
            });
        }

        let mut chunks = IndexMap::new();
        let mut others = Vec::new();
        for chunk in directory {
            if chunk.offset + chunk.size > cursor.len() {
                return Err(DecodeError::ChunkOutOfBounds {
                    id: chunk.id,
                    offset: chunk.offset,
                    size: chunk.size,
                    len: cursor.len(),
                });
            }
            match chunk.name {
                ChunkName::Unknown => others.push(chunk),
                name => {
                    chunks.insert(name, chunk);
                }
            }
        }

        Ok(Self {
            class_id,
            header_size,
            header_start,
            chunks,
            others,
        })
    }

    pub fn get(&self, name: ChunkName) -> Option<&GbxChunkDescriptor> {
        self.chunks.get(&name)
    }
}
