//! Per-chunk table of back-referenced identifier strings

use crate::error::DecodeError;
use log::debug;
use shared::ByteCursor;

const LOOKBACK_VERSION: i32 = 3;
const EXTERNAL_MASK: u32 = 0xC000_0000;
const INDEX_MASK: u32 = 0x3FFF_FFFF;

/// Names for identifiers that point into the game's own string tables
pub fn well_known_id(id: u32) -> &'static str {
    match id {
        11 => "Valley",
        12 => "Canyon",
        13 => "Lagoon",
        17 => "TMCommon",
        202 => "Storm",
        299 => "SMCommon",
        10003 => "Common",
        _ => "UNKNOWN",
    }
}

/// Strings seen so far in the current chunk.
///
/// The table version is stored once, in front of the first lookback read of
/// a chunk, so it is consumed lazily and read again after every
/// [`LookbackStringTable::reset`].
#[derive(Debug, Default)]
pub struct LookbackStringTable {
    strings: Option<Vec<String>>,
}

impl LookbackStringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets every stored string; the next read expects a version again
    pub fn reset(&mut self) {
        self.strings = None;
    }

    pub fn len(&self) -> usize {
        self.strings.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read(&mut self, cursor: &mut ByteCursor<'_>) -> Result<String, DecodeError> {
        if self.strings.is_none() {
            let version = cursor.read_i32()?;
            if version != LOOKBACK_VERSION {
                return Err(DecodeError::LookbackVersion(version));
            }
        }
        let strings = self.strings.get_or_insert_with(Vec::new);

        let index = cursor.read_u32()?;
        if index == u32::MAX {
            return Ok(String::new());
        }

        if index & EXTERNAL_MASK == 0 {
            return Ok(well_known_id(index).to_string());
        }

        let slot = index & INDEX_MASK;
        if slot == 0 {
            let value = cursor.read_length_prefixed_string()?;
            debug!("Lookback string #{}: {:?}", strings.len() + 1, value);
            strings.push(value.clone());
            return Ok(value);
        }

        strings
            .get(slot as usize - 1)
            .cloned()
            .ok_or(DecodeError::LookbackIndexOutOfRange {
                index: slot,
                len: strings.len(),
            })
    }
}
