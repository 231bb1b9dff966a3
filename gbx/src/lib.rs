//! # GBX Track Header Library
//!
//! Reads the uncompressed header block of challenge/map files: the chunk
//! directory, track metadata, the embedded XML description, the thumbnail
//! and author details. The compressed body is never touched.
//!
//! ## Module Organization
//!
//! ### Chunks Module (`chunks`)
//! File header checks and the header chunk directory.
//!
//! ### Lookback Module (`lookback`)
//! Back-referenced identifier strings, reset for every chunk.
//!
//! ### XML Module (`xml`)
//! The XML description block and its tolerant parsing.
//!
//! ### Track Module (`track`)
//! Version-gated decoding of each header chunk into a `TrackHeader`.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use gbx::{GbxTrackDecoder, TRACK_CLASSES};
//!
//! let data = std::fs::read("A01-Race.Challenge.Gbx")?;
//! let header = GbxTrackDecoder::decode(&data, TRACK_CLASSES)?;
//! println!("{} by {}: {} checkpoints", header.name, header.author, header.nb_checkpoints);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod chunks;
pub mod error;
pub mod lookback;
pub mod track;
pub mod xml;

pub use chunks::{ChunkName, GbxChunkDescriptor, GbxChunkIndex, REPLAY_CLASSES, TRACK_CLASSES};
pub use error::DecodeError;
pub use lookback::LookbackStringTable;
pub use track::{GbxOptions, GbxTrackDecoder, TrackHeader, TrackKind, TrackType};
pub use xml::TrackXml;
