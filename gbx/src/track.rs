//! Decoding of challenge/map header blocks

use crate::chunks::{ChunkName, GbxChunkDescriptor, GbxChunkIndex, TRACK_CLASSES};
use crate::error::DecodeError;
use crate::lookback::LookbackStringTable;
use crate::xml::TrackXml;
use log::{debug, warn};
use regex::Regex;
use serde::Serialize;
use shared::{strip_bom, ByteCursor, Endianness};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

/// Header blocks fit comfortably in the first 256 KiB of a file
pub const LOAD_LIMIT: u64 = 256 * 1024;

const THUMBNAIL_OPEN: &str = "<Thumbnail.jpg>";
const THUMBNAIL_CLOSE: &str = "</Thumbnail.jpg>";
const COMMENTS_OPEN: &str = "<Comments>";
const COMMENTS_CLOSE: &str = "</Comments>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackType {
    Race,
    Platform,
    Puzzle,
    Crazy,
    Shortcut,
    Stunts,
    Script,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl TrackType {
    pub fn from_id(id: i32) -> Self {
        match id {
            0 => TrackType::Race,
            1 => TrackType::Platform,
            2 => TrackType::Puzzle,
            3 => TrackType::Crazy,
            4 => TrackType::Shortcut,
            5 => TrackType::Stunts,
            6 => TrackType::Script,
            _ => TrackType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackType::Race => "Race",
            TrackType::Platform => "Platform",
            TrackType::Puzzle => "Puzzle",
            TrackType::Crazy => "Crazy",
            TrackType::Shortcut => "Shortcut",
            TrackType::Stunts => "Stunts",
            TrackType::Script => "Script",
            TrackType::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackKind {
    #[serde(rename = "(internal)EndMarker")]
    EndMarker,
    #[serde(rename = "(old)Campaign")]
    OldCampaign,
    #[serde(rename = "(old)Puzzle")]
    OldPuzzle,
    #[serde(rename = "(old)Retro")]
    OldRetro,
    #[serde(rename = "(old)TimeAttack")]
    OldTimeAttack,
    #[serde(rename = "(old)Rounds")]
    OldRounds,
    InProgress,
    Campaign,
    Multi,
    Solo,
    Site,
    SoloNadeo,
    MultiNadeo,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl TrackKind {
    pub fn from_id(id: i8) -> Self {
        match id {
            0 => TrackKind::EndMarker,
            1 => TrackKind::OldCampaign,
            2 => TrackKind::OldPuzzle,
            3 => TrackKind::OldRetro,
            4 => TrackKind::OldTimeAttack,
            5 => TrackKind::OldRounds,
            6 => TrackKind::InProgress,
            7 => TrackKind::Campaign,
            8 => TrackKind::Multi,
            9 => TrackKind::Solo,
            10 => TrackKind::Site,
            11 => TrackKind::SoloNadeo,
            12 => TrackKind::MultiNadeo,
            _ => TrackKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::EndMarker => "(internal)EndMarker",
            TrackKind::OldCampaign => "(old)Campaign",
            TrackKind::OldPuzzle => "(old)Puzzle",
            TrackKind::OldRetro => "(old)Retro",
            TrackKind::OldTimeAttack => "(old)TimeAttack",
            TrackKind::OldRounds => "(old)Rounds",
            TrackKind::InProgress => "InProgress",
            TrackKind::Campaign => "Campaign",
            TrackKind::Multi => "Multi",
            TrackKind::Solo => "Solo",
            TrackKind::Site => "Site",
            TrackKind::SoloNadeo => "SoloNadeo",
            TrackKind::MultiNadeo => "MultiNadeo",
            TrackKind::Unknown => "UNKNOWN",
        }
    }
}

/// Decoder switches
#[derive(Debug, Clone)]
pub struct GbxOptions {
    /// Parse the embedded XML block and let it override binary fields
    pub parse_xml: bool,
    /// Keep the raw JPEG thumbnail bytes
    pub keep_thumbnail: bool,
    pub byte_order: Endianness,
}

impl Default for GbxOptions {
    fn default() -> Self {
        Self {
            parse_xml: true,
            keep_thumbnail: true,
            byte_order: Endianness::Little,
        }
    }
}

/// Everything the header block of a challenge file tells about the track
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackHeader {
    pub class_id: u32,
    pub header_version: i32,

    // Info chunk
    pub bronze_time: i32,
    pub silver_time: i32,
    pub gold_time: i32,
    pub author_time: i32,
    pub cost: i32,
    pub multi_lap: bool,
    pub track_type: Option<TrackType>,
    pub author_score: i32,
    pub simple_edit: bool,
    pub ghost_blocks: bool,
    pub nb_checkpoints: i32,
    pub nb_laps: i32,

    // String chunk
    pub uid: String,
    pub environment: String,
    pub author: String,
    pub name: String,
    pub kind: Option<TrackKind>,
    pub password: String,
    pub mood: String,
    pub decoration_environment: String,
    pub decoration_author: String,
    pub map_type: String,
    pub map_style: String,
    pub lightmap: i32,
    pub title_uid: String,

    // XML chunk
    pub xml: String,
    pub xml_version: String,
    pub exe_version: String,
    pub exe_build: String,
    pub validated: i32,
    pub song_file: String,
    pub song_url: String,
    pub mod_name: String,
    pub mod_file: String,
    pub mod_url: String,
    pub vehicle: String,
    pub parsed_xml: Option<TrackXml>,

    // Thumbnl chunk
    pub thumbnail_len: usize,
    #[serde(skip)]
    pub thumbnail: Vec<u8>,
    pub comment: String,

    // Author chunk
    pub author_version: i32,
    pub author_login: String,
    pub author_nick: String,
    pub author_zone: String,
    pub author_extra_info: String,

    /// Ids of header chunks that were listed but not decoded
    pub unknown_chunks: Vec<u32>,
}

impl TrackHeader {
    /// Lets the embedded XML override values read from the binary chunks
    fn apply_xml(&mut self, xml: &TrackXml) {
        let text = |element: &str, name: &str, target: &mut String| {
            if let Some(value) = xml.attribute(element, name) {
                *target = value.to_string();
            }
        };
        let number = |element: &str, name: &str, target: &mut i32| {
            if let Some(value) = xml.attribute(element, name) {
                match value.trim().parse() {
                    Ok(parsed) => *target = parsed,
                    Err(_) => warn!("Ignoring non-numeric {}.{}: {:?}", element, name, value),
                }
            }
        };

        text("HEADER", "VERSION", &mut self.xml_version);
        text("HEADER", "EXEVER", &mut self.exe_version);
        text("HEADER", "EXEBUILD", &mut self.exe_build);
        number("HEADER", "LIGHTMAP", &mut self.lightmap);
        text("IDENT", "AUTHORZONE", &mut self.author_zone);
        text("DESC", "ENVIR", &mut self.environment);
        number("DESC", "NBLAPS", &mut self.nb_laps);
        number("DESC", "VALIDATED", &mut self.validated);
        text("DESC", "MOD", &mut self.mod_name);
        text("PLAYERMODEL", "ID", &mut self.vehicle);

        for dep in &xml.deps {
            let Some(file) = dep.get("FILE") else {
                continue;
            };
            let url = dep.get("URL");
            if file.contains("ChallengeMusics\\") {
                self.song_file = file.clone();
                if let Some(url) = url {
                    self.song_url = url.clone();
                }
            } else if mod_path_regex().is_match(file) {
                self.mod_file = file.clone();
                if let Some(url) = url {
                    self.mod_url = url.clone();
                }
            }
        }
    }
}

fn mood_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z]+)\d*").expect("mood pattern"))
}

fn mod_path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r".+\\Mod\\.+").expect("mod path pattern"))
}

/// Drops the digits that follow the leading word of a mood name
pub fn normalize_mood(mood: &str) -> String {
    mood_regex().replace(mood, "$1").into_owned()
}

/// Cursor, lookback table and high-water mark shared by the chunk readers
struct ChunkReader<'a> {
    cursor: ByteCursor<'a>,
    lookbacks: LookbackStringTable,
    header_end: usize,
}

impl<'a> ChunkReader<'a> {
    fn enter(&mut self, chunk: &GbxChunkDescriptor) -> Result<(), DecodeError> {
        self.cursor.seek(chunk.offset)?;
        self.lookbacks.reset();
        Ok(())
    }

    fn leave(&mut self) {
        self.header_end = self.header_end.max(self.cursor.position());
    }

    fn lookback(&mut self) -> Result<String, DecodeError> {
        self.lookbacks.read(&mut self.cursor)
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        Ok(self.cursor.read_length_prefixed_string()?)
    }

    fn bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        Ok(self.cursor.read_length_prefixed_bytes()?)
    }
}

pub struct GbxTrackDecoder {
    options: GbxOptions,
}

impl Default for GbxTrackDecoder {
    fn default() -> Self {
        Self::new(GbxOptions::default())
    }
}

impl GbxTrackDecoder {
    pub fn new(options: GbxOptions) -> Self {
        Self { options }
    }

    /// Decodes with default options
    pub fn decode(bytes: &[u8], classes_allowed: &[u32]) -> Result<TrackHeader, DecodeError> {
        Self::default().decode_with(bytes, classes_allowed)
    }

    /// Loads the start of a challenge file and decodes its header block
    pub fn decode_file<P: AsRef<Path>>(&self, path: P) -> Result<TrackHeader, DecodeError> {
        let mut data = Vec::new();
        File::open(path.as_ref())?
            .take(LOAD_LIMIT)
            .read_to_end(&mut data)?;
        debug!("GBX data length: {}", data.len());
        self.decode_with(&data, TRACK_CLASSES)
    }

    pub fn decode_with(
        &self,
        bytes: &[u8],
        classes_allowed: &[u32],
    ) -> Result<TrackHeader, DecodeError> {
        let mut cursor = ByteCursor::with_order(bytes, self.options.byte_order);
        let index = GbxChunkIndex::parse(&mut cursor, classes_allowed, ChunkName::for_track_chunk)?;

        let mut reader = ChunkReader {
            cursor,
            lookbacks: LookbackStringTable::new(),
            header_end: index.header_start,
        };
        let mut header = TrackHeader {
            class_id: index.class_id,
            unknown_chunks: index.others.iter().map(|chunk| chunk.id).collect(),
            ..TrackHeader::default()
        };

        let order = [
            ChunkName::Info,
            ChunkName::String,
            ChunkName::Version,
            ChunkName::Xml,
            ChunkName::Thumbnail,
            ChunkName::Author,
        ];
        for name in order {
            let Some(chunk) = index.get(name) else {
                continue;
            };
            reader.enter(chunk)?;
            match name {
                ChunkName::Info => self.read_info(&mut reader, &mut header)?,
                ChunkName::String => self.read_strings(&mut reader, &mut header)?,
                ChunkName::Version => {
                    header.header_version = reader.cursor.read_i32()?;
                    debug!("GBX Version chunk: {}", header.header_version);
                }
                ChunkName::Xml => self.read_xml(&mut reader, chunk, &mut header)?,
                ChunkName::Thumbnail => self.read_thumbnail(&mut reader, &mut header)?,
                ChunkName::Author => {
                    let version = reader.cursor.read_i32()?;
                    debug!("GBX Author chunk version: {}", version);
                    self.read_author(&mut reader, &mut header)?;
                }
                ChunkName::Unknown => {}
            }
            reader.leave();
        }

        let consumed = reader.header_end - index.header_start;
        if consumed != index.header_size as usize {
            return Err(DecodeError::HeaderSizeMismatch {
                declared: index.header_size,
                consumed,
            });
        }

        if let Some(xml) = header.parsed_xml.take() {
            header.apply_xml(&xml);
            header.parsed_xml = Some(xml);
        }

        Ok(header)
    }

    fn read_info(
        &self,
        reader: &mut ChunkReader<'_>,
        header: &mut TrackHeader,
    ) -> Result<(), DecodeError> {
        let version = reader.cursor.read_i8()?;
        debug!("GBX Info chunk version: {}", version);

        if version < 3 {
            header.uid = reader.lookback()?;
            header.environment = reader.lookback()?;
            header.author = reader.lookback()?;
            header.name = strip_bom(&reader.string()?);
        }

        reader.cursor.skip(4)?;

        if version >= 1 {
            header.bronze_time = reader.cursor.read_i32()?;
            header.silver_time = reader.cursor.read_i32()?;
            header.gold_time = reader.cursor.read_i32()?;
            header.author_time = reader.cursor.read_i32()?;
        }
        if version == 2 {
            reader.cursor.skip(1)?;
        }
        if version >= 4 {
            header.cost = reader.cursor.read_i32()?;
        }
        if version >= 5 {
            header.multi_lap = reader.cursor.read_i32()? != 0;
        }
        if version == 6 {
            reader.cursor.skip(4)?;
        }
        if version >= 7 {
            header.track_type = Some(TrackType::from_id(reader.cursor.read_i32()?));
        }
        if version >= 9 {
            reader.cursor.skip(4)?;
        }
        if version >= 10 {
            header.author_score = reader.cursor.read_i32()?;
        }
        if version >= 11 {
            let editor_mode = reader.cursor.read_i32()?;
            header.simple_edit = editor_mode & 1 != 0;
            header.ghost_blocks = editor_mode & 2 != 0;
        }
        if version >= 12 {
            reader.cursor.skip(4)?;
        }
        if version >= 13 {
            header.nb_checkpoints = reader.cursor.read_i32()?;
            header.nb_laps = reader.cursor.read_i32()?;
        }
        Ok(())
    }

    fn read_strings(
        &self,
        reader: &mut ChunkReader<'_>,
        header: &mut TrackHeader,
    ) -> Result<(), DecodeError> {
        let version = reader.cursor.read_i8()?;
        debug!("GBX String chunk version: {}", version);

        header.uid = reader.lookback()?;
        header.environment = reader.lookback()?;
        header.author = reader.lookback()?;
        header.name = strip_bom(&reader.string()?);
        header.kind = Some(TrackKind::from_id(reader.cursor.read_i8()?));

        if version >= 1 {
            // locked flag
            reader.cursor.skip(4)?;
            header.password = reader.string()?;
        }
        if version >= 2 {
            header.mood = normalize_mood(&reader.lookback()?);
            header.decoration_environment = reader.lookback()?;
            header.decoration_author = reader.lookback()?;
        }
        if version >= 3 {
            // map origin
            reader.cursor.skip(8)?;
        }
        if version >= 4 {
            // map target
            reader.cursor.skip(8)?;
        }
        if version >= 5 {
            reader.cursor.skip(16)?;
        }
        if version >= 6 {
            header.map_type = reader.string()?;
            header.map_style = reader.string()?;
        }
        if version <= 8 {
            reader.cursor.skip(4)?;
        }
        if version >= 8 {
            // lightmap cache uid
            reader.cursor.skip(8)?;
        }
        if version >= 9 {
            header.lightmap = i32::from(reader.cursor.read_i8()?);
        }
        if version >= 11 {
            header.title_uid = reader.lookback()?;
        }
        Ok(())
    }

    fn read_xml(
        &self,
        reader: &mut ChunkReader<'_>,
        chunk: &GbxChunkDescriptor,
        header: &mut TrackHeader,
    ) -> Result<(), DecodeError> {
        let raw = reader.bytes()?;

        // zero-filled XML chunks carry no length to check
        if !raw.is_empty() && chunk.size != raw.len() + 4 {
            return Err(DecodeError::XmlChunkSizeMismatch {
                declared: chunk.size,
                computed: raw.len() + 4,
            });
        }
        let xml = String::from_utf8_lossy(raw).into_owned();

        if self.options.parse_xml && !xml.is_empty() {
            header.parsed_xml = Some(TrackXml::parse(&xml)?);
        }
        header.xml = xml;
        Ok(())
    }

    fn read_thumbnail(
        &self,
        reader: &mut ChunkReader<'_>,
        header: &mut TrackHeader,
    ) -> Result<(), DecodeError> {
        let version = reader.cursor.read_i32()?;
        debug!("GBX Thumbnail chunk version: {}", version);
        if version != 1 {
            return Ok(());
        }

        let size = reader.cursor.read_i32()?;
        if size < 0 {
            warn!("Negative thumbnail size {}, treating as empty", size);
        }
        let size = size.max(0) as usize;
        debug!(
            "GBX Thumbnail size: {} ({:.1} KB)",
            size,
            size as f64 / 1024.0
        );

        reader.cursor.skip(THUMBNAIL_OPEN.len())?;
        let jpeg = reader.cursor.read(size)?;
        reader.cursor.skip(THUMBNAIL_CLOSE.len())?;
        reader.cursor.skip(COMMENTS_OPEN.len())?;
        header.comment = strip_bom(&reader.string()?);
        reader.cursor.skip(COMMENTS_CLOSE.len())?;

        header.thumbnail_len = jpeg.len();
        if self.options.keep_thumbnail {
            header.thumbnail = jpeg.to_vec();
        }
        Ok(())
    }

    fn read_author(
        &self,
        reader: &mut ChunkReader<'_>,
        header: &mut TrackHeader,
    ) -> Result<(), DecodeError> {
        header.author_version = reader.cursor.read_i32()?;
        header.author_login = reader.string()?;
        header.author_nick = strip_bom(&reader.string()?);
        header.author_zone = strip_bom(&reader.string()?);
        header.author_extra_info = reader.string()?;
        Ok(())
    }
}
