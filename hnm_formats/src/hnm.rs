//! HNM4 container: stream header, super-chunk/sub-chunk framing and the
//! pull-based decode orchestrator.
//!
//! The format is strictly sequential: a 64-byte header followed by
//! super-chunks, each holding typed sub-chunks (palette, video, audio). One
//! `next_packet` call consumes one whole super-chunk, decoding everything in
//! it in file order. There is no random access; the only seek ever issued is
//! the loop restart back to offset 64.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail, ensure};
use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use log::warn;
use serde::Serialize;

use crate::dpcm::{DPCM_SAMPLE_RATE, DpcmStream};
use crate::hnm4::Hnm4Video;
use crate::palette::{PALETTE_SIZE, Palette};

const TAG_HNM4: u32 = u32::from_be_bytes(*b"HNM4");
const TAG_PL: u16 = u16::from_be_bytes(*b"PL");
const TAG_IZ: u16 = u16::from_be_bytes(*b"IZ");
const TAG_IU: u16 = u16::from_be_bytes(*b"IU");
const TAG_SD: u16 = u16::from_be_bytes(*b"SD");

/// Size of the fixed preamble; loop playback seeks back to this offset.
pub const HEADER_SIZE: u64 = 64;

/// Frame delay applied when no sound chunk overrides the pacing.
const REGULAR_FRAME_DELAY_MS: u32 = 80;

/// Sound format code for the supported mono 16-bit DPCM variant.
const SOUND_FORMAT_DPCM: u16 = 2;

/// Fixed header read once at open time.
#[derive(Debug, Clone, Serialize)]
pub struct HnmHeader {
    pub width: u16,
    pub height: u16,
    pub file_size: u32,
    pub frame_count: u32,
    pub sound_bits: u16,
    pub sound_format: u16,
    pub frame_buffer_size: u32,
    #[serde(skip)]
    pub unknown: [u8; 16],
    #[serde(skip)]
    pub copyright: [u8; 16],
}

impl HnmHeader {
    pub fn unknown_text(&self) -> String {
        text_field(&self.unknown)
    }

    pub fn copyright_text(&self) -> String {
        text_field(&self.copyright)
    }
}

fn text_field(bytes: &[u8; 16]) -> String {
    let mut len = bytes.len();
    while len > 0 && bytes[len - 1] == 0 {
        len -= 1;
    }
    String::from_utf8_lossy(&bytes[..len]).into_owned()
}

/// Sub-chunk types the format defines. Anything else is a hard decode error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkTag {
    Palette,
    IntraVideo,
    InterVideo,
    Sound,
}

impl ChunkTag {
    fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            TAG_PL => Some(Self::Palette),
            TAG_IZ => Some(Self::IntraVideo),
            TAG_IU => Some(Self::InterVideo),
            TAG_SD => Some(Self::Sound),
            _ => None,
        }
    }
}

/// Raised when a fetch runs past the last super-chunk with looping disabled,
/// so callers can tell a clean end of stream from corruption.
#[derive(Debug, Clone, Copy)]
pub struct EndOfStream;

impl std::fmt::Display for EndOfStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "end of HNM stream reached")
    }
}

impl std::error::Error for EndOfStream {}

/// Configuration accepted at open time.
#[derive(Debug, Clone, Default)]
pub struct HnmOptions {
    /// Restart from the first super-chunk when the stream runs out instead
    /// of treating further fetches as an error.
    pub loop_playback: bool,
    /// Palette used until the first `PL` chunk arrives; defaults to all-zero.
    pub initial_palette: Option<[u8; PALETTE_SIZE]>,
}

/// Streaming HNM4 decoder. Single-threaded and pull-based: the playback
/// driver calls [`HnmDecoder::next_packet`] once per scheduling tick and each
/// call runs one super-chunk to completion.
pub struct HnmDecoder<R: Read + Seek> {
    reader: R,
    header: HnmHeader,
    video: Hnm4Video,
    palette: Palette,
    audio: Option<DpcmStream>,
    audio_queue: Vec<i16>,
    loop_playback: bool,
    current_frame: i64,
    next_frame_start_ms: u32,
    last_frame_delay_ms: u32,
    next_delay: Option<u32>,
    next_next_delay: Option<u32>,
}

impl HnmDecoder<BufReader<File>> {
    /// Open an HNM file from disk.
    pub fn open(path: impl AsRef<Path>, options: HnmOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open HNM file {}", path.display()))?;
        Self::from_reader(BufReader::new(file), options)
    }
}

impl<R: Read + Seek> HnmDecoder<R> {
    /// Build a decoder over an arbitrary positioned stream.
    pub fn from_reader(mut reader: R, options: HnmOptions) -> Result<Self> {
        let header = parse_header(&mut reader)?;

        let audio = if header.sound_format == SOUND_FORMAT_DPCM && header.sound_bits == 16 {
            Some(DpcmStream::new())
        } else if header.sound_bits == 0 {
            None
        } else {
            bail!(
                "unsupported HNM sound format {} with {}-bit samples",
                header.sound_format,
                header.sound_bits
            );
        };

        let video = Hnm4Video::new(header.width, header.height, header.frame_buffer_size)?;
        let palette = Palette::new(options.initial_palette.as_ref());

        Ok(Self {
            reader,
            header,
            video,
            palette,
            audio,
            audio_queue: Vec::new(),
            loop_playback: options.loop_playback,
            current_frame: -1,
            next_frame_start_ms: 0,
            last_frame_delay_ms: 0,
            next_delay: None,
            next_next_delay: None,
        })
    }

    pub fn header(&self) -> &HnmHeader {
        &self.header
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Index of the most recently presented frame; -1 before the first.
    pub fn current_frame(&self) -> i64 {
        self.current_frame
    }

    /// Scheduled start time, in stream milliseconds, of the next frame.
    pub fn next_frame_start_ms(&self) -> u32 {
        self.next_frame_start_ms
    }

    /// Delay applied to the most recently presented frame.
    pub fn last_frame_delay_ms(&self) -> u32 {
        self.last_frame_delay_ms
    }

    /// The last presented frame as an 8-bit paletted surface.
    pub fn surface(&self) -> &[u8] {
        self.video.surface()
    }

    pub fn palette(&self) -> &[u8; PALETTE_SIZE] {
        self.palette.rgb()
    }

    /// True once after each palette change; the consumer must re-apply the
    /// palette before painting the next frame.
    pub fn take_palette_dirty(&mut self) -> bool {
        self.palette.take_dirty()
    }

    /// Take all PCM samples decoded so far (mono s16 at 22050 Hz).
    pub fn drain_audio(&mut self) -> Vec<i16> {
        std::mem::take(&mut self.audio_queue)
    }

    /// Decode the next super-chunk: palette updates, at most a handful of
    /// video frames (usually one) and any interleaved audio. Fails once the
    /// stream is exhausted unless loop playback was requested.
    pub fn next_packet(&mut self) -> Result<()> {
        let mut remaining = self.read_superchunk_size()?;

        while remaining > 0 {
            ensure!(
                remaining >= 8,
                "sub-chunk header crosses super-chunk boundary ({remaining} bytes left)"
            );
            let chunk_size = self
                .reader
                .read_u32::<LittleEndian>()
                .context("failed to read sub-chunk size")?;
            let raw_tag = self
                .reader
                .read_u16::<BigEndian>()
                .context("failed to read sub-chunk tag")?;
            let flags = self
                .reader
                .read_u16::<LittleEndian>()
                .context("failed to read sub-chunk flags")?;
            ensure!(
                chunk_size >= 8 && chunk_size <= remaining,
                "sub-chunk size {chunk_size} inconsistent with super-chunk budget {remaining}"
            );

            let mut payload = vec![0u8; chunk_size as usize - 8];
            self.reader
                .read_exact(&mut payload)
                .context("failed to read sub-chunk payload")?;

            match ChunkTag::from_raw(raw_tag) {
                Some(ChunkTag::Palette) => self.palette.apply_update(&payload)?,
                Some(ChunkTag::IntraVideo) => {
                    // Four reserved header bytes precede the LZ payload.
                    ensure!(payload.len() >= 4, "intraframe chunk too short");
                    self.video.decode_intraframe(&payload[4..])?;
                    self.present(false)?;
                }
                Some(ChunkTag::InterVideo) => {
                    let dialect_a = flags & 1 != 0;
                    if dialect_a {
                        self.video.decode_interframe_a(&payload)?;
                    } else {
                        self.video.decode_interframe(&payload)?;
                    }
                    self.present(dialect_a)?;
                }
                Some(ChunkTag::Sound) => {
                    if let Some(audio) = self.audio.as_mut() {
                        let samples = audio.decode(&payload, &mut self.audio_queue)?;
                        let delay_ms =
                            (samples as u64 * 1000 / u64::from(DPCM_SAMPLE_RATE)) as u32;
                        self.register_frame_delay(delay_ms);
                    } else {
                        warn!(
                            "sound chunk in a stream with no audio track, dropping {} bytes",
                            payload.len()
                        );
                    }
                }
                None => bail!(
                    "unrecognized HNM chunk tag {:04x} ({})",
                    raw_tag,
                    String::from_utf8_lossy(&raw_tag.to_be_bytes())
                ),
            }

            remaining -= chunk_size;
        }

        Ok(())
    }

    /// Read the next super-chunk length, handling end of stream: fatal when
    /// not looping, otherwise seek past the preamble and start over with the
    /// frame counter reset (palette and frame buffers are kept).
    fn read_superchunk_size(&mut self) -> Result<u32> {
        let mut restarted = false;
        loop {
            let size = match self.reader.read_u32::<LittleEndian>() {
                // The top byte is a flag field, not part of the magnitude.
                Ok(raw) => raw & 0x00FF_FFFF,
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => 0,
                Err(err) => return Err(err).context("failed to read super-chunk size"),
            };
            if size != 0 {
                ensure!(size >= 4, "super-chunk size {size} smaller than its own header");
                return Ok(size - 4);
            }
            if !self.loop_playback {
                return Err(EndOfStream.into());
            }
            ensure!(!restarted, "HNM stream contains no super-chunks");
            restarted = true;
            self.reader
                .seek(SeekFrom::Start(HEADER_SIZE))
                .context("failed to seek back for loop playback")?;
            self.restart();
        }
    }

    fn restart(&mut self) {
        self.current_frame = -1;
        if let Some(audio) = self.audio.as_mut() {
            audio.restart();
        }
    }

    fn present(&mut self, dialect_a: bool) -> Result<()> {
        self.video.present(dialect_a)?;
        self.current_frame += 1;
        let delay = self.next_delay.take().unwrap_or(REGULAR_FRAME_DELAY_MS);
        self.last_frame_delay_ms = delay;
        self.next_frame_start_ms += delay;
        // Promote the queued-ahead slot; the interleave runs one chunk ahead.
        self.next_delay = self.next_next_delay.take();
        Ok(())
    }

    /// Sound duration overrides the upcoming frame's delay; a second
    /// registration queues for the frame after, further ones accumulate.
    fn register_frame_delay(&mut self, delay_ms: u32) {
        if self.next_delay.is_none() {
            self.next_delay = Some(delay_ms);
        } else if let Some(slot) = self.next_next_delay.as_mut() {
            *slot += delay_ms;
        } else {
            self.next_next_delay = Some(delay_ms);
        }
    }
}

fn parse_header<R: Read>(reader: &mut R) -> Result<HnmHeader> {
    let magic = reader
        .read_u32::<BigEndian>()
        .context("failed to read HNM magic")?;
    if magic != TAG_HNM4 {
        bail!("unsupported HNM magic {:08x}", magic);
    }

    let _reserved = reader
        .read_u32::<LittleEndian>()
        .context("failed to read HNM reserved field")?;
    let width = reader
        .read_u16::<LittleEndian>()
        .context("failed to read HNM width")?;
    let height = reader
        .read_u16::<LittleEndian>()
        .context("failed to read HNM height")?;
    let file_size = reader
        .read_u32::<LittleEndian>()
        .context("failed to read HNM file size")?;
    let frame_count = reader
        .read_u32::<LittleEndian>()
        .context("failed to read HNM frame count")?;
    let _table_offset = reader
        .read_u32::<LittleEndian>()
        .context("failed to read HNM table offset")?;
    let sound_bits = reader
        .read_u16::<LittleEndian>()
        .context("failed to read HNM sound bit depth")?;
    let sound_format = reader
        .read_u16::<LittleEndian>()
        .context("failed to read HNM sound format")?;
    let frame_buffer_size = reader
        .read_u32::<LittleEndian>()
        .context("failed to read HNM frame buffer size")?;

    let mut unknown = [0u8; 16];
    reader
        .read_exact(&mut unknown)
        .context("failed to read HNM unknown string")?;
    let mut copyright = [0u8; 16];
    reader
        .read_exact(&mut copyright)
        .context("failed to read HNM copyright string")?;

    Ok(HnmHeader {
        width,
        height,
        file_size,
        frame_count,
        sound_bits,
        sound_format,
        frame_buffer_size,
        unknown,
        copyright,
    })
}

/// One sub-chunk as seen by the layout walker.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkInfo {
    pub tag: String,
    pub size: u32,
    pub flags: u16,
}

/// One super-chunk as seen by the layout walker.
#[derive(Debug, Clone, Serialize)]
pub struct SuperchunkInfo {
    pub size: u32,
    pub chunks: Vec<ChunkInfo>,
}

/// Container layout without any payload decoding, for inspection tools.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkScan {
    #[serde(skip)]
    pub source: Option<PathBuf>,
    pub header: HnmHeader,
    pub superchunks: Vec<SuperchunkInfo>,
}

impl ChunkScan {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open HNM file {}", path.display()))?;
        let mut scan = Self::read_from(BufReader::new(file))?;
        scan.source = Some(path.to_path_buf());
        Ok(scan)
    }

    pub fn read_from<R: Read + Seek>(mut reader: R) -> Result<Self> {
        let header = parse_header(&mut reader)?;
        let mut superchunks = Vec::new();

        loop {
            let size = match reader.read_u32::<LittleEndian>() {
                Ok(raw) => raw & 0x00FF_FFFF,
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(err).context("failed to read super-chunk size"),
            };
            if size == 0 {
                break;
            }
            ensure!(size >= 4, "super-chunk size {size} smaller than its own header");

            let mut remaining = size - 4;
            let mut chunks = Vec::new();
            while remaining > 0 {
                ensure!(
                    remaining >= 8,
                    "sub-chunk header crosses super-chunk boundary ({remaining} bytes left)"
                );
                let chunk_size = reader
                    .read_u32::<LittleEndian>()
                    .context("failed to read sub-chunk size")?;
                let raw_tag = reader
                    .read_u16::<BigEndian>()
                    .context("failed to read sub-chunk tag")?;
                let flags = reader
                    .read_u16::<LittleEndian>()
                    .context("failed to read sub-chunk flags")?;
                ensure!(
                    chunk_size >= 8 && chunk_size <= remaining,
                    "sub-chunk size {chunk_size} inconsistent with super-chunk budget {remaining}"
                );
                reader
                    .seek(SeekFrom::Current(i64::from(chunk_size) - 8))
                    .context("failed to skip sub-chunk payload")?;

                chunks.push(ChunkInfo {
                    tag: String::from_utf8_lossy(&raw_tag.to_be_bytes()).into_owned(),
                    size: chunk_size,
                    flags,
                });
                remaining -= chunk_size;
            }

            superchunks.push(SuperchunkInfo { size, chunks });
        }

        Ok(Self {
            source: None,
            header,
            superchunks,
        })
    }
}
