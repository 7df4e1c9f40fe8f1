pub mod dpcm;
pub mod hlz;
pub mod hnm;
pub mod hnm4;
pub mod palette;

pub use dpcm::{DPCM_SAMPLE_RATE, DpcmStream};
pub use hnm::{ChunkScan, EndOfStream, HnmDecoder, HnmHeader, HnmOptions};
pub use hnm4::Hnm4Video;
pub use palette::{PALETTE_SIZE, Palette};
