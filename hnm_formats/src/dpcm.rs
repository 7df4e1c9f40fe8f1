//! DPCM audio decoder for HNM4 `SD` chunks.
//!
//! The first audio chunk of the stream opens with a 256-entry table of
//! little-endian signed 16-bit deltas; every payload byte after that indexes
//! the table and the delta accumulates into a wrapping 16-bit running sample.
//! There is no clamping: overflow wraps, matching the original hardware.

use anyhow::{Result, ensure};

/// HNM4 audio is always mono 16-bit at this rate.
pub const DPCM_SAMPLE_RATE: u32 = 22050;

const TABLE_BYTES: usize = 512;

pub struct DpcmStream {
    table: [i16; 256],
    table_loaded: bool,
    last: u16,
}

impl DpcmStream {
    pub fn new() -> Self {
        Self {
            table: [0; 256],
            table_loaded: false,
            last: 0,
        }
    }

    /// Decode one `SD` payload, appending samples to `out` and returning how
    /// many were produced. The first payload must carry the full delta table
    /// before any delta byte.
    pub fn decode(&mut self, payload: &[u8], out: &mut Vec<i16>) -> Result<usize> {
        let mut data = payload;
        if !self.table_loaded {
            ensure!(
                data.len() >= TABLE_BYTES,
                "DPCM chunk too short for delta table: {} bytes",
                data.len()
            );
            for (entry, pair) in self.table.iter_mut().zip(data.chunks_exact(2)) {
                *entry = i16::from_le_bytes([pair[0], pair[1]]);
            }
            self.table_loaded = true;
            data = &data[TABLE_BYTES..];
        }

        out.reserve(data.len());
        for &code in data {
            self.last = self.last.wrapping_add(self.table[code as usize] as u16);
            out.push(self.last as i16);
        }
        Ok(data.len())
    }

    /// Rewind for loop playback: the accumulator restarts and the replayed
    /// first chunk's table bytes are consumed again instead of being
    /// misread as delta codes.
    pub fn restart(&mut self) {
        self.table_loaded = false;
        self.last = 0;
    }
}

impl Default for DpcmStream {
    fn default() -> Self {
        Self::new()
    }
}
