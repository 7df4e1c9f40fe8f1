//! LZ-style byte-oriented decompressor used by HNM4 intraframe chunks.
//!
//! The bitstream interleaves control bits with literal/offset bytes. Control
//! bits come from a 16-bit little-endian queue refilled on demand; a sentinel
//! bit above the loaded word marks when the queue runs dry. Back-references
//! always point behind the write cursor and may overlap it, so copies run
//! strictly forward one byte at a time.

use anyhow::{Result, bail, ensure};

struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    queue: u32,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            queue: 0,
        }
    }

    fn read_byte(&mut self) -> Result<u8> {
        if self.pos >= self.data.len() {
            bail!("intraframe payload truncated");
        }
        let value = self.data[self.pos];
        self.pos += 1;
        Ok(value)
    }

    fn read_u16(&mut self) -> Result<u16> {
        let lo = self.read_byte()?;
        let hi = self.read_byte()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    fn read_bit(&mut self) -> Result<u32> {
        let mut bit = self.queue & 1;
        self.queue >>= 1;
        if self.queue == 0 {
            // Queue exhausted: load 16 fresh bits plus the sentinel.
            self.queue = u32::from(self.read_u16()?) | 0x1_0000;
            bit = self.queue & 1;
            self.queue >>= 1;
        }
        Ok(bit)
    }
}

/// Decompress an intraframe payload into `dst`, returning the number of
/// bytes produced. The caller checks that count against the expected frame
/// size; this routine only guarantees it never writes past `dst`.
pub fn decode(src: &[u8], dst: &mut [u8]) -> Result<usize> {
    let mut reader = BitReader::new(src);
    let mut pos = 0usize;

    loop {
        if reader.read_bit()? == 1 {
            ensure!(pos < dst.len(), "intraframe output exceeds frame buffer");
            dst[pos] = reader.read_byte()?;
            pos += 1;
            continue;
        }

        let (count, offset) = if reader.read_bit()? == 1 {
            let word = reader.read_u16()? as usize;
            let mut count = word & 7;
            let offset = (word >> 3) as isize - 0x2000;
            if count == 0 {
                count = reader.read_byte()? as usize;
                if count == 0 {
                    break;
                }
            }
            (count, offset)
        } else {
            let count = (reader.read_bit()? << 1 | reader.read_bit()?) as usize;
            let offset = reader.read_byte()? as isize - 0x100;
            (count, offset)
        };

        let count = count + 2;
        let from = pos as isize + offset;
        ensure!(from >= 0, "intraframe back-reference before buffer start");
        let mut from = from as usize;
        ensure!(
            pos + count <= dst.len(),
            "intraframe back-reference output exceeds frame buffer"
        );
        for _ in 0..count {
            dst[pos] = dst[from];
            pos += 1;
            from += 1;
        }
    }

    Ok(pos)
}
