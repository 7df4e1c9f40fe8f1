//! HNM4 pixel codec: frame-buffer triple, the three video chunk dialects and
//! the scanline deinterlacer.
//!
//! The codec owns three equally sized buffers. `current` is written by the
//! active decode, `previous` holds the prior frame for back-references, and
//! `display` receives the deinterlaced output. Interframe decodes swap
//! `current` and `previous` before writing; intraframe decodes instead copy
//! the fresh keyframe into `previous` to establish a new baseline.
//!
//! Standard-dialect output is stored with two scanlines byte-interleaved, so
//! a frame is only displayable after the deinterlace pass. Interframe-A
//! frames are stored row-major already and present straight from `current`.

use anyhow::{Result, bail, ensure};

use crate::hlz;

pub struct Hnm4Video {
    width: usize,
    height: usize,
    current: Vec<u8>,
    previous: Vec<u8>,
    display: Vec<u8>,
    present_from_current: bool,
}

impl Hnm4Video {
    pub fn new(width: u16, height: u16, buffer_size: u32) -> Result<Self> {
        let width = width as usize;
        let height = height as usize;
        let buffer_size = buffer_size as usize;
        ensure!(
            width * height <= buffer_size,
            "frame buffer size {buffer_size} too small for {width}x{height}"
        );
        Ok(Self {
            width,
            height,
            current: vec![0; buffer_size],
            previous: vec![0; buffer_size],
            display: vec![0; buffer_size],
            present_from_current: false,
        })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn frame_len(&self) -> usize {
        self.width * self.height
    }

    /// The last presented frame as an 8-bit paletted surface.
    pub fn surface(&self) -> &[u8] {
        let frame = self.frame_len();
        if self.present_from_current {
            &self.current[..frame]
        } else {
            &self.display[..frame]
        }
    }

    /// Decode an `IZ` keyframe. The LZ payload must expand to exactly one
    /// frame; afterwards `previous` is reset to the same baseline since
    /// there is no delta to carry.
    pub fn decode_intraframe(&mut self, payload: &[u8]) -> Result<()> {
        let frame = self.frame_len();
        let written = hlz::decode(payload, &mut self.current[..frame])?;
        ensure!(
            written == frame,
            "intraframe expanded to {written} bytes, expected {frame}"
        );
        self.previous.copy_from_slice(&self.current);
        Ok(())
    }

    /// Decode a standard `IU` chunk. Tokens carry a 5-bit count and 3-bit
    /// flags; each copy iteration emits one pixel pair (two bytes).
    pub fn decode_interframe(&mut self, data: &[u8]) -> Result<()> {
        std::mem::swap(&mut self.current, &mut self.previous);

        let len = self.current.len();
        let line_back = 1 - 2 * self.width as isize;
        let mut input = 0usize;
        let mut pos = 0usize;

        loop {
            let token = take_byte(data, &mut input)?;
            let count = (token & 0x1F) as usize;
            let flags = token >> 5;

            if count == 0 {
                match flags {
                    0 => {
                        ensure!(pos + 2 <= len, "interframe literal outside frame buffer");
                        self.current[pos] = take_byte(data, &mut input)?;
                        self.current[pos + 1] = take_byte(data, &mut input)?;
                        pos += 2;
                    }
                    1 => pos += take_byte(data, &mut input)? as usize * 2,
                    2 => pos += take_u16(data, &mut input)? as usize * 2,
                    3 => {
                        let fill_len = take_byte(data, &mut input)? as usize * 2;
                        let value = take_byte(data, &mut input)?;
                        ensure!(pos + fill_len <= len, "interframe fill outside frame buffer");
                        self.current[pos..pos + fill_len].fill(value);
                        pos += fill_len;
                    }
                    // End of picture; whatever the chunk still declares is
                    // padding and gets skipped by the chunk reader.
                    _ => return Ok(()),
                }
                continue;
            }

            let backward = flags & 0x4 != 0;
            let backline = flags & 0x2 != 0;
            let from_previous = flags & 0x1 != 0;

            let word = take_u16(data, &mut input)? as usize;
            let swap = word & 1 != 0;
            let base = pos as isize + (word & 0xFFFE) as isize - 0x8000;
            ensure!(base >= 0, "interframe back-reference offset is negative");

            // In back-line mode one of the two reads lands a scanline pair
            // above the reference point.
            let (mut shift1, mut shift2) = if backline { (line_back, 0) } else { (0, 1) };
            if swap {
                std::mem::swap(&mut shift1, &mut shift2);
            }

            let mut offset = base;
            for _ in 0..count {
                ensure!(pos + 2 <= len, "interframe copy outside frame buffer");
                let b0 = self.read_reference(from_previous, offset + shift1)?;
                let b1 = self.read_reference(from_previous, offset + shift2)?;
                self.current[pos] = b0;
                self.current[pos + 1] = b1;
                pos += 2;
                offset += if backward { -2 } else { 2 };
            }
        }
    }

    /// Decode an `IU` chunk in the interframe-A dialect used by the
    /// higher-resolution variant: 6-bit count, 2-bit flags, single-byte
    /// granularity writing rows `pos` and `pos + width` together.
    pub fn decode_interframe_a(&mut self, data: &[u8]) -> Result<()> {
        std::mem::swap(&mut self.current, &mut self.previous);

        let width = self.width;
        let len = self.current.len();
        let mut input = 0usize;
        let mut pos = 0usize;

        loop {
            let token = take_byte(data, &mut input)?;
            let count = (token & 0x3F) as usize;
            let flags = token >> 6;

            if count == 0 {
                match flags {
                    0 => pos += take_byte(data, &mut input)? as usize,
                    1 => {
                        ensure!(pos + width < len, "interframe-A write outside frame buffer");
                        self.current[pos] = take_byte(data, &mut input)?;
                        self.current[pos + width] = take_byte(data, &mut input)?;
                        pos += 1;
                    }
                    2 => pos += width,
                    _ => return Ok(()),
                }
                continue;
            }

            let negative = flags & 0x2 != 0;
            let from_previous = flags & 0x1 != 0;

            let mut rel = take_u16(data, &mut input)? as isize;
            if negative {
                rel -= 0x10000;
            }
            let base = pos as isize + rel;
            ensure!(base >= 0, "interframe-A back-reference offset is negative");
            let mut offset = base as usize;

            for _ in 0..count {
                ensure!(
                    pos + width < len && offset + width < len,
                    "interframe-A copy outside frame buffer"
                );
                let (b0, b1) = if from_previous {
                    (self.previous[offset], self.previous[offset + width])
                } else {
                    (self.current[offset], self.current[offset + width])
                };
                self.current[pos] = b0;
                self.current[pos + width] = b1;
                pos += 1;
                offset += 1;
            }
        }
    }

    /// Make the decoded frame displayable. Standard frames go through the
    /// deinterlace pass into `display`; interframe-A frames are already
    /// row-major and present straight from `current`.
    pub fn present(&mut self, interframe_a: bool) -> Result<()> {
        if interframe_a {
            self.present_from_current = true;
            return Ok(());
        }
        self.deinterlace()?;
        self.present_from_current = false;
        Ok(())
    }

    /// Redistribute the byte-interleaved pair packing into row-major order,
    /// two scanlines at a time. The shuffle works on little-endian 32-bit
    /// words; the result is the same on any host.
    fn deinterlace(&mut self) -> Result<()> {
        ensure!(
            self.width % 4 == 0,
            "deinterlace requires width divisible by 4, got {}",
            self.width
        );
        if self.height % 2 != 0 {
            bail!("deinterlace requires an even height, got {}", self.height);
        }

        let width = self.width;
        let mut src = 0usize;
        for pair in 0..self.height / 2 {
            let line0 = pair * 2 * width;
            let line1 = line0 + width;
            for x in (0..width).step_by(4) {
                let in0 = u32::from_le_bytes(self.current[src..src + 4].try_into().unwrap());
                let in1 = u32::from_le_bytes(self.current[src + 4..src + 8].try_into().unwrap());
                src += 8;

                let out0 = (in0 & 0xFF)
                    | ((in0 >> 8) & 0xFF00)
                    | ((in1 & 0xFF) << 16)
                    | (((in1 >> 8) & 0xFF00) << 16);
                let out1 = ((in0 >> 8) & 0xFF)
                    | ((in0 >> 16) & 0xFF00)
                    | (((in1 >> 8) & 0xFF) << 16)
                    | (((in1 >> 16) & 0xFF00) << 16);

                self.display[line0 + x..line0 + x + 4].copy_from_slice(&out0.to_le_bytes());
                self.display[line1 + x..line1 + x + 4].copy_from_slice(&out1.to_le_bytes());
            }
        }
        Ok(())
    }

    fn read_reference(&self, from_previous: bool, index: isize) -> Result<u8> {
        ensure!(
            index >= 0 && (index as usize) < self.current.len(),
            "interframe back-reference outside frame buffer"
        );
        let index = index as usize;
        Ok(if from_previous {
            self.previous[index]
        } else {
            self.current[index]
        })
    }
}

fn take_byte(data: &[u8], pos: &mut usize) -> Result<u8> {
    if *pos >= data.len() {
        bail!("video chunk truncated");
    }
    let value = data[*pos];
    *pos += 1;
    Ok(value)
}

fn take_u16(data: &[u8], pos: &mut usize) -> Result<u16> {
    let lo = take_byte(data, pos)?;
    let hi = take_byte(data, pos)?;
    Ok(u16::from_le_bytes([lo, hi]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const END: u8 = 0x80; // count 0, flags 4: end of picture
    const END_A: u8 = 0xC0; // interframe-A sentinel

    fn video(width: u16, height: u16) -> Hnm4Video {
        let size = u32::from(width) * u32::from(height) * 2;
        Hnm4Video::new(width, height, size).expect("video state")
    }

    #[test]
    fn intraframe_resets_previous_to_keyframe() {
        // 16 literal bits from a full 0xFFFF queue word, then the long-branch
        // terminator from the next word.
        let mut payload = 0xFFFFu16.to_le_bytes().to_vec();
        payload.extend_from_slice(&[
            1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16,
        ]);
        payload.extend_from_slice(&0x0002u16.to_le_bytes());
        payload.extend_from_slice(&[0x00, 0x00, 0x00]);

        let mut video = video(4, 4);
        video.previous.fill(0xEE);
        video.decode_intraframe(&payload).expect("decode");
        assert_eq!(&video.current[..16], &(1..=16).collect::<Vec<u8>>()[..]);
        assert_eq!(video.previous, video.current);
    }

    #[test]
    fn intraframe_rejects_wrong_expansion() {
        // Four literals for a 16-byte frame.
        let mut payload = 0x002Fu16.to_le_bytes().to_vec();
        payload.extend_from_slice(&[1, 2, 3, 4]);
        payload.extend_from_slice(&[0x00, 0x00, 0x00]);

        let mut video = video(4, 4);
        assert!(video.decode_intraframe(&payload).is_err());
    }

    #[test]
    fn interframe_literal_skip_and_fill() {
        let mut video = video(4, 4);
        let payload = [
            0x00, 0xAA, 0xBB, // literal pair
            0x20, 0x01, // skip 2 bytes
            0x60, 0x02, 0xCC, // fill 4 bytes with 0xCC
            END,
        ];
        video.decode_interframe(&payload).expect("decode");
        assert_eq!(&video.current[..8], &[0xAA, 0xBB, 0, 0, 0xCC, 0xCC, 0xCC, 0xCC]);
    }

    #[test]
    fn interframe_copies_from_previous() {
        let mut video = video(4, 4);
        // The buffer that becomes `previous` after the swap.
        for (i, byte) in video.current.iter_mut().enumerate() {
            *byte = i as u8 + 0x40;
        }
        // count 2, previous flag; offset word 0x8000 resolves to offset 0.
        let payload = [0x22, 0x00, 0x80, END];
        video.decode_interframe(&payload).expect("decode");
        assert_eq!(&video.current[..4], &[0x40, 0x41, 0x42, 0x43]);
    }

    #[test]
    fn interframe_backward_copy() {
        let mut video = video(4, 4);
        for (i, byte) in video.current.iter_mut().enumerate() {
            *byte = i as u8;
        }
        // count 2, previous + backward flags; start at offset 4, step -2.
        let payload = [0xA2, 0x04, 0x80, END];
        video.decode_interframe(&payload).expect("decode");
        assert_eq!(&video.current[..4], &[4, 5, 2, 3]);
    }

    #[test]
    fn interframe_backline_reads_line_pair_above() {
        let mut video = video(4, 4);
        // Becomes the buffer under construction after the swap, so in-frame
        // reads observe this stale pattern.
        for (i, byte) in video.previous.iter_mut().enumerate() {
            *byte = i as u8;
        }
        // Skip to pos 16, then count 1 with the back-line flag and a
        // reference offset of 8: shifts are (-7, 0), reading bytes 1 and 8.
        let payload = [0x20, 0x08, 0x41, 0xF8, 0x7F, END];
        video.decode_interframe(&payload).expect("decode");
        assert_eq!(&video.current[16..18], &[1, 8]);
    }

    #[test]
    fn interframe_swap_bit_exchanges_shifts() {
        let mut video = video(4, 4);
        for (i, byte) in video.previous.iter_mut().enumerate() {
            *byte = i as u8;
        }
        // Same as above but offset bit 0 set: the shift pair is swapped.
        let payload = [0x20, 0x08, 0x41, 0xF9, 0x7F, END];
        video.decode_interframe(&payload).expect("decode");
        assert_eq!(&video.current[16..18], &[8, 1]);
    }

    #[test]
    fn interframe_rejects_negative_offset() {
        let mut video = video(4, 4);
        // count 1 at pos 0 with offset word 0: 0 - 0x8000 is negative.
        let payload = [0x21, 0x00, 0x00, END];
        assert!(video.decode_interframe(&payload).is_err());
    }

    #[test]
    fn interframe_sentinel_skips_trailing_bytes() {
        let mut video = video(4, 4);
        let payload = [0x00, 0x01, 0x02, END, 0xDE, 0xAD, 0xBE, 0xEF];
        video.decode_interframe(&payload).expect("decode");
        assert_eq!(&video.current[..2], &[0x01, 0x02]);
    }

    #[test]
    fn interframe_a_new_pixels_and_copy() {
        let mut video = video(4, 4);
        for (i, byte) in video.previous.iter_mut().enumerate() {
            *byte = (i * 3) as u8;
        }
        let payload = [
            0x40, 0x11, 0x22, // current[0] = 0x11, current[width] = 0x22
            0x80, // new line: pos += width (1 -> 5)
            0x82, 0xFC, 0xFF, // count 2, negative flag: offset = 5 - 4 = 1
            END_A,
        ];
        video.decode_interframe_a(&payload).expect("decode");
        assert_eq!(video.current[0], 0x11);
        assert_eq!(video.current[4], 0x22);
        // In-frame copy of the stale pattern: reads happen before writes.
        assert_eq!(video.current[5], 3);
        assert_eq!(video.current[9], 15);
        assert_eq!(video.current[6], 6);
        assert_eq!(video.current[10], 18);
    }

    #[test]
    fn interframe_a_skip_and_sentinel() {
        let mut video = video(4, 4);
        let payload = [0x00, 0x03, 0x40, 0x77, 0x99, END_A, 0xFF];
        video.decode_interframe_a(&payload).expect("decode");
        assert_eq!(video.current[3], 0x77);
        assert_eq!(video.current[7], 0x99);
    }

    #[test]
    fn interframe_a_rejects_negative_offset() {
        let mut video = video(4, 4);
        let payload = [0x82, 0xFC, 0xFF, END_A];
        assert!(video.decode_interframe_a(&payload).is_err());
    }

    #[test]
    fn deinterlace_maps_pair_bytes_to_adjacent_lines() {
        let mut video = video(4, 2);
        video.current[..8].copy_from_slice(&[b'A', b'B', b'C', b'D', b'E', b'F', b'G', b'H']);
        video.present(false).expect("present");
        assert_eq!(video.surface(), b"ACEGBDFH");
    }

    #[test]
    fn deinterlace_matches_bytewise_reference() {
        let mut video = video(8, 4);
        for (i, byte) in video.current.iter_mut().enumerate() {
            *byte = (i as u8).wrapping_mul(37).wrapping_add(11);
        }
        let input = video.current.clone();
        video.present(false).expect("present");

        let width = 8usize;
        let mut expected = vec![0u8; 32];
        for pair in 0..2 {
            for x in 0..width {
                expected[pair * 2 * width + x] = input[pair * 2 * width + 2 * x];
                expected[pair * 2 * width + width + x] = input[pair * 2 * width + 2 * x + 1];
            }
        }
        assert_eq!(video.surface(), &expected[..]);
    }

    #[test]
    fn interframe_a_presents_current_buffer() {
        let mut video = video(4, 2);
        let payload = [0x40, 0x5A, 0xA5, END_A];
        video.decode_interframe_a(&payload).expect("decode");
        video.present(true).expect("present");
        assert_eq!(video.surface()[0], 0x5A);
        assert_eq!(video.surface()[4], 0xA5);
    }

    #[test]
    fn deinterlace_rejects_unaligned_width() {
        let mut video = Hnm4Video::new(6, 2, 24).expect("video state");
        assert!(video.present(false).is_err());
    }
}
