//! Retained 256-entry RGB palette updated by sparse range deltas.

use anyhow::{Result, ensure};

pub const PALETTE_SIZE: usize = 256 * 3;

/// Terminates an update stream early; any declared bytes left after it are
/// padding and get skipped.
const END_MARKER: (u8, u8) = (255, 255);

pub struct Palette {
    rgb: [u8; PALETTE_SIZE],
    dirty: bool,
}

impl Palette {
    /// Create a palette, optionally seeded from a caller-supplied 768-byte
    /// RGB buffer used until the first palette chunk arrives.
    pub fn new(initial: Option<&[u8; PALETTE_SIZE]>) -> Self {
        let mut rgb = [0u8; PALETTE_SIZE];
        let dirty = if let Some(seed) = initial {
            rgb.copy_from_slice(seed);
            true
        } else {
            false
        };
        Self { rgb, dirty }
    }

    /// Apply one `PL` chunk payload: a run of (start, count) headers each
    /// followed by `count` 6-bit RGB triples, scaled to 8 bits by multiplying
    /// by 4. A count of 0 means all 256 entries.
    pub fn apply_update(&mut self, data: &[u8]) -> Result<()> {
        let mut pos = 0usize;
        while pos + 2 <= data.len() {
            let start = data[pos] as usize;
            let raw_count = data[pos + 1];
            pos += 2;
            if (start as u8, raw_count) == END_MARKER {
                break;
            }
            let count = if raw_count == 0 {
                256
            } else {
                raw_count as usize
            };
            ensure!(
                start + count <= 256,
                "palette update out of range: start {start}, count {count}"
            );
            ensure!(
                pos + count * 3 <= data.len(),
                "palette update truncated: {} entries declared, {} bytes left",
                count,
                data.len() - pos
            );
            for byte in &mut self.rgb[start * 3..(start + count) * 3] {
                *byte = data[pos] << 2;
                pos += 1;
            }
        }
        self.dirty = true;
        Ok(())
    }

    pub fn rgb(&self) -> &[u8; PALETTE_SIZE] {
        &self.rgb
    }

    /// Consume the dirty flag; the presentation layer must re-apply the
    /// palette whenever this returns true.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}
