//! Bitmap font file codec.
//!
//! Bit-exact parser for the binary font format the display paint path
//! consumes. The file is fixed-layout little endian:
//!
//! | Offset | Size  | Field |
//! |-------:|------:|-------|
//! | 0      | 4     | magic `0xf0bdf11e` |
//! | 4      | 32    | SHA-256 of the whole file with this field zeroed |
//! | 36     | 16    | raw width/height, net width/height (4 x u32) |
//! | 52     | 4     | extra glyph count |
//! | 56     | 17408 | 256 basic glyphs |
//! | 17464  | 8704  | 128 extra glyph slots |
//!
//! Each glyph is 68 bytes: a u32 codepoint followed by 32 u16 row bitmasks.
//! Basic glyphs are indexed directly by codepoint; extra glyphs are searched
//! linearly.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// File magic word.
pub const FONT_MAGIC: u32 = 0xf0bd_f11e;

/// Basic glyphs, indexed directly by codepoint.
pub const BASIC_GLYPHS: usize = 256;

/// Extra glyph slots, searched linearly.
pub const EXTRA_GLYPHS: usize = 128;

/// Rows per glyph.
pub const GLYPH_ROWS: usize = 32;

/// Serialized glyph size: codepoint + 32 row masks.
pub const GLYPH_SIZE: usize = 4 + GLYPH_ROWS * 2;

const CHECKSUM_OFFSET: usize = 4;
const BASIC_OFFSET: usize = 56;
const EXTRA_OFFSET: usize = BASIC_OFFSET + BASIC_GLYPHS * GLYPH_SIZE;
const FILE_SIZE: usize = EXTRA_OFFSET + EXTRA_GLYPHS * GLYPH_SIZE;

/// Font file rejection reasons.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FontError {
    /// File shorter or longer than the fixed layout.
    #[error("font file size {0} != {FILE_SIZE}")]
    BadSize(usize),

    /// Magic word mismatch.
    #[error("bad font magic {0:#010x}")]
    BadMagic(u32),

    /// Whole-file checksum mismatch.
    #[error("font checksum mismatch")]
    ChecksumMismatch,
}

/// One decoded glyph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Glyph {
    /// Unicode codepoint this glyph renders.
    pub codepoint: u32,
    /// One bitmask per row, LSB leftmost.
    pub rows: [u16; GLYPH_ROWS],
}

/// A parsed font: dimensions plus the two glyph regions.
#[derive(Debug, Clone)]
pub struct Font {
    /// Cell width as stored in the file.
    pub raw_width: u32,
    /// Cell height as stored in the file.
    pub raw_height: u32,
    /// Visible width after trimming.
    pub net_width: u32,
    /// Visible height after trimming.
    pub net_height: u32,
    basic: Vec<Glyph>,
    extra: Vec<Glyph>,
}

impl Font {
    /// Parse and verify a font file.
    pub fn parse(bytes: &[u8]) -> Result<Self, FontError> {
        if bytes.len() != FILE_SIZE {
            return Err(FontError::BadSize(bytes.len()));
        }

        let magic = read_u32(bytes, 0);
        if magic != FONT_MAGIC {
            return Err(FontError::BadMagic(magic));
        }

        let mut zeroed = bytes.to_vec();
        zeroed[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 32].fill(0);
        let digest = Sha256::digest(&zeroed);
        if digest.as_slice() != &bytes[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 32] {
            return Err(FontError::ChecksumMismatch);
        }

        let raw_width = read_u32(bytes, 36);
        let raw_height = read_u32(bytes, 40);
        let net_width = read_u32(bytes, 44);
        let net_height = read_u32(bytes, 48);
        let extra_count = (read_u32(bytes, 52) as usize).min(EXTRA_GLYPHS);

        let basic =
            (0..BASIC_GLYPHS).map(|i| read_glyph(bytes, BASIC_OFFSET + i * GLYPH_SIZE)).collect();
        let extra =
            (0..extra_count).map(|i| read_glyph(bytes, EXTRA_OFFSET + i * GLYPH_SIZE)).collect();

        Ok(Self { raw_width, raw_height, net_width, net_height, basic, extra })
    }

    /// Look up the glyph for a codepoint: direct index under 256, linear
    /// search through the extra region above.
    #[must_use]
    pub fn glyph(&self, codepoint: u32) -> Option<&Glyph> {
        if (codepoint as usize) < BASIC_GLYPHS {
            return self.basic.get(codepoint as usize);
        }
        self.extra.iter().find(|g| g.codepoint == codepoint)
    }

    /// Number of populated extra glyphs.
    #[must_use]
    pub fn extra_count(&self) -> usize {
        self.extra.len()
    }

    /// Serialize a font file from glyph data; computes the checksum. Used by
    /// tests and host-side tooling.
    #[must_use]
    pub fn build_file(
        dimensions: (u32, u32, u32, u32),
        basic: &[Glyph],
        extra: &[Glyph],
    ) -> Vec<u8> {
        let mut bytes = vec![0u8; FILE_SIZE];
        bytes[0..4].copy_from_slice(&FONT_MAGIC.to_le_bytes());
        bytes[36..40].copy_from_slice(&dimensions.0.to_le_bytes());
        bytes[40..44].copy_from_slice(&dimensions.1.to_le_bytes());
        bytes[44..48].copy_from_slice(&dimensions.2.to_le_bytes());
        bytes[48..52].copy_from_slice(&(extra.len() as u32).to_le_bytes());

        for (i, glyph) in basic.iter().take(BASIC_GLYPHS).enumerate() {
            write_glyph(&mut bytes, BASIC_OFFSET + i * GLYPH_SIZE, glyph);
        }
        for (i, glyph) in extra.iter().take(EXTRA_GLYPHS).enumerate() {
            write_glyph(&mut bytes, EXTRA_OFFSET + i * GLYPH_SIZE, glyph);
        }

        let digest = Sha256::digest(&bytes);
        bytes[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 32].copy_from_slice(&digest);
        bytes
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn read_glyph(bytes: &[u8], offset: usize) -> Glyph {
    let codepoint = read_u32(bytes, offset);
    let mut rows = [0u16; GLYPH_ROWS];
    for (i, row) in rows.iter_mut().enumerate() {
        let at = offset + 4 + i * 2;
        *row = u16::from_le_bytes([bytes[at], bytes[at + 1]]);
    }
    Glyph { codepoint, rows }
}

fn write_glyph(bytes: &mut [u8], offset: usize, glyph: &Glyph) {
    bytes[offset..offset + 4].copy_from_slice(&glyph.codepoint.to_le_bytes());
    for (i, row) in glyph.rows.iter().enumerate() {
        let at = offset + 4 + i * 2;
        bytes[at..at + 2].copy_from_slice(&row.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_font() -> Vec<u8> {
        let mut basic = vec![Glyph { codepoint: 0, rows: [0; GLYPH_ROWS] }; BASIC_GLYPHS];
        basic[b'A' as usize] =
            Glyph { codepoint: u32::from(b'A'), rows: [0x0ff0; GLYPH_ROWS] };

        let extra = vec![Glyph { codepoint: 0x20ac, rows: [0x1234; GLYPH_ROWS] }];

        Font::build_file((16, 32, 12, 26), &basic, &extra)
    }

    #[test]
    fn layout_constants() {
        assert_eq!(GLYPH_SIZE, 68);
        assert_eq!(BASIC_OFFSET, 56);
        assert_eq!(EXTRA_OFFSET, 17464);
    }

    #[test]
    fn parse_round_trip() {
        let font = Font::parse(&sample_font()).expect("parse");

        assert_eq!(font.raw_width, 16);
        assert_eq!(font.raw_height, 32);
        assert_eq!(font.net_width, 12);
        assert_eq!(font.net_height, 26);
        assert_eq!(font.extra_count(), 1);
    }

    #[test]
    fn basic_glyph_indexed_by_codepoint() {
        let font = Font::parse(&sample_font()).expect("parse");
        let glyph = font.glyph(u32::from(b'A')).expect("glyph A");
        assert_eq!(glyph.rows[0], 0x0ff0);
    }

    #[test]
    fn extra_glyph_found_linearly() {
        let font = Font::parse(&sample_font()).expect("parse");
        let glyph = font.glyph(0x20ac).expect("euro sign");
        assert_eq!(glyph.rows[7], 0x1234);
        assert!(font.glyph(0x1f600).is_none());
    }

    #[test]
    fn corrupted_file_rejected() {
        let mut bytes = sample_font();
        bytes[100] ^= 1;
        assert!(matches!(Font::parse(&bytes), Err(FontError::ChecksumMismatch)));
    }

    #[test]
    fn wrong_magic_rejected() {
        let mut bytes = sample_font();
        bytes[0] = 0;
        assert!(matches!(Font::parse(&bytes), Err(FontError::BadMagic(_))));
    }

    #[test]
    fn wrong_size_rejected() {
        assert!(matches!(Font::parse(&[0u8; 100]), Err(FontError::BadSize(100))));
    }
}
