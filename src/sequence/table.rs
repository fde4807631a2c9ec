//! Packed colour table of a sequence.
//!
//! Each row has 16 squares, each square is 4 bits per channel and two squares
//! share three bytes:
//!
//! ```text
//! byte 3k     byte 3k+1   byte 3k+2
//! R0 | G0     B0 | R1     G1 | B1
//! ```

use crate::error::{NodeError, Result};
use rgb::RGB8;
use std::time::Duration;

pub const SQUARES_PER_ROW: usize = 16;
pub const MAX_ROWS: u8 = 16;
pub const BYTES_PER_ROW: usize = SQUARES_PER_ROW * 3 / 2;
/// 16 rows of 16 squares at 1.5 bytes per square.
pub const TABLE_BYTES: usize = MAX_ROWS as usize * BYTES_PER_ROW;

/// One square, 4 bits per channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rgb4 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb4 {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self {
            r: r & 0x0F,
            g: g & 0x0F,
            b: b & 0x0F,
        }
    }

    /// Scale each channel by 16 (`0xF` becomes `0xF0`).
    pub fn to_rgb8(self) -> RGB8 {
        RGB8::new(self.r << 4, self.g << 4, self.b << 4)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct SequenceTable {
    rhythm: u8,
    rows: u8,
    colors: [u8; TABLE_BYTES],
}

impl std::fmt::Debug for SequenceTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceTable")
            .field("rhythm", &self.rhythm)
            .field("rows", &self.rows)
            .finish_non_exhaustive()
    }
}

impl SequenceTable {
    /// Check a header and colour payload length. The payload is either exactly
    /// `rows * 24` bytes or the full zero-padded 384-byte buffer.
    pub fn validate(rhythm: u8, rows: u8, color_len: usize) -> Result<()> {
        if rhythm == 0 || rows == 0 || rows > MAX_ROWS {
            return Err(NodeError::InvalidArg);
        }
        if color_len != rows as usize * BYTES_PER_ROW && color_len != TABLE_BYTES {
            return Err(NodeError::InvalidArg);
        }
        Ok(())
    }

    pub fn new(rhythm: u8, rows: u8, colors: &[u8]) -> Result<Self> {
        Self::validate(rhythm, rows, colors.len())?;
        let used = rows as usize * BYTES_PER_ROW;
        let mut buf = [0u8; TABLE_BYTES];
        buf[..used].copy_from_slice(&colors[..used]);
        Ok(Self {
            rhythm,
            rows,
            colors: buf,
        })
    }

    pub fn rhythm(&self) -> u8 {
        self.rhythm
    }

    pub fn rows(&self) -> u8 {
        self.rows
    }

    /// Number of squares; the playback pointer wraps here.
    pub fn len(&self) -> usize {
        self.rows as usize * SQUARES_PER_ROW
    }

    /// Dwell time per square.
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.rhythm as u64 * 10)
    }

    /// Packed bytes actually used by the rows.
    pub fn packed(&self) -> &[u8] {
        &self.colors[..self.rows as usize * BYTES_PER_ROW]
    }

    pub fn square(&self, index: usize) -> Option<Rgb4> {
        if index >= self.len() {
            return None;
        }
        Some(unpack(&self.colors, index))
    }
}

/// Read square `index` out of a packed buffer that is long enough to hold it.
pub fn unpack(packed: &[u8], index: usize) -> Rgb4 {
    let base = (index / 2) * 3;
    if index % 2 == 0 {
        Rgb4::new(packed[base] >> 4, packed[base] & 0x0F, packed[base + 1] >> 4)
    } else {
        Rgb4::new(packed[base + 1] & 0x0F, packed[base + 2] >> 4, packed[base + 2] & 0x0F)
    }
}

/// Pack squares into the three-bytes-per-pair layout. An odd trailing square
/// leaves the low nibble of its second byte and the whole third byte zero.
pub fn pack(squares: &[Rgb4]) -> Vec<u8> {
    let mut out = vec![0u8; squares.len().div_ceil(2) * 3];
    for (i, sq) in squares.iter().enumerate() {
        let base = (i / 2) * 3;
        if i % 2 == 0 {
            out[base] = (sq.r << 4) | sq.g;
            out[base + 1] |= sq.b << 4;
        } else {
            out[base + 1] |= sq.r;
            out[base + 2] = (sq.g << 4) | sq.b;
        }
    }
    out
}
