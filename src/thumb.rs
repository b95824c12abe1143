//! Thumb branch instruction encoder.
//!
//! Produces the shortest unconditional branch from one instruction address to
//! another:
//! - `B` (encoding T2), 2 bytes, reaching -2048 to +2046 bytes
//! - `B.W` (encoding T4), 4 bytes, reaching ±16MB
//!
//! Offsets are relative to the branch address plus 4, as the Thumb PC reads
//! two halfwords ahead of the executing instruction.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use crate::{Error, Result, THUMB_BIT};

const B_T2: u16 = 0xE000;
const B_T4_HI: u16 = 0xF000;
const B_T4_LO: u16 = 0x9000;

/// Thumb `NOP`, used to pad a 16-bit branch to a full remap word.
pub const NOP: u16 = 0xBF00;

const SHORT_MIN: i32 = -2048;
const SHORT_MAX: i32 = 2046;
const LONG_MIN: i32 = -(1 << 24);
const LONG_MAX: i32 = (1 << 24) - 2;

/// An encoded branch instruction, 2 or 4 bytes long, in memory order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbJump {
    bytes: [u8; 4],
    len: usize,
}

impl ThumbJump {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_short(&self) -> bool {
        self.len == 2
    }

    /// First halfword
    pub fn hw0(&self) -> u16 {
        u16::from_le_bytes([self.bytes[0], self.bytes[1]])
    }

    /// Second halfword, if a 32-bit encoding
    pub fn hw1(&self) -> Option<u16> {
        if self.is_short() {
            None
        } else {
            Some(u16::from_le_bytes([self.bytes[2], self.bytes[3]]))
        }
    }

    /// The branch as a little-endian word, as it would be fetched from a
    /// word-aligned address.  A 16-bit branch is followed by a `NOP`.
    pub fn as_word(&self) -> u32 {
        let hi = self.hw1().unwrap_or(NOP);
        ((hi as u32) << 16) | self.hw0() as u32
    }

    fn short(hw: u16) -> Self {
        let [b0, b1] = hw.to_le_bytes();
        Self {
            bytes: [b0, b1, 0, 0],
            len: 2,
        }
    }

    fn long(hw0: u16, hw1: u16) -> Self {
        let [b0, b1] = hw0.to_le_bytes();
        let [b2, b3] = hw1.to_le_bytes();
        Self {
            bytes: [b0, b1, b2, b3],
            len: 4,
        }
    }
}

/// Branch offset from an instruction at `from` to `to`, with the Thumb bits
/// ignored.
pub fn branch_offset(from: u32, to: u32) -> i32 {
    ((to & !THUMB_BIT).wrapping_sub(from & !THUMB_BIT).wrapping_sub(4)) as i32
}

/// Whether a branch at `from` can reach `to` with a single instruction.
pub fn branch_reachable(from: u32, to: u32) -> bool {
    (LONG_MIN..=LONG_MAX).contains(&branch_offset(from, to))
}

/// Encode an unconditional branch placed at `from` and jumping to `to`.
///
/// Offsets outside the ±16MB reach of `B.W` are truncated; use
/// [`branch_reachable()`] first where that is possible.
pub fn generate_jump(from: u32, to: u32) -> ThumbJump {
    let offset = branch_offset(from, to);

    if (SHORT_MIN..=SHORT_MAX).contains(&offset) {
        let imm11 = ((offset >> 1) & 0x7FF) as u16;
        return ThumbJump::short(B_T2 | imm11);
    }

    let s = ((offset >> 24) & 1) as u16;
    let imm10 = ((offset >> 12) & 0x3FF) as u16;
    let imm11 = ((offset >> 1) & 0x7FF) as u16;
    let j1 = ((!(offset >> 23) as u16) ^ s) & 1;
    let j2 = ((!(offset >> 22) as u16) ^ s) & 1;

    let hw0 = B_T4_HI | (s << 10) | imm10;
    let hw1 = B_T4_LO | (j1 << 13) | (j2 << 11) | imm11;
    ThumbJump::long(hw0, hw1)
}

/// Encode a branch into a caller-provided buffer, returning the number of
/// bytes written.
///
/// Fails with [`Error::InvalidParam`] if `out` is too small for the encoding.
pub fn generate_jump_into(from: u32, to: u32, out: &mut [u8]) -> Result<usize> {
    let jump = generate_jump(from, to);
    let bytes = jump.as_bytes();
    if out.len() < bytes.len() {
        return Err(Error::InvalidParam);
    }
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(bytes.len())
}
