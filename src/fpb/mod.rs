//! Flash Patch and Breakpoint comparator driver.
//!
//! [`Fpb`] installs remap-mode patches on the target.  Each code comparator
//! matches one word in the code region, and has a corresponding word in the
//! SRAM remap table, at index equal to the comparator number.  When the
//! comparator matches, the instruction fetch is served from the remap table
//! instead, which holds a branch to the patch.
//!
//! [`AsyncFpb`] reads back FPB state from a target over a debug interface,
//! typically on a host.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "async")]
pub mod futures;
pub mod sync;

#[cfg(feature = "async")]
pub use futures::{AsyncFpb, AsyncFpbIo, ReaderWriterFpbIo};
pub use sync::Fpb;

use crate::regs::{CompMode, FpComp, FpCompV2, FpCtrl, FpRemap, FpbRevision};
use crate::{Error, FPB_MAX_CODE_COMPS, FPB_MAX_COMPS, Result, is_code_addr};

/// Configuration for the remap table location.
/// - `Hardware`: Use the table location already programmed in FP_REMAP
/// - `Direct`: Relocate the table to the given SRAM address, which must be
///   32-byte aligned and have room for one word per comparator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FpbConfig {
    #[default]
    Hardware,
    Direct {
        /// SRAM address of the remap table
        remap_base: u32,
    },
}

/// Driver view of a single code comparator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompSlot {
    /// Comparator enabled in hardware
    pub enabled: bool,
    /// Address being intercepted
    pub original_addr: u32,
    /// Patch the original address branches to.  0 for instruction patches.
    pub patch_addr: u32,
    /// Comparator register value, as last written
    pub raw: u32,
    /// Word placed in the remap table
    pub remap_word: u32,
    installed: bool,
    trampoline: Option<usize>,
}

impl CompSlot {
    /// Whether a patch is recorded in this slot, enabled or not
    pub fn is_installed(&self) -> bool {
        self.installed
    }

    /// Trampoline used to reach the patch, if any
    pub fn trampoline(&self) -> Option<usize> {
        self.trampoline
    }
}

/// Driver state, as returned by [`Fpb::get_state()`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FpbState {
    pub initialized: bool,
    pub revision: FpbRevision,
    /// Number of code comparators managed, capped at [`FPB_MAX_CODE_COMPS`]
    pub num_code: usize,
    pub num_lit: usize,
    /// SRAM remap table location, if remap is supported
    pub remap_base: Option<u32>,
    pub comps: [CompSlot; FPB_MAX_CODE_COMPS],
}

impl FpbState {
    pub const fn new() -> Self {
        Self {
            initialized: false,
            revision: FpbRevision::V1,
            num_code: 0,
            num_lit: 0,
            remap_base: None,
            comps: [CompSlot {
                enabled: false,
                original_addr: 0,
                patch_addr: 0,
                raw: 0,
                remap_word: 0,
                installed: false,
                trampoline: None,
            }; FPB_MAX_CODE_COMPS],
        }
    }
}

impl Default for FpbState {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoded comparator register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompInfo {
    /// Raw register value
    pub raw: u32,
    pub enabled: bool,
    /// Matched address
    pub address: u32,
    pub mode: CompMode,
    /// Literal address comparator, rather than code
    pub literal: bool,
}

impl CompInfo {
    const EMPTY: CompInfo = CompInfo {
        raw: 0,
        enabled: false,
        address: 0,
        mode: CompMode::Remap,
        literal: false,
    };

    pub fn decode(revision: FpbRevision, raw: u32, literal: bool) -> Self {
        match revision {
            FpbRevision::V2 => {
                let reg = FpCompV2::from(raw);
                Self {
                    raw,
                    enabled: reg.enable(),
                    address: reg.address(),
                    mode: CompMode::Breakpoint,
                    literal,
                }
            }
            _ => {
                let reg = FpComp::from(raw);
                let mode = if literal {
                    CompMode::Remap
                } else {
                    reg.mode()
                };
                Self {
                    raw,
                    enabled: reg.enable(),
                    address: reg.address(),
                    mode,
                    literal,
                }
            }
        }
    }
}

/// FPB hardware description and comparator state, as returned by
/// [`Fpb::get_info()`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FpbInfo {
    pub num_total: usize,
    pub num_code: usize,
    pub num_lit: usize,
    /// FP_CTRL.ENABLE
    pub enabled: bool,
    pub revision: FpbRevision,
    /// FP_REMAP.RMPSPT
    pub remap_supported: bool,
    /// Remap table address from FP_REMAP
    pub remap_base: u32,
    comps: [CompInfo; FPB_MAX_COMPS],
    comp_count: usize,
}

impl FpbInfo {
    /// Decode register values.  `comps` holds the raw comparator registers,
    /// code comparators first.  Comparators beyond [`FPB_MAX_COMPS`] are not
    /// reported.
    pub fn from_registers(ctrl: FpCtrl, remap: FpRemap, comps: &[u32]) -> Self {
        let revision = ctrl.revision();
        let num_code = ctrl.num_code() as usize;
        let mut info = Self {
            num_total: ctrl.num_total() as usize,
            num_code,
            num_lit: ctrl.num_lit() as usize,
            enabled: ctrl.enable(),
            revision,
            remap_supported: remap.rmpspt(),
            remap_base: remap.base(),
            comps: [CompInfo::EMPTY; FPB_MAX_COMPS],
            comp_count: 0,
        };
        for (ii, raw) in comps.iter().take(FPB_MAX_COMPS).enumerate() {
            info.comps[ii] = CompInfo::decode(revision, *raw, ii >= num_code);
            info.comp_count += 1;
        }
        info
    }

    /// Per-comparator state
    pub fn comps(&self) -> &[CompInfo] {
        &self.comps[..self.comp_count]
    }
}

// Helper functions

/// Address of remap table entry `comp`.  One word per comparator.
pub(crate) const fn remap_entry_addr(base: u32, comp: usize) -> u32 {
    base + (comp as u32) * 4
}

pub(crate) fn check_code_addr(addr: u32) -> Result<()> {
    if is_code_addr(addr) {
        Ok(())
    } else {
        Err(Error::InvalidAddr)
    }
}

pub(crate) fn num_reported(ctrl: FpCtrl) -> usize {
    (ctrl.num_total() as usize).min(FPB_MAX_COMPS)
}
