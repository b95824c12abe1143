//! Runtime function hot-patching for ARM Cortex-M targets using the Flash Patch
//! and Breakpoint (FPB) unit.
//!
//! This crate allows individual functions in a running firmware image to be
//! redirected to replacement code held in RAM, without reflashing the target.
//! Replacement code is uploaded into a buffer from the block allocator, and
//! one of three independent mechanisms is then used to make the original
//! function jump there.
//!
//! `no_std`.  Requires `alloc` for the async host-side traits.
//!
//! ## Architecture
//!
//! The FPB unit has a small number of hardware comparators, each of which
//! matches a single instruction address in the code region
//! (`0x0000_0000`-`0x1FFF_FFFF`).  A comparator can operate in one of two
//! modes:
//! - **Remap**: the matched instruction fetch is transparently served from a
//!   word in an SRAM remap table.  This crate places a branch instruction in
//!   that word, so execution of the original function jumps to the patch.
//! - **Breakpoint**: the match raises the Debug Monitor exception.  The
//!   exception handler rewrites the stacked program counter so that the
//!   exception returns into the patch.
//!
//! A 32-bit Thumb branch only reaches ±16MB, which is not enough to get from
//! flash to SRAM on most parts.  A set of fixed, flash-resident trampolines
//! provides a near branch target, each jumping indirectly through a single
//! RAM word which can be pointed anywhere.
//!
//! Patch mechanisms are independent.  The caller chooses one per comparator,
//! and must not assign the same comparator to both the remap driver and the
//! Debug Monitor redirector.
//!
//! ## Modules
//!
//! - [`thumb`] - Thumb branch instruction encoder
//! - [`allocator`] - Fixed-block RAM allocator for patch code buffers
//! - [`fpb`] - Comparator driver, installing remap-mode patches
//! - [`trampoline`] - Flash-resident indirect jump stubs
//! - [`debugmon`] - Debug Monitor exception based redirection
//! - [`hw`] - Hardware access trait, with silicon and mock implementations
//! - [`regs`] - FPB and debug register definitions
//! - [`io`] - Async I/O traits for debug interface access, used by hosts to
//!   inspect a target's FPB
//!
//! ## Getting Started
//!
//! **Target setup**:
//! 1. Reserve an SRAM region for patch code and create a
//!    [`allocator::BlockAllocator`] over it
//! 2. Create an [`fpb::Fpb`] with [`hw::SiliconIo`], optionally attaching the
//!    [`trampoline::Trampolines`] so that SRAM patches can be reached
//! 3. Call [`fpb::Fpb::init()`]
//! 4. Allocate a buffer, copy the replacement code into it, and call
//!    [`fpb::Fpb::set_patch()`] with the original function's address
//! 5. Call [`fpb::Fpb::clear_patch()`] to restore the original function
//!
//! Alternatively use [`debugmon::DebugMonitor`], with the Debug Monitor
//! exception routed to [`debugmon::handle_exception()`], on parts where remap
//! is not implemented (for example FPB v2, as found on ARMv8-M).
//!
//! **Host setup**:
//! Implement [`io::Reader`] and [`io::Writer`] for your debug interface and
//! use [`fpb::AsyncFpb`] to read back a target's comparator and remap state.
//!
//! ## Features
//!
//! Default features:
//! - `async` - Enable the async host-side inspection API (requires `alloc`).
//!
//! Compile with `--no-default-features` for a Target.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#![cfg_attr(not(test), no_std)]

#[cfg(feature = "async")]
extern crate alloc;

pub mod allocator;
pub mod debugmon;
pub mod fpb;
pub mod hw;
pub mod io;
pub mod regs;
pub mod thumb;
pub mod trampoline;

/// Number of flash-resident trampolines.
pub const FPB_TRAMPOLINE_COUNT: usize = 6;

/// Capacity of the Debug Monitor redirect table.
pub const FPB_DEBUGMON_MAX_REDIRECTS: usize = 8;

/// Maximum number of code comparators managed by the driver.
pub const FPB_MAX_CODE_COMPS: usize = 8;

/// Maximum number of comparators (code and literal) reported by
/// [`fpb::Fpb::get_info()`].
pub const FPB_MAX_COMPS: usize = 16;

/// Allocator block size in bytes.
pub const FPB_ALLOC_BLOCK_SIZE: usize = 64;

/// Maximum number of blocks the allocator will manage.
pub const FPB_ALLOC_MAX_BLOCKS: usize = 256;

/// Hot-patching errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Operation requires a prior successful init
    NotInit,
    /// Comparator or redirect index out of range
    InvalidComp,
    /// Address outside the region patches are restricted to
    InvalidAddr,
    /// Invalid parameter, such as an output buffer that is too small
    InvalidParam,
    /// Hardware does not support the operation
    NotSupported,
    /// Comparator has no patch recorded
    NoPatch,
    /// I/O error accessing a remote target
    Io,
}

impl Error {
    /// Small integer code for this error, as reported to a command layer.
    /// Success is `0`.
    pub const fn code(self) -> i32 {
        match self {
            Error::NotInit => -1,
            Error::InvalidComp => -2,
            Error::InvalidAddr => -3,
            Error::InvalidParam => -4,
            Error::NotSupported => -5,
            Error::NoPatch => -6,
            Error::Io => -7,
        }
    }
}

/// Type to represent the result of a hot-patching operation
pub type Result<T> = core::result::Result<T, Error>;

/// Start of the SRAM region.  Patches may only be applied below this.
pub const SRAM_BASE: u32 = 0x2000_0000;

/// Thumb execution state bit, set in the low bit of branch targets.
pub const THUMB_BIT: u32 = 1;

/// Whether `addr` lies in the code region the FPB can match.
pub const fn is_code_addr(addr: u32) -> bool {
    addr < SRAM_BASE
}
