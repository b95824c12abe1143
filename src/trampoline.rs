//! Flash-resident trampolines.
//!
//! A remap table branch can only reach ±16MB, which does not get from flash to
//! SRAM.  Each trampoline is a small stub, linked into flash alongside the
//! firmware, which jumps indirectly through a single RAM word:
//!
//! ```text
//! __fpb_trampoline_n:
//!     ldr.w ip, =FPB_TRAMPOLINE_TARGETS
//!     ldr.w pc, [ip, #4*n]
//! ```
//!
//! The stubs are immutable.  Only the target words change, so a trampoline can
//! be retargeted with a single word write, without touching the FPB.
//!
//! The stubs are only emitted when building for a bare-metal ARM target.  On
//! other targets use [`Trampolines::new()`] with simulated stub addresses.
//!
//! Out-of-range indices are silently ignored by [`Trampolines::set_target()`]
//! and [`Trampolines::clear_target()`].  This is intentional: these may be
//! called from contexts with nowhere to report an error.  Changing them to
//! return a result changes every call site.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::sync::atomic::{AtomicU32, Ordering};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{FPB_TRAMPOLINE_COUNT, THUMB_BIT};

/// RAM target words, one per trampoline.  Referenced by name from the stubs.
#[unsafe(no_mangle)]
pub static FPB_TRAMPOLINE_TARGETS: [AtomicU32; FPB_TRAMPOLINE_COUNT] =
    [const { AtomicU32::new(0) }; FPB_TRAMPOLINE_COUNT];

#[cfg(all(target_arch = "arm", target_os = "none"))]
core::arch::global_asm!(
    ".section .text.fpb_trampolines,\"ax\",%progbits",
    ".syntax unified",
    ".thumb",
    ".p2align 2",
    ".global __fpb_trampoline_0",
    ".thumb_func",
    "__fpb_trampoline_0:",
    "    ldr.w ip, =FPB_TRAMPOLINE_TARGETS",
    "    ldr.w pc, [ip, #0]",
    ".global __fpb_trampoline_1",
    ".thumb_func",
    "__fpb_trampoline_1:",
    "    ldr.w ip, =FPB_TRAMPOLINE_TARGETS",
    "    ldr.w pc, [ip, #4]",
    ".global __fpb_trampoline_2",
    ".thumb_func",
    "__fpb_trampoline_2:",
    "    ldr.w ip, =FPB_TRAMPOLINE_TARGETS",
    "    ldr.w pc, [ip, #8]",
    ".global __fpb_trampoline_3",
    ".thumb_func",
    "__fpb_trampoline_3:",
    "    ldr.w ip, =FPB_TRAMPOLINE_TARGETS",
    "    ldr.w pc, [ip, #12]",
    ".global __fpb_trampoline_4",
    ".thumb_func",
    "__fpb_trampoline_4:",
    "    ldr.w ip, =FPB_TRAMPOLINE_TARGETS",
    "    ldr.w pc, [ip, #16]",
    ".global __fpb_trampoline_5",
    ".thumb_func",
    "__fpb_trampoline_5:",
    "    ldr.w ip, =FPB_TRAMPOLINE_TARGETS",
    "    ldr.w pc, [ip, #20]",
    ".ltorg",
);

#[cfg(all(target_arch = "arm", target_os = "none"))]
unsafe extern "C" {
    fn __fpb_trampoline_0();
    fn __fpb_trampoline_1();
    fn __fpb_trampoline_2();
    fn __fpb_trampoline_3();
    fn __fpb_trampoline_4();
    fn __fpb_trampoline_5();
}

/// Table of trampoline stubs and their target words.
pub struct Trampolines<'a> {
    stubs: [u32; FPB_TRAMPOLINE_COUNT],
    targets: &'a [AtomicU32; FPB_TRAMPOLINE_COUNT],
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
impl Trampolines<'static> {
    /// The trampolines linked into this firmware image.
    pub fn linked() -> Self {
        let stubs = [
            __fpb_trampoline_0 as usize as u32,
            __fpb_trampoline_1 as usize as u32,
            __fpb_trampoline_2 as usize as u32,
            __fpb_trampoline_3 as usize as u32,
            __fpb_trampoline_4 as usize as u32,
            __fpb_trampoline_5 as usize as u32,
        ];
        Self::new(stubs, &FPB_TRAMPOLINE_TARGETS)
    }
}

impl<'a> Trampolines<'a> {
    /// Create a table from stub entry addresses and their target words.
    ///
    /// Arguments:
    /// - `stubs` - Entry address of each stub.  The Thumb bit is forced on.
    /// - `targets` - The RAM word each stub jumps through
    pub fn new(
        stubs: [u32; FPB_TRAMPOLINE_COUNT],
        targets: &'a [AtomicU32; FPB_TRAMPOLINE_COUNT],
    ) -> Self {
        Self {
            stubs: stubs.map(|addr| addr | THUMB_BIT),
            targets,
        }
    }

    /// Number of trampolines
    pub const fn count(&self) -> usize {
        FPB_TRAMPOLINE_COUNT
    }

    /// Entry address of trampoline `n`, Thumb bit set, or 0 if `n` is out
    /// of range.
    pub fn get_address(&self, n: usize) -> u32 {
        self.stubs.get(n).copied().unwrap_or(0)
    }

    /// Point trampoline `n` at `addr`.  The Thumb bit is forced on.
    pub fn set_target(&self, n: usize, addr: u32) {
        if let Some(target) = self.targets.get(n) {
            target.store(addr | THUMB_BIT, Ordering::Release);
            trace!("Trampoline {n} -> {:#010X}", addr | THUMB_BIT);
        }
    }

    /// Clear trampoline `n`'s target.
    pub fn clear_target(&self, n: usize) {
        if let Some(target) = self.targets.get(n) {
            target.store(0, Ordering::Release);
            trace!("Trampoline {n} cleared");
        }
    }

    /// Current target of trampoline `n`.  Returns 0 both when unset and
    /// when `n` is out of range.
    pub fn get_target(&self, n: usize) -> u32 {
        self.targets
            .get(n)
            .map(|target| target.load(Ordering::Acquire))
            .unwrap_or(0)
    }
}
