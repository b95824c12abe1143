//! Debug Monitor exception based redirection.
//!
//! An alternative to remap patching.  Comparators are configured in
//! breakpoint mode, so that executing a patched address raises the Debug
//! Monitor exception.  The exception handler looks up the stacked PC in a
//! [`RedirectTable`] and, if found, rewrites the stacked PC so that the
//! exception returns into the patch.
//!
//! This works on FPB v2 hardware, which has no remap support, and for patches
//! anywhere in the address space, at the cost of an exception per call.
//!
//! The redirect table is written by [`DebugMonitor`] in thread context, and
//! read by [`handle_exception()`] in exception context, which may preempt a
//! write at any point.  Each entry is two atomic words, the address and the
//! target.  Updates are ordered so that the handler either sees a complete
//! entry or no entry:
//! - set: retract the address, write the target, publish the address
//! - clear: retract the address, then clear the target
//!
//! The comparator for an entry is only enabled while the entry is present.
//!
//! Firmware routes the exception to [`handle_exception()`], passing the
//! stacked exception frame:
//!
//! ```rust,ignore
//! static REDIRECTS: RedirectTable = RedirectTable::new();
//!
//! #[unsafe(no_mangle)]
//! extern "C" fn debug_monitor_rust(sp: *mut u32) {
//!     let frame = unsafe { ExceptionFrame::from_ptr(sp) };
//!     handle_exception(&mut SiliconIo::new(), &REDIRECTS, frame);
//! }
//! ```

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::sync::atomic::{AtomicU32, Ordering};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::hw::FpbIo;
use crate::regs::{Demcr, Dfsr, FpComp, FpCompV2, FpCtrl, FpbRevision};
use crate::{Error, FPB_DEBUGMON_MAX_REDIRECTS, Result, THUMB_BIT};

// xPSR execution state bit
const XPSR_T: u32 = 1 << 24;

/// Registers stacked by the processor on exception entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExceptionFrame {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    /// Return address
    pub pc: u32,
    pub xpsr: u32,
}

impl ExceptionFrame {
    /// View the frame at a stack pointer.
    ///
    /// # Safety
    /// `sp` must point to a basic exception frame stacked by the processor,
    /// which remains valid for the lifetime `'a`.
    pub unsafe fn from_ptr<'a>(sp: *mut u32) -> &'a mut ExceptionFrame {
        unsafe { &mut *(sp as *mut ExceptionFrame) }
    }
}

// Low bit of a stored address marks the entry present.  Real addresses are
// stored with the Thumb bit stripped, so they never have it set.
const PRESENT: u32 = 1;

struct RedirectEntry {
    original: AtomicU32,
    target: AtomicU32,
}

/// Table of original address to patch address mappings, shared between
/// thread and exception context.
pub struct RedirectTable {
    entries: [RedirectEntry; FPB_DEBUGMON_MAX_REDIRECTS],
}

impl RedirectTable {
    // We need a new() rather than a default() as it must be const.
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            entries: [const {
                RedirectEntry {
                    original: AtomicU32::new(0),
                    target: AtomicU32::new(0),
                }
            }; FPB_DEBUGMON_MAX_REDIRECTS],
        }
    }

    /// Look up `addr`, with or without the Thumb bit.  Returns the target
    /// with the Thumb bit set, or 0 if there is no entry.
    pub fn lookup(&self, addr: u32) -> u32 {
        let key = (addr & !THUMB_BIT) | PRESENT;
        for entry in &self.entries {
            if entry.original.load(Ordering::Acquire) == key {
                let target = entry.target.load(Ordering::Acquire);
                if target != 0 {
                    return target;
                }
            }
        }
        0
    }

    /// Entry `n` as `(original, target)`, if present.
    pub fn entry(&self, n: usize) -> Option<(u32, u32)> {
        let entry = self.entries.get(n)?;
        let original = entry.original.load(Ordering::Acquire);
        if original & PRESENT == 0 {
            return None;
        }
        Some((original & !PRESENT, entry.target.load(Ordering::Acquire)))
    }

    pub fn is_set(&self, n: usize) -> bool {
        self.entry(n).is_some()
    }

    /// Number of entries present
    pub fn count(&self) -> usize {
        (0..FPB_DEBUGMON_MAX_REDIRECTS)
            .filter(|n| self.is_set(*n))
            .count()
    }

    fn set(&self, n: usize, original: u32, target: u32) {
        let entry = &self.entries[n];
        entry.original.store(0, Ordering::Release);
        entry.target.store(target | THUMB_BIT, Ordering::Release);
        entry
            .original
            .store((original & !THUMB_BIT) | PRESENT, Ordering::Release);
    }

    fn clear(&self, n: usize) {
        let entry = &self.entries[n];
        entry.original.store(0, Ordering::Release);
        entry.target.store(0, Ordering::Release);
    }
}

/// Redirect the exception return if the exception was caused by a
/// breakpoint at an address in `table`.
///
/// Must be called from the Debug Monitor exception handler.  Returns whether
/// the frame was redirected.  The frame is untouched if DFSR does not report
/// a breakpoint, for example on a watchpoint, or if the stacked PC has no
/// entry.
pub fn handle_exception<I: FpbIo>(io: &mut I, table: &RedirectTable, frame: &mut ExceptionFrame) -> bool {
    let dfsr: Dfsr = io.read_reg();
    if !dfsr.is_bkpt() {
        return false;
    }

    let target = table.lookup(frame.pc);
    if target == 0 {
        return false;
    }

    // ARMv7-M exception return with bit 0 of the stacked PC set is
    // UNPREDICTABLE.  Thumb state comes from xPSR.T instead.
    frame.pc = target & !THUMB_BIT;
    frame.xpsr |= XPSR_T;

    // Write-one-to-clear
    io.write_reg(Dfsr::BKPT);
    true
}

/// Redirector state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Uninitialized,
    Active,
}

/// Debug Monitor redirector.  Owns the writing side of a [`RedirectTable`].
///
/// Do not use the same comparators from a [`crate::fpb::Fpb`].
pub struct DebugMonitor<'r, I: FpbIo> {
    io: I,
    table: &'r RedirectTable,
    state: MonitorState,
    revision: FpbRevision,
    num_code: usize,
}

impl<'r, I: FpbIo> DebugMonitor<'r, I> {
    /// Create a new redirector.
    ///
    /// Arguments:
    /// - `io` - Object implementing [`FpbIo`] to access the registers
    /// - `table` - Redirect table, also passed to [`handle_exception()`]
    pub fn new(io: I, table: &'r RedirectTable) -> Self {
        Self {
            io,
            table,
            state: MonitorState::Uninitialized,
            revision: FpbRevision::V1,
            num_code: 0,
        }
    }

    /// Enable the Debug Monitor exception and the FPB.
    ///
    /// Fails with [`Error::NotSupported`] if the hardware reports no
    /// comparators.  Calling this again once active has no effect.
    pub fn init(&mut self) -> Result<()> {
        if self.state == MonitorState::Active {
            debug!("Debug monitor already active");
            return Ok(());
        }

        let ctrl = self.io.read_ctrl();
        if ctrl.num_total() == 0 {
            warn!("FPB reports no comparators");
            return Err(Error::NotSupported);
        }
        self.revision = ctrl.revision();
        self.num_code = ctrl.num_code() as usize;

        let demcr: Demcr = self.io.read_reg();
        self.io.write_reg(demcr | Demcr::MON_EN);
        if !ctrl.enable() {
            self.io.write_ctrl(FpCtrl::control(true));
        }
        self.io.barrier();

        self.state = MonitorState::Active;
        debug!(
            "Debug monitor active: {:?} {} code comparators",
            self.revision, self.num_code
        );
        Ok(())
    }

    /// Remove every redirect and disable the Debug Monitor exception.  The
    /// FPB itself is left enabled, as remap patches may be using it.
    pub fn deinit(&mut self) {
        for n in 0..FPB_DEBUGMON_MAX_REDIRECTS {
            if self.table.is_set(n) {
                self.io.write_comp(n, 0);
                self.io.barrier();
                self.table.clear(n);
            }
        }

        let demcr: Demcr = self.io.read_reg();
        self.io.write_reg(demcr - Demcr::MON_EN);
        self.io.barrier();

        self.state = MonitorState::Uninitialized;
        debug!("Debug monitor deinitialized");
    }

    /// Redirect execution of `original_addr` to `target_addr` using
    /// comparator `comp` in breakpoint mode.
    ///
    /// Replaces any existing redirect on `comp`.
    pub fn set_redirect(&mut self, comp: usize, original_addr: u32, target_addr: u32) -> Result<()> {
        if self.state != MonitorState::Active {
            return Err(Error::NotInit);
        }
        if comp >= FPB_DEBUGMON_MAX_REDIRECTS || comp >= self.num_code {
            warn!("Debug monitor comp {comp} out of range");
            return Err(Error::InvalidComp);
        }

        let original = original_addr & !THUMB_BIT;
        let reg: u32 = match self.revision {
            FpbRevision::V2 => FpCompV2::breakpoint_configuration(original).into(),
            _ => FpComp::breakpoint_configuration(original)?.into(),
        };

        // Never leave an enabled comparator without its entry
        self.io.write_comp(comp, 0);
        self.io.barrier();
        self.table.set(comp, original, target_addr);
        self.io.write_comp(comp, reg);
        self.io.barrier();

        debug!(
            "Debug monitor comp {comp}: {original:#010X} -> {:#010X}",
            target_addr | THUMB_BIT
        );
        Ok(())
    }

    /// Remove the redirect on comparator `comp`.  Succeeds if there is none.
    pub fn clear_redirect(&mut self, comp: usize) -> Result<()> {
        if comp >= FPB_DEBUGMON_MAX_REDIRECTS {
            return Err(Error::InvalidComp);
        }
        if !self.table.is_set(comp) {
            return Ok(());
        }

        self.io.write_comp(comp, 0);
        self.io.barrier();
        self.table.clear(comp);

        debug!("Debug monitor comp {comp} cleared");
        Ok(())
    }

    /// Target for `addr`, with the Thumb bit set, or 0 if there is none.
    /// `addr` may or may not have the Thumb bit set.
    pub fn get_redirect(&self, addr: u32) -> u32 {
        self.table.lookup(addr)
    }

    /// Handle a Debug Monitor exception.  See [`handle_exception()`].
    pub fn handler(&mut self, frame: &mut ExceptionFrame) -> bool {
        handle_exception(&mut self.io, self.table, frame)
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Number of redirects set
    pub fn count(&self) -> usize {
        self.table.count()
    }

    /// Access the underlying I/O
    pub fn io(&self) -> &I {
        &self.io
    }

    /// Access the underlying I/O mutably
    pub fn io_mut(&mut self) -> &mut I {
        &mut self.io
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::MockIo;

    fn monitor(table: &RedirectTable) -> DebugMonitor<'_, MockIo> {
        let mut mon = DebugMonitor::new(MockIo::new(6, 2), table);
        mon.init().unwrap();
        mon
    }

    fn frame_at(pc: u32) -> ExceptionFrame {
        ExceptionFrame {
            pc,
            xpsr: XPSR_T,
            ..Default::default()
        }
    }

    #[test]
    fn init_enables_monitor() {
        let table = RedirectTable::new();
        let mut mon = monitor(&table);
        assert_eq!(mon.state(), MonitorState::Active);
        assert_ne!(mon.io().demcr() & Demcr::MON_EN.bits(), 0);
        assert!(mon.io().fpb_enabled());

        assert_eq!(mon.init(), Ok(()));
        assert_eq!(mon.state(), MonitorState::Active);
    }

    #[test]
    fn init_requires_comparators() {
        let table = RedirectTable::new();
        let mut mon = DebugMonitor::new(MockIo::new(0, 0), &table);
        assert_eq!(mon.init(), Err(Error::NotSupported));
        assert_eq!(mon.state(), MonitorState::Uninitialized);
        assert_eq!(mon.io().demcr(), 0);
    }

    #[test]
    fn set_requires_active() {
        let table = RedirectTable::new();
        let mut mon = DebugMonitor::new(MockIo::new(6, 2), &table);
        assert_eq!(mon.set_redirect(0, 0x0800_1000, 0x2000_2000), Err(Error::NotInit));
    }

    #[test]
    fn set_and_lookup() {
        let table = RedirectTable::new();
        let mut mon = monitor(&table);

        mon.set_redirect(0, 0x0800_1001, 0x2000_2000).unwrap();
        assert_eq!(mon.get_redirect(0x0800_1000), 0x2000_2001);
        assert_eq!(mon.get_redirect(0x0800_1001), 0x2000_2001);
        assert_eq!(mon.get_redirect(0x0800_1004), 0);
        assert_eq!(table.entry(0), Some((0x0800_1000, 0x2000_2001)));

        // Breakpoint mode, lower halfword
        assert_eq!(mon.io().comp(0), 0x4800_1001);
    }

    #[test]
    fn comp_range() {
        let table = RedirectTable::new();
        let mut mon = monitor(&table);
        assert_eq!(
            mon.set_redirect(FPB_DEBUGMON_MAX_REDIRECTS, 0x0800_1000, 0x2000_2000),
            Err(Error::InvalidComp)
        );
        // Beyond the 6 code comparators present
        assert_eq!(mon.set_redirect(6, 0x0800_1000, 0x2000_2000), Err(Error::InvalidComp));
        assert_eq!(mon.clear_redirect(FPB_DEBUGMON_MAX_REDIRECTS), Err(Error::InvalidComp));
        assert_eq!(mon.set_redirect(0, 0x2000_1000, 0x2000_2000), Err(Error::InvalidAddr));
    }

    #[test]
    fn replace_same_comp() {
        let table = RedirectTable::new();
        let mut mon = monitor(&table);

        mon.set_redirect(1, 0x0800_1000, 0x2000_2000).unwrap();
        assert_eq!(mon.count(), 1);
        mon.set_redirect(1, 0x0800_1102, 0x2000_3000).unwrap();
        assert_eq!(mon.count(), 1);

        assert_eq!(mon.get_redirect(0x0800_1000), 0);
        assert_eq!(mon.get_redirect(0x0800_1102), 0x2000_3001);
        // Upper halfword breakpoint
        assert_eq!(mon.io().comp(1), 0x8800_1101);
    }

    #[test]
    fn clear() {
        let table = RedirectTable::new();
        let mut mon = monitor(&table);

        assert_eq!(mon.clear_redirect(2), Ok(()));

        mon.set_redirect(2, 0x0800_1000, 0x2000_2000).unwrap();
        mon.clear_redirect(2).unwrap();
        assert_eq!(mon.get_redirect(0x0800_1000), 0);
        assert_eq!(mon.io().comp(2), 0);
        assert_eq!(mon.count(), 0);

        assert_eq!(mon.clear_redirect(2), Ok(()));
    }

    #[test]
    fn handler_redirects_breakpoint() {
        let table = RedirectTable::new();
        let mut mon = monitor(&table);
        mon.set_redirect(0, 0x0800_1000, 0x2000_2000).unwrap();

        mon.io_mut().set_dfsr(Dfsr::BKPT);
        let mut frame = frame_at(0x0800_1000);
        assert!(mon.handler(&mut frame));
        assert_eq!(frame.pc, 0x2000_2000);
        assert_eq!(frame.xpsr & XPSR_T, XPSR_T);
        assert!(!mon.io().dfsr().is_bkpt());
    }

    #[test]
    fn handler_ignores_other_events() {
        let table = RedirectTable::new();
        let mut mon = monitor(&table);
        mon.set_redirect(0, 0x0800_1000, 0x2000_2000).unwrap();

        // Watchpoint, not a breakpoint
        mon.io_mut().set_dfsr(Dfsr::DWTTRAP);
        let mut frame = frame_at(0x0800_1000);
        let before = frame;
        assert!(!mon.handler(&mut frame));
        assert_eq!(frame, before);

        // Breakpoint, but not one of ours
        mon.io_mut().set_dfsr(Dfsr::BKPT);
        let mut frame = frame_at(0x0800_2000);
        let before = frame;
        assert!(!mon.handler(&mut frame));
        assert_eq!(frame, before);
    }

    #[test]
    fn deinit_clears() {
        let table = RedirectTable::new();
        let mut mon = monitor(&table);
        mon.set_redirect(0, 0x0800_1000, 0x2000_2000).unwrap();
        mon.set_redirect(3, 0x0800_3000, 0x2000_3000).unwrap();
        mon.io_mut().poke(crate::regs::fp_comp_addr(4), 0x0800_4001);

        mon.deinit();
        assert_eq!(mon.state(), MonitorState::Uninitialized);
        assert_eq!(mon.count(), 0);
        assert_eq!(mon.io().comp(0), 0);
        assert_eq!(mon.io().comp(3), 0);
        // Not ours
        assert_eq!(mon.io().comp(4), 0x0800_4001);
        assert_eq!(mon.io().demcr() & Demcr::MON_EN.bits(), 0);
        assert_eq!(mon.set_redirect(0, 0x0800_1000, 0x2000_2000), Err(Error::NotInit));

        mon.deinit();
    }

    #[test]
    fn v2_breakpoints_anywhere() {
        let table = RedirectTable::new();
        let mut mon = DebugMonitor::new(MockIo::new_v2(8), &table);
        mon.init().unwrap();
        mon.set_redirect(7, 0x2000_0101, 0x2000_4000).unwrap();
        assert_eq!(mon.io().comp(7), 0x2000_0101);
        assert_eq!(mon.get_redirect(0x2000_0100), 0x2000_4001);
    }
}
