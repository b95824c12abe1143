//! Synchronous comparator driver - used by a Target.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::fpb::{CompSlot, FpbConfig, FpbInfo, FpbState};
use crate::fpb::{check_code_addr, num_reported, remap_entry_addr};
use crate::hw::FpbIo;
use crate::regs::{FpComp, FpCtrl, FpRemap, FpbRevision};
use crate::thumb;
use crate::trampoline::Trampolines;
use crate::{Error, FPB_MAX_CODE_COMPS, FPB_MAX_COMPS, Result, THUMB_BIT};

/// FPB remap patch driver.
///
/// Owns the FPB control register, the code comparators and the SRAM remap
/// table.  Do not use the same comparators from a
/// [`crate::debugmon::DebugMonitor`].
pub struct Fpb<'t, I: FpbIo> {
    io: I,
    config: FpbConfig,
    trampolines: Option<&'t Trampolines<'t>>,
    state: FpbState,
}

impl<'t, I: FpbIo> Fpb<'t, I> {
    /// Create a new driver, using the remap table location already
    /// programmed into the hardware.
    ///
    /// Arguments:
    /// - `io` - Object implementing [`FpbIo`] to access the registers
    pub fn new(io: I) -> Self {
        Self::with_config(io, FpbConfig::Hardware)
    }

    /// Create a new driver with an explicit configuration.
    pub fn with_config(io: I, config: FpbConfig) -> Self {
        Self {
            io,
            config,
            trampolines: None,
            state: FpbState::new(),
        }
    }

    /// Attach trampolines, used to reach patches beyond the range of a
    /// direct branch.  Comparator `n` uses trampoline `n`.
    pub fn with_trampolines(mut self, trampolines: &'t Trampolines<'t>) -> Self {
        self.trampolines = Some(trampolines);
        self
    }

    /// Initialize the driver and enable the FPB.
    ///
    /// All code comparators and remap table entries are cleared.  Calling
    /// this again once initialized has no effect.
    ///
    /// Fails with [`Error::NotSupported`] if the hardware reports no
    /// comparators, or if a relocated remap table was requested on hardware
    /// which doesn't support it.
    pub fn init(&mut self) -> Result<()> {
        if self.state.initialized {
            debug!("FPB already initialized");
            return Ok(());
        }

        let ctrl = self.io.read_ctrl();
        if ctrl.num_total() == 0 {
            warn!("FPB reports no comparators");
            return Err(Error::NotSupported);
        }

        let mut num_code = ctrl.num_code() as usize;
        if num_code > FPB_MAX_CODE_COMPS {
            warn!("FPB has {num_code} code comparators, using {FPB_MAX_CODE_COMPS}");
            num_code = FPB_MAX_CODE_COMPS;
        }
        let revision = ctrl.revision();
        let remap_base = self.configure_remap(revision)?;

        for comp in 0..num_code {
            self.io.write_comp(comp, 0);
            if let Some(base) = remap_base {
                self.io.write_u32(remap_entry_addr(base, comp), 0);
            }
        }

        self.io.write_ctrl(FpCtrl::control(true));
        self.io.barrier();

        self.state = FpbState {
            initialized: true,
            revision,
            num_code,
            num_lit: ctrl.num_lit() as usize,
            remap_base,
            ..FpbState::new()
        };

        debug!(
            "FPB initialized: {:?} {} code {} literal, remap table {:?}",
            revision,
            num_code,
            self.state.num_lit,
            remap_base
        );
        Ok(())
    }

    /// Disable the FPB and clear every code comparator and remap table entry.
    ///
    /// Safe to call whether or not the driver is initialized.
    pub fn deinit(&mut self) {
        let (num_code, remap_base) = if self.state.initialized {
            (self.state.num_code, self.state.remap_base)
        } else {
            // Another instance may have left patches behind
            let ctrl = self.io.read_ctrl();
            let remap = self.io.read_remap();
            let base = (ctrl.revision() == FpbRevision::V1 && remap.rmpspt()).then(|| remap.base());
            ((ctrl.num_code() as usize).min(FPB_MAX_CODE_COMPS), base)
        };

        for comp in 0..num_code {
            self.io.write_comp(comp, 0);
            if let Some(base) = remap_base {
                self.io.write_u32(remap_entry_addr(base, comp), 0);
            }
            self.release_trampoline(comp);
        }

        self.io.write_ctrl(FpCtrl::control(false));
        self.io.barrier();
        self.state = FpbState::new();

        debug!("FPB deinitialized");
    }

    /// Redirect execution of `original_addr` to `patch_addr`.
    ///
    /// A branch to the patch is placed in remap table entry `comp`, and
    /// comparator `comp` is set to remap `original_addr`.  If the patch is
    /// out of reach of a direct branch, trampoline `comp` is used.
    ///
    /// Arguments:
    /// - `comp` - Code comparator to use
    /// - `original_addr` - Address of the function to patch, in the code
    ///   region.  The Thumb bit is ignored.
    /// - `patch_addr` - Address of the replacement function
    ///
    /// Patches in SRAM are out of reach of a direct branch from flash, so
    /// need trampolines attached with [`Self::with_trampolines()`].  Without
    /// them this fails with [`Error::InvalidAddr`].
    pub fn set_patch(&mut self, comp: usize, original_addr: u32, patch_addr: u32) -> Result<()> {
        self.check_comp(comp)?;
        check_code_addr(original_addr)?;
        let base = self.remap_base()?;

        let from = original_addr & !THUMB_BIT;
        let (dest, trampoline) = self.branch_destination(comp, from, patch_addr)?;
        let word = self.remap_word(from, dest)?;

        let retarget = trampoline.map(|n| (n, patch_addr));
        let raw = self.install(comp, base, from, word, retarget)?;

        let previous = self.state.comps[comp].trampoline;
        if previous.is_some() && previous != trampoline {
            self.release_trampoline(comp);
        }

        self.state.comps[comp] = CompSlot {
            enabled: true,
            original_addr,
            patch_addr,
            raw,
            remap_word: word,
            installed: true,
            trampoline,
        };

        debug!(
            "FPB comp {comp}: {original_addr:#010X} -> {patch_addr:#010X} (remap {word:#010X}{})",
            if trampoline.is_some() {
                ", via trampoline"
            } else {
                ""
            }
        );
        Ok(())
    }

    /// Replace the word containing `addr` with `instruction`.
    ///
    /// The instruction word is placed in remap table entry `comp` as-is, and
    /// is fetched in place of the original word at `addr & !3`.
    pub fn set_instruction_patch(&mut self, comp: usize, addr: u32, instruction: u32) -> Result<()> {
        self.check_comp(comp)?;
        check_code_addr(addr)?;
        let base = self.remap_base()?;

        let raw = self.install(comp, base, addr & !0x3, instruction, None)?;
        self.release_trampoline(comp);

        self.state.comps[comp] = CompSlot {
            enabled: true,
            original_addr: addr,
            patch_addr: 0,
            raw,
            remap_word: instruction,
            installed: true,
            trampoline: None,
        };

        debug!("FPB comp {comp}: {addr:#010X} instruction {instruction:#010X}");
        Ok(())
    }

    /// Remove the patch on comparator `comp`.  Succeeds if there is none.
    pub fn clear_patch(&mut self, comp: usize) -> Result<()> {
        self.check_comp(comp)?;

        self.io.write_comp(comp, 0);
        if let Some(base) = self.state.remap_base {
            self.io.write_u32(remap_entry_addr(base, comp), 0);
        }
        self.io.barrier();
        self.release_trampoline(comp);
        self.state.comps[comp] = CompSlot::default();

        debug!("FPB comp {comp} cleared");
        Ok(())
    }

    /// Enable or disable comparator `comp` without changing its patch.
    ///
    /// Fails with [`Error::NoPatch`] if enabling a comparator with nothing
    /// installed.
    pub fn enable_comp(&mut self, comp: usize, enable: bool) -> Result<()> {
        self.check_comp(comp)?;

        let slot = self.state.comps[comp];
        if !slot.installed {
            if enable {
                warn!("FPB comp {comp} has no patch to enable");
                return Err(Error::NoPatch);
            }
            return Ok(());
        }

        let mut reg = FpComp::from(slot.raw);
        reg.set_enable(enable);
        self.io.write_comp(comp, reg.into());
        self.io.barrier();

        let slot = &mut self.state.comps[comp];
        slot.raw = reg.into();
        slot.enabled = enable;

        debug!("FPB comp {comp} enable {enable}");
        Ok(())
    }

    /// Driver state
    pub fn get_state(&self) -> &FpbState {
        &self.state
    }

    /// Read the hardware description and comparator registers.  Does not
    /// require the driver to be initialized.
    pub fn get_info(&mut self) -> FpbInfo {
        let ctrl = self.io.read_ctrl();
        let remap = self.io.read_remap();
        let mut comps = [0u32; FPB_MAX_COMPS];
        let count = num_reported(ctrl);
        for (ii, comp) in comps.iter_mut().take(count).enumerate() {
            *comp = self.io.read_comp(ii);
        }
        FpbInfo::from_registers(ctrl, remap, &comps[..count])
    }

    /// Encode a branch from `from` to `to` into `out`, returning its length.
    ///
    /// Fails with [`Error::InvalidParam`] if `out` is too small.
    pub fn generate_thumb_jump(&self, from: u32, to: u32, out: &mut [u8]) -> Result<usize> {
        thumb::generate_jump_into(from, to, out)
    }

    /// Access the underlying I/O
    pub fn io(&self) -> &I {
        &self.io
    }

    /// Access the underlying I/O mutably
    pub fn io_mut(&mut self) -> &mut I {
        &mut self.io
    }

    /// Consume the driver, returning the I/O object.  Does not deinit.
    pub fn release(self) -> I {
        self.io
    }
}

// Internal functions
impl<I: FpbIo> Fpb<'_, I> {
    fn configure_remap(&mut self, revision: FpbRevision) -> Result<Option<u32>> {
        if revision != FpbRevision::V1 {
            debug!("FPB {revision:?} does not support remap");
            if let FpbConfig::Direct { .. } = self.config {
                return Err(Error::NotSupported);
            }
            return Ok(None);
        }

        let remap = self.io.read_remap();
        match self.config {
            FpbConfig::Hardware => {
                if remap.rmpspt() {
                    Ok(Some(remap.base()))
                } else {
                    debug!("FPB remap not implemented");
                    Ok(None)
                }
            }
            FpbConfig::Direct { remap_base } => {
                if !remap.rmpspt() {
                    warn!("FPB remap not implemented, cannot relocate table");
                    return Err(Error::NotSupported);
                }
                self.io.write_remap(FpRemap::with_base(remap_base)?);
                Ok(Some(remap_base))
            }
        }
    }

    fn check_comp(&self, comp: usize) -> Result<()> {
        if !self.state.initialized {
            return Err(Error::NotInit);
        }
        if comp >= self.state.num_code {
            warn!("FPB comp {comp} out of range");
            return Err(Error::InvalidComp);
        }
        Ok(())
    }

    fn remap_base(&self) -> Result<u32> {
        self.state.remap_base.ok_or(Error::NotSupported)
    }

    // Choose what the remap branch jumps to - the patch itself, or a
    // trampoline which then jumps to the patch.
    fn branch_destination(&self, comp: usize, from: u32, patch_addr: u32) -> Result<(u32, Option<usize>)> {
        if thumb::branch_reachable(from, patch_addr) {
            return Ok((patch_addr, None));
        }

        let Some(trampolines) = self.trampolines else {
            warn!("FPB patch {patch_addr:#010X} out of reach of {from:#010X}, no trampolines");
            return Err(Error::InvalidAddr);
        };
        let stub = trampolines.get_address(comp);
        if stub == 0 || !thumb::branch_reachable(from, stub) {
            warn!("FPB patch {patch_addr:#010X} out of reach of {from:#010X}, no usable trampoline");
            return Err(Error::InvalidAddr);
        }
        Ok((stub, Some(comp)))
    }

    // Build the remap table word for a branch at `from`.  The remap table
    // replaces a whole aligned word, so a branch at a halfword offset keeps
    // the original first halfword and must fit in the second.
    fn remap_word(&mut self, from: u32, dest: u32) -> Result<u32> {
        let jump = thumb::generate_jump(from, dest);
        if from & 0x2 == 0 {
            return Ok(jump.as_word());
        }
        if !jump.is_short() {
            warn!("FPB branch at {from:#010X} crosses a word boundary");
            return Err(Error::InvalidAddr);
        }
        let original = self.io.read_u32(from & !0x3);
        Ok((original & 0xFFFF) | ((jump.hw0() as u32) << 16))
    }

    // Write the remap entry, then point the comparator at it.  A comparator
    // already enabled is disabled first, so that neither a half-updated entry
    // nor a retargeted trampoline is reached from the old original address.
    fn install(
        &mut self,
        comp: usize,
        base: u32,
        addr: u32,
        word: u32,
        retarget: Option<(usize, u32)>,
    ) -> Result<u32> {
        let reg = FpComp::remap_configuration(addr)?;

        if self.state.comps[comp].enabled {
            self.io.write_comp(comp, 0);
            self.io.barrier();
        }
        if let (Some((n, target)), Some(trampolines)) = (retarget, self.trampolines) {
            trampolines.set_target(n, target);
        }
        self.io.write_u32(remap_entry_addr(base, comp), word);
        self.io.write_comp(comp, reg.into());
        self.io.barrier();

        Ok(reg.into())
    }

    fn release_trampoline(&mut self, comp: usize) {
        let used = self.state.comps[comp].trampoline.take();
        if let (Some(n), Some(trampolines)) = (used, self.trampolines) {
            trampolines.clear_target(n);
        }
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::FPB_TRAMPOLINE_COUNT;
    use crate::hw::MockIo;
    use crate::hw::mock::MOCK_REMAP_BASE;
    use crate::regs::{CompMode, fp_comp_addr};

    const STUBS: [u32; FPB_TRAMPOLINE_COUNT] = [
        0x0800_F000,
        0x0800_F00C,
        0x0800_F018,
        0x0800_F024,
        0x0800_F030,
        0x0800_F03C,
    ];

    fn fpb(num_code: u32, num_lit: u32) -> Fpb<'static, MockIo> {
        let mut fpb = Fpb::new(MockIo::new(num_code, num_lit));
        fpb.init().unwrap();
        fpb
    }

    #[test]
    fn init_requires_comparators() {
        let mut fpb = Fpb::new(MockIo::new(0, 0));
        assert_eq!(fpb.init(), Err(Error::NotSupported));
        assert!(!fpb.get_state().initialized);
    }

    #[test]
    fn init_idempotent() {
        let mut fpb = fpb(6, 2);
        let state = fpb.get_state().clone();
        assert!(fpb.io().fpb_enabled());
        assert_eq!(state.num_code, 6);
        assert_eq!(state.num_lit, 2);
        assert_eq!(state.remap_base, Some(MOCK_REMAP_BASE));

        assert_eq!(fpb.init(), Ok(()));
        assert_eq!(fpb.get_state(), &state);
    }

    #[test]
    fn requires_init() {
        let mut fpb = Fpb::new(MockIo::new(6, 2));
        assert_eq!(fpb.set_patch(0, 0x0800_1000, 0x0800_2000), Err(Error::NotInit));
        assert_eq!(fpb.set_instruction_patch(0, 0x0800_1000, 0xBF00_BF00), Err(Error::NotInit));
        assert_eq!(fpb.clear_patch(0), Err(Error::NotInit));
        assert_eq!(fpb.enable_comp(0, true), Err(Error::NotInit));
    }

    #[test]
    fn validates_comp_and_addr() {
        let mut fpb = fpb(6, 2);
        assert_eq!(fpb.set_patch(6, 0x0800_1000, 0x0800_2000), Err(Error::InvalidComp));
        assert_eq!(fpb.set_patch(0, 0x2000_0000, 0x0800_2000), Err(Error::InvalidAddr));
        assert_eq!(fpb.set_patch(0, 0x2000_1000, 0x0800_2000), Err(Error::InvalidAddr));
        assert_eq!(fpb.set_instruction_patch(0, 0x2000_0000, 0), Err(Error::InvalidAddr));
        assert_eq!(fpb.set_instruction_patch(7, 0x0800_0000, 0), Err(Error::InvalidComp));
    }

    #[test]
    fn direct_patch() {
        let mut fpb = fpb(6, 2);
        fpb.set_patch(0, 0x0800_1000, 0x0800_2001).unwrap();

        let jump = thumb::generate_jump(0x0800_1000, 0x0800_2000);
        assert_eq!(fpb.io().remap_entry(0), jump.as_word());
        assert_eq!(fpb.io().comp(0), 0x0800_1001);

        let slot = fpb.get_state().comps[0];
        assert!(slot.enabled);
        assert_eq!(slot.original_addr, 0x0800_1000);
        assert_eq!(slot.patch_addr, 0x0800_2001);
        assert_eq!(slot.trampoline(), None);
    }

    #[test]
    fn remap_entries_isolated() {
        for (code, lit) in [(6, 2), (8, 0)] {
            let mut fpb = fpb(code, lit);
            fpb.set_patch(0, 0x0800_1000, 0x0800_3000).unwrap();
            let entry0 = fpb.io().remap_entry(0);
            fpb.set_patch(1, 0x0800_1100, 0x0800_3100).unwrap();
            assert_eq!(fpb.io().remap_entry(0), entry0);

            for comp in 0..code as usize {
                fpb.set_patch(comp, 0x0800_1000 + 0x100 * comp as u32, 0x0800_4000)
                    .unwrap();
            }
            fpb.clear_patch(2).unwrap();
            for comp in 0..code as usize {
                let set = fpb.get_state().comps[comp].is_installed();
                assert_eq!(fpb.io().remap_entry(comp) != 0, set, "comp {comp}");
                assert_eq!(set, comp != 2);
            }
        }
    }

    #[test]
    fn set_and_clear_every_comp() {
        let mut fpb = fpb(6, 2);
        for comp in 0..6 {
            let orig = 0x0800_0000 + 0x40 * comp as u32;
            fpb.set_patch(comp, orig, 0x0800_8000).unwrap();
            let slot = fpb.get_state().comps[comp];
            assert!(slot.enabled);
            assert_eq!(slot.original_addr, orig);

            fpb.clear_patch(comp).unwrap();
            assert!(!fpb.get_state().comps[comp].enabled);
            assert_eq!(fpb.io().comp(comp), 0);
            assert_eq!(fpb.io().remap_entry(comp), 0);
        }

        // Already clear
        assert_eq!(fpb.clear_patch(3), Ok(()));
    }

    #[test]
    fn far_patch_uses_trampoline() {
        let targets = [const { AtomicU32::new(0) }; FPB_TRAMPOLINE_COUNT];
        let tramps = Trampolines::new(STUBS, &targets);
        let mut fpb = Fpb::new(MockIo::new(6, 2)).with_trampolines(&tramps);
        fpb.init().unwrap();

        fpb.set_patch(2, 0x0800_1000, 0x2000_2000).unwrap();
        assert_eq!(tramps.get_target(2), 0x2000_2001);
        let jump = thumb::generate_jump(0x0800_1000, tramps.get_address(2));
        assert_eq!(fpb.io().remap_entry(2), jump.as_word());
        assert_eq!(fpb.get_state().comps[2].trampoline(), Some(2));

        // Repatching to a near target releases the trampoline
        fpb.set_patch(2, 0x0800_1000, 0x0800_5000).unwrap();
        assert_eq!(tramps.get_target(2), 0);
        assert_eq!(fpb.get_state().comps[2].trampoline(), None);

        fpb.set_patch(3, 0x0800_1000, 0x2000_2000).unwrap();
        fpb.clear_patch(3).unwrap();
        assert_eq!(tramps.get_target(3), 0);
    }

    #[test]
    fn far_patch_without_trampoline() {
        let mut fpb = fpb(6, 2);
        assert_eq!(fpb.set_patch(0, 0x0800_1000, 0x2000_2000), Err(Error::InvalidAddr));
        assert!(!fpb.get_state().comps[0].is_installed());
    }

    #[test]
    fn halfword_aligned_original() {
        let mut fpb = fpb(6, 2);
        fpb.io_mut().poke(0x0800_1000, 0x4770_B510);

        fpb.set_patch(0, 0x0800_1002, 0x0800_1100).unwrap();
        let jump = thumb::generate_jump(0x0800_1002, 0x0800_1100);
        assert!(jump.is_short());
        assert_eq!(
            fpb.io().remap_entry(0),
            ((jump.hw0() as u32) << 16) | 0xB510
        );
        assert_eq!(fpb.io().comp(0), 0x0800_1001);

        // A 32-bit branch would straddle two words
        assert_eq!(fpb.set_patch(1, 0x0800_1002, 0x0810_0000), Err(Error::InvalidAddr));
    }

    #[test]
    fn instruction_patch() {
        let mut fpb = fpb(6, 2);
        fpb.set_instruction_patch(1, 0x0800_2006, 0x4770_2001).unwrap();
        assert_eq!(fpb.io().remap_entry(1), 0x4770_2001);
        assert_eq!(fpb.io().comp(1), 0x0800_2005);
        let slot = fpb.get_state().comps[1];
        assert_eq!(slot.original_addr, 0x0800_2006);
        assert_eq!(slot.patch_addr, 0);
    }

    #[test]
    fn enable_preserves_patch() {
        let mut fpb = fpb(6, 2);
        assert_eq!(fpb.enable_comp(0, true), Err(Error::NoPatch));
        assert_eq!(fpb.enable_comp(0, false), Ok(()));

        fpb.set_patch(0, 0x0800_1000, 0x0800_2000).unwrap();
        let entry = fpb.io().remap_entry(0);

        fpb.enable_comp(0, false).unwrap();
        assert_eq!(fpb.io().comp(0), 0x0800_1000);
        assert_eq!(fpb.io().remap_entry(0), entry);
        let slot = fpb.get_state().comps[0];
        assert!(!slot.enabled);
        assert_eq!(slot.original_addr, 0x0800_1000);

        fpb.enable_comp(0, true).unwrap();
        assert_eq!(fpb.io().comp(0), 0x0800_1001);
        assert!(fpb.get_state().comps[0].enabled);
    }

    #[test]
    fn deinit_clears() {
        let mut fpb = fpb(6, 2);
        fpb.set_patch(0, 0x0800_1000, 0x0800_2000).unwrap();
        fpb.set_patch(5, 0x0800_1100, 0x0800_2000).unwrap();
        fpb.deinit();

        assert!(!fpb.io().fpb_enabled());
        assert!(!fpb.get_state().initialized);
        for comp in 0..6 {
            assert_eq!(fpb.io().comp(comp), 0);
            assert_eq!(fpb.io().remap_entry(comp), 0);
        }

        // Again, and uninitialized
        fpb.deinit();
        let mut other = Fpb::new(MockIo::new(6, 2));
        other.deinit();
    }

    #[test]
    fn deinit_from_fresh_instance() {
        let mut fpb = fpb(6, 2);
        fpb.set_patch(0, 0x0800_1000, 0x0800_2000).unwrap();
        fpb.set_instruction_patch(3, 0x0800_3000, 0xBF00_BF00).unwrap();
        let io = fpb.release();

        let mut fresh = Fpb::new(io);
        fresh.deinit();
        assert!(!fresh.io().fpb_enabled());
        for comp in 0..6 {
            assert_eq!(fresh.io().comp(comp), 0);
            assert_eq!(fresh.io().remap_entry(comp), 0);
        }
    }

    // Captures trampoline 2's target at each write to comparator 2
    struct RetargetLog<'a> {
        mock: MockIo,
        targets: &'a [AtomicU32; FPB_TRAMPOLINE_COUNT],
        writes: [(u32, u32); 8],
        len: usize,
    }

    impl FpbIo for RetargetLog<'_> {
        fn read_u32(&mut self, addr: u32) -> u32 {
            self.mock.read_u32(addr)
        }

        fn write_u32(&mut self, addr: u32, value: u32) {
            if addr == fp_comp_addr(2) && self.len < self.writes.len() {
                self.writes[self.len] = (value, self.targets[2].load(Ordering::Acquire));
                self.len += 1;
            }
            self.mock.write_u32(addr, value);
        }

        fn barrier(&mut self) {
            self.mock.barrier();
        }
    }

    #[test]
    fn trampoline_retargeted_while_comp_disabled() {
        let targets = [const { AtomicU32::new(0) }; FPB_TRAMPOLINE_COUNT];
        let trampolines = Trampolines::new(STUBS, &targets);
        let io = RetargetLog {
            mock: MockIo::new(6, 2),
            targets: &targets,
            writes: [(0, 0); 8],
            len: 0,
        };
        let mut fpb = Fpb::new(io).with_trampolines(&trampolines);
        fpb.init().unwrap();

        fpb.set_patch(2, 0x0800_1000, 0x2000_2000).unwrap();
        fpb.io_mut().len = 0;
        fpb.set_patch(2, 0x0800_3000, 0x2000_3000).unwrap();

        let log = fpb.io();
        // Disabled while still pointing at the old patch, re-enabled only
        // once pointing at the new one
        assert_eq!(&log.writes[..log.len], &[(0, 0x2000_2001), (0x0800_3001, 0x2000_3001)]);
        assert_eq!(trampolines.get_target(2), 0x2000_3001);
    }

    #[test]
    fn barriers_after_writes() {
        let mut fpb = fpb(6, 2);
        let before = fpb.io().barriers();
        fpb.set_patch(0, 0x0800_1000, 0x0800_2000).unwrap();
        assert!(fpb.io().barriers() > before);
    }

    #[test]
    fn relocated_remap_table() {
        let mut fpb = Fpb::with_config(
            MockIo::new(6, 2),
            FpbConfig::Direct {
                remap_base: 0x2000_4000,
            },
        );
        fpb.init().unwrap();
        assert_eq!(fpb.io().remap_base(), 0x2000_4000);
        fpb.set_patch(1, 0x0800_1000, 0x0800_2000).unwrap();
        assert_ne!(fpb.io().peek(0x2000_4004), 0);

        let mut misaligned = Fpb::with_config(
            MockIo::new(6, 2),
            FpbConfig::Direct {
                remap_base: 0x2000_4004,
            },
        );
        assert_eq!(misaligned.init(), Err(Error::InvalidAddr));

        let mut unsupported = Fpb::with_config(
            MockIo::new(6, 2).without_remap(),
            FpbConfig::Direct {
                remap_base: 0x2000_4000,
            },
        );
        assert_eq!(unsupported.init(), Err(Error::NotSupported));
    }

    #[test]
    fn no_remap_hardware() {
        let mut fpb = Fpb::new(MockIo::new_v2(8));
        fpb.init().unwrap();
        assert_eq!(fpb.get_state().remap_base, None);
        assert_eq!(fpb.set_patch(0, 0x0800_1000, 0x0800_2000), Err(Error::NotSupported));
    }

    #[test]
    fn info() {
        let mut fpb = fpb(6, 2);
        fpb.set_patch(0, 0x0800_1000, 0x0800_2000).unwrap();
        let info = fpb.get_info();
        assert_eq!(info.num_total, 8);
        assert_eq!(info.num_code, 6);
        assert_eq!(info.num_lit, 2);
        assert!(info.enabled);
        assert!(info.remap_supported);
        assert_eq!(info.remap_base, MOCK_REMAP_BASE);
        assert_eq!(info.comps().len(), 8);
        assert!(info.comps()[0].enabled);
        assert_eq!(info.comps()[0].address, 0x0800_1000);
        assert_eq!(info.comps()[0].mode, CompMode::Remap);
    }

    #[test]
    fn thumb_jump_buffer() {
        let fpb = fpb(6, 2);
        let mut buf = [0u8; 4];
        assert_eq!(fpb.generate_thumb_jump(0x0800_0000, 0x0810_0004, &mut buf), Ok(4));
        assert_eq!(
            fpb.generate_thumb_jump(0x0800_0000, 0x0810_0004, &mut buf[..1]),
            Err(Error::InvalidParam)
        );
    }
}
