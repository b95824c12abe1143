//! Hardware access for the FPB and debug registers.
//!
//! All register and remap table accesses made by this crate go through the
//! [`FpbIo`] trait.  [`SiliconIo`] accesses the registers directly and is used
//! on the target.  [`mock::MockIo`] simulates the registers and is used for
//! host-side testing.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod mock;

pub use mock::MockIo;

use crate::regs::{FpCtrl, FpRemap, Register, fp_comp_addr};

/// Trait for accessing the FPB registers, remap table and code memory.
///
/// Register writes are assumed to take effect, so none of these methods can
/// fail.
pub trait FpbIo {
    /// Atomic read u32 operation
    fn read_u32(&mut self, addr: u32) -> u32;

    /// Atomic write u32 operation
    fn write_u32(&mut self, addr: u32, value: u32);

    /// Data and instruction synchronization barrier.  Must be called after
    /// writes which affect instruction fetch (remap table contents and
    /// comparator configuration) before the patched code can be executed.
    fn barrier(&mut self);

    /// Read a register
    fn read_reg<R: Register + From<u32>>(&mut self) -> R {
        R::from(self.read_u32(R::ADDRESS))
    }

    /// Write a register
    fn write_reg<R: Register + Into<u32>>(&mut self, value: R) {
        self.write_u32(R::ADDRESS, value.into())
    }

    fn read_ctrl(&mut self) -> FpCtrl {
        self.read_reg()
    }

    fn write_ctrl(&mut self, ctrl: FpCtrl) {
        self.write_reg(ctrl)
    }

    fn read_remap(&mut self) -> FpRemap {
        self.read_reg()
    }

    fn write_remap(&mut self, remap: FpRemap) {
        self.write_reg(remap)
    }

    /// Read comparator `n`, raw
    fn read_comp(&mut self, n: usize) -> u32 {
        self.read_u32(fp_comp_addr(n))
    }

    /// Write comparator `n`, raw
    fn write_comp(&mut self, n: usize, value: u32) {
        self.write_u32(fp_comp_addr(n), value)
    }
}

impl<T: FpbIo + ?Sized> FpbIo for &mut T {
    fn read_u32(&mut self, addr: u32) -> u32 {
        (**self).read_u32(addr)
    }

    fn write_u32(&mut self, addr: u32, value: u32) {
        (**self).write_u32(addr, value)
    }

    fn barrier(&mut self) {
        (**self).barrier()
    }
}

/// FPB I/O implementation using direct register access.  Used on the target.
#[derive(Clone, Copy)]
pub struct SiliconIo;

impl SiliconIo {
    /// Create a new SiliconIo instance.
    ///
    /// ```rust
    /// use fpb_hotpatch::hw::SiliconIo;
    /// static mut FPB_IO: SiliconIo = SiliconIo::new();
    /// ```
    // We need a new() rather than a default() as it must be const.
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {}
    }
}

impl FpbIo for SiliconIo {
    fn read_u32(&mut self, addr: u32) -> u32 {
        unsafe { core::ptr::read_volatile(addr as usize as *const u32) }
    }

    fn write_u32(&mut self, addr: u32, value: u32) {
        unsafe { core::ptr::write_volatile(addr as usize as *mut u32, value) };
    }

    fn barrier(&mut self) {
        #[cfg(all(target_arch = "arm", target_os = "none"))]
        {
            cortex_m::asm::dsb();
            cortex_m::asm::isb();
        }
        #[cfg(not(all(target_arch = "arm", target_os = "none")))]
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    }
}
