//! Simulated FPB and debug registers, for host-side testing.
//!
//! [`MockIo`] models the parts of the register contract this crate relies on:
//! - FP_CTRL reports fixed comparator counts and revision, and only the
//!   ENABLE bit is writable, and only when KEY is set
//! - FP_REMAP reports RMPSPT, and its address field is only writable when
//!   remap is supported
//! - DFSR bits are write-one-to-clear
//!
//! All other addresses, including the comparators, the remap table and code
//! memory, read back what was last written, or zero.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::hw::FpbIo;
use crate::regs::{Dfsr, FpCtrl, FpRemap, Register};

const MAX_WORDS: usize = 128;

/// Default SRAM location of the simulated remap table.
pub const MOCK_REMAP_BASE: u32 = 0x2001_0000;

/// Register file simulation implementing [`FpbIo`].
#[derive(Debug, Clone)]
pub struct MockIo {
    num_code: u32,
    num_lit: u32,
    rev: u32,
    enabled: bool,
    remap: u32,
    remap_supported: bool,
    dfsr: u32,
    words: [(u32, u32); MAX_WORDS],
    used: usize,
    barriers: usize,
}

impl MockIo {
    /// Create an FPB v1 with the given comparator counts and remap table at
    /// [`MOCK_REMAP_BASE`].
    pub fn new(num_code: u32, num_lit: u32) -> Self {
        Self {
            num_code,
            num_lit,
            rev: 0,
            enabled: false,
            remap: MOCK_REMAP_BASE & 0x1FFF_FFE0,
            remap_supported: true,
            dfsr: 0,
            words: [(0, 0); MAX_WORDS],
            used: 0,
            barriers: 0,
        }
    }

    /// Create an FPB v2, which has no remap support.
    pub fn new_v2(num_code: u32) -> Self {
        Self {
            rev: 1,
            remap_supported: false,
            remap: 0,
            ..Self::new(num_code, 0)
        }
    }

    /// Remove remap support from an FPB v1.
    pub fn without_remap(mut self) -> Self {
        self.remap_supported = false;
        self
    }

    /// Whether FP_CTRL.ENABLE is set
    pub fn fpb_enabled(&self) -> bool {
        self.enabled
    }

    /// Raw value of comparator `n`
    pub fn comp(&self, n: usize) -> u32 {
        self.peek(crate::regs::fp_comp_addr(n))
    }

    /// Current remap table base
    pub fn remap_base(&self) -> u32 {
        FpRemap::from(self.remap).base()
    }

    /// Remap table entry `n`
    pub fn remap_entry(&self, n: usize) -> u32 {
        self.peek(self.remap_base() + (n as u32) * 4)
    }

    /// Raw DEMCR value
    pub fn demcr(&self) -> u32 {
        self.peek(crate::regs::Demcr::ADDRESS)
    }

    /// Raise debug events in DFSR
    pub fn set_dfsr(&mut self, dfsr: Dfsr) {
        self.dfsr |= dfsr.bits();
    }

    pub fn dfsr(&self) -> Dfsr {
        Dfsr::from_bits_retain(self.dfsr)
    }

    /// Number of barriers issued
    pub fn barriers(&self) -> usize {
        self.barriers
    }

    /// Read a word without side effects
    pub fn peek(&self, addr: u32) -> u32 {
        self.words[..self.used]
            .iter()
            .find(|(a, _)| *a == addr)
            .map(|(_, v)| *v)
            .unwrap_or(0)
    }

    /// Write a word without register semantics, for example to seed code
    /// memory
    pub fn poke(&mut self, addr: u32, value: u32) {
        if let Some(word) = self.words[..self.used].iter_mut().find(|(a, _)| *a == addr) {
            word.1 = value;
        } else if self.used < MAX_WORDS {
            self.words[self.used] = (addr, value);
            self.used += 1;
        } else {
            warn!("MockIo: out of storage writing {addr:#010X}");
        }
    }

    fn ctrl_value(&self) -> u32 {
        (self.rev << 28)
            | (((self.num_code >> 4) & 0x7) << 12)
            | ((self.num_lit & 0xF) << 8)
            | ((self.num_code & 0xF) << 4)
            | self.enabled as u32
    }

    fn remap_value(&self) -> u32 {
        self.remap | ((self.remap_supported as u32) << 29)
    }
}

impl FpbIo for MockIo {
    fn read_u32(&mut self, addr: u32) -> u32 {
        match addr {
            FpCtrl::ADDRESS => self.ctrl_value(),
            FpRemap::ADDRESS => self.remap_value(),
            Dfsr::ADDRESS => self.dfsr,
            _ => self.peek(addr),
        }
    }

    fn write_u32(&mut self, addr: u32, value: u32) {
        match addr {
            FpCtrl::ADDRESS => {
                // Ignored unless KEY is set
                if value & 0x2 != 0 {
                    self.enabled = value & 0x1 != 0;
                }
            }
            FpRemap::ADDRESS => {
                if self.remap_supported {
                    self.remap = value & 0x1FFF_FFE0;
                }
            }
            Dfsr::ADDRESS => self.dfsr &= !value,
            _ => self.poke(addr, value),
        }
    }

    fn barrier(&mut self) {
        self.barriers += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::FpCtrl;

    #[test]
    fn ctrl_fields_read_only() {
        let mut io = MockIo::new(6, 2);
        io.write_u32(FpCtrl::ADDRESS, 0xFFFF_FFFF);
        let ctrl = io.read_ctrl();
        assert_eq!(ctrl.num_code(), 6);
        assert_eq!(ctrl.num_lit(), 2);
        assert!(ctrl.enable());

        // No KEY, no effect
        io.write_u32(FpCtrl::ADDRESS, 0);
        assert!(io.fpb_enabled());
        io.write_ctrl(FpCtrl::control(false));
        assert!(!io.fpb_enabled());
    }

    #[test]
    fn dfsr_write_one_to_clear() {
        let mut io = MockIo::new(6, 2);
        io.set_dfsr(Dfsr::BKPT | Dfsr::DWTTRAP);
        io.write_u32(Dfsr::ADDRESS, Dfsr::BKPT.bits());
        assert_eq!(io.dfsr(), Dfsr::DWTTRAP);
    }

    #[test]
    fn remap_not_writable_without_support() {
        let mut io = MockIo::new(6, 2).without_remap();
        let before = io.remap_base();
        io.write_u32(FpRemap::ADDRESS, 0x0000_1000);
        assert_eq!(io.remap_base(), before);
        assert!(!io.read_remap().rmpspt());
    }
}
