//! FPB and debug register definitions.
//!
//! See the ARMv7-M Architecture Reference Manual, C1.11 Flash Patch and
//! Breakpoint unit, and C1.6 Debug system registers.  FPB version 2 (as found
//! on ARMv8-M and some ARMv7-M parts) drops remap support and changes the
//! comparator layout.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use bitfield::bitfield;
use bitflags::bitflags;

use crate::{Error, Result, SRAM_BASE};

/// A memory mapped register at a fixed address.
pub trait Register {
    /// Absolute address of the register
    const ADDRESS: u32;
}

/// Address of the first comparator register.
pub const FP_COMP0: u32 = 0xE000_2008;

/// Address of comparator register `n`.
pub const fn fp_comp_addr(n: usize) -> u32 {
    FP_COMP0 + (n as u32) * 4
}

/// FPB architecture revision, from [`FpCtrl::rev()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpbRevision {
    /// Version 1 - remap supported, code region only
    V1,
    /// Version 2 - breakpoints anywhere, no remap
    V2,
    /// Unrecognised revision field
    Unknown(u8),
}

impl From<u32> for FpbRevision {
    fn from(value: u32) -> Self {
        match value {
            0 => FpbRevision::V1,
            1 => FpbRevision::V2,
            other => FpbRevision::Unknown(other as u8),
        }
    }
}

bitfield! {
    /// Flash Patch Control Register, FP_CTRL
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct FpCtrl(u32);
    impl Debug;
    /// Flash Patch breakpoint architecture revision
    pub rev, _: 31, 28;
    num_code_1, _: 14, 12;
    /// Number of literal address comparators, starting from NUM_CODE upwards
    pub num_lit, _: 11, 8;
    num_code_0, _: 7, 4;
    /// Must be written as `1` for a write to FP_CTRL to take effect
    pub _, set_key: 1;
    /// Unit enable
    pub enable, set_enable: 0;
}

impl FpCtrl {
    /// Number of instruction address comparators
    pub fn num_code(&self) -> u32 {
        (self.num_code_1() << 4) | self.num_code_0()
    }

    /// Total comparators, code and literal
    pub fn num_total(&self) -> u32 {
        self.num_code() + self.num_lit()
    }

    pub fn revision(&self) -> FpbRevision {
        FpbRevision::from(self.rev())
    }

    /// Value to write to enable or disable the unit.
    pub fn control(enable: bool) -> Self {
        let mut ctrl = FpCtrl(0);
        ctrl.set_key(true);
        ctrl.set_enable(enable);
        ctrl
    }
}

impl Register for FpCtrl {
    const ADDRESS: u32 = 0xE000_2000;
}

impl From<u32> for FpCtrl {
    fn from(value: u32) -> Self {
        FpCtrl(value)
    }
}

impl From<FpCtrl> for u32 {
    fn from(value: FpCtrl) -> Self {
        value.0
    }
}

bitfield! {
    /// Flash Patch Remap register, FP_REMAP
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct FpRemap(u32);
    impl Debug;
    /// Remap supported
    pub rmpspt, _: 29;
    /// Bits [28:5] of the SRAM remap table address
    pub remap, set_remap: 28, 5;
}

impl FpRemap {
    /// Absolute SRAM address of the remap table.  Bits [31:29] of the table
    /// address are always `0b001`.
    pub fn base(&self) -> u32 {
        SRAM_BASE | (self.remap() << 5)
    }

    /// Register value placing the remap table at `base`.  `base` must be a
    /// 32-byte aligned SRAM address.
    pub fn with_base(base: u32) -> Result<Self> {
        if base & 0x1F != 0 || base & 0xE000_0000 != SRAM_BASE {
            return Err(Error::InvalidAddr);
        }
        let mut remap = FpRemap(0);
        remap.set_remap((base & 0x1FFF_FFE0) >> 5);
        Ok(remap)
    }
}

impl Register for FpRemap {
    const ADDRESS: u32 = 0xE000_2004;
}

impl From<u32> for FpRemap {
    fn from(value: u32) -> Self {
        FpRemap(value)
    }
}

impl From<FpRemap> for u32 {
    fn from(value: FpRemap) -> Self {
        value.0
    }
}

/// Comparator behavior, decoded from [`FpComp::replace()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompMode {
    /// Remap through the SRAM remap table
    Remap,
    /// Breakpoint on the lower halfword
    BreakpointLow,
    /// Breakpoint on the upper halfword
    BreakpointHigh,
    /// Breakpoint on both halfwords
    BreakpointBoth,
    /// FPB v2 breakpoint
    Breakpoint,
}

bitfield! {
    /// Flash Patch Comparator register, FP_COMPn, FPB version 1
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct FpComp(u32);
    impl Debug;
    /// `00` remap, `01` breakpoint lower halfword, `10` breakpoint upper
    /// halfword, `11` breakpoint both
    pub replace, set_replace: 31, 30;
    /// Bits [28:2] of the address to match.  Bits [31:29] are zero.
    pub comp, set_comp: 28, 2;
    pub enable, set_enable: 0;
}

impl FpComp {
    pub const REPLACE_REMAP: u32 = 0b00;
    pub const REPLACE_BKPT_LOW: u32 = 0b01;
    pub const REPLACE_BKPT_HIGH: u32 = 0b10;
    pub const REPLACE_BKPT_BOTH: u32 = 0b11;

    /// Comparator value remapping the word containing `addr`.
    pub fn remap_configuration(addr: u32) -> Result<Self> {
        if addr >= SRAM_BASE {
            return Err(Error::InvalidAddr);
        }
        let mut reg = FpComp(0);
        reg.set_replace(Self::REPLACE_REMAP);
        reg.set_comp((addr & 0x1FFF_FFFC) >> 2);
        reg.set_enable(true);
        Ok(reg)
    }

    /// Comparator value raising a breakpoint on the halfword at `addr`.
    pub fn breakpoint_configuration(addr: u32) -> Result<Self> {
        if addr >= SRAM_BASE {
            return Err(Error::InvalidAddr);
        }
        let mut reg = FpComp(0);
        let replace = if addr & 0x2 == 0 {
            Self::REPLACE_BKPT_LOW
        } else {
            Self::REPLACE_BKPT_HIGH
        };
        reg.set_replace(replace);
        reg.set_comp((addr & 0x1FFF_FFFC) >> 2);
        reg.set_enable(true);
        Ok(reg)
    }

    /// Matched word address
    pub fn address(&self) -> u32 {
        self.comp() << 2
    }

    pub fn mode(&self) -> CompMode {
        match self.replace() {
            Self::REPLACE_REMAP => CompMode::Remap,
            Self::REPLACE_BKPT_LOW => CompMode::BreakpointLow,
            Self::REPLACE_BKPT_HIGH => CompMode::BreakpointHigh,
            _ => CompMode::BreakpointBoth,
        }
    }
}

impl From<u32> for FpComp {
    fn from(value: u32) -> Self {
        FpComp(value)
    }
}

impl From<FpComp> for u32 {
    fn from(value: FpComp) -> Self {
        value.0
    }
}

bitfield! {
    /// Flash Patch Comparator register, FP_COMPn, FPB version 2
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct FpCompV2(u32);
    impl Debug;
    /// Bits [31:1] of the breakpoint instruction address
    pub bpaddr, set_bpaddr: 31, 1;
    /// Breakpoint enable
    pub enable, set_enable: 0;
}

impl FpCompV2 {
    pub fn breakpoint_configuration(addr: u32) -> Self {
        let mut reg = FpCompV2(0);
        reg.set_bpaddr(addr >> 1);
        reg.set_enable(true);
        reg
    }

    pub fn address(&self) -> u32 {
        self.bpaddr() << 1
    }
}

impl From<u32> for FpCompV2 {
    fn from(value: u32) -> Self {
        FpCompV2(value)
    }
}

impl From<FpCompV2> for u32 {
    fn from(value: FpCompV2) -> Self {
        value.0
    }
}

// DEMCR RW 0x00000000 Debug Exception and Monitor Control Register
bitflags! {
    #[derive(Debug, PartialEq, Eq, Copy, Clone)]
    pub struct Demcr: u32 {
        const TRCENA = 1 << 24;
        const MON_REQ = 1 << 19;
        const MON_STEP = 1 << 18;
        const MON_PEND = 1 << 17;
        const MON_EN = 1 << 16;
        const VC_HARDERR = 1 << 10;
        const VC_CORERESET = 1 << 0;
        const _ = !0;
    }
}

impl Register for Demcr {
    const ADDRESS: u32 = 0xE000_EDFC;
}

impl From<u32> for Demcr {
    fn from(value: u32) -> Self {
        Self::from_bits_retain(value)
    }
}

impl From<Demcr> for u32 {
    fn from(value: Demcr) -> Self {
        value.bits()
    }
}

// Debug Fault Status Register.  Bits are write-one-to-clear.
bitflags! {
    #[derive(Debug, PartialEq, Eq, Copy, Clone)]
    pub struct Dfsr: u32 {
        // Assertion of an external debug request
        const EXTERNAL = 1 << 4;
        // Vector catch triggered
        const VCATCH = 1 << 3;
        // At least one DWT event
        const DWTTRAP = 1 << 2;
        // Breakpoint, either BKPT instruction or FPB match
        const BKPT = 1 << 1;
        // Halt or step request
        const HALTED = 1 << 0;
        const _ = !0;
    }
}

impl Register for Dfsr {
    const ADDRESS: u32 = 0xE000_ED30;
}

impl From<u32> for Dfsr {
    fn from(value: u32) -> Self {
        Self::from_bits_retain(value)
    }
}

impl From<Dfsr> for u32 {
    fn from(value: Dfsr) -> Self {
        value.bits()
    }
}

impl Dfsr {
    pub fn is_bkpt(self) -> bool {
        self.contains(Self::BKPT)
    }
}
