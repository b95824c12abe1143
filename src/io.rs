//! Async memory access traits, for reaching a target's FPB from a host.
//!
//! Implement these over a debug probe (SWD, JTAG) and wrap them in
//! [`crate::fpb::ReaderWriterFpbIo`] to inspect a running target's
//! comparators and remap table with [`crate::fpb::AsyncFpb`].
//!
//! # Address Space
//!
//! Addresses are absolute, as they appear in the target's memory map: the FPB
//! registers at `0xE0002000`, the remap table in SRAM from `0x20000000`.  The
//! implementation is responsible for translating them into probe transactions.
//!
//! Register accesses are always 4 bytes, word aligned.  Implementations must
//! perform them as single 32-bit transfers, as the FPB does not support byte
//! or halfword access.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

/// Reader trait.
pub trait Reader {
    /// The error type returned by read operations, for example the probe
    /// driver's own error.
    type Error: core::fmt::Debug;

    /// Read bytes from the target at the specified absolute address.
    ///
    /// # Arguments
    ///
    /// * `addr` - The absolute address to read from (e.g., `0xE0002008`)
    /// * `buf` - Buffer to fill with the read data
    ///
    /// # Errors
    ///
    /// Returns an error if the target did not respond, or the address is not
    /// accessible.
    fn read(
        &mut self,
        addr: u32,
        buf: &mut [u8],
    ) -> impl core::future::Future<Output = Result<(), Self::Error>> + Send;
}

/// Writer trait.
pub trait Writer {
    /// The error type returned by write operations.
    type Error: core::fmt::Debug;

    /// Write bytes to the target at the specified absolute address.
    ///
    /// # Arguments
    ///
    /// * `addr` - The absolute address to write to (e.g., `0xE0002000`)
    /// * `data` - Data to write
    ///
    /// # Errors
    ///
    /// Returns an error if the target did not respond, or the address is not
    /// writable.
    fn write(
        &mut self,
        addr: u32,
        data: &[u8],
    ) -> impl core::future::Future<Output = Result<(), Self::Error>> + Send;
}
