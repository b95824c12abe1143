//! Asynchronous FPB inspection - typically used by a Host.
//!
//! Reads back the FPB registers and remap table of a target over a debug
//! interface, for example to confirm which patches are live.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::boxed::Box;
use async_trait::async_trait;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::fpb::{CompInfo, FpbInfo, num_reported, remap_entry_addr};
use crate::io::{Reader, Writer};
use crate::regs::{FpCtrl, FpRemap, Register, fp_comp_addr};
use crate::{Error, FPB_MAX_CODE_COMPS, FPB_MAX_COMPS, Result};

/// Trait for accessing the FPB registers of a remote target.
///
/// Async version, typically used for accessing the target over SWD or
/// other asynchronous protocols.
#[async_trait(?Send)]
pub trait AsyncFpbIo {
    /// Read a word from the target
    async fn read_u32(&mut self, addr: u32) -> Result<u32>;

    /// Write a word to the target
    async fn write_u32(&mut self, addr: u32, value: u32) -> Result<()>;
}

/// Asynchronous FPB inspector
pub struct AsyncFpb<'a, I: AsyncFpbIo> {
    io: &'a mut I,
}

impl<'a, I: AsyncFpbIo> AsyncFpb<'a, I> {
    /// Arguments:
    /// - `io` - Object implementing [`AsyncFpbIo`] to access the target
    pub fn new(io: &'a mut I) -> Self {
        Self { io }
    }

    /// Read the FPB configuration and every comparator, up to
    /// [`FPB_MAX_COMPS`].
    pub async fn info(&mut self) -> Result<FpbInfo> {
        let ctrl = self.read_ctrl().await?;
        let remap = self.read_remap().await?;

        let count = num_reported(ctrl);
        let mut comps = [0u32; FPB_MAX_COMPS];
        for (n, comp) in comps.iter_mut().take(count).enumerate() {
            *comp = self.io.read_u32(fp_comp_addr(n)).await?;
        }

        let info = FpbInfo::from_registers(ctrl, remap, &comps[..count]);
        debug!(
            "Target FPB {:?}: {} code {} literal, enabled {}",
            info.revision, info.num_code, info.num_lit, info.enabled
        );
        Ok(info)
    }

    /// Read and decode comparator `n`.
    pub async fn comparator(&mut self, n: usize) -> Result<CompInfo> {
        let ctrl = self.read_ctrl().await?;
        if n >= num_reported(ctrl) {
            return Err(Error::InvalidComp);
        }
        let raw = self.io.read_u32(fp_comp_addr(n)).await?;
        Ok(CompInfo::decode(
            ctrl.revision(),
            raw,
            n >= ctrl.num_code() as usize,
        ))
    }

    /// Read the remap table entry for code comparator `n`.
    ///
    /// Fails with [`Error::NotSupported`] if the target does not support
    /// remapping.
    pub async fn remap_entry(&mut self, n: usize) -> Result<u32> {
        let ctrl = self.read_ctrl().await?;
        if n >= FPB_MAX_CODE_COMPS || n >= ctrl.num_code() as usize {
            return Err(Error::InvalidComp);
        }
        let remap = self.read_remap().await?;
        if !remap.rmpspt() {
            return Err(Error::NotSupported);
        }
        self.io.read_u32(remap_entry_addr(remap.base(), n)).await
    }

    /// Disable the FPB unit on the target, deactivating every patch and
    /// breakpoint without clearing them.
    pub async fn disable(&mut self) -> Result<()> {
        self.io
            .write_u32(FpCtrl::ADDRESS, FpCtrl::control(false).into())
            .await?;
        debug!("Target FPB disabled");
        Ok(())
    }

    /// Enable the FPB unit on the target.
    pub async fn enable(&mut self) -> Result<()> {
        self.io
            .write_u32(FpCtrl::ADDRESS, FpCtrl::control(true).into())
            .await?;
        debug!("Target FPB enabled");
        Ok(())
    }
}

impl<I: AsyncFpbIo> AsyncFpb<'_, I> {
    async fn read_ctrl(&mut self) -> Result<FpCtrl> {
        Ok(FpCtrl::from(self.io.read_u32(FpCtrl::ADDRESS).await?))
    }

    async fn read_remap(&mut self) -> Result<FpRemap> {
        Ok(FpRemap::from(self.io.read_u32(FpRemap::ADDRESS).await?))
    }
}

/// FPB I/O implementation using [`crate::io::Reader`] and
/// [`crate::io::Writer`] traits.
pub struct ReaderWriterFpbIo<'a, R: Reader, W: Writer> {
    reader: &'a mut R,
    writer: &'a mut W,
}

impl<'a, R: Reader, W: Writer> ReaderWriterFpbIo<'a, R, W> {
    /// Create new instance
    pub fn new(reader: &'a mut R, writer: &'a mut W) -> Self {
        Self { reader, writer }
    }
}

#[async_trait(?Send)]
impl<R: Reader, W: Writer> AsyncFpbIo for ReaderWriterFpbIo<'_, R, W> {
    async fn read_u32(&mut self, addr: u32) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.reader.read(addr, &mut buf).await.map_err(|e| {
            warn!("Read of {addr:#010X} failed: {e:?}");
            Error::Io
        })?;
        Ok(u32::from_le_bytes(buf))
    }

    async fn write_u32(&mut self, addr: u32, value: u32) -> Result<()> {
        self.writer
            .write(addr, &value.to_le_bytes())
            .await
            .map_err(|e| {
                warn!("Write of {addr:#010X} failed: {e:?}");
                Error::Io
            })
    }
}
