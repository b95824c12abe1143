//! Fixed-block RAM allocator for patch code buffers.
//!
//! Manages a caller-provided arena as [`FPB_ALLOC_BLOCK_SIZE`] byte blocks,
//! with one bitmap bit per block (1 = used).  Allocations are runs of
//! contiguous blocks, found first-fit.
//!
//! The arena is laid out as:
//!
//! ```text
//! +----------------------------+--------+---------+
//! | block 0 | block 1 | ...    | bitmap | unused  |
//! +----------------------------+--------+---------+
//! ```
//!
//! Blocks start at the beginning of the arena, so a suitably aligned arena
//! gives aligned blocks.
//!
//! Invalid input to [`BlockAllocator::free()`] and
//! [`BlockAllocator::alloc_size()`] is ignored rather than reported, so that
//! a buggy caller cannot corrupt the allocator's accounting.
//!
//! There is no locking.  Callers must serialize access.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::marker::PhantomData;
use core::ptr::NonNull;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{Error, FPB_ALLOC_BLOCK_SIZE, FPB_ALLOC_MAX_BLOCKS, Result};

/// Block usage, as returned by [`BlockAllocator::stats()`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocStats {
    pub used_blocks: usize,
    pub free_blocks: usize,
    pub total_blocks: usize,
}

const fn bitmap_bytes(blocks: usize) -> usize {
    blocks.div_ceil(8)
}

/// Largest block count whose blocks and bitmap fit in `size` bytes.
fn blocks_for(size: usize) -> usize {
    // Ignores the bitmap, so may overshoot
    let mut blocks = (size / FPB_ALLOC_BLOCK_SIZE).min(FPB_ALLOC_MAX_BLOCKS);
    while blocks > 0 && bitmap_bytes(blocks) + blocks * FPB_ALLOC_BLOCK_SIZE > size {
        blocks -= 1;
    }
    blocks
}

/// Fixed-block allocator over a borrowed arena.
pub struct BlockAllocator<'a> {
    // Start of the arena and first block.  None until initialized.
    blocks: Option<NonNull<u8>>,
    total: usize,
    used: usize,
    // Block count of each allocation, indexed by its first block.  0 for
    // blocks which don't start an allocation.
    sizes: [u16; FPB_ALLOC_MAX_BLOCKS],
    _arena: PhantomData<&'a mut [u8]>,
}

impl<'a> BlockAllocator<'a> {
    /// Create an allocator with no arena.  All operations fail until
    /// [`Self::init()`] succeeds.
    // We need a new() rather than a default() as it must be const.
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            blocks: None,
            total: 0,
            used: 0,
            sizes: [0; FPB_ALLOC_MAX_BLOCKS],
            _arena: PhantomData,
        }
    }

    /// Take ownership of `arena` and divide it into blocks.  Any previous
    /// arena is forgotten, along with its allocations.
    ///
    /// Fails with [`Error::InvalidParam`], leaving the allocator invalid, if
    /// the arena cannot hold one block plus its bitmap byte.
    pub fn init(&mut self, arena: &'a mut [u8]) -> Result<()> {
        *self = Self::new();

        let total = blocks_for(arena.len());
        if total == 0 {
            warn!("Arena of {} bytes too small", arena.len());
            return Err(Error::InvalidParam);
        }

        let bitmap_start = total * FPB_ALLOC_BLOCK_SIZE;
        arena[bitmap_start..bitmap_start + bitmap_bytes(total)].fill(0);

        self.blocks = NonNull::new(arena.as_mut_ptr());
        self.total = total;

        debug!(
            "Allocator: {total} blocks of {FPB_ALLOC_BLOCK_SIZE} bytes, arena {} bytes",
            arena.len()
        );
        Ok(())
    }

    /// Whether [`Self::init()`] has succeeded
    pub fn is_valid(&self) -> bool {
        self.blocks.is_some()
    }

    /// Allocate at least `size` bytes of contiguous blocks.  The returned
    /// pointer is block aligned, relative to the start of the arena.
    ///
    /// Returns `None` if the allocator is invalid, `size` is 0, or there is no
    /// sufficiently long run of free blocks.
    pub fn alloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        let blocks = self.blocks?;
        if size == 0 {
            return None;
        }

        let needed = size.div_ceil(FPB_ALLOC_BLOCK_SIZE);
        if needed > self.total - self.used {
            debug!("Allocator: {needed} blocks requested, {} free", self.total - self.used);
            return None;
        }

        let start = self.find_run(needed)?;
        for n in start..start + needed {
            self.set_bit(n, true);
        }
        self.sizes[start] = needed as u16;
        self.used += needed;

        trace!("Allocator: blocks {start}-{} for {size} bytes", start + needed - 1);

        // SAFETY: start + needed <= total, so within the arena
        NonNull::new(unsafe { blocks.as_ptr().add(start * FPB_ALLOC_BLOCK_SIZE) })
    }

    /// Return an allocation.  Does nothing if `ptr` is null, not the start of
    /// a live allocation, or the allocator is invalid.  Freeing twice is
    /// harmless.
    pub fn free(&mut self, ptr: *mut u8) {
        let Some(start) = self.block_index(ptr) else {
            return;
        };

        // Already free, even if a size record remains
        if !self.bit(start) {
            return;
        }
        let count = self.sizes[start] as usize;
        if count == 0 {
            // Interior block of an allocation
            return;
        }

        let end = (start + count).min(self.total);
        for n in start..end {
            self.set_bit(n, false);
        }
        self.sizes[start] = 0;
        self.used = self.used.saturating_sub(end - start);

        trace!("Allocator: freed blocks {start}-{}", end - 1);
    }

    /// Size of the allocation starting at `ptr`, rounded up to whole blocks.
    /// Returns 0 if `ptr` is not the start of a live allocation.
    pub fn alloc_size(&self, ptr: *const u8) -> usize {
        match self.block_index(ptr) {
            Some(n) if self.bit(n) => self.sizes[n] as usize * FPB_ALLOC_BLOCK_SIZE,
            _ => 0,
        }
    }

    /// Block usage.  All zeros if the allocator is invalid.
    pub fn stats(&self) -> AllocStats {
        if !self.is_valid() {
            return AllocStats::default();
        }
        AllocStats {
            used_blocks: self.used,
            free_blocks: self.total - self.used,
            total_blocks: self.total,
        }
    }
}

impl BlockAllocator<'_> {
    // Block number of a block-aligned pointer within the arena
    fn block_index(&self, ptr: *const u8) -> Option<usize> {
        let blocks = self.blocks?;
        let offset = (ptr as usize).checked_sub(blocks.as_ptr() as usize)?;
        if ptr.is_null() || offset % FPB_ALLOC_BLOCK_SIZE != 0 {
            return None;
        }
        let n = offset / FPB_ALLOC_BLOCK_SIZE;
        (n < self.total).then_some(n)
    }

    fn find_run(&self, needed: usize) -> Option<usize> {
        let mut run = 0;
        for n in 0..self.total {
            if self.bit(n) {
                run = 0;
            } else {
                run += 1;
                if run == needed {
                    return Some(n + 1 - needed);
                }
            }
        }
        None
    }

    fn bitmap_byte(&self, n: usize) -> *mut u8 {
        let Some(blocks) = self.blocks else {
            return core::ptr::null_mut();
        };
        // SAFETY: the bitmap follows the blocks, within the arena, and n is
        // checked against total by every caller
        unsafe {
            blocks
                .as_ptr()
                .add(self.total * FPB_ALLOC_BLOCK_SIZE + n / 8)
        }
    }

    fn bit(&self, n: usize) -> bool {
        let byte = self.bitmap_byte(n);
        if byte.is_null() {
            return false;
        }
        // SAFETY: see bitmap_byte()
        unsafe { byte.read() & (1 << (n % 8)) != 0 }
    }

    fn set_bit(&mut self, n: usize, used: bool) {
        let byte = self.bitmap_byte(n);
        if byte.is_null() {
            return;
        }
        // SAFETY: see bitmap_byte()
        unsafe {
            let value = byte.read();
            let mask = 1 << (n % 8);
            byte.write(if used { value | mask } else { value & !mask });
        }
    }
}
