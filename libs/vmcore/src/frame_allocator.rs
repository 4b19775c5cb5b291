// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::num::NonZeroUsize;

use crate::PhysicalAddress;
use crate::arch::PAGE_SIZE;
use crate::physmap::PhysMap;

/// The `AllocError` error indicates a frame allocation failure, either because physical memory is
/// exhausted or because no contiguous run of the requested length exists.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AllocError;

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("physical memory allocation failed")
    }
}

impl core::error::Error for AllocError {}

/// Frame accounting of a physical memory allocator.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameUsage {
    /// Frames that are currently not available, including the ones holding allocator metadata.
    pub used: usize,
    /// All frames managed by the allocator.
    pub total: usize,
}

/// An allocator of contiguous runs of physical page frames.
///
/// # Safety
///
/// Blocks handed out by an allocator must be page-aligned, must point to valid memory reachable
/// through the kernel's [`PhysMap`], and must not be handed out again until they are deallocated.
/// Copying, cloning, or moving the allocator must not invalidate blocks returned from it.
pub unsafe trait FrameAllocator {
    /// Attempts to allocate `pages` physically contiguous frames.
    ///
    /// # Errors
    ///
    /// Returning `Err` indicates that no run of `pages` free frames exists.
    fn allocate_contiguous(&self, pages: NonZeroUsize) -> Result<PhysicalAddress, AllocError>;

    /// Like [`FrameAllocator::allocate_contiguous`] but the returned frames are filled with zeroes.
    ///
    /// # Errors
    ///
    /// Returning `Err` indicates that no run of `pages` free frames exists.
    fn allocate_contiguous_zeroed(
        &self,
        pages: NonZeroUsize,
        physmap: &PhysMap,
    ) -> Result<PhysicalAddress, AllocError> {
        let frame = self.allocate_contiguous(pages)?;

        let virt = physmap.phys_to_virt(frame);

        // Safety: the block was just handed out to us, so nobody else is accessing it, and it is
        // reachable through the physical memory map
        unsafe {
            core::ptr::write_bytes(virt.as_mut_ptr(), 0, pages.get() * PAGE_SIZE);
        }

        Ok(frame)
    }

    /// Deallocates the block that starts at `block`. Addresses that don't start a live block are
    /// ignored.
    ///
    /// # Safety
    ///
    /// The memory of the block must not be accessed anymore after this call.
    unsafe fn deallocate(&self, block: PhysicalAddress);
}

// Safety: we just forward to the inner implementation
unsafe impl<F> FrameAllocator for &F
where
    F: FrameAllocator + ?Sized,
{
    fn allocate_contiguous(&self, pages: NonZeroUsize) -> Result<PhysicalAddress, AllocError> {
        F::allocate_contiguous(self, pages)
    }

    fn allocate_contiguous_zeroed(
        &self,
        pages: NonZeroUsize,
        physmap: &PhysMap,
    ) -> Result<PhysicalAddress, AllocError> {
        F::allocate_contiguous_zeroed(self, pages, physmap)
    }

    unsafe fn deallocate(&self, block: PhysicalAddress) {
        // Safety: ensured by caller
        unsafe { F::deallocate(self, block) }
    }
}
