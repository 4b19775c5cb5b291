// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::num::NonZeroUsize;
use core::ops::Range;

use crate::address_range::AddressRangeExt;
use crate::arch::PAGE_SIZE;
use crate::frame_allocator::AllocError;
use crate::PhysicalAddress;

/// Simple bump allocator (cannot free) that hands out physical frames before the coremap exists.
///
/// Allocations are carved off the bottom of the usable range so that whatever is left over stays
/// one contiguous range, which the coremap later takes over through [`BootstrapAllocator::take_free_region`].
#[derive(Debug)]
pub struct BootstrapAllocator {
    /// The page-aligned range of usable physical memory.
    range: Range<PhysicalAddress>,
    /// Everything below this has been handed out.
    frontier: PhysicalAddress,
}

impl BootstrapAllocator {
    /// Constructs a new bootstrap allocator for the usable physical memory `range`. Partial pages
    /// at either end of the range are ignored.
    pub fn new(range: Range<PhysicalAddress>) -> Self {
        let range = range.align_in(PAGE_SIZE);

        Self {
            frontier: range.start,
            range,
        }
    }

    /// Allocates `pages` contiguous frames directly above everything handed out so far.
    ///
    /// # Errors
    ///
    /// Returns `Err` if fewer than `pages` frames remain. Nothing is handed out in that case.
    pub fn allocate(&mut self, pages: NonZeroUsize) -> Result<PhysicalAddress, AllocError> {
        let requested = pages.get().checked_mul(PAGE_SIZE).ok_or(AllocError)?;
        let remaining = self.free_region().len();

        if requested > remaining {
            log::warn!(
                "bootstrap allocator exhausted: requested {} pages, {} remaining",
                pages,
                remaining / PAGE_SIZE
            );
            return Err(AllocError);
        }

        let frame = self.frontier;
        self.frontier = frame.add(requested);

        log::trace!("bootstrap allocated {pages} pages at {frame}");
        Ok(frame)
    }

    /// Returns the range that has not been handed out yet.
    pub fn free_region(&self) -> Range<PhysicalAddress> {
        self.frontier..self.range.end
    }

    /// Returns the range that has been handed out so far.
    pub fn used_region(&self) -> Range<PhysicalAddress> {
        self.range.start..self.frontier
    }

    /// Returns the number of allocated bytes.
    pub fn usage(&self) -> usize {
        self.used_region().len()
    }

    /// Hands the remaining free range over to the caller. The allocator is exhausted afterwards.
    pub fn take_free_region(&mut self) -> Range<PhysicalAddress> {
        let free = self.free_region();
        self.frontier = self.range.end;
        free
    }
}
