// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::alloc::{Layout, alloc, dealloc};
use std::fmt;
use std::ops::Range;
use std::ptr::NonNull;
use std::vec::Vec;

use crate::address_range::AddressRangeExt;
use crate::arch::PAGE_SIZE;
use crate::{PhysMap, PhysicalAddress, VirtualAddress};

/// Byte that fresh emulated memory is filled with, so that missing zero-fills show up in tests.
pub const POISON: u8 = 0xa5;

/// A host allocation standing in for a contiguous range of physical memory.
///
/// Physical addresses are made up: the range starts at whatever base the test picks, which keeps
/// them small enough for the 20-bit frame numbers of TLB entries.
pub struct Memory {
    ptr: NonNull<u8>,
    layout: Layout,
    phys_base: PhysicalAddress,
}

// Safety: the allocation is owned by `Memory`, access is synchronized by the code under test
unsafe impl Send for Memory {}
// Safety: see above
unsafe impl Sync for Memory {}

impl Drop for Memory {
    fn drop(&mut self) {
        // Safety: allocated in `new` with the same layout
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory")
            .field("phys", &self.phys_range())
            .field("host", &self.ptr)
            .finish_non_exhaustive()
    }
}

impl Memory {
    /// Allocates `size` bytes of emulated physical memory starting at `phys_base`.
    pub fn new(phys_base: PhysicalAddress, size: usize) -> Self {
        assert!(phys_base.is_page_aligned(), "physical base must be page aligned");
        assert!(size > 0, "memory must not be empty");

        let layout = Layout::from_size_align(size, PAGE_SIZE).unwrap();
        // Safety: the layout has a non-zero size
        let ptr = NonNull::new(unsafe { alloc(layout) }).unwrap();
        // Safety: we just allocated `size` bytes
        unsafe { ptr.as_ptr().write_bytes(POISON, size) };

        Self {
            ptr,
            layout,
            phys_base,
        }
    }

    pub fn phys_range(&self) -> Range<PhysicalAddress> {
        Range::from_start_len(self.phys_base, self.layout.size())
    }

    /// The mapping through which the kernel reaches this memory.
    pub fn physmap(&self) -> PhysMap {
        PhysMap::new(VirtualAddress::from_mut_ptr(self.ptr.as_ptr()), self.phys_range())
    }

    fn host_ptr(&self, phys: PhysicalAddress, len: usize) -> *mut u8 {
        let range = self.phys_range();
        assert!(
            range.contains(&phys) && phys.add(len) <= range.end,
            "{phys} size {len:#x} outside of memory {range:?}"
        );

        // Safety: bounds checked above
        unsafe { self.ptr.as_ptr().add(phys.offset_from_unsigned(self.phys_base)) }
    }

    pub fn read(&self, phys: PhysicalAddress, len: usize) -> Vec<u8> {
        let ptr = self.host_ptr(phys, len);
        // Safety: bounds checked by `host_ptr`, the memory is always initialized
        unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec()
    }

    pub fn write(&self, phys: PhysicalAddress, bytes: &[u8]) {
        let ptr = self.host_ptr(phys, bytes.len());
        // Safety: bounds checked by `host_ptr`
        unsafe { ptr.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len()) }
    }
}
