// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::ops::Range;

use crate::{PhysicalAddress, VirtualAddress};

/// The kernel's direct mapping of physical memory.
///
/// Every frame handed out by the frame allocator is reachable by the kernel through this mapping,
/// which is how frames are zeroed, how the coremap is written and how address spaces are copied.
/// On MIPS this is the KSEG0 window; in tests it is a host allocation standing in for RAM.
#[derive(Debug, Clone)]
pub struct PhysMap {
    translation_offset: usize,
    range: Range<PhysicalAddress>,
}

impl PhysMap {
    /// Construct a new `PhysMap` in which `range.start` is visible to the kernel at `physmap_start`
    /// and every other address in `range` at the same offset from it.
    pub fn new(physmap_start: VirtualAddress, range: Range<PhysicalAddress>) -> Self {
        // wraps when the mapping lies below the physical range (e.g. host-backed test memory)
        let translation_offset = physmap_start.get().wrapping_sub(range.start.get());

        Self {
            translation_offset,
            range,
        }
    }

    /// The physical range covered by this mapping.
    pub fn range(&self) -> Range<PhysicalAddress> {
        self.range.clone()
    }

    /// Translates a `PhysicalAddress` to a `VirtualAddress` through this `PhysMap`.
    #[expect(clippy::missing_panics_doc, reason = "internal assert")]
    #[inline]
    pub fn phys_to_virt(&self, phys: PhysicalAddress) -> VirtualAddress {
        debug_assert!(
            self.range.start <= phys && phys <= self.range.end,
            "physical address is not mapped in physical memory mapping. this is a bug! physmap={self:#x?},phys={phys:?}"
        );

        VirtualAddress::new(phys.get().wrapping_add(self.translation_offset))
    }

    /// Translates a kernel `VirtualAddress` inside this mapping back to its `PhysicalAddress`.
    #[expect(clippy::missing_panics_doc, reason = "internal assert")]
    #[inline]
    pub fn virt_to_phys(&self, virt: VirtualAddress) -> PhysicalAddress {
        let phys = PhysicalAddress::new(virt.get().wrapping_sub(self.translation_offset));

        debug_assert!(
            self.range.start <= phys && phys <= self.range.end,
            "virtual address is not part of the physical memory mapping. this is a bug! physmap={self:#x?},virt={virt:?}"
        );

        phys
    }
}
