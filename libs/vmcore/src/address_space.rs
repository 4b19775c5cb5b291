// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

mod region;

use core::fmt;
use core::num::NonZeroUsize;
use core::ops::Range;

use arrayvec::ArrayVec;
pub use region::Region;

use crate::address_range::AddressRangeExt;
use crate::arch::{Arch, PAGE_SIZE};
use crate::error::Error;
use crate::frame_allocator::FrameAllocator;
use crate::kconfig::{MAX_REGIONS, STACK_PAGES, USER_STACK_TOP};
use crate::physmap::PhysMap;
use crate::{MemoryAttributes, PhysicalAddress, VirtualAddress};

const STACK_PAGES_NZ: NonZeroUsize = match NonZeroUsize::new(STACK_PAGES) {
    Some(pages) => pages,
    None => panic!("user stacks must not be empty"),
};

/// The part of an address space a user address resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    /// The n-th static region, in the order they were defined.
    Region(usize),
    Stack,
}

/// A user address space: up to two static regions and a fixed-size stack, each backed by one
/// physically contiguous run of frames.
///
/// The lifecycle follows program loading: regions are defined from the executable's headers,
/// [`AddressSpace::prepare_load`] backs them with zeroed memory, the loader fills them in, and
/// [`AddressSpace::complete_load`] seals the code region. Dropping the address space (or calling
/// [`AddressSpace::destroy`]) hands all frames back to the allocator.
pub struct AddressSpace<F: FrameAllocator> {
    frame_allocator: F,
    physmap: PhysMap,
    regions: ArrayVec<Region, MAX_REGIONS>,
    /// The lowest frame of the stack backing.
    stack: Option<PhysicalAddress>,
    /// Set by `complete_load` if the first region is executable, makes it read-only.
    code_loaded: bool,
}

impl<F: FrameAllocator> fmt::Debug for AddressSpace<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("regions", &self.regions)
            .field("stack", &self.stack)
            .field("code_loaded", &self.code_loaded)
            .finish_non_exhaustive()
    }
}

impl<F: FrameAllocator> AddressSpace<F> {
    /// Creates an empty address space without regions or backing.
    pub fn new(frame_allocator: F, physmap: PhysMap) -> Self {
        Self {
            frame_allocator,
            physmap,
            regions: ArrayVec::new(),
            stack: None,
            code_loaded: false,
        }
    }

    /// Registers a static region covering `[vaddr, vaddr + size)`, widened to page boundaries.
    ///
    /// The first region defined is treated as the code region.
    ///
    /// # Errors
    ///
    /// - [`Error::Unsupported`] if two regions are already defined.
    /// - [`Error::InvalidArgument`] if the region is empty, overflows, or overlaps another region
    ///   or the stack.
    ///
    /// # Panics
    ///
    /// Panics if the address space already has physical backing while a region slot is still
    /// free. That cannot happen through [`AddressSpace::prepare_load`], which requires both.
    pub fn define_region(
        &mut self,
        vaddr: VirtualAddress,
        size: usize,
        attributes: MemoryAttributes,
    ) -> Result<(), Error> {
        if self.regions.is_full() {
            log::warn!("only {MAX_REGIONS} regions are supported, ignoring region at {vaddr}");
            return Err(Error::Unsupported);
        }

        assert!(
            !self.has_backing(),
            "regions must be defined before physical backing is set up"
        );

        let region = Region::new(vaddr, size, attributes)?;

        let stack = stack_range();
        crate::ensure!(
            !region.range().overlaps(&stack)
                && self
                    .regions
                    .iter()
                    .all(|other| !other.range().overlaps(&region.range())),
            Error::InvalidArgument,
            "region {:?} overlaps an existing region or the stack",
            region.range()
        );

        log::trace!("defined region {:?} ({:?})", region.range(), attributes);
        self.regions.push(region);
        Ok(())
    }

    /// Backs both regions and the stack with freshly zeroed physical memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if any of the allocations fail. Whatever was allocated up to
    /// that point stays recorded and is released when the address space is dropped.
    ///
    /// # Panics
    ///
    /// Panics if fewer than two regions are defined or if backing already exists.
    pub fn prepare_load(&mut self) -> Result<(), Error> {
        assert!(
            self.regions.is_full(),
            "both regions must be defined before loading"
        );
        assert!(
            !self.has_backing(),
            "address space already has physical backing"
        );

        for region in &mut self.regions {
            let frame = self
                .frame_allocator
                .allocate_contiguous_zeroed(region.pages(), &self.physmap)?;
            region.set_backing(frame);
        }

        let stack = self
            .frame_allocator
            .allocate_contiguous_zeroed(STACK_PAGES_NZ, &self.physmap)?;
        self.stack = Some(stack);

        Ok(())
    }

    /// Finishes program loading. If the first region is executable it becomes read-only from
    /// here on, every later write to it faults.
    pub fn complete_load(&mut self) {
        self.code_loaded = self
            .regions
            .first()
            .is_some_and(|region| region.attributes().allows_execution());
    }

    /// Returns the initial user stack pointer.
    ///
    /// # Panics
    ///
    /// Panics if the stack has no backing yet.
    pub fn define_stack(&self) -> VirtualAddress {
        assert!(self.stack.is_some(), "stack has no physical backing");
        USER_STACK_TOP
    }

    /// Creates a new address space with the same geometry and a byte-for-byte copy of all
    /// contents, backed by its own frames.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the copy cannot be backed. Nothing is leaked in that case.
    ///
    /// # Panics
    ///
    /// Panics if `self` is not fully backed.
    pub fn copy(&self) -> Result<Self, Error>
    where
        F: Clone,
    {
        assert!(self.is_loaded(), "cannot copy an address space that is not loaded");

        let mut new = Self::new(self.frame_allocator.clone(), self.physmap.clone());
        for region in &self.regions {
            new.regions.push(region.unbacked());
        }
        // on failure `new` is dropped, releasing whatever it got
        new.prepare_load()?;

        for (src, dst) in self.regions.iter().zip(new.regions.iter()) {
            if let (Some(from), Some(to)) = (src.backing(), dst.backing()) {
                self.copy_frames(from, to, src.pages().get());
            }
        }
        if let (Some(from), Some(to)) = (self.stack, new.stack) {
            self.copy_frames(from, to, STACK_PAGES);
        }

        new.code_loaded = self.code_loaded;
        Ok(new)
    }

    fn copy_frames(&self, from: PhysicalAddress, to: PhysicalAddress, pages: usize) {
        let src = self.physmap.phys_to_virt(from);
        let dst = self.physmap.phys_to_virt(to);

        // Safety: both runs are owned by live address spaces, are distinct allocations and are
        // therefore non-overlapping, and are mapped by the physmap
        unsafe {
            core::ptr::copy_nonoverlapping(src.as_ptr(), dst.as_mut_ptr(), pages * PAGE_SIZE);
        }
    }

    /// Releases all physical backing. Same as dropping the address space.
    pub fn destroy(self) {
        drop(self);
    }

    /// Makes this the address space of the current CPU by invalidating every TLB entry. The new
    /// translations are loaded lazily on TLB misses.
    pub fn activate<A: Arch + ?Sized>(&self, arch: &A) {
        arch.tlb_invalidate_all();
    }

    /// Nothing to do, the next `activate` invalidates the TLB.
    pub fn deactivate<A: Arch + ?Sized>(&self, _arch: &A) {}

    /// Resolves the user address `addr` to the frame backing its page, checking the first region,
    /// then the second, then the stack.
    pub fn translate(&self, addr: VirtualAddress) -> Option<(PhysicalAddress, Segment)> {
        let page = addr.align_down(PAGE_SIZE);

        for (index, region) in self.regions.iter().enumerate() {
            if let Some(frame) = region.translate(page) {
                return Some((frame, Segment::Region(index)));
            }
        }

        let stack = stack_range();
        if stack.contains(&page) {
            let offset = page.offset_from_unsigned(stack.start);
            return self.stack.map(|base| (base.add(offset), Segment::Stack));
        }

        None
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// The lowest frame of the stack backing, if there is one.
    pub fn stack_backing(&self) -> Option<PhysicalAddress> {
        self.stack
    }

    /// Returns `true` if both regions and the stack are backed.
    pub fn is_loaded(&self) -> bool {
        self.regions.is_full()
            && self.regions.iter().all(|region| region.backing().is_some())
            && self.stack.is_some()
    }

    /// Returns `true` if the first region has been sealed as read-only code.
    pub fn is_code_loaded(&self) -> bool {
        self.code_loaded
    }

    pub fn physmap(&self) -> &PhysMap {
        &self.physmap
    }

    fn has_backing(&self) -> bool {
        self.stack.is_some() || self.regions.iter().any(|region| region.backing().is_some())
    }
}

impl<F: FrameAllocator> Drop for AddressSpace<F> {
    fn drop(&mut self) {
        let backings = self
            .regions
            .iter_mut()
            .filter_map(Region::take_backing)
            .chain(self.stack.take());

        for frame in backings {
            log::trace!("releasing address space backing at {frame}");

            // Safety: the frames were only reachable through this address space. User mappings of
            // them only live in the TLB while it is active, and the TLB is invalidated whenever
            // another address space is activated before returning to user mode.
            unsafe {
                self.frame_allocator.deallocate(frame);
            }
        }
    }
}

/// The user virtual range covered by every stack.
pub fn stack_range() -> Range<VirtualAddress> {
    USER_STACK_TOP.sub(STACK_PAGES * PAGE_SIZE)..USER_STACK_TOP
}

#[cfg(test)]
mod tests {
    use std::vec::Vec;

    use super::*;
    use crate::MIB;
    use crate::test_utils::{Machine, TestPhysicalMemory};

    fn text() -> MemoryAttributes {
        MemoryAttributes::from_flags(true, false, true)
    }

    fn data() -> MemoryAttributes {
        MemoryAttributes::from_flags(true, true, false)
    }

    fn aspace(machine: &Machine) -> AddressSpace<&TestPhysicalMemory> {
        let pm = machine.booted_physical_memory();
        AddressSpace::new(pm, pm.physmap().clone())
    }

    fn used(machine: &Machine) -> usize {
        machine.booted_physical_memory().usage().unwrap().used
    }

    #[test_log::test]
    fn third_region_is_unsupported() {
        let machine = Machine::builder().with_memory(MIB).build();
        let mut aspace = aspace(&machine);

        aspace
            .define_region(VirtualAddress::new(0x0040_0000), 0x1000, text())
            .unwrap();
        aspace
            .define_region(VirtualAddress::new(0x1000_0000), 0x1000, data())
            .unwrap();

        let err = aspace
            .define_region(VirtualAddress::new(0x2000_0000), 0x1000, data())
            .unwrap_err();
        assert_eq!(err, Error::Unsupported);
        assert_eq!(err.errno(), crate::error::EUNIMP);
        assert_eq!(aspace.regions().len(), 2);
    }

    #[test_log::test]
    fn third_region_after_load_is_unsupported() {
        let machine = Machine::builder().with_memory(MIB).build();
        let mut aspace = machine.loaded_address_space(1, 1);
        let regions: Vec<_> = aspace.regions().iter().map(Region::range).collect();

        assert_eq!(
            aspace.define_region(VirtualAddress::new(0x2000_0000), 0x1000, data()),
            Err(Error::Unsupported)
        );
        assert!(aspace.is_loaded());
        assert_eq!(
            aspace.regions().iter().map(Region::range).collect::<Vec<_>>(),
            regions
        );
    }

    #[test_log::test]
    fn overlapping_regions_are_rejected() {
        let machine = Machine::builder().with_memory(MIB).build();
        let mut aspace = aspace(&machine);

        aspace
            .define_region(VirtualAddress::new(0x0040_0000), 0x2000, text())
            .unwrap();
        assert_eq!(
            aspace.define_region(VirtualAddress::new(0x0040_1800), 0x10, data()),
            Err(Error::InvalidArgument)
        );
        assert_eq!(
            aspace.define_region(VirtualAddress::new(0x7fff_f000), 0x10, data()),
            Err(Error::InvalidArgument)
        );
        assert_eq!(aspace.regions().len(), 1);
    }

    #[test_log::test]
    #[should_panic(expected = "both regions must be defined")]
    fn prepare_load_requires_two_regions() {
        let machine = Machine::builder().with_memory(MIB).build();
        let mut aspace = aspace(&machine);

        aspace
            .define_region(VirtualAddress::new(0x0040_0000), 0x1000, text())
            .unwrap();
        let _ = aspace.prepare_load();
    }

    #[test_log::test]
    #[should_panic(expected = "already has physical backing")]
    fn prepare_load_twice_panics() {
        let machine = Machine::builder().with_memory(MIB).build();
        let mut aspace = machine.loaded_address_space(1, 1);

        let _ = aspace.prepare_load();
    }

    #[test_log::test]
    fn prepare_load_zero_fills() {
        let machine = Machine::builder().with_memory(MIB).build();
        let before = used(&machine);
        let aspace = machine.loaded_address_space(2, 3);

        assert!(aspace.is_loaded());
        assert_eq!(used(&machine), before + 2 + 3 + STACK_PAGES);

        for region in aspace.regions() {
            let frame = region.backing().unwrap();
            assert!(
                machine
                    .read_phys(frame, region.pages().get() * PAGE_SIZE)
                    .iter()
                    .all(|b| *b == 0)
            );
        }
        let stack = aspace.stack_backing().unwrap();
        assert!(
            machine
                .read_phys(stack, STACK_PAGES * PAGE_SIZE)
                .iter()
                .all(|b| *b == 0)
        );
    }

    #[test_log::test]
    fn prepare_load_out_of_memory_is_destroy_safe() {
        // room for the regions, but not for the stack
        let machine = Machine::builder().with_memory(16 * PAGE_SIZE).build();
        let before = used(&machine);
        let mut aspace = aspace(&machine);

        aspace
            .define_region(VirtualAddress::new(0x0040_0000), 2 * PAGE_SIZE, text())
            .unwrap();
        aspace
            .define_region(VirtualAddress::new(0x1000_0000), 2 * PAGE_SIZE, data())
            .unwrap();

        assert_eq!(aspace.prepare_load(), Err(Error::OutOfMemory));
        assert!(!aspace.is_loaded());
        assert!(aspace.regions().iter().all(|r| r.backing().is_some()));

        aspace.destroy();
        assert_eq!(used(&machine), before);
    }

    #[test_log::test]
    fn define_stack() {
        let machine = Machine::builder().with_memory(MIB).build();
        let aspace = machine.loaded_address_space(1, 1);

        assert_eq!(aspace.define_stack(), VirtualAddress::new(0x8000_0000));
        assert_eq!(stack_range().start, VirtualAddress::new(0x8000_0000 - 12 * PAGE_SIZE));
    }

    #[test_log::test]
    fn complete_load_marks_executable_code() {
        let machine = Machine::builder().with_memory(MIB).build();
        let mut aspace = machine.loaded_address_space(1, 1);

        assert!(!aspace.is_code_loaded());
        aspace.complete_load();
        assert!(aspace.is_code_loaded());
    }

    #[test_log::test]
    fn complete_load_ignores_non_executable_first_region() {
        let machine = Machine::builder().with_memory(MIB).build();
        let mut aspace = aspace(&machine);

        aspace
            .define_region(VirtualAddress::new(0x0040_0000), 0x1000, data())
            .unwrap();
        aspace
            .define_region(VirtualAddress::new(0x1000_0000), 0x1000, data())
            .unwrap();
        aspace.prepare_load().unwrap();
        aspace.complete_load();

        assert!(!aspace.is_code_loaded());
    }

    #[test_log::test]
    fn translate_order() {
        let machine = Machine::builder().with_memory(MIB).build();
        let aspace = machine.loaded_address_space(2, 1);

        let code = aspace.regions()[0].backing().unwrap();
        let (frame, segment) = aspace.translate(VirtualAddress::new(0x0040_1abc)).unwrap();
        assert_eq!(frame, code.add(PAGE_SIZE));
        assert_eq!(segment, Segment::Region(0));

        let (_, segment) = aspace.translate(VirtualAddress::new(0x1000_0000)).unwrap();
        assert_eq!(segment, Segment::Region(1));

        let stack = aspace.stack_backing().unwrap();
        let (frame, segment) = aspace.translate(VirtualAddress::new(0x7fff_fffc)).unwrap();
        assert_eq!(frame, stack.add((STACK_PAGES - 1) * PAGE_SIZE));
        assert_eq!(segment, Segment::Stack);

        assert_eq!(aspace.translate(VirtualAddress::new(0x0060_0000)), None);
        assert_eq!(aspace.translate(stack_range().start.sub(1)), None);
    }

    #[test_log::test]
    fn copy_duplicates_contents() {
        let machine = Machine::builder().with_memory(MIB).build();
        let mut aspace = machine.loaded_address_space(1, 2);
        aspace.complete_load();

        let code = aspace.regions()[0].backing().unwrap();
        let data = aspace.regions()[1].backing().unwrap();
        let stack = aspace.stack_backing().unwrap();
        machine.write_phys(code, b"code");
        machine.write_phys(data.add(PAGE_SIZE + 7), b"data");
        machine.write_phys(stack.add(STACK_PAGES * PAGE_SIZE - 5), b"stack");

        let before = used(&machine);
        let copy = aspace.copy().unwrap();
        assert_eq!(used(&machine), before + 1 + 2 + STACK_PAGES);

        assert_eq!(copy.regions()[0].range(), aspace.regions()[0].range());
        assert_eq!(copy.regions()[1].range(), aspace.regions()[1].range());
        assert!(copy.is_code_loaded());

        let copy_code = copy.regions()[0].backing().unwrap();
        let copy_data = copy.regions()[1].backing().unwrap();
        let copy_stack = copy.stack_backing().unwrap();
        assert_ne!(copy_code, code);
        assert_eq!(machine.read_phys(copy_code, 4), b"code");
        assert_eq!(machine.read_phys(copy_data.add(PAGE_SIZE + 7), 4), b"data");
        assert_eq!(
            machine.read_phys(copy_stack.add(STACK_PAGES * PAGE_SIZE - 5), 5),
            b"stack"
        );

        // the copy is independent, in both directions
        machine.write_phys(copy_code, b"CODE");
        assert_eq!(machine.read_phys(code, 4), b"code");
        machine.write_phys(data.add(PAGE_SIZE + 7), b"DATA");
        assert_eq!(machine.read_phys(copy_data.add(PAGE_SIZE + 7), 4), b"data");
    }

    #[test_log::test]
    fn failed_copy_leaks_nothing() {
        let machine = Machine::builder().with_memory(40 * PAGE_SIZE).build();
        let aspace = machine.loaded_address_space(4, 4);
        let before = used(&machine);

        assert_eq!(aspace.copy().unwrap_err(), Error::OutOfMemory);
        assert_eq!(used(&machine), before);
    }

    #[test_log::test]
    fn destroy_releases_everything() {
        let machine = Machine::builder().with_memory(MIB).build();
        let before = used(&machine);

        let aspace = machine.loaded_address_space(3, 5);
        assert_eq!(used(&machine), before + 3 + 5 + STACK_PAGES);

        aspace.destroy();
        assert_eq!(used(&machine), before);
    }

    #[test_log::test]
    fn activate_invalidates_tlb() {
        let machine = Machine::builder().with_memory(MIB).build();
        let aspace = machine.loaded_address_space(1, 1);
        let arch = machine.arch();

        machine.fill_tlb_with_valid_entries();
        aspace.activate(&arch);

        assert!(machine.tlb_snapshot().iter().all(|entry| !entry.is_valid()));
        assert!(machine.interrupts_enabled());
        assert_eq!(machine.tlb_writes_with_interrupts_enabled(), 0);

        aspace.deactivate(&arch);
    }
}
