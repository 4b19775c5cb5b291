// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The coremap: one bookkeeping record per physical frame, stored in the frames it describes.
//!
//! At bootstrap the coremap claims the lowest frames of the managed range for its own record
//! array ("meta frames"). Those frames are marked unavailable and carry no owner, so they can
//! never be freed. Every other frame starts out available.
//!
//! Allocations are first-fit: the record array is scanned once from the bottom while counting
//! consecutive available frames, and the first run that reaches the requested length is claimed.
//! Each frame in a run records the address of the run's first frame as its owner, which is all
//! that is needed to release the whole run again given only its base address.

use core::fmt;
use core::num::NonZeroUsize;
use core::ops::Range;
use core::ptr::NonNull;

use crate::address_range::AddressRangeExt;
use crate::arch::PAGE_SIZE;
use crate::frame_allocator::{AllocError, FrameUsage};
use crate::physmap::PhysMap;
use crate::PhysicalAddress;

/// The bookkeeping record of a single physical frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// The physical address of the frame.
    addr: PhysicalAddress,
    /// The base address of the run this frame belongs to, if it is allocated.
    owner: Option<PhysicalAddress>,
    available: bool,
}

impl Frame {
    pub const fn addr(&self) -> PhysicalAddress {
        self.addr
    }

    pub const fn owner(&self) -> Option<PhysicalAddress> {
        self.owner
    }

    pub const fn is_available(&self) -> bool {
        self.available
    }

    /// Returns `true` if this frame holds coremap records and can never be allocated.
    pub const fn is_reserved(&self) -> bool {
        !self.available && self.owner.is_none()
    }
}

pub struct Coremap {
    frames: NonNull<[Frame]>,
    meta_frames: usize,
    free_frames: usize,
}

// Safety: the coremap exclusively owns the memory its record array lives in, nothing else holds
// a pointer to it, so moving it to another thread is fine.
unsafe impl Send for Coremap {}

impl fmt::Debug for Coremap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coremap")
            .field("range", &self.range())
            .field("frames", &self.frames.len())
            .field("meta_frames", &self.meta_frames)
            .field("free_frames", &self.free_frames)
            .finish_non_exhaustive()
    }
}

impl Coremap {
    /// Builds the coremap for `range`, placing its record array at the start of the range.
    ///
    /// # Safety
    ///
    /// The caller must give up all ownership of `range`: the coremap writes its records to the
    /// beginning of it and hands out the rest. `range` must be reachable through `physmap`, and
    /// must stay valid for as long as the coremap (or any block allocated from it) lives.
    ///
    /// # Panics
    ///
    /// Panics if `range` is too small to hold its own records and at least one allocatable frame.
    pub unsafe fn bootstrap(range: Range<PhysicalAddress>, physmap: &PhysMap) -> Self {
        let range = range.align_in(PAGE_SIZE);
        let total = range.pages();
        let meta_frames = (total * size_of::<Frame>()).div_ceil(PAGE_SIZE);

        assert!(
            meta_frames < total,
            "not enough physical memory to hold the coremap ({total} frames, {meta_frames} needed for records)"
        );

        #[expect(
            clippy::cast_ptr_alignment,
            reason = "the range is page-aligned, which exceeds the alignment of Frame"
        )]
        let base = physmap.phys_to_virt(range.start).as_mut_ptr().cast::<Frame>();
        debug_assert!(base.is_aligned());

        for i in 0..total {
            let addr = range.start.add(i * PAGE_SIZE);
            let available = i >= meta_frames;

            // Safety: `base` points to the start of memory we own exclusively, and the record
            // array covers less than the whole range (asserted above)
            unsafe {
                base.add(i).write(Frame {
                    addr,
                    owner: None,
                    available,
                });
            }
        }

        // Safety: `base` is derived from a mapped physical range and therefore never null
        let base = unsafe { NonNull::new_unchecked(base) };

        log::debug!(
            "coremap covers {range:?}: {total} frames, {meta_frames} reserved for records"
        );

        Self {
            frames: NonNull::slice_from_raw_parts(base, total),
            meta_frames,
            free_frames: total - meta_frames,
        }
    }

    #[inline]
    pub fn frames(&self) -> &[Frame] {
        // Safety: the record array was fully initialized in `bootstrap` and we hand out shared
        // references only through `&self`
        unsafe { self.frames.as_ref() }
    }

    #[inline]
    fn frames_mut(&mut self) -> &mut [Frame] {
        // Safety: see `frames`, `&mut self` guarantees exclusive access
        unsafe { self.frames.as_mut() }
    }

    /// The total number of frames described, including the reserved ones.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The number of frames holding the record array.
    pub fn meta_frames(&self) -> usize {
        self.meta_frames
    }

    /// The number of frames currently available for allocation.
    pub fn free_frames(&self) -> usize {
        self.free_frames
    }

    /// The physical range described by this coremap.
    pub fn range(&self) -> Range<PhysicalAddress> {
        let frames = self.frames();
        match (frames.first(), frames.last()) {
            (Some(first), Some(last)) => first.addr..last.addr.add(PAGE_SIZE),
            _ => PhysicalAddress::MIN..PhysicalAddress::MIN,
        }
    }

    pub fn usage(&self) -> FrameUsage {
        FrameUsage {
            used: self.len() - self.free_frames,
            total: self.len(),
        }
    }

    /// Returns the record of the frame at `addr`, if it is described by this coremap.
    pub fn frame(&self, addr: PhysicalAddress) -> Option<&Frame> {
        self.index_of(addr).map(|index| &self.frames()[index])
    }

    fn index_of(&self, addr: PhysicalAddress) -> Option<usize> {
        let first = self.frames().first()?.addr;
        if addr < first || !addr.is_page_aligned() {
            return None;
        }

        let index = addr.offset_from_unsigned(first) / PAGE_SIZE;
        (index < self.len()).then_some(index)
    }

    /// Allocates the lowest run of `pages` consecutive available frames.
    ///
    /// # Errors
    ///
    /// Returns `Err` if no such run exists. The coremap is left unchanged in that case.
    pub fn allocate(&mut self, pages: NonZeroUsize) -> Result<PhysicalAddress, AllocError> {
        let pages = pages.get();

        if pages > self.free_frames {
            log::trace!(
                "coremap cannot satisfy {pages} pages, only {} free",
                self.free_frames
            );
            return Err(AllocError);
        }

        let Some(start) = self.find_run(pages) else {
            log::trace!("coremap has no contiguous run of {pages} pages");
            return Err(AllocError);
        };

        let run = &mut self.frames_mut()[start..start + pages];
        let base = run[0].addr;
        for frame in run {
            frame.available = false;
            frame.owner = Some(base);
        }
        self.free_frames -= pages;

        log::trace!("coremap allocated {pages} pages at {base}");
        Ok(base)
    }

    /// Scans the record array once, returning the index of the first frame of the lowest run of
    /// `pages` available frames.
    fn find_run(&self, pages: usize) -> Option<usize> {
        let mut run = 0;

        for (index, frame) in self.frames().iter().enumerate() {
            if frame.available {
                run += 1;
                if run == pages {
                    return Some(index + 1 - pages);
                }
            } else {
                run = 0;
            }
        }

        None
    }

    /// Releases the run whose first frame is `base`, returning the number of frames released.
    ///
    /// Addresses that don't start a live run (including reserved frames and runs that were
    /// already released) release nothing.
    pub fn deallocate(&mut self, base: PhysicalAddress) -> usize {
        let Some(start) = self.index_of(base) else {
            return 0;
        };

        let mut released = 0;
        for frame in &mut self.frames_mut()[start..] {
            if frame.owner != Some(base) {
                break;
            }

            frame.owner = None;
            frame.available = true;
            released += 1;
        }
        self.free_frames += released;

        if released > 0 {
            log::trace!("coremap released {released} pages at {base}");
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use std::vec::Vec;

    use proptest::prelude::*;

    use super::*;
    use crate::test_utils::Memory;
    use crate::test_utils::proptest::{AllocOp, alloc_ops};
    use crate::MIB;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn coremap(memory: &Memory) -> Coremap {
        // Safety: the memory is owned by the test and outlives the coremap
        unsafe { Coremap::bootstrap(memory.phys_range(), &memory.physmap()) }
    }

    fn expected_meta_frames(total: usize) -> usize {
        (total * size_of::<Frame>()).div_ceil(PAGE_SIZE)
    }

    #[test_log::test]
    fn reserves_meta_frames() {
        let memory = Memory::new(PhysicalAddress::new(0x0010_0000), MIB);
        let coremap = coremap(&memory);

        let meta = expected_meta_frames(256);
        assert_eq!(coremap.len(), 256);
        assert_eq!(coremap.meta_frames(), meta);
        assert_eq!(coremap.free_frames(), 256 - meta);

        for (index, frame) in coremap.frames().iter().enumerate() {
            assert_eq!(frame.addr(), PhysicalAddress::new(0x0010_0000 + index * PAGE_SIZE));
            assert_eq!(frame.is_reserved(), index < meta);
            assert_eq!(frame.is_available(), index >= meta);
        }
    }

    #[test_log::test]
    fn first_fit_from_the_bottom() {
        let memory = Memory::new(PhysicalAddress::new(0x0010_0000), MIB);
        let mut coremap = coremap(&memory);
        let first_free = PhysicalAddress::new(0x0010_0000 + coremap.meta_frames() * PAGE_SIZE);

        let a = coremap.allocate(nz(1)).unwrap();
        let b = coremap.allocate(nz(3)).unwrap();

        assert_eq!(a, first_free);
        assert_eq!(b, first_free.add(PAGE_SIZE));
        for i in 0..3 {
            let frame = coremap.frame(b.add(i * PAGE_SIZE)).unwrap();
            assert_eq!(frame.owner(), Some(b));
            assert!(!frame.is_available());
        }
    }

    #[test_log::test]
    fn freed_hole_is_reused() {
        let memory = Memory::new(PhysicalAddress::new(0x0010_0000), MIB);
        let mut coremap = coremap(&memory);

        let a = coremap.allocate(nz(2)).unwrap();
        let b = coremap.allocate(nz(2)).unwrap();
        let _c = coremap.allocate(nz(2)).unwrap();

        assert_eq!(coremap.deallocate(b), 2);

        // too big for the hole, goes above
        let d = coremap.allocate(nz(3)).unwrap();
        assert!(d > b);
        // fits exactly
        assert_eq!(coremap.allocate(nz(2)).unwrap(), b);
        assert_ne!(a, b);
    }

    #[test_log::test]
    fn adjacent_runs_are_freed_independently() {
        let memory = Memory::new(PhysicalAddress::new(0x0010_0000), MIB);
        let mut coremap = coremap(&memory);

        let a = coremap.allocate(nz(2)).unwrap();
        let b = coremap.allocate(nz(2)).unwrap();
        assert_eq!(b, a.add(2 * PAGE_SIZE));

        assert_eq!(coremap.deallocate(a), 2);
        for i in 0..2 {
            assert_eq!(coremap.frame(b.add(i * PAGE_SIZE)).unwrap().owner(), Some(b));
        }
    }

    #[test_log::test]
    fn free_is_idempotent() {
        let memory = Memory::new(PhysicalAddress::new(0x0010_0000), MIB);
        let mut coremap = coremap(&memory);

        let a = coremap.allocate(nz(4)).unwrap();
        let free = coremap.free_frames();

        assert_eq!(coremap.deallocate(a), 4);
        assert_eq!(coremap.deallocate(a), 0);
        assert_eq!(coremap.free_frames(), free + 4);
    }

    #[test_log::test]
    fn free_of_unknown_addresses_is_ignored() {
        let memory = Memory::new(PhysicalAddress::new(0x0010_0000), MIB);
        let mut coremap = coremap(&memory);
        let a = coremap.allocate(nz(4)).unwrap();
        let free = coremap.free_frames();

        // the middle of a run
        assert_eq!(coremap.deallocate(a.add(PAGE_SIZE)), 0);
        // a reserved frame
        assert_eq!(coremap.deallocate(PhysicalAddress::new(0x0010_0000)), 0);
        // outside of the range
        assert_eq!(coremap.deallocate(PhysicalAddress::new(0x0090_0000)), 0);
        assert_eq!(coremap.deallocate(PhysicalAddress::new(0x1000)), 0);
        // unaligned
        assert_eq!(coremap.deallocate(a.add(8)), 0);

        assert_eq!(coremap.free_frames(), free);
        assert_eq!(coremap.frame(a.add(PAGE_SIZE)).unwrap().owner(), Some(a));
    }

    #[test_log::test]
    fn exhaustion() {
        let memory = Memory::new(PhysicalAddress::new(0x0010_0000), MIB);
        let mut coremap = coremap(&memory);
        let free = coremap.free_frames();

        assert_eq!(coremap.allocate(nz(free + 1)), Err(AllocError));
        let all = coremap.allocate(nz(free)).unwrap();
        assert_eq!(coremap.free_frames(), 0);
        assert_eq!(coremap.allocate(nz(1)), Err(AllocError));

        coremap.deallocate(all);
        assert_eq!(coremap.free_frames(), free);
    }

    #[test_log::test]
    fn fragmentation_fails_without_side_effects() {
        let memory = Memory::new(PhysicalAddress::new(0x0010_0000), 64 * PAGE_SIZE);
        let mut coremap = coremap(&memory);

        let mut blocks = Vec::new();
        while let Ok(block) = coremap.allocate(nz(1)) {
            blocks.push(block);
        }
        // free every other frame
        for block in blocks.iter().step_by(2) {
            coremap.deallocate(*block);
        }

        let before: Vec<Frame> = coremap.frames().to_vec();
        assert_eq!(coremap.allocate(nz(2)), Err(AllocError));
        assert_eq!(coremap.frames(), &before[..]);
    }

    #[test]
    #[should_panic(expected = "not enough physical memory to hold the coremap")]
    fn too_small() {
        let memory = Memory::new(PhysicalAddress::new(0x0010_0000), PAGE_SIZE);
        let _coremap = coremap(&memory);
    }

    proptest! {
        #[test]
        fn frames_are_conserved(ops in alloc_ops(64, 8)) {
            let memory = Memory::new(PhysicalAddress::new(0x0010_0000), 128 * PAGE_SIZE);
            let mut coremap = coremap(&memory);
            let mut live: Vec<(PhysicalAddress, usize)> = Vec::new();

            for op in ops {
                match op {
                    AllocOp::Allocate(pages) => {
                        if let Ok(base) = coremap.allocate(nz(pages)) {
                            for (other, other_pages) in &live {
                                let a: Range<PhysicalAddress> = Range::from_start_len(base, pages * PAGE_SIZE);
                                let b: Range<PhysicalAddress> = Range::from_start_len(*other, other_pages * PAGE_SIZE);
                                prop_assert!(!a.overlaps(&b));
                            }
                            live.push((base, pages));
                        }
                    }
                    AllocOp::Free(index) => {
                        if !live.is_empty() {
                            let (base, pages) = live.swap_remove(index % live.len());
                            prop_assert_eq!(coremap.deallocate(base), pages);
                        }
                    }
                }

                let live_pages: usize = live.iter().map(|(_, pages)| pages).sum();
                prop_assert_eq!(
                    coremap.free_frames() + live_pages + coremap.meta_frames(),
                    coremap.len()
                );
                prop_assert_eq!(
                    coremap.frames().iter().filter(|f| f.is_available()).count(),
                    coremap.free_frames()
                );
            }
        }
    }
}
