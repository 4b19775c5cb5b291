// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::num::NonZeroUsize;
use core::ops::Range;
use core::sync::atomic::{AtomicBool, Ordering};

use lock_api::Mutex;

use crate::arch::PAGE_SIZE;
use crate::bootstrap::BootstrapAllocator;
use crate::coremap::Coremap;
use crate::error::Error;
use crate::frame_allocator::{AllocError, FrameAllocator, FrameUsage};
use crate::physmap::PhysMap;
use crate::{PhysicalAddress, VirtualAddress};

/// The kernel's physical memory manager.
///
/// Starts out in bootstrap mode where frames are bumped off the usable range and can never be
/// given back. [`PhysicalMemory::bootstrap`] builds the [`Coremap`] over whatever is left and
/// switches every later request over to it. The switch happens exactly once.
///
/// The two allocators have separate locks and no code path ever holds both.
pub struct PhysicalMemory<R: lock_api::RawMutex> {
    bootstrap: Mutex<R, BootstrapAllocator>,
    coremap: Mutex<R, Option<Coremap>>,
    /// Set once the coremap is in place, never cleared.
    ready: AtomicBool,
    physmap: PhysMap,
}

impl<R: lock_api::RawMutex> fmt::Debug for PhysicalMemory<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // one lock at a time
        let bootstrap_usage = self.bootstrap_usage();
        let usage = self.usage();

        f.debug_struct("PhysicalMemory")
            .field("bootstrap_usage", &bootstrap_usage)
            .field("usage", &usage)
            .field("ready", &self.ready)
            .field("physmap", &self.physmap)
            .finish()
    }
}

impl<R: lock_api::RawMutex> PhysicalMemory<R> {
    /// Takes over the usable physical memory `range` in bootstrap mode.
    pub fn new(range: Range<PhysicalAddress>, physmap: PhysMap) -> Self {
        log::debug!("physical memory {range:?} handed to the bootstrap allocator");

        Self {
            bootstrap: Mutex::new(BootstrapAllocator::new(range)),
            coremap: Mutex::new(None),
            ready: AtomicBool::new(false),
            physmap,
        }
    }

    /// Returns `true` once the coremap serves allocations.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn physmap(&self) -> &PhysMap {
        &self.physmap
    }

    /// Builds the coremap over all memory the bootstrap allocator hasn't handed out, and routes
    /// every following allocation through it.
    ///
    /// Frames handed out during bootstrap stay allocated forever.
    ///
    /// # Safety
    ///
    /// The usable range passed to [`PhysicalMemory::new`] must be exclusively owned by `self`,
    /// reachable through its [`PhysMap`], and must remain valid for as long as `self` lives.
    ///
    /// # Panics
    ///
    /// Panics if called more than once, or if the remaining memory cannot hold the coremap.
    pub unsafe fn bootstrap(&self) {
        assert!(
            !self.is_ready() && self.coremap.lock().is_none(),
            "physical memory was bootstrapped twice"
        );

        let free = self.bootstrap.lock().take_free_region();

        // Safety: ensured by caller, the bootstrap allocator gave up `free` above
        let coremap = unsafe { Coremap::bootstrap(free, &self.physmap) };
        let usage = coremap.usage();

        {
            let mut slot = self.coremap.lock();
            assert!(slot.is_none(), "physical memory was bootstrapped twice");
            *slot = Some(coremap);
        }
        self.ready.store(true, Ordering::Release);

        log::info!(
            "coremap ready: {} of {} frames available",
            usage.total - usage.used,
            usage.total
        );
    }

    /// Allocates `pages` physically contiguous frames.
    ///
    /// # Errors
    ///
    /// Returns `Err` if no run of `pages` free frames exists.
    pub fn allocate(&self, pages: NonZeroUsize) -> Result<PhysicalAddress, AllocError> {
        if self.is_ready() {
            self.with_coremap_mut(|coremap| coremap.allocate(pages))
        } else {
            self.bootstrap.lock().allocate(pages)
        }
    }

    /// Releases the block starting at `base`.
    ///
    /// Blocks that were handed out during bootstrap are never reclaimed, addresses that don't
    /// start a live block are ignored.
    ///
    /// # Safety
    ///
    /// The memory of the block must not be accessed anymore after this call.
    pub unsafe fn free(&self, base: PhysicalAddress) {
        if self.is_ready() {
            let released = self.with_coremap_mut(|coremap| coremap.deallocate(base));
            if released == 0 {
                log::trace!("ignoring free of {base}, it does not start a live block");
            }
        } else {
            log::warn!("ignoring free of {base}, bootstrap allocations are never reclaimed");
        }
    }

    /// Allocates `pages` contiguous frames for kernel use and returns their address inside the
    /// kernel's physical memory mapping.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `pages` is zero and [`Error::OutOfMemory`] if no run
    /// of `pages` free frames exists.
    pub fn allocate_kernel_pages(&self, pages: usize) -> Result<VirtualAddress, Error> {
        let pages = NonZeroUsize::new(pages).ok_or(Error::InvalidArgument)?;
        let frame = self.allocate(pages)?;

        Ok(self.physmap.phys_to_virt(frame))
    }

    /// Like [`PhysicalMemory::allocate_kernel_pages`] but sized in bytes, rounded up to whole pages.
    ///
    /// # Errors
    ///
    /// Same as [`PhysicalMemory::allocate_kernel_pages`].
    pub fn allocate_kernel_bytes(&self, bytes: usize) -> Result<VirtualAddress, Error> {
        self.allocate_kernel_pages(bytes.div_ceil(PAGE_SIZE))
    }

    /// Releases kernel pages previously returned from [`PhysicalMemory::allocate_kernel_pages`].
    ///
    /// # Safety
    ///
    /// The pages must not be accessed anymore after this call.
    pub unsafe fn free_kernel_pages(&self, addr: VirtualAddress) {
        let frame = self.physmap.virt_to_phys(addr);

        // Safety: ensured by caller
        unsafe { self.free(frame) }
    }

    /// Returns frame accounting for the coremap, or `None` while still in bootstrap mode.
    pub fn usage(&self) -> Option<FrameUsage> {
        self.with_coremap(Coremap::usage)
    }

    /// Returns the number of bytes handed out by the bootstrap allocator.
    pub fn bootstrap_usage(&self) -> usize {
        self.bootstrap.lock().usage()
    }

    /// Runs `f` on the coremap, or returns `None` while still in bootstrap mode.
    pub fn with_coremap<T>(&self, f: impl FnOnce(&Coremap) -> T) -> Option<T> {
        self.coremap.lock().as_ref().map(f)
    }

    fn with_coremap_mut<T>(&self, f: impl FnOnce(&mut Coremap) -> T) -> T {
        let mut coremap = self.coremap.lock();
        let Some(coremap) = coremap.as_mut() else {
            unreachable!("physical memory is marked ready, but has no coremap");
        };
        f(coremap)
    }
}

// Safety: blocks come from the bootstrap allocator or the coremap, which both hand out every
// frame at most once until it is freed, and all frames are mapped by our physmap.
unsafe impl<R: lock_api::RawMutex> FrameAllocator for PhysicalMemory<R> {
    fn allocate_contiguous(&self, pages: NonZeroUsize) -> Result<PhysicalAddress, AllocError> {
        self.allocate(pages)
    }

    unsafe fn deallocate(&self, block: PhysicalAddress) {
        // Safety: ensured by caller
        unsafe { self.free(block) }
    }
}
