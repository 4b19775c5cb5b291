// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The kernel-wide physical memory manager.
//!
//! Boot code calls [`init`] as soon as the usable physical memory range is known, which makes
//! [`alloc_kpages`] work right away through the bootstrap allocator. Once the kernel is far enough
//! along, [`bootstrap`] builds the coremap and from then on freed pages are actually reclaimed.

use core::ops::Range;

use crate::error::Error;
use crate::physical_memory::PhysicalMemory;
use crate::physmap::PhysMap;
use crate::{PhysicalAddress, VirtualAddress};

pub type KernelPhysicalMemory = PhysicalMemory<spin::Mutex<()>>;

static PHYSICAL_MEMORY: spin::Once<KernelPhysicalMemory> = spin::Once::new();

/// Hands the usable physical memory `range` to the kernel-wide physical memory manager.
///
/// # Safety
///
/// `range` must be unused by anything else, reachable through `physmap`, and valid for the rest
/// of the kernel's lifetime.
///
/// # Panics
///
/// Panics if called more than once.
pub unsafe fn init(range: Range<PhysicalAddress>, physmap: PhysMap) -> &'static KernelPhysicalMemory {
    let mut initialized = false;
    let pm = PHYSICAL_MEMORY.call_once(|| {
        initialized = true;
        PhysicalMemory::new(range, physmap)
    });

    assert!(initialized, "physical memory was initialized twice");
    pm
}

/// Returns the kernel-wide physical memory manager, or `None` before [`init`].
pub fn get() -> Option<&'static KernelPhysicalMemory> {
    PHYSICAL_MEMORY.get()
}

fn expect_init() -> &'static KernelPhysicalMemory {
    let Some(pm) = get() else {
        panic!("physical memory used before initialization");
    };
    pm
}

/// Switches the kernel-wide physical memory manager over to the coremap.
///
/// # Safety
///
/// See [`PhysicalMemory::bootstrap`].
///
/// # Panics
///
/// Panics if called before [`init`] or more than once.
pub unsafe fn bootstrap() {
    // Safety: ensured by caller
    unsafe { expect_init().bootstrap() }
}

/// Allocates `pages` contiguous pages of kernel memory.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] for zero pages and [`Error::OutOfMemory`] if no large
/// enough run of free frames exists.
///
/// # Panics
///
/// Panics if called before [`init`].
pub fn alloc_kpages(pages: usize) -> Result<VirtualAddress, Error> {
    expect_init().allocate_kernel_pages(pages)
}

/// Releases pages returned from [`alloc_kpages`].
///
/// # Safety
///
/// The pages must not be accessed anymore after this call.
///
/// # Panics
///
/// Panics if called before [`init`].
pub unsafe fn free_kpages(addr: VirtualAddress) {
    // Safety: ensured by caller
    unsafe { expect_init().free_kernel_pages(addr) }
}
