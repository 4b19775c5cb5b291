// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The kernel-wide handle is process global, so it gets a test binary of its own with a single
//! test driving it through boot.

use std::panic::{AssertUnwindSafe, catch_unwind};

use vmcore::test_utils::Memory;
use vmcore::{Error, MIB, PAGE_SIZE, PhysicalAddress, global};

#[test_log::test]
fn kernel_pages_through_the_global_handle() {
    let memory: &'static Memory = Box::leak(Box::new(Memory::new(
        PhysicalAddress::new(0x0010_0000),
        MIB,
    )));
    let physmap = memory.physmap();

    assert!(global::get().is_none());

    // Safety: the memory is leaked and never used by anything else
    let pm = unsafe { global::init(memory.phys_range(), memory.physmap()) };
    assert!(!pm.is_ready());

    // early boot: bump allocated, never reclaimed
    let early = global::alloc_kpages(2).unwrap();
    assert_eq!(early, physmap.phys_to_virt(memory.phys_range().start));
    // Safety: the pages are not used
    unsafe { global::free_kpages(early) };
    assert_eq!(pm.bootstrap_usage(), 2 * PAGE_SIZE);

    // Safety: see above
    unsafe { global::bootstrap() };
    assert!(global::get().is_some_and(|pm| pm.is_ready()));

    let a = global::alloc_kpages(3).unwrap();
    let used = pm.usage().unwrap().used;
    // Safety: the pages are not used
    unsafe { global::free_kpages(a) };
    assert_eq!(pm.usage().unwrap().used, used - 3);
    assert_eq!(global::alloc_kpages(3).unwrap(), a);

    assert_eq!(global::alloc_kpages(0), Err(Error::InvalidArgument));
    assert_eq!(global::alloc_kpages(1024), Err(Error::OutOfMemory));

    let second_init = catch_unwind(AssertUnwindSafe(|| {
        // Safety: this panics before touching the memory
        unsafe { global::init(memory.phys_range(), memory.physmap()) };
    }));
    assert!(second_init.is_err());

    let second_bootstrap = catch_unwind(|| {
        // Safety: this panics before touching the memory
        unsafe { global::bootstrap() };
    });
    assert!(second_bootstrap.is_err());
}
