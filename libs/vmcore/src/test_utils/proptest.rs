// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `proptest` strategies for physical memory and address space tests

use std::ops::Range;
use std::vec::Vec;

use proptest::prelude::{Strategy, any, prop_oneof};

use crate::arch::PAGE_SIZE;
use crate::VirtualAddress;

/// A step in a randomized allocate/free sequence.
#[derive(Debug, Clone, Copy)]
pub enum AllocOp {
    /// Allocate this many pages.
    Allocate(usize),
    /// Free one of the live blocks, picked by this index modulo the number of live blocks.
    Free(usize),
}

/// Produces sequences of up to `max_len` allocate/free steps requesting at most `max_pages`
/// pages each.
pub fn alloc_ops(max_len: usize, max_pages: usize) -> impl Strategy<Value = Vec<AllocOp>> {
    proptest::collection::vec(
        prop_oneof![
            (1..=max_pages).prop_map(AllocOp::Allocate),
            any::<usize>().prop_map(AllocOp::Free),
        ],
        0..max_len,
    )
}

/// Produces `VirtualAddress`s in the given range
pub fn virt(range: Range<usize>) -> impl Strategy<Value = VirtualAddress> {
    range.prop_map(VirtualAddress::new)
}

/// Produces an unaligned user region inside `window`, as `(start, size)`, spanning at most
/// `max_pages` pages once widened to page boundaries.
pub fn user_region(
    window: Range<usize>,
    max_pages: usize,
) -> impl Strategy<Value = (VirtualAddress, usize)> {
    (virt(window), 1..(max_pages - 1) * PAGE_SIZE)
}
