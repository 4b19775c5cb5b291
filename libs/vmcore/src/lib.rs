// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Physical memory management and software TLB refill for a single-core kernel with a
//! software-managed TLB.
//!
//! - [`PhysicalMemory`] hands out runs of contiguous frames, first from a bump allocator during
//!   early boot and then from the [`Coremap`], which can also take them back.
//! - [`AddressSpace`] describes a user program: two static regions and a stack, each backed by one
//!   contiguous run of frames.
//! - [`handle_tlb_miss`] resolves TLB misses against the current address space and loads the
//!   translation into the hardware TLB.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(target_arch = "mips", feature(asm_experimental_arch))]

#[cfg(all(feature = "test_utils", not(test)))]
extern crate std;

mod address;
mod address_range;
mod address_space;
mod arch;
mod bootstrap;
mod coremap;
pub mod error;
pub mod fault;
mod frame_allocator;
pub mod global;
mod interrupts;
pub mod kconfig;
mod memory_attributes;
mod physical_memory;
mod physmap;
#[cfg(feature = "test_utils")]
pub mod test_utils;
pub mod tlb;

pub use address::{PhysicalAddress, VirtualAddress};
pub use address_range::AddressRangeExt;
pub use address_space::{AddressSpace, Region, Segment, stack_range};
pub use arch::*;
pub use bootstrap::BootstrapAllocator;
pub use coremap::{Coremap, Frame};
pub use error::Error;
pub use fault::{FaultKind, handle_tlb_miss};
pub use frame_allocator::{AllocError, FrameAllocator, FrameUsage};
pub use interrupts::InterruptGuard;
pub use memory_attributes::MemoryAttributes;
pub use physical_memory::PhysicalMemory;
pub use physmap::PhysMap;
pub use tlb::TlbEntry;

pub const KIB: usize = 1024;
pub const MIB: usize = 1024 * KIB;
