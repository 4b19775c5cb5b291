// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Software TLB refill.
//!
//! The hardware raises a TLB miss exception for every user access whose page has no valid TLB
//! entry. The trap handler decodes the exception into a fault kind and the faulting address and
//! calls [`handle_tlb_miss`], which looks the page up in the current address space and loads the
//! translation into the TLB.

use crate::address_space::{AddressSpace, Segment};
use crate::arch::{Arch, PAGE_SIZE};
use crate::error::Error;
use crate::frame_allocator::FrameAllocator;
use crate::interrupts::InterruptGuard;
use crate::tlb::TlbEntry;
use crate::VirtualAddress;

/// A load missed in the TLB.
pub const VM_FAULT_READ: u32 = 0;
/// A store missed in the TLB.
pub const VM_FAULT_WRITE: u32 = 1;
/// A store hit a TLB entry without the dirty bit.
pub const VM_FAULT_READONLY: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Read,
    Write,
    ReadOnly,
}

impl TryFrom<u32> for FaultKind {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            VM_FAULT_READ => Ok(FaultKind::Read),
            VM_FAULT_WRITE => Ok(FaultKind::Write),
            VM_FAULT_READONLY => Ok(FaultKind::ReadOnly),
            _ => Err(Error::InvalidArgument),
        }
    }
}

/// Resolves a TLB miss at `fault_address` against `aspace` and installs the translation.
///
/// `fault_type` is the raw fault code from the trap frame.
///
/// A write to a read-only page, which after [`AddressSpace::complete_load`] means the sealed code
/// region, returns `Ok(())` without touching the TLB. Nothing makes the page writable, so the
/// retried store faults again and a program doing this never makes progress. Callers that want
/// to kill such a program have to check for [`VM_FAULT_READONLY`] themselves.
///
/// The entry is written into the first invalid TLB slot, or a random one if there is none, with
/// interrupts disabled. Pages of a sealed code region are mapped without the dirty bit, every
/// other page is writable.
///
/// # Errors
///
/// - [`Error::InvalidArgument`] if `fault_type` is not a known fault code.
/// - [`Error::Fault`] if there is no address space, it is not loaded yet, or `fault_address` is
///   outside of both regions and the stack.
pub fn handle_tlb_miss<A, F>(
    arch: &A,
    aspace: Option<&AddressSpace<F>>,
    fault_type: u32,
    fault_address: VirtualAddress,
) -> Result<(), Error>
where
    A: Arch + ?Sized,
    F: FrameAllocator,
{
    let page = fault_address.align_down(PAGE_SIZE);

    let kind = FaultKind::try_from(fault_type)?;
    log::trace!("TLB miss: {kind:?} at {fault_address}");

    if kind == FaultKind::ReadOnly {
        log::debug!("write to read-only page {page}, the access will fault again");
        return Ok(());
    }

    let Some(aspace) = aspace else {
        // probably a kernel fault early in boot
        crate::bail!(
            Error::Fault,
            "TLB miss at {fault_address} without an address space"
        );
    };
    crate::ensure!(
        aspace.is_loaded(),
        Error::Fault,
        "TLB miss at {fault_address} before the address space was loaded"
    );

    let Some((frame, segment)) = aspace.translate(page) else {
        crate::bail!(Error::Fault, "{kind:?} fault at unmapped address {fault_address}");
    };

    let dirty = !(segment == Segment::Region(0) && aspace.is_code_loaded());
    let entry = TlbEntry::new(page, frame, dirty);

    let _guard = InterruptGuard::new(arch);
    install(arch, entry);

    Ok(())
}

/// Writes `entry` into the TLB. Interrupts must be disabled.
fn install<A: Arch + ?Sized>(arch: &A, entry: TlbEntry) {
    let mut free = None;

    for slot in 0..A::TLB_SLOTS {
        let current = arch.tlb_read(slot);

        // two entries matching the same page are fatal on the hardware
        if current.maps(entry.page()) {
            free = Some(slot);
            break;
        }
        if free.is_none() && !current.is_valid() {
            free = Some(slot);
        }
    }

    match free {
        Some(slot) => {
            log::trace!("installing {entry:?} in slot {slot}");
            // Safety: interrupts are disabled by the caller, the entry maps a frame owned by the
            // address space the page was resolved in
            unsafe { arch.tlb_write(slot, entry) }
        }
        None => {
            log::trace!("TLB full, installing {entry:?} in a random slot");
            // Safety: see above
            unsafe { arch.tlb_write_random(entry) }
        }
    }
}
