// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::arch::{PAGE_SHIFT, PAGE_SIZE};
use crate::{PhysicalAddress, VirtualAddress};

/// Base of the tags used for invalid TLB entries. Addresses at or above this live in the kernel's
/// directly-mapped segments, which are never translated through the TLB, so a tag from here can
/// never match a user access.
const INVALID_TAG_BASE: usize = 0x8000_0000;

mycelium_bitfield::bitfield! {
    /// The tag half of a TLB entry.
    #[derive(PartialEq, Eq)]
    pub struct EntryHi<u32> {
        const _RESERVED = 6;
        /// Address space identifier. Always zero, the whole TLB is flushed on context switch.
        pub const ASID = 6;
        /// The virtual page number this entry translates.
        pub const VPN = 20;
    }
}

mycelium_bitfield::bitfield! {
    /// The translation half of a TLB entry.
    #[derive(PartialEq, Eq)]
    pub struct EntryLo<u32> {
        const _RESERVED = 8;
        /// The entry matches regardless of the current ASID.
        pub const GLOBAL: bool;
        /// The entry takes part in translation at all.
        pub const VALID: bool;
        /// Writes through this entry are permitted. Clearing it makes the page read-only.
        pub const DIRTY: bool;
        /// Accesses through this entry bypass the cache.
        pub const NO_CACHE: bool;
        /// The physical frame number the page maps to.
        pub const PFN = 20;
    }
}

/// One slot's worth of TLB state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    pub hi: EntryHi,
    pub lo: EntryLo,
}

impl TlbEntry {
    /// Returns a valid entry mapping `page` onto `frame`, writable if `dirty` is set.
    #[expect(
        clippy::cast_possible_truncation,
        reason = "page and frame numbers fit in 20 bits on the 32-bit target"
    )]
    pub fn new(page: VirtualAddress, frame: PhysicalAddress, dirty: bool) -> Self {
        debug_assert!(page.is_page_aligned() && frame.is_page_aligned());

        Self {
            hi: EntryHi::new().with(EntryHi::VPN, page.page_number() as u32),
            lo: EntryLo::new()
                .with(EntryLo::VALID, true)
                .with(EntryLo::DIRTY, dirty)
                .with(EntryLo::PFN, frame.page_number() as u32),
        }
    }

    /// Returns the invalid entry for TLB slot `slot`.
    ///
    /// Each slot gets a distinct tag so that no two entries in the TLB ever match the same
    /// address, which would be a fatal condition on the hardware.
    #[expect(
        clippy::cast_possible_truncation,
        reason = "slot numbers are bounded by the TLB size"
    )]
    pub fn invalid(slot: usize) -> Self {
        let tag = INVALID_TAG_BASE + slot * PAGE_SIZE;

        Self {
            hi: EntryHi::new().with(EntryHi::VPN, (tag >> PAGE_SHIFT) as u32),
            lo: EntryLo::new(),
        }
    }

    pub fn from_raw(hi: u32, lo: u32) -> Self {
        Self {
            hi: EntryHi::from_bits(hi),
            lo: EntryLo::from_bits(lo),
        }
    }

    pub fn into_raw(self) -> (u32, u32) {
        (self.hi.bits(), self.lo.bits())
    }

    pub fn is_valid(&self) -> bool {
        self.lo.get(EntryLo::VALID)
    }

    pub fn is_dirty(&self) -> bool {
        self.lo.get(EntryLo::DIRTY)
    }

    /// The virtual page this entry translates.
    pub fn page(&self) -> VirtualAddress {
        VirtualAddress::new((self.hi.get(EntryHi::VPN) as usize) << PAGE_SHIFT)
    }

    /// The physical frame this entry maps to.
    pub fn frame(&self) -> PhysicalAddress {
        PhysicalAddress::new((self.lo.get(EntryLo::PFN) as usize) << PAGE_SHIFT)
    }

    /// Returns `true` if this entry is valid and translates `page`.
    pub fn maps(&self, page: VirtualAddress) -> bool {
        self.is_valid() && self.page() == page.align_down(PAGE_SIZE)
    }
}

/// Requests that `page` be invalidated in the TLBs of other processors.
///
/// # Panics
///
/// Always. Only a single processor is supported, so nobody should ever ask for this.
pub fn tlb_shootdown(page: VirtualAddress) -> ! {
    panic!("TLB shootdown of {page} requested, but only a single processor is supported")
}

/// Requests that every TLB entry on other processors be invalidated.
///
/// # Panics
///
/// Always, see [`tlb_shootdown`].
pub fn tlb_shootdown_all() -> ! {
    panic!("TLB shootdown requested, but only a single processor is supported")
}
