// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! MIPS R3000-style backend: 64 TLB slots programmed through coprocessor 0.

use core::arch::asm;
use core::ops::Range;

use super::{Arch, InterruptState};
use crate::physmap::PhysMap;
use crate::tlb::TlbEntry;
use crate::{PhysicalAddress, VirtualAddress};

/// The cached, directly-mapped kernel segment. Physical address `p` is visible at `KSEG0 + p`.
pub const KSEG0: VirtualAddress = VirtualAddress::new(0x8000_0000);

/// Current-interrupt-enable bit of the status register.
const STATUS_IEC: u32 = 1 << 0;

/// Returns the physical memory mapping provided by KSEG0 for `range`.
pub fn kseg0_physmap(range: Range<PhysicalAddress>) -> PhysMap {
    PhysMap::new(KSEG0.add(range.start.get()), range)
}

pub struct Mips32;

#[expect(
    clippy::cast_possible_truncation,
    reason = "slot numbers are bounded by the TLB size"
)]
fn index_bits(slot: usize) -> u32 {
    debug_assert!(slot < Mips32::TLB_SLOTS);
    (slot as u32) << 8
}

fn read_status() -> u32 {
    let status: u32;
    // Safety: reading the status register has no side effects
    unsafe {
        asm!("mfc0 {}, $12", out(reg) status, options(nomem, nostack));
    }
    status
}

/// # Safety
///
/// The caller must only toggle bits it is allowed to touch (the interrupt enable bit).
unsafe fn write_status(status: u32) {
    // Safety: ensured by caller
    unsafe {
        asm!("mtc0 {}, $12", "nop", "nop", in(reg) status, options(nostack));
    }
}

impl Arch for Mips32 {
    const TLB_SLOTS: usize = 64;

    fn tlb_read(&self, slot: usize) -> TlbEntry {
        let hi: u32;
        let lo: u32;

        // Safety: `tlbr` only loads EntryHi/EntryLo, which are not live across this block. We
        // don't use ASIDs, so clobbering the current one is harmless.
        unsafe {
            asm!(
                "mtc0 {index}, $0",
                "nop",
                "tlbr",
                "nop",
                "mfc0 {hi}, $10",
                "mfc0 {lo}, $2",
                index = in(reg) index_bits(slot),
                hi = out(reg) hi,
                lo = out(reg) lo,
                options(nostack),
            );
        }

        TlbEntry::from_raw(hi, lo)
    }

    unsafe fn tlb_write(&self, slot: usize, entry: TlbEntry) {
        let (hi, lo) = entry.into_raw();

        // Safety: ensured by caller
        unsafe {
            asm!(
                "mtc0 {hi}, $10",
                "mtc0 {lo}, $2",
                "mtc0 {index}, $0",
                "nop",
                "tlbwi",
                "nop",
                hi = in(reg) hi,
                lo = in(reg) lo,
                index = in(reg) index_bits(slot),
                options(nostack),
            );
        }
    }

    unsafe fn tlb_write_random(&self, entry: TlbEntry) {
        let (hi, lo) = entry.into_raw();

        // Safety: ensured by caller
        unsafe {
            asm!(
                "mtc0 {hi}, $10",
                "mtc0 {lo}, $2",
                "nop",
                "tlbwr",
                "nop",
                hi = in(reg) hi,
                lo = in(reg) lo,
                options(nostack),
            );
        }
    }

    fn disable_interrupts(&self) -> InterruptState {
        let status = read_status();
        // Safety: clearing IEc only masks interrupts on this CPU
        unsafe {
            write_status(status & !STATUS_IEC);
        }
        InterruptState::from_raw((status & STATUS_IEC) as usize)
    }

    unsafe fn restore_interrupts(&self, state: InterruptState) {
        if state.raw() != 0 {
            // Safety: the caller restores states in order, so re-enabling here is what the
            // outermost critical section expects
            unsafe {
                write_status(read_status() | STATUS_IEC);
            }
        }
    }
}
