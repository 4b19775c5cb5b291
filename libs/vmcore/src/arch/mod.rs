// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "mips")] {
        mod mips32;
        pub use mips32::{KSEG0, Mips32, kseg0_physmap};
    }
}

use crate::interrupts::InterruptGuard;
use crate::tlb::TlbEntry;

pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// The interrupt state of the CPU as it was before [`Arch::disable_interrupts`] was called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptState(usize);

impl InterruptState {
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> usize {
        self.0
    }
}

/// The hardware this crate drives: a software-managed TLB and the CPU's interrupt mask.
pub trait Arch {
    /// The number of slots in the hardware TLB.
    const TLB_SLOTS: usize;

    /// Reads the entry currently stored in TLB slot `slot`.
    fn tlb_read(&self, slot: usize) -> TlbEntry;

    /// Writes `entry` into TLB slot `slot`.
    ///
    /// # Safety
    ///
    /// Interrupts must be disabled, and `entry` must either be invalid or map a frame owned by the
    /// currently active address space.
    unsafe fn tlb_write(&self, slot: usize, entry: TlbEntry);

    /// Writes `entry` into a slot chosen by the hardware.
    ///
    /// # Safety
    ///
    /// Same as [`Arch::tlb_write`].
    unsafe fn tlb_write_random(&self, entry: TlbEntry);

    /// Masks all interrupts on this CPU, returning the previous state.
    fn disable_interrupts(&self) -> InterruptState;

    /// Restores a state previously returned from [`Arch::disable_interrupts`].
    ///
    /// # Safety
    ///
    /// States must be restored in the reverse order they were saved in, otherwise interrupts may
    /// be re-enabled inside someone else's critical section. Prefer [`InterruptGuard`].
    unsafe fn restore_interrupts(&self, state: InterruptState);

    /// Invalidates every slot of the TLB.
    fn tlb_invalidate_all(&self) {
        let _guard = InterruptGuard::new(self);

        for slot in 0..Self::TLB_SLOTS {
            // Safety: interrupts are disabled and invalid entries never map anything
            unsafe {
                self.tlb_write(slot, TlbEntry::invalid(slot));
            }
        }
    }
}
