// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::arch::{Arch, InterruptState};
use crate::test_utils::Machine;
use crate::tlb::TlbEntry;

/// [`Arch`] implementation that drives an emulated [`Machine`].
#[derive(Debug, Clone)]
pub struct EmulateArch {
    machine: Machine,
}

impl EmulateArch {
    pub(super) fn new(machine: Machine) -> Self {
        Self { machine }
    }
}

impl Arch for EmulateArch {
    const TLB_SLOTS: usize = 64;

    fn tlb_read(&self, slot: usize) -> TlbEntry {
        self.machine.tlb_read(slot)
    }

    unsafe fn tlb_write(&self, slot: usize, entry: TlbEntry) {
        self.machine.tlb_write(slot, entry);
    }

    unsafe fn tlb_write_random(&self, entry: TlbEntry) {
        self.machine.tlb_write_random(entry);
    }

    fn disable_interrupts(&self) -> InterruptState {
        InterruptState::from_raw(usize::from(self.machine.set_interrupts(false)))
    }

    unsafe fn restore_interrupts(&self, state: InterruptState) {
        if state.raw() != 0 {
            self.machine.set_interrupts(true);
        }
    }
}
