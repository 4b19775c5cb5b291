// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::vec::Vec;

use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::arch::{Arch, PAGE_SIZE};
use crate::interrupts::InterruptGuard;
use crate::test_utils::arch::EmulateArch;
use crate::test_utils::memory::Memory;
use crate::tlb::TlbEntry;
use crate::{
    AddressSpace, MIB, MemoryAttributes, PhysMap, PhysicalAddress, PhysicalMemory, VirtualAddress,
};

pub type TestPhysicalMemory = PhysicalMemory<parking_lot::RawMutex>;

/// Where emulated physical memory starts unless configured otherwise.
const DEFAULT_PHYS_BASE: PhysicalAddress = PhysicalAddress::new(0x0010_0000);

/// A "virtual machine" for tests. It models:
///
/// - one contiguous range of physical memory, managed by a [`PhysicalMemory`]
/// - a software-managed TLB with random replacement
/// - the CPU's interrupt enable flag, recording every TLB write made while it is set
#[derive(Clone)]
pub struct Machine(Arc<MachineInner>);

struct MachineInner {
    // must be dropped before `memory`, it points into it
    physical_memory: TestPhysicalMemory,
    memory: Memory,
    boot: Once,
    tlb: Mutex<Vec<TlbEntry>>,
    rng: Mutex<SmallRng>,
    interrupts_enabled: AtomicBool,
    writes_with_interrupts_enabled: AtomicUsize,
    random_writes: AtomicUsize,
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("memory", &self.0.memory)
            .field("physical_memory", &self.0.physical_memory)
            .field("interrupts_enabled", &self.interrupts_enabled())
            .finish_non_exhaustive()
    }
}

pub struct MachineBuilder {
    memory_size: usize,
    phys_base: PhysicalAddress,
    seed: u64,
}

impl MachineBuilder {
    /// Sets the size of physical memory in bytes.
    pub fn with_memory(mut self, size: usize) -> Self {
        self.memory_size = size;
        self
    }

    pub fn with_phys_base(mut self, base: PhysicalAddress) -> Self {
        self.phys_base = base;
        self
    }

    /// Seeds the random TLB replacement.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn build(self) -> Machine {
        let memory = Memory::new(self.phys_base, self.memory_size);
        let physical_memory = PhysicalMemory::new(memory.phys_range(), memory.physmap());

        let tlb = (0..EmulateArch::TLB_SLOTS).map(TlbEntry::invalid).collect();

        Machine(Arc::new(MachineInner {
            physical_memory,
            memory,
            boot: Once::new(),
            tlb: Mutex::new(tlb),
            rng: Mutex::new(SmallRng::seed_from_u64(self.seed)),
            interrupts_enabled: AtomicBool::new(true),
            writes_with_interrupts_enabled: AtomicUsize::new(0),
            random_writes: AtomicUsize::new(0),
        }))
    }
}

impl Machine {
    pub fn builder() -> MachineBuilder {
        MachineBuilder {
            memory_size: MIB,
            phys_base: DEFAULT_PHYS_BASE,
            seed: 0,
        }
    }

    pub fn arch(&self) -> EmulateArch {
        EmulateArch::new(self.clone())
    }

    pub fn phys_range(&self) -> Range<PhysicalAddress> {
        self.0.memory.phys_range()
    }

    pub fn physmap(&self) -> PhysMap {
        self.0.memory.physmap()
    }

    /// The physical memory manager of this machine, still in bootstrap mode unless someone
    /// bootstrapped it.
    pub fn physical_memory(&self) -> &TestPhysicalMemory {
        &self.0.physical_memory
    }

    /// The physical memory manager of this machine, bootstrapping it on first use.
    pub fn booted_physical_memory(&self) -> &TestPhysicalMemory {
        self.0.boot.call_once(|| {
            // Safety: the memory is owned by the machine and outlives the physical memory manager
            unsafe { self.0.physical_memory.bootstrap() }
        });
        &self.0.physical_memory
    }

    /// Builds a loaded address space with an executable code region of `code_pages` pages at
    /// `0x0040_0000` and a writable data region of `data_pages` pages at `0x1000_0000`.
    pub fn loaded_address_space(
        &self,
        code_pages: usize,
        data_pages: usize,
    ) -> AddressSpace<&TestPhysicalMemory> {
        let pm = self.booted_physical_memory();
        let mut aspace = AddressSpace::new(pm, pm.physmap().clone());

        aspace
            .define_region(
                VirtualAddress::new(0x0040_0000),
                code_pages * PAGE_SIZE,
                MemoryAttributes::from_flags(true, false, true),
            )
            .unwrap();
        aspace
            .define_region(
                VirtualAddress::new(0x1000_0000),
                data_pages * PAGE_SIZE,
                MemoryAttributes::from_flags(true, true, false),
            )
            .unwrap();
        aspace.prepare_load().unwrap();

        aspace
    }

    pub fn read_phys(&self, phys: PhysicalAddress, len: usize) -> Vec<u8> {
        self.0.memory.read(phys, len)
    }

    pub fn read_phys_byte(&self, phys: PhysicalAddress) -> u8 {
        self.0.memory.read(phys, 1)[0]
    }

    pub fn write_phys(&self, phys: PhysicalAddress, bytes: &[u8]) {
        self.0.memory.write(phys, bytes);
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.0.interrupts_enabled.load(Ordering::SeqCst)
    }

    /// Sets the interrupt enable flag, returning its previous value.
    pub(super) fn set_interrupts(&self, enabled: bool) -> bool {
        self.0.interrupts_enabled.swap(enabled, Ordering::SeqCst)
    }

    /// The number of TLB writes that happened while interrupts were enabled.
    pub fn tlb_writes_with_interrupts_enabled(&self) -> usize {
        self.0.writes_with_interrupts_enabled.load(Ordering::SeqCst)
    }

    /// The number of TLB writes into a randomly chosen slot.
    pub fn random_writes(&self) -> usize {
        self.0.random_writes.load(Ordering::SeqCst)
    }

    pub fn tlb_snapshot(&self) -> Vec<TlbEntry> {
        self.0.tlb.lock().clone()
    }

    /// Returns every valid TLB entry translating `page`.
    pub fn valid_entries_for(&self, page: VirtualAddress) -> Vec<TlbEntry> {
        self.0
            .tlb
            .lock()
            .iter()
            .filter(|entry| entry.maps(page))
            .copied()
            .collect()
    }

    /// Occupies every TLB slot with a valid entry for a page in the otherwise unused
    /// `0x2000_0000` range.
    pub fn fill_tlb_with_valid_entries(&self) {
        let arch = self.arch();
        let _guard = InterruptGuard::new(&arch);

        let frame = self.phys_range().start;
        for slot in 0..EmulateArch::TLB_SLOTS {
            let page = VirtualAddress::new(0x2000_0000 + slot * PAGE_SIZE);
            self.tlb_write(slot, TlbEntry::new(page, frame, false));
        }
    }

    pub(super) fn tlb_read(&self, slot: usize) -> TlbEntry {
        self.0.tlb.lock()[slot]
    }

    pub(super) fn tlb_write(&self, slot: usize, entry: TlbEntry) {
        if self.interrupts_enabled() {
            log::error!("TLB slot {slot} written with interrupts enabled");
            self.0
                .writes_with_interrupts_enabled
                .fetch_add(1, Ordering::SeqCst);
        }

        self.0.tlb.lock()[slot] = entry;
    }

    pub(super) fn tlb_write_random(&self, entry: TlbEntry) {
        let slot = self.0.rng.lock().random_range(0..EmulateArch::TLB_SLOTS);
        self.0.random_writes.fetch_add(1, Ordering::SeqCst);
        self.tlb_write(slot, entry);
    }
}
