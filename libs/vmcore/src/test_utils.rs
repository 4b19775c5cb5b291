// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! An emulated single-core machine for tests: host-backed physical memory, a 64-slot TLB and
//! an interrupt enable flag.

mod arch;
mod machine;
mod memory;
pub mod proptest;

pub use arch::EmulateArch;
pub use machine::{Machine, MachineBuilder, TestPhysicalMemory};
pub use memory::Memory;
