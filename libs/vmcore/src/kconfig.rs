// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::VirtualAddress;

/// The size of every user stack in pages.
pub const STACK_PAGES: usize = 12;
/// The (exclusive) top of every user stack. Stacks grow down from here.
pub const USER_STACK_TOP: VirtualAddress = VirtualAddress::new(0x8000_0000);
/// The number of static regions an address space can hold.
pub const MAX_REGIONS: usize = 2;
