// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

mycelium_bitfield::bitfield! {
    /// The permissions a program header asks for when its region is defined.
    ///
    /// The hardware can only tell writable pages from read-only ones, so apart from EXECUTE
    /// marking the code region (see [`AddressSpace::complete_load`]) these are recorded but not
    /// enforced.
    ///
    /// [`AddressSpace::complete_load`]: crate::AddressSpace::complete_load
    #[derive(PartialEq, Eq)]
    pub struct MemoryAttributes<u8> {
        /// If set, reading from the memory region is allowed.
        pub const READ: bool;
        /// If set, writing to the memory region is allowed.
        pub const WRITE: bool;
        /// If set, executing code from the memory region is allowed.
        pub const EXECUTE: bool;
    }
}

impl MemoryAttributes {
    /// Builds attributes from the three permission flags of a program header.
    pub fn from_flags(read: bool, write: bool, execute: bool) -> Self {
        Self::new()
            .with(Self::READ, read)
            .with(Self::WRITE, write)
            .with(Self::EXECUTE, execute)
    }

    pub fn allows_read(&self) -> bool {
        self.get(Self::READ)
    }

    pub fn allows_write(&self) -> bool {
        self.get(Self::WRITE)
    }

    pub fn allows_execution(&self) -> bool {
        self.get(Self::EXECUTE)
    }
}
