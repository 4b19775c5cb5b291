// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::num::NonZeroUsize;
use core::ops::Range;

use crate::address_range::AddressRangeExt;
use crate::arch::PAGE_SIZE;
use crate::error::Error;
use crate::{MemoryAttributes, PhysicalAddress, VirtualAddress};

/// A statically sized, physically contiguous region of a user address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    range: Range<VirtualAddress>,
    attributes: MemoryAttributes,
    /// The first frame of the physical backing, once there is one.
    backing: Option<PhysicalAddress>,
}

impl Region {
    /// Creates an unbacked region covering every page touched by `[vaddr, vaddr + size)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the region would be empty or extend past the end of
    /// the address space.
    pub(crate) fn new(
        vaddr: VirtualAddress,
        size: usize,
        attributes: MemoryAttributes,
    ) -> Result<Self, Error> {
        let end = vaddr.checked_add(size).ok_or(Error::InvalidArgument)?;
        if end.checked_add(PAGE_SIZE - 1).is_none() {
            return Err(Error::InvalidArgument);
        }

        let range = (vaddr..end).align_out(PAGE_SIZE);
        if range.is_empty() {
            return Err(Error::InvalidArgument);
        }

        Ok(Self {
            range,
            attributes,
            backing: None,
        })
    }

    /// Returns a region of the same geometry without physical backing.
    pub(crate) fn unbacked(&self) -> Self {
        Self {
            range: self.range.clone(),
            attributes: self.attributes,
            backing: None,
        }
    }

    pub fn range(&self) -> Range<VirtualAddress> {
        self.range.clone()
    }

    pub fn start(&self) -> VirtualAddress {
        self.range.start
    }

    pub fn pages(&self) -> NonZeroUsize {
        // Safety: `new` rejects empty regions
        unsafe { NonZeroUsize::new_unchecked(self.range.pages()) }
    }

    pub fn attributes(&self) -> MemoryAttributes {
        self.attributes
    }

    pub fn backing(&self) -> Option<PhysicalAddress> {
        self.backing
    }

    pub(crate) fn set_backing(&mut self, frame: PhysicalAddress) {
        debug_assert!(self.backing.is_none());
        self.backing = Some(frame);
    }

    pub(crate) fn take_backing(&mut self) -> Option<PhysicalAddress> {
        self.backing.take()
    }

    /// Returns the frame backing `page`, if `page` lies in this region and the region is backed.
    pub fn translate(&self, page: VirtualAddress) -> Option<PhysicalAddress> {
        if !self.range.contains(&page) {
            return None;
        }

        let offset = page.align_down(PAGE_SIZE).offset_from_unsigned(self.range.start);
        self.backing.map(|frame| frame.add(offset))
    }
}
