// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::arch::PAGE_SIZE;
use crate::{PhysicalAddress, VirtualAddress};

pub trait AddressRangeExt {
    type Address;
    fn from_start_len(start: Self::Address, len: usize) -> Self;

    /// Returns `true` if the range contains no addresses.
    fn is_empty(&self) -> bool;

    /// Returns the length of the address range, in bytes.
    fn len(&self) -> usize;

    /// Returns the number of whole pages covered by the range.
    fn pages(&self) -> usize;

    /// Returns `true` if `address` is contained in the range.
    fn contains(&self, address: &Self::Address) -> bool;

    /// Returns `true` if there exists an address present in both ranges.
    fn overlaps(&self, other: &Self) -> bool;

    /// Shrinks the range to the largest sub-range whose bounds are multiples of `align`.
    fn align_in(self, align: usize) -> Self
    where
        Self: Sized;

    /// Grows the range to the smallest super-range whose bounds are multiples of `align`.
    fn align_out(self, align: usize) -> Self
    where
        Self: Sized;
}

macro_rules! impl_address_range {
    ($address_ty:ident) => {
        impl AddressRangeExt for ::core::ops::Range<$address_ty> {
            type Address = $address_ty;

            fn from_start_len(start: Self::Address, len: usize) -> Self {
                start..start.add(len)
            }

            fn is_empty(&self) -> bool {
                self.start >= self.end
            }

            fn len(&self) -> usize {
                if self.is_empty() {
                    0
                } else {
                    self.end.offset_from_unsigned(self.start)
                }
            }

            fn pages(&self) -> usize {
                self.len() / PAGE_SIZE
            }

            fn contains(&self, address: &Self::Address) -> bool {
                <Self as ::core::ops::RangeBounds<$address_ty>>::contains(self, address)
            }

            fn overlaps(&self, other: &Self) -> bool {
                self.start < other.end && other.start < self.end
            }

            fn align_in(self, align: usize) -> Self {
                let start = self.start.align_up(align);
                let end = self.end.align_down(align);

                // an unaligned range smaller than `align` collapses to an empty range
                if start > end { start..start } else { start..end }
            }

            fn align_out(self, align: usize) -> Self {
                self.start.align_down(align)..self.end.align_up(align)
            }
        }
    };
}

impl_address_range!(VirtualAddress);
impl_address_range!(PhysicalAddress);
