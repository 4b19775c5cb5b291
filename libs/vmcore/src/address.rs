// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::arch::{PAGE_SHIFT, PAGE_SIZE};

macro_rules! impl_address {
    ($address_ty:ident) => {
        impl $address_ty {
            pub const MAX: Self = Self(usize::MAX);
            pub const MIN: Self = Self(usize::MIN);

            #[must_use]
            pub const fn new(n: usize) -> Self {
                Self(n)
            }

            #[inline]
            pub const fn get(&self) -> usize {
                self.0
            }

            #[inline]
            pub fn as_ptr(self) -> *const u8 {
                ::core::ptr::with_exposed_provenance(self.0)
            }

            #[inline]
            pub fn as_mut_ptr(self) -> *mut u8 {
                ::core::ptr::with_exposed_provenance_mut(self.0)
            }

            #[must_use]
            #[inline]
            pub fn from_mut_ptr<T: ?Sized>(ptr: *mut T) -> Self {
                Self(ptr.expose_provenance())
            }

            /// Adds an unsigned offset to this address, panicking if overflow occurred.
            #[must_use]
            #[inline]
            pub const fn add(self, offset: usize) -> Self {
                Self(self.0 + offset)
            }

            /// Adds an unsigned offset to this address, returning `None` if overflow occurred.
            #[must_use]
            #[inline]
            pub const fn checked_add(self, offset: usize) -> Option<Self> {
                match self.0.checked_add(offset) {
                    Some(n) => Some(Self(n)),
                    None => None,
                }
            }

            /// Subtracts an unsigned offset from this address, panicking if overflow occurred.
            #[must_use]
            #[inline]
            pub const fn sub(self, offset: usize) -> Self {
                Self(self.0 - offset)
            }

            /// Adds an unsigned offset to this address, wrapping around at the boundary of the type.
            #[must_use]
            #[inline]
            pub const fn wrapping_add(self, offset: usize) -> Self {
                Self(self.0.wrapping_add(offset))
            }

            /// Subtracts an unsigned offset from this address, wrapping around at the boundary of the type.
            #[must_use]
            #[inline]
            pub const fn wrapping_sub(self, offset: usize) -> Self {
                Self(self.0.wrapping_sub(offset))
            }

            /// Calculates the distance between two addresses in bytes, _where it's known that `self`
            /// is equal to or greater than `origin`_.
            ///
            /// # Panics
            ///
            /// Panics if `self` is less than `origin`.
            #[must_use]
            #[inline]
            pub const fn offset_from_unsigned(self, origin: Self) -> usize {
                let (a, b) = self.0.overflowing_sub(origin.0);
                if b {
                    panic!("attempt to subtract with overflow")
                } else {
                    a
                }
            }

            #[must_use]
            #[inline]
            pub const fn is_aligned_to(&self, align: usize) -> bool {
                assert!(
                    align.is_power_of_two(),
                    "is_aligned_to: align is not a power-of-two"
                );

                self.0 & (align - 1) == 0
            }

            #[must_use]
            #[inline]
            pub const fn align_up(self, align: usize) -> Self {
                assert!(
                    align.is_power_of_two(),
                    "align_up: align is not a power-of-two"
                );

                let aligned = Self(self.0.wrapping_add(align - 1) & 0usize.wrapping_sub(align));
                debug_assert!(aligned.0 >= self.0);
                aligned
            }

            #[must_use]
            #[inline]
            pub const fn align_down(self, align: usize) -> Self {
                assert!(
                    align.is_power_of_two(),
                    "align_down: align is not a power-of-two"
                );

                Self(self.0 & 0usize.wrapping_sub(align))
            }

            /// Returns the number of the page this address falls into.
            #[must_use]
            #[inline]
            pub const fn page_number(self) -> usize {
                self.0 >> PAGE_SHIFT
            }

            /// Returns the byte offset of this address within its page.
            #[must_use]
            #[inline]
            pub const fn page_offset(self) -> usize {
                self.0 & (PAGE_SIZE - 1)
            }

            #[must_use]
            #[inline]
            pub const fn is_page_aligned(self) -> bool {
                self.page_offset() == 0
            }
        }

        impl From<usize> for $address_ty {
            fn from(value: usize) -> Self {
                Self(value)
            }
        }

        impl TryFrom<u64> for $address_ty {
            type Error = <usize as TryFrom<u64>>::Error;

            fn try_from(value: u64) -> Result<Self, Self::Error> {
                usize::try_from(value).map(Self)
            }
        }

        impl ::core::fmt::Display for $address_ty {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_fmt(format_args!("{:#010x}", self.0)) // 10 digits to account for the leading 0x
            }
        }

        impl ::core::fmt::Debug for $address_ty {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.debug_tuple(stringify!($address_ty))
                    .field(&format_args!("{:#010x}", self.0))
                    .finish()
            }
        }
    };
}

/// An address in a user or kernel virtual address space.
#[repr(transparent)]
#[derive(Default, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(usize);
impl_address!(VirtualAddress);

/// An address in physical memory, as the memory bus sees it.
#[repr(transparent)]
#[derive(Default, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(usize);
impl_address!(PhysicalAddress);
