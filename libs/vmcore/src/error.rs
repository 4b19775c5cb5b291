// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt::{Display, Formatter};

use crate::frame_allocator::AllocError;

/// Out of memory.
pub const ENOMEM: i32 = 3;
/// Function not implemented.
pub const EUNIMP: i32 = 2;
/// Bad memory reference.
pub const EFAULT: i32 = 6;
/// Invalid argument.
pub const EINVAL: i32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The system was not able to allocate the physical memory needed for the operation.
    OutOfMemory,
    /// The requested configuration is not supported, e.g. a third static region.
    Unsupported,
    /// An argument is invalid.
    InvalidArgument,
    /// The faulting address is not mapped by the current address space, or there is none.
    Fault,
}

impl Error {
    /// Returns the numeric error code reported to the rest of the kernel.
    pub const fn errno(self) -> i32 {
        match self {
            Error::OutOfMemory => ENOMEM,
            Error::Unsupported => EUNIMP,
            Error::InvalidArgument => EINVAL,
            Error::Fault => EFAULT,
        }
    }
}

impl From<AllocError> for Error {
    fn from(_value: AllocError) -> Self {
        Self::OutOfMemory
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::OutOfMemory => write!(f, "Out of memory"),
            Error::Unsupported => write!(f, "Function not implemented"),
            Error::InvalidArgument => write!(f, "Invalid argument"),
            Error::Fault => write!(f, "Bad memory reference"),
        }
    }
}

impl core::error::Error for Error {}

#[macro_export]
macro_rules! ensure {
    ($cond:expr, $error:expr, $($msg:tt)+) => {
        if !$cond {
            ::log::debug!($($msg)+);
            return Err($error);
        }
    };
    ($cond:expr, $error:expr) => {
        if !$cond {
            return Err($error);
        }
    };
}

#[macro_export]
macro_rules! bail {
    ($error:expr) => {
        return Err($error);
    };
    ($error:expr, $($msg:tt)+) => {
        ::log::debug!($($msg)+);
        return Err($error);
    };
}
