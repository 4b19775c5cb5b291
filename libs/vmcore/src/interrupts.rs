// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::arch::{Arch, InterruptState};

/// RAII guard that keeps interrupts masked for as long as it is alive.
///
/// Guards nest: dropping the inner guard restores the state the outer guard established, so
/// interrupts only come back on once the outermost guard is dropped.
#[must_use = "interrupts are re-enabled as soon as the guard is dropped"]
pub struct InterruptGuard<'a, A: Arch + ?Sized> {
    arch: &'a A,
    saved: InterruptState,
}

impl<'a, A: Arch + ?Sized> InterruptGuard<'a, A> {
    pub fn new(arch: &'a A) -> Self {
        let saved = arch.disable_interrupts();
        Self { arch, saved }
    }
}

impl<A: Arch + ?Sized> Drop for InterruptGuard<'_, A> {
    fn drop(&mut self) {
        // Safety: guards are dropped in reverse order of creation, so `saved` is exactly the state
        // that was active before this guard was created
        unsafe {
            self.arch.restore_interrupts(self.saved);
        }
    }
}
