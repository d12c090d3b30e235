/*
 * SPDX-License-Identifier: MIT OR BlueOak-1.0.0
 * Copyright (c) 2020-2022 Andre Richter <andre.o.richter@gmail.com>
 * Original code distributed under MIT, additional changes are under BlueOak-1.0.0
 */

use core::{marker::PhantomData, ops};

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Typed view of a register block at a fixed address.
pub struct MMIODerefWrapper<T> {
    base_addr: usize,
    phantom: PhantomData<fn() -> T>,
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

impl<T> MMIODerefWrapper<T> {
    /// Create an instance.
    ///
    /// # Safety
    ///
    /// `start_addr` must point to a mapping at least `size_of::<T>()` bytes long, suitably
    /// aligned for `T`, that outlives the wrapper.
    pub const unsafe fn new(start_addr: usize) -> Self {
        Self {
            base_addr: start_addr,
            phantom: PhantomData,
        }
    }

    /// Address the registers live at.
    pub const fn base_addr(&self) -> usize {
        self.base_addr
    }
}

/// Deref to RegisterBlock
///
/// Allows writing
/// ```ignore
/// self.FLAG.set(1)
/// ```
/// instead of something along the lines of
/// ```ignore
/// unsafe { (*FLAG::ptr()).FLAG.set(1) }
/// ```
impl<T> ops::Deref for MMIODerefWrapper<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*(self.base_addr as *const _) }
    }
}
