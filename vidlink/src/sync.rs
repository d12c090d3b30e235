/*
 * SPDX-License-Identifier: MIT OR BlueOak-1.0.0
 * Copyright (c) 2019 Andre Richter <andre.o.richter@gmail.com>
 * Original code distributed under MIT, additional changes are under BlueOak-1.0.0
 */

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Synchronization interfaces.
pub mod interface {

    /// Any object implementing this trait guarantees exclusive access to the data wrapped within
    /// the Mutex for the duration of the provided closure.
    pub trait Mutex {
        /// The type of the data that is wrapped by this mutex.
        type Data;

        /// Locks the mutex and grants the closure temporary mutable access to the wrapped data.
        fn lock<R>(&self, f: impl FnOnce(&mut Self::Data) -> R) -> R;

        /// Grants the closure access only if the lock is free right now.
        ///
        /// Interrupt context must never wait on process context, so the sweep uses this variant.
        fn try_lock<R>(&self, f: impl FnOnce(&mut Self::Data) -> R) -> Option<R>;
    }
}

/// A spinning lock shared between process context and interrupt context.
///
/// Process context holds it only for short bookkeeping updates; interrupt context only ever
/// uses [`interface::Mutex::try_lock`].
pub struct SpinLock<T>
where
    T: ?Sized,
{
    inner: spin::Mutex<T>,
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

impl<T> SpinLock<T> {
    /// Create an instance.
    pub const fn new(data: T) -> Self {
        Self {
            inner: spin::Mutex::new(data),
        }
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

//------------------------------------------------------------------------------
// OS Interface Code
//------------------------------------------------------------------------------

impl<T> interface::Mutex for SpinLock<T> {
    type Data = T;

    fn lock<R>(&self, f: impl FnOnce(&mut Self::Data) -> R) -> R {
        let mut data = self.inner.lock();
        f(&mut data)
    }

    fn try_lock<R>(&self, f: impl FnOnce(&mut Self::Data) -> R) -> Option<R> {
        let mut data = self.inner.try_lock()?;
        Some(f(&mut data))
    }
}
