/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Memory windows: something both the CPU and the peer can see.
//!
//! All word accesses are volatile. An access outside the window, or not naturally aligned,
//! behaves like a read from a dead PCIe link: reads return all ones, writes are dropped.

use {
    crate::mm::PAGE_SIZE,
    alloc::alloc::{alloc_zeroed, dealloc, Layout},
    core::ptr::{self, NonNull},
};

/// What a master abort on the bus reads back as.
pub const FLOATING_BUS: u32 = 0xffff_ffff;

/// A mapped range of device-visible memory.
pub trait MemoryWindow: Send + Sync {
    /// CPU pointer to the first byte of the window.
    fn as_ptr(&self) -> *mut u8;

    /// Length of the window in bytes.
    fn len(&self) -> usize;

    /// Bus/physical address of the first byte, as the other side of the link sees it.
    fn phys_base(&self) -> u64;

    /// A window of zero length cannot hold anything.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Volatile 32-bit read.
    fn read_u32(&self, offset: usize) -> u32 {
        if !word_in_range(offset, 4, self.len()) {
            return FLOATING_BUS;
        }
        unsafe { ptr::read_volatile(self.as_ptr().add(offset) as *const u32) }
    }

    /// Volatile 32-bit write.
    fn write_u32(&self, offset: usize, value: u32) {
        if word_in_range(offset, 4, self.len()) {
            unsafe { ptr::write_volatile(self.as_ptr().add(offset) as *mut u32, value) }
        }
    }

    /// Volatile 64-bit read.
    fn read_u64(&self, offset: usize) -> u64 {
        if !word_in_range(offset, 8, self.len()) {
            return u64::MAX;
        }
        unsafe { ptr::read_volatile(self.as_ptr().add(offset) as *const u64) }
    }

    /// Volatile 64-bit write.
    fn write_u64(&self, offset: usize, value: u64) {
        if word_in_range(offset, 8, self.len()) {
            unsafe { ptr::write_volatile(self.as_ptr().add(offset) as *mut u64, value) }
        }
    }

    /// Copy bytes out of the window. Returns the number of bytes copied.
    fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> usize {
        let count = clamp_len(offset, dst.len(), self.len());
        if count > 0 {
            unsafe { ptr::copy_nonoverlapping(self.as_ptr().add(offset), dst.as_mut_ptr(), count) }
        }
        count
    }

    /// Copy bytes into the window. Returns the number of bytes copied.
    fn write_bytes(&self, offset: usize, src: &[u8]) -> usize {
        let count = clamp_len(offset, src.len(), self.len());
        if count > 0 {
            unsafe { ptr::copy_nonoverlapping(src.as_ptr(), self.as_ptr().add(offset), count) }
        }
        count
    }

    /// Fill a range with zeroes. Returns the number of bytes cleared.
    fn zero(&self, offset: usize, len: usize) -> usize {
        let count = clamp_len(offset, len, self.len());
        if count > 0 {
            unsafe { ptr::write_bytes(self.as_ptr().add(offset), 0, count) }
        }
        count
    }
}

fn word_in_range(offset: usize, width: usize, len: usize) -> bool {
    offset % width == 0 && offset.checked_add(width).is_some_and(|end| end <= len)
}

fn clamp_len(offset: usize, wanted: usize, len: usize) -> usize {
    if offset >= len {
        0
    } else {
        wanted.min(len - offset)
    }
}

//--------------------------------------------------------------------------------------------------
// Mapped hardware window
//--------------------------------------------------------------------------------------------------

/// A window onto memory mapped by someone else, e.g. an uncached BAR mapping.
///
/// Contains both the CPU-accessible pointer and the device-visible bus address.
#[derive(Debug, Clone, Copy)]
pub struct MappedWindow {
    cpu_ptr: NonNull<u8>,
    bus_addr: u64,
    size: usize,
}

impl MappedWindow {
    /// Create a new window.
    ///
    /// # Safety
    ///
    /// - `cpu_ptr` must point to a live mapping of at least `size` bytes for as long as the
    ///   window (and every copy of it) is in use
    /// - `bus_addr` must be the corresponding device-visible address
    pub const unsafe fn new(cpu_ptr: NonNull<u8>, bus_addr: u64, size: usize) -> Self {
        Self {
            cpu_ptr,
            bus_addr,
            size,
        }
    }
}

unsafe impl Send for MappedWindow {}
unsafe impl Sync for MappedWindow {}

impl MemoryWindow for MappedWindow {
    fn as_ptr(&self) -> *mut u8 {
        self.cpu_ptr.as_ptr()
    }

    fn len(&self) -> usize {
        self.size
    }

    fn phys_base(&self) -> u64 {
        self.bus_addr
    }
}

//--------------------------------------------------------------------------------------------------
// Host memory window
//--------------------------------------------------------------------------------------------------

/// Zeroed, page-aligned heap memory pretending to be a BAR.
///
/// Used by the simulated PCI function and by tests; both ends of the protocol can run in one
/// process against the same block.
pub struct HostMemory {
    ptr: NonNull<u8>,
    layout: Layout,
    bus_addr: u64,
}

impl HostMemory {
    /// Allocate `size` zeroed bytes that claim to live at bus address `bus_addr`.
    ///
    /// Returns `None` for a zero size or if the allocation fails.
    pub fn new(size: usize, bus_addr: u64) -> Option<Self> {
        if size == 0 {
            return None;
        }
        let layout = Layout::from_size_align(size, PAGE_SIZE).ok()?;
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })?;
        Some(Self {
            ptr,
            layout,
            bus_addr,
        })
    }
}

impl Drop for HostMemory {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

unsafe impl Send for HostMemory {}
unsafe impl Sync for HostMemory {}

impl MemoryWindow for HostMemory {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn len(&self) -> usize {
        self.layout.size()
    }

    fn phys_base(&self) -> u64 {
        self.bus_addr
    }
}

impl core::fmt::Debug for HostMemory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HostMemory")
            .field("ptr", &self.ptr)
            .field("bus_addr", &format_args!("{:#x}", self.bus_addr))
            .field("size", &format_args!("{:#x}", self.layout.size()))
            .finish()
    }
}
