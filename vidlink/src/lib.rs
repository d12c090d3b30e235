/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Shared-memory frame buffer protocol between a video output host and a
//! remote FPGA peer sitting behind a PCIe BAR.
//!
//! The host carves page-aligned frame slots out of the shared window, hands
//! them to the peer by flipping a per-frame state word and ringing a request
//! doorbell, and gets them back through an interrupt whose handler sweeps the
//! frame directory.

#![no_std]
#![allow(clippy::upper_case_acronyms)]
#![allow(clippy::enum_variant_names)]

extern crate alloc;

#[cfg(test)]
extern crate std;

#[macro_use]
pub mod macros;

pub mod allocator;
pub mod bridge;
pub mod config;
pub mod console;
pub mod devfile;
pub mod device;
pub mod doorbell;
pub mod format;
pub mod frame;
pub mod irq;
pub mod layout;
pub mod memory;
pub mod mm;
pub mod mmio_deref_wrapper;
pub mod pci;
pub mod peer;
pub mod region;
pub mod sim;
pub mod sync;

pub use {
    allocator::{FrameAllocator, FrameHandle},
    bridge::{BufferMeta, BufferSink, BufferState, VideoOutput},
    device::VideoOutDevice,
    frame::{Frame, FrameState, Side},
    region::SharedRegion,
};

/// Name used for log prefixes, resource files and region requests.
pub const DRIVER_NAME: &str = "vidlink";
