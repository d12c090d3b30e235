/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! What the driver needs from the PCI bus.

use {
    crate::{
        irq::{IrqHandlerDescriptor, IrqNumber},
        memory::MemoryWindow,
    },
    alloc::sync::Arc,
    bitflags::bitflags,
};

/// Number of base address registers of a type 0 function.
pub const BAR_COUNT: usize = 6;

bitflags! {
    /// Kind of a BAR.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BarFlags: u32 {
        const MEMORY = 1 << 0;
        const IO = 1 << 1;
        const PREFETCH = 1 << 2;
        const MEM_64 = 1 << 3;
    }
}

/// One BAR as enumerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarInfo {
    /// Bus address.
    pub start: u64,
    pub len: usize,
    pub flags: BarFlags,
}

/// Resources the driver uses and the BAR each one lives in.
pub mod resource {
    /// Communication window holding the frame buffers.
    pub const SHARED_MEMORY: usize = 0;
    /// Interrupt acknowledge word, written by the host.
    pub const INTERRUPT_ACK: usize = 1;
    /// Request word, host to peer.
    pub const INTERRUPT_REQUEST: usize = 2;

    pub const COUNT: usize = 3;

    /// BAR of each resource, indexed by resource.
    pub const BARS: [usize; COUNT] = [0, 2, 3];

    pub const NAMES: [&str; COUNT] = ["shared memory", "interrupt ack", "interrupt request"];
}

/// PCI interfaces.
pub mod interface {
    use super::*;

    /// One PCI function, as offered by the bus the driver runs on.
    ///
    /// Fallible calls report a short reason; the caller turns it into a typed error.
    pub trait PciFunction: Send + Sync {
        /// Bus location, for log messages.
        fn name(&self) -> &str;

        fn enable(&self) -> Result<(), &'static str>;
        fn disable(&self);

        /// Claim every BAR for `owner`.
        fn request_regions(&self, owner: &'static str) -> Result<(), &'static str>;
        fn release_regions(&self);

        fn bar(&self, bar: usize) -> Option<BarInfo>;

        /// Map a whole BAR uncached. The mapping goes away with the last reference.
        fn map_bar(&self, bar: usize) -> Option<Arc<dyn MemoryWindow>>;

        fn irq(&self) -> Option<IrqNumber>;
        fn request_irq(&self, descriptor: IrqHandlerDescriptor) -> Result<(), &'static str>;
        fn free_irq(&self, irq: IrqNumber);
    }
}
