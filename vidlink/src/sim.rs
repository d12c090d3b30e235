/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! A PCI function made of host memory.
//!
//! Behaves like the real card as far as the driver can tell: three BARs, one interrupt line.
//! Every bus operation is recorded, and any of them can be made to fail.

use {
    crate::{
        irq::{IrqHandlerDescriptor, IrqNumber, IrqReturn},
        memory::{HostMemory, MemoryWindow, FLOATING_BUS},
        mm::PAGE_SIZE,
        pci::{interface::PciFunction, resource, BarFlags, BarInfo, BAR_COUNT},
        peer::interface::InterruptLine,
        sync::{interface::Mutex, SpinLock},
    },
    alloc::{string::String, sync::Arc, vec::Vec},
    bitflags::bitflags,
};

bitflags! {
    /// Bus operations to break.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Faults: u32 {
        const ENABLE = 1 << 0;
        const REGIONS = 1 << 1;
        const MAP_SHARED = 1 << 2;
        const MAP_ACK = 1 << 3;
        const MAP_REQUEST = 1 << 4;
        const NO_IRQ = 1 << 5;
        const IRQ = 1 << 6;
        /// Shared memory reads back as all ones.
        const DEAD_LINK = 1 << 7;
    }
}

/// One recorded bus operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Enabled,
    Disabled,
    RegionsRequested,
    RegionsReleased,
    Mapped(usize),
    Unmapped(usize),
    IrqRequested(IrqNumber),
    IrqFreed(IrqNumber),
}

type Log = Arc<SpinLock<Vec<Event>>>;

struct Bar {
    info: BarInfo,
    memory: Arc<HostMemory>,
}

/// Simulated card.
pub struct SimulatedFunction {
    name: String,
    bars: [Option<Bar>; BAR_COUNT],
    irq: IrqNumber,
    faults: Faults,
    handler: SpinLock<Option<IrqHandlerDescriptor>>,
    log: Log,
}

/// Bus address of the shared window.
pub const SHARED_BUS_ADDRESS: u64 = 0x8000_0000;
/// Bus address of the ack word.
pub const ACK_BUS_ADDRESS: u64 = 0x9000_0000;
/// Bus address of the request word.
pub const REQUEST_BUS_ADDRESS: u64 = 0x9000_1000;

impl SimulatedFunction {
    pub const IRQ: IrqNumber = 42;

    /// A card with a shared window of `shared_size` bytes.
    pub fn new(shared_size: usize) -> Option<Self> {
        let bar = |start: u64, len: usize| -> Option<Bar> {
            Some(Bar {
                info: BarInfo {
                    start,
                    len,
                    flags: BarFlags::MEMORY,
                },
                memory: Arc::new(HostMemory::new(len, start)?),
            })
        };

        let mut bars: [Option<Bar>; BAR_COUNT] = Default::default();
        bars[resource::BARS[resource::SHARED_MEMORY]] = Some(bar(SHARED_BUS_ADDRESS, shared_size)?);
        bars[resource::BARS[resource::INTERRUPT_ACK]] = Some(bar(ACK_BUS_ADDRESS, PAGE_SIZE)?);
        bars[resource::BARS[resource::INTERRUPT_REQUEST]] =
            Some(bar(REQUEST_BUS_ADDRESS, PAGE_SIZE)?);

        Some(Self {
            name: String::from("sim:00:00.0"),
            bars,
            irq: Self::IRQ,
            faults: Faults::empty(),
            handler: SpinLock::new(None),
            log: Arc::new(SpinLock::new(Vec::new())),
        })
    }

    /// Break the given operations.
    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    /// Direct view of a BAR, as the peer sees it. Not recorded.
    pub fn memory(&self, bar: usize) -> Option<Arc<dyn MemoryWindow>> {
        let bar = self.bars.get(bar)?.as_ref()?;
        Some(bar.memory.clone())
    }

    /// Everything the driver did to the card so far.
    pub fn events(&self) -> Vec<Event> {
        self.log.lock(|log| log.clone())
    }

    pub fn has_irq_handler(&self) -> bool {
        self.handler.lock(|h| h.is_some())
    }

    /// Deliver an interrupt to whoever registered for it.
    pub fn raise_irq(&self) -> IrqReturn {
        // The handler may free its own line, so it runs outside the lock.
        let handler = self.handler.lock(|h| h.as_ref().map(|d| d.handler().clone()));
        match handler {
            Some(handler) => handler.handle(),
            None => IrqReturn::None,
        }
    }

    fn record(&self, event: Event) {
        self.log.lock(|log| log.push(event))
    }

    fn fails(&self, fault: Faults) -> bool {
        self.faults.contains(fault)
    }
}

impl PciFunction for SimulatedFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn enable(&self) -> Result<(), &'static str> {
        if self.fails(Faults::ENABLE) {
            return Err("device does not respond");
        }
        self.record(Event::Enabled);
        Ok(())
    }

    fn disable(&self) {
        self.record(Event::Disabled)
    }

    fn request_regions(&self, _owner: &'static str) -> Result<(), &'static str> {
        if self.fails(Faults::REGIONS) {
            return Err("regions busy");
        }
        self.record(Event::RegionsRequested);
        Ok(())
    }

    fn release_regions(&self) {
        self.record(Event::RegionsReleased)
    }

    fn bar(&self, bar: usize) -> Option<BarInfo> {
        Some(self.bars.get(bar)?.as_ref()?.info)
    }

    fn map_bar(&self, bar: usize) -> Option<Arc<dyn MemoryWindow>> {
        let fault = match bar {
            0 => Faults::MAP_SHARED,
            2 => Faults::MAP_ACK,
            3 => Faults::MAP_REQUEST,
            _ => Faults::empty(),
        };
        if !fault.is_empty() && self.fails(fault) {
            return None;
        }
        let memory = self.bars.get(bar)?.as_ref()?.memory.clone();
        self.record(Event::Mapped(bar));
        Some(Arc::new(Mapping {
            memory,
            bar,
            dead: bar == 0 && self.fails(Faults::DEAD_LINK),
            log: self.log.clone(),
        }))
    }

    fn irq(&self) -> Option<IrqNumber> {
        (!self.fails(Faults::NO_IRQ)).then_some(self.irq)
    }

    fn request_irq(&self, descriptor: IrqHandlerDescriptor) -> Result<(), &'static str> {
        if self.fails(Faults::IRQ) {
            return Err("interrupt line busy");
        }
        if descriptor.number() != self.irq {
            return Err("no such interrupt");
        }
        self.handler.lock(|h| *h = Some(descriptor));
        self.record(Event::IrqRequested(self.irq));
        Ok(())
    }

    fn free_irq(&self, irq: IrqNumber) {
        let handler = self.handler.lock(|h| h.take());
        self.record(Event::IrqFreed(irq));
        // Drop the handler outside the lock, it may hold the last reference to the driver.
        drop(handler);
    }
}

impl InterruptLine for SimulatedFunction {
    fn raise(&self) {
        self.raise_irq();
    }
}

/// A driver mapping of one BAR.
struct Mapping {
    memory: Arc<HostMemory>,
    bar: usize,
    dead: bool,
    log: Log,
}

impl MemoryWindow for Mapping {
    fn as_ptr(&self) -> *mut u8 {
        self.memory.as_ptr()
    }

    fn len(&self) -> usize {
        self.memory.len()
    }

    fn phys_base(&self) -> u64 {
        self.memory.phys_base()
    }

    fn read_u32(&self, offset: usize) -> u32 {
        if self.dead {
            return FLOATING_BUS;
        }
        self.memory.read_u32(offset)
    }

    fn read_u64(&self, offset: usize) -> u64 {
        if self.dead {
            return u64::MAX;
        }
        self.memory.read_u64(offset)
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        let bar = self.bar;
        self.log.lock(|log| log.push(Event::Unmapped(bar)))
    }
}
