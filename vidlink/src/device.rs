/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Device lifecycle: probe and remove.
//!
//! Every resource acquired during probe is held by a guard. If a later step fails, the guards
//! taken so far drop in reverse order and the function is left as it was found. A probed
//! [`VideoOutDevice`] keeps the same guards and releases them in the same reverse order when
//! it is removed.

use {
    crate::{
        allocator::FrameAllocator,
        bridge::{BufferSink, VideoOutput},
        config::{DebugFlags, DriverConfig},
        devfile::{self, Registration, Resource, ResourceRegistry},
        doorbell::{Doorbell, FlagRegister},
        irq::{interface::IrqHandler, IrqHandlerDescriptor, IrqNumber, IrqReturn},
        memory::MemoryWindow,
        pci::{interface::PciFunction, resource},
        region::{self, SharedRegion},
        DRIVER_NAME,
    },
    alloc::{string::String, sync::Arc},
    core::sync::atomic::{AtomicBool, Ordering},
    snafu::Snafu,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("could not enable PCI device: {reason}"))]
    EnableFailed { reason: &'static str },
    #[snafu(display("could not request PCI regions: {reason}"))]
    RegionsUnavailable { reason: &'static str },
    #[snafu(display("could not map PCI resource #{bar}"))]
    MapFailed { bar: usize },
    #[snafu(display("device not present: {source}"))]
    DeviceNotPresent { source: region::Error },
    #[snafu(display("could not create resource files: {source}"))]
    ResourceFiles { source: devfile::Error },
    #[snafu(display("device has no interrupt line"))]
    NoIrq,
    #[snafu(display("could not request interrupt {irq}: {reason}"))]
    IrqUnavailable { irq: IrqNumber, reason: &'static str },
}

pub type Result<T> = core::result::Result<T, Error>;

//--------------------------------------------------------------------------------------------------
// Guards
//--------------------------------------------------------------------------------------------------

struct Enabled(Arc<dyn PciFunction>);

impl Drop for Enabled {
    fn drop(&mut self) {
        self.0.disable();
        debug!(RESOURCES, "{}: disabled", self.0.name());
    }
}

struct Regions(Arc<dyn PciFunction>);

impl Drop for Regions {
    fn drop(&mut self) {
        self.0.release_regions();
        debug!(RESOURCES, "{}: regions released", self.0.name());
    }
}

/// The interrupt line, shared between the device and its own handler.
struct IrqLine {
    pci: Arc<dyn PciFunction>,
    number: IrqNumber,
    held: AtomicBool,
}

impl IrqLine {
    /// Give the line back. Safe to call more than once.
    fn free(&self) {
        if self.held.swap(false, Ordering::AcqRel) {
            self.pci.free_irq(self.number);
            debug!(RESOURCES, "interrupt {} freed", self.number);
        }
    }

    fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

struct IrqGuard(Arc<IrqLine>);

impl Drop for IrqGuard {
    fn drop(&mut self) {
        self.0.free()
    }
}

//--------------------------------------------------------------------------------------------------
// Interrupt handler
//--------------------------------------------------------------------------------------------------

struct Isr {
    video: Arc<VideoOutput>,
    doorbell: Arc<Doorbell>,
    line: Arc<IrqLine>,
}

impl IrqHandler for Isr {
    fn handle(&self) -> IrqReturn {
        if let Err(e) = self.video.sweep() {
            error!("{}", e);
            error!(
                "to prevent further problems, the device interrupt (#{}) is disabled; \
                 video output stops until the device is probed again",
                self.line.number
            );
            self.line.free();
        }

        self.doorbell.acknowledge();
        IrqReturn::Handled
    }
}

//--------------------------------------------------------------------------------------------------
// Device
//--------------------------------------------------------------------------------------------------

/// A probed video output device.
///
/// Fields drop top to bottom, which is the reverse of the order probe acquires them.
pub struct VideoOutDevice {
    irq: IrqGuard,
    video: Arc<VideoOutput>,
    files: Option<Registration>,
    doorbell: Arc<Doorbell>,
    region: SharedRegion,
    _regions: Regions,
    _enabled: Enabled,
    pci: Arc<dyn PciFunction>,
}

impl VideoOutDevice {
    /// Bring up the device behind `pci`.
    ///
    /// Finished buffers are reported to `sink`. With [`DebugFlags::DEVICEFILE`] set in `config`
    /// the three resources are also registered in `files`.
    pub fn probe(
        pci: Arc<dyn PciFunction>,
        config: &DriverConfig,
        sink: Arc<dyn BufferSink>,
        files: &ResourceRegistry,
    ) -> Result<Self> {
        config.apply();
        debug!(CALLTRACE, "-> probe({})", pci.name());
        debug!(CONFIG, "{:?}", config);
        info!("probing device {}", pci.name());

        pci.enable()
            .map_err(|reason| Error::EnableFailed { reason })?;
        let enabled = Enabled(pci.clone());

        pci.request_regions(DRIVER_NAME)
            .map_err(|reason| Error::RegionsUnavailable { reason })?;
        let regions = Regions(pci.clone());

        if config.debug.contains(DebugFlags::RESOURCES) {
            for bar in 0..crate::pci::BAR_COUNT {
                if let Some(info) = pci.bar(bar) {
                    info!(
                        "{}: resource #{}: {:#x}, len={:#x}, {:?}",
                        pci.name(),
                        bar,
                        info.start,
                        info.len,
                        info.flags
                    );
                }
            }
        }

        let windows = map_resources(&*pci)?;
        let [shared, ack, request] = windows.clone();
        let shared = shared.ok_or(Error::MapFailed {
            bar: resource::BARS[resource::SHARED_MEMORY],
        })?;

        let region = SharedRegion::initialize(shared)
            .map_err(|source| Error::DeviceNotPresent { source })?;

        let doorbell = Arc::new(Doorbell::new(
            ack.and_then(FlagRegister::new),
            request.and_then(FlagRegister::new),
        ));
        if !doorbell.is_complete() {
            warn!("doorbell registers missing, the link runs degraded");
        }

        let registration = if config.device_files() {
            let [r0, r1, r2] = windows;
            let start = |res: usize| {
                pci.bar(resource::BARS[res])
                    .map_or(0, |info| info.start)
            };
            let resources = [
                Resource::new(start(0), r0),
                Resource::new(start(1), r1),
                Resource::new(start(2), r2),
            ];
            Some(
                files
                    .register(config.base_minor, resources)
                    .map_err(|source| Error::ResourceFiles { source })?,
            )
        } else {
            None
        };

        if registration.is_some() && config.debug.contains(DebugFlags::FILES) {
            info!("resource files:");
            files.enumerate();
        }

        let video = Arc::new(VideoOutput::new(
            FrameAllocator::new(region.clone()),
            doorbell.clone(),
            sink,
        ));
        video.set_min_buffers(config.min_buffers);
        region.set_device_ref(Arc::as_ptr(&video) as usize as u64);

        let number = pci.irq().ok_or(Error::NoIrq)?;
        let line = Arc::new(IrqLine {
            pci: pci.clone(),
            number,
            held: AtomicBool::new(true),
        });
        let isr = Arc::new(Isr {
            video: video.clone(),
            doorbell: doorbell.clone(),
            line: line.clone(),
        });
        if let Err(reason) = pci.request_irq(IrqHandlerDescriptor::new(number, DRIVER_NAME, isr)) {
            // Never registered, nothing to free.
            line.held.store(false, Ordering::Release);
            return IrqUnavailableSnafu { irq: number, reason }.fail();
        }
        let irq = IrqGuard(line);

        info!(
            "driver loaded successfully ({}) PCI dev={}, int #{}",
            describe_debug(config.debug),
            pci.name(),
            number
        );

        // Clear a stale interrupt, then tell the peer where the stream stands.
        doorbell.acknowledge();
        doorbell.signal_request();

        Ok(Self {
            irq,
            video,
            files: registration,
            doorbell,
            region,
            _regions: regions,
            _enabled: enabled,
            pci,
        })
    }

    /// Tear the device down. Equivalent to dropping it.
    pub fn remove(self) {
        let name = String::from(self.pci.name());
        debug!(CALLTRACE, "-> remove({})", name);
        drop(self);
        info!("{}: driver removed", name);
    }

    pub fn video(&self) -> &Arc<VideoOutput> {
        &self.video
    }

    pub fn region(&self) -> &SharedRegion {
        &self.region
    }

    pub fn doorbell(&self) -> &Doorbell {
        &self.doorbell
    }

    /// Base minor of the resource files, if they were created.
    pub fn files_base_minor(&self) -> Option<u32> {
        self.files.as_ref().map(Registration::base_minor)
    }

    /// False once the interrupt handler gave up on the link.
    pub fn irq_enabled(&self) -> bool {
        self.irq.0.is_held()
    }
}

type Windows = [Option<Arc<dyn MemoryWindow>>; resource::COUNT];

fn map_resources(pci: &dyn PciFunction) -> Result<Windows> {
    let mut windows: Windows = Default::default();
    for (index, window) in windows.iter_mut().enumerate() {
        let bar = resource::BARS[index];
        *window = pci.map_bar(bar);
        match window {
            Some(w) => debug!(
                RESOURCES,
                "PCI resource #{} mapped to index {} ({}), size={:#x}",
                bar,
                index,
                resource::NAMES[index],
                w.len()
            ),
            None if index == resource::SHARED_MEMORY => {
                error!("could not map PCI resource #{} to index {}", bar, index);
                return MapFailedSnafu { bar }.fail();
            }
            None => warn!("could not map PCI resource #{} ({})", bar, resource::NAMES[index]),
        }
    }
    Ok(windows)
}

fn describe_debug(flags: DebugFlags) -> String {
    use core::fmt::Write;

    if flags.is_empty() {
        return String::from("no debug");
    }
    let mut text = String::from("with debug:");
    for (name, _) in flags.iter_names() {
        let _ = write!(text, " {}", name.to_ascii_lowercase());
    }
    text
}
