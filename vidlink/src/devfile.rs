/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Raw access to the PCI resources for debugging.
//!
//! Every probed device registers its three resources under consecutive minor numbers. Opening
//! a minor gives a file-like cursor over the mapped memory.

use {
    crate::{
        memory::MemoryWindow,
        mm::is_page_aligned,
        pci::resource,
        sync::{interface::Mutex, SpinLock},
    },
    alloc::sync::Arc,
    core::{fmt, ops::Range},
    snafu::Snafu,
};

//--------------------------------------------------------------------------------------------------
// Private Definitions
//--------------------------------------------------------------------------------------------------

const NUM_FILES: usize = 4 * resource::COUNT;

struct Entry {
    minor: u32,
    resource: Resource,
}

struct RegistryInner {
    files: [Option<Entry>; NUM_FILES],
}

fn minor_range(base_minor: u32) -> Option<Range<u32>> {
    let end = base_minor.checked_add(resource::COUNT as u32)?;
    Some(base_minor..end)
}

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum Error {
    #[snafu(display("no device behind minor {minor}"))]
    NoDevice { minor: u32 },
    #[snafu(display("resource has no memory"))]
    Empty,
    #[snafu(display("seek to {offset} is outside the resource"))]
    InvalidSeek { offset: i64 },
    #[snafu(display("resource at {address:#x} is not page aligned"))]
    Unaligned { address: u64 },
    #[snafu(display("minor {minor} is already registered"))]
    MinorInUse { minor: u32 },
    #[snafu(display("no room for {count} more files"))]
    RegistryFull { count: usize },
    #[snafu(display("minors from {base_minor} run past the last minor number"))]
    MinorRange { base_minor: u32 },
}

pub type Result<T> = core::result::Result<T, Error>;

/// One PCI resource as exposed through a file.
#[derive(Clone)]
pub struct Resource {
    /// Bus address of the resource.
    pub start: u64,
    /// Mapping, if the resource could be mapped.
    pub window: Option<Arc<dyn MemoryWindow>>,
}

/// Where a seek is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    Start(u64),
    Current(i64),
    End(i64),
}

/// Resource files of all probed devices, keyed by minor number.
#[derive(Clone)]
pub struct ResourceRegistry {
    inner: Arc<SpinLock<RegistryInner>>,
}

/// Keeps one device's files registered; unregisters them when dropped.
pub struct Registration {
    registry: ResourceRegistry,
    base_minor: u32,
}

/// An open resource file.
pub struct ResourceFile {
    minor: u32,
    resource: Resource,
    pos: u64,
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

impl Resource {
    pub fn new(start: u64, window: Option<Arc<dyn MemoryWindow>>) -> Self {
        Self { start, window }
    }

    /// Size of the accessible memory, 0 if not mapped.
    pub fn size(&self) -> u64 {
        self.window.as_ref().map_or(0, |w| w.len() as u64)
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("start", &format_args!("{:#x}", self.start))
            .field("size", &format_args!("{:#x}", self.size()))
            .finish()
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceRegistry {
    pub fn new() -> Self {
        const NONE: Option<Entry> = None;
        Self {
            inner: Arc::new(SpinLock::new(RegistryInner {
                files: [NONE; NUM_FILES],
            })),
        }
    }

    /// Register the resources of one device under `base_minor`, `base_minor + 1`, ...
    ///
    /// Either all of them get registered or none.
    pub fn register(
        &self,
        base_minor: u32,
        resources: [Resource; resource::COUNT],
    ) -> Result<Registration> {
        let minors = minor_range(base_minor).ok_or(Error::MinorRange { base_minor })?;
        self.inner.lock(|inner| {

            if let Some(minor) = minors
                .clone()
                .find(|m| inner.files.iter().flatten().any(|e| e.minor == *m))
            {
                return MinorInUseSnafu { minor }.fail();
            }
            let free = inner.files.iter().filter(|e| e.is_none()).count();
            if free < resource::COUNT {
                return RegistryFullSnafu {
                    count: resource::COUNT,
                }
                .fail();
            }

            let mut slots = inner.files.iter_mut().filter(|e| e.is_none());
            for (minor, resource) in minors.zip(resources) {
                if let Some(slot) = slots.next() {
                    debug!(FILES, "resource file {} registered: {:?}", minor, resource);
                    *slot = Some(Entry { minor, resource });
                }
            }
            Ok(())
        })?;

        Ok(Registration {
            registry: self.clone(),
            base_minor,
        })
    }

    fn unregister(&self, base_minor: u32) {
        let Some(minors) = minor_range(base_minor) else {
            return;
        };
        self.inner.lock(|inner| {
            // Last registered, first removed.
            for minor in minors.rev() {
                for slot in inner.files.iter_mut() {
                    if slot.as_ref().is_some_and(|e| e.minor == minor) {
                        *slot = None;
                        debug!(FILES, "resource file {} removed", minor);
                    }
                }
            }
        })
    }

    /// Open the resource behind `minor`.
    pub fn open(&self, minor: u32) -> Result<ResourceFile> {
        let resource = self
            .inner
            .lock(|inner| {
                inner
                    .files
                    .iter()
                    .flatten()
                    .find(|e| e.minor == minor)
                    .map(|e| e.resource.clone())
            })
            .ok_or(Error::NoDevice { minor })?;

        debug!(FILES, "opened minor {}: {:?}", minor, resource);
        Ok(ResourceFile {
            minor,
            resource,
            pos: 0,
        })
    }

    /// Walk all registered files.
    pub fn for_each(&self, mut f: impl FnMut(u32, &Resource)) {
        self.inner.lock(|inner| {
            inner
                .files
                .iter()
                .flatten()
                .for_each(|e| f(e.minor, &e.resource))
        })
    }

    /// Print all registered files.
    pub fn enumerate(&self) {
        let mut i: usize = 0;
        self.for_each(|minor, resource| {
            info!("      {}. minor {}: {:?}", i, minor, resource);
            i += 1;
        });
    }
}

impl Registration {
    pub fn base_minor(&self) -> u32 {
        self.base_minor
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.base_minor)
    }
}

impl ResourceFile {
    pub fn minor(&self) -> u32 {
        self.minor
    }

    pub fn size(&self) -> u64 {
        self.resource.size()
    }

    /// Current file position.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Read from the current position. 0 at or after the end.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        debug!(FILES, "read off={}, size={}", self.pos, buf.len());
        let Some(window) = &self.resource.window else {
            return Ok(0);
        };
        let count = clamp(self.pos, buf.len(), self.resource.size());
        if count == 0 {
            return Ok(0);
        }
        let count = window.read_bytes(self.pos as usize, &mut buf[..count]);
        self.pos += count as u64;
        Ok(count)
    }

    /// Write at the current position. 0 at or after the end.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        debug!(FILES, "write off={}, size={}", self.pos, buf.len());
        let window = match &self.resource.window {
            Some(window) if !window.is_empty() => window,
            _ => return NoDeviceSnafu { minor: self.minor }.fail(),
        };
        let count = clamp(self.pos, buf.len(), self.resource.size());
        if count == 0 {
            return Ok(0);
        }
        let count = window.write_bytes(self.pos as usize, &buf[..count]);
        self.pos += count as u64;
        Ok(count)
    }

    /// Move the file position. The result must lie inside the resource.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let size = self.resource.size() as i64;
        let offset = match pos {
            SeekFrom::Start(offset) => i64::try_from(offset).unwrap_or(i64::MAX),
            SeekFrom::Current(delta) => (self.pos as i64).saturating_add(delta),
            SeekFrom::End(delta) => size.saturating_add(delta),
        };
        if offset < 0 || offset >= size {
            return InvalidSeekSnafu { offset }.fail();
        }
        self.pos = offset as u64;
        Ok(self.pos)
    }

    /// Physical start to map for user space.
    pub fn mmap_target(&self) -> Result<u64> {
        debug!(MEMORY, "mmap minor {} at {:#x}", self.minor, self.resource.start);
        if self.resource.window.is_none() {
            return EmptySnafu.fail();
        }
        if !is_page_aligned(self.resource.start) {
            return UnalignedSnafu {
                address: self.resource.start,
            }
            .fail();
        }
        Ok(self.resource.start)
    }
}

fn clamp(pos: u64, wanted: usize, size: u64) -> usize {
    if pos >= size {
        0
    } else {
        wanted.min((size - pos) as usize)
    }
}
