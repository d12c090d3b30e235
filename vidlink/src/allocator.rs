/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Bump allocator for frame slots.
//!
//! Slots are carved from the frame area one after another and handed out as reference counted
//! [`FrameHandle`]s. Dropping the last handle of a slot gives its bytes back by moving the
//! cursor down, so slots must be released in reverse allocation order to be reused. Releasing
//! out of order is not refused; it only leaves the cursor pointing at the wrong place, and the
//! damage is logged.

use {
    crate::{
        frame::Frame,
        layout::{FRAME_AREA_OFFSET, MAX_FRAMES},
        mm::frame_record_size,
        region::{self, OutOfSlotsSnafu, SharedRegion},
        sync::{interface::Mutex, SpinLock},
    },
    alloc::sync::Arc,
    core::fmt,
};

struct Inner {
    region: SharedRegion,
    lock: SpinLock<()>,
}

/// Hands out frame slots from one shared region.
#[derive(Clone)]
pub struct FrameAllocator {
    inner: Arc<Inner>,
}

struct Slot {
    owner: Arc<Inner>,
    index: usize,
    offset: usize,
    full_size: u32,
    frame_size: u32,
}

/// Shared ownership of one allocated slot. The slot is released when the last clone drops.
#[derive(Clone)]
pub struct FrameHandle {
    slot: Arc<Slot>,
}

impl FrameAllocator {
    pub fn new(region: SharedRegion) -> Self {
        Self {
            inner: Arc::new(Inner {
                region,
                lock: SpinLock::new(()),
            }),
        }
    }

    pub fn region(&self) -> &SharedRegion {
        &self.inner.region
    }

    /// Carve a new slot holding `size` payload bytes.
    ///
    /// Nothing in the control page changes when this fails.
    pub fn allocate_frame(&self, size: usize) -> region::Result<FrameHandle> {
        let inner = &self.inner;
        let region = &inner.region;

        inner.lock.lock(|_| {
            let used = region.indices_used();
            let cursor = region.next_offset() as usize;
            // Record size and new cursor, if the slot fits the directory, the window and the
            // 32-bit control fields.
            let slot = frame_record_size(size)
                .and_then(|full_size| Some((full_size, cursor.checked_add(full_size)?)))
                .filter(|&(full_size, end)| {
                    (used as usize) < MAX_FRAMES
                        && region.fits(cursor, full_size)
                        && u32::try_from(end).is_ok()
                });

            let Some((full_size, end)) = slot else {
                warn!(
                    "no room for {} bytes: {} frames, cursor {:#x}, window {:#x}",
                    size,
                    used,
                    cursor,
                    region.len()
                );
                return OutOfSlotsSnafu { used, size }.fail();
            };

            debug!(
                MEMORY,
                "frame at index {}, offset {:#x} (next offset: {:#x})",
                used,
                cursor,
                end
            );

            let index = used as usize;
            let offset = FRAME_AREA_OFFSET + cursor;

            region.set_directory_entry(index, cursor as u32);
            Frame::new(region.window(), index, offset).format(full_size as u32, size as u32);

            region.set_indices_used(used + 1);
            region.set_next_offset(end as u32);

            Ok(FrameHandle {
                slot: Arc::new(Slot {
                    owner: self.inner.clone(),
                    index,
                    offset,
                    full_size: full_size as u32,
                    frame_size: size as u32,
                }),
            })
        })
    }

    /// Drop one reference to a slot. The slot goes back to the allocator with the last one.
    pub fn release_frame(&self, handle: FrameHandle) {
        debug!(
            MEMORY,
            "releasing frame #{} ({} references)",
            handle.index(),
            handle.ref_count()
        );
        drop(handle)
    }

    /// Non-owning view of a live frame.
    pub fn frame_by_index(&self, index: usize) -> region::Result<Frame<'_>> {
        self.inner.region.frame_by_index(index)
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        let region = &self.owner.region;

        self.owner.lock.lock(|_| {
            match region.indices_used() {
                0 => error!(
                    "frame #{} released with no frames in use (double free?)",
                    self.index
                ),
                used => {
                    region.set_indices_used(used - 1);
                    debug!(MEMORY, "frames remaining: {}", used - 1);
                }
            }

            let cursor = region.next_offset();
            if cursor >= self.full_size {
                region.set_next_offset(cursor - self.full_size);
                debug!(MEMORY, "last offset: {:#x}", cursor - self.full_size);
            } else {
                error!(
                    "frame cursor would go negative (offset={:#x}, full size={:#x}, frame size={})",
                    cursor,
                    self.full_size,
                    self.frame_size
                );
            }
        })
    }
}

impl FrameHandle {
    /// Directory index of the slot.
    pub fn index(&self) -> usize {
        self.slot.index
    }

    /// Record start relative to the window base.
    pub fn offset(&self) -> usize {
        self.slot.offset
    }

    /// Record size including the header page.
    pub fn full_size(&self) -> u32 {
        self.slot.full_size
    }

    /// Payload bytes requested at allocation.
    pub fn frame_size(&self) -> u32 {
        self.slot.frame_size
    }

    /// Number of live handles to this slot.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.slot)
    }

    pub fn frame(&self) -> Frame<'_> {
        Frame::new(self.slot.owner.region.window(), self.slot.index, self.slot.offset)
    }

    /// Bus address of the payload.
    pub fn payload_phys(&self) -> u64 {
        self.frame().payload_phys()
    }
}

impl fmt::Debug for FrameHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameHandle")
            .field("index", &self.slot.index)
            .field("offset", &format_args!("{:#x}", self.slot.offset))
            .field("full_size", &self.slot.full_size)
            .field("frame_size", &self.slot.frame_size)
            .field("refs", &self.ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            frame::FrameState,
            layout::control,
            memory::{HostMemory, MemoryWindow},
            mm::{is_page_aligned, PAGE_SIZE},
            region::{Error, Statistics},
        },
        alloc::vec::Vec,
    };

    fn allocator(pages: usize) -> FrameAllocator {
        let window: Arc<dyn MemoryWindow> =
            Arc::new(HostMemory::new(pages * PAGE_SIZE, 0x4000_0000).unwrap());
        FrameAllocator::new(SharedRegion::initialize(window).unwrap())
    }

    #[test]
    fn allocation_stamps_the_header() {
        let alloc = allocator(8);
        let handle = alloc.allocate_frame(100).unwrap();
        let frame = handle.frame();
        assert_eq!(handle.index(), 0);
        assert_eq!(handle.ref_count(), 1);
        assert_eq!(frame.full_size(), 2 * PAGE_SIZE as u32);
        assert_eq!(frame.frame_size(), 100);
        assert_eq!(frame.state(), Some(FrameState::Initial));
        assert_eq!(
            frame.host_kernel_address(),
            0x4000_0000 + 2 * PAGE_SIZE as u64
        );
        assert_eq!(alloc.region().directory_entry(0), 0);
        assert_eq!(alloc.region().next_offset(), 2 * PAGE_SIZE as u32);
    }

    #[test]
    fn count_tracks_live_handles() {
        let alloc = allocator(64);
        let mut live = Vec::new();
        for round in 0..40usize {
            if round % 3 == 2 {
                live.pop();
            } else if live.len() < MAX_FRAMES {
                live.push(alloc.allocate_frame(round * 100).unwrap());
            }
            assert_eq!(alloc.region().indices_used() as usize, live.len());
            assert!(live.len() <= MAX_FRAMES);
        }
    }

    #[test]
    fn every_slot_is_page_aligned() {
        let alloc = allocator(64);
        let sizes = [1, 4095, 4096, 4097, 12345, 3];
        let handles: Vec<_> = sizes
            .iter()
            .map(|&size| alloc.allocate_frame(size).unwrap())
            .collect();
        for handle in &handles {
            let frame = handle.frame();
            assert!(is_page_aligned(frame.phys_addr()));
            assert!(is_page_aligned(frame.cpu_addr() as u64));
            assert!(is_page_aligned(handle.payload_phys()));
        }
    }

    #[test]
    fn lifo_release_returns_cursor_to_zero() {
        let alloc = allocator(64);
        let mut handles: Vec<_> = [10, 5000, 1, 9000]
            .iter()
            .map(|&size| alloc.allocate_frame(size).unwrap())
            .collect();
        while let Some(handle) = handles.pop() {
            alloc.release_frame(handle);
        }
        assert_eq!(alloc.region().next_offset(), 0);
        assert_eq!(alloc.region().indices_used(), 0);
    }

    #[test]
    fn clones_share_one_slot() {
        let alloc = allocator(8);
        let handle = alloc.allocate_frame(1).unwrap();
        let other = handle.clone();
        assert_eq!(other.ref_count(), 2);
        alloc.release_frame(handle);
        assert_eq!(alloc.region().indices_used(), 1);
        alloc.release_frame(other);
        assert_eq!(alloc.region().indices_used(), 0);
    }

    #[test]
    fn seventeenth_frame_does_not_fit() {
        let alloc = allocator(64);
        let handles: Vec<_> = (0..MAX_FRAMES)
            .map(|_| alloc.allocate_frame(1).unwrap())
            .collect();
        let before = alloc.region().statistics();
        let directory: Vec<_> = (0..MAX_FRAMES)
            .map(|i| alloc.region().directory_entry(i))
            .collect();

        assert_eq!(
            alloc.allocate_frame(1).unwrap_err(),
            Error::OutOfSlots {
                used: MAX_FRAMES as u32,
                size: 1
            }
        );
        assert_eq!(alloc.region().statistics(), before);
        for (i, entry) in directory.iter().enumerate() {
            assert_eq!(alloc.region().directory_entry(i), *entry);
        }
        drop(handles);
    }

    #[test]
    fn window_end_is_respected() {
        // Control page plus room for exactly two one-page payloads.
        let alloc = allocator(5);
        let _a = alloc.allocate_frame(PAGE_SIZE).unwrap();
        let before = alloc.region().statistics();
        assert!(matches!(
            alloc.allocate_frame(PAGE_SIZE + 1),
            Err(Error::OutOfSlots { used: 1, .. })
        ));
        assert_eq!(alloc.region().statistics(), before);
        assert!(alloc.allocate_frame(PAGE_SIZE).is_ok());
    }

    #[test]
    fn oversized_request_is_refused() {
        let alloc = allocator(8);
        let before = alloc.region().statistics();
        for size in [usize::MAX, usize::MAX - 100, usize::MAX - PAGE_SIZE, u32::MAX as usize] {
            assert_eq!(
                alloc.allocate_frame(size).unwrap_err(),
                Error::OutOfSlots { used: 0, size }
            );
        }
        assert_eq!(alloc.region().statistics(), before);
        assert_eq!(alloc.allocate_frame(1).unwrap().frame_size(), 1);
    }

    #[test]
    fn corrupted_counters_are_survived() {
        let alloc = allocator(8);
        let handle = alloc.allocate_frame(1).unwrap();
        let w = alloc.region().window();
        w.write_u32(control::INDICES_USED, 0);
        w.write_u32(control::NEXT_OFFSET, 0);

        alloc.release_frame(handle);

        assert_eq!(
            alloc.region().statistics(),
            Statistics {
                indices_used: 0,
                next_offset: 0,
                ..Statistics::default()
            }
        );
    }
}
