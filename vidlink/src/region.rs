/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! The shared window: control page accessors and directory lookups.

use {
    crate::{
        frame::Frame,
        layout::{control as off, StreamInfo, CONTROL_PAGE_SIZE, FRAME_AREA_OFFSET, MAX_FRAMES},
        memory::MemoryWindow,
        mm::PAGE_SIZE,
    },
    alloc::sync::Arc,
    core::{
        fmt,
        sync::atomic::{fence, Ordering},
    },
    snafu::Snafu,
};

#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("shared memory does not respond (indices_used reads {indices_used:#x})"))]
    DeviceNotPresent { indices_used: u32 },
    #[snafu(display("shared window of {len:#x} bytes cannot hold the control page"))]
    WindowTooSmall { len: usize },
    #[snafu(display("no free frame slot for {size} bytes ({used} slots in use)"))]
    OutOfSlots { used: u32, size: usize },
    #[snafu(display("frame #{index} does not exist ({used} slots in use)"))]
    NoSuchFrame { index: usize, used: u32 },
    #[snafu(display("unaligned frame #{index} at offset {offset:#x} (internal driver error)"))]
    AlignmentViolation { index: usize, offset: usize },
    #[snafu(display("{used} frames in use, the memory map is probably lost"))]
    LinkLost { used: u32 },
}

pub type Result<T> = core::result::Result<T, Error>;

/// Counters of the control page.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Statistics {
    pub indices_used: u32,
    pub next_offset: u32,
    pub next_serial: u32,
    pub frames_dropped: u32,
    pub input_frames: u32,
    pub input_fps: i32,
}

/// Handle to the shared window. Clones refer to the same memory.
#[derive(Clone)]
pub struct SharedRegion {
    window: Arc<dyn MemoryWindow>,
}

impl SharedRegion {
    /// Take over a freshly mapped window as the host.
    ///
    /// Clears every host-owned control field and checks the memory actually holds what was
    /// written. The peer's back-reference is left alone.
    pub fn initialize(window: Arc<dyn MemoryWindow>) -> Result<Self> {
        let region = Self::attach(window)?;
        let w = region.window();

        w.zero(0, off::PEER);
        w.zero(off::HOST, off::SIZE - off::HOST);

        w.write_u32(off::INDICES_USED, 0);
        let indices_used = w.read_u32(off::INDICES_USED);
        if indices_used != 0 {
            return DeviceNotPresentSnafu { indices_used }.fail();
        }

        w.write_u64(off::HOST_KERNEL_ADDRESS, w.phys_base());

        debug!(
            MEMORY,
            "shared region initialized: {:#x} bytes at bus {:#x}",
            w.len(),
            w.phys_base()
        );
        Ok(region)
    }

    /// Use a window some other party has initialized, without touching it.
    pub fn attach(window: Arc<dyn MemoryWindow>) -> Result<Self> {
        if window.len() < CONTROL_PAGE_SIZE {
            return WindowTooSmallSnafu { len: window.len() }.fail();
        }
        Ok(Self { window })
    }

    pub fn window(&self) -> &dyn MemoryWindow {
        &*self.window
    }

    /// Total size of the window, control page included.
    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn phys_base(&self) -> u64 {
        self.window.phys_base()
    }

    fn read(&self, field: usize) -> u32 {
        self.window.read_u32(field)
    }

    fn write(&self, field: usize, value: u32) {
        self.window.write_u32(field, value)
    }

    //----------------------------------------------------------------------------------------------
    // Allocator bookkeeping
    //----------------------------------------------------------------------------------------------

    /// Number of directory entries in use.
    pub fn indices_used(&self) -> u32 {
        let used = self.read(off::INDICES_USED);
        // Directory entries are published before the count.
        fence(Ordering::Acquire);
        used
    }

    pub(crate) fn set_indices_used(&self, used: u32) {
        fence(Ordering::Release);
        self.write(off::INDICES_USED, used)
    }

    /// Allocation cursor, relative to the frame area.
    pub fn next_offset(&self) -> u32 {
        self.read(off::NEXT_OFFSET)
    }

    pub(crate) fn set_next_offset(&self, offset: u32) {
        self.write(off::NEXT_OFFSET, offset)
    }

    /// Directory entry `index`, relative to the frame area. Not checked against the count.
    pub fn directory_entry(&self, index: usize) -> u32 {
        if index >= MAX_FRAMES {
            return 0;
        }
        self.read(off::directory_entry(index))
    }

    pub(crate) fn set_directory_entry(&self, index: usize, offset: u32) {
        if index < MAX_FRAMES {
            self.write(off::directory_entry(index), offset)
        }
    }

    /// Bytes available to frame records.
    pub fn frame_area_len(&self) -> usize {
        self.len().saturating_sub(FRAME_AREA_OFFSET)
    }

    //----------------------------------------------------------------------------------------------
    // Counters
    //----------------------------------------------------------------------------------------------

    /// Advance the serial counter and return the new value. Wraps silently.
    pub fn bump_serial(&self) -> u32 {
        let serial = self.read(off::NEXT_SERIAL).wrapping_add(1);
        self.write(off::NEXT_SERIAL, serial);
        serial
    }

    pub fn count_dropped(&self) {
        let dropped = self.read(off::FRAMES_DROPPED).wrapping_add(1);
        self.write(off::FRAMES_DROPPED, dropped)
    }

    pub fn count_input(&self) {
        let input = self.read(off::INPUT_FRAMES).wrapping_add(1);
        self.write(off::INPUT_FRAMES, input)
    }

    pub fn statistics(&self) -> Statistics {
        Statistics {
            indices_used: self.read(off::INDICES_USED),
            next_offset: self.read(off::NEXT_OFFSET),
            next_serial: self.read(off::NEXT_SERIAL),
            frames_dropped: self.read(off::FRAMES_DROPPED),
            input_frames: self.read(off::INPUT_FRAMES),
            input_fps: self.read(off::INPUT_FPS) as i32,
        }
    }

    //----------------------------------------------------------------------------------------------
    // Stream
    //----------------------------------------------------------------------------------------------

    pub fn stream(&self) -> StreamInfo {
        StreamInfo {
            width: self.read(off::STREAM_WIDTH),
            height: self.read(off::STREAM_HEIGHT),
            fourcc: self.read(off::STREAM_FOURCC),
            numerator: self.read(off::STREAM_NUMERATOR),
            denominator: self.read(off::STREAM_DENOMINATOR),
            active: self.read(off::STREAM_ACTIVE),
        }
    }

    pub fn set_stream_format(&self, width: u32, height: u32, fourcc: u32) {
        self.write(off::STREAM_WIDTH, width);
        self.write(off::STREAM_HEIGHT, height);
        self.write(off::STREAM_FOURCC, fourcc);
    }

    pub fn set_frame_rate(&self, numerator: u32, denominator: u32) {
        self.write(off::STREAM_NUMERATOR, numerator);
        self.write(off::STREAM_DENOMINATOR, denominator);
    }

    pub fn set_stream_active(&self, active: bool) {
        self.write(off::STREAM_ACTIVE, u32::from(active))
    }

    //----------------------------------------------------------------------------------------------
    // Back-references
    //----------------------------------------------------------------------------------------------

    /// Bus address of the window, as recorded at initialization.
    pub fn host_kernel_address(&self) -> u64 {
        self.window.read_u64(off::HOST_KERNEL_ADDRESS)
    }

    /// Host device cookie, opaque to the peer.
    pub fn device_ref(&self) -> u64 {
        self.window.read_u64(off::HOST_DEVICE_REF)
    }

    pub fn set_device_ref(&self, device_ref: u64) {
        self.window.write_u64(off::HOST_DEVICE_REF, device_ref)
    }

    pub fn peer_kernel_address(&self) -> u32 {
        self.read(off::PEER_KERNEL_ADDRESS)
    }

    pub fn peer_frame_index(&self) -> u32 {
        self.read(off::PEER_FRAME_INDEX)
    }

    /// Peer side only.
    pub fn set_peer_reference(&self, kernel_address: u32, frame_index: u32) {
        self.write(off::PEER_KERNEL_ADDRESS, kernel_address);
        self.write(off::PEER_FRAME_INDEX, frame_index);
    }

    //----------------------------------------------------------------------------------------------
    // Frames
    //----------------------------------------------------------------------------------------------

    /// View of a live frame.
    pub fn frame_by_index(&self, index: usize) -> Result<Frame<'_>> {
        let used = self.indices_used();
        if used as usize > MAX_FRAMES {
            return LinkLostSnafu { used }.fail();
        }
        if index >= used as usize {
            return NoSuchFrameSnafu { index, used }.fail();
        }
        Ok(self.frame_at(index))
    }

    /// Number of live frames, refusing a count the directory cannot hold.
    pub fn checked_count(&self) -> Result<usize> {
        let used = self.indices_used();
        if used as usize > MAX_FRAMES {
            return LinkLostSnafu { used }.fail();
        }
        Ok(used as usize)
    }

    /// View of frame `index` after checking its record is page aligned and inside the window.
    ///
    /// The caller is responsible for `index` being below [`Self::checked_count`].
    pub fn checked_frame(&self, index: usize) -> Result<Frame<'_>> {
        let frame = self.frame_at(index);
        if !frame.is_page_aligned() || !frame.is_in_bounds() {
            return AlignmentViolationSnafu {
                index,
                offset: frame.offset(),
            }
            .fail();
        }
        Ok(frame)
    }

    pub(crate) fn frame_at(&self, index: usize) -> Frame<'_> {
        let offset = FRAME_AREA_OFFSET + self.directory_entry(index) as usize;
        Frame::new(self.window(), index, offset)
    }

    /// Whether `len` more bytes fit behind the cursor.
    pub(crate) fn fits(&self, cursor: usize, len: usize) -> bool {
        FRAME_AREA_OFFSET
            .checked_add(cursor)
            .and_then(|end| end.checked_add(len))
            .is_some_and(|end| end <= self.len())
    }
}

impl fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedRegion")
            .field("phys_base", &format_args!("{:#x}", self.phys_base()))
            .field("len", &format_args!("{:#x}", self.len()))
            .field("statistics", &self.statistics())
            .finish()
    }
}

static_assertions::const_assert!(FRAME_AREA_OFFSET % PAGE_SIZE == 0);

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::memory::{HostMemory, FLOATING_BUS},
    };

    /// A window behind a link that never came up.
    struct DeadLink(HostMemory);

    impl MemoryWindow for DeadLink {
        fn as_ptr(&self) -> *mut u8 {
            self.0.as_ptr()
        }
        fn len(&self) -> usize {
            self.0.len()
        }
        fn phys_base(&self) -> u64 {
            self.0.phys_base()
        }
        fn read_u32(&self, _offset: usize) -> u32 {
            FLOATING_BUS
        }
    }

    fn window(pages: usize) -> Arc<dyn MemoryWindow> {
        Arc::new(HostMemory::new(pages * PAGE_SIZE, 0x2000_0000).unwrap())
    }

    #[test]
    fn initialize_clears_host_fields_only() {
        let w = window(4);
        w.write_u32(off::INDICES_USED, 5);
        w.write_u32(off::NEXT_SERIAL, 77);
        w.write_u32(off::PEER_FRAME_INDEX, 3);
        w.write_u32(off::STREAM_ACTIVE, 1);

        let region = SharedRegion::initialize(w).unwrap();
        assert_eq!(region.statistics(), Statistics::default());
        assert_eq!(region.stream(), StreamInfo::default());
        assert_eq!(region.peer_frame_index(), 3);
        assert_eq!(region.host_kernel_address(), 0x2000_0000);
    }

    #[test]
    fn dead_link_is_not_present() {
        let dead = Arc::new(DeadLink(HostMemory::new(2 * PAGE_SIZE, 0).unwrap()));
        assert_eq!(
            SharedRegion::initialize(dead).unwrap_err(),
            Error::DeviceNotPresent {
                indices_used: FLOATING_BUS
            }
        );
    }

    #[test]
    fn tiny_window_is_refused() {
        let w: Arc<dyn MemoryWindow> = Arc::new(HostMemory::new(64, 0).unwrap());
        assert!(matches!(
            SharedRegion::initialize(w),
            Err(Error::WindowTooSmall { len: 64 })
        ));
    }

    #[test]
    fn serial_wraps() {
        let region = SharedRegion::initialize(window(1)).unwrap();
        region.window().write_u32(off::NEXT_SERIAL, u32::MAX);
        assert_eq!(region.bump_serial(), 0);
        assert_eq!(region.bump_serial(), 1);
    }

    #[test]
    fn lookups_are_bounded_by_count() {
        let region = SharedRegion::initialize(window(4)).unwrap();
        assert_eq!(
            region.frame_by_index(0).unwrap_err(),
            Error::NoSuchFrame { index: 0, used: 0 }
        );

        region.set_directory_entry(0, 0);
        region.set_indices_used(1);
        let frame = region.frame_by_index(0).unwrap();
        assert_eq!(frame.offset(), FRAME_AREA_OFFSET);

        region.set_indices_used(17);
        assert_eq!(
            region.frame_by_index(0).unwrap_err(),
            Error::LinkLost { used: 17 }
        );
        assert_eq!(region.checked_count(), Err(Error::LinkLost { used: 17 }));
    }

    #[test]
    fn checked_frame_rejects_bad_directory_entries() {
        let region = SharedRegion::initialize(window(4)).unwrap();
        region.set_directory_entry(0, 8);
        region.set_directory_entry(1, 64 * PAGE_SIZE as u32);
        region.set_directory_entry(2, PAGE_SIZE as u32);
        region.set_indices_used(3);
        assert_eq!(
            region.checked_frame(0).unwrap_err(),
            Error::AlignmentViolation {
                index: 0,
                offset: FRAME_AREA_OFFSET + 8
            }
        );
        assert!(matches!(
            region.checked_frame(1),
            Err(Error::AlignmentViolation { index: 1, .. })
        ));
        assert!(region.checked_frame(2).is_ok());
    }
}
