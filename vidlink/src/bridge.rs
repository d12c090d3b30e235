/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Glue between a video buffer queue and the shared frame protocol.
//!
//! The queue framework drives the `queue_setup` .. `stop_streaming` callbacks from process
//! context. The interrupt handler calls [`VideoOutput::sweep`]. Every buffer index is bound to
//! at most one frame slot; the frame header refers back to its buffer as `index + 1`.

use {
    crate::{
        allocator::{FrameAllocator, FrameHandle},
        config::DEFAULT_MIN_BUFFERS,
        doorbell::Doorbell,
        format::{FourCc, FrameRate, PixFormat},
        frame::{FrameState, Side},
        layout::MAX_FRAMES,
        mm::is_page_aligned,
        region::{self, SharedRegion},
        sync::{interface::Mutex, SpinLock},
    },
    alloc::sync::Arc,
    core::sync::atomic::{AtomicBool, Ordering},
    snafu::Snafu,
};

/// Buffer metadata travelling with a frame.
pub use crate::layout::Passthrough as BufferMeta;

/// Number of buffers the queue can bind, one per frame slot.
pub const MAX_BUFFERS: usize = MAX_FRAMES;

/// State a buffer is handed back to the queue framework in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Owned by the framework again, not processed.
    Queued,
    /// Processed, or force-completed.
    Done,
    /// Processing failed.
    Error,
}

/// Where finished buffers go: the queue framework's "buffer done" entry point.
///
/// Called from interrupt context with the buffer's binding locked; must not block and must
/// not queue the buffer again from inside the call.
pub trait BufferSink: Send + Sync {
    fn buffer_done(&self, index: usize, state: BufferState);
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("no format has been negotiated"))]
    InvalidFormat,
    #[snafu(display("pixel format {fourcc} is not supported"))]
    UnsupportedFormat { fourcc: FourCc },
    #[snafu(display("buffer #{index} is not bound to a frame"))]
    NoSuchBuffer { index: usize },
    #[snafu(display("buffer #{index} is already bound to a frame"))]
    AlreadyBound { index: usize },
    #[snafu(display("data will not fit into plane ({plane} < {needed})"))]
    PlaneTooSmall { plane: usize, needed: usize },
    #[snafu(display("payload at {address:#x} is not page aligned"))]
    Unaligned { address: u64 },
    #[snafu(display("cannot allocate frame: {source}"))]
    Allocation { source: region::Error },
}

pub type Result<T> = core::result::Result<T, Error>;

/// Outcome of [`VideoOutput::queue_setup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSetup {
    pub buffers: u32,
    pub plane_size: u32,
}

/// Outcome of [`VideoOutput::buf_queue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Handed to the peer.
    Claimed { serial: u32 },
    /// The frame was not claimable; the buffer went straight back.
    Dropped { serial: u32, state: Option<FrameState> },
}

struct BufferSlot {
    frame: SpinLock<Option<FrameHandle>>,
    // Set while the framework owns the buffer. Cleared on submission.
    completed: AtomicBool,
}

impl BufferSlot {
    const fn new() -> Self {
        Self {
            frame: SpinLock::new(None),
            completed: AtomicBool::new(true),
        }
    }
}

struct QueueState {
    format: Option<PixFormat>,
    frame_rate: FrameRate,
    min_buffers: u32,
    streaming: bool,
}

/// One video output stream over a shared region.
pub struct VideoOutput {
    allocator: FrameAllocator,
    doorbell: Arc<Doorbell>,
    sink: Arc<dyn BufferSink>,
    buffers: [BufferSlot; MAX_BUFFERS],
    queue: SpinLock<QueueState>,
    sweeping: AtomicBool,
}

fn buffer_ref(index: usize) -> u64 {
    index as u64 + 1
}

impl VideoOutput {
    pub fn new(
        allocator: FrameAllocator,
        doorbell: Arc<Doorbell>,
        sink: Arc<dyn BufferSink>,
    ) -> Self {
        Self {
            allocator,
            doorbell,
            sink,
            buffers: [const { BufferSlot::new() }; MAX_BUFFERS],
            queue: SpinLock::new(QueueState {
                format: None,
                frame_rate: FrameRate::default(),
                min_buffers: DEFAULT_MIN_BUFFERS,
                streaming: false,
            }),
            sweeping: AtomicBool::new(false),
        }
    }

    /// Lower bound for the buffer count negotiated by [`Self::queue_setup`].
    pub fn set_min_buffers(&self, min_buffers: u32) {
        self.queue.lock(|q| q.min_buffers = min_buffers)
    }

    pub fn region(&self) -> &SharedRegion {
        self.allocator.region()
    }

    pub fn allocator(&self) -> &FrameAllocator {
        &self.allocator
    }

    //----------------------------------------------------------------------------------------------
    // Format negotiation
    //----------------------------------------------------------------------------------------------

    /// Negotiate the output format. The result is clamped to what the device supports.
    pub fn set_format(&self, pixelformat: u32, width: u32, height: u32) -> Result<PixFormat> {
        let format = PixFormat::try_format(pixelformat, width, height).ok_or(
            Error::UnsupportedFormat {
                fourcc: FourCc(pixelformat),
            },
        )?;
        debug!(
            GENERIC,
            "using format {} and size {}x{} (stride={}, size={})",
            FourCc(format.pixelformat),
            format.width,
            format.height,
            format.bytesperline,
            format.sizeimage
        );
        self.queue.lock(|q| q.format = Some(format));
        Ok(format)
    }

    pub fn format(&self) -> Option<PixFormat> {
        self.queue.lock(|q| q.format)
    }

    /// Change the published frame rate.
    pub fn set_frame_rate(&self, rate: FrameRate) {
        self.queue.lock(|q| q.frame_rate = rate);
        self.region().set_frame_rate(rate.numerator, rate.denominator);
    }

    //----------------------------------------------------------------------------------------------
    // Queue callbacks
    //----------------------------------------------------------------------------------------------

    /// Publish the stream parameters and settle the buffer count.
    ///
    /// `format` overrides the negotiated format when given.
    pub fn queue_setup(&self, requested: u32, format: Option<&PixFormat>) -> Result<QueueSetup> {
        let (format, rate, min_buffers) = self.queue.lock(|q| {
            let format = format.copied().or(q.format);
            (format, q.frame_rate, q.min_buffers)
        });
        let format = format.ok_or(Error::InvalidFormat)?;

        let region = self.region();
        region.set_stream_format(format.width, format.height, format.pixelformat);
        region.set_frame_rate(rate.numerator, rate.denominator);

        let mut buffers = requested;
        if buffers < min_buffers {
            debug!(GENERIC, "buffers increased from {} to {}", buffers, min_buffers);
            buffers = min_buffers;
        }
        buffers = buffers.min(MAX_BUFFERS as u32);

        Ok(QueueSetup {
            buffers,
            plane_size: format.sizeimage,
        })
    }

    /// Bind buffer `index` to a fresh frame slot of `size` payload bytes.
    ///
    /// The returned handle shares the slot with the binding; the slot goes back to the
    /// allocator only when both are gone.
    pub fn alloc_buffer(&self, index: usize, size: usize) -> Result<FrameHandle> {
        let slot = self
            .buffers
            .get(index)
            .ok_or(Error::NoSuchBuffer { index })?;

        slot.frame.lock(|binding| {
            if binding.is_some() {
                return AlreadyBoundSnafu { index }.fail();
            }
            let handle = self
                .allocator
                .allocate_frame(size)
                .map_err(|source| Error::Allocation { source })?;
            debug!(
                MEMORY,
                "buffer #{} bound to frame #{} at {:#x}",
                index,
                handle.index(),
                handle.payload_phys()
            );
            *binding = Some(handle.clone());
            Ok(handle)
        })
    }

    /// Drop the binding of buffer `index`.
    pub fn release_buffer(&self, index: usize) -> Result<()> {
        let slot = self
            .buffers
            .get(index)
            .ok_or(Error::NoSuchBuffer { index })?;
        let handle = slot
            .frame
            .lock(|binding| binding.take())
            .ok_or(Error::NoSuchBuffer { index })?;
        self.allocator.release_frame(handle);
        Ok(())
    }

    /// Check a plane can hold one image; returns the payload size to use.
    pub fn buf_prepare(&self, index: usize, plane_size: usize) -> Result<u32> {
        let format = self.format().ok_or(Error::InvalidFormat)?;
        let needed = format.sizeimage as usize;
        debug!(GENERIC, "buffer #{}, plane {}, size {}", index, plane_size, needed);
        if plane_size < needed {
            return PlaneTooSmallSnafu {
                plane: plane_size,
                needed,
            }
            .fail();
        }
        Ok(format.sizeimage)
    }

    /// Hand buffer `index` to the peer, or give it straight back if its frame is not free.
    pub fn buf_queue(&self, index: usize, meta: &BufferMeta) -> Result<Submission> {
        let slot = self
            .buffers
            .get(index)
            .ok_or(Error::NoSuchBuffer { index })?;
        let region = self.region();

        let outcome = slot.frame.lock(|binding| {
            let handle = binding.as_ref().ok_or(Error::NoSuchBuffer { index })?;
            let frame = handle.frame();

            slot.completed.store(false, Ordering::Release);

            let serial = region.bump_serial();
            frame.set_serial(serial);
            frame.set_passthrough(meta);
            region.count_input();

            match frame.state() {
                Some(state) if state.can_transition(FrameState::Ready, Side::Host) => {
                    frame.set_host_buffer_ref(buffer_ref(index));
                    frame.set_state(FrameState::Ready);
                    self.doorbell.signal_request();
                    debug!(
                        VIDEO,
                        "got frame #{} ({} -> ready) at {:#x}",
                        serial,
                        state,
                        frame.offset()
                    );
                    Ok(Submission::Claimed { serial })
                }
                state => {
                    frame.set_host_buffer_ref(0);
                    region.count_dropped();
                    debug!(
                        VIDEO,
                        "frame #{} dropped (state: {:?}) at {:#x}",
                        serial,
                        state,
                        frame.offset()
                    );
                    Ok(Submission::Dropped { serial, state })
                }
            }
        })?;

        if let Submission::Dropped { .. } = outcome {
            self.complete(index, BufferState::Done);
        }
        Ok(outcome)
    }

    pub fn start_streaming(&self) {
        self.queue.lock(|q| q.streaming = true);
        self.region().set_stream_active(true);
        debug!(VIDEO, "streaming started");
    }

    /// Stop the stream and give every outstanding buffer back as done.
    ///
    /// Frame slots stay allocated. Returns the number of buffers completed here.
    pub fn stop_streaming(&self) -> usize {
        self.queue.lock(|q| q.streaming = false);
        self.region().set_stream_active(false);

        let mut forced = 0;
        for (index, slot) in self.buffers.iter().enumerate() {
            let bound = slot.frame.lock(|binding| binding.is_some());
            if bound && self.complete(index, BufferState::Done) {
                forced += 1;
            }
        }
        debug!(VIDEO, "streaming stopped, {} buffers returned", forced);
        forced
    }

    pub fn is_streaming(&self) -> bool {
        self.queue.lock(|q| q.streaming)
    }

    /// Bus address user space maps to reach the payload of buffer `index`.
    pub fn mmap_target(&self, index: usize) -> Result<u64> {
        let address = self
            .buffers
            .get(index)
            .and_then(|slot| slot.frame.lock(|b| b.as_ref().map(FrameHandle::payload_phys)))
            .ok_or(Error::NoSuchBuffer { index })?;
        if !is_page_aligned(address) {
            return UnalignedSnafu { address }.fail();
        }
        Ok(address)
    }

    //----------------------------------------------------------------------------------------------
    // Completion
    //----------------------------------------------------------------------------------------------

    /// Give buffer `index` back to the framework, once.
    ///
    /// Returns false if it was already back; that is not an error, the peer may report a frame
    /// twice.
    pub fn complete(&self, index: usize, state: BufferState) -> bool {
        let Some(slot) = self.buffers.get(index) else {
            warn!("completion for unknown buffer #{}", index);
            return false;
        };
        if slot.completed.swap(true, Ordering::AcqRel) {
            debug!(VIDEO, "buffer #{} has already been completed", index);
            return false;
        }
        self.sink.buffer_done(index, state);
        true
    }

    /// Whether buffer `index` is currently owned by the framework.
    pub fn is_completed(&self, index: usize) -> bool {
        self.buffers
            .get(index)
            .map_or(true, |slot| slot.completed.load(Ordering::Acquire))
    }

    //----------------------------------------------------------------------------------------------
    // Interrupt path
    //----------------------------------------------------------------------------------------------

    /// Walk the directory once and return finished frames to the queue.
    ///
    /// Runs in interrupt context: never blocks and never allocates. A slot whose binding is
    /// being changed right now is skipped and stays done for the next sweep. Returns the
    /// number of buffers completed.
    pub fn sweep(&self) -> region::Result<usize> {
        if self.sweeping.swap(true, Ordering::Acquire) {
            warn!("sweep re-entered, ignoring");
            return Ok(0);
        }
        let result = self.sweep_directory();
        self.sweeping.store(false, Ordering::Release);
        result
    }

    fn sweep_directory(&self) -> region::Result<usize> {
        let region = self.region();
        let used = region.checked_count()?;
        let mut completed = 0;

        for i in 0..used {
            let frame = region.checked_frame(i)?;
            if frame.state() != Some(FrameState::Done) {
                continue;
            }

            let serial = frame.serial();
            let Some(index) = frame.host_buffer_ref().checked_sub(1) else {
                debug!(VIDEO, "frame #{} first time (done -> free)", serial);
                frame.set_state(FrameState::Free);
                continue;
            };
            let Some(slot) = self.buffers.get(index as usize) else {
                warn!("frame #{} refers to unknown buffer {}", serial, index);
                frame.set_host_buffer_ref(0);
                frame.set_state(FrameState::Free);
                continue;
            };

            // The buffer goes back before the frame is free, so a re-queue cannot slip in
            // between and have its own submission completed here.
            let swept = slot.frame.try_lock(|_| {
                let fresh = self.complete(index as usize, BufferState::Done);
                frame.set_host_buffer_ref(0);
                frame.set_state(FrameState::Free);
                fresh
            });
            match swept {
                None => debug!(VIDEO, "frame #{} busy, left for the next sweep", serial),
                Some(true) => {
                    debug!(VIDEO, "frame #{} is done (done -> free)", serial);
                    completed += 1;
                }
                Some(false) => (),
            }
        }

        Ok(completed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use {
        super::*,
        crate::{
            doorbell::FlagRegister,
            format::PIX_FMT_NV12,
            memory::{HostMemory, MemoryWindow},
            mm::PAGE_SIZE,
        },
        alloc::{sync::Weak, vec::Vec},
        spin::Mutex as SpinMutex,
    };

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) done: SpinMutex<Vec<(usize, BufferState)>>,
    }

    impl BufferSink for RecordingSink {
        fn buffer_done(&self, index: usize, state: BufferState) {
            self.done.lock().push((index, state));
        }
    }

    impl RecordingSink {
        pub(crate) fn count(&self) -> usize {
            self.done.lock().len()
        }
    }

    struct Fixture {
        video: VideoOutput,
        sink: Arc<RecordingSink>,
        request: Arc<dyn MemoryWindow>,
    }

    fn fixture(pages: usize) -> Fixture {
        let shared: Arc<dyn MemoryWindow> =
            Arc::new(HostMemory::new(pages * PAGE_SIZE, 0x8000_0000).unwrap());
        let request: Arc<dyn MemoryWindow> = Arc::new(HostMemory::new(PAGE_SIZE, 0).unwrap());
        let region = SharedRegion::initialize(shared).unwrap();
        let doorbell = Arc::new(Doorbell::new(None, FlagRegister::new(request.clone())));
        let sink = Arc::new(RecordingSink::default());
        let video = VideoOutput::new(FrameAllocator::new(region), doorbell, sink.clone());
        Fixture {
            video,
            sink,
            request,
        }
    }

    fn peer_moves(video: &VideoOutput, index: usize, state: FrameState) {
        video.region().frame_by_index(index).unwrap().set_state(state);
    }

    #[test]
    fn queue_setup_needs_a_format() {
        let f = fixture(4);
        assert!(matches!(
            f.video.queue_setup(2, None),
            Err(Error::InvalidFormat)
        ));
        assert!(matches!(
            f.video.set_format(0, 640, 480),
            Err(Error::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn queue_setup_publishes_stream() {
        let f = fixture(4);
        f.video.set_format(PIX_FMT_NV12, 640, 480).unwrap();
        let setup = f.video.queue_setup(2, None).unwrap();
        assert_eq!(setup.buffers, DEFAULT_MIN_BUFFERS);
        assert_eq!(setup.plane_size, 640 * 480 * 3 / 2);

        let stream = f.video.region().stream();
        assert_eq!((stream.width, stream.height), (640, 480));
        assert_eq!(stream.fourcc, PIX_FMT_NV12);
        assert_eq!((stream.numerator, stream.denominator), (30, 1));

        assert_eq!(f.video.queue_setup(40, None).unwrap().buffers, MAX_BUFFERS as u32);
    }

    #[test]
    fn prepare_checks_plane_size() {
        let f = fixture(4);
        f.video.set_format(PIX_FMT_NV12, 16, 16).unwrap();
        assert_eq!(f.video.buf_prepare(0, 384).unwrap(), 384);
        assert!(matches!(
            f.video.buf_prepare(0, 383),
            Err(Error::PlaneTooSmall {
                plane: 383,
                needed: 384
            })
        ));
    }

    #[test]
    fn claim_rings_the_doorbell() {
        let f = fixture(8);
        f.video.alloc_buffer(0, 100).unwrap();
        peer_moves(&f.video, 0, FrameState::Free);

        let outcome = f.video.buf_queue(0, &BufferMeta::default()).unwrap();
        assert_eq!(outcome, Submission::Claimed { serial: 1 });
        assert_eq!(f.request.read_u32(0), 1);

        let frame = f.video.region().frame_by_index(0).unwrap();
        assert_eq!(frame.state(), Some(FrameState::Ready));
        assert_eq!(frame.host_buffer_ref(), 1);
        assert_eq!(frame.serial(), 1);
        assert!(!f.video.is_completed(0));
        assert_eq!(f.video.region().statistics().input_frames, 1);
    }

    #[test]
    fn claim_against_unclaimable_state_drops() {
        let f = fixture(8);
        f.video.alloc_buffer(0, 100).unwrap();
        for state in [FrameState::Initial, FrameState::Ready, FrameState::Busy] {
            peer_moves(&f.video, 0, state);
            let outcome = f.video.buf_queue(0, &BufferMeta::default()).unwrap();
            assert!(matches!(outcome, Submission::Dropped { state: Some(s), .. } if s == state));
            let frame = f.video.region().frame_by_index(0).unwrap();
            assert_eq!(frame.state(), Some(state));
            assert_eq!(frame.host_buffer_ref(), 0);
        }
        assert_eq!(f.request.read_u32(0), 0);
        assert_eq!(f.sink.count(), 3);
        assert_eq!(f.video.region().statistics().frames_dropped, 3);
    }

    #[test]
    fn completion_is_idempotent() {
        let f = fixture(8);
        f.video.alloc_buffer(0, 100).unwrap();
        peer_moves(&f.video, 0, FrameState::Free);
        f.video.buf_queue(0, &BufferMeta::default()).unwrap();

        assert!(f.video.complete(0, BufferState::Done));
        assert!(!f.video.complete(0, BufferState::Done));
        assert_eq!(*f.sink.done.lock(), [(0, BufferState::Done)]);
    }

    #[test]
    fn sweep_completes_done_frames_once() {
        let f = fixture(16);
        for i in 0..3 {
            f.video.alloc_buffer(i, 10).unwrap();
            peer_moves(&f.video, i, FrameState::Free);
            f.video.buf_queue(i, &BufferMeta::default()).unwrap();
        }
        peer_moves(&f.video, 0, FrameState::Done);
        peer_moves(&f.video, 2, FrameState::Busy);

        assert_eq!(f.video.sweep(), Ok(1));
        assert_eq!(f.video.sweep(), Ok(0));
        assert_eq!(*f.sink.done.lock(), [(0, BufferState::Done)]);

        let region = f.video.region();
        assert_eq!(region.frame_by_index(0).unwrap().state(), Some(FrameState::Free));
        assert_eq!(region.frame_by_index(1).unwrap().state(), Some(FrameState::Ready));
        assert_eq!(region.frame_by_index(2).unwrap().state(), Some(FrameState::Busy));
    }

    #[test]
    fn reentered_sweep_does_nothing() {
        let f = fixture(8);
        f.video.alloc_buffer(0, 10).unwrap();
        peer_moves(&f.video, 0, FrameState::Free);
        f.video.buf_queue(0, &BufferMeta::default()).unwrap();
        peer_moves(&f.video, 0, FrameState::Done);

        f.video.sweeping.store(true, Ordering::Release);
        assert_eq!(f.video.sweep(), Ok(0));
        assert_eq!(
            f.video.region().frame_by_index(0).unwrap().state(),
            Some(FrameState::Done)
        );
        assert_eq!(f.sink.count(), 0);
        assert!(f.video.sweeping.load(Ordering::Acquire));

        f.video.sweeping.store(false, Ordering::Release);
        assert_eq!(f.video.sweep(), Ok(1));
        assert!(!f.video.sweeping.load(Ordering::Acquire));
    }

    #[test]
    fn sweep_skips_a_binding_in_use() {
        let f = fixture(8);
        for i in 0..2 {
            f.video.alloc_buffer(i, 10).unwrap();
            peer_moves(&f.video, i, FrameState::Free);
            f.video.buf_queue(i, &BufferMeta::default()).unwrap();
            peer_moves(&f.video, i, FrameState::Done);
        }

        f.video.buffers[0].frame.lock(|_| {
            assert_eq!(f.video.sweep(), Ok(1));
        });
        let region = f.video.region();
        assert_eq!(region.frame_by_index(0).unwrap().state(), Some(FrameState::Done));
        assert_eq!(region.frame_by_index(0).unwrap().host_buffer_ref(), 1);
        assert_eq!(region.frame_by_index(1).unwrap().state(), Some(FrameState::Free));
        assert_eq!(*f.sink.done.lock(), [(1, BufferState::Done)]);

        assert_eq!(f.video.sweep(), Ok(1));
        assert_eq!(region.frame_by_index(0).unwrap().state(), Some(FrameState::Free));
        assert_eq!(f.sink.count(), 2);
    }

    /// Records, for every completion, the frame state and whether the binding was locked.
    #[derive(Default)]
    struct ObservingSink {
        video: SpinMutex<Option<Weak<VideoOutput>>>,
        seen: SpinMutex<Vec<(Option<FrameState>, bool)>>,
    }

    impl BufferSink for ObservingSink {
        fn buffer_done(&self, index: usize, _state: BufferState) {
            let Some(video) = self.video.lock().as_ref().and_then(Weak::upgrade) else {
                return;
            };
            let state = video.region().frame_by_index(index).unwrap().state();
            let locked = video.buffers[index].frame.try_lock(|_| ()).is_none();
            self.seen.lock().push((state, locked));
        }
    }

    #[test]
    fn sweep_completes_before_the_frame_is_free() {
        let shared: Arc<dyn MemoryWindow> =
            Arc::new(HostMemory::new(8 * PAGE_SIZE, 0x8000_0000).unwrap());
        let region = SharedRegion::initialize(shared).unwrap();
        let sink = Arc::new(ObservingSink::default());
        let video = Arc::new(VideoOutput::new(
            FrameAllocator::new(region),
            Arc::new(Doorbell::default()),
            sink.clone(),
        ));
        *sink.video.lock() = Some(Arc::downgrade(&video));

        video.alloc_buffer(0, 10).unwrap();
        peer_moves(&video, 0, FrameState::Free);
        video.buf_queue(0, &BufferMeta::default()).unwrap();
        peer_moves(&video, 0, FrameState::Done);

        assert_eq!(video.sweep(), Ok(1));
        // Still done and still bound-locked when the buffer went back: a re-queue waits for
        // the sweep and then finds its own frame free, not already completed.
        assert_eq!(*sink.seen.lock(), [(Some(FrameState::Done), true)]);

        let outcome = video.buf_queue(0, &BufferMeta::default()).unwrap();
        assert!(matches!(outcome, Submission::Claimed { .. }));
        assert!(!video.is_completed(0));
        assert_eq!(video.sweep(), Ok(0));
        assert!(!video.is_completed(0));
        assert_eq!(sink.seen.lock().len(), 1);
    }

    #[test]
    fn sweep_resets_unattached_done_frames() {
        let f = fixture(8);
        f.video.alloc_buffer(0, 10).unwrap();
        peer_moves(&f.video, 0, FrameState::Done);
        assert_eq!(f.video.sweep(), Ok(0));
        assert_eq!(
            f.video.region().frame_by_index(0).unwrap().state(),
            Some(FrameState::Free)
        );
        assert_eq!(f.sink.count(), 0);
    }

    #[test]
    fn sweep_rejects_corrupted_count_before_iterating() {
        let f = fixture(8);
        f.video.alloc_buffer(0, 10).unwrap();
        peer_moves(&f.video, 0, FrameState::Done);
        f.video
            .region()
            .window()
            .write_u32(crate::layout::control::INDICES_USED, 1000);

        assert_eq!(f.video.sweep(), Err(region::Error::LinkLost { used: 1000 }));
        f.video
            .region()
            .window()
            .write_u32(crate::layout::control::INDICES_USED, 1);
        // The frame was not touched by the refused sweep.
        assert_eq!(
            f.video.region().frame_by_index(0).unwrap().state(),
            Some(FrameState::Done)
        );
    }

    #[test]
    fn sweep_aborts_on_unaligned_frame() {
        let f = fixture(8);
        f.video.alloc_buffer(0, 10).unwrap();
        f.video
            .region()
            .window()
            .write_u32(crate::layout::control::directory_entry(0), 12);
        assert!(matches!(
            f.video.sweep(),
            Err(region::Error::AlignmentViolation { index: 0, .. })
        ));
    }

    #[test]
    fn stop_streaming_returns_outstanding_buffers() {
        let f = fixture(16);
        for i in 0..4 {
            f.video.alloc_buffer(i, 10).unwrap();
            peer_moves(&f.video, i, FrameState::Free);
        }
        f.video.start_streaming();
        assert_eq!(f.video.region().stream().active, 1);
        for i in 0..3 {
            f.video.buf_queue(i, &BufferMeta::default()).unwrap();
        }
        let used = f.video.region().indices_used();

        assert_eq!(f.video.stop_streaming(), 3);
        assert_eq!(f.sink.count(), 3);
        assert!(f.sink.done.lock().iter().all(|(_, s)| *s == BufferState::Done));
        assert_eq!(f.video.region().indices_used(), used);
        assert_eq!(f.video.region().stream().active, 0);
        assert!(!f.video.is_streaming());
    }

    #[test]
    fn buffers_bind_once_and_release() {
        let f = fixture(8);
        let handle = f.video.alloc_buffer(1, 10).unwrap();
        assert!(matches!(
            f.video.alloc_buffer(1, 10),
            Err(Error::AlreadyBound { index: 1 })
        ));
        assert_eq!(f.video.mmap_target(1).unwrap(), handle.payload_phys());
        drop(handle);

        f.video.release_buffer(1).unwrap();
        assert_eq!(f.video.region().indices_used(), 0);
        assert!(matches!(
            f.video.release_buffer(1),
            Err(Error::NoSuchBuffer { index: 1 })
        ));
        assert!(matches!(
            f.video.alloc_buffer(MAX_BUFFERS, 10),
            Err(Error::NoSuchBuffer { .. })
        ));
    }

    #[test]
    fn exhausted_allocator_surfaces_as_allocation_error() {
        let f = fixture(3);
        f.video.alloc_buffer(0, 10).unwrap();
        assert!(matches!(
            f.video.alloc_buffer(1, 10),
            Err(Error::Allocation {
                source: region::Error::OutOfSlots { .. }
            })
        ));
    }
}
