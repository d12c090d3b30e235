/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Frame records and the ownership state machine.
//!
//! The `state` word of a frame header is the only field both ends write. Which side may touch
//! the payload follows from its value; the doorbell and the interrupt order the hand-overs.

use {
    crate::{
        layout::{frame as off, Passthrough, Timecode},
        memory::MemoryWindow,
        mm::{is_page_aligned, PAGE_SIZE},
    },
    core::{
        fmt,
        sync::atomic::{fence, Ordering},
    },
};

/// One end of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The video output driver owning the buffer queue.
    Host,
    /// The FPGA behind the BAR.
    Peer,
}

/// Ownership state of a frame, as stored on the wire.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Freshly carved out, the peer has not seen it yet.
    Initial = 0,
    /// Accepted by the peer, available for the host.
    Free = 1,
    /// Claimed by the host and handed over.
    Ready = 2,
    /// The peer works on the payload.
    Busy = 3,
    /// The peer is finished, the host has not swept it yet.
    Done = 4,
}

impl TryFrom<u32> for FrameState {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Initial,
            1 => Self::Free,
            2 => Self::Ready,
            3 => Self::Busy,
            4 => Self::Done,
            other => return Err(other),
        })
    }
}

impl FrameState {
    /// Name of the state in the vocabulary of one side.
    pub const fn name(self, side: Side) -> &'static str {
        match (side, self) {
            (_, Self::Initial) => "initial",
            (_, Self::Free) => "free",
            (Side::Host, Self::Ready) => "ready",
            (Side::Host, Self::Busy) => "busy",
            (Side::Host, Self::Done) => "done",
            (Side::Peer, Self::Ready) => "pending",
            (Side::Peer, Self::Busy) => "processing",
            (Side::Peer, Self::Done) => "processed",
        }
    }

    /// The host may hand this frame over.
    pub const fn is_claimable(self) -> bool {
        matches!(self, Self::Free | Self::Done)
    }

    /// Side that owns the frame in this state: it alone writes the payload and moves the
    /// state on. A new frame belongs to the peer until it has been accepted.
    pub const fn writer(self) -> Side {
        match self {
            Self::Free | Self::Done => Side::Host,
            Self::Initial | Self::Ready | Self::Busy => Side::Peer,
        }
    }

    /// Whether `by` may move a frame from `self` to `to`.
    pub const fn can_transition(self, to: FrameState, by: Side) -> bool {
        matches!(
            (self, to, by),
            (Self::Initial, Self::Free, Side::Peer)
                | (Self::Free, Self::Ready, Side::Host)
                | (Self::Done, Self::Ready, Side::Host)
                | (Self::Ready, Self::Busy, Side::Peer)
                | (Self::Busy, Self::Done, Side::Peer)
                | (Self::Done, Self::Free, Side::Host)
        )
    }
}

impl fmt::Display for FrameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name(Side::Host))
    }
}

/// Non-owning view of one frame record inside a window.
///
/// `offset` is the record start relative to the window base, not to the frame area.
#[derive(Clone, Copy)]
pub struct Frame<'a> {
    window: &'a dyn MemoryWindow,
    index: usize,
    offset: usize,
}

impl<'a> Frame<'a> {
    pub(crate) fn new(window: &'a dyn MemoryWindow, index: usize, offset: usize) -> Self {
        Self {
            window,
            index,
            offset,
        }
    }

    /// Directory index of this frame.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Record start relative to the window base.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bus address of the record start.
    pub fn phys_addr(&self) -> u64 {
        self.window.phys_base() + self.offset as u64
    }

    /// Record start as seen by the CPU, used for the alignment check of the sweep.
    pub fn cpu_addr(&self) -> usize {
        self.window.as_ptr() as usize + self.offset
    }

    /// Both the bus and the CPU address sit on page boundaries.
    pub fn is_page_aligned(&self) -> bool {
        is_page_aligned(self.phys_addr()) && is_page_aligned(self.cpu_addr() as u64)
    }

    /// Whether the header page lies inside the window.
    pub fn is_in_bounds(&self) -> bool {
        self.offset
            .checked_add(PAGE_SIZE)
            .is_some_and(|end| end <= self.window.len())
    }

    fn read(&self, field: usize) -> u32 {
        self.window.read_u32(self.offset + field)
    }

    fn write(&self, field: usize, value: u32) {
        self.window.write_u32(self.offset + field, value)
    }

    fn read64(&self, field: usize) -> u64 {
        self.window.read_u64(self.offset + field)
    }

    fn write64(&self, field: usize, value: u64) {
        self.window.write_u64(self.offset + field, value)
    }

    pub fn full_size(&self) -> u32 {
        self.read(off::FULL_SIZE)
    }

    pub fn frame_size(&self) -> u32 {
        self.read(off::FRAME_SIZE)
    }

    pub fn serial(&self) -> u32 {
        self.read(off::SERIAL)
    }

    pub fn set_serial(&self, serial: u32) {
        self.write(off::SERIAL, serial)
    }

    /// Raw state word, including values outside the protocol.
    pub fn raw_state(&self) -> u32 {
        let raw = self.read(off::STATE);
        // Header fields are read only after the state that published them.
        fence(Ordering::Acquire);
        raw
    }

    /// Current state, `None` for a value outside the protocol.
    pub fn state(&self) -> Option<FrameState> {
        FrameState::try_from(self.raw_state()).ok()
    }

    /// Publish a new state. Everything written to the header before is visible first.
    pub fn set_state(&self, state: FrameState) {
        fence(Ordering::Release);
        self.write(off::STATE, state as u32)
    }

    /// Move to `to` if the protocol allows `by` to do so from the current state.
    ///
    /// Returns the state found, whether or not it changed.
    pub fn try_transition(&self, to: FrameState, by: Side) -> Option<FrameState> {
        let current = self.state()?;
        if current.can_transition(to, by) {
            self.set_state(to);
        }
        Some(current)
    }

    pub fn host_kernel_address(&self) -> u64 {
        self.read64(off::HOST_KERNEL_ADDRESS)
    }

    pub(crate) fn set_host_kernel_address(&self, address: u64) {
        self.write64(off::HOST_KERNEL_ADDRESS, address)
    }

    /// Host buffer attached to this frame, 0 when none.
    pub fn host_buffer_ref(&self) -> u64 {
        self.read64(off::HOST_BUFFER_REF)
    }

    pub fn set_host_buffer_ref(&self, buffer_ref: u64) {
        self.write64(off::HOST_BUFFER_REF, buffer_ref)
    }

    pub fn peer_dma_address(&self) -> u32 {
        self.read(off::PEER_DMA_ADDRESS)
    }

    pub fn set_peer_dma_address(&self, address: u32) {
        self.write(off::PEER_DMA_ADDRESS, address)
    }

    pub fn peer_buffer_ref(&self) -> u32 {
        self.read(off::PEER_BUFFER_REF)
    }

    pub fn set_peer_buffer_ref(&self, buffer_ref: u32) {
        self.write(off::PEER_BUFFER_REF, buffer_ref)
    }

    /// Metadata the producer attached to the frame.
    pub fn passthrough(&self) -> Passthrough {
        let clock = self.read(off::PT_TC_CLOCK).to_le_bytes();
        Passthrough {
            seconds: self.read64(off::PT_SECONDS) as i64,
            microseconds: self.read64(off::PT_MICROSECONDS) as i64,
            timecode: Timecode {
                kind: self.read(off::PT_TC_TYPE),
                flags: self.read(off::PT_TC_FLAGS),
                frames: clock[0],
                seconds: clock[1],
                minutes: clock[2],
                hours: clock[3],
                userbits: self.read(off::PT_TC_USERBITS).to_le_bytes(),
            },
            sequence: self.read(off::PT_SEQUENCE),
            index: self.read(off::PT_INDEX),
            flags: self.read(off::PT_FLAGS),
            field: self.read(off::PT_FIELD),
        }
    }

    pub fn set_passthrough(&self, meta: &Passthrough) {
        let tc = &meta.timecode;
        self.write64(off::PT_SECONDS, meta.seconds as u64);
        self.write64(off::PT_MICROSECONDS, meta.microseconds as u64);
        self.write(off::PT_TC_TYPE, tc.kind);
        self.write(off::PT_TC_FLAGS, tc.flags);
        self.write(
            off::PT_TC_CLOCK,
            u32::from_le_bytes([tc.frames, tc.seconds, tc.minutes, tc.hours]),
        );
        self.write(off::PT_TC_USERBITS, u32::from_le_bytes(tc.userbits));
        self.write(off::PT_SEQUENCE, meta.sequence);
        self.write(off::PT_INDEX, meta.index);
        self.write(off::PT_FLAGS, meta.flags);
        self.write(off::PT_FIELD, meta.field);
    }

    /// Payload start relative to the window base.
    pub fn payload_offset(&self) -> usize {
        self.offset + PAGE_SIZE
    }

    /// Bus address of the payload.
    pub fn payload_phys(&self) -> u64 {
        self.window.phys_base() + self.payload_offset() as u64
    }

    /// Copy payload bytes out, clamped to `frame_size`.
    pub fn read_payload(&self, at: usize, dst: &mut [u8]) -> usize {
        let avail = (self.frame_size() as usize).saturating_sub(at);
        let len = dst.len().min(avail);
        self.window
            .read_bytes(self.payload_offset() + at, &mut dst[..len])
    }

    /// Copy payload bytes in, clamped to `frame_size`.
    pub fn write_payload(&self, at: usize, src: &[u8]) -> usize {
        let avail = (self.frame_size() as usize).saturating_sub(at);
        let len = src.len().min(avail);
        self.window.write_bytes(self.payload_offset() + at, &src[..len])
    }

    /// Stamp a freshly carved record: zeroed header, sizes, payload address.
    pub(crate) fn format(&self, full_size: u32, frame_size: u32) {
        self.window.zero(self.offset, crate::layout::frame::SIZE);
        self.write(off::FULL_SIZE, full_size);
        self.write(off::FRAME_SIZE, frame_size);
        self.set_host_kernel_address(self.payload_phys());
    }
}

impl fmt::Debug for Frame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("offset", &format_args!("{:#x}", self.offset))
            .field("full_size", &self.full_size())
            .field("frame_size", &self.frame_size())
            .field("serial", &self.serial())
            .field("state", &self.raw_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::memory::HostMemory, alloc::string::ToString};

    const ALL: [FrameState; 5] = [
        FrameState::Initial,
        FrameState::Free,
        FrameState::Ready,
        FrameState::Busy,
        FrameState::Done,
    ];

    #[test]
    fn wire_values_round_trip() {
        for state in ALL {
            assert_eq!(FrameState::try_from(state as u32), Ok(state));
        }
        assert_eq!(FrameState::try_from(5), Err(5));
        assert_eq!(FrameState::try_from(u32::MAX), Err(u32::MAX));
    }

    #[test]
    fn vocabularies_differ_only_on_peer_owned_states() {
        assert_eq!(FrameState::Ready.name(Side::Peer), "pending");
        assert_eq!(FrameState::Busy.name(Side::Peer), "processing");
        assert_eq!(FrameState::Done.name(Side::Peer), "processed");
        assert_eq!(FrameState::Free.name(Side::Peer), "free");
        assert_eq!(FrameState::Done.to_string(), "done");
    }

    #[test]
    fn every_transition_hands_the_payload_over() {
        for from in ALL {
            for to in ALL {
                for by in [Side::Host, Side::Peer] {
                    if from.can_transition(to, by) {
                        // Only the current writer moves the state.
                        assert_eq!(from.writer(), by, "{from:?} -> {to:?}");
                    }
                }
            }
        }
        assert_eq!(FrameState::Initial.writer(), Side::Peer);
        assert!(!FrameState::Initial.can_transition(FrameState::Free, Side::Host));
        assert!(!FrameState::Initial.can_transition(FrameState::Ready, Side::Host));
        assert!(!FrameState::Ready.can_transition(FrameState::Ready, Side::Host));
        assert!(!FrameState::Busy.can_transition(FrameState::Ready, Side::Host));
        assert!(!FrameState::Busy.can_transition(FrameState::Free, Side::Host));
    }

    #[test]
    fn claim_against_busy_frame_changes_nothing() {
        let mem = HostMemory::new(4 * PAGE_SIZE, 0x1000_0000).unwrap();
        let frame = Frame::new(&mem, 0, PAGE_SIZE);
        frame.format(2 * PAGE_SIZE as u32, 10);
        frame.set_state(FrameState::Busy);
        assert_eq!(
            frame.try_transition(FrameState::Ready, Side::Host),
            Some(FrameState::Busy)
        );
        assert_eq!(frame.state(), Some(FrameState::Busy));
    }

    #[test]
    fn format_stamps_sizes_and_payload_address() {
        let mem = HostMemory::new(4 * PAGE_SIZE, 0x1000_0000).unwrap();
        mem.write_u32(PAGE_SIZE + off::SERIAL, 99);
        let frame = Frame::new(&mem, 0, PAGE_SIZE);
        frame.format(2 * PAGE_SIZE as u32, 10);
        assert_eq!(frame.serial(), 0);
        assert_eq!(frame.full_size(), 2 * PAGE_SIZE as u32);
        assert_eq!(frame.frame_size(), 10);
        assert_eq!(frame.host_kernel_address(), 0x1000_0000 + 2 * PAGE_SIZE as u64);
        assert_eq!(frame.state(), Some(FrameState::Initial));
        assert!(frame.is_page_aligned());
    }

    #[test]
    fn passthrough_is_stored_verbatim() {
        let mem = HostMemory::new(2 * PAGE_SIZE, 0).unwrap();
        let frame = Frame::new(&mem, 0, 0);
        let meta = Passthrough {
            seconds: -3,
            microseconds: 999_999,
            timecode: Timecode {
                kind: 2,
                flags: 1,
                frames: 24,
                seconds: 59,
                minutes: 7,
                hours: 23,
                userbits: [1, 2, 3, 4],
            },
            sequence: 41,
            index: 3,
            flags: 0x4000,
            field: 1,
        };
        frame.set_passthrough(&meta);
        assert_eq!(frame.passthrough(), meta);
    }

    #[test]
    fn payload_access_is_clamped_to_frame_size() {
        let mem = HostMemory::new(3 * PAGE_SIZE, 0).unwrap();
        let frame = Frame::new(&mem, 0, 0);
        frame.format(2 * PAGE_SIZE as u32, 6);
        assert_eq!(frame.write_payload(4, b"abcd"), 2);
        let mut out = [0u8; 8];
        assert_eq!(frame.read_payload(0, &mut out), 6);
        assert_eq!(&out[..6], b"\0\0\0\0ab");
        assert_eq!(frame.read_payload(6, &mut out), 0);
    }
}
