/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Wire layout of the shared window.
//!
//! Both ends of the link are built separately, for different word widths, and must agree on
//! every byte. The structs below are never instantiated inside the window; they exist so the
//! compiler can check offsets and sizes against the fixed tables. Field access goes through
//! the offset constants in [`control`] and [`frame`].
//!
//! ```text
//! +------------------+ 0
//! | ControlBlock     |
//! |   (one page)     |
//! +------------------+ PAGE_SIZE          <- frame area, offset[] is relative to here
//! | FrameHeader      |
//! |   (one page)     |
//! +------------------+
//! | payload          |
//! |   ...            |
//! +------------------+ page aligned
//! | next frame ...   |
//! ```

use {crate::mm::PAGE_SIZE, core::mem::offset_of, static_assertions::const_assert_eq};

/// Hard limit on frame slots, fixed by the size of the directory.
pub const MAX_FRAMES: usize = 16;

/// Size of the control page at the start of the window.
pub const CONTROL_PAGE_SIZE: usize = PAGE_SIZE;

/// Size of the header page at the start of every frame record.
pub const FRAME_HEADER_PAGE_SIZE: usize = PAGE_SIZE;

/// Offset of the frame area from the start of the window.
pub const FRAME_AREA_OFFSET: usize = CONTROL_PAGE_SIZE;

//--------------------------------------------------------------------------------------------------
// Control page
//--------------------------------------------------------------------------------------------------

/// Negotiated stream parameters, published by the host for the peer.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub fourcc: u32,
    pub numerator: u32,
    pub denominator: u32,
    pub active: u32,
}

/// Peer private back-reference. The host never writes it.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct PeerControl {
    pub kernel_address: u32,
    pub frame_index: u32,
}

/// Host private back-reference.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct HostControl {
    pub kernel_address: u64,
    pub device_ref: u64,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ControlBlock {
    pub indices_used: u32,
    pub next_offset: u32,
    pub next_serial: u32,
    pub frames_dropped: u32,
    pub input_frames: u32,
    pub input_fps: i32,
    pub offset: [u32; MAX_FRAMES],
    pub stream: StreamInfo,
    pub peer: PeerControl,
    pub host: HostControl,
}

/// Byte offsets inside the control page.
pub mod control {
    use super::*;

    pub const INDICES_USED: usize = offset_of!(ControlBlock, indices_used);
    pub const NEXT_OFFSET: usize = offset_of!(ControlBlock, next_offset);
    pub const NEXT_SERIAL: usize = offset_of!(ControlBlock, next_serial);
    pub const FRAMES_DROPPED: usize = offset_of!(ControlBlock, frames_dropped);
    pub const INPUT_FRAMES: usize = offset_of!(ControlBlock, input_frames);
    pub const INPUT_FPS: usize = offset_of!(ControlBlock, input_fps);
    pub const DIRECTORY: usize = offset_of!(ControlBlock, offset);

    pub const STREAM: usize = offset_of!(ControlBlock, stream);
    pub const STREAM_WIDTH: usize = STREAM + offset_of!(StreamInfo, width);
    pub const STREAM_HEIGHT: usize = STREAM + offset_of!(StreamInfo, height);
    pub const STREAM_FOURCC: usize = STREAM + offset_of!(StreamInfo, fourcc);
    pub const STREAM_NUMERATOR: usize = STREAM + offset_of!(StreamInfo, numerator);
    pub const STREAM_DENOMINATOR: usize = STREAM + offset_of!(StreamInfo, denominator);
    pub const STREAM_ACTIVE: usize = STREAM + offset_of!(StreamInfo, active);

    pub const PEER: usize = offset_of!(ControlBlock, peer);
    pub const PEER_KERNEL_ADDRESS: usize = PEER + offset_of!(PeerControl, kernel_address);
    pub const PEER_FRAME_INDEX: usize = PEER + offset_of!(PeerControl, frame_index);

    pub const HOST: usize = offset_of!(ControlBlock, host);
    pub const HOST_KERNEL_ADDRESS: usize = HOST + offset_of!(HostControl, kernel_address);
    pub const HOST_DEVICE_REF: usize = HOST + offset_of!(HostControl, device_ref);

    pub const SIZE: usize = core::mem::size_of::<ControlBlock>();

    /// Offset of directory entry `index`.
    #[inline]
    pub const fn directory_entry(index: usize) -> usize {
        DIRECTORY + index * core::mem::size_of::<u32>()
    }
}

const_assert_eq!(control::INDICES_USED, 0);
const_assert_eq!(control::NEXT_OFFSET, 4);
const_assert_eq!(control::NEXT_SERIAL, 8);
const_assert_eq!(control::FRAMES_DROPPED, 12);
const_assert_eq!(control::INPUT_FRAMES, 16);
const_assert_eq!(control::INPUT_FPS, 20);
const_assert_eq!(control::DIRECTORY, 24);
const_assert_eq!(control::STREAM_WIDTH, 88);
const_assert_eq!(control::STREAM_HEIGHT, 92);
const_assert_eq!(control::STREAM_FOURCC, 96);
const_assert_eq!(control::STREAM_NUMERATOR, 100);
const_assert_eq!(control::STREAM_DENOMINATOR, 104);
const_assert_eq!(control::STREAM_ACTIVE, 108);
const_assert_eq!(control::PEER_KERNEL_ADDRESS, 112);
const_assert_eq!(control::PEER_FRAME_INDEX, 116);
const_assert_eq!(control::HOST_KERNEL_ADDRESS, 120);
const_assert_eq!(control::HOST_DEVICE_REF, 128);
const_assert_eq!(control::SIZE, 136);
const_assert_eq!(core::mem::size_of::<StreamInfo>(), 24);

//--------------------------------------------------------------------------------------------------
// Frame header
//--------------------------------------------------------------------------------------------------

/// SMPTE style timecode carried along with a frame.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Timecode {
    pub kind: u32,
    pub flags: u32,
    pub frames: u8,
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub userbits: [u8; 4],
}

/// Buffer metadata copied verbatim from the producing side.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Passthrough {
    pub seconds: i64,
    pub microseconds: i64,
    pub timecode: Timecode,
    pub sequence: u32,
    pub index: u32,
    pub flags: u32,
    pub field: u32,
}

/// Peer private per-frame data.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct PeerFrame {
    pub dma_address: u32,
    pub buffer_ref: u32,
}

/// Host private per-frame data.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct HostFrame {
    pub kernel_address: u64,
    pub buffer_ref: u64,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameHeader {
    pub full_size: u32,
    pub frame_size: u32,
    pub serial: u32,
    pub state: u32,
    pub peer: PeerFrame,
    pub host: HostFrame,
    pub passthrough: Passthrough,
}

/// Byte offsets inside a frame header, relative to the record start.
pub mod frame {
    use super::*;

    pub const FULL_SIZE: usize = offset_of!(FrameHeader, full_size);
    pub const FRAME_SIZE: usize = offset_of!(FrameHeader, frame_size);
    pub const SERIAL: usize = offset_of!(FrameHeader, serial);
    pub const STATE: usize = offset_of!(FrameHeader, state);

    pub const PEER: usize = offset_of!(FrameHeader, peer);
    pub const PEER_DMA_ADDRESS: usize = PEER + offset_of!(PeerFrame, dma_address);
    pub const PEER_BUFFER_REF: usize = PEER + offset_of!(PeerFrame, buffer_ref);

    pub const HOST: usize = offset_of!(FrameHeader, host);
    pub const HOST_KERNEL_ADDRESS: usize = HOST + offset_of!(HostFrame, kernel_address);
    pub const HOST_BUFFER_REF: usize = HOST + offset_of!(HostFrame, buffer_ref);

    pub const PASSTHROUGH: usize = offset_of!(FrameHeader, passthrough);
    pub const PT_SECONDS: usize = PASSTHROUGH + offset_of!(Passthrough, seconds);
    pub const PT_MICROSECONDS: usize = PASSTHROUGH + offset_of!(Passthrough, microseconds);
    pub const PT_TIMECODE: usize = PASSTHROUGH + offset_of!(Passthrough, timecode);
    pub const PT_TC_TYPE: usize = PT_TIMECODE + offset_of!(Timecode, kind);
    pub const PT_TC_FLAGS: usize = PT_TIMECODE + offset_of!(Timecode, flags);
    /// frames, seconds, minutes, hours packed into one little-endian word.
    pub const PT_TC_CLOCK: usize = PT_TIMECODE + offset_of!(Timecode, frames);
    pub const PT_TC_USERBITS: usize = PT_TIMECODE + offset_of!(Timecode, userbits);
    pub const PT_SEQUENCE: usize = PASSTHROUGH + offset_of!(Passthrough, sequence);
    pub const PT_INDEX: usize = PASSTHROUGH + offset_of!(Passthrough, index);
    pub const PT_FLAGS: usize = PASSTHROUGH + offset_of!(Passthrough, flags);
    pub const PT_FIELD: usize = PASSTHROUGH + offset_of!(Passthrough, field);

    pub const SIZE: usize = core::mem::size_of::<FrameHeader>();
}

const_assert_eq!(frame::FULL_SIZE, 0);
const_assert_eq!(frame::FRAME_SIZE, 4);
const_assert_eq!(frame::SERIAL, 8);
const_assert_eq!(frame::STATE, 12);
const_assert_eq!(frame::PEER_DMA_ADDRESS, 16);
const_assert_eq!(frame::PEER_BUFFER_REF, 20);
const_assert_eq!(frame::HOST_KERNEL_ADDRESS, 24);
const_assert_eq!(frame::HOST_BUFFER_REF, 32);
const_assert_eq!(frame::PT_SECONDS, 40);
const_assert_eq!(frame::PT_MICROSECONDS, 48);
const_assert_eq!(frame::PT_TC_TYPE, 56);
const_assert_eq!(frame::PT_TC_FLAGS, 60);
const_assert_eq!(frame::PT_TC_CLOCK, 64);
const_assert_eq!(frame::PT_TC_USERBITS, 68);
const_assert_eq!(frame::PT_SEQUENCE, 72);
const_assert_eq!(frame::PT_INDEX, 76);
const_assert_eq!(frame::PT_FLAGS, 80);
const_assert_eq!(frame::PT_FIELD, 84);
const_assert_eq!(frame::SIZE, 88);
const_assert_eq!(core::mem::size_of::<Timecode>(), 16);
const_assert_eq!(core::mem::size_of::<Passthrough>(), 48);

static_assertions::const_assert!(control::SIZE <= CONTROL_PAGE_SIZE);
static_assertions::const_assert!(frame::SIZE <= FRAME_HEADER_PAGE_SIZE);

//--------------------------------------------------------------------------------------------------
// Layout description for tooling
//--------------------------------------------------------------------------------------------------

/// One row of the wire layout table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub offset: usize,
    pub size: usize,
}

const fn field(name: &'static str, offset: usize, size: usize) -> Field {
    Field { name, offset, size }
}

/// Control page fields, in wire order.
pub const CONTROL_FIELDS: &[Field] = &[
    field("indices_used", control::INDICES_USED, 4),
    field("next_offset", control::NEXT_OFFSET, 4),
    field("next_serial", control::NEXT_SERIAL, 4),
    field("frames_dropped", control::FRAMES_DROPPED, 4),
    field("input_frames", control::INPUT_FRAMES, 4),
    field("input_fps", control::INPUT_FPS, 4),
    field("offset[16]", control::DIRECTORY, 4 * MAX_FRAMES),
    field("stream.width", control::STREAM_WIDTH, 4),
    field("stream.height", control::STREAM_HEIGHT, 4),
    field("stream.fourcc", control::STREAM_FOURCC, 4),
    field("stream.numerator", control::STREAM_NUMERATOR, 4),
    field("stream.denominator", control::STREAM_DENOMINATOR, 4),
    field("stream.active", control::STREAM_ACTIVE, 4),
    field("peer.kernel_address", control::PEER_KERNEL_ADDRESS, 4),
    field("peer.frame_index", control::PEER_FRAME_INDEX, 4),
    field("host.kernel_address", control::HOST_KERNEL_ADDRESS, 8),
    field("host.device_ref", control::HOST_DEVICE_REF, 8),
];

/// Frame header fields, in wire order.
pub const FRAME_FIELDS: &[Field] = &[
    field("full_size", frame::FULL_SIZE, 4),
    field("frame_size", frame::FRAME_SIZE, 4),
    field("serial", frame::SERIAL, 4),
    field("state", frame::STATE, 4),
    field("peer.dma_address", frame::PEER_DMA_ADDRESS, 4),
    field("peer.buffer_ref", frame::PEER_BUFFER_REF, 4),
    field("host.kernel_address", frame::HOST_KERNEL_ADDRESS, 8),
    field("host.buffer_ref", frame::HOST_BUFFER_REF, 8),
    field("passthrough.seconds", frame::PT_SECONDS, 8),
    field("passthrough.microseconds", frame::PT_MICROSECONDS, 8),
    field("passthrough.timecode.type", frame::PT_TC_TYPE, 4),
    field("passthrough.timecode.flags", frame::PT_TC_FLAGS, 4),
    field("passthrough.timecode.clock", frame::PT_TC_CLOCK, 4),
    field("passthrough.timecode.userbits", frame::PT_TC_USERBITS, 4),
    field("passthrough.sequence", frame::PT_SEQUENCE, 4),
    field("passthrough.index", frame::PT_INDEX, 4),
    field("passthrough.flags", frame::PT_FLAGS, 4),
    field("passthrough.field", frame::PT_FIELD, 4),
];
