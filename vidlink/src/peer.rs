/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! The far end of the link.
//!
//! The FPGA side runs the same protocol in mirror image. This implementation lets the
//! protocol run end to end against a simulated function, in tests and in `framectl`.

use crate::{
    doorbell::FlagRegister,
    frame::{Frame, FrameState, Side},
    region::{self, SharedRegion},
};

/// Peer interfaces.
pub mod interface {
    /// Something the peer can pull to interrupt the host.
    pub trait InterruptLine: Send + Sync {
        fn raise(&self);
    }
}

/// What one [`RemotePeer::service`] round did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Round {
    /// Frames seen for the first time and made free.
    pub accepted: usize,
    /// Pending frames taken into processing.
    pub started: usize,
    /// Frames finished and reported back.
    pub finished: usize,
}

/// Peer view of a shared region plus its ends of the doorbells.
pub struct RemotePeer<'a> {
    region: SharedRegion,
    ack: FlagRegister,
    request: FlagRegister,
    line: &'a dyn interface::InterruptLine,
}

impl<'a> RemotePeer<'a> {
    pub fn new(
        region: SharedRegion,
        ack: FlagRegister,
        request: FlagRegister,
        line: &'a dyn interface::InterruptLine,
    ) -> Self {
        Self {
            region,
            ack,
            request,
            line,
        }
    }

    pub fn region(&self) -> &SharedRegion {
        &self.region
    }

    /// Take the host's request, if there is one. Only the peer clears it.
    pub fn poll_request(&self) -> bool {
        if self.request.read() == 0 {
            return false;
        }
        self.request.write(0);
        true
    }

    /// Whether an interrupt is raised and not yet acknowledged by the host.
    pub fn interrupt_pending(&self) -> bool {
        self.ack.read() != 0
    }

    /// Make every new frame available to the host.
    pub fn accept_new_frames(&self) -> region::Result<usize> {
        let mut accepted = 0;
        self.advance(FrameState::Initial, FrameState::Free, |index, frame| {
            frame.set_peer_dma_address(frame.payload_phys() as u32);
            frame.set_peer_buffer_ref(index as u32);
            accepted += 1;
        })?;
        let used = self.region.checked_count()?;
        self.region
            .set_peer_reference(self.region.phys_base() as u32, used as u32);
        Ok(accepted)
    }

    /// Take pending frames into processing.
    pub fn start_pending(&self) -> region::Result<usize> {
        let mut started = 0;
        self.advance(FrameState::Ready, FrameState::Busy, |_, _| started += 1)?;
        Ok(started)
    }

    /// Run `work` on every frame in processing and mark it processed.
    pub fn finish_processing(&self, mut work: impl FnMut(&Frame<'_>)) -> region::Result<usize> {
        let mut finished = 0;
        self.advance(FrameState::Busy, FrameState::Done, |_, frame| {
            work(frame);
            finished += 1;
        })?;
        Ok(finished)
    }

    /// Interrupt the host.
    pub fn raise_interrupt(&self) {
        self.ack.write(1);
        self.line.raise();
    }

    /// One full round: answer a pending request by accepting new frames, processing every
    /// pending one and interrupting the host if anything was finished.
    pub fn service(&self, work: impl FnMut(&Frame<'_>)) -> region::Result<Round> {
        if !self.poll_request() {
            return Ok(Round::default());
        }
        let round = Round {
            accepted: self.accept_new_frames()?,
            started: self.start_pending()?,
            finished: self.finish_processing(work)?,
        };
        if round.finished > 0 {
            self.raise_interrupt();
        }
        Ok(round)
    }

    /// Move every frame in `from` to `to`, running `f` on it first.
    fn advance(
        &self,
        from: FrameState,
        to: FrameState,
        mut f: impl FnMut(usize, &Frame<'_>),
    ) -> region::Result<()> {
        let used = self.region.checked_count()?;
        for index in 0..used {
            let frame = self.region.checked_frame(index)?;
            if frame.state() != Some(from) {
                continue;
            }
            f(index, &frame);
            frame.try_transition(to, Side::Peer);
            debug!(
                VIDEO,
                "peer: frame #{} {} -> {}",
                frame.serial(),
                from.name(Side::Peer),
                to.name(Side::Peer)
            );
        }
        Ok(())
    }
}
