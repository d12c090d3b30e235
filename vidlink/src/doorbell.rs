/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! The two doorbell words between host and peer.
//!
//! Each lives in its own BAR. The host clears **ack** on every interrupt to re-arm the line,
//! and sets **request** to tell the peer a frame is waiting. Only the peer clears **request**.
//! The peer raises an interrupt by setting **ack**.

use {
    crate::{memory::MemoryWindow, mmio_deref_wrapper::MMIODerefWrapper},
    alloc::sync::Arc,
    core::{
        fmt,
        sync::atomic::{fence, Ordering},
    },
    tock_registers::{
        interfaces::{Readable, Writeable},
        register_structs,
        registers::ReadWrite,
    },
};

register_structs! {
    #[allow(non_snake_case)]
    pub FlagBlock {
        (0x00 => FLAG: ReadWrite<u32>),
        (0x04 => @END),
    }
}

// Hide FlagBlock from public api.
type Registers = MMIODerefWrapper<FlagBlock>;

/// Value the host writes to the ack word.
pub const ACK_CLEAR: u32 = 0;
/// Value the host writes to the request word.
pub const REQUEST_SET: u32 = 1;

/// One mapped flag word.
pub struct FlagRegister {
    registers: Registers,
    // Keeps the mapping behind `registers` alive.
    _window: Arc<dyn MemoryWindow>,
}

impl FlagRegister {
    /// Map the first word of `window`. `None` if the window cannot hold it.
    pub fn new(window: Arc<dyn MemoryWindow>) -> Option<Self> {
        let base = window.as_ptr() as usize;
        if window.len() < core::mem::size_of::<FlagBlock>() || base % 4 != 0 {
            return None;
        }
        Some(Self {
            // SAFETY: the window is at least one aligned word long and lives as long as self.
            registers: unsafe { Registers::new(base) },
            _window: window,
        })
    }

    pub fn read(&self) -> u32 {
        self.registers.FLAG.get()
    }

    pub fn write(&self, value: u32) {
        self.registers.FLAG.set(value)
    }
}

impl fmt::Debug for FlagRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlagRegister({:#x})", self.registers.base_addr())
    }
}

/// Host end of the doorbell pair.
///
/// Either register may be missing if its BAR could not be mapped. The driver then keeps going
/// in a degraded mode and logs every attempt to use it.
#[derive(Debug, Default)]
pub struct Doorbell {
    ack: Option<FlagRegister>,
    request: Option<FlagRegister>,
}

impl Doorbell {
    pub fn new(ack: Option<FlagRegister>, request: Option<FlagRegister>) -> Self {
        Self { ack, request }
    }

    /// Re-arm the interrupt line. Called once per interrupt, useful or not.
    pub fn acknowledge(&self) {
        match &self.ack {
            Some(ack) => ack.write(ACK_CLEAR),
            None => error!("cannot acknowledge interrupt: ack register is not mapped"),
        }
    }

    /// Tell the peer there is work. Everything written to shared memory before is visible to
    /// the peer before the request is.
    pub fn signal_request(&self) {
        match &self.request {
            Some(request) => {
                fence(Ordering::Release);
                request.write(REQUEST_SET)
            }
            None => error!("cannot signal request: request register is not mapped"),
        }
    }

    /// Both registers are mapped.
    pub fn is_complete(&self) -> bool {
        self.ack.is_some() && self.request.is_some()
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::memory::HostMemory, crate::mm::PAGE_SIZE};

    fn word() -> Arc<dyn MemoryWindow> {
        Arc::new(HostMemory::new(PAGE_SIZE, 0).unwrap())
    }

    #[test]
    fn acknowledge_clears_and_request_sets() {
        let ack_mem = word();
        let req_mem = word();
        ack_mem.write_u32(0, 0xdead);
        let bell = Doorbell::new(
            FlagRegister::new(ack_mem.clone()),
            FlagRegister::new(req_mem.clone()),
        );
        assert!(bell.is_complete());

        bell.acknowledge();
        bell.signal_request();
        assert_eq!(ack_mem.read_u32(0), ACK_CLEAR);
        assert_eq!(req_mem.read_u32(0), REQUEST_SET);

        // The host never clears its own request.
        bell.acknowledge();
        assert_eq!(req_mem.read_u32(0), REQUEST_SET);
    }

    #[test]
    fn unmapped_registers_are_a_logged_no_op() {
        let bell = Doorbell::default();
        assert!(!bell.is_complete());
        bell.acknowledge();
        bell.signal_request();

        let req_mem = word();
        let half = Doorbell::new(None, FlagRegister::new(req_mem.clone()));
        half.acknowledge();
        half.signal_request();
        assert_eq!(req_mem.read_u32(0), REQUEST_SET);
    }

    #[test]
    fn flag_needs_a_whole_word() {
        let tiny: Arc<dyn MemoryWindow> = Arc::new(HostMemory::new(2, 0).unwrap());
        assert!(FlagRegister::new(tiny).is_none());
    }
}
