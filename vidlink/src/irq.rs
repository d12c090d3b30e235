/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Interrupt handler registration.

use {alloc::sync::Arc, core::fmt};

/// Interrupt line number as the bus reports it.
pub type IrqNumber = u32;

/// Interrupt handling interfaces.
pub mod interface {
    /// Implemented by anything that can service an interrupt line.
    pub trait IrqHandler: Send + Sync {
        /// Called in interrupt context. Must not block.
        fn handle(&self) -> super::IrqReturn;
    }
}

/// What a handler did with an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// The interrupt was ours.
    Handled,
    /// Someone else on a shared line raised it.
    None,
}

/// A handler bound to a line, ready to be registered with the bus.
#[derive(Clone)]
pub struct IrqHandlerDescriptor {
    number: IrqNumber,
    name: &'static str,
    handler: Arc<dyn interface::IrqHandler>,
}

impl IrqHandlerDescriptor {
    pub fn new(
        number: IrqNumber,
        name: &'static str,
        handler: Arc<dyn interface::IrqHandler>,
    ) -> Self {
        Self {
            number,
            name,
            handler,
        }
    }

    pub fn number(&self) -> IrqNumber {
        self.number
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn handler(&self) -> &Arc<dyn interface::IrqHandler> {
        &self.handler
    }
}

impl fmt::Debug for IrqHandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IrqHandlerDescriptor")
            .field("number", &self.number)
            .field("name", &self.name)
            .finish()
    }
}
