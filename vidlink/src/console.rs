/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Global console used by the logging macros.
//!
//! The driver never owns an output device itself: whoever embeds it registers a sink
//! (kernel log, UART, stdout of a host tool). Until then everything goes to [`null_console`].

pub mod null_console;

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Console interfaces.
pub mod interface {
    use core::fmt;

    /// Console write functions.
    pub trait Write {
        /// Write a Rust format string.
        fn write_fmt(&self, args: fmt::Arguments) -> fmt::Result;
    }
}

//--------------------------------------------------------------------------------------------------
// Global instances
//--------------------------------------------------------------------------------------------------

static CONSOLE: spin::RwLock<&'static (dyn interface::Write + Sync)> =
    spin::RwLock::new(&null_console::NULL_CONSOLE);

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Register a new console.
pub fn register_console(new_console: &'static (dyn interface::Write + Sync)) {
    *CONSOLE.write() = new_console;
}

/// Return a reference to the currently registered console.
///
/// This is the global console used by all printing macros.
pub fn console() -> &'static (dyn interface::Write + Sync) {
    *CONSOLE.read()
}
