/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

/// Macro similar to [std](https://doc.rust-lang.org/src/std/macros.rs.html)
/// but for writing into the registered driver console.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::macros::_print(format_args!($($arg)*)));
}

#[doc(hidden)]
pub fn _print(args: core::fmt::Arguments) {
    use crate::console::console;
    // A console that cannot take the text has nowhere to report that either.
    let _ = console().write_fmt(args);
}

//--------------------------------------------------------------------------------------------------
//--------------------------------------------------------------------------------------------------

/// Prints info text, with a newline.
#[macro_export]
macro_rules! info {
    ($string:expr) => ({
        $crate::print!(concat!("[i] {}: ", $string, "\n"), $crate::DRIVER_NAME);
    });
    ($format_string:expr, $($arg:tt)*) => ({
        $crate::print!(
            concat!("[i] {}: ", $format_string, "\n"),
            $crate::DRIVER_NAME,
            $($arg)*
        );
    })
}

/// Prints warning text, with a newline.
#[macro_export]
macro_rules! warn {
    ($string:expr) => ({
        $crate::print!(concat!("[W] {}: ", $string, "\n"), $crate::DRIVER_NAME);
    });
    ($format_string:expr, $($arg:tt)*) => ({
        $crate::print!(
            concat!("[W] {}: ", $format_string, "\n"),
            $crate::DRIVER_NAME,
            $($arg)*
        );
    })
}

/// Prints error text, with a newline.
#[macro_export]
macro_rules! error {
    ($string:expr) => ({
        $crate::print!(concat!("[E] {}: ", $string, "\n"), $crate::DRIVER_NAME);
    });
    ($format_string:expr, $($arg:tt)*) => ({
        $crate::print!(
            concat!("[E] {}: ", $format_string, "\n"),
            $crate::DRIVER_NAME,
            $($arg)*
        );
    })
}

/// Prints debug text of one category, only if that category is enabled in the debug mask.
///
/// ```ignore
/// debug!(MEMORY, "frame at offset {:#x}", offset);
/// ```
#[macro_export]
macro_rules! debug {
    ($category:ident, $string:expr) => ({
        if $crate::config::debug_enabled($crate::config::DebugFlags::$category) {
            $crate::print!(concat!("[d] {}: ", $string, "\n"), $crate::DRIVER_NAME);
        }
    });
    ($category:ident, $format_string:expr, $($arg:tt)*) => ({
        if $crate::config::debug_enabled($crate::config::DebugFlags::$category) {
            $crate::print!(
                concat!("[d] {}: ", $format_string, "\n"),
                $crate::DRIVER_NAME,
                $($arg)*
            );
        }
    })
}
