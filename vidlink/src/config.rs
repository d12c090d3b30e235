/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Driver configuration, given the way a loadable module gets it: one parameter string.
//!
//! ```text
//! debug=0xc0 device_files=1 min_buffers=8 base_minor=1
//! ```

use {
    bitflags::bitflags,
    core::sync::atomic::{AtomicU32, Ordering},
    snafu::Snafu,
};

bitflags! {
    /// Debug message categories, switched on individually through the `debug` parameter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DebugFlags: u32 {
        /// Generic debug info.
        const GENERIC = 1 << 0;
        /// Resource file operations.
        const FILES = 1 << 1;
        /// PCI resource information.
        const RESOURCES = 1 << 2;
        /// Detailed PCI configuration information.
        const CONFIG = 1 << 3;
        /// Function call trace.
        const CALLTRACE = 1 << 4;
        /// Create resource files for debugging.
        const DEVICEFILE = 1 << 5;
        /// Memory related operations.
        const MEMORY = 1 << 6;
        /// Video related information.
        const VIDEO = 1 << 7;
    }
}

static DEBUG_MASK: AtomicU32 = AtomicU32::new(0);

/// Replace the global debug mask.
pub fn set_debug_flags(flags: DebugFlags) {
    DEBUG_MASK.store(flags.bits(), Ordering::Relaxed);
}

/// Current global debug mask.
pub fn debug_flags() -> DebugFlags {
    DebugFlags::from_bits_truncate(DEBUG_MASK.load(Ordering::Relaxed))
}

/// Check one debug category, used by the `debug!` macro.
#[inline]
pub fn debug_enabled(category: DebugFlags) -> bool {
    debug_flags().intersects(category)
}

/// Minimum number of buffers the video queue asks for.
pub const DEFAULT_MIN_BUFFERS: u32 = 8;

/// Minor number of the first resource file.
pub const DEFAULT_BASE_MINOR: u32 = 1;

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum Error {
    #[snafu(display("unknown parameter '{key}'"))]
    UnknownKey { key: alloc::string::String },
    #[snafu(display("parameter '{key}' needs a value"))]
    MissingValue { key: alloc::string::String },
    #[snafu(display("parameter '{key}' has invalid value '{value}'"))]
    InvalidValue {
        key: alloc::string::String,
        value: alloc::string::String,
    },
}

pub type Result<T> = core::result::Result<T, Error>;

/// Parsed driver parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// Enabled debug categories.
    pub debug: DebugFlags,
    /// Lower bound for the number of buffers negotiated in queue setup.
    pub min_buffers: u32,
    /// Minor number of resource file #0; the other two follow it.
    pub base_minor: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            debug: DebugFlags::empty(),
            min_buffers: DEFAULT_MIN_BUFFERS,
            base_minor: DEFAULT_BASE_MINOR,
        }
    }
}

impl DriverConfig {
    /// Parse a whitespace separated `key=value` parameter string.
    ///
    /// Numbers may be decimal or `0x` prefixed hexadecimal. `device_files` is a shortcut
    /// for the [`DebugFlags::DEVICEFILE`] bit.
    pub fn parse(params: &str) -> Result<Self> {
        use alloc::string::ToString;

        let mut config = Self::default();

        for item in params.split_whitespace() {
            let (key, value) = match item.split_once('=') {
                Some((key, value)) if !value.is_empty() => (key, value),
                _ => {
                    return MissingValueSnafu {
                        key: item.trim_end_matches('=').to_string(),
                    }
                    .fail()
                }
            };
            let number = parse_number(value).ok_or_else(|| Error::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            })?;

            match key {
                "debug" => config.debug = DebugFlags::from_bits_truncate(number),
                "device_files" => config.debug.set(DebugFlags::DEVICEFILE, number != 0),
                "min_buffers" => config.min_buffers = number,
                "base_minor" => config.base_minor = number,
                _ => {
                    return UnknownKeySnafu {
                        key: key.to_string(),
                    }
                    .fail()
                }
            }
        }

        Ok(config)
    }

    /// Whether the debug resource files should be created.
    pub fn device_files(&self) -> bool {
        self.debug.contains(DebugFlags::DEVICEFILE)
    }

    /// Make this configuration's debug mask the global one.
    pub fn apply(&self) {
        set_debug_flags(self.debug);
    }
}

fn parse_number(value: &str) -> Option<u32> {
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}
