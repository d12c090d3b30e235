/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Page arithmetic shared by the allocator, the sweep and the resource files.

/// Page size both sides of the link agree on.
pub const PAGE_SIZE: usize = 4096;

/// Align address downwards.
///
/// Returns the greatest x with alignment `align` so that x <= addr.
/// The alignment must be a power of 2.
#[inline(always)]
pub const fn align_down(addr: usize, alignment: usize) -> usize {
    assert!(
        alignment.is_power_of_two(),
        "`alignment` must be a power of two"
    );
    addr & !(alignment - 1)
}

/// Align address upwards.
///
/// Returns the smallest x with alignment `align` so that x >= addr.
/// The alignment must be a power of 2.
#[inline(always)]
pub const fn align_up(value: usize, alignment: usize) -> usize {
    assert!(
        alignment.is_power_of_two(),
        "`alignment` must be a power of two"
    );

    let align_mask = alignment - 1;
    if value & align_mask == 0 {
        value // already aligned
    } else {
        (value | align_mask) + 1
    }
}

/// Check if a value is aligned to a given alignment.
/// The alignment must be a power of 2.
#[inline(always)]
pub const fn is_aligned(value: u64, alignment: u64) -> bool {
    assert!(
        alignment.is_power_of_two(),
        "`alignment` must be a power of two"
    );

    (value & (alignment - 1)) == 0
}

/// Whether an address or offset sits on a page boundary.
#[inline(always)]
pub const fn is_page_aligned(value: u64) -> bool {
    is_aligned(value, PAGE_SIZE as u64)
}

/// Size of a frame record carrying `frame_size` payload bytes: one header page plus the
/// payload, rounded up to whole pages. `None` if that does not fit a `usize`.
#[inline]
pub const fn frame_record_size(frame_size: usize) -> Option<usize> {
    match PAGE_SIZE.checked_add(frame_size) {
        Some(len) if len <= usize::MAX - (PAGE_SIZE - 1) => Some(align_up(len, PAGE_SIZE)),
        _ => None,
    }
}

/// Convert a size into human readable format.
pub const fn size_human_readable_ceil(size: usize) -> (usize, &'static str) {
    const KIB: usize = 1024;
    const MIB: usize = 1024 * 1024;
    const GIB: usize = 1024 * 1024 * 1024;

    if (size / GIB) > 0 {
        (size.div_ceil(GIB), "GiB")
    } else if (size / MIB) > 0 {
        (size.div_ceil(MIB), "MiB")
    } else if (size / KIB) > 0 {
        (size.div_ceil(KIB), "KiB")
    } else {
        (size, "Byte")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        // align 1
        assert_eq!(align_up(0, 1), 0);
        assert_eq!(align_up(1234, 1), 1234);
        // align 2
        assert_eq!(align_up(0, 2), 0);
        assert_eq!(align_up(1233, 2), 1234);
        // page
        assert_eq!(align_up(1, PAGE_SIZE), PAGE_SIZE);
        assert_eq!(align_up(PAGE_SIZE, PAGE_SIZE), PAGE_SIZE);
        assert_eq!(align_down(PAGE_SIZE + 1, PAGE_SIZE), PAGE_SIZE);
    }

    #[test]
    fn record_size_includes_header_page() {
        assert_eq!(frame_record_size(0), PAGE_SIZE);
        assert_eq!(frame_record_size(1), Some(2 * PAGE_SIZE));
        assert_eq!(frame_record_size(PAGE_SIZE), Some(2 * PAGE_SIZE));
        // 1920x1080 NV12
        assert_eq!(frame_record_size(3_110_400), Some(761 * PAGE_SIZE));
    }

    #[test]
    fn oversized_records_do_not_wrap() {
        assert_eq!(frame_record_size(usize::MAX), None);
        assert_eq!(frame_record_size(usize::MAX - PAGE_SIZE), None);
        assert_eq!(frame_record_size(usize::MAX - 2 * PAGE_SIZE + 1), None);
        assert_eq!(
            frame_record_size(usize::MAX - 3 * PAGE_SIZE),
            Some(usize::MAX - PAGE_SIZE + 1)
        );
    }

    #[test]
    fn page_alignment_check() {
        assert!(is_page_aligned(0));
        assert!(is_page_aligned(0x1000_0000));
        assert!(!is_page_aligned(0x1000_0008));
    }

    #[test]
    fn human_readable_sizes() {
        assert_eq!(size_human_readable_ceil(16 * 1024 * 1024), (16, "MiB"));
        assert_eq!(size_human_readable_ceil(4097), (5, "KiB"));
        assert_eq!(size_human_readable_ceil(12), (12, "Byte"));
    }
}
