//! Page size helpers.

use std::sync::OnceLock;

const FALLBACK_PAGE_SIZE: usize = 4096;

/// Returns the operating system page size.
#[must_use]
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(query_page_size)
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn query_page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size)
        .ok()
        .filter(|s| s.is_power_of_two())
        .unwrap_or(FALLBACK_PAGE_SIZE)
}

#[cfg(not(unix))]
fn query_page_size() -> usize {
    FALLBACK_PAGE_SIZE
}

/// Rounds `size` up to the next multiple of the page size.
///
/// Returns `None` on overflow.
#[must_use]
pub fn round_to_page(size: usize) -> Option<usize> {
    let page = page_size();
    size.checked_add(page - 1).map(|s| s & !(page - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn page_size_is_power_of_two() {
        assert!(page_size().is_power_of_two());
        assert!(page_size() >= 4096);
    }

    #[test]
    fn exact_multiples_are_unchanged() {
        let page = page_size();
        assert_eq!(round_to_page(0), Some(0));
        assert_eq!(round_to_page(page), Some(page));
        assert_eq!(round_to_page(page + 1), Some(2 * page));
        assert_eq!(round_to_page(usize::MAX), None);
    }

    proptest! {
        #[test]
        fn rounding_is_minimal(size in 0usize..(1 << 30)) {
            let page = page_size();
            let rounded = round_to_page(size).unwrap();
            prop_assert_eq!(rounded % page, 0);
            prop_assert!(rounded >= size);
            prop_assert!(rounded - size < page);
        }
    }
}
