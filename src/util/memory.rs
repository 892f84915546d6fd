//! Page arithmetic
//!
//! Protection changes operate on whole pages; these helpers keep the
//! rounding in one place.

/// Get the system page size
#[inline]
#[must_use]
pub fn page_size() -> usize {
	unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Round an address down to a page boundary
#[inline]
#[must_use]
pub fn page_align(addr: usize) -> usize {
	addr & !(page_size() - 1)
}

/// Round a size up to a whole number of pages
#[inline]
#[must_use]
pub fn align_to_page(size: usize) -> usize {
	let page_size = page_size();
	(size + page_size - 1) & !(page_size - 1)
}
