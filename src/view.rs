//! Bounds-checked access to mapped code
//!
//! Every byte this crate reads from or writes into a code region goes
//! through a `CodeView`. The view pairs a byte slice with the virtual
//! address its first byte corresponds to, so displacement arithmetic and
//! bounds checks run on addresses while the actual access stays inside
//! one checked slice. Tests build views over plain buffers with a
//! synthetic base address; the engine builds them over live mappings.

use crate::error::{PatchError, Result};

/// A writable window onto a contiguous code range.
#[derive(Debug)]
pub struct CodeView<'a> {
	base: usize,
	bytes: &'a mut [u8],
}

impl<'a> CodeView<'a> {
	/// View `bytes` as the code range starting at virtual address `base`.
	#[must_use]
	pub fn new(base: usize, bytes: &'a mut [u8]) -> Self {
		Self { base, bytes }
	}

	/// View live memory spanning `[start, start + len)`.
	///
	/// # Safety
	///
	/// The caller must ensure the range is mapped, stays mapped for `'a`,
	/// is not accessed through any other path while the view exists, and
	/// is writable whenever `write` is called (the activator brackets its
	/// writes with mprotect).
	#[must_use]
	pub unsafe fn map_live(start: usize, len: usize) -> CodeView<'static> {
		let bytes = unsafe { std::slice::from_raw_parts_mut(start as *mut u8, len) };
		CodeView { base: start, bytes }
	}

	/// First address covered by the view
	#[must_use]
	pub const fn start(&self) -> usize {
		self.base
	}

	/// One past the last address covered by the view
	#[must_use]
	pub const fn end(&self) -> usize {
		self.base + self.bytes.len()
	}

	fn checked_range(&self, address: usize, len: usize) -> Result<std::ops::Range<usize>> {
		let end = address.checked_add(len);
		if address < self.base || end.is_none_or(|e| e > self.end()) {
			return Err(PatchError::OutOfBounds {
				address,
				start: self.base,
				end: self.end(),
			});
		}
		let offset = address - self.base;
		Ok(offset..offset + len)
	}

	/// Read `len` bytes starting at virtual address `address`.
	pub fn read(&self, address: usize, len: usize) -> Result<&[u8]> {
		let range = self.checked_range(address, len)?;
		Ok(&self.bytes[range])
	}

	/// Overwrite the bytes at virtual address `address`.
	pub fn write(&mut self, address: usize, bytes: &[u8]) -> Result<()> {
		let range = self.checked_range(address, bytes.len())?;
		self.bytes[range].copy_from_slice(bytes);
		Ok(())
	}
}
