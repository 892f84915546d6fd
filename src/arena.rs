//! Trampoline memory bookkeeping
//!
//! Two fixed-capacity regions back the generated code. The
//! `TrampolineArena` is a process-wide mmap'd block holding every
//! wrapper; it is bump-allocated, never freed, and flipped executable
//! exactly once after all wrappers for all libraries exist. The
//! `TrampolineTable` is a small per-library buffer of indirect far-jump
//! entries, used only when a wrapper lies beyond the direct jump range
//! of its patch site. Neither region ever grows: patching live code on
//! top of a reallocating buffer would be unsound, so exhaustion is a
//! typed error instead.

use std::num::NonZeroUsize;

use nix::sys::mman::{MapFlags, ProtFlags, mmap_anonymous};

use crate::arch;
use crate::error::{PatchError, Result};
use crate::ffi;
use crate::util::memory::{align_to_page, page_size};
use crate::view::CodeView;

/// Default arena capacity, enough for a few thousand wrappers
pub const DEFAULT_ARENA_CAPACITY: usize = 0x10_0000;

/// The reserved block all generated wrappers live in.
///
/// The first page is left unused; the cursor starts one page past the
/// base and only ever advances. The arena is deliberately never unmapped:
/// wrappers must stay resident and executable as long as any patched
/// library can run.
#[derive(Debug)]
pub struct TrampolineArena {
	base: usize,
	capacity: usize,
	cursor: usize,
	sealed: bool,
}

impl TrampolineArena {
	/// Reserve a writable, non-executable arena of `capacity` bytes,
	/// rounded up to whole pages.
	///
	/// The capacity must exceed one page, since the first page is
	/// reserved and never handed out.
	pub fn reserve(capacity: usize) -> Result<Self> {
		let page = page_size();
		// The mapping is page-granular, so account for what is actually
		// reserved rather than what was asked for.
		let capacity = align_to_page(capacity);
		let length = NonZeroUsize::new(capacity).filter(|c| c.get() > page).ok_or(
			PatchError::ArenaExhausted {
				needed: page + 1,
				remaining: capacity,
			},
		)?;

		// Safety: anonymous private mapping at a kernel-chosen address,
		// owned by the arena for the life of the process.
		let mapping = unsafe {
			mmap_anonymous(
				None,
				length,
				ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
				MapFlags::MAP_PRIVATE,
			)?
		};

		let base = mapping.as_ptr() as usize;
		tracing::debug!("reserved trampoline arena at {base:#x} ({capacity} bytes)");

		Ok(Self {
			base,
			capacity,
			cursor: page_size(),
			sealed: false,
		})
	}

	/// Address the next allocation will start at
	#[must_use]
	pub const fn next_addr(&self) -> usize {
		self.base + self.cursor
	}

	/// Current cursor offset from the arena base
	#[must_use]
	pub const fn cursor(&self) -> usize {
		self.cursor
	}

	/// Bytes still available for wrappers
	#[must_use]
	pub const fn remaining(&self) -> usize {
		self.capacity - self.cursor
	}

	/// Allocate `len` contiguous bytes, returning their address and a
	/// writable slice over them.
	pub fn alloc(&mut self, len: usize) -> Result<(usize, &mut [u8])> {
		if self.sealed {
			return Err(PatchError::ArenaSealed);
		}
		if len > self.remaining() {
			return Err(PatchError::ArenaExhausted {
				needed: len,
				remaining: self.remaining(),
			});
		}

		let addr = self.base + self.cursor;
		self.cursor += len;

		// The arena owns this mapping and the cursor never moves backwards,
		// so the slice cannot overlap a previous allocation.
		let bytes = unsafe { std::slice::from_raw_parts_mut(addr as *mut u8, len) };
		Ok((addr, bytes))
	}

	/// Make all wrapper pages executable (and no longer writable).
	///
	/// Must happen after every wrapper for every library has been
	/// generated, and before any patched site can execute. Repeated calls
	/// are no-ops.
	pub fn seal(&mut self) -> Result<()> {
		if self.sealed {
			return Ok(());
		}

		let start = self.base + page_size();
		let len = self.capacity - page_size();
		unsafe { ffi::mprotect_raw(start, len, libc::PROT_READ | libc::PROT_EXEC)? };

		self.sealed = true;
		tracing::debug!("sealed trampoline arena at {:#x} executable", self.base);
		Ok(())
	}

	/// Whether the arena has been made executable
	#[must_use]
	pub const fn is_sealed(&self) -> bool {
		self.sealed
	}
}

/// A per-library table of indirect far-jump entries.
///
/// The memory is reserved close to the library's text by the external
/// analysis collaborator, so a `jmp rel32` at any patch site can always
/// reach an entry; the entry then jumps anywhere via an absolute pointer.
#[derive(Debug)]
pub struct TrampolineTable {
	view: CodeView<'static>,
	cursor: usize,
}

impl TrampolineTable {
	/// Wrap an already reserved, writable code range as a trampoline table.
	#[must_use]
	pub fn new(view: CodeView<'static>) -> Self {
		Self { view, cursor: 0 }
	}

	/// Wrap live memory spanning `[start, start + len)` as a table.
	///
	/// # Safety
	///
	/// Same contract as [`CodeView::map_live`]; additionally the range
	/// must be writable for the whole activation pass and executable
	/// afterwards.
	#[must_use]
	pub unsafe fn map_live(start: usize, len: usize) -> Self {
		Self::new(unsafe { CodeView::map_live(start, len) })
	}

	/// Append an entry jumping to `wrapper`, returning the entry address.
	pub fn append(&mut self, wrapper: usize) -> Result<usize> {
		let capacity = self.view.end() - self.view.start();
		if self.cursor + arch::INDIRECT_JUMP_SIZE > capacity {
			return Err(PatchError::TableExhausted {
				used: self.cursor,
				capacity,
			});
		}

		let entry = self.view.start() + self.cursor;
		self.view.write(entry, &arch::encode_indirect_jump(wrapper))?;
		self.cursor += arch::INDIRECT_JUMP_SIZE;
		Ok(entry)
	}
}
