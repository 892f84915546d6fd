//! Patch activation
//!
//! The write pass commits one escape jump per plan into the target's
//! text. It is separated from the protection transitions so the byte
//! layout can be tested against plain buffers: `write_patches` performs
//! every write through a bounds-checked `CodeView`, while `activate`
//! brackets it with raw mprotect calls on the live mapping.
//!
//! There is no rollback. Once the first jump lands, any subsequent
//! failure must end the process; callers route errors from this module
//! into [`PatchError::abort`] after the first live write.

use crate::arch;
use crate::descriptor::LibraryDescriptor;
use crate::error::{PatchError, Result};
use crate::ffi;
use crate::util::memory::page_align;
use crate::view::CodeView;

/// Write the escape jump for every plan in `lib` through `text`.
///
/// Wrappers out of direct `jmp rel32` range go through a freshly
/// appended trampoline-table entry; a missing or exhausted table is
/// fatal. Padding-strategy sites get their two short jumps; relocation
/// sites get their freed bytes trap-filled.
pub fn write_patches(lib: &mut LibraryDescriptor, text: &mut CodeView<'_>) -> Result<()> {
	for i in 0..lib.plans.len() {
		let plan = lib.plans[i].clone();

		if !lib.contains(plan.jump_patch_addr) {
			return Err(PatchError::OutOfBounds {
				address: plan.jump_patch_addr,
				start: lib.text_start,
				end: lib.text_end,
			});
		}

		let wrapper = plan.wrapper_addr.ok_or(PatchError::MissingWrapper {
			syscall_addr: plan.syscall_addr,
		})?;

		if arch::near_jump_reachable(plan.jump_patch_addr, wrapper) {
			text.write(plan.jump_patch_addr, &arch::encode_near_jump(plan.jump_patch_addr, wrapper)?)?;
		} else {
			// Two-step escape: rel32 into the nearby table entry, then an
			// indirect far jump from the entry to the wrapper.
			let table = lib
				.trampoline_table
				.as_mut()
				.ok_or(PatchError::TableUnavailable {
					from: plan.jump_patch_addr,
					to: wrapper,
				})?;
			let entry = table.append(wrapper)?;
			text.write(plan.jump_patch_addr, &arch::encode_near_jump(plan.jump_patch_addr, entry)?)?;

			tracing::debug!(
				"escape jump at {:#x} routed through trampoline entry {entry:#x} to wrapper {wrapper:#x}",
				plan.jump_patch_addr
			);
		}

		if let Some(region) = plan.padding {
			// Short jump from the syscall into the padding, and a second
			// short jump over the injected escape jump so fall-through
			// execution of the padding region stays unbroken.
			text.write(
				plan.syscall_addr,
				&arch::encode_short_jump(plan.syscall_addr, plan.jump_patch_addr)?,
			)?;
			text.write(region.address, &arch::encode_short_jump(region.address, region.end())?)?;
		} else {
			// Stray execution of leftover relocated bytes must fault
			// loudly rather than run stale code.
			for addr in (plan.jump_patch_addr + arch::JUMP_INS_SIZE)..plan.return_addr {
				text.write(addr, &[arch::TRAP_OPCODE])?;
			}
		}
	}

	Ok(())
}

/// Commit all patches for one library into its live text segment.
///
/// The text pages are writable only for the duration of the write pass.
///
/// # Safety
///
/// The library's recorded text bounds must describe a currently mapped
/// code segment, no thread may be executing inside it, and every plan's
/// wrapper must already be generated.
pub unsafe fn activate(lib: &mut LibraryDescriptor) -> Result<()> {
	if lib.plans.is_empty() {
		return Ok(());
	}

	let first_page = page_align(lib.text_start);
	let len = lib.text_end - first_page;

	tracing::info!(
		path = %lib.path,
		sites = lib.plans.len(),
		"activating patches"
	);

	unsafe {
		ffi::mprotect_raw(first_page, len, libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC)?;
	}

	let mut text = unsafe { CodeView::map_live(lib.text_start, lib.text_end - lib.text_start) };
	let written = write_patches(lib, &mut text);

	// Restore execute-only protection even when a write failed; the
	// caller aborts on the error either way.
	let restored = unsafe { ffi::mprotect_raw(first_page, len, libc::PROT_READ | libc::PROT_EXEC) };

	written?;
	restored?;
	Ok(())
}
