//! Patch planning
//!
//! For every syscall site the planner decides which bytes the escape
//! jump may overwrite and where execution resumes afterwards. It is a
//! pure decision pass: nothing here touches target memory, so the same
//! analysis input always produces the same plans.
//!
//! Two strategies exist, tried in order:
//!
//! 1. **Padding trampoline**: a short jump at the syscall instruction
//!    into an unused inter-function padding region, with the full-range
//!    escape jump placed inside the padding. Preferred because only the
//!    two syscall bytes are overwritten.
//! 2. **Instruction relocation**: neighboring instructions that can be
//!    moved into the wrapper are sacrificed so the full-range jump fits
//!    at the site itself.
//!
//! If neither strategy frees enough bytes, the site cannot be
//! intercepted and planning fails for the whole library.

use crate::analysis::{InstructionInfo, PaddingRegion};
use crate::arch;
use crate::descriptor::{LibraryDescriptor, PatchPlan};
use crate::error::{PatchError, Result};

/// Fill in the strategy fields of every plan in `lib`.
///
/// Plans are visited in discovery (address) order; each computed return
/// address is recorded as a jump target so later sites never relocate an
/// instruction some wrapper jumps back to.
pub fn plan_patches(lib: &mut LibraryDescriptor) -> Result<()> {
	let mut next_padding = 0usize;

	for i in 0..lib.plans.len() {
		let mut plan = lib.plans[i].clone();
		plan_site(lib, &mut plan, &mut next_padding)?;

		tracing::debug!(
			"planned syscall site {:#x}: padding={} prev={} prev2={} next={}",
			plan.syscall_addr,
			plan.padding.is_some(),
			plan.uses_prev,
			plan.uses_prev_2,
			plan.uses_next
		);

		let return_addr = plan.return_addr;
		lib.plans[i] = plan;
		lib.mark_jump_target(return_addr);
	}

	tracing::info!(path = %lib.path, sites = lib.plans.len(), "patch planning complete");
	Ok(())
}

fn plan_site(lib: &LibraryDescriptor, plan: &mut PatchPlan, next_padding: &mut usize) -> Result<()> {
	if let Some(region) = assign_padding_trampoline(lib, plan.syscall_addr, next_padding) {
		// Only the two syscall bytes are overwritten; the escape jump
		// goes into the padding, two bytes past its start (the first two
		// bytes carry the short jump that keeps fall-through flow intact).
		plan.uses_prev = false;
		plan.uses_prev_2 = false;
		plan.uses_next = false;
		plan.padding = Some(region);
		plan.jump_patch_addr = region.address + arch::SHORT_JUMP_INS_SIZE;
		plan.return_addr = plan.syscall_addr + arch::SYSCALL_INS_SIZE;
		return Ok(());
	}

	plan.padding = None;
	check_surrounding_instructions(lib, plan);

	// The syscall instruction itself is always overwritable; every
	// relocated neighbor adds its bytes to the escape jump's budget.
	let mut length = arch::SYSCALL_INS_SIZE;
	plan.jump_patch_addr = plan.syscall_addr;

	if plan.uses_prev {
		length += plan.preceding.length as usize;
		plan.jump_patch_addr -= plan.preceding.length as usize;

		if plan.uses_prev_2 {
			length += plan.preceding_2.length as usize;
			plan.jump_patch_addr -= plan.preceding_2.length as usize;
		}
	}

	if plan.uses_next {
		// The instruction after the syscall is overwritten too, so the
		// wrapper must resume one instruction later.
		length += plan.following.length as usize;
		plan.return_addr = plan.syscall_addr + arch::SYSCALL_INS_SIZE + plan.following.length as usize;
	} else {
		plan.return_addr = plan.syscall_addr + arch::SYSCALL_INS_SIZE;
	}

	if length < arch::JUMP_INS_SIZE {
		return Err(PatchError::InsufficientPatchBytes {
			path: lib.path.clone(),
			offset: plan.syscall_offset,
			available: length,
			needed: arch::JUMP_INS_SIZE,
		});
	}

	Ok(())
}

/// Advance the shared padding cursor to the first region reachable from
/// `syscall_addr` by a short jump, claiming it if found.
///
/// Regions behind the cursor are never revisited: they are sorted by
/// address and sites are planned in address order, so a region too far
/// behind one site is too far behind every later site as well.
fn assign_padding_trampoline(
	lib: &LibraryDescriptor,
	syscall_addr: usize,
	next_padding: &mut usize,
) -> Option<PaddingRegion> {
	while let Some(region) = lib.padding_regions.get(*next_padding).copied() {
		if padding_in_range(syscall_addr, &region) {
			*next_padding += 1;
			return Some(region);
		}

		if region.address > syscall_addr {
			// Too far ahead; leave it for a later site
			return None;
		}

		// Too far behind, skip permanently
		*next_padding += 1;
	}

	None
}

/// Whether a short jump at the syscall site can reach the escape point
/// two bytes into the padding region.
fn padding_in_range(syscall_addr: usize, region: &PaddingRegion) -> bool {
	arch::short_jump_reachable(syscall_addr, region.address + arch::SHORT_JUMP_INS_SIZE)
}

/// An instruction before the syscall can move into the wrapper only if
/// relocating it cannot change behavior or corrupt other control flow.
fn is_relocatable_before_syscall(ins: &InstructionInfo) -> bool {
	ins.is_set
		&& !(ins.has_ip_relative_operand
			|| ins.is_call
			|| ins.is_rel_jump
			|| ins.is_jump
			|| ins.is_ret
			|| ins.is_syscall)
}

/// Same as before the syscall, except a trailing `ret` is fine to move:
/// nothing falls through past it.
fn is_relocatable_after_syscall(ins: &InstructionInfo) -> bool {
	ins.is_set
		&& !(ins.has_ip_relative_operand || ins.is_call || ins.is_rel_jump || ins.is_jump || ins.is_syscall)
}

fn check_surrounding_instructions(lib: &LibraryDescriptor, plan: &mut PatchPlan) {
	plan.uses_prev = is_relocatable_before_syscall(&plan.preceding)
		&& !plan.preceding.is_padding
		&& !lib.has_jump_target(plan.syscall_addr);

	plan.uses_prev_2 = plan.uses_prev
		&& is_relocatable_before_syscall(&plan.preceding_2)
		&& !plan.preceding_2.is_padding
		&& !lib.has_jump_target(plan.syscall_addr - plan.preceding.length as usize);

	plan.uses_next = is_relocatable_after_syscall(&plan.following)
		&& !plan.following.is_padding
		&& !lib.has_jump_target(plan.syscall_addr + arch::SYSCALL_INS_SIZE);
}
