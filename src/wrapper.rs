//! Wrapper generation
//!
//! For each planned site the generator materializes a wrapper into the
//! trampoline arena: any relocated preceding instructions, then a copy
//! of the dispatch template with its two embedded addresses patched
//! (the owning patch plan and the hook-dispatch entry point), then the
//! relocated following instruction, then a jump back to the plan's
//! return address.
//!
//! The template's internals belong to the external assembler module;
//! this code treats it as an opaque byte string with two 8-byte slots.

use crate::arch;
use crate::arena::TrampolineArena;
use crate::descriptor::PatchPlan;
use crate::error::{PatchError, Result};
use crate::view::CodeView;

/// The architecture-specific dispatch code copied into every wrapper.
///
/// Supplied by the external assembler collaborator; validated once so
/// generation can patch the slots without further checks.
#[derive(Debug, Clone)]
pub struct DispatchTemplate {
	bytes: Vec<u8>,
	plan_slot: usize,
	dispatch_slot: usize,
}

impl DispatchTemplate {
	/// Wrap raw template bytes.
	///
	/// `plan_slot` and `dispatch_slot` are byte offsets of the two 8-byte
	/// address slots inside `bytes`.
	pub fn new(bytes: Vec<u8>, plan_slot: usize, dispatch_slot: usize) -> Result<Self> {
		let fits = |slot: usize| slot.checked_add(8).is_some_and(|end| end <= bytes.len());
		if !fits(plan_slot) || !fits(dispatch_slot) {
			return Err(PatchError::BadTemplate("address slot outside template bytes"));
		}
		if plan_slot.abs_diff(dispatch_slot) < 8 {
			return Err(PatchError::BadTemplate("address slots overlap"));
		}

		Ok(Self {
			bytes,
			plan_slot,
			dispatch_slot,
		})
	}

	/// Template size in bytes
	#[must_use]
	pub fn len(&self) -> usize {
		self.bytes.len()
	}

	/// Whether the template is empty (never true for a validated template)
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.bytes.is_empty()
	}
}

/// Generate the wrapper for one plan, recording its address on the plan.
///
/// `text` must cover the bytes being relocated; `hook_entry` is the
/// address of the hook-dispatch entry point every wrapper calls into.
///
/// The plan's address is embedded into the generated code, so the plan
/// (and the descriptor holding it) must stay at a stable address for as
/// long as the wrapper can execute.
pub fn generate_wrapper(
	arena: &mut TrampolineArena,
	text: &CodeView<'_>,
	plan: &mut PatchPlan,
	template: &DispatchTemplate,
	hook_entry: usize,
) -> Result<()> {
	let prefix_len = plan.relocated_prefix_len();
	let suffix_len = if plan.uses_next { plan.following.length as usize } else { 0 };
	let body_len = prefix_len + template.len() + suffix_len;

	// The back jump form depends on where the wrapper will land, which
	// is known before allocating: the cursor only moves on success.
	let wrapper_addr = arena.next_addr();
	let tail_at = wrapper_addr + body_len;
	let mut tail = [0u8; arch::INDIRECT_JUMP_SIZE];
	let tail_len = if arch::near_jump_reachable(tail_at, plan.return_addr) {
		tail[..arch::JUMP_INS_SIZE].copy_from_slice(&arch::encode_near_jump(tail_at, plan.return_addr)?);
		arch::JUMP_INS_SIZE
	} else {
		tail = arch::encode_indirect_jump(plan.return_addr);
		arch::INDIRECT_JUMP_SIZE
	};

	let plan_addr = std::ptr::from_mut(plan) as u64;
	let (addr, buf) = arena.alloc(body_len + tail_len)?;

	let mut cursor = 0;
	if prefix_len > 0 {
		let src = text.read(plan.syscall_addr - prefix_len, prefix_len)?;
		buf[..prefix_len].copy_from_slice(src);
		cursor = prefix_len;
	}

	buf[cursor..cursor + template.len()].copy_from_slice(&template.bytes);
	buf[cursor + template.plan_slot..cursor + template.plan_slot + 8].copy_from_slice(&plan_addr.to_le_bytes());
	buf[cursor + template.dispatch_slot..cursor + template.dispatch_slot + 8]
		.copy_from_slice(&(hook_entry as u64).to_le_bytes());
	cursor += template.len();

	if suffix_len > 0 {
		let src = text.read(plan.syscall_addr + arch::SYSCALL_INS_SIZE, suffix_len)?;
		buf[cursor..cursor + suffix_len].copy_from_slice(src);
		cursor += suffix_len;
	}

	buf[cursor..cursor + tail_len].copy_from_slice(&tail[..tail_len]);

	plan.wrapper_addr = Some(addr);
	tracing::debug!(
		"generated wrapper for syscall at {:#x}: {} bytes at {addr:#x}",
		plan.syscall_addr,
		body_len + tail_len
	);

	Ok(())
}
