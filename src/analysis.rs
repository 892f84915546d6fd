//! Input contract of the disassembly collaborator
//!
//! The decoder that classifies instructions and discovers inter-function
//! padding lives outside this crate. These types are the shape of its
//! output: the planner consumes them read-only and never re-derives any
//! of the classification itself.

/// Classification record for one decoded instruction.
///
/// `is_set` distinguishes a real record from a placeholder: sites near
/// the start or end of the text segment may not have a decodable
/// neighbor, and an unset record is never eligible for relocation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InstructionInfo {
	/// Whether this record describes a successfully decoded instruction
	pub is_set: bool,
	/// Instruction length in bytes
	pub length: u8,
	/// The instruction has an RIP-relative operand and cannot be moved
	pub has_ip_relative_operand: bool,
	/// The instruction is a call
	pub is_call: bool,
	/// The instruction is a relative jump
	pub is_rel_jump: bool,
	/// The instruction is an indirect or unconditional jump
	pub is_jump: bool,
	/// The instruction is a return
	pub is_ret: bool,
	/// The instruction is a syscall
	pub is_syscall: bool,
	/// The decoder already classified this instruction as overwritable
	/// padding; it belongs to a `PaddingRegion`, not to live control flow
	pub is_padding: bool,
}

impl InstructionInfo {
	/// A placeholder for a neighbor the decoder could not produce
	pub const UNSET: Self = Self {
		is_set: false,
		length: 0,
		has_ip_relative_operand: false,
		is_call: false,
		is_rel_jump: false,
		is_jump: false,
		is_ret: false,
		is_syscall: false,
		is_padding: false,
	};

	/// A plain relocatable instruction of the given length.
	///
	/// Convenience for analysis producers and tests; all hazard flags are
	/// clear.
	#[must_use]
	pub const fn plain(length: u8) -> Self {
		Self {
			is_set: true,
			length,
			has_ip_relative_operand: false,
			is_call: false,
			is_rel_jump: false,
			is_jump: false,
			is_ret: false,
			is_syscall: false,
			is_padding: false,
		}
	}
}

/// An unused byte range between functions, usable as trampoline space.
///
/// Regions arrive sorted by address and are claimed left-to-right; a
/// claimed region is never offered to a second syscall site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaddingRegion {
	/// Address of the first padding byte
	pub address: usize,
	/// Size of the region in bytes
	pub size: usize,
}

impl PaddingRegion {
	/// Address of the first instruction after the padding
	#[must_use]
	pub const fn end(&self) -> usize {
		self.address + self.size
	}
}
