//! `x86_64` jump and trap encodings
//!
//! All displacement arithmetic is done on virtual addresses (`usize`), so
//! the same functions serve both live code and test buffers viewed through
//! a `CodeView` with a synthetic base address.

use crate::error::{PatchError, Result};

/// Size of the `syscall` instruction (0x0F 0x05)
pub const SYSCALL_INS_SIZE: usize = 2;

/// Size of the shortest relative jump, `jmp rel8`
pub const SHORT_JUMP_INS_SIZE: usize = 2;

/// Size of the full-range relative jump, `jmp rel32`
pub const JUMP_INS_SIZE: usize = 5;

/// Size of an indirect far jump: `jmp *0(%rip)` plus the 8-byte pointer
/// stored right after the instruction
pub const INDIRECT_JUMP_SIZE: usize = 6 + 8;

/// Opcode of `jmp rel8`
pub const SHORT_JMP_OPCODE: u8 = 0xEB;

/// Opcode of `jmp rel32`
pub const JMP_OPCODE: u8 = 0xE9;

/// The `int3` trap byte used to fill freed bytes after an escape jump
pub const TRAP_OPCODE: u8 = 0xCC;

fn displacement(from_end: usize, to: usize) -> isize {
	(to as isize).wrapping_sub(from_end as isize)
}

/// Check whether `to` is reachable by a `jmp rel8` written at `from`.
#[must_use]
pub fn short_jump_reachable(from: usize, to: usize) -> bool {
	let d = displacement(from + SHORT_JUMP_INS_SIZE, to);
	d >= i8::MIN as isize && d <= i8::MAX as isize
}

/// Check whether `to` is reachable by a `jmp rel32` written at `from`.
#[must_use]
pub fn near_jump_reachable(from: usize, to: usize) -> bool {
	let d = displacement(from + JUMP_INS_SIZE, to);
	d >= i32::MIN as isize && d <= i32::MAX as isize
}

/// Encode a 2-byte `jmp rel8` written at `from`, targeting `to`.
///
/// The displacement is relative to the instruction pointer after the
/// jump, i.e. `from + 2`.
pub fn encode_short_jump(from: usize, to: usize) -> Result<[u8; SHORT_JUMP_INS_SIZE]> {
	let d = displacement(from + SHORT_JUMP_INS_SIZE, to);
	let d = i8::try_from(d).map_err(|_| PatchError::DistanceViolation {
		from,
		to,
		encoding: "jmp rel8",
	})?;

	Ok([SHORT_JMP_OPCODE, d as u8])
}

/// Encode a 5-byte `jmp rel32` written at `from`, targeting `to`.
pub fn encode_near_jump(from: usize, to: usize) -> Result<[u8; JUMP_INS_SIZE]> {
	let d = displacement(from + JUMP_INS_SIZE, to);
	let d = i32::try_from(d).map_err(|_| PatchError::DistanceViolation {
		from,
		to,
		encoding: "jmp rel32",
	})?;

	let mut bytes = [0u8; JUMP_INS_SIZE];
	bytes[0] = JMP_OPCODE;
	bytes[1..].copy_from_slice(&d.to_le_bytes());
	Ok(bytes)
}

/// Encode an indirect far jump to `to`.
///
/// `jmp *0(%rip)` reads its destination from the 8 bytes immediately
/// following the instruction, so this form reaches any address and needs
/// no knowledge of where it will be written.
#[must_use]
pub fn encode_indirect_jump(to: usize) -> [u8; INDIRECT_JUMP_SIZE] {
	let mut bytes = [0u8; INDIRECT_JUMP_SIZE];
	bytes[0] = 0xFF;
	bytes[1] = 0x25;
	// 32-bit zero RIP offset: the pointer sits right after the instruction
	bytes[6..].copy_from_slice(&(to as u64).to_le_bytes());
	bytes
}
