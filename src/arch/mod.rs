//! Per-architecture instruction encodings
//!
//! The planner and activator never embed opcode bytes or displacement
//! limits inline; everything they need about jumps and traps comes from
//! this module: the shortest jump form, the full-range jump form, the
//! indirect far jump used by trampoline-table entries, and the trap byte
//! used to fill freed bytes.

mod x86_64;

pub use x86_64::{
	INDIRECT_JUMP_SIZE, JUMP_INS_SIZE, SHORT_JMP_OPCODE, SHORT_JUMP_INS_SIZE, SYSCALL_INS_SIZE, TRAP_OPCODE,
	encode_indirect_jump, encode_near_jump, encode_short_jump, near_jump_reachable, short_jump_reachable,
};
