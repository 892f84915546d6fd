//! Error taxonomy for the patching engine
//!
//! Every failure in this crate is unrecoverable once a byte has landed in
//! live code, so the variants here exist to carry a useful diagnostic to
//! the operator, not to support retry logic. Components return typed
//! errors; the driver decides when an error must become a process abort.

use nix::errno::Errno;
use thiserror::Error;

/// Result type for patching operations
pub type Result<T> = std::result::Result<T, PatchError>;

/// Error type for patch planning, wrapper generation and activation
#[derive(Debug, Error)]
pub enum PatchError {
	/// A computed jump displacement does not fit the attempted encoding
	#[error("jump from {from:#x} to {to:#x} exceeds the range of the {encoding} encoding")]
	DistanceViolation {
		/// Address the jump would be written at
		from: usize,
		/// Address the jump must reach
		to: usize,
		/// Name of the jump form that was attempted
		encoding: &'static str,
	},

	/// The trampoline arena cannot satisfy the next wrapper allocation
	#[error("trampoline arena exhausted: {needed} bytes needed, {remaining} remaining")]
	ArenaExhausted { needed: usize, remaining: usize },

	/// The per-library trampoline table has no room for another entry
	#[error("trampoline table exhausted: {used} of {capacity} bytes used")]
	TableExhausted { used: usize, capacity: usize },

	/// The arena was sealed executable and can no longer be written
	#[error("trampoline arena is already sealed executable")]
	ArenaSealed,

	/// A wrapper is out of direct jump range and the library has no trampoline table
	#[error("wrapper at {to:#x} unreachable from {from:#x} and no trampoline table is attached")]
	TableUnavailable { from: usize, to: usize },

	/// Neither a padding region nor instruction relocation can free enough
	/// bytes for the escape jump at a syscall site
	#[error("unintercepted syscall at: {path} {offset:#x} ({available} overwritable bytes, {needed} needed)")]
	InsufficientPatchBytes {
		/// Path of the library being patched
		path: String,
		/// Offset of the syscall instruction within the library
		offset: usize,
		/// Bytes the planner managed to free
		available: usize,
		/// Bytes the full-range jump needs
		needed: usize,
	},

	/// An address fell outside the byte range it must be patched through
	#[error("address {address:#x} outside patched range [{start:#x}, {end:#x})")]
	OutOfBounds {
		address: usize,
		start: usize,
		end: usize,
	},

	/// Activation reached a plan whose wrapper was never generated
	#[error("patch plan for syscall at {syscall_addr:#x} has no generated wrapper")]
	MissingWrapper { syscall_addr: usize },

	/// A dispatch template's patch slots do not fit inside its bytes
	#[error("dispatch template is malformed: {0}")]
	BadTemplate(&'static str),

	/// A memory mapping or protection syscall failed
	#[error("memory protection operation failed: {0}")]
	Os(#[from] Errno),
}

impl PatchError {
	/// Log this error and abort the process.
	///
	/// Once any escape jump has been written into live code, the process
	/// cannot safely continue half-patched, and the patches cannot be
	/// backed out. Callers use this on every failure path past the first
	/// live write.
	pub fn abort(self) -> ! {
		tracing::error!("fatal patching failure: {self}");
		std::process::abort();
	}
}
