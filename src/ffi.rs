//! Raw syscall shims
//!
//! Protection changes on the patched library must not themselves travel
//! through patched code, so the activator issues `mprotect` with a bare
//! `syscall` instruction instead of going through libc (whose own
//! `mprotect` stub may already be rewritten).

use libc::c_long;
use nix::errno::Errno;
use std::arch::asm;

/// Performs a direct system call with six arguments.
///
/// # Safety
///
/// The caller must ensure the system call number is valid, the arguments
/// are appropriate for it, and all pointer arguments reference valid
/// memory.
#[inline(always)]
#[must_use]
pub unsafe fn syscall6(
	num: c_long,
	arg1: c_long,
	arg2: c_long,
	arg3: c_long,
	arg4: c_long,
	arg5: c_long,
	arg6: c_long,
) -> c_long {
	let mut ret: c_long;
	unsafe {
		asm!(
			"syscall",
			inlateout("rax") num => ret,
			in("rdi") arg1,
			in("rsi") arg2,
			in("rdx") arg3,
			in("r10") arg4,
			in("r8") arg5,
			in("r9") arg6,
			lateout("rcx") _,
			lateout("r11") _,
			options(nostack)
		);
	}
	ret
}

/// Change the protection of `[addr, addr + len)` without going through libc.
///
/// # Safety
///
/// The range must be mapped and page-aligned, and the caller is
/// responsible for the consequences of making executable code writable.
pub unsafe fn mprotect_raw(addr: usize, len: usize, prot: i32) -> Result<(), Errno> {
	let ret = unsafe {
		syscall6(
			libc::SYS_mprotect,
			addr as c_long,
			len as c_long,
			c_long::from(prot),
			0,
			0,
			0,
		)
	};

	if ret == 0 { Ok(()) } else { Err(Errno::from_raw(-ret as i32)) }
}
