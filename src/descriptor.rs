//! Per-library patch state
//!
//! A `LibraryDescriptor` collects everything the engine knows about one
//! loaded library: its text bounds, the syscall sites found by the
//! analysis pass, the padding regions available for trampolines, and the
//! optional trampoline table for out-of-range wrappers. It is created
//! once per library load and stays resident for the life of the process,
//! because generated wrappers embed pointers into its patch plans.

use std::collections::BTreeSet;

use crate::analysis::{InstructionInfo, PaddingRegion};
use crate::arena::TrampolineTable;

/// The decided strategy and computed addresses for one syscall site.
///
/// Filled in three stages: the analysis pass seeds the addresses and
/// neighbor classifications, the planner decides the strategy fields,
/// and the wrapper generator records `wrapper_addr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchPlan {
	/// Address of the syscall instruction in the loaded library
	pub syscall_addr: usize,
	/// Offset of the syscall instruction within the library file (diagnostic)
	pub syscall_offset: usize,
	/// The instruction immediately before the syscall
	pub preceding: InstructionInfo,
	/// The instruction before `preceding`
	pub preceding_2: InstructionInfo,
	/// The instruction immediately after the syscall
	pub following: InstructionInfo,
	/// Whether `preceding` is relocated into the wrapper
	pub uses_prev: bool,
	/// Whether `preceding_2` is relocated into the wrapper
	pub uses_prev_2: bool,
	/// Whether `following` is relocated into the wrapper
	pub uses_next: bool,
	/// The padding region claimed by this site, if the padding strategy won
	pub padding: Option<PaddingRegion>,
	/// Address the escape jump will be written at
	pub jump_patch_addr: usize,
	/// Address execution resumes at after the wrapper runs
	pub return_addr: usize,
	/// Address of the generated wrapper, once it exists
	pub wrapper_addr: Option<usize>,
}

impl PatchPlan {
	/// Create a plan seeded with the analysis pass's output for one site.
	#[must_use]
	pub const fn new(
		syscall_addr: usize,
		syscall_offset: usize,
		preceding: InstructionInfo,
		preceding_2: InstructionInfo,
		following: InstructionInfo,
	) -> Self {
		Self {
			syscall_addr,
			syscall_offset,
			preceding,
			preceding_2,
			following,
			uses_prev: false,
			uses_prev_2: false,
			uses_next: false,
			padding: None,
			jump_patch_addr: 0,
			return_addr: 0,
			wrapper_addr: None,
		}
	}

	/// Total length of the preceding instructions selected for relocation
	#[must_use]
	pub fn relocated_prefix_len(&self) -> usize {
		let mut len = 0;
		if self.uses_prev {
			len += self.preceding.length as usize;
			if self.uses_prev_2 {
				len += self.preceding_2.length as usize;
			}
		}
		len
	}
}

/// One loaded target library and its accumulated patch state.
#[derive(Debug)]
pub struct LibraryDescriptor {
	/// Path of the library, used only in diagnostics
	pub path: String,
	/// Start of the loaded text segment
	pub text_start: usize,
	/// End of the loaded text segment (exclusive)
	pub text_end: usize,
	/// Patch plans, in the order syscall sites were discovered
	pub plans: Vec<PatchPlan>,
	/// Padding regions, sorted by address
	pub padding_regions: Vec<PaddingRegion>,
	/// Trampoline table for wrappers beyond direct jump range
	pub trampoline_table: Option<TrampolineTable>,
	/// Addresses known to be jump destinations somewhere in the library
	jump_targets: BTreeSet<usize>,
}

impl LibraryDescriptor {
	/// Create a descriptor for a library whose text segment spans
	/// `[text_start, text_end)`.
	#[must_use]
	pub fn new(path: impl Into<String>, text_start: usize, text_end: usize) -> Self {
		Self {
			path: path.into(),
			text_start,
			text_end,
			plans: Vec::new(),
			padding_regions: Vec::new(),
			trampoline_table: None,
			jump_targets: BTreeSet::new(),
		}
	}

	/// Append a syscall site in discovery order.
	pub fn push_plan(&mut self, plan: PatchPlan) {
		self.plans.push(plan);
	}

	/// Install the sorted padding-region list produced by the analysis pass.
	pub fn set_padding_regions(&mut self, mut regions: Vec<PaddingRegion>) {
		regions.sort_by_key(|r| r.address);
		self.padding_regions = regions;
	}

	/// Attach a trampoline table reserved near this library.
	pub fn attach_trampoline_table(&mut self, table: TrampolineTable) {
		self.trampoline_table = Some(table);
	}

	/// Record `address` as the destination of some jump in the library.
	///
	/// The analysis pass calls this for every branch destination it
	/// decodes; the planner calls it for every computed return address,
	/// so later sites never relocate an instruction another wrapper
	/// jumps back to.
	pub fn mark_jump_target(&mut self, address: usize) {
		self.jump_targets.insert(address);
	}

	/// Whether `address` is a known jump destination.
	#[must_use]
	pub fn has_jump_target(&self, address: usize) -> bool {
		self.jump_targets.contains(&address)
	}

	/// Whether `address` lies inside the text segment.
	#[must_use]
	pub const fn contains(&self, address: usize) -> bool {
		address >= self.text_start && address < self.text_end
	}
}
