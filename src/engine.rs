//! Engine driver
//!
//! `PatchEngine` owns the process-wide pieces of the patching pipeline:
//! the trampoline arena, the selected dispatch template, the hook entry
//! point, and the one-time CPU capability probe. It threads these
//! explicitly into the planner, generator, and activator, so none of
//! the passes reach for ambient global state.

use once_cell::sync::OnceCell;

use crate::activator;
use crate::arena::{DEFAULT_ARENA_CAPACITY, TrampolineArena};
use crate::descriptor::LibraryDescriptor;
use crate::error::Result;
use crate::planner;
use crate::view::CodeView;
use crate::wrapper::{self, DispatchTemplate};

static CAPABILITIES: OnceCell<Capabilities> = OnceCell::new();

/// Per-process CPU capabilities affecting wrapper generation.
///
/// Probed once; generated wrappers must preserve the extended vector
/// state only when the CPU actually has it.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
	/// Whether wrappers must save and restore the YMM registers
	pub save_vector_regs: bool,
}

impl Capabilities {
	/// The cached result of the one-time feature probe.
	pub fn probe() -> Self {
		*CAPABILITIES.get_or_init(Self::detect)
	}

	fn detect() -> Self {
		#[cfg(target_arch = "x86_64")]
		let save_vector_regs = std::arch::is_x86_feature_detected!("avx");
		#[cfg(not(target_arch = "x86_64"))]
		let save_vector_regs = false;

		Self { save_vector_regs }
	}
}

/// The two dispatch template variants the external assembler provides.
#[derive(Debug, Clone)]
pub struct TemplateSet {
	/// Template that clobbers no extended vector state
	pub base: DispatchTemplate,
	/// Template that saves and restores the YMM registers, for CPUs
	/// where the hook may observe live vector state
	pub vector_save: Option<DispatchTemplate>,
}

impl TemplateSet {
	fn select(self, capabilities: Capabilities) -> DispatchTemplate {
		if capabilities.save_vector_regs {
			self.vector_save.unwrap_or(self.base)
		} else {
			self.base
		}
	}
}

/// The patching pipeline for one process.
///
/// Typical use, once per target library and strictly before any other
/// thread can reach a patched site:
///
/// 1. [`plan_library`](Self::plan_library)
/// 2. [`generate_wrappers`](Self::generate_wrappers)
/// 3. [`activate`](Self::activate)
///
/// and, after every library has been through steps 1-3,
/// [`seal`](Self::seal) exactly once.
#[derive(Debug)]
pub struct PatchEngine {
	arena: TrampolineArena,
	template: DispatchTemplate,
	hook_entry: usize,
	capabilities: Capabilities,
}

impl PatchEngine {
	/// Create an engine with the default arena capacity.
	///
	/// `hook_entry` is the address of the hook-dispatch entry point every
	/// generated wrapper calls into.
	pub fn new(templates: TemplateSet, hook_entry: usize) -> Result<Self> {
		Self::with_arena_capacity(templates, hook_entry, DEFAULT_ARENA_CAPACITY)
	}

	/// Create an engine with an explicit arena capacity.
	pub fn with_arena_capacity(templates: TemplateSet, hook_entry: usize, capacity: usize) -> Result<Self> {
		crate::util::init_logging();

		let capabilities = Capabilities::probe();
		tracing::info!(
			save_vector_regs = capabilities.save_vector_regs,
			arena_capacity = capacity,
			"initializing patch engine"
		);

		Ok(Self {
			arena: TrampolineArena::reserve(capacity)?,
			template: templates.select(capabilities),
			hook_entry,
			capabilities,
		})
	}

	/// The capability flags this engine was initialized with
	#[must_use]
	pub const fn capabilities(&self) -> Capabilities {
		self.capabilities
	}

	/// The arena holding generated wrappers
	#[must_use]
	pub const fn arena(&self) -> &TrampolineArena {
		&self.arena
	}

	/// Decide a patching strategy for every syscall site in `lib`.
	pub fn plan_library(&self, lib: &mut LibraryDescriptor) -> Result<()> {
		planner::plan_patches(lib)
	}

	/// Generate a wrapper into the arena for every planned site.
	///
	/// `text` must cover the library's text segment so relocated
	/// instruction bytes can be copied out of it.
	pub fn generate_wrappers(&mut self, lib: &mut LibraryDescriptor, text: &CodeView<'_>) -> Result<()> {
		for i in 0..lib.plans.len() {
			wrapper::generate_wrapper(&mut self.arena, text, &mut lib.plans[i], &self.template, self.hook_entry)?;
		}
		tracing::info!(path = %lib.path, wrappers = lib.plans.len(), "wrapper generation complete");
		Ok(())
	}

	/// Generate wrappers reading relocated bytes from the live mapping.
	///
	/// # Safety
	///
	/// The library's recorded text bounds must describe a currently
	/// mapped, readable code segment.
	pub unsafe fn generate_wrappers_live(&mut self, lib: &mut LibraryDescriptor) -> Result<()> {
		let text = unsafe { CodeView::map_live(lib.text_start, lib.text_end - lib.text_start) };
		self.generate_wrappers(lib, &text)
	}

	/// Commit all escape jumps for `lib` into its live text segment.
	///
	/// # Safety
	///
	/// Same contract as [`activator::activate`]: the text must be mapped,
	/// no thread may be executing in it, and all wrappers must exist.
	pub unsafe fn activate(&self, lib: &mut LibraryDescriptor) -> Result<()> {
		unsafe { activator::activate(lib) }
	}

	/// Make the arena executable, exactly once, after all libraries'
	/// wrappers have been generated.
	pub fn seal(&mut self) -> Result<()> {
		self.arena.seal()
	}
}
