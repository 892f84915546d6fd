//! syspatch - a load-time syscall hotpatching engine
//!
//! This crate is the patch planning and patch application engine beneath
//! a transparent syscall-interception layer. Given the output of a
//! disassembly pass over one loaded library (syscall sites, neighbor
//! instruction classifications, and usable inter-function padding), it
//! decides how to carve an escape jump out of the live code at each
//! site, generates a wrapper for each site in a reserved arena, and
//! commits all jumps into the library's text under controlled memory
//! protection transitions.
//!
//! The instruction decoder, text-segment discovery, and the hook
//! dispatch runtime live outside this crate; they meet it at the types
//! in [`analysis`] and the hook entry address handed to [`PatchEngine`].
//!
//! # Getting Started
//!
//! ```no_run
//! use syspatch::{DispatchTemplate, LibraryDescriptor, PatchEngine, TemplateSet};
//!
//! # fn dispatch_template_bytes() -> Vec<u8> { vec![0; 64] }
//! # fn hook_dispatch_entry() -> usize { 0 }
//! fn main() -> Result<(), syspatch::PatchError> {
//!     let templates = TemplateSet {
//!         base: DispatchTemplate::new(dispatch_template_bytes(), 8, 24)?,
//!         vector_save: None,
//!     };
//!     let mut engine = PatchEngine::new(templates, hook_dispatch_entry())?;
//!
//!     // Populated by the disassembly pass
//!     let mut lib = LibraryDescriptor::new("/usr/lib/libc.so.6", 0x7f00_0000_0000, 0x7f00_0020_0000);
//!
//!     engine.plan_library(&mut lib)?;
//!     unsafe {
//!         engine.generate_wrappers_live(&mut lib)?;
//!         engine.activate(&mut lib)?;
//!     }
//!     engine.seal()?;
//!
//!     // `lib` must now stay resident: the generated wrappers point into it
//!     Box::leak(Box::new(lib));
//!     Ok(())
//! }
//! ```

pub mod activator;
pub mod analysis;
pub mod arch;
pub mod arena;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod planner;
pub mod util;
pub mod view;
pub mod wrapper;

pub use analysis::{InstructionInfo, PaddingRegion};
pub use arena::{TrampolineArena, TrampolineTable};
pub use descriptor::{LibraryDescriptor, PatchPlan};
pub use engine::{Capabilities, PatchEngine, TemplateSet};
pub use error::{PatchError, Result};
pub use view::CodeView;
pub use wrapper::DispatchTemplate;
