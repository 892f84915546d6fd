//! Utility modules for syspatch
//!
//! This module contains logging setup and the page arithmetic shared by
//! the arena and the activator.

pub mod logging;
pub mod memory;

pub use logging::init_logging;
pub use memory::{page_align, page_size};
