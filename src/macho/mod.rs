//! Mach-O parsing: constants, on-disk structures, and slice views.

pub mod constants;
pub mod structs;
pub mod view;

pub use constants::*;
pub use structs::*;
pub use view::{classify, CommandRef, LoadCommands, Magic, SliceHeader, SliceView};
