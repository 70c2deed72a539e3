//! Emulator modules.
//!
//! Modules provide the system core with specific functionality, such as disc access or
//! input, but do not perform any sort of emulation themselves.

pub mod audio;
pub mod card;
pub mod code;
pub mod disc;
pub mod input;
pub mod keys;
pub mod net;
