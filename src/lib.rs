//! Daily keystroke counter that stays consistent across devices. Every device publishes its own
//! per-day counts into one shared file, which some folder sync tool copies around. Concurrent
//! writers never lose each other's counts because every cell of the file only grows and copies
//! are reconciled by merging.
//!

pub mod cli;
pub mod config;
pub mod daemon;
pub mod fs;
pub mod sync;
pub mod utils;
