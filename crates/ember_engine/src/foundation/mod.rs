//! Foundation module - core utilities shared by every subsystem
//!
//! - Math types and projection helpers
//! - Offset free-list used to sub-allocate GPU buffers
//! - Logging setup

pub mod freelist;
pub mod logging;
pub mod math;
