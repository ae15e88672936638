//! Task manager -- admits requests, resolves modules and drives the result cache.
//!
//! Split into focused submodules:
//! - `core`: TaskManager struct, constructors and accessors
//! - `execution`: request admission and background module execution

mod core;
mod execution;

pub use self::core::TaskManager;
