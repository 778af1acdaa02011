//! Atomic script definitions
//!
//! - `OpId` / `ScriptMeta` / `ScriptRegistry`: the static operation table
//! - `definitions`: Lua sources for the built-in compare primitives

pub mod definitions;
mod registry;

pub use registry::{OpId, ScriptMeta, ScriptRegistry};
