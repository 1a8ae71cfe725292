//! Weft CLI library.
//!
//! Shared pieces of the `weft` binary: configuration loading, the builtin
//! helper set, and the render/rehydrate/inspect commands.

pub mod builtins;
pub mod colors;
pub mod commands;
pub mod config;
