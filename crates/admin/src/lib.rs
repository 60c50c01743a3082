//! WebAdmin files tool library.
//!
//! This crate wires the files core to a TOML configuration and exposes the
//! commands used by the `webadmin-files` binary.

pub mod commands;
pub mod config;
