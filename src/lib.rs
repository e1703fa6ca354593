// src/lib.rs — Library root for plugscript

pub mod cli;
pub mod host;
pub mod infra;
pub mod plugins;
pub mod scripting;
