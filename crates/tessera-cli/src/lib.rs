//! `tessera` operator CLI
//!
//! Every subcommand runs as an administrator of the selected tenant, with
//! in-memory reference and size bookkeeping for the life of the process.

pub mod commands;
pub mod config;
