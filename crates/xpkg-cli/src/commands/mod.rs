//! CLI commands

pub mod dep;
