//! CLI subcommands

pub mod detect;
pub mod status;
pub mod table;
pub mod watch;
