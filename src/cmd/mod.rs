//! CLI subcommands: `fledge static`, `fledge script`, `fledge binary`.

pub mod binary;
pub mod script;
pub mod static_cmd;
