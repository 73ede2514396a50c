pub mod cli;
pub mod common;

pub use cli::{build_cli_command, BatchTask, Cli, Commands, ConfigCommands, RunsCommands};
pub use common::OutputFormat;
