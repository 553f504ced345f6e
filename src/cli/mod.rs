mod command;
mod runner;

pub use command::{Cli, Command};
pub use runner::{run, run_with_format, OutputMode};
