//! Command-line interface.

pub mod commands;
pub mod parser;

pub use commands::execute;
pub use parser::{Cli, Commands};
