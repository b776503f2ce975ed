//! Binary entry point for steward-rs.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use clap::Parser;
use std::io::{self, Write};
use std::process::ExitCode;
use steward_rs::cli::{Cli, execute};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match execute(&cli).await {
        Ok(output) => {
            if !output.is_empty() {
                // Handle broken pipe gracefully (e.g., when piped to `head` or `jq`)
                if let Err(e) = write!(io::stdout(), "{output}")
                    && e.kind() != io::ErrorKind::BrokenPipe
                {
                    eprintln!("Error writing to stdout: {e}");
                    return ExitCode::FAILURE;
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            let report = anyhow::Error::from(e);
            if cli.format == "json" {
                println!("{{\"error\": {:?}}}", format!("{report:#}"));
            } else {
                eprintln!("Error: {report:#}");
            }
            ExitCode::FAILURE
        }
    }
}
