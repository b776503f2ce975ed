//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Steward: workspace assistant core.
///
/// Answers questions over a workspace's documents and tasks, with
/// risky operations gated behind explicit confirmation.
#[derive(Parser, Debug)]
#[command(name = "steward-rs")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the steward database file.
    ///
    /// Defaults to `.steward/steward.db` in the current directory.
    #[arg(short, long, env = "STEWARD_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// LLM provider (naver, openai, cerebras, gemini).
    #[arg(long, env = "STEWARD_PROVIDER")]
    pub provider: Option<String>,

    /// Output format (text, json).
    #[arg(long, default_value = "text", global = true)]
    pub format: String,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize the steward database.
    #[command(after_help = r"Examples:
  steward-rs init                       # Initialize in current directory
  steward-rs --db-path ./my.db init     # Initialize with custom path
")]
    Init,

    /// Show storage statistics.
    Status,

    /// Store a text file as document chunks (split on blank lines).
    ///
    /// A convenience for local use; production ingestion runs through
    /// the external parsing pipeline.
    Ingest {
        /// Path to the text file.
        file: PathBuf,

        /// Workspace to store the chunks in.
        #[arg(short, long)]
        workspace: String,

        /// Display name stored in chunk metadata. Defaults to the file
        /// name.
        #[arg(long)]
        document_name: Option<String>,
    },

    /// Ask the assistant a question.
    #[command(after_help = r#"Examples:
  steward-rs query "What is agentic AI?" -w ws-1
  steward-rs query "Delete all completed tasks" -w ws-1        # gated by HITL
  steward-rs query "show the kanban board" -w ws-1 --no-hitl
"#)]
    Query {
        /// The question.
        query: String,

        /// Workspace to query.
        #[arg(short, long)]
        workspace: String,

        /// User identity for memory scoping.
        #[arg(short, long, default_value = "default-user")]
        user: String,

        /// Session identity for conversation memory.
        #[arg(short, long, default_value = "default-session")]
        session: String,

        /// Bypass the human-in-the-loop layer.
        #[arg(long)]
        no_hitl: bool,
    },

    /// List pending confirmation requests.
    Pending {
        /// Workspace to list.
        #[arg(short, long)]
        workspace: String,
    },

    /// Respond to a confirmation request.
    #[command(after_help = r"Examples:
  steward-rs respond req-123 --option archive_instead --execute
  steward-rs respond req-123 --reject --reason 'not now'
")]
    Respond {
        /// Request ID to respond to.
        request_id: String,

        /// Option to approve.
        #[arg(short, long, conflicts_with = "reject")]
        option: Option<String>,

        /// Reject the request instead of approving an option.
        #[arg(long)]
        reject: bool,

        /// Free-form reason.
        #[arg(long)]
        reason: Option<String>,

        /// Execute the approved option immediately.
        #[arg(short, long)]
        execute: bool,
    },

    /// Record feedback for an executed request.
    Feedback {
        /// Request the feedback refers to.
        request_id: String,

        /// Rating from 1 to 5.
        #[arg(short, long)]
        rating: u8,

        /// Sentiment (positive, neutral, negative).
        #[arg(long, default_value = "neutral")]
        sentiment: String,

        /// Free-form comment.
        #[arg(long)]
        comment: Option<String>,
    },

    /// Delete low-confidence facts from long-term memory.
    SweepFacts {
        /// Workspace to sweep.
        #[arg(short, long)]
        workspace: String,
    },

    /// Delete all turns of a conversation session.
    ClearSession {
        /// Session to clear.
        session: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_structure_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_query_command() {
        let cli = Cli::parse_from([
            "steward-rs",
            "query",
            "what is due this week?",
            "-w",
            "ws-1",
        ]);
        match cli.command {
            Commands::Query {
                query,
                workspace,
                no_hitl,
                ..
            } => {
                assert_eq!(query, "what is due this week?");
                assert_eq!(workspace, "ws-1");
                assert!(!no_hitl);
            }
            _ => unreachable!("expected query command"),
        }
    }

    #[test]
    fn test_parse_respond_command() {
        let cli = Cli::parse_from([
            "steward-rs",
            "respond",
            "req-1",
            "--option",
            "archive_instead",
            "--execute",
        ]);
        match cli.command {
            Commands::Respond {
                request_id,
                option,
                execute,
                reject,
                ..
            } => {
                assert_eq!(request_id, "req-1");
                assert_eq!(option.as_deref(), Some("archive_instead"));
                assert!(execute);
                assert!(!reject);
            }
            _ => unreachable!("expected respond command"),
        }
    }
}
