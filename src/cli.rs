//! Command-line interface.

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "quizgate", version, about = "Exam answer gateway over a pool of OpenAI-compatible proxies")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP server (default when no subcommand is given)
    Run(RunArgs),
    /// Validate the config file and print the proxy pool
    Check,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Path to config file
    #[arg(short, long, default_value = "config.yaml", env = "QUIZGATE_CONFIG", global = true)]
    pub config: String,

    /// Log level
    #[arg(long, default_value = "info", env = "QUIZGATE_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Listen host
    #[arg(long, env = "QUIZGATE_HOST")]
    pub host: Option<String>,

    /// Listen port
    #[arg(long, env = "QUIZGATE_PORT")]
    pub port: Option<u16>,
}
