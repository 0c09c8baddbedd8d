use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cloudlock", version, about, long_about = None)]
pub struct Cli {
    /// JSON lock settings (lease duration, retry policy, renew margin)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Name of the blob used as the lock target
    #[arg(short, long, default_value = "counter")]
    pub blob: String,

    /// Simulated storage latency per request and per response, in milliseconds
    #[arg(long, default_value_t = 0)]
    pub latency_ms: u64,

    /// Verbose mode (-v, -vv, -vvv)
    #[arg(short, action = ArgAction::Count)]
    pub verbosity: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Runs concurrent workers that each increment a shared counter under the lock
    Increment {
        #[arg(short, long, default_value_t = 3)]
        workers: usize,
    },
    /// Acquires the lock and keeps it alive in the background for a while
    Hold {
        #[arg(short, long, default_value_t = 30)]
        seconds: u64,
    },
}
