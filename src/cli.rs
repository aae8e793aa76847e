use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "evtx-ctl")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Serve and consume ordered event streams over five transports")]
#[command(long_about = "Runs the event-transport HTTP server (single-shot, short polling, long polling, SSE and WebSocket delivery with negotiated fallback), listens to a stream as a client, and maintains the durable polling queues.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Address to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long, env = "EVTX_PORT")]
        port: Option<u16>,

        /// Preferred transport mode for producer requests
        #[arg(short, long, env = "EVTX_MODE")]
        mode: Option<String>,
    },

    /// Run a streaming service through a client channel and print each message as a JSON line
    Listen {
        /// Base URL of the event endpoints
        #[arg(long, default_value = "http://127.0.0.1:8787/event")]
        url: String,

        /// Preferred transport mode
        #[arg(short, long, env = "EVTX_MODE")]
        mode: Option<String>,

        /// Modes to try after the preferred one
        #[arg(long, value_delimiter = ',')]
        fallback: Option<Vec<String>>,

        /// WebSocket URL; `ws` is unavailable without it
        #[arg(long)]
        ws_url: Option<String>,

        /// Service name
        #[arg(short, long, default_value = "echo")]
        service: String,

        /// Stream id; random when omitted
        #[arg(long)]
        stream: Option<String>,

        /// Prompt passed to the service
        #[arg(long, default_value = "hello from evtx")]
        prompt: String,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Maintain the durable polling queues
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,
}

#[derive(Subcommand)]
pub enum QueueCommand {
    /// Pop the next event from a queue and print it
    Pop {
        /// Queue key, e.g. `evq_echo_s1`
        key: String,
    },

    /// Remove queue records not modified recently
    Purge {
        /// Maximum record age in seconds; defaults to `queue.max_age_secs`
        #[arg(long)]
        max_age_secs: Option<u64>,
    },
}

impl Cli {
    /// Initialize logging based on verbosity level
    pub fn init_logging(&self) {
        if self.quiet {
            return;
        }

        let level = match self.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };

        env_logger::Builder::from_default_env()
            .filter_level(level)
            .init();
    }
}
