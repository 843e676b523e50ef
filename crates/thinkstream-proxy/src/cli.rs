//! Command-line interface

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "thinkstream-proxy")]
#[command(about = "Streaming proxy that enables extended thinking and hides it from clients", long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "thinkstream.yaml", env = "THINKSTREAM_CONFIG")]
    pub config: String,

    /// Address to listen on
    #[arg(short, long, env = "THINKSTREAM_LISTEN")]
    pub listen: Option<String>,

    /// Upstream API base URL
    #[arg(short, long, env = "THINKSTREAM_TARGET")]
    pub target: Option<String>,

    /// Token budget for thinking
    #[arg(short, long, env = "THINKSTREAM_BUDGET")]
    pub budget: Option<u32>,

    /// Whether to log thinking content
    #[arg(long = "log", env = "THINKSTREAM_LOG_THINKING")]
    pub log_thinking: Option<bool>,

    /// Model identifier marker that enables thinking
    #[arg(long, env = "THINKSTREAM_MARKER")]
    pub marker: Option<String>,

    /// Upper bound on one upstream exchange, in seconds
    #[arg(long, env = "THINKSTREAM_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// Address for the Prometheus exporter
    #[arg(long, env = "THINKSTREAM_METRICS_LISTEN")]
    pub metrics_listen: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}
