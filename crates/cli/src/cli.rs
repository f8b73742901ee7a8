use crate::tracing::{LogLevel, TracingFormat};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "netkit")]
#[command(about = "Issue HTTP requests through the netkit request agent and response cache")]
#[command(version)]
pub struct Cli {
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Set logging level",
        default_value = "warn",
        value_enum
    )]
    pub log_level: LogLevel,

    #[arg(
        long = "log-format",
        global = true,
        help = "Log output format",
        default_value = "compact",
        value_enum
    )]
    pub log_format: TracingFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Fetch a URL and print the response body")]
    Fetch(FetchArgs),
}

#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    #[arg(help = "Absolute URL to request")]
    pub url: String,

    #[arg(long, short = 'X', default_value = "GET", help = "HTTP method")]
    pub method: String,

    #[arg(
        long = "header",
        short = 'H',
        value_name = "NAME:VALUE",
        help = "Extra header field (repeatable)"
    )]
    pub headers: Vec<String>,

    #[arg(long, value_name = "JSON", help = "Request argument as a JSON object")]
    pub data: Option<String>,

    #[arg(long = "json-body", help = "Send the argument as a JSON body instead of a form")]
    pub json_body: bool,

    #[arg(long, default_value_t = 60, value_name = "SECONDS", help = "Request timeout")]
    pub timeout: u64,

    #[arg(long, help = "Decode, validate and pretty-print a JSON response")]
    pub json: bool,

    #[arg(long, short = 'i', help = "Print the status line and headers before the body")]
    pub include: bool,

    #[arg(
        long = "cache-time",
        default_value_t = 0,
        value_name = "SECONDS",
        help = "Maximum age of a usable cached response; 0 disables the cache"
    )]
    pub cache_time: i64,

    #[arg(long = "cache-version", default_value_t = 0, help = "Cache version stamp")]
    pub cache_version: i64,

    #[arg(long, value_name = "TEXT", help = "Context that invalidates cached responses when changed")]
    pub sensitive: Option<String>,

    #[arg(long = "ignore-cache", help = "Skip cached responses but still refresh the cache")]
    pub ignore_cache: bool,

    #[arg(long = "cache-dir", env = "NETKIT_CACHE_DIR", help = "Response cache directory")]
    pub cache_dir: Option<PathBuf>,

    #[arg(long = "app-version", help = "Application version stamped into cache entries")]
    pub app_version: Option<String>,
}
