use clap::Parser;
use std::path::PathBuf;

/// `server [-c CONFIG] [-p PORT] [-v] [PATH]`.
#[derive(Parser, Debug)]
#[command(name = "httpd", about = "A small standalone HTTP/1.1 file server")]
pub struct CliArgs {
    /// Config file path. Defaults to ./server.conf if present; an
    /// explicitly named path that is missing or invalid is fatal.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Overrides the PORT configuration key.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Redirects logging to stdout instead of the configured LOG_FILE.
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Overrides the document root.
    pub path: Option<PathBuf>,
}
