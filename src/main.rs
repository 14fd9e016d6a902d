use anyhow::Context;
use clap::Parser;
use std::sync::Arc;

use httpd::cli::CliArgs;
use httpd::config::ServerConfig;
use httpd::logger::Logger;
use httpd::mime::MimeTable;
use httpd::server;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    match run(args).await {
        Ok(()) => {}
        Err(RunError::Fatal(e)) => {
            eprintln!("httpd: {:#}", e);
            std::process::exit(113);
        }
        Err(RunError::MissingPlatformFacility(e)) => {
            eprintln!("httpd: {:#}", e);
            std::process::exit(127);
        }
    }
}

enum RunError {
    Fatal(anyhow::Error),
    MissingPlatformFacility(anyhow::Error),
}

impl From<anyhow::Error> for RunError {
    fn from(e: anyhow::Error) -> Self {
        RunError::Fatal(e)
    }
}

async fn run(args: CliArgs) -> Result<(), RunError> {
    let default_config = std::path::PathBuf::from("./server.conf");
    let (config_path, required) = match &args.config {
        Some(p) => (Some(p.clone()), true),
        None => (default_config.exists().then_some(default_config), false),
    };

    let mut cfg = ServerConfig::load(config_path.as_deref(), required)?;
    cfg.apply_cli(args.port, args.path.clone(), args.verbose)?;

    if cfg.port <= 1024 {
        return Err(RunError::Fatal(anyhow::anyhow!("PORT must be greater than 1024, got {}", cfg.port)));
    }

    let mime = MimeTable::with_overrides(&cfg.mime_overrides);
    let logger = Logger::open(&cfg.log_file).context("failed to open log sink")?;

    if cfg.html_cache {
        std::fs::create_dir_all(&cfg.html_cache_dir).context("failed to create html cache directory")?;
    }

    if cfg.cgi.enable && cfg.cgi.extensions.is_empty() {
        return Err(RunError::Fatal(anyhow::anyhow!("CGI_ENABLE=1 requires at least one CGI_EXTS entry")));
    }

    if cfg.cgi.enable {
        for interp in httpd::cgi::required_interpreters(&cfg.cgi.extensions) {
            if !httpd::cgi::interpreter_on_path(interp) {
                return Err(RunError::MissingPlatformFacility(anyhow::anyhow!(
                    "CGI interpreter {:?} required by CGI_EXTS is not on PATH",
                    interp
                )));
            }
        }
    }

    let cfg = Arc::new(cfg);
    let mime = Arc::new(mime);

    server::run(cfg, mime, logger).await.context("server loop failed")?;
    Ok(())
}
