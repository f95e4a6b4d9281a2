//! mediacache - fetch media through a local cache and manage its contents
//!
//! Every subcommand activates the cache worker first, so stale store
//! generations are cleaned up before anything is read or written.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::error;

use mediacache::cache::CacheSource;
use mediacache::cli::{Cli, Command};
use mediacache::control::ControlReply;
use mediacache::fetch::HttpFetcher;
use mediacache::{logging, CacheWorker};

/// Renders a control reply for the terminal
fn describe_reply(reply: &ControlReply) -> String {
    match reply {
        ControlReply::Size { size, count } => format!("{size} bytes in {count} entries"),
        ControlReply::Cleared {
            success: true, ..
        } => "cache cleared".to_string(),
        ControlReply::VideoCleared {
            success: true,
            deleted_count,
            deleted_size,
            ..
        } => format!("removed {deleted_count} entries ({deleted_size} bytes)"),
        ControlReply::Cleared { error, .. } | ControlReply::VideoCleared { error, .. } => {
            format!("failed: {}", error.as_deref().unwrap_or("unknown error"))
        }
    }
}

fn source_label(source: CacheSource) -> &'static str {
    match source {
        CacheSource::Cache => "cache",
        CacheSource::Network => "network",
        CacheSource::Stale => "stale",
        CacheSource::Passthrough => "passthrough",
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = cli.to_config()?;
    // The process may exit before a spawned pass finishes; fetch runs one inline
    config.background_eviction = false;
    let worker = CacheWorker::activate(config, Arc::new(HttpFetcher::new())).await?;
    let control = worker.control();

    let reply = match &cli.command {
        Command::Fetch { url, output } => {
            let result = worker.interceptor().handle(url).await?;
            worker.governor().run_pass().await?;

            if let Some(path) = output {
                tokio::fs::write(path, &result.response.body).await?;
            }
            if cli.json {
                let summary = serde_json::json!({
                    "source": source_label(result.source),
                    "status": result.response.status,
                    "bytes": result.response.body.len(),
                });
                println!("{summary}");
            } else {
                println!(
                    "{} {} ({} bytes, from {})",
                    result.response.status,
                    result.response.status_text,
                    result.response.body.len(),
                    source_label(result.source)
                );
            }
            None
        }
        Command::Size => Some(control.cache_size().await?),
        Command::Clear => Some(control.clear_cache().await?),
        Command::ClearVideo { url } => Some(control.clear_previous_video(url).await?),
        Command::Keys => {
            let mut keys = worker.store().keys().await?;
            keys.sort();
            if cli.json {
                println!("{}", serde_json::to_string(&keys)?);
            } else {
                for key in keys {
                    println!("{key}");
                }
            }
            None
        }
    };

    if let Some(reply) = reply {
        if cli.json {
            println!("{}", serde_json::to_string(&reply)?);
        } else {
            println!("{}", describe_reply(&reply));
        }
    }

    worker.shutdown();
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(&cli.log_level, cli.log_json) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
