//! Reel CLI

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use reel::config::Config;
use reel::network::NetworkHandler;
use reel::proxy::VcrProxy;
use reel::storage::read_cassette;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let command = &args[1];

    let result = match command.as_str() {
        "run" => {
            if args.len() < 3 {
                eprintln!("Usage: reel run <config.toml>");
                process::exit(1);
            }
            run(&PathBuf::from(&args[2]))
        }
        "stats" => {
            if args.len() < 3 {
                eprintln!("Usage: reel stats <cassette>");
                process::exit(1);
            }
            show_stats(&PathBuf::from(&args[2]))
        }
        _ => {
            eprintln!("Unknown command: {command}");
            eprintln!("Run 'reel' for usage information.");
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    eprintln!("Reel v{}", env!("CARGO_PKG_VERSION"));
    eprintln!();
    eprintln!("Usage: reel <command> [options]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  run <config.toml>   Start the proxy in the configured mode");
    eprintln!("  stats <cassette>    Summarize a cassette");
    eprintln!();
    eprintln!("Set RUST_LOG to adjust logging (default: reel=info).");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("reel=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(config_path: &Path) -> anyhow::Result<()> {
    init_tracing();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting runtime")?;
    runtime.block_on(serve(config_path))
}

async fn serve(config_path: &Path) -> anyhow::Result<()> {
    let config = Config::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let config = Arc::new(config);

    if config.mode.is_record() {
        tracing::info!(
            "Recording {} into {}",
            config.remote_url.as_deref().unwrap_or_default(),
            config.cassette.display()
        );
    }

    let proxy = VcrProxy::start(Arc::clone(&config))
        .with_context(|| format!("starting session on {}", config.cassette.display()))?;
    let proxy = Arc::new(proxy);

    let handler = NetworkHandler::bind(Arc::clone(&config), Arc::clone(&proxy))
        .await
        .with_context(|| format!("binding {}", config.listen))?;

    handler.run().await.context("finalizing session")?;

    if let Some(count) = proxy.interactions_recorded() {
        println!("Recorded {count} interactions to {}", config.cassette.display());
    }
    if let Some(stats) = proxy.replay_stats() {
        println!(
            "Replayed {}/{} interactions ({} unmatched requests)",
            stats.served, stats.total, stats.misses
        );
    }

    Ok(())
}

fn show_stats(path: &Path) -> anyhow::Result<()> {
    let cassette =
        read_cassette(path).with_context(|| format!("reading cassette {}", path.display()))?;

    println!("Cassette: {}", path.display());
    println!("Interactions: {}", cassette.len());
    println!();

    for (index, interaction) in cassette.interactions.iter().enumerate() {
        println!(
            "#{} {} {} -> {} ({} bytes)",
            index + 1,
            interaction.request.method,
            interaction.request.uri,
            interaction.response.status,
            interaction.response.body.len()
        );
    }

    Ok(())
}
