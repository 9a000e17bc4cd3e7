use anyhow::{Context, Result};
use clap::Parser;
use multifeed::util::single_line;
use multifeed::{Config, HttpReaderFactory, Message, MultiFeedReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default config location (~/.config/multifeed/config.toml)
fn default_config_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("multifeed")
        .join("config.toml"))
}

#[derive(Parser, Debug)]
#[command(
    name = "multifeed",
    about = "Poll many RSS/Atom feeds concurrently and print new items"
)]
struct Args {
    /// Config file (default: ~/.config/multifeed/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Seconds between two drains of the message queue
    #[arg(long, value_name = "SECS", default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    drain_every: u64,

    /// Check whether URL is a usable feed, then exit
    #[arg(long, value_name = "URL")]
    check: Option<String>,
}

fn print_messages(messages: &[Message]) {
    for message in messages {
        let consumers = message
            .consumers
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(",");
        match &message.link {
            Some(link) => println!("[{}] {} <{}>", consumers, single_line(&message.title), link),
            None => println!("[{}] {}", consumers, single_line(&message.title)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let factory = HttpReaderFactory::new(config.http()).context("Failed to build HTTP client")?;
    let reader = MultiFeedReader::new(
        config.timings(),
        Arc::new(factory),
        Arc::new(config.queue()),
    );

    if let Some(url) = args.check {
        let usable = reader.validate_url(&url).await;
        reader.shutdown().await;
        if !usable {
            anyhow::bail!("{url} is not a reachable RSS/Atom feed");
        }
        println!("{url}: OK");
        return Ok(());
    }

    let feeds = config.feeds();
    if feeds.is_empty() {
        tracing::warn!(path = %config_path.display(), "No feeds configured");
    }
    for feed in feeds {
        reader.register(feed);
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(args.drain_every));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => print_messages(&reader.drain()),
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
        }
    }

    tracing::info!("Shutting down");
    let report = reader.shutdown().await;
    print_messages(&reader.drain());

    if !report.is_clean() {
        eprintln!(
            "{} feed worker(s) still running at exit: {}",
            report.stuck.len(),
            report.stuck.join(", ")
        );
    }
    Ok(())
}
