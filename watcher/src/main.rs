use std::path::PathBuf;
use std::time::Duration;

use streamwatch_common::config::Config;
use streamwatch_watcher::cycle::ChangeCycle;
use streamwatch_watcher::resolver::SourceDescriptor;
use streamwatch_watcher::setup::Services;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let source = SourceDescriptor::from_config(&config);
    info!(
        url = source.url,
        channel = source.channel,
        resolution = source.resolution,
        mode = config.stream.mode,
        metric = config.compare.metric.as_str(),
        threshold = config.compare.threshold,
        "starting streamwatch watcher"
    );

    let services = match Services::from_config(&config).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to initialise services");
            std::process::exit(1);
        }
    };

    match config.stream.mode.as_str() {
        "cycle" => {
            if let Err(e) = services.cycle.run(&source, None).await {
                error!(error = %e, channel = source.channel, "cycle failed");
                std::process::exit(1);
            }
        }
        "watch" => {
            let interval = Duration::from_secs(config.stream.interval_secs.max(1));
            tokio::select! {
                _ = watch(&services.cycle, &source, interval) => {}
                _ = tokio::signal::ctrl_c() => info!("shutting down"),
            }
        }
        "record" => match services.tracking.run(&source, config.stream.capture_secs).await {
            Ok(report) => match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{json}"),
                Err(e) => error!(error = %e, "failed to render report"),
            },
            Err(e) => {
                error!(error = %e, channel = source.channel, "recording failed");
                std::process::exit(1);
            }
        },
        other => {
            error!(mode = other, "unknown stream mode, expected 'cycle', 'watch' or 'record'");
            std::process::exit(1);
        }
    }
}

/// Run a cycle every `interval`. Failures are logged and the loop carries on.
async fn watch(cycle: &ChangeCycle, source: &SourceDescriptor, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = cycle.run(source, None).await {
            error!(error = %e, channel = source.channel, "cycle failed, retrying next interval");
        }
    }
}
