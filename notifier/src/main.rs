mod webhook;

use std::path::PathBuf;

use futures_util::StreamExt;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::ClientConfig;
use streamwatch_common::config::Config;
use streamwatch_common::frame::TriggerEvent;
use tracing::{debug, error, info, warn};
use webhook::WebhookClient;

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

    info!(
        brokers = config.kafka.brokers,
        topic = config.kafka.topic,
        group_id = config.kafka.group_id,
        max_attempts = config.notify.max_attempts,
        "starting streamwatch notifier"
    );

    let webhook = match WebhookClient::new(&config.notify) {
        Ok(w) => w,
        Err(e) => {
            error!(error = %e, "failed to create webhook client");
            std::process::exit(1);
        }
    };

    let consumer: StreamConsumer = match ClientConfig::new()
        .set("bootstrap.servers", &config.kafka.brokers)
        .set("group.id", &config.kafka.group_id)
        .set("auto.offset.reset", "latest")
        .set("enable.auto.commit", "true")
        .set("auto.commit.interval.ms", "1000")
        .create()
    {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to create Kafka consumer");
            std::process::exit(1);
        }
    };

    if let Err(e) = consumer.subscribe(&[&config.kafka.topic]) {
        error!(error = %e, topic = config.kafka.topic, "failed to subscribe to Kafka topic");
        std::process::exit(1);
    }
    info!(topic = config.kafka.topic, "subscribed to Kafka topic");

    run_notify_loop(consumer, webhook).await;
}

async fn run_notify_loop(consumer: StreamConsumer, webhook: WebhookClient) {
    let mut stream = consumer.stream();
    let mut delivered: u64 = 0;

    while let Some(result) = stream.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Kafka consume error");
                continue;
            }
        };

        let Some(payload) = msg.payload() else {
            debug!("empty Kafka message, skipping");
            continue;
        };

        let event = match TriggerEvent::deserialize(payload) {
            Ok(ev) => ev,
            Err(e) => {
                warn!(error = %e, "failed to deserialize trigger, skipping");
                continue;
            }
        };

        let text = webhook::format_message(&event);
        match webhook.deliver(&text).await {
            Ok(()) => {
                delivered += 1;
                info!(channel = event.channel, score = event.score, delivered, "notification sent");
            }
            Err(e) => {
                error!(error = %e, channel = event.channel, "dropping notification");
            }
        }
    }
}
