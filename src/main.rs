//! Demonstration run for BrokerLink
//!
//! Connects a publisher and a subscriber to the configured broker, publishes
//! a numbered series of messages on one topic and verifies that the
//! subscriber saw every one of them in order.

use std::process::ExitCode;
use std::time::Duration;

use brokerlink::config::{Settings, load_config};
use brokerlink::utils::logging;
use brokerlink::{Publisher, Subscriber};
use clap::Parser;
use tokio::time::Instant;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "brokerlink", about = "Publish/subscribe round trip against a broker")]
struct Args {
    /// Topic to publish on and subscribe to (overrides broker.topic)
    #[arg(long)]
    topic: Option<String>,

    /// Number of messages to publish (overrides demo.message_count)
    #[arg(long)]
    count: Option<usize>,

    /// Log level: error, warn, info, debug or trace (overrides log.level)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(topic) = args.topic {
        settings.broker.topic = topic;
    }
    if let Some(count) = args.count {
        settings.demo.message_count = count;
    }
    if let Some(level) = args.log_level {
        settings.log.level = level;
    }

    logging::init(&settings.log.level);

    match run(&settings).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("Run failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every published message came back in order.
async fn run(settings: &Settings) -> Result<bool, Box<dyn std::error::Error>> {
    let endpoint = settings.endpoint();
    let options = settings.session_options();

    info!("Connecting to {}", endpoint.url());
    let publisher = Publisher::new(endpoint.clone(), "publisher", options);
    let subscriber = Subscriber::new(endpoint, "subscriber", options);

    let outcome = exchange(&publisher, &subscriber, settings).await;

    // both clients go away on every path, including failed connects
    publisher.disconnect().await;
    subscriber.disconnect().await;

    let (sent, received) = outcome?;
    Ok(verify(&sent, &received))
}

/// Publishes the numbered messages and collects what the subscriber saw.
async fn exchange(
    publisher: &Publisher,
    subscriber: &Subscriber,
    settings: &Settings,
) -> brokerlink::Result<(Vec<String>, Vec<String>)> {
    let topic = settings.broker.topic.as_str();
    let demo = &settings.demo;

    publisher.connect().await?;
    subscriber.connect().await?;

    let (_, mut rx) = subscriber.subscribe_channel(topic).await?;
    info!("Subscribed to {}", topic);

    // give the broker a moment to register the subscription
    tokio::time::sleep(Duration::from_millis(demo.settle_ms)).await;

    let mut sent = Vec::with_capacity(demo.message_count);
    for i in 0..demo.message_count {
        if i > 0 {
            tokio::time::sleep(Duration::from_millis(demo.publish_interval_ms)).await;
        }
        let text = format!("Message {i}");
        publisher.publish(topic, text.as_str()).await?;
        info!("Published: {}", text);
        sent.push(text);
    }

    let mut received = Vec::with_capacity(sent.len());
    let wait = Duration::from_millis(demo.receive_timeout_ms);
    let deadline = Instant::now() + wait;
    while received.len() < sent.len() {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(msg)) => {
                let text = String::from_utf8_lossy(&msg.payload).into_owned();
                info!("Received on {}: {}", msg.topic, text);
                received.push(text);
            }
            Ok(None) => break,
            Err(_) => {
                warn!(
                    "Stopped waiting after {:?} with {} of {} messages",
                    wait,
                    received.len(),
                    sent.len()
                );
                break;
            }
        }
    }

    Ok((sent, received))
}

fn verify(sent: &[String], received: &[String]) -> bool {
    println!("--- Verification ---");
    println!("Sent messages: {sent:?}");
    println!("Received messages: {received:?}");

    if received == sent {
        println!("Success: all messages received in order");
        true
    } else {
        println!("Error: mismatch between sent and received messages");
        false
    }
}
