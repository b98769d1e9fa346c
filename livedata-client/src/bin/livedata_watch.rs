//! livedata-watch: mirror server collections and log what changes.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use livedata_client::{ClientConfig, LiveClient, LiveDataError, LiveEvent, Selector, WsTransport};
use log::{info, warn};
use serde_json::Value;

/// Subscribe to a livedata server and watch collections converge
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server endpoint (overrides the config file)
    #[arg(short, long)]
    url: Option<String>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subscription to open: `name` or `name:[json args]`
    #[arg(short, long = "subscribe")]
    subscriptions: Vec<String>,

    /// Server collection to mirror
    #[arg(long = "collection")]
    collections: Vec<String>,

    /// Exit on the first disconnect instead of reconnecting
    #[arg(long)]
    once: bool,
}

fn parse_subscription(spec: &str) -> Result<(String, Vec<Value>), LiveDataError> {
    match spec.split_once(':') {
        None => Ok((spec.to_string(), Vec::new())),
        Some((name, args)) => {
            let params: Vec<Value> = serde_json::from_str(args)
                .map_err(|e| LiveDataError::Config(format!("subscription {name}: {e}")))?;
            Ok((name.to_string(), params))
        }
    }
}

fn report(client: &mut LiveClient, collections: &[String]) {
    while let Some(event) = client.poll_event() {
        match event {
            LiveEvent::Reconciled { frames } => {
                let sizes: Vec<String> = collections
                    .iter()
                    .map(|name| {
                        let n = client
                            .collection_by_name(name)
                            .map(|c| c.count(&Selector::All))
                            .unwrap_or(0);
                        format!("{name}={n}")
                    })
                    .collect();
                info!("applied {frames} frames: {}", sizes.join(" "));
            }
            LiveEvent::NoSub { id, error } => warn!("subscription {id} closed: {error:?}"),
            other => info!("{other:?}"),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), LiveDataError> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    if let Some(url) = args.url.clone() {
        config.url = url;
    }
    let delay = Duration::from_millis(config.reconnect_delay_ms);

    let mut client = LiveClient::new(config);
    for name in &args.collections {
        client.create_collection(Some(name))?;
    }
    let mut handles = Vec::new();
    for spec in &args.subscriptions {
        let (name, params) = parse_subscription(spec)?;
        let label = name.clone();
        handles.push(client.subscribe_with(&name, params, move || info!("{label} ready")));
    }
    info!("watching {} subscriptions", handles.len());

    let mut transport = WsTransport::for_client(&client);
    loop {
        match transport.connect(&mut client).await {
            Ok(()) => loop {
                match transport.pump(&mut client).await {
                    Ok(true) => report(&mut client, &args.collections),
                    Ok(false) => break,
                    Err(e) => {
                        warn!("{e}");
                        break;
                    }
                }
            },
            Err(e) => warn!("connect to {} failed: {e}", transport.url()),
        }
        report(&mut client, &args.collections);

        if args.once {
            return Ok(());
        }
        tokio::time::sleep(delay).await;
    }
}
