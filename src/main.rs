//! CLI for AppBus
//!
//! Subcommands:
//! - `server`: run a broker host for the configured applications
//! - `check`: print every configured application's visible capabilities
//! - `demo`: run a request/reply and intent round trip between two applications

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use appbus::broker::{Broker, Headers, Intent, IntentSelector, ReplyStatus, TopicMessage};
use appbus::client::AppClient;
use appbus::config::{Settings, load_config};
use appbus::manifest::{ApplicationManifest, CapabilityDecl, IntentionDecl, ManifestObjectFilter};
use appbus::transport::{LocalHub, serve};
use appbus::utils::logging;
use clap::Parser;
use futures_util::StreamExt;
use serde_json::json;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "appbus")]
enum Command {
    /// Run a broker host with the configured applications until ctrl-c
    Server,
    /// Print the configured applications and the capabilities each can see, as JSON
    Check,
    /// Run an in-process request/reply and intent round trip
    Demo,
}

type BoxError = Box<dyn std::error::Error>;

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        // a missing .env file is fine
        if !e.not_found() {
            eprintln!("Failed to read .env: {e}");
        }
    }

    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Invalid configuration: {}", e);
            return;
        }
    };
    logging::init(&settings.logging.level);

    let outcome = match cmd {
        Command::Server => run_server(settings).await,
        Command::Check => run_check(&settings),
        Command::Demo => run_demo(settings).await,
    };
    if let Err(e) = outcome {
        error!("Command failed: {}", e);
    }
}

async fn run_server(settings: Settings) -> Result<(), BoxError> {
    let (hub, connections) = LocalHub::new();
    let broker = Arc::new(Broker::from_settings(&settings, hub.clone(), hub.clone())?);
    for manifest in &settings.applications {
        info!("Registered application '{}'", manifest.symbolic_name);
    }

    tokio::select! {
        _ = serve(broker, hub, connections) => {
            error!("Server loop exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    Ok(())
}

fn run_check(settings: &Settings) -> Result<(), BoxError> {
    let (hub, _connections) = LocalHub::new();
    let broker = Broker::from_settings(settings, hub.clone(), hub)?;

    let mut report = BTreeMap::new();
    for manifest in &settings.applications {
        let visible =
            broker.lookup_capabilities(&manifest.symbolic_name, &ManifestObjectFilter::default())?;
        report.insert(manifest.symbolic_name.clone(), visible);
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_demo(mut settings: Settings) -> Result<(), BoxError> {
    settings.applications.push(
        ApplicationManifest::new("demo-greeter")
            .with_capability(CapabilityDecl::new("greet").public()),
    );
    settings.applications.push(
        ApplicationManifest::new("demo-visitor").with_intention(IntentionDecl::new("greet")),
    );

    let (hub, connections) = LocalHub::new();
    let broker = Arc::new(Broker::from_settings(&settings, hub.clone(), hub.clone())?);
    tokio::spawn(serve(broker, hub.clone(), connections));

    let timeout = Duration::from_millis(settings.broker.request_timeout_ms);
    let greeter = AppClient::connect(hub.connect("demo-greeter")?, timeout);
    let visitor = AppClient::connect(hub.connect("demo-visitor")?, timeout);

    let mut requests = greeter.subscribe("greetings/:name").await?;
    let mut intents = greeter.observe_intents(IntentSelector::of_type("greet")).await?;
    let responder = tokio::spawn(async move {
        let Some(request) = requests.next().await else {
            return;
        };
        let name = request.params.get("name").cloned().unwrap_or_default();
        if let Err(e) = greeter
            .reply(&request, format!("Hello, {name}!"), ReplyStatus::Terminal)
            .await
        {
            warn!("Reply failed: {}", e);
        }

        let Some(intent) = intents.next().await else {
            return;
        };
        if let Err(e) = greeter
            .reply_intent(&intent, json!({ "greeted": intent.sender() }), ReplyStatus::Terminal)
            .await
        {
            warn!("Intent reply failed: {}", e);
        }
    });

    let reply = visitor
        .request_one(TopicMessage::new("greetings/world"))
        .await?;
    println!("request/reply: {}", serde_json::to_string(&reply.body)?);

    let mut replies = visitor
        .request_intent(Intent::new("greet"), None, Headers::new())
        .await?;
    match tokio::time::timeout(timeout, replies.next()).await {
        Ok(Some(reply)) => println!("intent: {}", serde_json::to_string(&reply?.body)?),
        Ok(None) => warn!("Intent reply stream closed without a reply"),
        Err(_) => warn!("No intent reply within {} ms", timeout.as_millis()),
    }

    responder.await?;
    Ok(())
}
