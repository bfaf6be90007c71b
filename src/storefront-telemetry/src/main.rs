mod script;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use storefront_chat::{ChatDeps, ChatSession};
use storefront_core::{
    Clock, EventSink, FileStore, HttpSender, KeyValueStore, MemoryStore, ReqwestSender,
    SystemClock, TelemetryConfig,
};
use storefront_tracker::{BehavioralTracker, BrowserSignal, NavigationContext, TrackerDeps};

use crate::script::{parse_script, ChatAction, ScriptAction};

/// Time left for detached beacon deliveries after teardown.
const BEACON_GRACE: Duration = Duration::from_millis(500);
const DRAIN_POLL: Duration = Duration::from_millis(10);

#[derive(Parser, Debug)]
#[command(name = "storefront-telemetry")]
#[command(about = "Storefront behavioral tracking and chat session driver")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a recorded browsing session against live collector and chat backends.
    Replay(ReplayArgs),
}

#[derive(Args, Debug)]
struct ReplayArgs {
    /// JSON-lines script of browser signals and chat actions.
    #[arg(long)]
    script: PathBuf,

    /// Optional TOML configuration file.
    #[arg(long, env = "STOREFRONT_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the durable visitor store.
    #[arg(long, default_value = ".storefront")]
    state_dir: PathBuf,

    #[arg(long)]
    collector_url: Option<String>,

    #[arg(long)]
    chat_url: Option<String>,

    /// JSON file describing the landing page and device.
    #[arg(long)]
    navigation: Option<PathBuf>,

    /// Landing page URL, when no navigation file is given.
    #[arg(long, default_value = "http://localhost/")]
    page_url: String,

    /// Open the chat widget after the configured delay on the first visit.
    #[arg(long)]
    auto_open_chat: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "storefront_telemetry=info,storefront_tracker=info,\
                 storefront_chat=info,storefront_core=info"
                    .into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Replay(args) => replay(args).await,
    }
}

async fn replay(args: ReplayArgs) -> anyhow::Result<()> {
    let mut config = match TelemetryConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            TelemetryConfig::default()
        }
    };

    if let Some(url) = args.collector_url {
        config.collector.base_url = url;
    }
    if let Some(url) = args.chat_url {
        config.chat.base_url = url;
    }

    let navigation = match &args.navigation {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading navigation file {}", path.display()))?;
            serde_json::from_str::<NavigationContext>(&raw).context("parsing navigation file")?
        }
        None => NavigationContext {
            url: args.page_url.clone(),
            ..Default::default()
        },
    };

    let steps = {
        let raw = tokio::fs::read_to_string(&args.script)
            .await
            .with_context(|| format!("reading script {}", args.script.display()))?;
        parse_script(&raw)?
    };

    std::fs::create_dir_all(&args.state_dir)
        .with_context(|| format!("creating state dir {}", args.state_dir.display()))?;
    let durable: Arc<dyn KeyValueStore> =
        Arc::new(FileStore::open(args.state_dir.join("visitor.json")));
    let ephemeral: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let collector: Arc<dyn HttpSender> = Arc::new(ReqwestSender::new(
        config.collector.base_url.clone(),
        Duration::from_millis(config.collector.request_timeout_ms),
    )?);
    let chat_backend: Arc<dyn HttpSender> = Arc::new(ReqwestSender::new(
        config.chat.base_url.clone(),
        Duration::from_millis(config.chat.request_timeout_ms),
    )?);

    info!(
        collector = %config.collector.base_url,
        chat = %config.chat.base_url,
        page = %navigation.url,
        steps = steps.len(),
        "Starting storefront replay"
    );

    let tracker = BehavioralTracker::new(
        config.tracker.clone(),
        TrackerDeps {
            durable,
            ephemeral,
            clock: clock.clone(),
            sender: collector,
        },
        navigation,
    );
    let (signals, signal_rx) = mpsc::channel::<BrowserSignal>(256);
    tracker.start(signal_rx);

    let sink: Arc<dyn EventSink> = Arc::new(tracker.clone());
    let chat = ChatSession::new(
        config.chat.clone(),
        ChatDeps {
            sender: chat_backend,
            sink,
            clock,
            identity: tracker.identity(),
        },
    );
    if args.auto_open_chat {
        chat.schedule_auto_open(&tracker.current_page_url());
    }

    for step in steps {
        if step.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(step.delay_ms)).await;
        }
        match step.action {
            ScriptAction::Signal(signal) => {
                if signals.send(signal).await.is_err() {
                    warn!("Tracker stopped, remaining script steps skipped");
                    break;
                }
            }
            ScriptAction::Chat(action) => match action {
                ChatAction::Open => chat.open(&tracker.current_page_url()),
                ChatAction::Close => chat.close(),
                ChatAction::Minimize => chat.minimize(),
                ChatAction::Send { text } => {
                    chat.send_message(&text);
                }
                ChatAction::Poll => {
                    if let Some(reply) = chat.poll_once().await {
                        info!(id = %reply.id, "Assistant replied");
                    }
                }
            },
        }
    }

    if chat.is_open() {
        chat.close();
    }
    chat.shutdown();
    drain(&signals).await;
    drop(signals);

    tracker.teardown();
    tracker.stop().await;
    tokio::time::sleep(BEACON_GRACE).await;

    info!(
        visitor_id = tracker.visitor_id(),
        session_id = %tracker.session_id(),
        pages = tracker.page_history().len(),
        chat_messages = chat.messages().len(),
        still_buffered = tracker.buffered_count(),
        "Replay finished"
    );
    Ok(())
}

/// Wait until the tracker loop has received every queued signal.
async fn drain(signals: &mpsc::Sender<BrowserSignal>) {
    while !signals.is_closed() && signals.capacity() < signals.max_capacity() {
        tokio::time::sleep(DRAIN_POLL).await;
    }
}
