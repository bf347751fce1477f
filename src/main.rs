//! Page Telemetry CLI
//!
//! Hosts the telemetry collector on a synthetic page driven by a replay file.

use anyhow::Context;
use clap::{Parser, Subcommand};
use page_telemetry::{
    collector::EventBus,
    config::Config,
    consent::{ConsentChannel, ConsentGateway, ConsentState},
    core::{FileSessionStorage, PageContext, PageInfo, SessionManager, SystemClock},
    host::{read_replay, ReplayAction, ReplayStep, StaticPage, StaticTimeline, SystemProbes},
    transparency::{create_shared_log_with_persistence, TransparencyLog},
    transport::{JsonlSink, TelemetrySink},
    Environment, Tracker, TELEMETRY_DISCLOSURE, VERSION,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "page-telemetry")]
#[command(version = VERSION)]
#[command(about = "Consent-gated page telemetry collector", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the collector against a replayed page session
    Run {
        /// JSON-lines file of page events and host calls
        #[arg(long)]
        replay: PathBuf,

        /// Collection endpoint (defaults to the configured endpoint)
        #[arg(long)]
        endpoint: Option<String>,

        /// Write payloads to this JSON-lines file instead of the network
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// URL of the simulated page
        #[arg(long, default_value = "https://app.local/")]
        url: String,

        /// Title of the simulated page
        #[arg(long, default_value = "Dashboard")]
        title: String,

        /// Referrer of the simulated page
        #[arg(long)]
        referrer: Option<String>,
    },

    /// Record the analytics consent decision
    Consent {
        #[command(subcommand)]
        action: ConsentAction,
    },

    /// Show consent, session and collection statistics
    Status,

    /// Manage the persisted session identifier
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Display the data-collection disclosure
    Privacy,

    /// Show configuration
    Config,
}

#[derive(Subcommand)]
enum ConsentAction {
    /// Grant analytics consent
    Grant {
        /// Consent policy version being agreed to
        #[arg(long, default_value = "1")]
        version: String,
    },
    /// Revoke analytics consent
    Revoke,
}

#[derive(Subcommand)]
enum SessionAction {
    /// Delete the persisted session id
    Clear,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            replay,
            endpoint,
            output,
            url,
            title,
            referrer,
        } => cmd_run(
            replay,
            endpoint,
            output,
            PageInfo {
                url,
                title,
                referrer,
            },
        ),
        Commands::Consent { action } => cmd_consent(action),
        Commands::Status => {
            cmd_status();
            Ok(())
        }
        Commands::Session { action } => cmd_session(action),
        Commands::Privacy => {
            cmd_privacy();
            Ok(())
        }
        Commands::Config => {
            cmd_config();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn cmd_run(
    replay: PathBuf,
    endpoint: Option<String>,
    output: Option<PathBuf>,
    page: PageInfo,
) -> anyhow::Result<()> {
    println!("Page Telemetry v{VERSION}");
    println!();

    let config = Config::load().unwrap_or_default();
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let file = std::fs::File::open(&replay)
        .with_context(|| format!("Could not open replay file {replay:?}"))?;
    let steps = read_replay(std::io::BufReader::new(file))?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
    runtime.block_on(run_session(config, steps, endpoint, output, page))
}

async fn run_session(
    config: Config,
    steps: Vec<ReplayStep>,
    endpoint: Option<String>,
    output: Option<PathBuf>,
    page: PageInfo,
) -> anyhow::Result<()> {
    let endpoint = endpoint.unwrap_or_else(|| config.endpoint.clone());
    let sink = build_sink(&config, &endpoint, output)?;

    let consent_path = config.consent_path();
    let initial_consent = ConsentState::load(&consent_path).unwrap_or_else(|e| {
        eprintln!("Warning: Could not read consent: {e}");
        None
    });
    let consent = ConsentChannel::with_state(initial_consent.clone());

    let bus = EventBus::new();
    let timeline = Arc::new(StaticTimeline::new());
    let page_context = Arc::new(StaticPage::new(page.clone()).with_env_do_not_track());
    let dnt = page_context.do_not_track();

    let env = Environment {
        events: Arc::new(bus.clone()),
        page: page_context,
        timeline: timeline.clone(),
        probes: Arc::new(SystemProbes),
        storage: Arc::new(FileSessionStorage::new(config.storage_path())),
        sink,
        clock: Arc::new(SystemClock::new()),
    };

    let transparency_log = create_shared_log_with_persistence(config.transparency_path());
    let tracker = Tracker::with_transparency(
        config.clone(),
        env,
        Arc::new(consent.clone()),
        transparency_log.clone(),
    );

    println!("Page: {} ({})", page.title, page.url);
    println!(
        "Consent: {}",
        match &initial_consent {
            Some(c) if c.analytics => format!("granted (v{})", c.version),
            Some(c) => format!("denied (v{})", c.version),
            None => "not given".to_string(),
        }
    );
    if dnt {
        println!("Do-not-track is set: collection stays off.");
    }
    println!("Replay steps: {}", steps.len());
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    tracker.initialize();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    // Pick up `page-telemetry consent grant/revoke` from another process.
    let poll_channel = consent.clone();
    let poller = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            if let Ok(latest) = ConsentState::load(&consent_path) {
                if latest != poll_channel.get_consent() {
                    println!(
                        "Consent changed: {}",
                        if latest.as_ref().map_or(false, |c| c.analytics) {
                            "granted"
                        } else {
                            "revoked"
                        }
                    );
                    poll_channel.publish(latest);
                }
            }
        }
    });

    for step in steps {
        if !sleep_while_running(&running, Duration::from_millis(step.delay_ms)).await {
            break;
        }
        match step.action {
            ReplayAction::Event(event) => bus.emit(&event),
            ReplayAction::Lcp(start_time) => timeline.report_lcp(start_time),
            ReplayAction::Track { name, properties } => tracker.track_event(&name, properties),
            ReplayAction::ApiCall {
                endpoint,
                duration_ms,
            } => tracker.track_api_call(&endpoint, duration_ms),
            ReplayAction::UserId(id) => tracker.set_user_id(&id),
        }
    }

    println!();
    println!("Stopping collection...");
    poller.abort();
    tracker.flush_on_unload();
    tracker.shutdown();

    if let Err(e) = transparency_log.save() {
        eprintln!("Warning: Could not save transparency log: {e}");
    }

    // Give detached keep-alive requests a moment before the runtime goes away.
    tokio::time::sleep(Duration::from_millis(200)).await;

    println!();
    println!("{}", transparency_log.summary());
    Ok(())
}

#[cfg_attr(feature = "http", allow(unused_variables))]
fn build_sink(
    config: &Config,
    endpoint: &str,
    output: Option<PathBuf>,
) -> anyhow::Result<Arc<dyn TelemetrySink>> {
    if let Some(path) = output {
        println!("Output: {path:?}");
        return Ok(Arc::new(JsonlSink::new(path)?));
    }

    #[cfg(feature = "http")]
    {
        use page_telemetry::transport::{BeaconDispatcher, BeaconSender, KeepAliveSink, Transport};

        let beacon = match BeaconDispatcher::new(64) {
            Ok(beacon) => Some(Arc::new(beacon) as Arc<dyn BeaconSender>),
            Err(e) => {
                eprintln!("Warning: Beacon unavailable, using keep-alive requests: {e}");
                None
            }
        };
        let fallback = Arc::new(KeepAliveSink::new()?);
        let transport = Transport::new(endpoint, beacon, fallback);
        println!("Endpoint: {}", transport.endpoint());
        Ok(Arc::new(transport))
    }

    #[cfg(not(feature = "http"))]
    {
        let path = config.export_path.join(format!(
            "payloads_{}.jsonl",
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        ));
        eprintln!("Warning: http feature not enabled, ignoring endpoint {endpoint}");
        println!("Output: {path:?}");
        Ok(Arc::new(JsonlSink::new(path)?))
    }
}

/// Sleep in short slices so Ctrl+C is noticed. Returns `false` if stopped.
async fn sleep_while_running(running: &AtomicBool, total: Duration) -> bool {
    let slice = Duration::from_millis(100);
    let mut remaining = total;
    while !remaining.is_zero() {
        if !running.load(Ordering::SeqCst) {
            return false;
        }
        let step = remaining.min(slice);
        tokio::time::sleep(step).await;
        remaining -= step;
    }
    running.load(Ordering::SeqCst)
}

fn cmd_consent(action: ConsentAction) -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();
    let path = config.consent_path();

    match action {
        ConsentAction::Grant { version } => {
            ConsentState::granted(version).save(&path)?;
            println!("Analytics consent granted.");
        }
        ConsentAction::Revoke => {
            let version = ConsentState::load(&path)
                .ok()
                .flatten()
                .map(|c| c.version)
                .unwrap_or_else(|| "1".to_string());
            ConsentState::denied(version).save(&path)?;
            // A running collector clears this too; do it here in case none is.
            session_manager(&config).clear();
            println!("Analytics consent revoked. Session id deleted.");
        }
    }
    Ok(())
}

fn cmd_status() {
    let config = Config::load().unwrap_or_default();

    println!("Page Telemetry Status");
    println!("=====================");
    println!();

    match ConsentState::load(&config.consent_path()) {
        Ok(Some(c)) => println!(
            "Analytics consent: {} (version {})",
            if c.analytics { "granted ✓" } else { "denied ✗" },
            c.version
        ),
        Ok(None) => println!("Analytics consent: not given"),
        Err(e) => println!("Analytics consent: unreadable ({e})"),
    }
    let storage = FileSessionStorage::new(config.storage_path());
    println!("Session storage: {:?}", storage.path());
    println!(
        "Session id: {}",
        SessionManager::new(Arc::new(storage), config.session_key.clone())
            .current()
            .unwrap_or_else(|| "none".to_string())
    );
    println!("Endpoint: {}", config.endpoint);
    println!();

    if config.transparency_path().exists() {
        let log = TransparencyLog::with_persistence(config.transparency_path());
        println!("{}", log.summary());
    } else {
        println!("No previous collection data found.");
    }
}

fn cmd_session(action: SessionAction) -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();
    match action {
        SessionAction::Clear => {
            session_manager(&config).clear();
            println!("Session id cleared.");
        }
    }
    Ok(())
}

fn cmd_privacy() {
    println!("{TELEMETRY_DISCLOSURE}");
}

fn cmd_config() {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

fn session_manager(config: &Config) -> SessionManager {
    SessionManager::new(
        Arc::new(FileSessionStorage::new(config.storage_path())),
        config.session_key.clone(),
    )
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Warning: Could not set Ctrl+C handler: {e}");
    }
}
