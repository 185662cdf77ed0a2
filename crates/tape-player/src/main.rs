use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tape_player::console;
use tape_player::core::{CoreEvent, PlayerCore};
use tape_player::coordinator::Coordinator;
use tape_player::library::LocalLibrary;
use tape_player::mpv::MpvElement;
use tape_player::resolver::Resolver;
use tape_proto::config::Config;
use tape_proto::protocol::Broadcast;
use tape_proto::settings::SettingsStore;
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_LOG_FILTER: &str = "info,tape_player=debug,hyper_util=warn,reqwest=warn";

#[derive(Parser, Debug)]
#[command(name = "tape")]
#[command(about = "Local and linked audio player driven over stdin/stdout", long_about = None)]
struct Args {
    /// Config file (default: ~/.config/tape/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Mirror base URL; repeat to replace the configured list, in order
    #[arg(short, long = "mirror")]
    mirrors: Vec<String>,

    /// Directory for the library, settings and log
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Use mpv from PATH instead of a bundled binary
    #[arg(long)]
    use_system_deps: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(dir) = args.data_dir {
        config.paths.data_dir = dir;
    }
    if !args.mirrors.is_empty() {
        config.resolver.mirrors = args.mirrors;
    }
    tape_proto::platform::set_use_system_deps(
        args.use_system_deps || config.playback.use_system_deps,
    );

    init_logging(&config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run(config));
    // stdin is read on a blocking thread that never sees EOF after `quit`
    runtime.shutdown_timeout(Duration::from_millis(250));
    result
}

fn init_logging(config: &Config) {
    let log_path = config.log_path();
    let writer = match std::fs::create_dir_all(&config.paths.data_dir).and_then(|_| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
    }) {
        Ok(file) => {
            eprintln!("tape: logging to {}", log_path.display());
            BoxMakeWriter::new(file)
        }
        Err(e) => {
            eprintln!("tape: cannot open {}: {}; logging to stderr", log_path.display(), e);
            BoxMakeWriter::new(std::io::stderr)
        }
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!("Data dir: {:?}", config.paths.data_dir);
    info!("Mirrors: {:?}", config.resolver.mirrors);

    let settings = SettingsStore::open(config.settings_path());
    let library = match LocalLibrary::open(config.library_dir(), settings.clone()).await {
        Ok(library) => Some(library),
        Err(e) => {
            warn!("{}; continuing without a library", e);
            None
        }
    };
    let resolver = Arc::new(Resolver::from_config(&config.resolver)?);
    let element = MpvElement::new(config.playback.default_volume);
    let coordinator = Coordinator::new(element, library, settings, &config.playback);

    // Event channel: console, resolutions and heartbeat all funnel into PlayerCore
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<CoreEvent>(256);
    let (broadcast_tx, broadcast_rx) = tokio::sync::mpsc::channel::<Broadcast>(256);

    let writer = console::start_stdio(event_tx.clone(), broadcast_tx.clone(), broadcast_rx);

    let ctrl_c_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = ctrl_c_tx.send(CoreEvent::Shutdown).await;
        }
    });

    let core = PlayerCore::new(
        coordinator,
        resolver,
        config.playback.seek_step_secs,
        event_tx,
        broadcast_tx,
    );
    core.run(event_rx).await;

    // let the final `Bye` reach stdout
    if tokio::time::timeout(Duration::from_secs(1), writer).await.is_err() {
        warn!("console writer did not finish");
    }
    info!("tape exited");
    Ok(())
}
