use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use watch_presence_core::{
    AppConfig, InMemoryEpisodeTracker, Presence, SharedPreferences,
};
use watch_presence_discord_rpc::DiscordTransportFactory;
use watch_presence_events::{listen, PlaybackEvent};
use watch_presence_mirror::{
    presence_supported, MirrorEvent, NoopTransportFactory, StatusMirror, TransportFactory,
};

#[derive(Parser, Debug)]
#[command(
    name = "watch-presence",
    about = "Watch state -> Discord Rich Presence"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Run,
    Doctor,
    Status,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cmd = cli.command.unwrap_or(Commands::Run);
    let cfg_path = cli.config.unwrap_or_else(default_config_path);

    match cmd {
        Commands::Config {
            action: ConfigAction::Init,
        } => {
            init_config(&cfg_path)?;
            println!("Initialized config at {}", cfg_path.display());
            Ok(())
        }
        Commands::Doctor => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            doctor(&cfg).await
        }
        Commands::Status => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            status(&cfg)
        }
        Commands::Run => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            run(cfg, cfg_path).await
        }
    }
}

async fn run(cfg: AppConfig, cfg_path: PathBuf) -> Result<()> {
    let prefs = Arc::new(SharedPreferences::new(cfg.preferences));
    let tracker = Arc::new(InMemoryEpisodeTracker::new());

    let factory: Box<dyn TransportFactory> = if presence_supported() {
        Box::new(DiscordTransportFactory::new(cfg.discord_app_id.clone()))
    } else {
        Box::new(NoopTransportFactory)
    };

    let prefs_dyn: Arc<dyn watch_presence_core::Preferences> = prefs.clone();
    let tracker_dyn: Arc<dyn watch_presence_core::EpisodeTracker> = tracker.clone();
    let mirror = Arc::new(StatusMirror::new(
        prefs_dyn,
        tracker_dyn,
        factory,
        cfg.enable_buttons,
        cfg.assets.clone(),
    ));
    mirror.setup();

    spawn_mirror_observer(Arc::clone(&mirror));

    let (event_tx, mut event_rx) = mpsc::channel::<PlaybackEvent>(64);
    let listen_addr = cfg.listen_addr.clone();
    tokio::spawn(async move {
        if let Err(err) = listen(&listen_addr, event_tx).await {
            error!(error = %err, "playback listener failed");
        }
    });

    let (reload_tx, mut reload_rx) = mpsc::channel::<()>(4);
    spawn_reload_watchers(
        cfg_path.clone(),
        cfg.intervals.file_watch_poll_ms,
        reload_tx,
    )
    .await?;

    info!(listen = %cfg.listen_addr, "watch-presence started");

    loop {
        tokio::select! {
            event = event_rx.recv() => match event {
                Some(event) => {
                    if let PlaybackEvent::PlaybackStarted { series_id, episode: Some(n), .. } = &event {
                        tracker.record(series_id, *n);
                    }
                    match event.media_ref() {
                        Some(media) => mirror.update_presence(Presence::Watching(media)),
                        None => mirror.update_presence(Presence::Idle),
                    }
                }
                None => {
                    warn!("playback event channel closed; shutting down");
                    break;
                }
            },
            msg = reload_rx.recv() => {
                if msg.is_some() {
                    match load_or_default(&cfg_path) {
                        Ok(new_cfg) => {
                            prefs.replace(new_cfg.preferences);
                            mirror.reset();
                            info!("configuration reloaded");
                        }
                        Err(err) => {
                            error!(error = %err, "failed to reload config");
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c; shutting down");
                break;
            }
        }
    }

    Ok(())
}

fn spawn_mirror_observer(mirror: Arc<StatusMirror>) {
    use tokio::sync::broadcast::error::RecvError;

    let mut events = mirror.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(MirrorEvent::PresenceChanged) => {
                    debug!(presence = ?mirror.current_presence(), "presence changed");
                }
                Ok(MirrorEvent::ConnectionChanged) => {
                    info!(connected = mirror.connected(), "presence connection changed");
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn doctor(cfg: &AppConfig) -> Result<()> {
    println!("== watch-presence doctor ==");

    println!(
        "Presence feature: {}",
        if presence_supported() {
            "supported on this platform"
        } else {
            "not supported on this platform"
        }
    );

    let discord_ok = discord_running().await;
    println!(
        "Discord RPC local endpoint: {}",
        if discord_ok {
            "reachable"
        } else {
            "not reachable"
        }
    );

    println!("Playback reports expected on: {}", cfg.listen_addr);
    println!(
        "Preferences: presence_enabled={} show_title={}",
        cfg.preferences.presence_enabled, cfg.preferences.show_title
    );

    Ok(())
}

fn status(cfg: &AppConfig) -> Result<()> {
    println!("discord_app_id: {}", cfg.discord_app_id);
    println!("listen_addr: {}", cfg.listen_addr);
    println!("log_level: {}", cfg.log_level);
    println!("enable_buttons: {}", cfg.enable_buttons);
    println!("presence_enabled: {}", cfg.preferences.presence_enabled);
    println!("show_title: {}", cfg.preferences.show_title);
    Ok(())
}

fn default_config_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("watch-presence").join("config.toml")
}

fn init_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {}", parent.display()))?;
    }
    let cfg = AppConfig::default();
    let toml = toml::to_string_pretty(&cfg)?;
    std::fs::write(path, toml)
        .with_context(|| format!("failed to write config file {}", path.display()))?;
    Ok(())
}

fn load_or_default(path: &Path) -> Result<AppConfig> {
    let mut cfg = if !path.exists() {
        AppConfig::default()
    } else {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))?
    };
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

fn init_logging(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();
}

async fn spawn_reload_watchers(path: PathBuf, poll_ms: u64, tx: mpsc::Sender<()>) -> Result<()> {
    let tx_poll = tx.clone();
    tokio::spawn(async move {
        let mut known_mtime = file_mtime(&path);
        let sleep = Duration::from_millis(poll_ms.max(2_000));
        loop {
            tokio::time::sleep(sleep).await;
            let current = file_mtime(&path);
            if current.is_some() && current != known_mtime {
                known_mtime = current;
                let _ = tx_poll.send(()).await;
            }
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let tx_hup = tx.clone();
        tokio::spawn(async move {
            if let Ok(mut sig) = signal(SignalKind::hangup()) {
                while sig.recv().await.is_some() {
                    let _ = tx_hup.send(()).await;
                }
            }
        });
    }

    Ok(())
}

fn file_mtime(path: &Path) -> Option<std::time::SystemTime> {
    std::fs::metadata(path).ok()?.modified().ok()
}

async fn discord_running() -> bool {
    #[cfg(unix)]
    {
        for slot in 0..=9 {
            if discord_ipc_exists(slot) {
                return true;
            }
        }
    }

    let ports = [6463, 6464, 6465, 6466, 6467, 6468, 6469, 6470, 6471, 6472];
    for port in ports {
        let addr = format!("127.0.0.1:{port}");
        if tokio::time::timeout(
            Duration::from_millis(200),
            tokio::net::TcpStream::connect(addr),
        )
        .await
        .ok()
        .and_then(Result::ok)
        .is_some()
        {
            return true;
        }
    }
    false
}

#[cfg(unix)]
fn discord_ipc_exists(slot: u8) -> bool {
    let mut candidates = Vec::new();
    if let Ok(tmpdir) = std::env::var("TMPDIR") {
        candidates.push(PathBuf::from(tmpdir).join(format!("discord-ipc-{slot}")));
    }
    if let Ok(runtime) = std::env::var("XDG_RUNTIME_DIR") {
        candidates.push(PathBuf::from(runtime).join(format!("discord-ipc-{slot}")));
    }
    candidates.push(PathBuf::from(format!("/tmp/discord-ipc-{slot}")));
    candidates.push(PathBuf::from(format!("/private/tmp/discord-ipc-{slot}")));

    candidates.into_iter().any(|p| p.exists())
}

fn apply_env_overrides(cfg: &mut AppConfig) {
    if let Ok(v) = std::env::var("WATCH_PRESENCE_DISCORD_APP_ID") {
        if !v.trim().is_empty() {
            cfg.discord_app_id = v;
        }
    }
    if let Ok(v) = std::env::var("WATCH_PRESENCE_LOG_LEVEL") {
        if !v.trim().is_empty() {
            cfg.log_level = v;
        }
    }
    if let Ok(v) = std::env::var("WATCH_PRESENCE_ENABLE_BUTTONS") {
        if let Ok(parsed) = v.parse::<bool>() {
            cfg.enable_buttons = parsed;
        }
    }
}
