//! luahost: run Lua application scripts on a desktop host loop.
//!
//! `luahost run` plays the part of the host platform: it creates an engine
//! over an asset directory, delivers the usual start-up notifications, posts
//! every line read from stdin through the message channel, and drives the UI
//! loop until stdin closes, a script calls `finish()`, or the run duration
//! elapses. The shutdown notifications follow in host order.

mod desktop;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use desktop::{ACTIVITY, DesktopHost};
use luahost_core::assets::DirAssetSource;
use luahost_core::config::ChannelMode;
use luahost_core::host::WindowHandle;
use luahost_core::logging::{LogFormat, init_logging};
use luahost_core::registry::HostContextRegistry;
use luahost_core::{Config, EngineContext, Launch};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const DESKTOP_WINDOW: WindowHandle = WindowHandle(0x1);

#[derive(Parser)]
#[command(name = "luahost")]
#[command(about = "Run Lua application scripts on a desktop host loop", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: <config dir>/luahost/luahost.toml)
    #[arg(long, global = true, env = "LUAHOST_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Override the configured log format (pretty or json)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an engine over an asset directory and run its UI loop
    Run {
        /// Directory holding init.lua and other assets
        #[arg(long)]
        assets: PathBuf,

        /// Private files directory reported to the bridge
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Stop after this many milliseconds even if stdin stays open
        #[arg(long)]
        duration_ms: Option<u64>,

        /// Use the queued channel mode
        #[arg(long)]
        queued: bool,

        /// Class names the desktop class loader can resolve
        #[arg(long = "class")]
        classes: Vec<String>,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> std::process::ExitCode {
    match try_main() {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("luahost: {err:#}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    match cli.command {
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config).context("serializing config")?);
            Ok(())
        }
        Commands::Run {
            assets,
            data_dir,
            duration_ms,
            queued,
            classes,
        } => {
            if queued {
                config.channel.mode = ChannelMode::Queued;
            }
            config.validate()?;
            init_logging(&config.logging)?;
            run(
                &config,
                &assets,
                data_dir,
                duration_ms.map(Duration::from_millis),
                classes,
            )
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Config::load().context("loading default config"),
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("luahost")
        .join("files")
}

fn run(
    config: &Config,
    assets: &Path,
    data_dir: Option<PathBuf>,
    duration: Option<Duration>,
    classes: Vec<String>,
) -> Result<()> {
    anyhow::ensure!(assets.is_dir(), "asset directory {} not found", assets.display());
    let data_dir = data_dir.unwrap_or_else(default_data_dir);

    let host = Arc::new(DesktopHost::new(&data_dir, classes.clone()));
    let registry = Arc::new(HostContextRegistry::with_runtime(host));
    let finished = Arc::new(AtomicBool::new(false));

    let mut engine = EngineContext::create(Launch::new(
        config,
        registry.clone(),
        Arc::new(DirAssetSource::new(assets)),
        ACTIVITY,
    ))
    .context("creating engine")?;

    for class in &classes {
        match registry.resolve_class(class) {
            Ok(handle) => tracing::info!(class = %class, ?handle, "class available"),
            Err(err) => tracing::warn!(class = %class, %err, "class unavailable"),
        }
    }

    install_finish(&engine, finished.clone())?;

    engine.on_start();
    engine.on_resume();
    engine.on_native_window_created(DESKTOP_WINDOW);
    engine.on_window_focus_changed(true);

    let stdin_closed = spawn_stdin_poster(&engine)?;
    let deadline = duration.map(|duration| Instant::now() + duration);

    loop {
        engine.poll_once(Some(POLL_INTERVAL))?;
        if finished.load(Ordering::SeqCst) {
            tracing::info!("script requested finish");
            break;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            tracing::info!("run duration elapsed");
            break;
        }
        if stdin_closed.load(Ordering::SeqCst) && engine.drain_ready()? == 0 {
            tracing::info!("stdin closed and channel drained");
            break;
        }
    }

    engine.on_window_focus_changed(false);
    engine.on_native_window_destroyed(DESKTOP_WINDOW);
    engine.on_pause();
    if let Some(state) = engine.on_save_instance_state() {
        tracing::debug!(bytes = state.len(), "instance state saved");
    }
    engine.on_stop();
    engine.destroy();
    Ok(())
}

/// Expose `finish()` so scripts can end the run, like an activity finishing
/// itself.
fn install_finish(engine: &EngineContext, finished: Arc<AtomicBool>) -> Result<()> {
    engine
        .guard()
        .with_lua(|lua| {
            let finish = lua.create_function(move |_, ()| {
                finished.store(true, Ordering::SeqCst);
                Ok(())
            })?;
            lua.globals().set("finish", finish)
        })?
        .context("installing finish()")
}

/// Post each stdin line from a background thread. The returned flag is set
/// once stdin reaches end of file.
fn spawn_stdin_poster(engine: &EngineContext) -> Result<Arc<AtomicBool>> {
    let closed = Arc::new(AtomicBool::new(false));
    let flag = closed.clone();
    let sender = engine.sender();
    std::thread::Builder::new()
        .name("stdin-poster".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(mut line) = line else { break };
                line.push('\n');
                match sender.post(line.as_bytes()) {
                    Ok(written) if written < line.len() => {
                        tracing::warn!(written, bytes = line.len(), "line only partly posted");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(%err, "stopping stdin poster");
                        break;
                    }
                }
            }
            flag.store(true, Ordering::SeqCst);
        })
        .context("spawning stdin thread")?;
    Ok(closed)
}
