//! Process-wide tracing setup and the per-profile file sink used by the
//! scheduler (spec.md §4.J "Verbosity flags", §9 daemon logging).
//!
//! The global subscriber always writes to stdout; a profile run can
//! additionally install a file layer for its duration via
//! [`tracing_subscriber`]'s `reload` module, mirroring the Python
//! daemon's `_profile_logger` contextmanager, which adds (not replaces)
//! a `FileHandler` on the root logger and removes it afterward.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

type ProfileLayer = Option<Box<dyn tracing_subscriber::Layer<Registry> + Send + Sync>>;

/// Handle returned by [`init`], used to install/clear the per-profile
/// file sink. Cheap to clone; `reload::Handle` is internally an `Arc`.
#[derive(Clone)]
pub struct LoggingHandle {
    profile_layer: reload::Handle<ProfileLayer, Registry>,
}

impl LoggingHandle {
    /// Tee output to `path` for the duration the caller holds the
    /// returned guard's lifetime, i.e. until [`Self::clear_profile_sink`]
    /// is called. Appends rather than truncates, matching the Python
    /// behavior of reusing one log file across daemon runs.
    pub fn install_profile_sink(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("creating log directory {parent:?}"))?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening profile log file {path:?}"))?;
        let layer = fmt::layer().with_writer(file).with_ansi(false).boxed();
        self.profile_layer.reload(Some(layer)).context("installing profile log sink")?;
        Ok(())
    }

    pub fn clear_profile_sink(&self) -> Result<()> {
        self.profile_layer.reload(None).context("clearing profile log sink")?;
        Ok(())
    }
}

/// `verbosity` follows clap's repeated `-v`/`-q` counting convention:
/// `0` is `info`, each `-v` drops one level towards `trace`, each `-q`
/// raises one level towards `error`.
fn filter_for_verbosity(verbosity: i8) -> EnvFilter {
    if let Ok(from_env) = std::env::var("RUST_LOG") {
        return EnvFilter::new(from_env);
    }
    let level = match verbosity {
        v if v <= -2 => "error",
        -1 => "warn",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    EnvFilter::new(format!("bisync_sync={level},remote={level},common={level}"))
}

/// Install the global subscriber: stdout at `verbosity`, plus a reload
/// slot a profile run can later point at a file.
pub fn init(verbosity: i8) -> LoggingHandle {
    let (profile_layer, handle) = reload::Layer::new(None::<Box<dyn tracing_subscriber::Layer<Registry> + Send + Sync>>);
    let subscriber = Registry::default()
        .with(filter_for_verbosity(verbosity))
        .with(fmt::layer())
        .with(profile_layer);
    tracing::subscriber::set_global_default(subscriber).expect("setting global tracing subscriber exactly once");
    LoggingHandle { profile_layer: handle }
}
