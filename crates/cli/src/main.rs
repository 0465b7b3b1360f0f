//! Hoist CLI entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Parse configuration**: `hoist.toml`, `HOIST_*` environment variables
//!    and flags, layered by [`config`].
//! 2. **Wire observability**: `tracing-subscriber` plus an optional
//!    OpenTelemetry OTLP exporter, see [`observability`].
//! 3. **Construct infrastructure**: the routing repository transport, the JAR
//!    relocator and the classpath-directory host, injected into
//!    [`engine::LoadOrchestrator`].
//! 4. **Run the command**: `load` or `resolve`. Ctrl-C cancels the session
//!    cooperatively.

mod classpath;
mod config;
mod observability;
mod report;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use engine::{CacheStore, Downloader, LoadOrchestrator, Resolver};
use relocator::JarRelocator;
use repository::{HttpConfig, RoutingTransport};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::classpath::ClasspathDirectory;
use crate::config::{ConfigFile, Overrides, Settings};
use crate::observability::LogFormat;
use crate::report::OutputFormat;

/// Hoist: fetch, relocate and load Maven artifacts at runtime.
#[derive(Parser, Debug)]
#[command(name = "hoist")]
#[command(version, about, long_about = None)]
struct Args {
    /// Log line format on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve, download, relocate and load the configured dependencies
    Load(LoadArgs),
    /// Print the resolved dependency closure without downloading artifacts
    Resolve(CommonArgs),
}

#[derive(clap::Args, Debug)]
struct CommonArgs {
    /// Config file (defaults to ./hoist.toml when present)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Artifact cache directory (also: HOIST_CACHE_DIR)
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Maximum concurrent artifact pipelines (also: HOIST_WORKERS)
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// Relocation rule for coordinates given on the command line
    #[arg(long = "relocate", value_name = "FROM=TO")]
    relocations: Vec<String>,

    /// Result format on stdout
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    /// Extra roots as group:artifact:version[:classifier]
    #[arg(value_name = "COORDINATE")]
    coordinates: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct LoadArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Directory receiving loaded JARs (defaults to <cache-dir>/classpath)
    #[arg(long, value_name = "DIR")]
    classpath_dir: Option<PathBuf>,

    /// Print the classpath of loaded JARs after the report
    #[arg(long)]
    print_classpath: bool,
}

impl CommonArgs {
    fn settings(&self) -> Result<Settings> {
        let cwd = std::env::current_dir().context("failed to read the working directory")?;
        let file = ConfigFile::discover(self.config.as_deref(), &cwd)?;
        let overrides = Overrides {
            cache_dir: self.cache_dir.clone(),
            workers: self.workers,
            coordinates: self.coordinates.clone(),
            relocations: self.relocations.clone(),
        };
        let settings = file.resolve(|name| std::env::var(name).ok(), &overrides)?;
        if settings.roots.is_empty() {
            bail!("nothing to load: add [[dependency]] entries to the config or pass coordinates");
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let _telemetry = match observability::init(args.log_format, args.verbose) {
        Ok(telemetry) => telemetry,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(2);
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling");
                cancel.cancel();
            }
        }
    });

    let outcome = match args.command {
        Command::Load(load_args) => load(load_args, &cancel).await,
        Command::Resolve(common) => resolve(common, &cancel).await.map(|()| true),
    };
    match outcome {
        Ok(_) if cancel.is_cancelled() => ExitCode::from(130),
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!(error = %format!("{e:#}"), "Command failed");
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

/// Returns `true` if every root loaded.
async fn load(args: LoadArgs, cancel: &CancellationToken) -> Result<bool> {
    let settings = args.common.settings()?;
    let classpath_dir = args
        .classpath_dir
        .unwrap_or_else(|| settings.loader.cache_dir.join("classpath"));
    let host = Arc::new(ClasspathDirectory::create(&classpath_dir).with_context(|| {
        format!("failed to create classpath directory {}", classpath_dir.display())
    })?);
    let transport = Arc::new(RoutingTransport::standard(&HttpConfig::default())?);

    let orchestrator = LoadOrchestrator::new(
        settings.loader,
        transport,
        Arc::new(JarRelocator::new()),
        host.clone(),
    )?;
    info!(roots = settings.roots.len(), classpath = %host.dir().display(), "Loading");
    let report = orchestrator.load(&settings.roots, cancel).await;

    let mut stdout = std::io::stdout().lock();
    report::write_load(&mut stdout, &report, args.common.output)?;
    if args.print_classpath {
        use std::io::Write as _;
        writeln!(stdout, "{}", host.classpath())?;
    }

    for (coordinate, error) in report.failed_roots() {
        error!(%coordinate, %error, "Root failed to load");
    }
    Ok(report.all_roots_loaded())
}

async fn resolve(args: CommonArgs, cancel: &CancellationToken) -> Result<()> {
    let settings = args.settings()?;
    settings.loader.validate()?;
    let config = settings.loader;
    let transport = Arc::new(RoutingTransport::standard(&HttpConfig::default())?);
    let downloader = Downloader::new(transport, Arc::new(config.repositories), config.retry);
    let resolver = Resolver::new(Arc::new(downloader), Arc::new(config.manifest))
        .with_metadata_cache(Arc::new(CacheStore::new(config.cache_dir)));

    let resolution = resolver.resolve(&settings.roots, cancel).await;
    report::write_resolution(&mut std::io::stdout().lock(), &resolution, args.output)?;
    Ok(())
}
