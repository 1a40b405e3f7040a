//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use lexcrawl_core::{Coordinator, ProgressReporter, RunOptions, RunPhase};
use lexcrawl_shared::{
    AppConfig, RunCounts, RunManifest, RunMode, RunStatus, expand_home, init_config, load_config,
    load_config_from,
};
use lexcrawl_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// lexcrawl: incremental crawler for legal-document sources.
#[derive(Parser)]
#[command(
    name = "lexcrawl",
    version,
    about = "Crawl legal-document sources, detect changes and store normalized documents.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Crawl type. Ignored when `--recreate` is set.
    #[arg(long, value_enum, default_value = "incremental")]
    pub crawl_type: CrawlType,

    /// Number of concurrent fetch workers (overrides `crawl.max_threads`).
    #[arg(long)]
    pub max_threads: Option<usize>,

    /// Register the sources from the seed file before crawling.
    #[arg(long)]
    pub seed: bool,

    /// Seed file to use with `--seed` (defaults to `seed.file` in the config).
    #[arg(long, requires = "seed")]
    pub seed_file: Option<PathBuf>,

    /// Wipe fingerprints and documents, then run a full crawl.
    #[arg(long)]
    pub recreate: bool,

    /// Config file (defaults to ~/.lexcrawl/lexcrawl.toml).
    #[arg(long, env = "LEXCRAWL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Whole-run timeout in seconds (overrides `crawl.run_timeout_secs`).
    #[arg(long)]
    pub run_timeout: Option<u64>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Without a subcommand, run a crawl.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Crawl type selected with `--crawl-type`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum CrawlType {
    Full,
    Incremental,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Print the latest run manifest. Exits 1 when that run failed.
    Status {
        /// Print the manifest as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

impl Cli {
    fn run_mode(&self) -> RunMode {
        match (self.recreate, self.crawl_type) {
            (true, _) => RunMode::Recreate,
            (false, CrawlType::Full) => RunMode::Full,
            (false, CrawlType::Incremental) => RunMode::Incremental,
        }
    }

    /// Apply flag overrides on top of the loaded file.
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(threads) = self.max_threads {
            config.crawl.max_threads = threads;
        }
        if let Some(secs) = self.run_timeout {
            config.crawl.run_timeout_secs = Some(secs);
        }
    }

    fn seed_path(&self, config: &AppConfig) -> Result<Option<PathBuf>> {
        if !self.seed {
            return Ok(None);
        }
        match &self.seed_file {
            Some(path) => Ok(Some(path.clone())),
            None => Ok(Some(expand_home(&config.seed.file)?)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "lexcrawl=info",
        1 => "lexcrawl=debug",
        _ => "lexcrawl=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command and return the process exit code.
pub(crate) async fn run(cli: Cli) -> Result<i32> {
    match &cli.command {
        None => cmd_crawl(&cli).await,
        Some(Command::Status { json }) => cmd_status(cli.config.as_deref(), *json).await,
        Some(Command::Config { action }) => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(cli.config.as_deref()).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_crawl(cli: &Cli) -> Result<i32> {
    let mut config = resolve_config(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    config.validate()?;

    let db_path = config.database.resolved_path()?;
    let mut options = RunOptions::new(cli.run_mode());
    options.seed_file = cli.seed_path(&config)?;

    info!(
        mode = %options.mode,
        threads = config.crawl.max_threads,
        db = %db_path.display(),
        seed = options.seed_file.is_some(),
        "starting crawl"
    );

    let storage = Storage::open(&db_path)
        .await
        .wrap_err_with(|| format!("opening database {}", db_path.display()))?;
    let mut coordinator = Coordinator::new(config, storage);

    let cancel = coordinator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping run");
            cancel.cancel();
        }
    });

    let progress = Arc::new(CliProgress::new());
    let manifest = coordinator.run(&options, progress).await?;

    print_manifest(&manifest);
    Ok(if manifest.status.is_success() { 0 } else { 1 })
}

async fn cmd_status(config_path: Option<&Path>, json: bool) -> Result<i32> {
    let config = resolve_config(config_path)?;
    let db_path = config.database.resolved_path()?;
    let storage = Storage::open_readonly(&db_path).await?;

    let Some(manifest) = storage.latest_run_manifest().await? else {
        println!("no runs recorded in {}", db_path.display());
        return Ok(0);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
    } else {
        print_manifest(&manifest);
    }
    Ok(if manifest.status == RunStatus::Failed { 1 } else { 0 })
}

async fn cmd_config_init() -> Result<i32> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(0)
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<i32> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(0)
}

fn print_manifest(manifest: &RunManifest) {
    let counts = &manifest.counts;
    println!();
    println!("  Run:       {}", manifest.id);
    println!("  Mode:      {}", manifest.mode);
    println!("  Status:    {}", manifest.status);
    println!("  Started:   {}", manifest.started_at.to_rfc3339());
    if let Some(finished) = manifest.finished_at {
        let elapsed = (finished - manifest.started_at).num_milliseconds().max(0);
        println!("  Finished:  {}", finished.to_rfc3339());
        println!("  Time:      {:.1}s", elapsed as f64 / 1000.0);
    }
    println!("  Fetched:   {}", counts.fetched);
    println!("  New:       {}", counts.new);
    println!("  Changed:   {}", counts.changed);
    println!("  Unchanged: {}", counts.unchanged);
    println!("  Failed:    {}", counts.failed);
    if let Some(error) = &manifest.error {
        println!("  Error:     {error}");
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, phase: RunPhase) {
        self.spinner.set_message(phase.to_string());
    }

    fn target_finished(&self, url: &str, counts: &RunCounts) {
        self.spinner.set_message(format!(
            "[new {} changed {} unchanged {} failed {}] {url}",
            counts.new, counts.changed, counts.unchanged, counts.failed
        ));
    }

    fn done(&self, _manifest: &RunManifest) {
        self.spinner.finish_and_clear();
    }
}
