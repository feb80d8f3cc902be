//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use reportharvest_archive::ArchiveSummary;
use reportharvest_core::{HarvestReport, PassReport, ProgressReporter};
use reportharvest_shared::{
    AppConfig, HarvestSettings, ItemOutcome, PassKind, PassSummary, RunProgress,
    SettingsOverrides, WorkItem, init_config, load_config, load_config_from,
};
use reportharvest_storage::OutputStore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// ReportHarvest: batch-download rendered reports and archive them as CSV.
#[derive(Parser)]
#[command(
    name = "reportharvest",
    version,
    about = "Fetch one rendered report per identifier, convert each to CSV, and pack them into a ZIP.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file to use instead of ~/.reportharvest/reportharvest.toml.
    #[arg(long, global = true, env = "REPORTHARVEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
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
    /// Run the full batch: initial pass, retry pass, archive.
    Run {
        /// Concurrent item pipelines.
        #[arg(short, long)]
        workers: Option<usize>,

        /// File with one identifier per line.
        #[arg(short, long)]
        ids: Option<PathBuf>,

        /// Route requests through the configured proxy.
        #[arg(short, long)]
        proxy: bool,

        /// Output archive path.
        #[arg(short = 'z', long)]
        archive: Option<PathBuf>,

        /// Directory holding one CSV per identifier.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the run report as JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },

    /// Download and convert a single identifier.
    Fetch {
        /// Identifier to fetch.
        id: WorkItem,

        /// Directory holding one CSV per identifier.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Route requests through the configured proxy.
        #[arg(short, long)]
        proxy: bool,
    },

    /// Pack the existing outputs into the archive without fetching.
    Pack {
        /// Directory holding one CSV per identifier.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output archive path.
        #[arg(short = 'z', long)]
        archive: Option<PathBuf>,
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

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "reportharvest=info",
        1 => "reportharvest=debug",
        _ => "reportharvest=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
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

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run {
            workers,
            ids,
            proxy,
            archive,
            output,
            json,
        } => {
            let overrides = SettingsOverrides {
                workers,
                ids,
                output_dir: output,
                archive,
                use_proxy: proxy,
            };
            cmd_run(config_path, &overrides, json).await
        }
        Command::Fetch { id, output, proxy } => {
            let overrides = SettingsOverrides {
                output_dir: output,
                use_proxy: proxy,
                ..SettingsOverrides::default()
            };
            cmd_fetch(config_path, &overrides, &id).await
        }
        Command::Pack { output, archive } => {
            let overrides = SettingsOverrides {
                output_dir: output,
                archive,
                ..SettingsOverrides::default()
            };
            cmd_pack(config_path, &overrides).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn load(config_path: Option<&Path>) -> Result<AppConfig> {
    let config = match config_path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

fn resolve(config_path: Option<&Path>, overrides: &SettingsOverrides) -> Result<HarvestSettings> {
    Ok(HarvestSettings::resolve(&load(config_path)?, overrides)?)
}

/// Cancel `token` on the first Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, letting in-flight items finish");
            token.cancel();
        }
    });
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<&Path>, overrides: &SettingsOverrides, json: bool) -> Result<()> {
    let settings = resolve(config_path, overrides)?;

    info!(
        workers = settings.workers,
        ids = %settings.ids_path.display(),
        output = %settings.output_dir.display(),
        proxy = settings.proxy.as_ref().map(|p| p.as_str()).unwrap_or("none"),
        "starting run"
    );

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let reporter = CliProgress::new()?;
    let report = reportharvest_core::harvest(&settings, &reporter, &cancel).await;
    reporter.finish();
    let report = report?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

async fn cmd_fetch(
    config_path: Option<&Path>,
    overrides: &SettingsOverrides,
    item: &WorkItem,
) -> Result<()> {
    let settings = resolve(config_path, overrides)?;
    let outcome = reportharvest_core::fetch_one(&settings, item).await?;

    let path = settings.output_dir.join(format!("{item}.csv"));
    match outcome {
        ItemOutcome::Success => println!("  Saved {}", path.display()),
        ItemOutcome::AlreadyDone => println!("  Already present: {}", path.display()),
        ItemOutcome::TransientFailure(reason) => {
            return Err(eyre!("{item} failed (transient): {reason}"));
        }
        ItemOutcome::PermanentFailure(reason) => {
            return Err(eyre!("{item} failed (permanent): {reason}"));
        }
    }
    Ok(())
}

async fn cmd_pack(config_path: Option<&Path>, overrides: &SettingsOverrides) -> Result<()> {
    let settings = resolve(config_path, overrides)?;
    if !settings.output_dir.is_dir() {
        return Err(eyre!(
            "output directory '{}' does not exist",
            settings.output_dir.display()
        ));
    }

    let store = OutputStore::open(&settings.output_dir)?;
    let reporter = CliProgress::new()?;
    let summary = reportharvest_core::pack(&store, &settings.archive_path, &reporter).await;
    reporter.finish();
    let summary = summary?;

    print_archive(&summary);
    Ok(())
}

fn cmd_config_init(config_path: Option<&Path>) -> Result<()> {
    let path = match config_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, toml::to_string_pretty(&AppConfig::default())?)?;
            path.to_path_buf()
        }
        None => init_config()?,
    };
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = load(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_report(report: &HarvestReport) {
    let run = &report.run;
    println!();
    println!("  Identifiers:  {}", run.total);
    println!("  Already done: {}", run.already_done);
    println!("  Pending:      {}", run.pending);
    print_pass(&run.initial);
    if let Some(retry) = &run.retry {
        print_pass(retry);
    }

    if run.missing.is_empty() {
        println!("  Missing:      0");
    } else {
        println!("  Missing:      {}", run.missing.len());
        let failures = run.retry.as_ref().unwrap_or(&run.initial).failures.iter();
        for failed in failures.take(20) {
            let class = if failed.permanent { "permanent" } else { "transient" };
            println!("    {} ({class}): {}", failed.item, failed.reason);
        }
        if run.missing.len() > 20 {
            println!("    ... and {} more", run.missing.len() - 20);
        }
    }

    if run.cancelled {
        println!("  Run cancelled: retry pass and archive skipped.");
    }
    if let Some(archive) = &report.archive {
        print_archive(archive);
    }
    if let Some(reason) = &report.archive_error {
        println!("  Archive:      failed: {reason}");
    }
    println!(
        "  Time:         {:.1}s",
        (report.finished_at - report.started_at).num_milliseconds() as f64 / 1000.0
    );
    println!();
}

fn print_pass(pass: &PassReport) {
    let s = &pass.summary;
    println!(
        "  {:<13} {} submitted, {} ok, {} skipped, {} transient, {} permanent ({:.1}s)",
        format!("{} pass:", s.kind),
        s.progress.submitted,
        s.progress.succeeded,
        s.progress.skipped,
        s.progress.failed_transient,
        s.progress.failed_permanent,
        s.elapsed.as_secs_f64(),
    );
}

fn print_archive(summary: &ArchiveSummary) {
    println!(
        "  Archive:      {} ({} entries)",
        summary.path.display(),
        summary.entries.len()
    );
    for skipped in &summary.skipped {
        println!("    skipped {}: {}", skipped.name, skipped.reason);
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using one indicatif bar reused across passes.
struct CliProgress {
    bar: ProgressBar,
    pass_style: ProgressStyle,
    spinner_style: ProgressStyle,
}

impl CliProgress {
    fn new() -> Result<Self> {
        let pass_style = ProgressStyle::with_template(
            "{prefix:>8.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg} ({eta})",
        )?
        .progress_chars("=> ");
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {msg}")?
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);

        Ok(Self {
            bar: ProgressBar::hidden(),
            pass_style,
            spinner_style,
        })
    }

    /// Clear whatever bar or spinner is still live.
    fn finish(&self) {
        self.bar.disable_steady_tick();
        self.bar.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn pass_started(&self, kind: PassKind, total: usize) {
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar.reset();
        self.bar.set_style(self.pass_style.clone());
        self.bar.set_length(total as u64);
        self.bar.set_prefix(kind.to_string());
        self.bar.set_message("");
    }

    fn item_finished(&self, _item: &WorkItem, _outcome: &ItemOutcome, progress: &RunProgress) {
        self.bar.inc(1);
        self.bar.set_message(format!(
            "ok {} · failed {}",
            progress.succeeded + progress.skipped,
            progress.failed()
        ));
    }

    fn pass_finished(&self, summary: &PassSummary) {
        self.bar.finish_and_clear();
        if summary.cancelled {
            warn!(
                pass = %summary.kind,
                submitted = summary.progress.submitted,
                total = summary.total,
                "pass cancelled"
            );
        }
    }

    fn archive_started(&self, dest: &Path) {
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar.reset();
        self.bar.set_style(self.spinner_style.clone());
        self.bar.set_message(format!("Writing {}", dest.display()));
        self.bar.enable_steady_tick(Duration::from_millis(80));
    }

    fn archive_finished(&self, _summary: &ArchiveSummary) {
        self.bar.disable_steady_tick();
        self.bar.finish_and_clear();
    }
}
