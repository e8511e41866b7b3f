//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use protocolsio_client::PageFetcher;
use protocolsio_core::{Checkpoint, HarvestOptions, Harvester, Printer, Saver};
use protocolsio_index::{BulkIndexer, HttpIndexSink, IndexSink, UploadOptions};
use protocolsio_shared::{
    ApiConfig, AppConfig, IndexConfig, PageRange, ProgressReporter, SilentProgress, init_config,
    load_config, load_config_from,
};
use protocolsio_storage::ArtifactStore;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// protocolsio: harvest protocols.io and bulk-index the results.
#[derive(Parser)]
#[command(
    name = "protocolsio",
    version,
    about = "Download protocols from protocols.io and bulk-index them into a search service.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.protocolsio/protocolsio.toml).
    #[arg(long, global = true)]
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
    /// Query and download protocols.
    Protocols {
        #[command(subcommand)]
        action: ProtocolsAction,
    },

    /// Bulk-index downloaded protocols.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// List query flags shared by `list` and `download`.
#[derive(Args, Debug, Clone)]
pub(crate) struct QueryArgs {
    /// Pages to fetch: N, N-M or N- (to the end).
    #[arg(long, default_value = "1")]
    pub pages: PageRange,

    /// Items per page.
    #[arg(long, default_value_t = 20)]
    pub size: u64,

    /// Stop after this many items (0 for no cap; overrides --pages' end).
    #[arg(long, default_value_t = 0)]
    pub total: u64,

    /// public, user_public, user_private or shared_with_user.
    #[arg(long, default_value = "public")]
    pub filter: String,

    /// activity, relevance, date, name or id.
    #[arg(long, default_value = "activity")]
    pub order: String,

    /// asc or desc.
    #[arg(long, default_value = "asc")]
    pub sort: String,
}

impl QueryArgs {
    fn options(&self) -> HarvestOptions {
        HarvestOptions {
            pages: self.pages,
            page_size: self.size,
            total: self.total,
            filter: self.filter.clone(),
            field_order: self.order.clone(),
            order: self.sort.clone(),
        }
    }
}

/// `protocols` subcommands.
#[derive(Subcommand)]
pub(crate) enum ProtocolsAction {
    /// Print one line per protocol.
    List {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Save protocols and their full records, with a checkpoint per page.
    Download {
        #[command(flatten)]
        query: QueryArgs,

        /// Directory to save into (defaults to the resumed checkpoint's directory, then [cache].path).
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Continue from a checkpoint file; query flags are then ignored.
        #[arg(long)]
        resume: Option<PathBuf>,
    },

    /// Print the raw records of the given protocol ids.
    Get {
        #[arg(required = true)]
        ids: Vec<u64>,
    },
}

/// `index` subcommands.
#[derive(Subcommand)]
pub(crate) enum IndexAction {
    /// Upload every downloaded record in a directory.
    Bulk {
        /// Directory of previously downloaded protocols.
        dir: PathBuf,

        /// Id of this bulk upload.
        #[arg(long, default_value = "upload")]
        upload_id: String,

        /// Restart an upload with the same id.
        #[arg(long)]
        force_restart: bool,

        /// Records per request (defaults to [index].batch_size).
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Print the number of indexed documents.
    Stats,
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

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "protocolsio=info",
        1 => "protocolsio=debug",
        _ => "protocolsio=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // stdout carries listings and raw records; logs go to stderr.
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

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Protocols { action } => {
            let config = app_config(config_path)?;
            let cancel = cancel_on_ctrl_c();
            match action {
                ProtocolsAction::List { query } => cmd_list(&config, &query, &cancel).await,
                ProtocolsAction::Download {
                    query,
                    cache_dir,
                    resume,
                } => {
                    cmd_download(
                        &config,
                        &query,
                        cache_dir.as_deref(),
                        resume.as_deref(),
                        &cancel,
                    )
                    .await
                }
                ProtocolsAction::Get { ids } => cmd_get(&config, &ids, &cancel).await,
            }
        }
        Command::Index { action } => {
            let config = app_config(config_path)?;
            match action {
                IndexAction::Bulk {
                    dir,
                    upload_id,
                    force_restart,
                    batch_size,
                } => {
                    cmd_index_bulk(
                        &config,
                        &dir,
                        &upload_id,
                        force_restart,
                        batch_size,
                        &cancel_on_ctrl_c(),
                    )
                    .await
                }
                IndexAction::Stats => cmd_index_stats(&config).await,
            }
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn app_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

/// A token that is cancelled on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping");
            token.cancel();
        }
    });
    cancel
}

// ---------------------------------------------------------------------------
// protocols
// ---------------------------------------------------------------------------

async fn cmd_list(config: &AppConfig, query: &QueryArgs, cancel: &CancellationToken) -> Result<()> {
    let api = ApiConfig::from_app(config)?;
    let checkpoint = Checkpoint::from_options(&query.options())?;
    let harvester = Harvester::new(PageFetcher::new(&api)?, api.list_endpoint.clone())
        .with_queue_capacity(config.harvest.queue_capacity);

    let mut printer = Printer::stdout();
    harvester
        .run(checkpoint, &mut printer, &SilentProgress, cancel)
        .await?;
    Ok(())
}

async fn cmd_download(
    config: &AppConfig,
    query: &QueryArgs,
    cache_dir: Option<&Path>,
    resume: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<()> {
    let api = ApiConfig::from_app(config)?;

    let checkpoint = match resume {
        Some(path) => {
            let checkpoint = Checkpoint::load(path)?;
            info!(
                checkpoint = %path.display(),
                next_page = checkpoint.pages.from,
                delivered = checkpoint.items_delivered,
                "resuming harvest"
            );
            checkpoint
        }
        None => Checkpoint::from_options(&query.options())?,
    };

    let dir = resolve_cache_dir(config, cache_dir, resume)?;
    let store = ArtifactStore::open(&dir)?;
    let fetcher = PageFetcher::new(&api)?;
    let harvester = Harvester::new(fetcher.clone(), api.list_endpoint.clone())
        .with_queue_capacity(config.harvest.queue_capacity);

    info!(dir = %dir.display(), "downloading protocols");
    let mut saver = Saver::new(store, fetcher);
    let reporter = CliProgress::new();
    let summary = harvester.run(checkpoint, &mut saver, &reporter, cancel).await?;

    println!();
    println!("  Download complete!");
    println!("  Pages:      {}", summary.pages);
    println!("  Items:      {}", summary.items);
    println!("  Downloaded: {}", saver.downloaded());
    println!("  Up to date: {}", saver.up_to_date());
    println!("  Path:       {}", dir.display());
    println!("  Time:       {:.1}s", summary.elapsed.as_secs_f64());
    println!();

    Ok(())
}

/// `--cache-dir`, then the directory of the checkpoint being resumed, then
/// `[cache].path`.
fn resolve_cache_dir(
    config: &AppConfig,
    cache_dir: Option<&Path>,
    resume: Option<&Path>,
) -> Result<PathBuf> {
    if let Some(dir) = cache_dir {
        return Ok(dir.to_path_buf());
    }
    if let Some(parent) = resume.and_then(Path::parent) {
        if parent.as_os_str().is_empty() {
            return Ok(PathBuf::from("."));
        }
        return Ok(parent.to_path_buf());
    }
    if !config.cache.path.is_empty() {
        return Ok(PathBuf::from(&config.cache.path));
    }
    Err(eyre!("no cache directory: pass --cache-dir or set [cache].path"))
}

async fn cmd_get(config: &AppConfig, ids: &[u64], cancel: &CancellationToken) -> Result<()> {
    let api = ApiConfig::from_app(config)?;
    let fetcher = PageFetcher::new(&api)?;

    let mut failures = Vec::new();
    for &id in ids {
        match fetcher.fetch_item(id, cancel).await {
            Ok(fetched) => println!("{}", String::from_utf8_lossy(&fetched.body).trim_end()),
            Err(e) => {
                warn!(id, error = %e, "failed to get protocol");
                failures.push(format!("{id}: {e}"));
            }
        }
    }
    if !failures.is_empty() {
        return Err(eyre!(
            "{} of {} protocol(s) failed: {}",
            failures.len(),
            ids.len(),
            failures.join("; ")
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// index
// ---------------------------------------------------------------------------

async fn cmd_index_bulk(
    config: &AppConfig,
    dir: &Path,
    upload_id: &str,
    force_restart: bool,
    batch_size: Option<usize>,
    cancel: &CancellationToken,
) -> Result<()> {
    let index = IndexConfig::from_app(config)?;
    let mut options = UploadOptions::from_config(&index, upload_id);
    options.force_restart = force_restart;
    if let Some(size) = batch_size {
        if size == 0 {
            return Err(eyre!("--batch-size must be at least 1"));
        }
        options.batch_size = size;
    }

    info!(
        dir = %dir.display(),
        upload_id,
        force_restart,
        batch_size = options.batch_size,
        "bulk indexing"
    );
    let indexer = BulkIndexer::new(HttpIndexSink::new(&index)?, options);
    let reporter = CliProgress::new();
    let stats = indexer.run(dir, &reporter, cancel).await?;

    println!();
    println!("  Indexing complete!");
    println!("  Documents: {}", stats.documents);
    println!("  Requests:  {}", stats.requests);
    println!("  Avg/doc:   {:?}", stats.average_per_document());
    println!("  Docs/sec:  {:.1}", stats.documents_per_second());
    println!("  Time:      {:.1}s", stats.elapsed.as_secs_f64());
    println!();

    Ok(())
}

async fn cmd_index_stats(config: &AppConfig) -> Result<()> {
    let index = IndexConfig::from_app(config)?;
    let sink = HttpIndexSink::new(&index)?;
    let count = sink.document_count(&index.datasource).await?;
    println!("{}: {count} document(s)", index.datasource);
    Ok(())
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
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn page_processed(&self, current_page: u64, total_pages: u64, items: usize) {
        self.spinner
            .set_message(format!("Saved page [{current_page}/{total_pages}] ({items} items)"));
    }

    fn batch_indexed(&self, batch_docs: usize, total_docs: usize) {
        self.spinner
            .set_message(format!("Indexed {batch_docs} documents ({total_docs} total)"));
    }

    fn done(&self) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let mut config = app_config(path)?;
    for token in [&mut config.auth.token, &mut config.index.token] {
        if token.is_some() {
            *token = Some("<redacted>".into());
        }
    }
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_download_flags() {
        let cli = Cli::try_parse_from([
            "protocolsio",
            "protocols",
            "download",
            "--pages",
            "3-",
            "--total",
            "25",
            "--sort",
            "desc",
            "--cache-dir",
            "/tmp/p",
        ])
        .unwrap();
        let Command::Protocols {
            action: ProtocolsAction::Download { query, cache_dir, resume },
        } = cli.command
        else {
            panic!("expected protocols download");
        };
        let options = query.options();
        assert_eq!(options.pages, "3-".parse::<PageRange>().unwrap());
        assert_eq!(options.total, 25);
        assert_eq!(options.order, "desc");
        assert_eq!(options.field_order, "activity");
        assert_eq!(cache_dir, Some(PathBuf::from("/tmp/p")));
        assert!(resume.is_none());
    }

    #[test]
    fn cli_rejects_bad_page_range() {
        assert!(Cli::try_parse_from(["protocolsio", "protocols", "list", "--pages", "5-2"]).is_err());
    }

    #[test]
    fn cache_dir_precedence() {
        let mut config = AppConfig::default();
        let resume = Path::new("/data/run/checkpoint_00002_00009.json");

        assert!(resolve_cache_dir(&config, None, None).is_err());
        config.cache.path = "/var/cache/protocols".into();
        assert_eq!(
            resolve_cache_dir(&config, None, None).unwrap(),
            PathBuf::from("/var/cache/protocols")
        );
        assert_eq!(
            resolve_cache_dir(&config, None, Some(resume)).unwrap(),
            PathBuf::from("/data/run")
        );
        assert_eq!(
            resolve_cache_dir(&config, None, Some(Path::new("checkpoint_00001_00002.json")))
                .unwrap(),
            PathBuf::from(".")
        );
        assert_eq!(
            resolve_cache_dir(&config, Some(Path::new("/x")), Some(resume)).unwrap(),
            PathBuf::from("/x")
        );
    }
}
