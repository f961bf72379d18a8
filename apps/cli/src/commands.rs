//! CLI command definitions, routing, and tracing setup.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use kanjigen_backend::{Backend, build_backend};
use kanjigen_core::{DispatchProgress, Dispatcher, PromptTemplate, RunOptions, RunSummary};
use kanjigen_extract::Extractor;
use kanjigen_shared::{AppConfig, BackendKind, ItemStatus, init_config, load_config, load_config_from};
use kanjigen_storage::{JobStore, write_atomic};
use tokio::sync::Mutex;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// kanjigen: generate kanji dictionary entries with an assistant CLI.
#[derive(Parser)]
#[command(
    name = "kanjigen",
    version,
    about = "Resumable, concurrent generation of kanji dictionary entries.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Job store file (defaults to `defaults.store_path`).
    #[arg(long, env = "KANJIGEN_STORE", global = true)]
    pub store: Option<PathBuf>,

    /// Seed enumeration used when the store does not exist yet.
    #[arg(long, env = "KANJIGEN_SEED", global = true)]
    pub seed: Option<PathBuf>,

    /// Config file (defaults to ~/.kanjigen/kanjigen.toml).
    #[arg(long, env = "KANJIGEN_CONFIG", global = true)]
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
    /// Generate every pending item.
    Run {
        /// Maximum concurrent backend invocations.
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Process at most this many pending items.
        #[arg(short, long)]
        limit: Option<usize>,

        /// Per-invocation timeout in seconds.
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Extra attempts per item after the first.
        #[arg(long)]
        max_retries: Option<u32>,

        /// Reset failed items to pending before the run.
        #[arg(long)]
        retry_failed: bool,

        /// Backend to use: claude or codex.
        #[arg(short, long)]
        backend: Option<BackendKind>,
    },

    /// Generate a single item regardless of its status.
    One {
        /// Item id (a single kanji).
        id: String,

        /// Per-invocation timeout in seconds.
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Extra attempts after the first.
        #[arg(long, default_value_t = 0)]
        max_retries: u32,

        /// Backend to use: claude or codex.
        #[arg(short, long)]
        backend: Option<BackendKind>,
    },

    /// Show store progress.
    Status {
        /// List failed items with their last error.
        #[arg(long)]
        failed: bool,

        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Render completed items as Markdown.
    Render {
        /// Write one `<id>.md` per item here instead of printing to stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Render only this item.
        #[arg(long)]
        id: Option<String>,
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
        0 => "kanjigen=info",
        1 => "kanjigen=debug",
        _ => "kanjigen=trace",
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

/// Paths and config shared by every command.
struct Context {
    config: AppConfig,
    store_path: PathBuf,
    seed_path: PathBuf,
}

impl Context {
    fn resolve(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => load_config_from(path)?,
            None => load_config()?,
        };
        config.apply_env_overrides();

        let store_path = cli
            .store
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.defaults.store_path));
        let seed_path = cli
            .seed
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.defaults.seed_path));

        Ok(Self {
            config,
            store_path,
            seed_path,
        })
    }

    fn open_store(&self) -> Result<JobStore> {
        Ok(JobStore::open_or_init(&self.store_path, &self.seed_path)?)
    }

    /// Existing store only; read-only commands never create one.
    fn open_existing_store(&self) -> Result<JobStore> {
        if !self.store_path.exists() {
            return Err(eyre!(
                "no job store at {}; run `kanjigen run` first",
                self.store_path.display()
            ));
        }
        Ok(JobStore::open(&self.store_path)?)
    }

    fn dispatcher(&self) -> Result<Dispatcher> {
        Ok(Dispatcher::new(
            Extractor::from_config(&self.config.extract),
            PromptTemplate::from_config(&self.config.defaults)?,
        ))
    }
}

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&Context::resolve(&cli)?),
        };
    }

    let ctx = Context::resolve(&cli)?;
    match cli.command {
        Command::Run {
            concurrency,
            limit,
            timeout,
            max_retries,
            retry_failed,
            backend,
        } => {
            let kind = backend.unwrap_or(ctx.config.defaults.backend);
            let mut options = RunOptions::from_config(&ctx.config, kind);
            if let Some(n) = concurrency {
                options.concurrency = n.max(1);
            }
            if let Some(secs) = timeout {
                options.timeout = Duration::from_secs(secs);
            }
            if let Some(n) = max_retries {
                options.max_retries = n;
            }
            options.limit = limit.filter(|n| *n > 0);
            options.requeue_failed |= retry_failed;
            cmd_run(&ctx, kind, &options).await
        }
        Command::One {
            id,
            timeout,
            max_retries,
            backend,
        } => {
            let kind = backend.unwrap_or(ctx.config.defaults.backend);
            let mut options = RunOptions::from_config(&ctx.config, kind);
            if let Some(secs) = timeout {
                options.timeout = Duration::from_secs(secs);
            }
            options.max_retries = max_retries;
            cmd_one(&ctx, kind, &id, &options).await
        }
        Command::Status { failed, json } => cmd_status(&ctx, failed, json),
        Command::Render { out, id } => cmd_render(&ctx, out.as_deref(), id.as_deref()),
        Command::Config { .. } => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(ctx: &Context, kind: BackendKind, options: &RunOptions) -> Result<()> {
    let store = ctx.open_store()?;
    let backend = Arc::new(build_backend(kind, &ctx.config));

    info!(
        store = %ctx.store_path.display(),
        backend = backend.name(),
        concurrency = options.concurrency,
        "starting generation"
    );

    let progress = Arc::new(CliProgress::new());
    let summary = ctx
        .dispatcher()?
        .run(Arc::new(Mutex::new(store)), backend, options, progress)
        .await?;

    println!();
    if summary.attempted == 0 && summary.skipped == 0 {
        println!("  Nothing pending.");
    } else {
        println!("  Run finished.");
        println!("  Completed: {}", summary.completed);
        println!("  Failed:    {}", summary.failed);
        if summary.requeued > 0 {
            println!("  Requeued:  {}", summary.requeued);
        }
        if summary.commit_errors > 0 {
            println!("  Unsaved:   {}", summary.commit_errors);
        }
    }
    println!("  Store:     {}/{}", summary.store_completed, summary.store_total);
    println!("  Time:      {:.1}s", summary.elapsed.as_secs_f64());
    println!();

    Ok(())
}

async fn cmd_one(ctx: &Context, kind: BackendKind, id: &str, options: &RunOptions) -> Result<()> {
    let mut store = ctx.open_store()?;
    let backend = build_backend(kind, &ctx.config);

    info!(id, backend = backend.name(), timeout_s = options.timeout.as_secs(), "generating single item");
    let item = ctx
        .dispatcher()?
        .run_one(&mut store, &backend, id, options)
        .await?;

    match item.state.last_error() {
        None => println!("{id}: completed"),
        Some(error) => println!("{id}: failed | {error}"),
    }
    Ok(())
}

fn cmd_status(ctx: &Context, list_failed: bool, json: bool) -> Result<()> {
    let store = ctx.open_existing_store()?;
    let meta = store.meta();

    // group -> [pending, completed, failed]
    let mut by_group: BTreeMap<u32, [usize; 3]> = BTreeMap::new();
    for (_, entry) in store.items() {
        let counts = by_group.entry(entry.group).or_default();
        match entry.state.status() {
            ItemStatus::Pending => counts[0] += 1,
            ItemStatus::Completed => counts[1] += 1,
            ItemStatus::Failed => counts[2] += 1,
        }
    }
    let failed = store.failed_items();

    if json {
        let groups: serde_json::Map<String, serde_json::Value> = by_group
            .iter()
            .map(|(group, [p, c, f])| {
                (
                    group.to_string(),
                    serde_json::json!({"pending": p, "completed": c, "failed": f}),
                )
            })
            .collect();
        let mut doc = serde_json::json!({
            "total": meta.total,
            "completed": meta.completed,
            "pending": store.pending_items().len(),
            "failed": failed.len(),
            "last_updated": meta.last_updated.to_rfc3339(),
            "groups": groups,
        });
        if list_failed {
            doc["failed_items"] = failed
                .iter()
                .map(|item| {
                    serde_json::json!({
                        "id": item.id,
                        "group": item.group,
                        "last_error": item.state.last_error(),
                    })
                })
                .collect();
        }
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!();
    println!("  Store:     {}", ctx.store_path.display());
    println!("  Completed: {}/{}", meta.completed, meta.total);
    println!("  Failed:    {}", failed.len());
    println!("  Updated:   {}", meta.last_updated.to_rfc3339());
    println!();
    println!("  Group  Pending  Completed  Failed");
    for (group, [p, c, f]) in &by_group {
        println!("  {group:>5}  {p:>7}  {c:>9}  {f:>6}");
    }

    if list_failed && !failed.is_empty() {
        println!();
        for item in &failed {
            println!(
                "  [{}] {} | {}",
                item.group,
                item.id,
                item.state.last_error().unwrap_or_default()
            );
        }
    }
    println!();

    Ok(())
}

fn cmd_render(ctx: &Context, out: Option<&Path>, only: Option<&str>) -> Result<()> {
    let store = ctx.open_existing_store()?;

    let items = match only {
        Some(id) => {
            let item = store
                .get(id)
                .ok_or_else(|| eyre!("unknown item '{id}'"))?;
            if !item.state.is_completed() {
                return Err(eyre!("item '{id}' is {}, not completed", item.state.status()));
            }
            vec![item]
        }
        None => store.completed_items(),
    };

    let mut written = 0;
    let mut invalid = 0;
    for item in &items {
        let Some(payload) = item.state.payload() else {
            continue;
        };
        let markdown = match kanjigen_render::render(&item.id, payload) {
            Ok(md) => md,
            Err(e) => {
                warn!(id = %item.id, error = %e, "skipping record that cannot be rendered");
                invalid += 1;
                continue;
            }
        };

        match out {
            Some(dir) => {
                let Some(path) = rendered_path(dir, &item.id) else {
                    warn!(id = %item.id, "skipping item whose id is not a plain file name");
                    invalid += 1;
                    continue;
                };
                write_atomic(&path, markdown.as_bytes())?;
            }
            None => {
                println!("=== {} ===", item.id);
                println!("{markdown}");
            }
        }
        written += 1;
    }

    info!(written, invalid, "render finished");
    if let Some(dir) = out {
        eprintln!("Rendered {written} item(s) to {}", dir.display());
    }
    Ok(())
}

/// `<dir>/<id>.md`, or `None` if `id` would escape `dir`.
fn rendered_path(dir: &Path, id: &str) -> Option<PathBuf> {
    if id.contains(['/', '\\']) {
        return None;
    }
    let mut components = Path::new(id).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Some(dir.join(format!("{id}.md"))),
        _ => None,
    }
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(ctx: &Context) -> Result<()> {
    let toml_str = toml::to_string_pretty(&ctx.config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::hidden();
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} [{elapsed_precise}] {bar:30.cyan/blue} {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        bar.set_style(style);
        Self { bar }
    }
}

impl DispatchProgress for CliProgress {
    fn started(&self, total: usize) {
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar.set_length(total as u64);
        self.bar.enable_steady_tick(Duration::from_millis(80));
    }

    fn item_started(&self, id: &str, idx: usize, total: usize) {
        self.bar.set_message(format!("[{idx}/{total}] generating {id}"));
    }

    fn item_finished(&self, id: &str, ok: bool, done: usize, _total: usize) {
        self.bar.set_position(done as u64);
        if !ok {
            self.bar.println(format!("  failed: {id}"));
        }
    }

    fn finished(&self, _summary: &RunSummary) {
        self.bar.finish_and_clear();
    }
}
