use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use enricher_core::config_file::{self, ConfigFile};
use enricher_core::fetch::{self, FetchStats};
use enricher_core::service::{GoogleTranslate, OpenAiService};
use enricher_core::translate::{self, Translator};
use enricher_core::transcribe;
use enricher_core::{Catalog, Config, ProgressEvent, Region, RunMode, Verifier};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod output;

use output::ColorMode;

/// Exit status when at least one entry failed.
const EXIT_ENTRY_FAILURES: u8 = 2;

/// Catalog enricher - extract structured metadata from historical title pages
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file to use instead of the platform and ./.enricher.toml files
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract features from catalog entries and merge them into the CSV
    Run {
        /// Catalog CSV file, rewritten in place unless --output is given
        catalog: PathBuf,

        /// Which stages to run: extract, merge or both
        #[arg(long)]
        mode: Option<RunMode>,

        /// Source region: title-page or imprint
        #[arg(long)]
        region: Option<Region>,

        /// Delete cached responses for the region before extracting
        #[arg(long)]
        reset_cache: bool,

        /// Root directory of the response cache
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Minimum length of the source text, in characters
        #[arg(long)]
        min_length: Option<usize>,

        /// Comma-separated list of entry keys to process
        #[arg(long, value_delimiter = ',')]
        keys: Vec<String>,

        /// Write the enriched catalog here instead
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Dry run: show which entries would be extracted without calling the model
        #[arg(long)]
        dry_run: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Report extracted values that do not occur in the entry's title
    Verify {
        /// Catalog CSV file
        catalog: PathBuf,

        /// Extra columns holding comma-separated lists
        #[arg(long)]
        split_column: Vec<String>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Translate non-English titles, colophons and imprints to English
    Translate {
        /// Catalog CSV file, rewritten in place
        catalog: PathBuf,

        /// Translation backend
        #[arg(long, value_enum, default_value_t = Backend::Google)]
        backend: Backend,

        /// Dry run: list the entries that would be translated
        #[arg(long)]
        dry_run: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Print the extraction instructions sent to the model
    Prompt {
        /// Source region: title-page or imprint
        #[arg(long)]
        region: Option<Region>,
    },

    /// Download scan PDFs for every entry with a supported scan URL
    FetchPdfs {
        /// Catalog CSV files
        #[arg(required = true)]
        catalogs: Vec<PathBuf>,

        /// Directory the PDFs are written to
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Number of concurrent downloads
        #[arg(long)]
        workers: Option<usize>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// List entries whose scan PDF has not been downloaded, by domain
    MissingPdfs {
        /// Catalog CSV files
        #[arg(required = true)]
        catalogs: Vec<PathBuf>,

        /// Directory the PDFs were written to
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Transcribe the title-page images in a directory into a CSV
    Transcribe {
        /// Directory of .jpg/.jpeg/.png images
        dir: PathBuf,

        /// CSV file to write
        #[arg(short, long, default_value = "transcriptions.csv")]
        output: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Backend {
    /// Google Cloud Translation
    Google,
    /// The configured language model
    Llm,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let file = load_config_file(cli.config.as_deref())?;

    match cli.command {
        Command::Run {
            catalog,
            mode,
            region,
            reset_cache,
            cache_dir,
            min_length,
            keys,
            output,
            dry_run,
            no_color,
        } => {
            let mut config = resolve_config(&file)?;
            if let Some(mode) = mode {
                config.mode = mode;
            }
            if let Some(region) = region {
                config.set_region(region)?;
            }
            if reset_cache {
                config.reset_cache = true;
            }
            if let Some(dir) = cache_dir {
                config.cache_root = dir;
            }
            if let Some(n) = min_length {
                config.min_source_len = n;
            }
            if !keys.is_empty() {
                config.filter.keys = Some(keys);
            }
            let color = ColorMode(!no_color);
            if dry_run {
                dry_run_batch(&catalog, &config, color)
            } else {
                run(&catalog, output.as_deref(), config, color).await
            }
        }
        Command::Verify {
            catalog,
            split_column,
            no_color,
        } => verify(&catalog, split_column, ColorMode(!no_color)),
        Command::Translate {
            catalog,
            backend,
            dry_run,
            no_color,
        } => {
            let config = resolve_config(&file)?;
            translate_catalog(&catalog, &config, backend, dry_run, ColorMode(!no_color)).await
        }
        Command::Prompt { region } => {
            let mut config = resolve_config(&file)?;
            if let Some(region) = region {
                config.set_region(region)?;
            }
            print!("{}", enricher_core::prompt::build_instructions(&config.features));
            Ok(ExitCode::SUCCESS)
        }
        Command::FetchPdfs {
            catalogs,
            output_dir,
            workers,
            no_color,
        } => {
            let mut fetch_config = file.fetch_config();
            if let Some(dir) = output_dir {
                fetch_config.output_dir = dir;
            }
            if let Some(n) = workers {
                fetch_config.num_workers = n.max(1);
            }
            fetch_pdfs(&catalogs, fetch_config, ColorMode(!no_color)).await
        }
        Command::MissingPdfs {
            catalogs,
            output_dir,
            no_color,
        } => {
            let dir = output_dir.unwrap_or_else(|| file.fetch_config().output_dir);
            missing_pdfs(&catalogs, &dir, ColorMode(!no_color))
        }
        Command::Transcribe { dir, output } => {
            let config = resolve_config(&file)?;
            transcribe_dir(&dir, &output, &config).await
        }
    }
}

fn load_config_file(explicit: Option<&Path>) -> anyhow::Result<ConfigFile> {
    match explicit {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            config_file::load_from_path(path)
                .ok_or_else(|| anyhow::anyhow!("Could not parse config file {}", path.display()))
        }
        None => Ok(config_file::load_config()),
    }
}

/// Resolve configuration: CLI flags > env vars > config file > defaults.
/// CLI flags are applied by the caller.
fn resolve_config(file: &ConfigFile) -> anyhow::Result<Config> {
    let mut config = Config::default();
    file.apply_to(&mut config)?;

    if let Some(v) = env_var("OPENAI_API_KEY") {
        config.openai_api_key = Some(v);
    }
    if let Some(v) = env_var("OPENAI_BASE_URL") {
        config.openai_base_url = v;
    }
    if let Some(v) = env_var("GOOGLE_ACCESS_TOKEN") {
        config.google_access_token = Some(v);
    }
    if let Some(v) = env_var("GOOGLE_PROJECT_ID") {
        config.google_project_id = Some(v);
    }
    tracing::debug!(?config, "resolved configuration");
    Ok(config)
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn read_catalog(path: &Path) -> anyhow::Result<Catalog> {
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }
    Catalog::read(path).with_context(|| format!("Failed to read catalog {}", path.display()))
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.green} {msg} [{bar:40.green/dim}] {pos}/{len} (eta {eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ")
}

fn progress_bar(len: usize) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    bar.set_style(bar_style());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// Cancel `token` on Ctrl+C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_clone.cancel();
        }
    });
    cancel
}

fn exit_code(has_failures: bool) -> ExitCode {
    if has_failures {
        ExitCode::from(EXIT_ENTRY_FAILURES)
    } else {
        ExitCode::SUCCESS
    }
}

async fn run(
    catalog_path: &Path,
    output: Option<&Path>,
    config: Config,
    color: ColorMode,
) -> anyhow::Result<ExitCode> {
    let mut writer: Box<dyn Write> = Box::new(std::io::stdout());
    let mut catalog = read_catalog(catalog_path)?;

    let service = OpenAiService::from_config(&config);
    if service.is_none() && config.mode.extracts() {
        let msg = "OPENAI_API_KEY is not set; entries will not be extracted";
        if color.enabled() {
            use owo_colors::OwoColorize;
            writeln!(writer, "{}", msg.yellow())?;
        } else {
            writeln!(writer, "{}", msg)?;
        }
    }

    writeln!(
        writer,
        "Processing {} entries from {} ({}, {})",
        catalog.len(),
        catalog_path.display(),
        config.mode,
        config.features.region()
    )?;

    let bar = progress_bar(catalog.len());
    let progress_cb = {
        let bar = bar.clone();
        move |event: ProgressEvent| {
            match &event {
                ProgressEvent::Processing { key, .. } => bar.set_message(key.clone()),
                ProgressEvent::Outcome { .. } => bar.inc(1),
                _ => {}
            }
            bar.suspend(|| {
                let mut out = std::io::stdout();
                let _ = output::print_progress(&mut out, &event, color);
                let _ = out.flush();
            });
        }
    };

    let report = enricher_core::run_batch(
        &mut catalog,
        &config,
        service.as_ref().map(|s| s as &dyn enricher_core::InferenceService),
        progress_cb,
        cancel_on_ctrl_c(),
    )
    .await?;
    bar.finish_and_clear();

    if config.mode.merges() {
        let target = output.unwrap_or(catalog_path);
        catalog
            .write(target)
            .with_context(|| format!("Failed to write catalog {}", target.display()))?;
        writeln!(writer, "Catalog saved to: {}", target.display())?;
    }

    output::print_batch_summary(&mut writer, &report, color)?;
    Ok(exit_code(report.stats.has_failures()))
}

fn dry_run_batch(catalog_path: &Path, config: &Config, color: ColorMode) -> anyhow::Result<ExitCode> {
    let mut writer: Box<dyn Write> = Box::new(std::io::stdout());
    let catalog = read_catalog(catalog_path)?;
    catalog.require_column(config.features.region().source_column())?;

    if color.enabled() {
        use owo_colors::OwoColorize;
        writeln!(
            writer,
            "{} {} ({} entries, region {})\n",
            "DRY RUN:".bold().cyan(),
            catalog_path.display().bold(),
            catalog.len(),
            config.features.region()
        )?;
    } else {
        writeln!(
            writer,
            "DRY RUN: {} ({} entries, region {})\n",
            catalog_path.display(),
            catalog.len(),
            config.features.region()
        )?;
    }

    let selector = config.selector();
    let mut eligible = 0;
    for entry in catalog.entries() {
        let selection = selector.select(entry);
        if selection.is_eligible() {
            eligible += 1;
        }
        output::print_selection(&mut writer, entry.key(), &selection, color)?;
    }
    writeln!(writer)?;
    writeln!(writer, "Total: {} of {} entries would be extracted", eligible, catalog.len())?;
    Ok(ExitCode::SUCCESS)
}

fn verify(catalog_path: &Path, split_columns: Vec<String>, color: ColorMode) -> anyhow::Result<ExitCode> {
    let mut writer: Box<dyn Write> = Box::new(std::io::stdout());
    let catalog = read_catalog(catalog_path)?;
    let verifier = Verifier::default().with_split_columns(split_columns);
    let mismatches = verifier.verify_catalog(&catalog);
    output::print_mismatches(&mut writer, &mismatches, color)?;
    Ok(ExitCode::SUCCESS)
}

async fn translate_catalog(
    catalog_path: &Path,
    config: &Config,
    backend: Backend,
    dry_run: bool,
    color: ColorMode,
) -> anyhow::Result<ExitCode> {
    let mut writer: Box<dyn Write> = Box::new(std::io::stdout());
    let mut catalog = read_catalog(catalog_path)?;
    let selector = config.selector();

    if dry_run {
        let mut count = 0;
        for entry in catalog.entries() {
            if selector.select_for_merge(entry).is_eligible() && translate::needs_translation(entry)
            {
                writeln!(writer, "  {} ({})", entry.key(), entry.language())?;
                count += 1;
            }
        }
        writeln!(writer)?;
        writeln!(writer, "Total: {} entries would be translated", count)?;
        return Ok(ExitCode::SUCCESS);
    }

    let google;
    let llm;
    let translator = match backend {
        Backend::Google => {
            google = GoogleTranslate::from_config(config).ok_or_else(|| {
                anyhow::anyhow!("GOOGLE_ACCESS_TOKEN and GOOGLE_PROJECT_ID must be set")
            })?;
            Translator::Machine(&google)
        }
        Backend::Llm => {
            llm = OpenAiService::from_config(config)
                .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY must be set"))?;
            Translator::Llm(&llm)
        }
    };

    let bar = progress_bar(catalog.len());
    let progress_cb = {
        let bar = bar.clone();
        move |event: ProgressEvent| {
            match &event {
                ProgressEvent::Processing { key, .. } => bar.set_message(key.clone()),
                ProgressEvent::Outcome { .. } => bar.inc(1),
                _ => {}
            }
            bar.suspend(|| {
                let mut out = std::io::stdout();
                let _ = output::print_progress(&mut out, &event, color);
            });
        }
    };
    let stats = translate::translate_catalog(
        &mut catalog,
        translator,
        &selector,
        progress_cb,
        cancel_on_ctrl_c(),
    )
    .await;
    bar.finish_and_clear();

    catalog
        .write(catalog_path)
        .with_context(|| format!("Failed to write catalog {}", catalog_path.display()))?;
    output::print_translation_summary(&mut writer, &stats, color)?;
    Ok(exit_code(stats.failed > 0))
}

async fn fetch_pdfs(
    catalogs: &[PathBuf],
    fetch_config: fetch::FetchConfig,
    color: ColorMode,
) -> anyhow::Result<ExitCode> {
    let mut writer: Box<dyn Write> = Box::new(std::io::stdout());
    let cancel = cancel_on_ctrl_c();
    let mut any_failed = false;

    for path in catalogs {
        let catalog = read_catalog(path)?;
        let tasks = fetch::tasks_from_catalog(&catalog);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        writeln!(
            writer,
            "Found {} tasks in {}, using {} workers",
            tasks.len(),
            name,
            fetch_config.num_workers
        )?;

        let bar = progress_bar(tasks.len());
        bar.set_message(name.clone());
        let outcomes = fetch::fetch_all(
            tasks,
            fetch_config.clone(),
            |outcome| {
                bar.inc(1);
                bar.suspend(|| {
                    let mut out = std::io::stdout();
                    let _ = output::print_fetch_failure(&mut out, outcome, color);
                });
            },
            cancel.clone(),
        )
        .await?;
        bar.finish_and_clear();

        let stats = FetchStats::from_outcomes(&outcomes);
        any_failed |= stats.failed > 0;
        output::print_fetch_summary(&mut writer, &name, &stats, color)?;
        if cancel.is_cancelled() {
            break;
        }
    }
    Ok(exit_code(any_failed))
}

fn missing_pdfs(catalogs: &[PathBuf], dir: &Path, color: ColorMode) -> anyhow::Result<ExitCode> {
    let mut writer: Box<dyn Write> = Box::new(std::io::stdout());
    let mut tasks = Vec::new();
    for path in catalogs {
        tasks.extend(fetch::tasks_from_catalog(&read_catalog(path)?));
    }
    let missing = fetch::missing_by_domain(&tasks, dir);
    output::print_missing(&mut writer, &missing, color)?;
    Ok(ExitCode::SUCCESS)
}

async fn transcribe_dir(dir: &Path, output_path: &Path, config: &Config) -> anyhow::Result<ExitCode> {
    if !dir.is_dir() {
        anyhow::bail!("Not a directory: {}", dir.display());
    }
    let service = OpenAiService::from_config(config)
        .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY must be set"))?;
    let images = transcribe::list_images(dir)?;
    println!("Transcribing {} images from {}", images.len(), dir.display());

    let bar = progress_bar(images.len());
    let report = transcribe::transcribe_images(
        &images,
        &service,
        |_, _, path| {
            bar.set_message(
                path.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
            );
            bar.inc(1);
        },
        cancel_on_ctrl_c(),
    )
    .await;
    bar.finish_and_clear();

    report
        .catalog
        .write(output_path)
        .with_context(|| format!("Failed to write {}", output_path.display()))?;
    println!(
        "Saved {} transcriptions to {}",
        report.catalog.len(),
        output_path.display()
    );
    for (path, error) in &report.failed {
        eprintln!("Failed to transcribe {}: {}", path.display(), error);
    }
    Ok(exit_code(!report.failed.is_empty()))
}
