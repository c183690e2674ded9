//! CLI entry point for translation transfer.
//!
//! Commands build a dictionary from reference tables, fill in translations
//! for new tables, and inspect the active dictionary.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{
    Parser, Subcommand, ValueEnum,
    builder::styling::{AnsiColor, Effects, Styles},
};
use serde::Serialize;
use tracing::Level;

use transmem::batch::{CancellationFlag, LogProgress, NoProgress, ProgressSink};
use transmem::config::ColumnsConfig;
use transmem::display::{
    BarProgress, THEME, create_build_table, create_conflict_table, create_help_text,
    create_info_table, create_newline_table, create_query_table, create_transfer_table,
    with_spinner,
};
use transmem::io::{ExitCode, Table, file_key, load_references, resolve_columns};
use transmem::matching::{BatchSummary, MatchMode, Matcher, UnmatchedPolicy, newline_report};
use transmem::storage::{ArtifactMetadata, DictionaryStore};
use transmem::{ConflictPolicy, EncoderHandle, Settings, TransferError};

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

#[derive(Parser)]
#[command(
    name = "transmem",
    version,
    about = "Reuse previous translations for new source text by meaning",
    long_about = None,
    styles = clap_cargo_style(),
    after_help = create_help_text()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only warnings and errors on stderr
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up .transmem directory with a default settings.toml
    #[command(
        about = "Set up .transmem directory with a default settings.toml",
        after_help = "Examples:\n  transmem init\n  transmem init --force"
    )]
    Init {
        /// Overwrite an existing settings file
        #[arg(short, long)]
        force: bool,
    },

    /// Display active settings
    #[command(about = "Display active settings after all overrides")]
    Config,

    /// Build a new dictionary generation from reference tables
    #[command(
        about = "Build a new dictionary generation from reference tables",
        after_help = "Examples:\n  transmem build ko_en_v1.tsv ko_en_v2.tsv\n  transmem build refs/*.tsv --conflict first --progress\n\nLater files win conflicting translations unless --conflict first is given."
    )]
    Build {
        /// Reference files, in priority order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Which file wins when the same source has different translations
        #[arg(long, value_enum)]
        conflict: Option<ConflictArg>,

        /// Show progress bars
        #[arg(long)]
        progress: bool,
    },

    /// Fill the target column of a table with reused translations
    #[command(
        about = "Fill the target column of a table with reused translations",
        after_help = "Examples:\n  transmem transfer new.tsv -o new_translated.tsv\n  transmem transfer new.tsv -o out.tsv --mode split --threshold 0.95\n  transmem transfer new.tsv -o out.tsv --keep-original --with-scores"
    )]
    Transfer {
        /// Table with a source column
        input: PathBuf,

        /// Where to write the filled table
        #[arg(short, long)]
        output: PathBuf,

        /// Match whole cells or line by line
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Minimum similarity for a translation to be reused
        #[arg(short, long)]
        threshold: Option<f32>,

        /// Copy the source text into unmatched cells instead of leaving them blank
        #[arg(long)]
        keep_original: bool,

        /// Reshape reused translations to the source's line count
        #[arg(long)]
        adapt_newlines: bool,

        /// Append a column with the similarity score of each row
        #[arg(long)]
        with_scores: bool,

        /// Show progress bars
        #[arg(long)]
        progress: bool,
    },

    /// Look up one string in the dictionary
    #[command(
        about = "Look up one string in the dictionary",
        after_help = "Examples:\n  transmem query \"안녕하세요\"\n  transmem query \"{ItemID}을 획득했습니다\" --top-k 5\n  transmem query \"첫째 줄\\n둘째 줄\" --mode split --json"
    )]
    Query {
        /// Source text
        text: String,

        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        #[arg(short, long)]
        threshold: Option<f32>,

        /// Number of candidates to show
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Report rows whose translation has a different number of line breaks
    #[command(
        name = "check-newlines",
        about = "Report rows whose translation has a different number of line breaks",
        after_help = "Examples:\n  transmem check-newlines strings.tsv\n  transmem check-newlines strings.tsv --report mismatches.tsv\n\nExits with code 1 when mismatches are found."
    )]
    CheckNewlines {
        /// Translated table with source and target columns
        file: PathBuf,

        /// Write the mismatches as a tab-separated file
        #[arg(long)]
        report: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },

    /// Describe the active dictionary generation
    #[command(about = "Describe the active dictionary generation")]
    Info {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ConflictArg {
    /// Later reference files override earlier ones
    Last,
    /// The first translation seen is kept
    First,
}

impl From<ConflictArg> for ConflictPolicy {
    fn from(arg: ConflictArg) -> Self {
        match arg {
            ConflictArg::Last => ConflictPolicy::LastFileWins,
            ConflictArg::First => ConflictPolicy::FirstFileWins,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Whole,
    Split,
}

impl From<ModeArg> for MatchMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Whole => MatchMode::Whole,
            ModeArg::Split => MatchMode::Split,
        }
    }
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: PathBuf,
    generations_on_disk: usize,
    #[serde(flatten)]
    metadata: ArtifactMetadata,
}

fn main() {
    let cli = Cli::parse();

    let code = match run(cli) {
        Ok(code) => code,
        Err(error) => report_error(&error),
    };
    if !code.is_success() {
        tracing::debug!("exiting with {} ({})", i32::from(code), code.description());
    }
    std::process::exit(code.into());
}

fn run(cli: Cli) -> Result<ExitCode> {
    // `init` must work without a readable settings file
    if let Commands::Init { force } = cli.command {
        init_logging(&cli, false);
        return init(force);
    }

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Settings::load()?,
    };
    init_logging(&cli, settings.debug);

    if settings.workspace_root.is_none() && cli.config.is_none() {
        tracing::debug!("no {} directory found, using defaults", transmem::config::CONFIG_DIR);
    }

    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(settings.build.parallel_threads)
        .build_global()
    {
        tracing::warn!("could not size the worker pool: {e}");
    }

    match cli.command {
        Commands::Init { .. } => unreachable!("handled above"),
        Commands::Config => show_config(&settings),
        Commands::Build {
            files,
            conflict,
            progress,
        } => build(settings, &files, conflict, progress, cli.quiet),
        Commands::Transfer {
            input,
            output,
            mode,
            threshold,
            keep_original,
            adapt_newlines,
            with_scores,
            progress,
        } => {
            let mut settings = settings;
            if let Some(mode) = mode {
                settings.matching.mode = mode.into();
            }
            if let Some(threshold) = threshold {
                settings.matching.threshold = threshold;
            }
            if keep_original {
                settings.matching.unmatched = UnmatchedPolicy::KeepOriginal;
            }
            if adapt_newlines {
                settings.matching.adapt_newlines = true;
            }
            settings.validate()?;
            transfer(&settings, &input, &output, with_scores, progress, cli.quiet)
        }
        Commands::Query {
            text,
            mode,
            threshold,
            top_k,
            json,
        } => {
            let mut settings = settings;
            if let Some(mode) = mode {
                settings.matching.mode = mode.into();
            }
            if let Some(threshold) = threshold {
                settings.matching.threshold = threshold;
            }
            if let Some(top_k) = top_k {
                settings.matching.top_k = top_k;
            }
            settings.validate()?;
            query(&settings, &text, json)
        }
        Commands::CheckNewlines { file, report, json } => {
            check_newlines(&settings.columns, &file, report.as_deref(), json)
        }
        Commands::Info { json } => info(&settings, json),
    }
}

/// Installs the stderr log subscriber.
fn init_logging(cli: &Cli, debug: bool) {
    let level = if cli.quiet {
        Level::WARN
    } else if cli.verbose || debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Prints the error with recovery hints and picks the exit code.
fn report_error(error: &anyhow::Error) -> ExitCode {
    eprintln!("{}", THEME.error_with_icon(&format!("{error:#}")));

    match error.downcast_ref::<TransferError>() {
        Some(transfer_error) => {
            for suggestion in transfer_error.recovery_suggestions() {
                eprintln!("  {}", THEME.apply(&THEME.dim, suggestion));
            }
            ExitCode::from_error(transfer_error)
        }
        None => ExitCode::GeneralError,
    }
}

fn init(force: bool) -> Result<ExitCode> {
    match Settings::init_config_file(force) {
        Ok(path) => {
            println!(
                "{}",
                THEME.success_with_icon(&format!(
                    "Created configuration file at: {}",
                    path.display()
                ))
            );
            println!("Edit this file to set column names and the encoder model.");
            Ok(ExitCode::Success)
        }
        Err(e) => {
            eprintln!("{}", THEME.error_with_icon(&e.to_string()));
            Ok(ExitCode::ConfigError)
        }
    }
}

fn show_config(settings: &Settings) -> Result<ExitCode> {
    println!("{}", THEME.apply(&THEME.header, "Current Configuration:"));
    println!("{}", "=".repeat(50));
    println!("{}", toml::to_string_pretty(settings)?);
    Ok(ExitCode::Success)
}

fn open_store(settings: &Settings) -> DictionaryStore {
    DictionaryStore::open(settings.resolved_dictionary_path())
        .with_keep_generations(settings.build.keep_generations)
}

/// Progress sink for a command: bars on request, log lines otherwise.
/// Cancellation flag tripped by Ctrl-C.
fn interrupt_flag() -> CancellationFlag {
    let cancel = CancellationFlag::new();
    if let Err(e) = cancel.cancel_on_interrupt() {
        tracing::warn!("could not install the interrupt handler: {e}");
    }
    cancel
}

fn progress_sink(bars: bool, quiet: bool) -> Arc<dyn ProgressSink> {
    if bars && !quiet {
        Arc::new(BarProgress::new())
    } else if quiet {
        Arc::new(NoProgress)
    } else {
        Arc::new(LogProgress)
    }
}

fn build(
    mut settings: Settings,
    files: &[PathBuf],
    conflict: Option<ConflictArg>,
    progress: bool,
    quiet: bool,
) -> Result<ExitCode> {
    if let Some(conflict) = conflict {
        settings.build.conflict_policy = conflict.into();
    }

    let (sources, failures) = load_references(files, &settings.columns);
    for (path, error) in &failures {
        eprintln!(
            "{}",
            THEME.warning_with_icon(&format!("Skipping {}: {error}", path.display()))
        );
    }
    if sources.is_empty() {
        return match failures.into_iter().next() {
            Some((_, error)) => Err(error.into()),
            None => Err(anyhow::anyhow!("no reference files given")),
        };
    }

    let encoder = EncoderHandle::new(settings.encoder_config());
    let generator = with_spinner(
        &format!("Loading embedding model '{}'", encoder.model_name()),
        || encoder.get(),
    )?;

    let store = open_store(&settings);
    let cancel = interrupt_flag();
    let mut outcome = store.rebuild(
        &sources,
        generator.as_ref(),
        settings.build_options(),
        &cancel,
        progress_sink(progress, quiet),
    )?;

    for (path, error) in failures {
        outcome.report.add_error(path, error.to_string());
    }

    if !quiet {
        println!("{}", create_build_table(&outcome.report));
        if !outcome.report.conflicts.is_empty() {
            println!("{}", THEME.apply(&THEME.header, "Conflicts"));
            println!("{}", create_conflict_table(&outcome.report));
        }
    }
    println!(
        "{}",
        THEME.success_with_icon(&format!(
            "Published generation {} at {}",
            outcome.dictionary.generation(),
            outcome.path.display()
        ))
    );
    for pruned in &outcome.pruned {
        tracing::debug!("removed old generation {}", pruned.display());
    }

    Ok(ExitCode::Success)
}

fn transfer(
    settings: &Settings,
    input: &Path,
    output: &Path,
    with_scores: bool,
    progress: bool,
    quiet: bool,
) -> Result<ExitCode> {
    let mut table = Table::read(input)?;
    let mapping = settings
        .columns
        .resolve(&file_key(input), ColumnsConfig::DEFAULT_SHEET);
    let columns = resolve_columns(&table, mapping, input, false)?;
    let target = match columns.target {
        Some(target) => target,
        None => table.add_column(mapping.target.clone()),
    };

    let store = open_store(settings);
    store.load_active()?;
    let encoder = EncoderHandle::new(settings.encoder_config());
    let matcher = with_spinner(
        &format!("Loading embedding model '{}'", encoder.model_name()),
        || Matcher::from_store(&store, &encoder, settings.match_options()),
    )?;

    let rows: Vec<String> = (0..table.len())
        .map(|row| table.cell(row, columns.source).to_string())
        .collect();
    let cancel = interrupt_flag();
    let sink = progress_sink(progress, quiet);
    let results = matcher.match_batch(&rows, &cancel, sink.as_ref());

    let score_column = with_scores.then(|| table.add_column("score"));
    for (row, result) in results.iter().enumerate() {
        table.set_cell(row, target, result.output.clone());
        if let Some(column) = score_column {
            let score = if result.candidates.is_empty() && result.lines.is_empty() {
                String::new()
            } else {
                format!("{:.4}", result.score)
            };
            table.set_cell(row, column, score);
        }
    }
    table.write(output)?;

    let summary = BatchSummary::from_results(&results);
    if !quiet {
        println!("{}", create_transfer_table(&summary));
    }
    if summary.failed > 0 {
        eprintln!(
            "{}",
            THEME.warning_with_icon(&format!(
                "{} rows could not be embedded and were left unmatched",
                summary.failed
            ))
        );
    }
    if summary.cancelled > 0 {
        eprintln!(
            "{}",
            THEME.warning_with_icon(&format!(
                "Interrupted: wrote {} with {} rows left unprocessed",
                output.display(),
                summary.cancelled
            ))
        );
        return Ok(ExitCode::Cancelled);
    }
    println!(
        "{}",
        THEME.success_with_icon(&format!(
            "Wrote {} ({} of {} rows matched)",
            output.display(),
            summary.matched,
            summary.total()
        ))
    );

    Ok(ExitCode::Success)
}

fn query(settings: &Settings, text: &str, json: bool) -> Result<ExitCode> {
    let store = open_store(settings);
    store.load_active()?;
    let encoder = EncoderHandle::new(settings.encoder_config());
    let matcher = Matcher::from_store(&store, &encoder, settings.match_options())?;

    // Shell arguments carry literal "\n"; treat them as line breaks
    let text = text.replace("\\n", "\n");
    let result = matcher.match_one(&text);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(ExitCode::Success);
    }

    println!("{}", create_query_table(&result));
    let threshold = settings.matching.threshold;
    let verdict = if result.accepted {
        THEME.success_with_icon("accepted")
    } else {
        THEME.warning_with_icon("not accepted")
    };
    println!("{verdict} {}", THEME.score(result.score, threshold));
    if let Some(translation) = &result.translation {
        println!("{}", THEME.apply(&THEME.emphasis, translation));
    }

    Ok(ExitCode::Success)
}

fn check_newlines(
    columns: &ColumnsConfig,
    file: &Path,
    report_path: Option<&Path>,
    json: bool,
) -> Result<ExitCode> {
    let table = Table::read(file)?;
    let mapping = columns.resolve(&file_key(file), ColumnsConfig::DEFAULT_SHEET);
    let resolved = resolve_columns(&table, mapping, file, true)?;
    let target = resolved
        .target
        .context("target column resolved as required")?;

    let report = newline_report((0..table.len()).map(|row| {
        let row_id = match resolved.id {
            Some(id) if !table.cell(row, id).is_empty() => table.cell(row, id).to_string(),
            _ => (row + 1).to_string(),
        };
        (row_id, table.cell(row, resolved.source), table.cell(row, target))
    }));

    if let Some(path) = report_path {
        std::fs::write(path, report.to_tsv())
            .with_context(|| format!("writing report to {}", path.display()))?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.is_consistent() {
        println!(
            "{}",
            THEME.success_with_icon(&format!(
                "All {} translated rows have matching line breaks",
                report.rows_checked
            ))
        );
    } else {
        println!("{}", create_newline_table(&report));
        println!(
            "{}",
            THEME.warning_with_icon(&format!(
                "{} of {} translated rows differ in line breaks",
                report.mismatches.len(),
                report.rows_checked
            ))
        );
    }

    Ok(if report.is_consistent() {
        ExitCode::Success
    } else {
        ExitCode::GeneralError
    })
}

fn info(settings: &Settings, json: bool) -> Result<ExitCode> {
    let store = open_store(settings);
    let name = store
        .active_generation_name()?
        .ok_or(TransferError::IndexUnavailable)?;
    let path = store
        .root()
        .join(transmem::storage::store::GENERATIONS_DIR)
        .join(&name);
    let metadata = ArtifactMetadata::load(&path)?;
    let generations_on_disk = store.generations()?.len();

    if json {
        let output = InfoOutput {
            path,
            generations_on_disk,
            metadata,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(ExitCode::Success);
    }

    println!("{}", create_info_table(&metadata));
    println!(
        "{} {}",
        THEME.apply(&THEME.dim, "Location:"),
        THEME.apply(&THEME.path, path.display())
    );
    if generations_on_disk > 1 {
        println!(
            "{}",
            THEME.apply(
                &THEME.dim,
                format!("{generations_on_disk} generations on disk")
            )
        );
    }

    Ok(ExitCode::Success)
}
