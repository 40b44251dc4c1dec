use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use examprep_core::config_file::ConfigFile;
use examprep_core::session::{extraction_panel, recognition_panel};
use examprep_core::{
    Config, ConfigError, HistoryEntry, OcrCache, Panel, StudySession, StudyTask, TextExtractor,
    Upload, UserDataStore, build_generator, config_file,
};

mod output;

use output::ColorMode;

/// Exam prep assistant - turn lecture PDFs into study notes and multiple-choice questions
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    options: Options,
}

#[derive(Args, Debug, Default)]
struct Options {
    /// Text generation backend: openai, gemini, local or hosted
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Model name passed to the backend
    #[arg(long, global = true)]
    model: Option<String>,

    /// Output token budget per request
    #[arg(long, global = true)]
    max_tokens: Option<u32>,

    /// Also run OCR on every page (for scanned documents)
    #[arg(long, global = true)]
    ocr: bool,

    /// Append generated notes and questions to the history file
    #[arg(long, global = true)]
    save: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Write results to a file instead of stdout
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Log extraction and generation steps to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the text extracted from a PDF
    Extract {
        /// Path to the PDF
        file_path: PathBuf,
    },

    /// Generate study notes from a PDF
    Notes {
        /// Path to the PDF
        file_path: PathBuf,
    },

    /// Generate multiple-choice questions from a PDF
    Mcqs {
        /// Path to the PDF
        file_path: PathBuf,

        /// Number of questions (default: MCQ_COUNT or 5)
        #[arg(long)]
        count: Option<usize>,
    },

    /// Generate notes, then questions, from one PDF
    Study {
        /// Path to the PDF
        file_path: PathBuf,
    },

    /// Run OCR on a PNG or JPEG image
    OcrImage {
        /// Path to the image
        image_path: PathBuf,
    },

    /// Delete the saved history file
    Forget,
}

impl Command {
    fn input_path(&self) -> Option<&Path> {
        match self {
            Command::Extract { file_path }
            | Command::Notes { file_path }
            | Command::Mcqs { file_path, .. }
            | Command::Study { file_path } => Some(file_path),
            Command::OcrImage { image_path } => Some(image_path),
            Command::Forget => None,
        }
    }

    fn needs_generator(&self) -> bool {
        matches!(
            self,
            Command::Notes { .. } | Command::Mcqs { .. } | Command::Study { .. }
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.options.verbose);

    let opts = &cli.options;
    let color = ColorMode(!opts.no_color && opts.output.is_none());
    let mut writer: Box<dyn Write> = if let Some(ref output_path) = opts.output {
        Box::new(
            std::fs::File::create(output_path)
                .with_context(|| format!("cannot create {}", output_path.display()))?,
        )
    } else {
        Box::new(std::io::stdout())
    };

    let Some(input_path) = cli.command.input_path() else {
        return forget(&mut *writer, color);
    };

    let file = config_file::load_config();
    let mut config = match config_for(&cli.command, &file, opts, |var| std::env::var(var).ok()) {
        Ok(config) => config,
        Err(panel) => return render(&mut *writer, &[panel], color),
    };
    if let Command::Mcqs {
        count: Some(count), ..
    } = cli.command
    {
        config.mcq_count = count;
    }
    tracing::debug!(?config, "configuration resolved");

    let upload = match Upload::from_path(input_path) {
        Ok(upload) => upload,
        Err(e) => {
            tracing::warn!(path = %input_path.display(), error = %e, "cannot load input");
            return render(&mut *writer, &[Panel::warning(&e)], color);
        }
    };

    let extractor = Arc::new(examprep_ingest::default_extractor(&config));
    let show_spinner = !opts.verbose;

    let panels = match &cli.command {
        Command::Extract { .. } => {
            let bar = output::spinner("Extracting text...", show_spinner);
            let panel = extraction_panel(&extractor, &OcrCache::new(), &upload, opts.ocr).await;
            bar.finish_and_clear();
            vec![panel]
        }
        Command::OcrImage { .. } => {
            let bar = output::spinner("Recognizing text...", show_spinner);
            let panel = recognition_panel(&extractor, &upload).await;
            bar.finish_and_clear();
            vec![panel]
        }
        Command::Notes { .. } => {
            study(&config, extractor, &upload, &[StudyTask::Notes], opts, &mut *writer, color)
                .await?
        }
        Command::Mcqs { .. } => {
            let task = StudyTask::Mcqs {
                count: config.mcq_count,
            };
            study(&config, extractor, &upload, &[task], opts, &mut *writer, color).await?
        }
        Command::Study { .. } => {
            let tasks = [
                StudyTask::Notes,
                StudyTask::Mcqs {
                    count: config.mcq_count,
                },
            ];
            study(&config, extractor, &upload, &tasks, opts, &mut *writer, color).await?
        }
        Command::Forget => Vec::new(),
    };

    render(&mut *writer, &panels, color)
}

/// Print every panel; any warning makes the exit status a failure.
fn render(w: &mut dyn Write, panels: &[Panel], color: ColorMode) -> anyhow::Result<ExitCode> {
    for panel in panels {
        output::print_panel(w, panel, color)?;
    }
    w.flush()?;

    if panels.iter().any(Panel::is_warning) {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Configuration precedence: CLI flags > environment > config file > defaults.
fn resolve_config(
    file: &ConfigFile,
    opts: &Options,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    let mut config = config_file::resolve(file, env)?;

    if let Some(ref backend) = opts.backend {
        config.backend = backend.parse()?;
    }
    if let Some(ref model) = opts.model {
        config.model = Some(model.clone());
    }
    if let Some(max_tokens) = opts.max_tokens {
        config.max_tokens = max_tokens;
    }
    Ok(config)
}

/// Generation commands show a bad setting as a warning panel. Extraction
/// needs no backend, so it falls back to defaults for whatever failed.
fn config_for(
    command: &Command,
    file: &ConfigFile,
    opts: &Options,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config, Panel> {
    match resolve_config(file, opts, &env) {
        Ok(config) => Ok(config),
        Err(e) if command.needs_generator() => Err(Panel::warning(&e)),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring generation settings");
            Ok(config_file::resolve(file, |_| None).unwrap_or_default())
        }
    }
}

/// Extract once, then run each task as exactly one generation request.
async fn study(
    config: &Config,
    extractor: Arc<TextExtractor>,
    upload: &Upload,
    tasks: &[StudyTask],
    opts: &Options,
    writer: &mut dyn Write,
    color: ColorMode,
) -> anyhow::Result<Vec<Panel>> {
    // A missing API key halts before the document is touched.
    let generator = match build_generator(config) {
        Ok(generator) => generator,
        Err(e) => return Ok(vec![Panel::warning(&e)]),
    };
    let session = StudySession::new(extractor, generator, config.session_settings());
    session.start_warm_up();

    let show_spinner = !opts.verbose;
    let bar = output::spinner("Extracting text...", show_spinner);
    let loaded = session.load_document(upload, opts.ocr).await;
    bar.finish_and_clear();
    let doc = match loaded {
        Ok(doc) => doc,
        Err(e) => {
            session.cancel_warm_up();
            return Ok(vec![Panel::warning(&e)]);
        }
    };
    output::print_document_info(writer, &upload.name, &doc, color)?;

    let bar = output::spinner("Preparing model...", show_spinner);
    session.finish_warm_up().await;
    bar.finish_and_clear();

    let mut panels = Vec::with_capacity(tasks.len());
    let store = if opts.save {
        match UserDataStore::open_default() {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::warn!(error = %e, "history unavailable");
                panels.push(Panel::warning(&format!("results will not be saved: {e}")));
                None
            }
        }
    } else {
        None
    };

    for &task in tasks {
        let message = format!(
            "Generating {} with {} ({})...",
            task.label(),
            session.generator().name(),
            session.generator().model()
        );
        let bar = output::spinner(&message, show_spinner);
        let panel = session.task_panel(&doc, task).await;
        bar.finish_and_clear();

        let entry = match (&store, &panel) {
            (Some(_), Panel::Content { body, .. }) => {
                Some(HistoryEntry::new(&doc.fingerprint, &upload.name, task, body))
            }
            _ => None,
        };
        panels.push(panel);
        if let (Some(store), Some(entry)) = (&store, entry) {
            panels.extend(save_entry(store, entry));
        }
    }
    Ok(panels)
}

/// Append one result to the history. A failure is reported next to the
/// result, which is still shown.
fn save_entry(store: &UserDataStore, entry: HistoryEntry) -> Option<Panel> {
    match store.append(entry) {
        Ok(()) => None,
        Err(e) => {
            tracing::warn!(path = %store.path().display(), error = %e, "cannot save history");
            Some(Panel::warning(&format!("result not saved to history: {e}")))
        }
    }
}

fn forget(w: &mut dyn Write, color: ColorMode) -> anyhow::Result<ExitCode> {
    let store = UserDataStore::open_default()?;
    let message = if store.delete()? {
        format!("Deleted {}", store.path().display())
    } else {
        "No saved history to delete".to_string()
    };
    output::print_panel(
        w,
        &Panel::Content {
            title: "History".to_string(),
            body: message,
        },
        color,
    )?;
    Ok(ExitCode::SUCCESS)
}
