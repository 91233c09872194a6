// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk — headless command-line front end.
//
// Drives the engine the way an interactive front end would: queue requests,
// poll for responses, report progress from the callbacks.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context as _, bail};
use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use scanwerk_core::human_errors::humanize_error;
use scanwerk_core::{EngineConfig, PageRef, ScanwerkError};
use scanwerk_document::PdfMetadata;
use scanwerk_engine::{
    Callbacks, Document, ErrorReport, ExportTarget, OcrBackend, Progress, TiffCompression, crashed_sessions,
    delete_session,
};

const CONFIG_FILE: &str = "scanwerk.json";
const TIMEOUT: Duration = Duration::from_secs(60 * 60);

#[derive(Parser)]
#[command(name = "scanwerk", about = "Process scanned pages and export them", version)]
struct Cli {
    /// Config file (defaults to the per-user config directory).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import images or documents, process every page and save the result.
    Convert {
        /// Rotate every page by this many degrees (multiple of 90).
        #[arg(long)]
        rotate: Option<i32>,
        /// Reduce every page to black and white at this threshold (percent).
        #[arg(long)]
        threshold: Option<f32>,
        /// Invert every page.
        #[arg(long)]
        negate: bool,
        /// Recognise text in this language (tesseract code, e.g. "eng").
        #[arg(long, value_name = "LANG")]
        ocr: Option<String>,
        #[arg(long, value_enum, default_value_t = Backend::Tesseract)]
        ocr_engine: Backend,
        /// TIFF compression.
        #[arg(long, value_enum, default_value_t = Compression::None)]
        compression: Compression,
        /// Document title for PDF and DjVu output.
        #[arg(long)]
        title: Option<String>,
        /// Command run after saving; %i is replaced by the written file.
        #[arg(long)]
        post_save_hook: Option<String>,
        /// Output file; its extension picks the format.
        #[arg(short, long)]
        output: PathBuf,
        /// Files to import.
        #[arg(required = true)]
        input: Vec<PathBuf>,
    },
    /// List session directories left behind by a crash.
    Sessions {
        /// Remove them instead of listing.
        #[arg(long)]
        delete: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Tesseract,
    Ocrs,
}

impl From<Backend> for OcrBackend {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Tesseract => OcrBackend::Tesseract,
            Backend::Ocrs => OcrBackend::Ocrs,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Compression {
    None,
    Lzw,
    Packbits,
    Deflate,
    Jpeg,
}

impl From<Compression> for TiffCompression {
    fn from(compression: Compression) -> Self {
        match compression {
            Compression::None => TiffCompression::None,
            Compression::Lzw => TiffCompression::Lzw,
            Compression::Packbits => TiffCompression::Packbits,
            Compression::Deflate => TiffCompression::Deflate,
            Compression::Jpeg => TiffCompression::Jpeg,
        }
    }
}

/// Output formats, chosen from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Pdf,
    Djvu,
    Tiff,
    Text,
    Hocr,
    Image,
}

impl Format {
    fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Self::Pdf,
            "djvu" | "djv" => Self::Djvu,
            "tif" | "tiff" => Self::Tiff,
            "txt" => Self::Text,
            "hocr" => Self::Hocr,
            _ => Self::Image,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run() {
        eprintln!("{err:?}");
        if let Some(err) = err.downcast_ref::<ScanwerkError>() {
            let human = humanize_error(err);
            if !human.suggestion.is_empty() {
                eprintln!("hint: {}", human.suggestion);
            }
        }
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => ProjectDirs::from("dev", "hyperpolymath", "scanwerk")
            .context("resolve project dirs")?
            .config_dir()
            .join(CONFIG_FILE),
    };
    let config = EngineConfig::load(&config_path)
        .with_context(|| format!("load config from {}", config_path.display()))?;

    match cli.command {
        Commands::Convert {
            rotate,
            threshold,
            negate,
            ocr,
            ocr_engine,
            compression,
            title,
            post_save_hook,
            output,
            input,
        } => {
            let steps = Steps {
                rotate,
                threshold,
                negate,
                ocr,
                backend: ocr_engine.into(),
            };
            let mut target = ExportTarget::new(&output);
            if let Some(hook) = post_save_hook {
                target = target.with_hook(hook);
            }
            let metadata = PdfMetadata {
                title,
                creation_date: Some(chrono::Utc::now()),
                ..PdfMetadata::default()
            };
            convert(config, input, &steps, target, metadata, compression.into())
        }
        Commands::Sessions { delete } => sessions(&config, delete),
    }
}

/// Per-page operations requested on the command line.
struct Steps {
    rotate: Option<i32>,
    threshold: Option<f32>,
    negate: bool,
    ocr: Option<String>,
    backend: OcrBackend,
}

/// Failures collected from `error` callbacks.
type Failures = Rc<RefCell<Vec<String>>>;

fn callbacks(label: String, failures: &Failures) -> Callbacks {
    let failures = failures.clone();
    Callbacks::new()
        .on_running(move |progress: &Progress| {
            let done = progress.status.jobs_completed + 1;
            let total = progress.status.jobs_total;
            match (&progress.message, progress.fraction) {
                (Some(message), _) => eprintln!("[{done}/{total}] {label}: {message}"),
                (None, Some(fraction)) => eprintln!("[{done}/{total}] {label}: {:.0}%", fraction * 100.0),
                (None, None) => eprintln!("[{done}/{total}] {label}"),
            }
        })
        .on_error(move |report: &ErrorReport| {
            failures
                .borrow_mut()
                .push(format!("{}: {}", report.action, report.message));
        })
}

fn drain(document: &mut Document, failures: &Failures) -> anyhow::Result<()> {
    if !document.wait_idle(TIMEOUT) {
        bail!("timed out waiting for the queue to drain");
    }
    let failures = failures.borrow();
    if !failures.is_empty() {
        bail!("{} request(s) failed:\n  {}", failures.len(), failures.join("\n  "));
    }
    Ok(())
}

fn convert(
    config: EngineConfig,
    input: Vec<PathBuf>,
    steps: &Steps,
    target: ExportTarget,
    metadata: PdfMetadata,
    compression: TiffCompression,
) -> anyhow::Result<()> {
    let failures: Failures = Rc::new(RefCell::new(Vec::new()));
    let mut document = Document::new(config).context("start engine")?;

    document.import_files(input, PageRef::Append, callbacks("import".into(), &failures))?;
    drain(&mut document, &failures)?;
    if document.pages().is_empty() {
        bail!("nothing was imported");
    }

    let ids: Vec<_> = document.pages().rows().iter().map(|row| row.page.id).collect();
    for &id in &ids {
        if let Some(angle) = steps.rotate {
            document.rotate(id, angle, callbacks("rotate".into(), &failures))?;
        }
        if let Some(percent) = steps.threshold {
            document.threshold(id, percent, callbacks("threshold".into(), &failures))?;
        }
        if steps.negate {
            document.negate(id, callbacks("negate".into(), &failures))?;
        }
        if let Some(language) = &steps.ocr {
            document.ocr(id, Some(language.clone()), steps.backend, callbacks("ocr".into(), &failures))?;
        }
    }

    let save = callbacks("save".into(), &failures);
    match Format::from_path(&target.path) {
        Format::Pdf => document.save_pdf(ids, target.clone(), metadata, None, save)?,
        Format::Djvu => document.save_djvu(ids, target.clone(), metadata, save)?,
        Format::Tiff => document.save_tiff(ids, target.clone(), compression, save)?,
        Format::Text => document.save_text(ids, target.clone(), save)?,
        Format::Hocr => document.save_hocr(ids, target.clone(), save)?,
        Format::Image => document.save_image(ids, target.clone(), save)?,
    };
    drain(&mut document, &failures)?;

    println!("{}", target.path.display());
    Ok(())
}

fn sessions(config: &EngineConfig, delete: bool) -> anyhow::Result<()> {
    let crashed = crashed_sessions(&config.scratch_root)
        .with_context(|| format!("scan {}", config.scratch_root.display()))?;
    if crashed.is_empty() {
        println!("no crashed sessions");
        return Ok(());
    }
    for session in &crashed {
        if delete {
            delete_session(session).with_context(|| format!("delete {}", session.dir.display()))?;
            println!("deleted {}", session.dir.display());
        } else {
            let state = if session.restorable { "restorable" } else { "empty" };
            println!("{}\t{state}", session.dir.display());
        }
    }
    Ok(())
}
