// charsense/src/main.rs
//
// charsense — report the probable character encoding of files.
//
// Two execution modes:
//   sync   — each file is detected inline, one after another
//   async  — every file is queued on the worker pool; results print in
//            completion order
//
// Usage:
//   charsense notes.txt page.html
//   charsense --ranked --mode async --workers 8 corpus/*.txt
//   charsense --config charsense.json --strip-markup index.html
//
// Output: one JSON line per file on stdout. Logs go to stderr
// (RUST_LOG=charsense=debug for per-task detail).

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use charsense::{
    Config, DetectionOutcome, Detector, Dispatcher, ErrorKind, Match, Mode, ResultShape, WorkerPool,
};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "charsense",
    about   = "Detect the probable character encoding of files",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(required = true, value_name = "FILE")]
    files: Vec<PathBuf>,

    #[arg(long, help = "Report every candidate, highest confidence first")]
    ranked: bool,

    #[arg(long, value_enum, default_value = "sync")]
    mode: Mode,

    #[arg(long, help = "Worker pool size (async mode)")]
    workers: Option<usize>,

    #[arg(long, value_name = "FILE", help = "JSON configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Top-level domain hint for legacy encodings, e.g. jp")]
    tld: Option<String>,

    #[arg(long, value_name = "LABEL", help = "Charset declared by the source, if any")]
    declared: Option<String>,

    #[arg(long, help = "Ignore HTML/XML tags when scoring")]
    strip_markup: bool,

    #[arg(long, help = "Print worker pool counters to stderr when done")]
    stats: bool,
}

impl Cli {
    fn config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None       => Config::default(),
        };
        if let Some(n) = self.workers       { config.pool.workers = n; }
        if let Some(t) = &self.tld          { config.oracle.tld_hint = Some(t.clone()); }
        if let Some(d) = &self.declared     { config.oracle.declared_encoding = Some(d.clone()); }
        if self.strip_markup                { config.oracle.strip_markup = true; }
        Ok(config)
    }

    fn shape(&self) -> ResultShape {
        if self.ranked { ResultShape::RankedCandidates } else { ResultShape::NameOnly }
    }
}

// ── Output ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct Report {
    path:        String,
    status:      &'static str,
    matches:     Vec<Match>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error:       Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind:  Option<ErrorKind>,
    detected_at: DateTime<Utc>,
}

impl Report {
    fn new(path: &Path, outcome: &DetectionOutcome) -> Self {
        Self {
            path:        path.display().to_string(),
            status:      outcome.status(),
            matches:     outcome.detection().map(|d| d.matches().to_vec()).unwrap_or_default(),
            error:       outcome.error().map(|e| e.to_string()),
            error_kind:  outcome.error_kind(),
            detected_at: Utc::now(),
        }
    }
}

fn emit(report: &Report) {
    match serde_json::to_string(report) {
        Ok(line) => println!("{}", line),
        Err(e)   => error!("Serialize failed: {}", e),
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env()
            .add_directive("charsense=info".parse()?))
        .with_writer(std::io::stderr)
        .compact().init();

    let cli    = Cli::parse();
    let config = cli.config()?;
    let shape  = cli.shape();

    let detector       = Detector::with_config(&config.oracle)?;
    let mut dispatcher = Dispatcher::new(WorkerPool::new(&config.pool)?);
    let mut unreadable = 0usize;

    for path in &cli.files {
        let bytes = match tokio::fs::read(path).await {
            Ok(b)  => b,
            Err(e) => {
                error!("{}: {}", path.display(), e);
                unreadable += 1;
                continue;
            }
        };

        match cli.mode {
            Mode::Sync => {
                let outcome = dispatcher.detect_sync(&detector, &bytes, shape);
                emit(&Report::new(path, &outcome));
            }
            Mode::Async => {
                let path = path.clone();
                dispatcher.detect_async(&detector, &bytes, shape, move |_, outcome| {
                    emit(&Report::new(&path, &outcome));
                });
            }
        }
    }

    let delivered = dispatcher.drain().await;
    info!(files = cli.files.len(), async_delivered = delivered, unreadable, "done");

    if cli.stats {
        eprintln!("{}", serde_json::to_string(&dispatcher.pool().stats())?);
    }
    detector.close();

    if unreadable > 0 {
        std::process::exit(1);
    }
    Ok(())
}
