use clap::Parser;
use crate_review::analysis::AnalysisBackends;
use crate_review::error::{PersistenceError, ReviewError};
use crate_review::persistence::{DirectoryStore, FolderRef};
use crate_review::review::{RecordPhase, ReviewSession};
use crate_review::{RawImage, ReviewConfig, Size, Stage};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, info, Level};
use uuid::Uuid;

/// Analyze photos, suggest titles and palettes, and file them into a folder.
#[derive(Parser, Debug)]
#[command(name = "crate-review", version)]
struct Args {
    /// Photos to review, in page order
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Folder every record is filed under
    #[arg(short, long)]
    folder: Option<String>,

    /// Display size as WIDTHxHEIGHT; defaults to each image's own size
    #[arg(short, long, value_parser = parse_size)]
    display: Option<Size>,

    /// Directory the store writes images and entries into
    #[arg(short, long, default_value = "review-store")]
    out: PathBuf,

    /// Optional TOML or JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the minimum confidence for a text box to be kept
    #[arg(long)]
    threshold: Option<f32>,

    /// Overrides the number of palette colors
    #[arg(long)]
    colors: Option<usize>,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct RecordSummary {
    page: usize,
    name: String,
    phase: RecordPhase,
    text_boxes: usize,
    palette: Vec<String>,
    subject_found: bool,
    degraded: Vec<Stage>,
    saved_as: Option<Uuid>,
    error: Option<String>,
}

fn parse_size(value: &str) -> Result<Size, String> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {}", value))?;
    let width: f64 = width.trim().parse().map_err(|e| format!("bad width: {}", e))?;
    let height: f64 = height.trim().parse().map_err(|e| format!("bad height: {}", e))?;
    Ok(Size::new(width, height))
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();
}

#[tokio::main]
async fn main() -> Result<(), ReviewError> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = ReviewConfig::load(args.config.as_deref())?;
    if let Some(threshold) = args.threshold {
        config = config.with_confidence_threshold(threshold);
    }
    if let Some(colors) = args.colors {
        config = config.with_color_count(colors);
    }
    config.validate()?;
    let images = args
        .images
        .iter()
        .map(|path| RawImage::open(path))
        .collect::<Result<Vec<_>, _>>()?;
    info!("Loaded {} images", images.len());

    let folder = args.folder.as_deref().map(FolderRef::new);
    let store = DirectoryStore::open(&args.out, folder.iter().cloned().collect()).await?;

    let mut session = ReviewSession::new(AnalysisBackends::from_config(&config), config);
    session.create_from_images(images);
    session.wait_for_analysis().await;

    let mut summaries = Vec::new();
    for orchestrator in session.records() {
        let display_size = args.display.unwrap_or_else(|| orchestrator.snapshot().image.size());
        orchestrator.request_for_processing(display_size);
        if let Some(folder) = &folder {
            orchestrator.assign_folder(folder.clone());
        }

        let record = orchestrator.snapshot();
        summaries.push((
            record.id,
            RecordSummary {
                page: record.page,
                name: record.name.clone(),
                phase: record.phase,
                text_boxes: record.text_boxes.len(),
                palette: record.palette.iter().flatten().map(|c| c.hex()).collect(),
                subject_found: record.segmentation.as_ref().is_some_and(|s| s.subject_found),
                degraded: record.degraded.clone(),
                saved_as: None,
                error: None,
            },
        ));
    }

    let report = session.save_all(&store).await;
    for (id, result) in report.outcomes {
        let Some((_, summary)) = summaries.iter_mut().find(|(record, _)| *record == id) else {
            continue;
        };
        match result {
            Ok(saved) => {
                summary.phase = RecordPhase::Saved;
                summary.saved_as = Some(saved);
            }
            Err(e) if e.is_user_visible() => {
                error!("Page {} was not saved: {}", summary.page, e);
                summary.error = Some(e.to_string());
            }
            Err(_) => {}
        }
    }
    info!("Store written to {}", store.root().display());

    let summaries: Vec<_> = summaries.into_iter().map(|(_, summary)| summary).collect();
    let json = serde_json::to_string_pretty(&summaries).map_err(PersistenceError::from)?;
    println!("{}", json);
    Ok(())
}
