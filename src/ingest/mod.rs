//! Archive ingestion
//!
//! Turns the browser download (an outer zip holding an inner zip holding the
//! invoice tree) into a summarized directory under the destination root:
//!
//! 1. select the outer archive in staging (newest wins)
//! 2. extract it in place and find the inner archive
//! 3. extract the inner archive next to itself, into a folder named after it
//! 4. descend single-child folders to the document root
//! 5. summarize the invoice XML files
//! 6. replace the destination with the document root's content
//!
//! Staging artifacts are removed only when every step succeeded; on failure
//! they stay for inspection. Directory state is logged either way.

use crate::config::IngestConfig;
use crate::error::{Error, Result};
use crate::types::FiscalSummary;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use walkdir::WalkDir;

pub mod archive;
pub mod layout;
pub mod summary;

pub use layout::{descend_to_document_root, destination_path};
pub use summary::summarize_directory;

/// Inputs for one ingestion
#[derive(Clone, Debug)]
pub struct IngestRequest {
    /// Job staging directory holding the downloaded archive
    pub staging_dir: PathBuf,
    /// Root of the processed tree
    pub destination_root: PathBuf,
    /// Document type, first component of the destination
    pub document_type: String,
    /// Period start
    pub start_date: NaiveDate,
    /// Period end
    pub end_date: NaiveDate,
}

/// Staging paths created by one ingestion, removed on success
#[derive(Debug, Default)]
struct Artifacts {
    outer_archive: Option<PathBuf>,
    inner_archive: Option<PathBuf>,
    inner_folder: Option<PathBuf>,
}

/// Extracts, summarizes and relocates downloaded exports
#[derive(Clone, Debug)]
pub struct ArchiveIngestor {
    config: IngestConfig,
}

impl ArchiveIngestor {
    #[allow(missing_docs)]
    pub fn new(config: IngestConfig) -> Self {
        Self { config }
    }

    /// Run the whole ingestion on a blocking thread
    pub async fn ingest(&self, request: IngestRequest) -> Result<FiscalSummary> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || ingest_blocking(&config, &request))
            .await
            .map_err(|e| Error::Other(format!("ingestion task failed: {e}")))?
    }
}

fn ingest_blocking(config: &IngestConfig, request: &IngestRequest) -> Result<FiscalSummary> {
    let mut artifacts = Artifacts::default();
    let outcome = run_steps(config, request, &mut artifacts);

    match &outcome {
        Ok(summary) => {
            info!(
                destination = ?summary.destination,
                valid = summary.valid_invoices_found,
                "ingestion finished, cleaning staging"
            );
            cleanup(&request.staging_dir, &artifacts);
        }
        Err(e) => {
            error!(
                staging = ?request.staging_dir,
                error = %e,
                "ingestion failed, staging kept for inspection"
            );
        }
    }

    log_directory_state("staging", &request.staging_dir);
    log_directory_state("destination", &request.destination_root);

    outcome
}

fn run_steps(
    config: &IngestConfig,
    request: &IngestRequest,
    artifacts: &mut Artifacts,
) -> Result<FiscalSummary> {
    let extensions = &config.archive_extensions;

    let outer = archive::select_outer_archive(&request.staging_dir, extensions)?;
    artifacts.outer_archive = Some(outer.clone());
    archive::extract_archive(&outer, &request.staging_dir)?;

    let inner = archive::find_inner_archive(&request.staging_dir, &outer, extensions)?;
    artifacts.inner_archive = Some(inner.clone());

    let inner_folder = inner_extraction_folder(&inner);
    artifacts.inner_folder = Some(inner_folder.clone());
    archive::extract_archive(&inner, &inner_folder)?;

    let document_root = layout::descend_to_document_root(&inner_folder, config.max_descent_depth)?;
    info!(?document_root, "document root resolved");

    let mut summary = summary::summarize_directory(&document_root, &config.xml_root_elements);

    let destination = layout::destination_path(
        &request.destination_root,
        &request.document_type,
        request.start_date,
        request.end_date,
    )?;
    layout::relocate(&document_root, &destination)?;

    summary.destination = Some(destination);
    Ok(summary)
}

/// `dir/name.zip` extracts into `dir/name/`
fn inner_extraction_folder(inner: &Path) -> PathBuf {
    let stem = inner
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| "inner".into());
    inner.with_file_name(stem)
}

fn cleanup(staging_dir: &Path, artifacts: &Artifacts) {
    for file in [&artifacts.outer_archive, &artifacts.inner_archive]
        .into_iter()
        .flatten()
    {
        if let Err(e) = std::fs::remove_file(file)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = ?file, error = %e, "failed to remove staging archive");
        }
    }

    if let Some(folder) = &artifacts.inner_folder
        && let Err(e) = std::fs::remove_dir_all(folder)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = ?folder, error = %e, "failed to remove extraction folder");
    }

    // Folders the outer archive created, now empty
    for entry in WalkDir::new(staging_dir)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
    {
        let _ = std::fs::remove_dir(entry.path());
    }
}

/// Log file and folder counts under `dir`
pub fn log_directory_state(label: &str, dir: &Path) {
    if !dir.exists() {
        info!(label, ?dir, "directory state: absent");
        return;
    }

    let (mut files, mut folders) = (0usize, 0usize);
    for entry in WalkDir::new(dir).min_depth(1).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_dir() {
            folders += 1;
        } else {
            files += 1;
        }
    }
    info!(label, ?dir, files, folders, "directory state");
}
