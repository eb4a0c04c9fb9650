//! Document root discovery, destination layout and relocation.

use crate::error::{Error, IngestError, Result};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Descend through single-child directory chains
///
/// Starting at `start`, moves into the only subdirectory while there is
/// exactly one, at most `max_depth` times. The first directory with zero or
/// several subdirectories is the document root.
pub fn descend_to_document_root(start: &Path, max_depth: usize) -> Result<PathBuf> {
    let mut current = start.to_path_buf();

    for depth in 0..max_depth {
        match single_subdirectory(&current)? {
            Some(child) => {
                debug!(depth, ?child, "descending into single subdirectory");
                current = child;
            }
            None => return Ok(current),
        }
    }

    match single_subdirectory(&current)? {
        None => Ok(current),
        Some(_) => Err(Error::Ingest(IngestError::UnexpectedStructure {
            path: start.to_path_buf(),
            depth: max_depth,
        })),
    }
}

fn single_subdirectory(dir: &Path) -> Result<Option<PathBuf>> {
    let mut subdirs = subdirectories(dir)?;
    if subdirs.len() == 1 {
        Ok(subdirs.pop())
    } else {
        Ok(None)
    }
}

fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut subdirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            subdirs.push(entry.path());
        }
    }
    subdirs.sort();
    Ok(subdirs)
}

/// `{document_type}/{YYYY}/{MM-YYYY}/{DD-MM-YYYY}-a-{DD-MM-YYYY}` under `root`
///
/// Year and month come from the start date; a single-day range uses the
/// date alone as the last component.
pub fn destination_path(
    root: &Path,
    document_type: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<PathBuf> {
    let doc = sanitize_component(document_type);
    if doc.is_empty() {
        return Err(Error::Ingest(IngestError::InvalidPath {
            path: root.join(document_type),
            reason: "document type is empty".to_string(),
        }));
    }

    let period = if start == end {
        start.format("%d-%m-%Y").to_string()
    } else {
        format!("{}-a-{}", start.format("%d-%m-%Y"), end.format("%d-%m-%Y"))
    };

    Ok(root
        .join(doc)
        .join(start.format("%Y").to_string())
        .join(start.format("%m-%Y").to_string())
        .join(period))
}

/// Replace characters that cannot appear in a single path component
fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "." | ".." => String::new(),
        _ => cleaned,
    }
}

/// Replace `destination` with the content of `document_root`
///
/// An existing destination is removed first, never merged. Every
/// subdirectory of the root is moved; loose files are moved only when the
/// root has no subdirectories. Returns how many entries were moved.
pub fn relocate(document_root: &Path, destination: &Path) -> Result<usize> {
    if destination.exists() {
        info!(?destination, "destination exists, replacing it");
        std::fs::remove_dir_all(destination)?;
    }
    std::fs::create_dir_all(destination)?;

    let subdirs = subdirectories(document_root)?;
    let to_move = if subdirs.is_empty() {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(document_root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        files
    } else {
        subdirs
    };

    for source in &to_move {
        let Some(name) = source.file_name() else {
            continue;
        };
        move_path(source, &destination.join(name))?;
    }

    info!(
        ?document_root,
        ?destination,
        moved = to_move.len(),
        "documents relocated"
    );
    Ok(to_move.len())
}

/// Rename, falling back to copy-and-delete across filesystems
fn move_path(source: &Path, target: &Path) -> Result<()> {
    if std::fs::rename(source, target).is_ok() {
        return Ok(());
    }

    let move_failed = |reason: String| {
        Error::Ingest(IngestError::MoveFailed {
            source_path: source.to_path_buf(),
            dest_path: target.to_path_buf(),
            reason,
        })
    };

    debug!(?source, ?target, "rename failed, copying instead");
    copy_recursive(source, target).map_err(|e| move_failed(e.to_string()))?;

    let removed = if source.is_dir() {
        std::fs::remove_dir_all(source)
    } else {
        std::fs::remove_file(source)
    };
    if let Err(e) = removed {
        warn!(?source, error = %e, "copied but could not remove the source");
    }
    Ok(())
}

fn copy_recursive(source: &Path, target: &Path) -> std::io::Result<()> {
    if source.is_file() {
        std::fs::copy(source, target)?;
        return Ok(());
    }

    for entry in WalkDir::new(source) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(std::io::Error::other)?;
        let dest = target.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else {
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}
