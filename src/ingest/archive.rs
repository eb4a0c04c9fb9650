//! Locating and extracting the nested export archives.

use crate::error::{Error, IngestError, Result};
use encoding_rs::WINDOWS_1252;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Case-insensitive extension check
pub(crate) fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Archive files directly inside `dir`
pub fn detect_archives(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    debug!(?dir, "detecting archives");

    let entries = std::fs::read_dir(dir).map_err(|e| {
        Error::Io(std::io::Error::other(format!(
            "failed to read directory {}: {}",
            dir.display(),
            e
        )))
    })?;

    let mut archives = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && has_extension(&path, extensions) {
            archives.push(path);
        }
    }
    archives.sort();

    debug!("found {} archive(s)", archives.len());
    Ok(archives)
}

/// The most recently modified archive in `dir`
pub fn select_outer_archive(dir: &Path, extensions: &[String]) -> Result<PathBuf> {
    let archives = detect_archives(dir, extensions)?;

    if archives.len() > 1 {
        warn!(
            ?dir,
            count = archives.len(),
            "multiple archives in staging, using the most recently modified"
        );
    }

    let mut newest: Option<(PathBuf, SystemTime)> = None;
    for archive in archives {
        let modified = std::fs::metadata(&archive)?.modified()?;
        if newest.as_ref().is_none_or(|(_, current)| modified > *current) {
            newest = Some((archive, modified));
        }
    }

    newest.map(|(path, _)| path).ok_or_else(|| {
        Error::Ingest(IngestError::ArchiveNotFound {
            dir: dir.to_path_buf(),
        })
    })
}

/// First archive under `dir` (recursively, in name order) other than `outer`
pub fn find_inner_archive(dir: &Path, outer: &Path, extensions: &[String]) -> Result<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .find(|path| path != outer && has_extension(path, extensions))
        .ok_or_else(|| {
            Error::Ingest(IngestError::InnerArchiveNotFound {
                dir: dir.to_path_buf(),
            })
        })
}

/// Extract every entry of `archive_path` into `dest`
///
/// Entry names are read as raw bytes and decoded as UTF-8, or as Windows-1252
/// when they are not valid UTF-8, which recovers accented names written by
/// tools that do not set the zip UTF-8 flag. An entry that fails this way is
/// retried with the library's own name handling; an entry failing both is
/// skipped. Entries never overwrite each other: a name already extracted gets
/// a numbered sibling instead.
pub fn extract_archive(archive_path: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let extraction_failed = |reason: String| {
        Error::Ingest(IngestError::ExtractionFailed {
            archive: archive_path.to_path_buf(),
            reason,
        })
    };

    let file = std::fs::File::open(archive_path)
        .map_err(|e| extraction_failed(format!("failed to open archive: {e}")))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| extraction_failed(format!("failed to read archive: {e}")))?;

    std::fs::create_dir_all(dest)?;

    let mut extracted = Vec::new();
    for index in 0..archive.len() {
        match extract_decoded_entry(&mut archive, index, dest) {
            Ok(Some(path)) => extracted.push(path),
            Ok(None) => {}
            Err(e) => {
                debug!(?archive_path, index, error = %e, "decoded extraction failed, using default names");
                match extract_default_entry(&mut archive, index, dest) {
                    Ok(Some(path)) => extracted.push(path),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(?archive_path, index, error = %e, "skipping unreadable archive entry");
                    }
                }
            }
        }
    }

    info!(
        ?archive_path,
        extracted_count = extracted.len(),
        "ZIP extraction successful"
    );
    Ok(extracted)
}

fn extract_decoded_entry(
    archive: &mut zip::ZipArchive<std::fs::File>,
    index: usize,
    dest: &Path,
) -> Result<Option<PathBuf>> {
    let mut entry = archive
        .by_index(index)
        .map_err(|e| Error::Io(std::io::Error::other(format!("failed to read entry: {e}"))))?;
    let name = decode_entry_name(entry.name_raw());
    let relative = sanitize_entry_path(&name).ok_or_else(|| {
        Error::Io(std::io::Error::other(format!("unsafe entry path '{name}'")))
    })?;
    let is_dir = entry.is_dir() || name.ends_with('/') || name.ends_with('\\');
    write_entry(&mut entry, &dest.join(relative), is_dir)
}

fn extract_default_entry(
    archive: &mut zip::ZipArchive<std::fs::File>,
    index: usize,
    dest: &Path,
) -> Result<Option<PathBuf>> {
    let mut entry = archive
        .by_index(index)
        .map_err(|e| Error::Io(std::io::Error::other(format!("failed to read entry: {e}"))))?;
    let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
        warn!("skipping entry with unsafe path");
        return Ok(None);
    };
    let is_dir = entry.is_dir();
    write_entry(&mut entry, &dest.join(relative), is_dir)
}

fn write_entry(entry: &mut impl Read, target: &Path, is_dir: bool) -> Result<Option<PathBuf>> {
    if is_dir {
        std::fs::create_dir_all(target)?;
        return Ok(None);
    }

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let (path, mut outfile) = create_unique(target)?;
    std::io::copy(entry, &mut outfile)?;
    Ok(Some(path))
}

/// Create `target`, or `stem-N.ext` next to it when the name is taken
fn create_unique(target: &Path) -> Result<(PathBuf, std::fs::File)> {
    let open = |path: &Path| std::fs::OpenOptions::new().write(true).create_new(true).open(path);

    match open(target) {
        Ok(file) => return Ok((target.to_path_buf(), file)),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e.into()),
    }

    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = target
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    for n in 1..=MAX_NAME_SUFFIX {
        let candidate = target.with_file_name(format!("{stem}-{n}{extension}"));
        match open(&candidate) {
            Ok(file) => {
                warn!(?target, renamed = ?candidate, "archive entry name collides, extracting under a new name");
                return Ok((candidate, file));
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err(Error::Io(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("no free name for {}", target.display()),
    )))
}

const MAX_NAME_SUFFIX: usize = 1000;

/// Decode a raw entry name as UTF-8, falling back to Windows-1252
pub(crate) fn decode_entry_name(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(name) => name.to_string(),
        Err(_) => {
            let (name, _) = WINDOWS_1252.decode_without_bom_handling(raw);
            name.into_owned()
        }
    }
}

/// Relative path for an entry name, `None` if it would escape the destination
pub(crate) fn sanitize_entry_path(name: &str) -> Option<PathBuf> {
    let mut path = PathBuf::new();
    for part in name.split(['/', '\\']) {
        match part {
            "" | "." => continue,
            ".." => return None,
            part => {
                let component = Path::new(part);
                if !matches!(component.components().next(), Some(Component::Normal(_))) {
                    return None;
                }
                path.push(part);
            }
        }
    }
    if path.as_os_str().is_empty() {
        None
    } else {
        Some(path)
    }
}
