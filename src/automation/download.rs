//! Export download and completion detection.

use super::step_failure;
use crate::clock::Clock;
use crate::config::DownloadConfig;
use crate::driver::UiSession;
use crate::driver::selectors::ExportPageSelectors;
use crate::error::{AutomationError, Error, Result};
use crate::ingest::archive::has_extension;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Triggers the download of a completed export and waits for the file
pub struct Downloader<'a> {
    selectors: &'a ExportPageSelectors,
    config: &'a DownloadConfig,
    archive_extensions: &'a [String],
    clock: &'a dyn Clock,
}

impl<'a> Downloader<'a> {
    #[allow(missing_docs)]
    pub fn new(
        selectors: &'a ExportPageSelectors,
        config: &'a DownloadConfig,
        archive_extensions: &'a [String],
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            selectors,
            config,
            archive_extensions,
            clock,
        }
    }

    /// Click the download link of the newest export and wait for the archive
    /// to land in `download_dir`
    pub async fn run(&self, session: &mut dyn UiSession, download_dir: &Path) -> Result<PathBuf> {
        self.trigger(session)
            .await
            .map_err(|e| step_failure(e, AutomationError::Download))?;
        self.wait_for_archive(download_dir).await
    }

    async fn trigger(&self, session: &mut dyn UiSession) -> Result<()> {
        session.enter_frame(&self.selectors.legado_frame).await?;
        let clicked = session.click(&self.selectors.download_button).await;
        if let Err(e) = session.exit_frames().await {
            warn!(error = %e, "failed to leave the export frame");
        }
        clicked?;
        info!("download triggered");
        Ok(())
    }

    /// Wait for a finished archive: no browser temp files around and a
    /// non-zero size unchanged across two checks
    pub async fn wait_for_archive(&self, dir: &Path) -> Result<PathBuf> {
        let started = self.clock.now();
        let mut last: Option<(PathBuf, u64)> = None;

        loop {
            let scan = self.scan(dir).await?;

            if !scan.in_progress {
                if let Some((path, size)) = scan.newest {
                    if size > 0 && last.as_ref() == Some(&(path.clone(), size)) {
                        info!(?path, size_bytes = size, "download finished");
                        return Ok(path);
                    }
                    debug!(?path, size_bytes = size, "archive present, checking stability");
                    last = Some((path, size));
                } else {
                    last = None;
                }
            } else {
                last = None;
            }

            let waited = self.clock.now().duration_since(started);
            if waited >= self.config.timeout {
                return Err(Error::Automation(AutomationError::Download(format!(
                    "no finished archive in {} after {}s",
                    dir.display(),
                    waited.as_secs()
                ))));
            }

            self.clock.sleep(self.config.stability_interval).await;
        }
    }

    async fn scan(&self, dir: &Path) -> Result<DirScan> {
        let mut scan = DirScan::default();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(scan),
            Err(e) => return Err(Error::Io(e)),
        };

        let mut newest: Option<(PathBuf, u64, std::time::SystemTime)> = None;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_lowercase();

            if self
                .config
                .partial_suffixes
                .iter()
                .any(|suffix| name.ends_with(&suffix.to_lowercase()))
            {
                scan.in_progress = true;
                continue;
            }

            if !has_extension(&path, self.archive_extensions) {
                continue;
            }

            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified()?;
            let newer = newest
                .as_ref()
                .is_none_or(|(_, _, current)| modified > *current);
            if newer {
                newest = Some((path, metadata.len(), modified));
            }
        }

        scan.newest = newest.map(|(path, size, _)| (path, size));
        Ok(scan)
    }
}

#[derive(Debug, Default)]
struct DirScan {
    in_progress: bool,
    newest: Option<(PathBuf, u64)>,
}
