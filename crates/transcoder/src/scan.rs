use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use crate::config::RunConfig;
use log::{debug, info, warn};

/// Collect every file under `root` whose extension is in the allowlist
///
/// The whole tree is walked before any file is processed, so outputs written
/// during the run are never picked up as candidates.
/// Unreadable entries are logged and skipped.
pub fn scan_directory(root: &Path, cfg: &RunConfig) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    let mut files_checked = 0;

    info!("Walking directory: {}", root.display());

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        files_checked += 1;
        let path = entry.path();
        debug!("Checking file: {}", path.display());

        if cfg.matches_extension(path) {
            debug!("Found media file: {}", path.display());
            candidates.push(path.to_path_buf());
        }
    }

    info!(
        "Scan complete: checked {} files, {} with a matching extension",
        files_checked,
        candidates.len()
    );
    candidates
}
