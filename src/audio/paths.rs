//! Playback file locations
//!
//! Finished takes are written here so the UI can play them back before saving.
//! Default: ~/.local/share/voxnote/playback/

use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const MAX_PLAYBACK_FILES: usize = 5;

/// Default playback directory under the platform's local data dir.
pub fn default_playback_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("voxnote")
        .join("playback")
}

/// Build the playback file path for a session, creating the directory.
/// Format: <unix-seconds>_<uuid>.<ext>
pub fn generate_playback_path(dir: &Path, session_id: Uuid, extension: &str) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let filename = format!("{}_{}.{}", unix_timestamp(), session_id, extension);
    Ok(dir.join(filename))
}

fn unix_timestamp() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Delete a playback file. A missing file is not an error.
pub fn remove_playback_file(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            log::debug!("Removed playback file: {:?}", path);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Keep only the most recent playback files.
pub fn cleanup_old_playback(dir: &Path) -> std::io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut entries: Vec<_> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .collect();

    if entries.len() <= MAX_PLAYBACK_FILES {
        return Ok(0);
    }

    // Oldest first
    entries.sort_by(|a, b| {
        let time_a = a.metadata().and_then(|m| m.modified()).ok();
        let time_b = b.metadata().and_then(|m| m.modified()).ok();
        time_a.cmp(&time_b)
    });

    let to_delete = entries.len() - MAX_PLAYBACK_FILES;
    let mut deleted = 0;

    for entry in entries.into_iter().take(to_delete) {
        if fs::remove_file(entry.path()).is_ok() {
            log::debug!("Cleaned up old playback file: {:?}", entry.path());
            deleted += 1;
        }
    }

    Ok(deleted)
}
