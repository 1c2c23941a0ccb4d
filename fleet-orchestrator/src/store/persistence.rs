use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// Writes `state` as JSON to `path` atomically: a sibling temp file is
/// written and synced, then renamed over the target. Readers see either the
/// old snapshot or the new one, never a partial file.
pub fn save_state<T: Serialize>(path: &Path, state: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create snapshot directory")?;
        }
    }

    let json = serde_json::to_vec_pretty(state).context("Failed to serialize snapshot")?;

    let temp_path = path.with_extension("tmp");
    let mut temp_file =
        std::fs::File::create(&temp_path).context("Failed to create temp snapshot")?;
    temp_file
        .write_all(&json)
        .context("Failed to write temp snapshot")?;
    temp_file.sync_all().context("Failed to sync temp snapshot")?;

    std::fs::rename(&temp_path, path).context("Failed to move snapshot into place")?;
    Ok(())
}

/// Reads a snapshot written by [`save_state`]. `Ok(None)` when there is none yet.
pub fn load_state<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to open snapshot {}", path.display()))
        }
    };
    let state = serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("Failed to parse snapshot {}", path.display()))?;
    Ok(Some(state))
}
