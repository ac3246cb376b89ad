use crate::errors::DashError;
use std::fs;
use std::path::{Path, PathBuf};

/// Deletes the oldest `.jsonl` files in `dir` until the directory's log total
/// fits `budget_bytes`. The file named by `active` is never deleted.
pub fn enforce_total_budget(
    dir: &Path,
    budget_bytes: u64,
    active: Option<&Path>,
) -> Result<Vec<PathBuf>, DashError> {
    let mut logs = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| path.extension().is_some_and(|ext| ext == "jsonl"))
        .filter_map(|path| {
            let meta = fs::metadata(&path).ok()?;
            Some((path, meta.len(), meta.modified().ok()))
        })
        .collect::<Vec<_>>();

    logs.sort_by(|a, b| a.2.cmp(&b.2));

    let mut total = logs.iter().map(|(_, len, _)| *len).sum::<u64>();
    let mut deleted = Vec::new();
    for (path, len, _) in logs {
        if total <= budget_bytes {
            break;
        }
        if active.is_some_and(|active| active == path) {
            continue;
        }
        fs::remove_file(&path)?;
        total = total.saturating_sub(len);
        deleted.push(path);
    }

    Ok(deleted)
}
