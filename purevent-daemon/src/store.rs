//! Whole-file JSON persistence used by the registry, history and activity log.

use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads `path` as JSON. A missing file is `Ok(None)`, not an error.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

/// Overwrites `path` with pretty JSON. Each call writes its own temp file next
/// to the target and renames it over, so a crash mid-write leaves the previous
/// snapshot intact.
pub fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let json = serde_json::to_string_pretty(value)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(json.as_bytes())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<HashMap<String, u32>> = load_json(&dir.path().join("nope.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_creates_parent_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.json");

        save_json(&path, &vec![1, 2, 3]).unwrap();
        save_json(&path, &vec![4]).unwrap();

        let loaded: Option<Vec<u32>> = load_json(&path).unwrap();
        assert_eq!(loaded, Some(vec![4]));
        let leftovers = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_concurrent_saves_leave_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::thread::scope(|s| {
            for n in 0..8u32 {
                let path = &path;
                s.spawn(move || {
                    for _ in 0..20 {
                        save_json(path, &vec![n; 64]).unwrap();
                    }
                });
            }
        });
        let loaded: Vec<u32> = load_json(&path).unwrap().unwrap();
        assert_eq!(loaded.len(), 64);
        assert!(loaded.iter().all(|v| *v == loaded[0]));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();
        let loaded: Result<Option<Vec<u32>>, _> = load_json(&path);
        assert!(matches!(loaded, Err(StoreError::Serialization(_))));
    }
}
