//! Map directory manifest.
//!
//! A map directory holds `MANIFEST.json` and one or more generation
//! directories `gen-<n>/`, each with its own log and index snapshot. The
//! manifest names the live generation; compaction writes the next generation
//! beside it and switches over by rewriting the manifest.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Name of the manifest file inside a map directory
pub const MANIFEST_FILE: &str = "MANIFEST.json";

/// Current manifest format version
pub const MANIFEST_VERSION: u32 = 1;

const GENERATION_PREFIX: &str = "gen-";

/// Contents of `MANIFEST.json`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Manifest format version
    pub format_version: u32,
    /// Live generation
    pub generation: u64,
}

impl Manifest {
    /// Manifest naming `generation`
    pub fn new(generation: u64) -> Self {
        Self { format_version: MANIFEST_VERSION, generation }
    }

    /// Read the manifest of `dir`; `None` if there is none.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };

        let manifest: Manifest = serde_json::from_slice(&data)
            .map_err(|e| Error::corruption(format!("Failed to parse manifest {:?}: {}", path, e)))?;
        if manifest.format_version != MANIFEST_VERSION {
            return Err(Error::corruption(format!(
                "Unsupported manifest version: {}",
                manifest.format_version
            )));
        }
        Ok(Some(manifest))
    }

    /// Atomically replace the manifest of `dir`.
    pub fn store(&self, dir: &Path) -> Result<()> {
        let path = dir.join(MANIFEST_FILE);
        let tmp = dir.join(format!("{}.tmp", MANIFEST_FILE));
        let json = serde_json::to_vec_pretty(self)?;
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        log::info!("Manifest {:?} now names generation {}", path, self.generation);
        Ok(())
    }
}

/// Directory of `generation` inside the map directory `dir`
pub fn generation_dir(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("{}{}", GENERATION_PREFIX, generation))
}

/// Generation directories present in `dir`, in no particular order
pub fn list_generations(dir: &Path) -> Result<Vec<u64>> {
    let mut generations = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(number) = name.to_str().and_then(|n| n.strip_prefix(GENERATION_PREFIX)) else {
            continue;
        };
        if let Ok(generation) = number.parse::<u64>() {
            generations.push(generation);
        }
    }
    Ok(generations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_manifest_store_and_load() {
        let dir = TempDir::new().unwrap();
        assert_eq!(Manifest::load(dir.path()).unwrap(), None);

        Manifest::new(3).store(dir.path()).unwrap();
        assert_eq!(Manifest::load(dir.path()).unwrap(), Some(Manifest::new(3)));

        Manifest::new(4).store(dir.path()).unwrap();
        assert_eq!(Manifest::load(dir.path()).unwrap().unwrap().generation, 4);
    }

    #[test]
    fn test_manifest_is_json() {
        let dir = TempDir::new().unwrap();
        Manifest::new(7).store(dir.path()).unwrap();
        let text = fs::read_to_string(dir.path().join(MANIFEST_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["generation"], 7);
        assert_eq!(value["format_version"], MANIFEST_VERSION);
    }

    #[test]
    fn test_garbled_manifest() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), b"{not json").unwrap();
        assert!(matches!(Manifest::load(dir.path()), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_list_generations() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(generation_dir(dir.path(), 0)).unwrap();
        fs::create_dir(generation_dir(dir.path(), 12)).unwrap();
        fs::create_dir(dir.path().join("gen-x")).unwrap();
        fs::write(dir.path().join("gen-5"), b"a file, not a generation").unwrap();

        let mut generations = list_generations(dir.path()).unwrap();
        generations.sort_unstable();
        assert_eq!(generations, vec![0, 12]);
    }
}
