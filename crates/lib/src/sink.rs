//! Output sinks for JSON documents.

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Destination for the run's JSON documents.
pub trait JsonSink {
    fn write(&mut self, path: &Path, value: &Value) -> Result<()>;

    /// Remove a previously written document, if present.
    fn remove(&mut self, path: &Path) -> Result<()>;
}

/// Writes pretty-printed JSON files, creating parent directories as needed.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSink;

impl JsonSink for FileSink {
    fn write(&mut self, path: &Path, value: &Value) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        let bytes = serde_json::to_vec_pretty(value).context("serializing JSON output")?;
        std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
    }

    fn remove(&mut self, path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
        }
    }
}

/// Keeps documents in memory, keyed by path.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub files: BTreeMap<PathBuf, Value>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<&Value> {
        self.files.get(path.as_ref())
    }
}

impl JsonSink for MemorySink {
    fn write(&mut self, path: &Path, value: &Value) -> Result<()> {
        self.files.insert(path.to_path_buf(), value.clone());
        Ok(())
    }

    fn remove(&mut self, path: &Path) -> Result<()> {
        self.files.remove(path);
        Ok(())
    }
}
