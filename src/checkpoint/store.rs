// src/checkpoint/store.rs

//! Durable storage for the outputs of checkpoint blocks.
//!
//! Layout under the checkpoint directory:
//!
//! ```text
//! <dir>/block-<n>/<rename>        raw bytes of one saved version
//! <dir>/manifest                  "<block> <rename> <blake3 hex>" per line
//! ```
//!
//! The manifest is append-only, so a restarted process can read back which
//! versions were saved and verify their contents.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use blake3::Hasher;
use tracing::debug;

use crate::fs::{self, FileSystem};
use crate::provider::{DataRef, DataValue};
use crate::types::BlockId;

pub const MANIFEST_FILE: &str = "manifest";

/// Durable sink for checkpointed versions.
pub trait CheckpointStore: Send + Sync {
    /// Persist one version belonging to `block`; returns its content digest.
    fn save(&self, block: BlockId, data: &DataRef, value: &DataValue) -> Result<String>;
}

/// One line of the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub block: u64,
    pub rename: String,
    pub digest: String,
}

/// Checkpoint store backed by a directory on a [`FileSystem`].
#[derive(Debug)]
pub struct FileCheckpointStore {
    fs: Arc<dyn FileSystem>,
    dir: PathBuf,
    manifest_lock: Mutex<()>,
}

impl FileCheckpointStore {
    pub fn new(fs: Arc<dyn FileSystem>, dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            dir: dir.into(),
            manifest_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn manifest_path(&self) -> PathBuf {
        fs::join(&self.dir, MANIFEST_FILE)
    }

    /// Path under which `rename` of `block` is stored.
    pub fn version_path(&self, block: BlockId, rename: &str) -> PathBuf {
        fs::join(&self.dir, &block.to_string()).join(rename)
    }

    /// Read back every saved version recorded in the manifest.
    pub fn load_manifest(&self) -> Result<Vec<ManifestEntry>> {
        let path = self.manifest_path();
        if !self.fs.exists(&path) {
            return Ok(Vec::new());
        }

        let bytes = self.fs.read(&path)?;
        let text = String::from_utf8(bytes).context("checkpoint manifest is not UTF-8")?;

        let mut entries = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(block), Some(rename), Some(digest)) =
                (parts.next(), parts.next(), parts.next())
            else {
                return Err(anyhow!("malformed manifest line {}: {:?}", lineno + 1, line));
            };
            let block = block
                .parse()
                .with_context(|| format!("invalid block number on manifest line {}", lineno + 1))?;
            entries.push(ManifestEntry {
                block,
                rename: rename.to_string(),
                digest: digest.to_string(),
            });
        }
        Ok(entries)
    }

    /// Check that the stored bytes of `entry` still match its digest.
    pub fn verify(&self, entry: &ManifestEntry) -> Result<bool> {
        let bytes = self
            .fs
            .read(&self.version_path(BlockId(entry.block), &entry.rename))?;
        Ok(digest_of(&bytes) == entry.digest)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, block: BlockId, data: &DataRef, value: &DataValue) -> Result<String> {
        let bytes = match value {
            DataValue::Object(bytes) => bytes.clone(),
            DataValue::File(path) => self
                .fs
                .read(path)
                .with_context(|| format!("reading {:?} for checkpoint", path))?,
        };

        let rename = data.version.rename();
        let target = self.version_path(block, &rename);
        self.fs.write(&target, &bytes)?;

        let digest = digest_of(&bytes);
        let line = format!("{} {} {}\n", block.0, rename, digest);
        {
            let _guard = self
                .manifest_lock
                .lock()
                .map_err(|_| anyhow!("checkpoint manifest lock poisoned"))?;
            self.fs.append(&self.manifest_path(), line.as_bytes())?;
        }

        debug!(%block, version = %data.version, digest = %digest, "checkpointed version");
        Ok(digest)
    }
}

fn digest_of(bytes: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize().to_hex().to_string()
}
