// src/provider/memory.rs

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, trace};

use crate::fs::{self, FileSystem};
use crate::provider::{DataProvider, DataRef};
use crate::types::{BoxFuture, DataKey, Location, VersionId};

#[derive(Debug, Default)]
struct Inner {
    /// Client-provided contents, served as version 0 of their key.
    seeds: HashMap<DataKey, Vec<u8>>,
    values: HashMap<VersionId, Vec<u8>>,
    advertised: HashMap<VersionId, Location>,
}

/// Provider that keeps every version in memory.
///
/// File-typed versions are materialized under `workdir` on demand, through
/// the [`FileSystem`] abstraction.
#[derive(Debug, Clone)]
pub struct InMemoryDataProvider {
    inner: Arc<Mutex<Inner>>,
    fs: Arc<dyn FileSystem>,
    workdir: PathBuf,
}

impl InMemoryDataProvider {
    pub fn new(fs: Arc<dyn FileSystem>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            fs,
            workdir: workdir.into(),
        }
    }

    /// Make `key` available as client-provided input.
    pub fn seed(&self, key: DataKey, contents: impl Into<Vec<u8>>) {
        self.lock().seeds.insert(key, contents.into());
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Stored bytes of `version`, if any.
    pub fn value(&self, version: VersionId) -> Option<Vec<u8>> {
        self.lock().values.get(&version).cloned()
    }

    /// Location last advertised for `version`.
    pub fn advertised(&self, version: VersionId) -> Option<Location> {
        self.lock().advertised.get(&version).copied()
    }

    pub fn stored_versions(&self) -> usize {
        self.lock().values.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lookup(&self, data: &DataRef) -> Option<Vec<u8>> {
        let inner = self.lock();
        if let Some(bytes) = inner.values.get(&data.version) {
            return Some(bytes.clone());
        }
        if data.version.version == 0 {
            return inner.seeds.get(&data.key).cloned();
        }
        None
    }

    fn fetch(&self, data: &DataRef) -> Result<Vec<u8>> {
        self.lookup(data)
            .ok_or_else(|| anyhow!("version {} of {} is not available", data.version, data.key))
    }
}

impl DataProvider for InMemoryDataProvider {
    fn request_existence(&self, data: DataRef) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            let exists = self.lookup(&data).is_some();
            trace!(version = %data.version, exists, "existence check");
            Ok(exists)
        })
    }

    fn obtain_as_object(&self, data: DataRef) -> BoxFuture<'_, Result<Vec<u8>>> {
        Box::pin(async move { self.fetch(&data) })
    }

    fn obtain_as_file(&self, data: DataRef) -> BoxFuture<'_, Result<PathBuf>> {
        Box::pin(async move {
            let bytes = self.fetch(&data)?;
            let path = fs::join(&self.workdir, &data.rename());
            if !self.fs.exists(&path) {
                self.fs
                    .write(&path, &bytes)
                    .with_context(|| format!("materializing {}", data.version))?;
            }
            Ok(path)
        })
    }

    fn store_object(&self, data: DataRef, value: Vec<u8>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            debug!(version = %data.version, bytes = value.len(), "stored object");
            self.lock().values.insert(data.version, value);
            Ok(())
        })
    }

    fn store_file(&self, data: DataRef, path: PathBuf) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let bytes = self
                .fs
                .read(&path)
                .with_context(|| format!("storing {} from {:?}", data.version, path))?;
            debug!(version = %data.version, bytes = bytes.len(), "stored file");
            self.lock().values.insert(data.version, bytes);
            Ok(())
        })
    }

    fn obtain_size(&self, data: DataRef) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move { Ok(self.fetch(&data)?.len() as u64) })
    }

    fn advertise(&self, data: DataRef, location: Location) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut inner = self.lock();
            let entry = inner.advertised.entry(data.version).or_default();
            *entry = entry.union(location);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;
    use crate::types::DataId;

    fn provider() -> (InMemoryDataProvider, MockFileSystem) {
        let fs = MockFileSystem::new();
        (InMemoryDataProvider::new(Arc::new(fs.clone()), "work"), fs)
    }

    #[tokio::test]
    async fn seeds_serve_only_version_zero() {
        let (p, _) = provider();
        let key = DataKey::Object("a".into());
        p.seed(key.clone(), b"hello".to_vec());

        let v0 = DataRef::new(VersionId::new(DataId(0), 0), key.clone());
        let v1 = DataRef::new(VersionId::new(DataId(0), 1), key);
        assert!(p.request_existence(v0.clone()).await.unwrap());
        assert!(!p.request_existence(v1.clone()).await.unwrap());
        assert_eq!(p.obtain_as_object(v0).await.unwrap(), b"hello");
        assert!(p.obtain_as_object(v1).await.is_err());
    }

    #[tokio::test]
    async fn file_values_are_materialized_under_workdir() {
        let (p, fs) = provider();
        let data = DataRef::new(VersionId::new(DataId(3), 1), DataKey::File("out.txt".into()));
        p.store_object(data.clone(), b"xyz".to_vec()).await.unwrap();

        let path = p.obtain_as_file(data.clone()).await.unwrap();
        assert_eq!(path, PathBuf::from("work/d3v1"));
        assert_eq!(fs.read(&path).unwrap(), b"xyz");
        assert_eq!(p.obtain_size(data).await.unwrap(), 3);
    }
}
