// src/provider/mod.rs

//! Data Provider collaborator.
//!
//! The scheduler never moves bytes itself. It asks a [`DataProvider`]
//! whether a version exists, to fetch it (as an in-memory object or as a
//! file), to store the outputs of a job and to advertise where they live.
//! Transport, replica lookup and retry policy belong to the provider.
//!
//! - [`memory`] provides [`InMemoryDataProvider`], used by the CLI and tests.

use std::path::PathBuf;

use anyhow::Result;

use crate::types::{BoxFuture, DataKey, Location, VersionId};

pub mod memory;

pub use memory::InMemoryDataProvider;

/// A specific version of a named data item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataRef {
    pub version: VersionId,
    pub key: DataKey,
}

impl DataRef {
    pub fn new(version: VersionId, key: DataKey) -> Self {
        Self { version, key }
    }

    /// Name under which the provider stores this version.
    pub fn rename(&self) -> String {
        self.version.rename()
    }
}

/// Bytes of a version, either in memory or materialized as a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataValue {
    Object(Vec<u8>),
    File(PathBuf),
}

/// Asynchronous access to data versions.
///
/// Every call returns a future that resolves once the provider has an
/// answer; errors are opaque to the scheduler and are forwarded to the
/// submitter as data acquisition failures.
pub trait DataProvider: Send + Sync {
    fn request_existence(&self, data: DataRef) -> BoxFuture<'_, Result<bool>>;

    fn obtain_as_object(&self, data: DataRef) -> BoxFuture<'_, Result<Vec<u8>>>;

    fn obtain_as_file(&self, data: DataRef) -> BoxFuture<'_, Result<PathBuf>>;

    fn store_object(&self, data: DataRef, value: Vec<u8>) -> BoxFuture<'_, Result<()>>;

    fn store_file(&self, data: DataRef, path: PathBuf) -> BoxFuture<'_, Result<()>>;

    fn obtain_size(&self, data: DataRef) -> BoxFuture<'_, Result<u64>>;

    /// Publish that `data` now lives at `location`.
    fn advertise(&self, _data: DataRef, _location: Location) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}
