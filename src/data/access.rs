// src/data/access.rs

use std::fmt;

use serde::Serialize;

use crate::types::{DataId, Direction, VersionId};

/// How a task parameter touches a data item, and which version(s) are involved.
///
/// Basic (by-value) parameters carry no entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "access", rename_all = "snake_case")]
pub enum AccessEntry {
    /// The task only consumes `version`.
    Read { version: VersionId },
    /// The task produces `new_version` from nothing.
    Write { new_version: VersionId },
    /// The task consumes `version` and produces `new_version`.
    ReadWrite {
        version: VersionId,
        new_version: VersionId,
    },
}

impl AccessEntry {
    pub fn data(&self) -> DataId {
        match self {
            AccessEntry::Read { version } => version.data,
            AccessEntry::Write { new_version } => new_version.data,
            AccessEntry::ReadWrite { version, .. } => version.data,
        }
    }

    pub fn read_version(&self) -> Option<VersionId> {
        match self {
            AccessEntry::Read { version } | AccessEntry::ReadWrite { version, .. } => {
                Some(*version)
            }
            AccessEntry::Write { .. } => None,
        }
    }

    pub fn written_version(&self) -> Option<VersionId> {
        match self {
            AccessEntry::Write { new_version } | AccessEntry::ReadWrite { new_version, .. } => {
                Some(*new_version)
            }
            AccessEntry::Read { .. } => None,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            AccessEntry::Read { .. } => Direction::In,
            AccessEntry::Write { .. } => Direction::Out,
            AccessEntry::ReadWrite { .. } => Direction::InOut,
        }
    }
}

impl fmt::Display for AccessEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessEntry::Read { version } => write!(f, "R {version}"),
            AccessEntry::Write { new_version } => write!(f, "W {new_version}"),
            AccessEntry::ReadWrite {
                version,
                new_version,
            } => write!(f, "RW {version}->{new_version}"),
        }
    }
}
