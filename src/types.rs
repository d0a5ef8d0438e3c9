// src/types.rs

//! Identifiers and small enums shared by every layer of the scheduler.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Boxed, sendable future returned by collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Identifier of an implementation family (e.g. `"matmul"`).
pub type CoreElementId = String;

/// Name of a registered computing backend (e.g. `"cpu"`).
pub type BackendName = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataId(pub u64);

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.0)
    }
}

/// A single immutable version of a data item.
///
/// The `Display` form (`d3v1`) doubles as the rename under which the data
/// provider stores the bytes of that version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionId {
    pub data: DataId,
    pub version: u32,
}

impl VersionId {
    pub fn new(data: DataId, version: u32) -> Self {
        Self { data, version }
    }

    pub fn rename(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.data, self.version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub u64);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block-{}", self.0)
    }
}

/// How a parameter is accessed by the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
    InOut,
}

impl Direction {
    pub fn reads(self) -> bool {
        matches!(self, Direction::In | Direction::InOut)
    }

    pub fn writes(self) -> bool {
        matches!(self, Direction::Out | Direction::InOut)
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            "inout" => Ok(Direction::InOut),
            other => Err(format!(
                "invalid direction: {other} (expected \"in\", \"out\" or \"inout\")"
            )),
        }
    }
}

/// What a parameter carries: a plain value or a reference to a data item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Basic,
    File,
    Object,
}

impl ParamKind {
    pub fn is_reference(self) -> bool {
        !matches!(self, ParamKind::Basic)
    }
}

/// Position of a parameter in the call it was captured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamRole {
    /// Regular call argument.
    #[default]
    Argument,
    /// The object the method is invoked on.
    Target,
    /// The value returned by the call.
    Return,
}

/// Client-side logical name of a data item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataKey {
    File(String),
    Object(String),
}

impl DataKey {
    pub fn kind(&self) -> ParamKind {
        match self {
            DataKey::File(_) => ParamKind::File,
            DataKey::Object(_) => ParamKind::Object,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DataKey::File(n) | DataKey::Object(n) => n,
        }
    }
}

impl fmt::Display for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataKey::File(n) => write!(f, "file:{n}"),
            DataKey::Object(n) => write!(f, "object:{n}"),
        }
    }
}

/// Where copies of a data version currently live. Flags are OR-combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Location {
    pub local: bool,
    pub remote: bool,
}

impl Location {
    pub const LOCAL: Location = Location {
        local: true,
        remote: false,
    };
    pub const REMOTE: Location = Location {
        local: false,
        remote: true,
    };

    pub fn union(self, other: Location) -> Location {
        Location {
            local: self.local || other.local,
            remote: self.remote || other.remote,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.local, self.remote) {
            (true, true) => f.write_str("both"),
            (true, false) => f.write_str("local"),
            (false, true) => f.write_str("remote"),
            (false, false) => f.write_str("nowhere"),
        }
    }
}

/// Closed set of backend variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local CPU worker pool.
    Cpu,
    /// Local accelerator; needs a staging step before execution.
    Accelerator,
    /// Remote / cloud workers; data must be shipped to and from them.
    Remote,
}

impl BackendKind {
    /// Location at which this kind of backend reads and leaves its data.
    pub fn location(self) -> Location {
        match self {
            BackendKind::Cpu | BackendKind::Accelerator => Location::LOCAL,
            BackendKind::Remote => Location::REMOTE,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Cpu => f.write_str("cpu"),
            BackendKind::Accelerator => f.write_str("accelerator"),
            BackendKind::Remote => f.write_str("remote"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cpu" => Ok(BackendKind::Cpu),
            "accelerator" | "gpu" => Ok(BackendKind::Accelerator),
            "remote" | "cloud" => Ok(BackendKind::Remote),
            other => Err(format!(
                "invalid backend kind: {other} (expected \"cpu\", \"accelerator\" or \"remote\")"
            )),
        }
    }
}

/// Which checkpoint blocks have their outputs durably saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckpointPolicy {
    /// Nothing is saved; completed sub-graphs are pruned as soon as possible.
    #[default]
    None,
    /// Every block is saved before its tasks may be pruned.
    EveryBlock,
    /// Only every `interval`-th block (0, n, 2n, ...) is saved.
    EveryNth { interval: u64 },
}

impl CheckpointPolicy {
    pub fn is_durable(&self, block: BlockId) -> bool {
        match self {
            CheckpointPolicy::None => false,
            CheckpointPolicy::EveryBlock => true,
            CheckpointPolicy::EveryNth { interval } => block.0 % (*interval).max(1) == 0,
        }
    }
}
