// src/data/mod.rs

//! Data items, their versions, and how tasks access them.
//!
//! - [`version_store`] tracks per data item the ordered sequence of
//!   immutable versions, their readers and where they live.
//! - [`access`] is the tagged description of how one task parameter touches
//!   a version (read / write / read-modify-write).
//! - [`task`] holds the client-facing task model and its submission-time
//!   validation.

pub mod access;
pub mod task;
pub mod version_store;

pub use access::AccessEntry;
pub use task::{Parameter, ParamValue, Task, TaskIdAllocator, TaskSpec};
pub use version_store::{DataItem, DataVersion, DataVersionStore};
