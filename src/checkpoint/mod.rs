// src/checkpoint/mod.rs

//! Block-based checkpointing and graph garbage collection.
//!
//! - [`blocks`] groups tasks into fixed-size blocks and decides which blocks
//!   must be saved before their tasks may leave the graph.
//! - [`store`] persists the outputs of those blocks.

pub mod blocks;
pub mod store;

pub use blocks::{Block, BlockTracker};
pub use store::{CheckpointStore, FileCheckpointStore, ManifestEntry};
