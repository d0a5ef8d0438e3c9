// src/exec/mod.rs

//! Execution layer.
//!
//! - [`backend`] provides the `ComputingBackend` trait and the tagged
//!   `Backend` used for the CPU, accelerator and remote variants.
//! - [`kernel`] is the boundary to the code that computes a job, with a
//!   `SimulatedKernel` used by the CLI.
//! - [`registry`] builds backends from configuration through a factory
//!   table and keeps them in registration order.

pub mod backend;
pub mod kernel;
pub mod registry;

pub use backend::{Backend, BackendSpec, ComputingBackend, ExecutedJob, Implementation};
pub use kernel::{KernelOutput, KernelRunner, SimulatedKernel};
pub use registry::{BackendFactory, BackendRegistry, BackendSet};
