//! Cluster catalog custom resources.
//!
//! The hub reads these; creation and modification happen through an external
//! admin flow. All live in the hub namespace under `hub.example.com/v1alpha1`.

mod addon;
mod hub;
mod task_kind;

pub use addon::*;
pub use hub::*;
pub use task_kind::*;
